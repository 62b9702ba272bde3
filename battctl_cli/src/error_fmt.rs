//! Human-readable error descriptions and structured JSON error formatting.

use crate::cli::CliError;
use battctl_core::error::{BuildError, CoreError};
use battctl_sim::SimError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `battctl check-config`."
            ),
            CliError::Source(msg) => format!(
                "What happened: The telemetry source failed ({msg}).\nLikely causes: Unreadable input or a source that cannot start.\nHow to fix: Check the source arguments and rerun with --log-level=debug."
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::CellCountMismatch {
                configured,
                reported,
            } => format!(
                "What happened: The source reports {reported} cells but the config expects {configured}.\nLikely causes: Wrong battery.cell_count or a recording from another pack.\nHow to fix: Set battery.cell_count to match the BMS."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `battctl check-config`."
            ),
            BuildError::MissingSource | BuildError::MissingConfig => format!(
                "What happened: {be}.\nLikely causes: The control core was assembled without all inputs.\nHow to fix: Report this as a bug."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CoreError>() {
        return match ce {
            CoreError::Config(msg) | CoreError::Curve(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: A control curve or interval that cannot be used.\nHow to fix: Fix the [current] curve tables or [battery] values."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<SimError>() {
        return match se {
            SimError::Header(_) | SimError::Row { .. } => format!(
                "What happened: The replay CSV is malformed ({se}).\nLikely causes: Missing cell1..cellN or current columns, or a non-numeric field.\nHow to fix: Fix the file; empty cell fields replay as a missed poll."
            ),
            other => format!(
                "What happened: Replay source failed ({other}).\nLikely causes: The file does not exist or is unreadable.\nHow to fix: Check the CSV path."
            ),
        };
    }

    let msg = err.to_string();
    if msg
        .to_ascii_lowercase()
        .contains("current correction csv must have headers")
    {
        return "Invalid headers in current correction CSV. Expected 'reported,measured'.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 for configuration, 3 for the telemetry source, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::Config(_) => 2,
            CliError::Source(_) => 3,
        };
    }
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::CellCountMismatch { .. } => 3,
            _ => 2,
        };
    }
    if let Some(ce) = err.downcast_ref::<CoreError>() {
        return match ce {
            CoreError::Config(_) | CoreError::Curve(_) => 2,
            CoreError::Source(_) => 3,
            _ => 1,
        };
    }
    if err.downcast_ref::<SimError>().is_some() {
        return 3;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match exit_code_for_error(err) {
        2 => "Config",
        3 => "Source",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
