use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Four cells polled every 10 ms keeps each run well under a second.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[battery]
cell_count = 4
capacity_ah = 100.0
poll_interval_s = 0.01

[runner]
mode = "direct"
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn battctl(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("battctl").unwrap();
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("warn");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["check-config"], 0, "config OK: 4 cells, bulk 13.800 V, float 13.500 V", "stdout")]
#[case(&["run", "--max-polls", "3"], 0, "action=pass_through", "stdout")]
#[case(&["run", "--max-polls", "2", "--current", "-5"], 0, "mode=bulk", "stdout")]
#[case(&["run", "--dropout", "3..1"], 2, "empty range", "stderr")]
#[case(&["replay"], 2, "required", "stderr")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = battctl(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn missing_config_file_exits_with_config_code() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    battctl(&missing)
        .arg("check-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[rstest]
#[case::zero_cells("[battery]\ncell_count = 0\n", "cell_count")]
#[case::float_above_max(
    "[battery]\ncell_count = 4\n[cell]\nmax_voltage = 3.45\nfloat_voltage = 3.6\n",
    "float_voltage"
)]
#[case::not_toml("[battery\n", "Invalid configuration")]
fn invalid_config_is_rejected(#[case] toml: &str, #[case] needle: &str) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("bad.toml");
    fs::write(&cfg, toml).unwrap();
    battctl(&cfg)
        .arg("check-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn replay_with_wrong_cell_count_is_a_source_error() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let csv = dir.path().join("log.csv");
    fs::write(&csv, "cell1,cell2,current\n3.3,3.3,1.0\n").unwrap();
    battctl(&cfg)
        .arg("replay")
        .arg(&csv)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("reports 2 cells"));
}

#[rstest]
fn replay_with_bad_header_is_a_source_error() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let csv = dir.path().join("log.csv");
    fs::write(&csv, "volts,amps\n3.3,1.0\n").unwrap();
    battctl(&cfg)
        .arg("replay")
        .arg(&csv)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("malformed"));
}

#[rstest]
fn correction_csv_is_resolved_next_to_config() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("corr.csv"),
        "reported,measured\n-100,-98\n0,0\n100,97\n",
    )
    .unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(
        &cfg,
        "[battery]\ncell_count = 4\ncapacity_ah = 100.0\n[soc]\ncurrent_correction_csv = \"corr.csv\"\n",
    )
    .unwrap();
    battctl(&cfg).arg("check-config").assert().success();

    fs::write(dir.path().join("corr.csv"), "raw,value\n0,0\n1,1\n").unwrap();
    battctl(&cfg)
        .arg("check-config")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("reported,measured"));
}

#[rstest]
fn log_file_is_created_from_logging_section() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("battctl.log");
    let cfg = dir.path().join("cfg.toml");
    fs::write(
        &cfg,
        format!(
            "[battery]\ncell_count = 4\npoll_interval_s = 0.01\n[logging]\nfile = {:?}\nrotation = \"never\"\n",
            log.display().to_string()
        ),
    )
    .unwrap();
    battctl(&cfg)
        .args(["run", "--direct", "--max-polls", "2"])
        .assert()
        .success();
    assert!(log.exists());
}

#[rstest]
fn unknown_rotation_is_rejected() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(
        &cfg,
        "[battery]\ncell_count = 4\n[logging]\nfile = \"x.log\"\nrotation = \"weekly\"\n",
    )
    .unwrap();
    Command::cargo_bin("battctl")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("check-config")
        .current_dir(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rotation"));
}

#[rstest]
fn stats_go_to_stderr() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    battctl(&cfg)
        .args(["run", "--max-polls", "2", "--stats"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Cycles: 2"));
}

#[rstest]
fn shipped_config_checks_out() {
    let cfg = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../etc/battctl.toml");
    battctl(&cfg)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "config OK: 16 cells, bulk 55.200 V, float 54.000 V, min 46.400 V",
        ));
}
