use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulated dropout at poll {poll}")]
    Dropout { poll: u64 },
    #[error("replay exhausted after {rows} rows")]
    Exhausted { rows: usize },
    #[error("replay row {line} has no cell voltages")]
    EmptyRow { line: u64 },
    #[error("replay CSV header: {0}")]
    Header(String),
    #[error("replay row {line}: {msg}")]
    Row { line: u64, msg: String },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
