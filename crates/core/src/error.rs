use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown orchestration state: {0}")]
    UnknownState(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
