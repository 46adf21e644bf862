use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    StdIoError(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid input argument: {0}")]
    InvalidInputArgument(String),

    #[error("Command execution error: {0}")]
    CommandExecutionError(String),

    #[error("Emulator launch failed: {0}")]
    EmulatorLaunchError(String),

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

impl AppError {
    /// True for failures that are rejected before any process is spawned.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            AppError::InvalidPath(_) | AppError::InvalidInputArgument(_)
        )
    }
}
