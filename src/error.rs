use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Coverage error: {coverage:.2}% after remediation ({reason})")]
    Coverage { coverage: f64, reason: String },

    #[error("Conflict graph error: {0}")]
    ConflictGraph(String),

    #[error("Task execution error: {0}")]
    TaskExecution(String),

    #[error("Store write error for {path}: {reason}")]
    StoreWrite { path: String, reason: String },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task queue is shut down")]
    QueueClosed,
}

impl Error {
    /// True for the errors that abort a decomposition run.
    pub fn is_planning_failure(&self) -> bool {
        matches!(
            self,
            Error::Extraction(_)
                | Error::Planning(_)
                | Error::Coverage { .. }
                | Error::ConflictGraph(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
