use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabexecError {
    // Execution errors
    #[error("Failed to create session directory {path}: {message}")]
    DirectoryCreation { path: String, message: String },

    #[error("Failed to write file '{name}': {message}")]
    FileWrite { name: String, message: String },

    #[error("File path escapes the session directory: {name}")]
    PathEscape { name: String },

    #[error("Failed to start command: {0}")]
    Spawn(String),

    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    // Request errors
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Invalid session id: {id:?}")]
    InvalidSessionId { id: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LabexecError {
    /// True for failures of the sandbox machinery itself, as opposed to a
    /// malformed request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::DirectoryCreation { .. }
                | Self::FileWrite { .. }
                | Self::PathEscape { .. }
                | Self::Spawn(_)
                | Self::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LabexecError>;
