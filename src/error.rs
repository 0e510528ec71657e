use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid timeout config: {0}")]
    InvalidConfig(String),
    #[error("Response already finalized")]
    Finalized,
    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GuardError {
    /// Returns `true` if a write hit a capture that was already committed.
    pub fn is_finalized(&self) -> bool {
        matches!(self, GuardError::Finalized)
    }
}
