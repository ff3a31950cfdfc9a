
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Script execution error: {0}")]
    Execution(String),
    #[error("Listener notification failed: {0}")]
    Notification(String),
    #[error("Malformed rename rule: {0}")]
    Rename(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

// Helper conversions
impl From<config::ConfigError> for RepositoryError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
