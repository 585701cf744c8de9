use thiserror::Error;

/// Canonical result for core and the planner.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A dataset was neither registered nor observed by the statistics provider.
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    /// The logical tree violates a structural invariant; nothing was costed.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
