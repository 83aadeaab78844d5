use thiserror::Error;

/// Infrastructure and configuration faults.
///
/// Expected business outcomes (a metered feature hitting its quota, a store
/// declining a purchase) are not errors; see `engine::TrackOutcome` and the
/// boolean results of the purchase operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Purchase failed: {0}")]
    Purchase(String),

    #[error("Invalid feature policy: {0}")]
    InvalidPolicy(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
