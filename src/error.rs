use thiserror::Error;

/// Failure talking to the medication store through the query port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// Read or marker write failed; the next tick retries from scratch.
    #[error("transient storage error: {0}")]
    Transient(String),
}

/// The clock could not produce a usable time. Fatal to the polling loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("clock fault: {reason}")]
pub struct ClockFault {
    pub reason: String,
}

impl ClockFault {
    pub fn new(reason: impl Into<String>) -> Self {
        ClockFault { reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("medication {0} not found")]
    NotFound(u64),

    #[error("invalid medication: {0}")]
    Invalid(String),

    #[error("store file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for PortError {
    fn from(e: StoreError) -> Self {
        PortError::Transient(e.to_string())
    }
}

#[derive(Debug, Error)]
#[error("invalid value {value:?} for environment variable {var}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}
