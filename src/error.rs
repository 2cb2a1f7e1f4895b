use thiserror::Error;

/// Errors surfaced by counter store backends.
///
/// A store error is never an admission decision: the facade catches it and
/// falls back to the local store, so callers of `check_limit` never see it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The shared store could not be reached or answered with a protocol
    /// error (connect refused, timeout, auth failure).
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Build an `Unavailable` error with the message truncated for logging.
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable(truncate(&message.into(), 200))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::unavailable(err.to_string())
    }
}

/// Errors raised outside the admission path (configuration, startup).
#[derive(Debug, Error)]
pub enum GatekeeperError {
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GatekeeperError>;

fn truncate(message: &str, max: usize) -> String {
    if message.len() <= max {
        return message.to_string();
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}
