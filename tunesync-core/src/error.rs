use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Playback driver error: {0}")]
    Driver(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Transient failures are expected to clear on a later tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Timeout(_) | Self::Driver(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Timeout("store get".to_string()).is_transient());
        assert!(Error::Driver("seek rejected".to_string()).is_transient());
        assert!(!Error::InvalidInput("bad room".to_string()).is_transient());

        let decode = serde_json::from_str::<u64>("nope").unwrap_err();
        assert!(!Error::from(decode).is_transient());
    }
}
