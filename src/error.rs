//! Error types for sayboard

use thiserror::Error;

/// Result type alias for sayboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sayboard
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Persistent cache could not be opened or reached
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Persistent cache ran out of space
    #[error("storage quota exceeded: {0}")]
    StorageQuotaExceeded(String),

    /// No network connectivity, detected before any remote call
    #[error("network unavailable")]
    NetworkUnavailable,

    /// Remote provider failed (transport, timeout, non-2xx, bad body)
    #[error("remote synthesis failed: {0}")]
    RemoteSynthesis(String),

    /// No on-device speech engine exists in this environment
    #[error("local synthesis unsupported: {0}")]
    LocalSynthesisUnsupported(String),

    /// On-device speech engine failed
    #[error("local synthesis failed: {0}")]
    LocalSynthesis(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl Error {
    /// Whether this is a terminal speech failure (every synthesis tier exhausted)
    #[must_use]
    pub const fn is_speech_failure(&self) -> bool {
        matches!(
            self,
            Self::LocalSynthesisUnsupported(_) | Self::LocalSynthesis(_)
        )
    }

    /// Whether this error came from the cache layer
    ///
    /// Cache errors never fail a speech request; callers skip caching and continue.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::StorageQuotaExceeded(_) | Self::Sqlite(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => Self::StorageQuotaExceeded(e.to_string()),
            Some(
                rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::NotADatabase
                | rusqlite::ErrorCode::ReadOnly
                | rusqlite::ErrorCode::DatabaseBusy
                | rusqlite::ErrorCode::DatabaseLocked,
            ) => Self::StorageUnavailable(e.to_string()),
            _ => Self::Sqlite(e),
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_failure_classification() {
        assert!(Error::LocalSynthesis("boom".into()).is_speech_failure());
        assert!(Error::LocalSynthesisUnsupported("none".into()).is_speech_failure());
        assert!(!Error::RemoteSynthesis("503".into()).is_speech_failure());
        assert!(!Error::NetworkUnavailable.is_speech_failure());
    }

    #[test]
    fn test_disk_full_maps_to_quota() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        );
        let err: Error = err.into();
        assert!(matches!(err, Error::StorageQuotaExceeded(_)));
        assert!(err.is_storage());
    }

    #[test]
    fn test_cannot_open_maps_to_unavailable() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        let err: Error = err.into();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }
}
