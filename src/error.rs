//! Custom error types for the application.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes of a scan session.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Semantic errors in a scan request or the settings
//!   file, such as a zero pixel count or a settling time that consumes the
//!   whole line period. These are rejected before any hardware action.
//! - **`Decode`**: Malformed or inconsistent result data, either from the
//!   external scanner's text stream or from a hardware read of unexpected
//!   length. A decode failure marks the scan failed; no partial frame is
//!   produced.
//! - **`Timeout`**: The hardware read or the external process exceeded its
//!   deadline. Fatal to the session; channels are torn down.
//! - **`Device`**: The device collaborator reported a hardware or channel
//!   fault. Device traits return `anyhow::Result`, which converts into this
//!   variant via `#[from]`.
//! - **`Io`**: Wraps `std::io::Error` for stream-file and scan-file access.
//! - **`SessionBusy`**: A scan was requested while another session was
//!   running or draining. Sessions are single-shot and never overlap.
//! - **`Stage`**: The translation stage rejected or failed a move during a
//!   volumetric scan.
//!
//! None of these are retried automatically; the caller re-invokes the whole
//! pipeline if it wants another attempt.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Acquisition timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("Device error: {0}")]
    Device(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A scan session is already running")]
    SessionBusy,

    #[error("Stage error: {0}")]
    Stage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Configuration("pixel count must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: pixel count must be positive"
        );
    }

    #[test]
    fn test_device_error_from_anyhow() {
        let err: ScanError = anyhow::anyhow!("counter channel unavailable").into();
        assert!(err.to_string().contains("counter channel unavailable"));
    }

    #[test]
    fn test_timeout_mentions_duration() {
        let err = ScanError::Timeout {
            waited: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("3s"));
    }
}
