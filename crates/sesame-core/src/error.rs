//! Error types for sesame-core.
//!
//! This module defines all error types that can occur while reconciling a
//! lock's accessory state with the remote cloud service.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::RemoteUnavailable`] | One forced sync, then give up for this read |
//! | [`Error::RemoteBusy`] | Sleep `retry_after` seconds once, then continue |
//! | [`Error::RemoteUnresponsive`] | One forced sync, then give up for this read |
//! | [`Error::InconsistentState`] | Log only, never fatal |
//! | [`Error::Persistence`] | Log only, the in-memory transition still applies |
//! | [`Error::InvalidValue`] | Rejected write, nothing is queued |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |
//!
//! Read failures reach the caller only when no cached value exists. Nothing in
//! this crate terminates the process.
//!
//! ## Shared errors
//!
//! Status fetches are coalesced (see [`crate::single_flight`]), so one failure
//! may be observed by many waiters. Those waiters receive [`Error::Shared`],
//! which displays as the original cause; use [`Error::root`] to inspect it.

use std::sync::Arc;

use thiserror::Error;

use sesame_types::Characteristic;

/// Marker the cloud puts in front of the retry delay of a busy device.
pub const BUSY_MARKER: &str = "DEVICE_IS_BUSY";

/// Errors that can occur while talking to the cloud or reconciling state.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The remote API could not be reached or gave no usable answer.
    #[error("Remote API unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote API rejected the request.
    #[error("Remote API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the `error` field of the response body.
        message: String,
    },

    /// The device is busy with another command.
    #[error("DEVICE_IS_BUSY {retry_after}")]
    RemoteBusy {
        /// Seconds to wait before the device accepts another command.
        retry_after: u64,
    },

    /// The cloud has no fresh state for the device.
    #[error("Lock {device_id} is unresponsive")]
    RemoteUnresponsive {
        /// The device that did not respond.
        device_id: String,
    },

    /// Cached and reported state contradict each other.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Persisting the state snapshot or a history entry failed.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// The accessory does not expose this characteristic.
    #[error("Characteristic {0} is not supported by this accessory")]
    UnsupportedCharacteristic(Characteristic),

    /// The characteristic cannot be written.
    #[error("Characteristic {0} is read-only")]
    ReadOnly(Characteristic),

    /// The value is outside the characteristic's valid values.
    #[error("Invalid value {value} for characteristic {characteristic}")]
    InvalidValue {
        /// The written characteristic.
        characteristic: Characteristic,
        /// The rejected value.
        value: u32,
    },

    /// A serialized task was dropped before it produced a result.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// HTTP transport error.
    #[cfg(feature = "http-client")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An error shared by every waiter of a coalesced request.
    #[error(transparent)]
    Shared(Arc<Error>),
}

impl Error {
    /// Create a persistence error from any displayable cause.
    pub fn persistence(cause: impl std::fmt::Display) -> Self {
        Self::Persistence(cause.to_string())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create an inconsistent-state error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentState(message.into())
    }

    /// Create an unresponsive-device error.
    pub fn unresponsive(device_id: impl Into<String>) -> Self {
        Self::RemoteUnresponsive {
            device_id: device_id.into(),
        }
    }

    /// The original error, with any [`Error::Shared`] wrappers removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Seconds the device asked us to wait, if this is a busy rejection.
    ///
    /// Recognizes [`Error::RemoteBusy`] as well as `DEVICE_IS_BUSY <n>` inside
    /// any other error message.
    pub fn retry_after(&self) -> Option<u64> {
        match self.root() {
            Error::RemoteBusy { retry_after } => Some(*retry_after),
            other => parse_busy_seconds(&other.to_string()),
        }
    }
}

/// Extract `<n>` from a `DEVICE_IS_BUSY <n>` message.
///
/// Returns `None` when the marker is missing or not followed by a number.
pub fn parse_busy_seconds(message: &str) -> Option<u64> {
    let start = message.find(BUSY_MARKER)? + BUSY_MARKER.len();
    let rest = message[start..].trim_start();
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Result type alias using sesame-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unresponsive("abc");
        assert_eq!(err.to_string(), "Lock abc is unresponsive");

        let err = Error::Api {
            status: 400,
            message: "BAD_PARAMS".to_string(),
        };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("BAD_PARAMS"));

        let err = Error::RemoteBusy { retry_after: 7 };
        assert_eq!(err.to_string(), "DEVICE_IS_BUSY 7");

        let err = Error::ReadOnly(Characteristic::BatteryLevel);
        assert!(err.to_string().contains("BatteryLevel"));

        let err = Error::InvalidValue {
            characteristic: Characteristic::LockTargetState,
            value: 7,
        };
        assert_eq!(
            err.to_string(),
            "Invalid value 7 for characteristic LockTargetState"
        );
    }

    #[test]
    fn test_inconsistent_state() {
        let err = Error::inconsistent("target Some(true), current Some(false)");
        assert!(matches!(err, Error::InconsistentState(_)));
        assert_eq!(
            err.to_string(),
            "Inconsistent state: target Some(true), current Some(false)"
        );
    }

    #[test]
    fn test_shared_error_is_transparent() {
        let inner = Arc::new(Error::RemoteUnavailable("timeout".to_string()));
        let err = Error::Shared(Arc::clone(&inner));
        assert_eq!(err.to_string(), inner.to_string());
        assert!(matches!(err.root(), Error::RemoteUnavailable(_)));

        let nested = Error::Shared(Arc::new(Error::Shared(inner)));
        assert!(matches!(nested.root(), Error::RemoteUnavailable(_)));
    }

    #[test]
    fn test_parse_busy_seconds() {
        assert_eq!(parse_busy_seconds("DEVICE_IS_BUSY 3"), Some(3));
        assert_eq!(parse_busy_seconds("error: DEVICE_IS_BUSY 12 (try later)"), Some(12));
        assert_eq!(parse_busy_seconds("DEVICE_IS_BUSY"), None);
        assert_eq!(parse_busy_seconds("DEVICE_IS_BUSY soon"), None);
        assert_eq!(parse_busy_seconds("DEVICE_OFFLINE"), None);
        assert_eq!(parse_busy_seconds(""), None);
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(Error::RemoteBusy { retry_after: 5 }.retry_after(), Some(5));

        let api = Error::Api {
            status: 400,
            message: "DEVICE_IS_BUSY 3".to_string(),
        };
        assert_eq!(api.retry_after(), Some(3));
        assert_eq!(Error::Shared(Arc::new(api)).retry_after(), Some(3));

        assert_eq!(Error::unresponsive("x").retry_after(), None);
    }
}
