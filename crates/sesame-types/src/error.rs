//! Error types for value parsing in sesame-types.

use thiserror::Error;

/// Errors that can occur when parsing lock accessory values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Unrecognized characteristic name.
    #[error("Unknown characteristic: {0}")]
    UnknownCharacteristic(String),

    /// Unrecognized history kind.
    #[error("Unknown history kind '{0}' (expected 'door' or 'motion')")]
    UnknownHistoryKind(String),
}

/// Result type alias using sesame-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
