//! Error types for the vmf crate

use thiserror::Error;

/// Result type alias for map parsing and editing
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading or interpreting map text
#[derive(Debug, Error)]
pub enum Error {
    /// Syntax error in the key-value text
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A block was expected but a plain value was found (or vice versa)
    #[error("Expected {expected} for \"{name}\"")]
    UnexpectedKind { name: String, expected: &'static str },

    /// A numeric or vector value could not be read
    #[error("Invalid {kind} value: \"{value}\"")]
    InvalidValue { kind: &'static str, value: String },

    /// The map has no `world` block
    #[error("Map has no world block")]
    MissingWorld,
}
