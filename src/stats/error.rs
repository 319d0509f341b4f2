//! Structured errors for decoding kernel counter files.
//!
//! Every variant except [`StatParseError::Io`] means the file content did not
//! match the schema this crate expects, which points at an incompatible kernel
//! or cgroup version rather than a transient condition.
//!
//! # Example
//!
//! ```rust
//! use metering_probes::stats::StatParseError;
//!
//! fn parse_value(val: &str) -> Result<u64, StatParseError> {
//!     val.parse::<u64>().map_err(|source| StatParseError::InvalidValue {
//!         value: val.to_string(),
//!         line: 1,
//!         source,
//!     })
//! }
//!
//! assert!(parse_value("not-a-number").is_err());
//! ```

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatParseError {
    #[error("duplicate field '{field}' at line {line}")]
    DuplicateField { field: String, line: usize },

    #[error("invalid value for '{key}' at line {line}: '{value}': {source}")]
    InvalidKeyValue {
        key: String,
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid value at line {line}: '{value}': {source}")]
    InvalidValue {
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("required field '{field}' is missing")]
    MissingField { field: &'static str },

    #[error("malformed line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },

    #[error("error during I/O: {0}")]
    Io(#[from] std::io::Error),
}
