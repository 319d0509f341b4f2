//! Generic parsing of key/value formatted counter files.
//!
//! [`KeyValueStat`] covers `cpu.stat`, `memory.stat`, `io.stat` and
//! `/proc/meminfo`. The implementor declares which keys it cares about, how
//! keys and values are separated, and which keys must be present. Unknown
//! keys are ignored so newer kernels adding fields do not break decoding.
//! [`SingleLineStat`] covers files holding a single number.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use metering_probes::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct Pressure {
//!     some: u64,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut Pressure, u64)>> =
//!     LazyLock::new(|| {
//!         let mut m: HashMap<&'static str, fn(&mut Pressure, u64)> = HashMap::new();
//!         m.insert("some", |p, v| p.some = v);
//!         m
//!     });
//!
//! impl KeyValueStat for Pressure {
//!     const SPLIT_CHAR: Option<char> = Some('=');
//!     const SKIP_LINES: usize = 0;
//!     const SKIP_VALUES: usize = 0;
//!     const ALLOW_DUPLICATE_KEYS: bool = false;
//!     const ALLOW_MULTIPLE_KV_PER_LINE: bool = true;
//!     const REQUIRED_KEYS: &'static [&'static str] = &["some"];
//!
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let stat = Pressure::from_reader(&mut "some=42\n".as_bytes()).unwrap();
//! assert_eq!(stat.some, 42);
//! ```

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use super::StatParseError;

/// A counter file made of whitespace separated key/value pairs.
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// Character joining a key to its value (`rbytes=12`), or `None` when
    /// keys and values are separate whitespace tokens (`usage_usec 12`).
    const SPLIT_CHAR: Option<char>;

    /// Lines at the start of the file skipped before parsing.
    const SKIP_LINES: usize;

    /// Whitespace separated tokens skipped at the start of each line.
    const SKIP_VALUES: usize;

    /// If `false`, a key seen twice is a [`StatParseError::DuplicateField`].
    const ALLOW_DUPLICATE_KEYS: bool;

    /// If `false`, only the first pair of each line is consumed.
    const ALLOW_MULTIPLE_KV_PER_LINE: bool;

    /// Keys that must be observed at least once. A missing key means the
    /// kernel exposes a different schema and decoding fails.
    const REQUIRED_KEYS: &'static [&'static str] = &[];

    /// Known keys and the handler applying a parsed value to `Self`.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses a key/value formatted buffer.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::Io`] if reading fails, and a content error if
    /// a value does not parse, a key repeats where not allowed, a line is
    /// rejected by [`KeyValueStat::accept_line`], or a required key is absent.
    fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut stat = Self::default();
        let handlers = Self::field_handlers();
        let field_count = handlers.len();
        let mut seen_keys = HashSet::with_capacity(field_count);

        let mut line = String::new();
        let mut lineno = 0;
        for _ in 0..Self::SKIP_LINES {
            buf.read_line(&mut line)?;
            line.clear();
        }

        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            if Self::accept_line(&line, lineno)? {
                Self::parse_line(&mut stat, &line, lineno, handlers, &mut seen_keys)?;
            }
            if !Self::ALLOW_DUPLICATE_KEYS && seen_keys.len() == field_count {
                break;
            }

            line.clear();
        }

        if let Some(missing) = Self::REQUIRED_KEYS
            .iter()
            .find(|key| !seen_keys.contains(**key))
        {
            return Err(StatParseError::MissingField { field: *missing });
        }

        Ok(stat)
    }

    /// Splits one line into pairs according to the configured format.
    fn parse_line(
        stat: &mut Self,
        line: &str,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
        seen_keys: &mut HashSet<&'static str>,
    ) -> Result<(), StatParseError> {
        let mut parts = line.split_whitespace().skip(Self::SKIP_VALUES);

        match Self::SPLIT_CHAR {
            Some(split_char) => {
                for part in parts {
                    if let Some((key, val)) = part.split_once(split_char) {
                        Self::parse_and_set(key, val, stat, lineno, handlers, seen_keys)?;
                    }
                    if !Self::ALLOW_MULTIPLE_KV_PER_LINE {
                        break;
                    }
                }
            }
            None => {
                while let (Some(key), Some(val)) = (parts.next(), parts.next()) {
                    Self::parse_and_set(key, val, stat, lineno, handlers, seen_keys)?;
                    if !Self::ALLOW_MULTIPLE_KV_PER_LINE {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Parses one value and hands it to the registered handler.
    fn parse_and_set(
        key: &str,
        val: &str,
        stat: &mut Self,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
        seen_keys: &mut HashSet<&'static str>,
    ) -> Result<(), StatParseError> {
        let Some((k, handler)) = handlers.get_key_value(key) else {
            return Ok(());
        };

        let parsed = val
            .parse::<u64>()
            .map_err(|source| StatParseError::InvalidKeyValue {
                key: key.to_string(),
                value: val.to_string(),
                line: lineno,
                source,
            })?;
        if !seen_keys.insert(*k) && !Self::ALLOW_DUPLICATE_KEYS {
            return Err(StatParseError::DuplicateField {
                field: key.to_string(),
                line: lineno,
            });
        }
        handler(stat, parsed);
        Ok(())
    }

    /// Decides whether a line contributes to the result.
    ///
    /// Called before any pair on the line is parsed. The default accepts
    /// every line; `io.stat` uses it to drop excluded devices.
    #[inline]
    fn accept_line(_line: &str, _lineno: usize) -> Result<bool, StatParseError> {
        Ok(true)
    }
}

/// A counter file holding one number on its first line, such as
/// `memory.current`.
pub trait SingleLineStat: Sized {
    fn from_value(value: u64) -> Self;

    /// Parses the first line of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::Malformed`] for an empty file and
    /// [`StatParseError::InvalidValue`] if the line is not a number.
    fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut line = String::new();
        buf.read_line(&mut line)?;
        let value = line.trim();
        if value.is_empty() {
            return Err(StatParseError::Malformed {
                line: 1,
                reason: "empty file",
            });
        }
        value
            .parse::<u64>()
            .map(Self::from_value)
            .map_err(|source| StatParseError::InvalidValue {
                value: value.to_string(),
                line: 1,
                source,
            })
    }
}
