//! Error types for the butterfly map-reading crates
//!
//! Binary map files are read defensively: structural damage surfaces as an
//! error and marks the file unusable, while dangling attribute references
//! are logged by the caller and the attribute is dropped.

use std::fmt;

/// Errors produced while opening or reading a binary map file.
#[derive(Debug)]
pub enum Error {
    /// Truncated varint, read past a message boundary, or damaged framing.
    /// The file cannot be trusted past this point.
    CorruptStream(String),

    /// The file (or cache manifest) declares a format version this build
    /// does not understand.
    UnsupportedVersion(u32),

    /// An encoding-rule id or string-table id points outside its table.
    /// Recoverable: the referencing attribute is treated as absent.
    MissingReference(String),

    /// A stored adjacency array is shorter than the neighbor list it must
    /// cover. Recoverable: the affected connection set stays empty.
    SizeMismatch { expected: usize, actual: usize },

    /// A cache manifest entry no longer matches the file on disk.
    /// Recoverable: fall back to a full header scan.
    CacheStale(String),

    /// File I/O error.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CorruptStream(msg) => {
                write!(f, "Corrupt stream: {msg}")
            }
            Error::UnsupportedVersion(version) => {
                write!(f, "Unsupported format version {version}")
            }
            Error::MissingReference(msg) => {
                write!(f, "Missing reference: {msg}")
            }
            Error::SizeMismatch { expected, actual } => {
                write!(f, "Size mismatch: expected {expected} entries, got {actual}")
            }
            Error::CacheStale(msg) => {
                write!(f, "Stale cache entry: {msg}")
            }
            Error::Io(err) => {
                write!(f, "I/O error: {err}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Convenience result type for map-reading operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for the most common structural failure.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptStream(msg.into())
    }

    /// True when the error leaves the file usable (attribute-level damage).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MissingReference(_) | Error::SizeMismatch { .. } | Error::CacheStale(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_are_stable() {
        let e = Error::corrupt("varint past limit");
        assert_eq!(e.to_string(), "Corrupt stream: varint past limit");

        let e = Error::UnsupportedVersion(99);
        assert_eq!(e.to_string(), "Unsupported format version 99");

        let e = Error::SizeMismatch { expected: 4, actual: 2 };
        assert_eq!(e.to_string(), "Size mismatch: expected 4 entries, got 2");
    }

    #[test]
    fn recoverable_classification() {
        assert!(Error::MissingReference("rule 7".into()).is_recoverable());
        assert!(Error::CacheStale("size".into()).is_recoverable());
        assert!(!Error::corrupt("eof").is_recoverable());
        assert!(!Error::UnsupportedVersion(1).is_recoverable());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(!e.is_recoverable());
    }
}
