//! Error type shared by the resolver, the store and the downsampler.
//!
//! Every public operation returns [`Result`]. The [`ErrorKind`] taxonomy is the
//! same one the C ABI exposes, so converting at the boundary is a lookup of
//! [`ErrorKind::code`] plus the message.

use std::fmt;
use std::io;
use std::path::Path;

/// Failure category. Numeric codes are part of the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input: non-finite values, out-of-range limits, `target < 2`.
    InvalidArgument,
    /// Internal failure, including malformed environment/config-file values.
    Runtime,
    /// Filesystem failure.
    Io,
    /// Store-specific failure (e.g. a poisoned lock).
    Store,
    /// Output buffer too small.
    Capacity,
}

impl ErrorKind {
    /// Stable numeric code (`OK` is 0 and has no kind).
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 1,
            ErrorKind::Runtime => 2,
            ErrorKind::Io => 3,
            ErrorKind::Store => 4,
            ErrorKind::Capacity => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Runtime => "runtime error",
            ErrorKind::Io => "I/O error",
            ErrorKind::Store => "store error",
            ErrorKind::Capacity => "capacity error",
        }
    }
}

/// An error with its kind and a human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, message)
    }

    /// Wraps an I/O error with the operation and path that produced it.
    pub fn io(action: &str, path: &Path, err: io::Error) -> Self {
        Self::new(
            ErrorKind::Io,
            format!("{} {}: {}", action, path.display(), err),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejects NaN and infinities, naming the offending field.
pub fn require_finite(value: f64, field: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::invalid_argument(format!(
            "{} must be a finite number.",
            field
        )))
    }
}

/// Rejects non-finite and non-positive values, naming the offending field.
pub fn require_positive_finite(value: f64, field: &str) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::invalid_argument(format!(
            "{} must be a finite number greater than 0.",
            field
        )))
    }
}
