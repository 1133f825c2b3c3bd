//! Contains result and error type for FBX reading, patching and writing.

use std::error;
use std::fmt;
use std::io;


pub type Result<T> = ::std::result::Result<T, Error>;

/// Critical error.
///
/// This error will be emitted when an operation cannot be continued.
#[derive(Debug)]
pub enum Error {
    /// I/O operation error.
    Io(io::Error),
    /// Corrupted or inconsistent FBX data detected.
    Corrupt {
        /// Absolute byte offset in the source stream at which the corruption
        /// was detected.
        offset: u64,
        /// What was wrong with the data.
        reason: String,
    },
    /// An accessor was called on a property of a different type.
    TypeMismatch {
        /// The type the caller asked for.
        expected: &'static str,
        /// The type code actually stored.
        actual: u8,
    },
    /// Size recomputation produced an inconsistent result.
    ///
    /// This indicates a bug in the caller or in this crate, not in the input
    /// data.
    Invariant(String),
}

impl Error {
    /// Creates a `Corrupt` error at the given stream offset.
    pub(crate) fn corrupt<S: Into<String>>(offset: u64, reason: S) -> Self {
        let reason = reason.into();
        error!("Corrupt FBX data at offset {}: {}", offset, reason);
        Error::Corrupt {
            offset: offset,
            reason: reason,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref err) => write!(f, "I/O error: {}", err),
            Error::Corrupt { offset, ref reason } => {
                write!(f, "Corrupt FBX data at offset {}: {}", offset, reason)
            },
            Error::TypeMismatch { expected, actual } => {
                write!(f,
                       "Property type mismatch: expected {}, but type code is {:#x}",
                       expected,
                       actual)
            },
            Error::Invariant(ref msg) => write!(f, "Size invariant violated: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match *self {
            // `io::Error` (and an error wrapped by `io::Error`) cannot be cloned.
            Error::Io(ref e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Corrupt { offset, ref reason } => Error::Corrupt {
                offset: offset,
                reason: reason.clone(),
            },
            Error::TypeMismatch { expected, actual } => Error::TypeMismatch {
                expected: expected,
                actual: actual,
            },
            Error::Invariant(ref msg) => Error::Invariant(msg.clone()),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
