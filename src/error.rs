//! Error types for archive sessions
//!
//! Every engine call that returns a status code goes through
//! [`crate::status`], which turns `ARCHIVE_FAILED` / `ARCHIVE_FATAL` into one
//! of the structured variants below. Warnings never become errors; they are
//! logged instead.

use std::fmt;
use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Archive operation errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The operation was aborted; the handle can still be used or released
    #[error("{0}")]
    Failure(EngineError),

    /// The handle is no longer usable beyond release
    #[error("fatal: {0}")]
    Fatal(EngineError),

    /// Entry content was requested outside of its readable window
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Format, filter or encryption missing from the loaded engine
    #[error(transparent)]
    Unsupported(#[from] Unsupported),

    /// An engine constructor returned NULL
    #[error("{0} returned NULL")]
    NullHandle(&'static str),

    /// Caller supplied a value the engine cannot accept (interior NUL, unknown codec)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Extraction with default flags was requested while the working directory is `/`
    #[error("refusing to extract into `/` with default flags, set the flags explicitly")]
    UnsafeDestination,

    /// libarchive could not be loaded
    #[error("libarchive is not available: {0}")]
    EngineUnavailable(String),

    /// Host I/O error outside of an engine call
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Engine details, for errors raised from a status code
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            ArchiveError::Failure(e) | ArchiveError::Fatal(e) => Some(e),
            _ => None,
        }
    }

    /// OS error number reported alongside the failure
    pub fn errno(&self) -> Option<i32> {
        match self {
            ArchiveError::Io(e) => e.raw_os_error(),
            _ => self.engine().map(|e| e.errno),
        }
    }

    /// Raw engine return code
    pub fn retcode(&self) -> Option<i32> {
        self.engine().map(|e| e.retcode)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiveError::Fatal(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, ArchiveError::Lifecycle(_))
    }
}

/// Diagnostic captured from an engine handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// `archive_error_string`, decoded leniently
    pub message: ErrorMessage,
    /// `archive_errno`
    pub errno: i32,
    /// The status code that triggered the error
    pub retcode: i32,
    /// Handle the error came from
    pub session: SessionRef,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (errno {}, retcode {})",
            self.message, self.errno, self.retcode
        )
    }
}

/// Engine message text
///
/// The engine hands back bytes in whatever charset the failing component
/// produced. Valid UTF-8 is kept as text, anything else as the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorMessage {
    Text(String),
    Bytes(Vec<u8>),
    /// The handle carried no message
    Missing,
}

impl ErrorMessage {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => ErrorMessage::Text(text.to_owned()),
            Err(_) => ErrorMessage::Bytes(bytes.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ErrorMessage::Text(text) => text.as_bytes(),
            ErrorMessage::Bytes(bytes) => bytes,
            ErrorMessage::Missing => &[],
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorMessage::Text(text) => f.write_str(text),
            ErrorMessage::Bytes(bytes) => write!(f, "{}", bytes.escape_ascii()),
            ErrorMessage::Missing => f.write_str("unknown error"),
        }
    }
}

/// Opaque reference to the handle an error originated from
///
/// Only meant for correlating log lines and errors; it cannot be turned back
/// into a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionRef(pub(crate) usize);

impl SessionRef {
    pub(crate) fn of<T>(handle: *const T) -> Self {
        SessionRef(handle as usize)
    }

    /// Reference used for errors raised by the crate itself (host I/O)
    pub(crate) fn none() -> Self {
        SessionRef(0)
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Entry content accessed outside of its readable window
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// The body was already drained
    #[error("entry content was already consumed")]
    Consumed,

    /// The session advanced past the entry, or was closed
    #[error("entry is no longer the current entry of its read session")]
    NotCurrent,

    /// The entry was never produced by a read session
    #[error("entry is not bound to a read session and has no content")]
    Unbound,
}

/// Capability absent from the loaded engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unsupported {
    #[error("unsupported read format: {0}")]
    ReadFormat(String),

    #[error("unsupported read filter: {0}")]
    ReadFilter(String),

    #[error("unsupported write format: {0}")]
    WriteFormat(String),

    #[error("unsupported write filter: {0}")]
    WriteFilter(String),

    /// The engine has no passphrase support (libarchive older than 3.3)
    #[error("the loaded libarchive ({version}) does not support encryption")]
    Encryption { version: String },
}
