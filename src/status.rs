//! Status code translation
//!
//! libarchive reports through an integer return code plus per-handle
//! `archive_errno` / `archive_error_string`. [`check`] is the single place
//! where those become either a value, a logged warning or an
//! [`ArchiveError`].

use crate::error::{ArchiveError, EngineError, ErrorMessage, Result, SessionRef};
use crate::ffi::{
    self, archive, Engine, ARCHIVE_EOF, ARCHIVE_FATAL, ARCHIVE_OK, ARCHIVE_WARN,
};
use std::os::raw::c_int;
use std::ptr::NonNull;
use tracing::warn;

/// Classified engine return code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Partial success; logged, never raised
    Warning,
    /// The operation was aborted, the handle is still usable
    Failure,
    /// Only release is permitted on the handle
    Fatal,
    /// Header iteration reached the end of the archive
    EndOfEntries,
}

impl Status {
    pub fn classify(code: c_int) -> Status {
        match code {
            ARCHIVE_EOF => Status::EndOfEntries,
            c if c >= ARCHIVE_OK => Status::Ok,
            ARCHIVE_WARN => Status::Warning,
            c if c <= ARCHIVE_FATAL => Status::Fatal,
            // ARCHIVE_RETRY, ARCHIVE_FAILED and codes outside the documented set
            _ => Status::Failure,
        }
    }
}

/// Turn a return code into a value or an error
///
/// Non-negative codes (including `ARCHIVE_EOF`, which only header iteration
/// treats specially) pass through. Warnings are logged with the handle's
/// diagnostic and pass through as well.
pub(crate) fn check(api: &Engine, a: *mut archive, code: c_int) -> Result<c_int> {
    match Status::classify(code) {
        Status::Ok | Status::EndOfEntries => Ok(code),
        Status::Warning => {
            let (message, errno) = diagnostic(api, a);
            warn!(target: "libarchive", errno, "{}", message);
            Ok(code)
        }
        Status::Failure | Status::Fatal => Err(error_from(api, a, code)),
    }
}

/// Variant of [`check`] for `la_ssize_t` returns (`archive_read_data`,
/// `archive_write_data`)
pub(crate) fn check_len(api: &Engine, a: *mut archive, len: ffi::la_ssize_t) -> Result<usize> {
    if len >= 0 {
        return Ok(len as usize);
    }
    let code = c_int::try_from(len).unwrap_or(ARCHIVE_FATAL);
    check(api, a, code).map(|_| 0)
}

/// Build the structured error for a failed call on `a`
pub(crate) fn error_from(api: &Engine, a: *mut archive, code: c_int) -> ArchiveError {
    let (message, errno) = diagnostic(api, a);
    let err = EngineError {
        message,
        errno,
        retcode: code,
        session: SessionRef::of(a),
    };
    if Status::classify(code) == Status::Fatal {
        ArchiveError::Fatal(err)
    } else {
        ArchiveError::Failure(err)
    }
}

/// Fail if an engine constructor returned NULL
pub(crate) fn check_null<T>(ptr: *mut T, what: &'static str) -> Result<NonNull<T>> {
    NonNull::new(ptr).ok_or(ArchiveError::NullHandle(what))
}

fn diagnostic(api: &Engine, a: *mut archive) -> (ErrorMessage, i32) {
    if a.is_null() {
        return (ErrorMessage::Missing, 0);
    }
    // SAFETY: `a` is a live handle owned by the caller; the returned string
    // is copied before any further engine call.
    unsafe {
        let message = ffi::cstr_bytes((api.error_string)(a))
            .map(ErrorMessage::from_bytes)
            .unwrap_or(ErrorMessage::Missing);
        (message, (api.errno)(a))
    }
}
