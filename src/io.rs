//! Callback bridge between libarchive and Rust streams
//!
//! libarchive pulls input through `archive_read_callback` and pushes output
//! through `archive_write_callback`, each time passing back the client data
//! pointer registered at open. The adapters here are that client data: a
//! boxed struct owning the caller's source or sink plus, for reads, the one
//! buffer the engine reads from between pulls.
//!
//! Errors from the caller's stream are reported to the engine with
//! `archive_set_error`, so they come back out of the session call as a normal
//! [`ArchiveError`](crate::ArchiveError) carrying the OS errno. Panics are
//! caught here; unwinding through the engine's C frames is not allowed.

use crate::ffi::{self, archive, la_int64_t, la_ssize_t, ARCHIVE_FATAL, ARCHIVE_OK};
use std::ffi::CString;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::raw::{c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Byte source for a read session
///
/// Only [`read`](ArchiveSource::read) is required; the other hooks default
/// to no-ops and a source that cannot seek.
pub trait ArchiveSource {
    /// Called once when the engine opens the stream
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Fill `buf`, returning the byte count; `0` ends the stream
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether a seek callback should be registered
    fn is_seekable(&self) -> bool {
        false
    }

    /// Reposition and return the new absolute offset
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source is not seekable",
        ))
    }

    /// Called once when the engine closes the stream
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Byte sink for a write session
pub trait ArchiveSink {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Accept a prefix of `data`, returning how much was taken
    ///
    /// Taking nothing from a non-empty chunk is reported as a `WriteZero`
    /// failure.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Any `Read`, as a non-seekable source
pub struct StreamSource<R>(pub R);

impl<R: Read> ArchiveSource for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Any `Read + Seek`, as a seekable source
pub struct SeekableSource<R>(pub R);

impl<R: Read + Seek> ArchiveSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// Any `Write`, flushed on close
pub struct StreamSink<W>(pub W);

impl<W: Write> ArchiveSink for StreamSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.write(data)
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Client data for a callback read
pub(crate) struct ReadAdapter<'a> {
    source: Box<dyn ArchiveSource + 'a>,
    buffer: Box<[u8]>,
}

impl<'a> ReadAdapter<'a> {
    pub(crate) fn new(source: Box<dyn ArchiveSource + 'a>, block_size: usize) -> Self {
        ReadAdapter {
            source,
            buffer: vec![0; block_size.max(1)].into_boxed_slice(),
        }
    }

    pub(crate) fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }
}

/// Client data for a callback write
pub(crate) struct WriteAdapter<'a> {
    sink: Box<dyn ArchiveSink + 'a>,
}

impl<'a> WriteAdapter<'a> {
    pub(crate) fn new(sink: Box<dyn ArchiveSink + 'a>) -> Self {
        WriteAdapter { sink }
    }
}

/// Run `f`, reporting errors and panics to the engine
///
/// Returns `None` when the callback must signal failure.
unsafe fn guarded<T>(a: *mut archive, what: &str, f: impl FnOnce() -> io::Result<T>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            debug!("{} callback failed: {}", what, e);
            report(a, e.raw_os_error().unwrap_or(libc::EIO), &format!("{}: {}", what, e));
            None
        }
        Err(_) => {
            report(a, libc::EIO, &format!("{} callback panicked", what));
            None
        }
    }
}

unsafe fn report(a: *mut archive, errno: c_int, message: &str) {
    let Ok(api) = ffi::engine() else { return };
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    (api.set_error)(a, errno, b"%s\0".as_ptr().cast(), message.as_ptr());
}

fn retry_interrupted<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

pub(crate) unsafe extern "C" fn read_open(a: *mut archive, data: *mut c_void) -> c_int {
    let adapter = &mut *(data as *mut ReadAdapter);
    match guarded(a, "open", || adapter.source.open()) {
        Some(()) => ARCHIVE_OK,
        None => ARCHIVE_FATAL,
    }
}

pub(crate) unsafe extern "C" fn read_callback(
    a: *mut archive,
    data: *mut c_void,
    out: *mut *const c_void,
) -> la_ssize_t {
    let adapter = &mut *(data as *mut ReadAdapter);
    let ReadAdapter { source, buffer } = adapter;
    match guarded(a, "read", || retry_interrupted(|| source.read(buffer))) {
        Some(n) => {
            *out = buffer.as_ptr() as *const c_void;
            n.min(buffer.len()) as la_ssize_t
        }
        None => ARCHIVE_FATAL as la_ssize_t,
    }
}

pub(crate) unsafe extern "C" fn read_seek(
    a: *mut archive,
    data: *mut c_void,
    offset: la_int64_t,
    whence: c_int,
) -> la_int64_t {
    let adapter = &mut *(data as *mut ReadAdapter);
    let pos = match whence {
        libc::SEEK_SET => match u64::try_from(offset) {
            Ok(offset) => SeekFrom::Start(offset),
            Err(_) => {
                report(a, libc::EINVAL, "seek to a negative offset");
                return ARCHIVE_FATAL as la_int64_t;
            }
        },
        libc::SEEK_CUR => SeekFrom::Current(offset),
        libc::SEEK_END => SeekFrom::End(offset),
        _ => {
            report(a, libc::EINVAL, &format!("unknown seek whence {}", whence));
            return ARCHIVE_FATAL as la_int64_t;
        }
    };
    match guarded(a, "seek", || adapter.source.seek(pos)) {
        Some(position) => la_int64_t::try_from(position).unwrap_or(la_int64_t::MAX),
        None => ARCHIVE_FATAL as la_int64_t,
    }
}

pub(crate) unsafe extern "C" fn read_close(a: *mut archive, data: *mut c_void) -> c_int {
    let adapter = &mut *(data as *mut ReadAdapter);
    match guarded(a, "close", || adapter.source.close()) {
        Some(()) => ARCHIVE_OK,
        None => ARCHIVE_FATAL,
    }
}

pub(crate) unsafe extern "C" fn write_open(a: *mut archive, data: *mut c_void) -> c_int {
    let adapter = &mut *(data as *mut WriteAdapter);
    match guarded(a, "open", || adapter.sink.open()) {
        Some(()) => ARCHIVE_OK,
        None => ARCHIVE_FATAL,
    }
}

pub(crate) unsafe extern "C" fn write_callback(
    a: *mut archive,
    data: *mut c_void,
    buf: *const c_void,
    len: usize,
) -> la_ssize_t {
    let adapter = &mut *(data as *mut WriteAdapter);
    let chunk: &[u8] = if buf.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(buf as *const u8, len)
    };
    let wrote = guarded(a, "write", || {
        let n = retry_interrupted(|| adapter.sink.write(chunk))?;
        if n == 0 && !chunk.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink accepted no bytes"));
        }
        Ok(n)
    });
    match wrote {
        Some(n) => n.min(len) as la_ssize_t,
        None => ARCHIVE_FATAL as la_ssize_t,
    }
}

pub(crate) unsafe extern "C" fn write_close(a: *mut archive, data: *mut c_void) -> c_int {
    let adapter = &mut *(data as *mut WriteAdapter);
    match guarded(a, "close", || adapter.sink.close()) {
        Some(()) => ARCHIVE_OK,
        None => ARCHIVE_FATAL,
    }
}
