//! Read sessions
//!
//! [`ReadOptions`] configures which formats and filters the engine should
//! try, then binds one of the supported sources. The resulting
//! [`ReadSession`] iterates headers and hands out bound [`Entry`] values.

use crate::codec::HeaderCodec;
use crate::entry::{Entry, EntryState};
use crate::error::{ArchiveError, Result, Unsupported};
use crate::ffi::{self, archive, Engine, SupportFn, ARCHIVE_EOF};
use crate::io::{self, ArchiveSource, ReadAdapter, SeekableSource, StreamSource};
use crate::status;
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::fmt;
use std::io::{Read, Seek};
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use tracing::debug;

/// Block size for path and descriptor reads when the filesystem reports none
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Which formats or filters to enable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Everything the engine supports (`*_all`)
    All,
    Named(String),
    /// Any of several names
    AnyOf(Vec<String>),
}

impl Selection {
    fn names(&self) -> Vec<&str> {
        match self {
            Selection::All => vec!["all"],
            Selection::Named(name) => vec![name.as_str()],
            Selection::AnyOf(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection::All
    }
}

impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        if name == "all" {
            Selection::All
        } else {
            Selection::Named(name.to_string())
        }
    }
}

impl From<String> for Selection {
    fn from(name: String) -> Self {
        Selection::from(name.as_str())
    }
}

impl From<&[&str]> for Selection {
    fn from(names: &[&str]) -> Self {
        Selection::AnyOf(names.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Selection {
    fn from(names: [&str; N]) -> Self {
        Selection::from(&names[..])
    }
}

/// Builder for read sessions
///
/// ```rust,no_run
/// use libarchive_bridge::{ReadOptions, Result};
///
/// # fn main() -> Result<()> {
/// let mut reader = ReadOptions::new()
///     .format(["tar", "zip"])
///     .filter("gzip")
///     .open_file("backup.tar.gz")?;
///
/// for entry in &mut reader {
///     let mut entry = entry?;
///     println!("{} ({:?} bytes)", entry, entry.size());
///     let body = entry.read_to_vec()?;
/// #   drop(body);
/// }
/// reader.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct ReadOptions {
    format: Selection,
    filter: Selection,
    passphrase: Option<Vec<u8>>,
    codec: HeaderCodec,
    block_size: Option<usize>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<Selection>) -> Self {
        self.format = format.into();
        self
    }

    pub fn filter(mut self, filter: impl Into<Selection>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Decryption passphrase (zip, 7zip, rar)
    pub fn passphrase(mut self, passphrase: impl AsRef<[u8]>) -> Self {
        self.passphrase = Some(passphrase.as_ref().to_vec());
        self
    }

    pub fn header_codec(mut self, codec: HeaderCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Read size for path, descriptor and stream sources
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size.max(1));
        self
    }

    fn prepare<'a>(&self) -> Result<ReadSession<'a>> {
        let api = ffi::engine()?;
        let caps = &api.capabilities;

        // Resolve everything before a handle exists
        let filters = self
            .filter
            .names()
            .into_iter()
            .map(|name| caps.read_filter(name))
            .collect::<Result<Vec<SupportFn>>>()?;
        let formats = self
            .format
            .names()
            .into_iter()
            .map(|name| caps.read_format(name))
            .collect::<Result<Vec<SupportFn>>>()?;
        let passphrase = match &self.passphrase {
            Some(secret) => {
                let add = api.optional.read_add_passphrase.ok_or_else(|| {
                    Unsupported::Encryption {
                        version: api.version().to_string(),
                    }
                })?;
                Some((add, cstring(secret, "passphrase")?))
            }
            None => None,
        };

        let a = status::check_null(unsafe { (api.read_new)() }, "archive_read_new")?;
        let session = ReadSession {
            inner: Rc::new(ReadInner {
                api,
                handle: Cell::new(a.as_ptr()),
                current: RefCell::new(None),
                codec: self.codec,
            }),
            adapter: None,
            exhausted: false,
            _source: PhantomData,
        };

        let a = a.as_ptr();
        for support in filters.into_iter().chain(formats) {
            status::check(api, a, unsafe { support(a) })?;
        }
        if let Some((add, secret)) = passphrase {
            status::check(api, a, unsafe { add(a, secret.as_ptr()) })?;
        }
        Ok(session)
    }

    /// Read an archive file
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<ReadSession<'static>> {
        let path = path.as_ref();
        let block_size = self
            .block_size
            .unwrap_or_else(|| preferred_block_size(std::fs::metadata(path).ok()));
        let c_path = path_cstring(path)?;

        let session = self.prepare()?;
        debug!("Opening {} for reading", path.display());
        session.check(|api, a| unsafe { (api.read_open_filename)(a, c_path.as_ptr(), block_size) })?;
        Ok(session)
    }

    /// Read from an open descriptor; the descriptor is not closed
    #[cfg(unix)]
    pub fn open_fd(&self, fd: std::os::fd::RawFd) -> Result<ReadSession<'static>> {
        let block_size = self.block_size.unwrap_or_else(|| fd_block_size(fd));

        let session = self.prepare()?;
        session.check(|api, a| unsafe { (api.read_open_fd)(a, fd, block_size) })?;
        Ok(session)
    }

    /// Read from a buffer that must outlive the session
    pub fn open_memory<'a>(&self, data: &'a [u8]) -> Result<ReadSession<'a>> {
        let session = self.prepare()?;
        session.check(|api, a| unsafe {
            (api.read_open_memory)(a, data.as_ptr() as *const c_void, data.len())
        })?;
        Ok(session)
    }

    /// Read from a non-seekable stream
    pub fn open_stream<'a, R: Read + 'a>(&self, reader: R) -> Result<ReadSession<'a>> {
        self.open_source(StreamSource(reader))
    }

    /// Read from a seekable stream; lets the engine seek (e.g. zip central directory)
    pub fn open_seekable<'a, R: Read + Seek + 'a>(&self, reader: R) -> Result<ReadSession<'a>> {
        self.open_source(SeekableSource(reader))
    }

    /// Read through the callback bridge
    pub fn open_source<'a, S: ArchiveSource + 'a>(&self, source: S) -> Result<ReadSession<'a>> {
        let block_size = self.block_size.unwrap_or_else(crate::page_size);
        let mut session = self.prepare()?;

        let adapter = Box::new(ReadAdapter::new(Box::new(source), block_size));
        let seekable = adapter.is_seekable();
        let adapter = NonNull::from(Box::leak(adapter));
        session.adapter = Some(adapter);
        let data = adapter.as_ptr() as *mut c_void;

        if seekable {
            session.check(|api, a| unsafe { (api.read_set_seek_callback)(a, Some(io::read_seek)) })?;
        }
        session.check(|api, a| unsafe {
            (api.read_open)(
                a,
                data,
                Some(io::read_open),
                Some(io::read_callback),
                Some(io::read_close),
            )
        })?;
        Ok(session)
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("format", &self.format)
            .field("filter", &self.filter)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("codec", &self.codec)
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// State shared between a session and the entries it produced
pub(crate) struct ReadInner {
    pub(crate) api: &'static Engine,
    handle: Cell<*mut archive>,
    current: RefCell<Option<Rc<Cell<EntryState>>>>,
    pub(crate) codec: HeaderCodec,
}

impl ReadInner {
    /// The live handle, `None` once released
    pub(crate) fn handle(&self) -> Option<*mut archive> {
        let a = self.handle.get();
        (!a.is_null()).then_some(a)
    }

    /// Retire the current entry: an unread body becomes unreachable
    fn retire_current(&self) {
        if let Some(state) = self.current.borrow_mut().take() {
            if state.get() == EntryState::Fresh {
                state.set(EntryState::Passed);
            }
        }
    }

    fn set_current(&self, state: Rc<Cell<EntryState>>) {
        *self.current.borrow_mut() = Some(state);
    }

    /// Close and free the handle; later calls are no-ops
    fn release(&self) -> Result<()> {
        self.retire_current();
        let a = self.handle.replace(ptr::null_mut());
        if a.is_null() {
            return Ok(());
        }
        let closed = status::check(self.api, a, unsafe { (self.api.read_close)(a) });
        unsafe { (self.api.read_free)(a) };
        closed.map(drop)
    }
}

impl Drop for ReadInner {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// An open archive being read
///
/// Iterating yields entries in archive order. Each entry's body is readable
/// only until the next call to `next`. The engine handle is released by
/// [`close`](ReadSession::close) or on drop, whichever comes first.
pub struct ReadSession<'a> {
    inner: Rc<ReadInner>,
    adapter: Option<NonNull<ReadAdapter<'a>>>,
    exhausted: bool,
    _source: PhantomData<&'a [u8]>,
}

impl<'a> ReadSession<'a> {
    fn check(
        &self,
        call: impl FnOnce(&'static Engine, *mut archive) -> std::os::raw::c_int,
    ) -> Result<()> {
        let api = self.inner.api;
        let a = self.inner.handle().ok_or(ArchiveError::NullHandle("archive_read_new"))?;
        status::check(api, a, call(api, a)).map(drop)
    }

    /// Advance to the next header
    ///
    /// Returns `Ok(None)` at the end of the archive.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.exhausted {
            return Ok(None);
        }
        let Some(a) = self.inner.handle() else {
            return Ok(None);
        };
        let api = self.inner.api;

        self.inner.retire_current();
        let (entry, state) = Entry::bound(&self.inner)?;
        let r = unsafe { (api.read_next_header2)(a, entry.as_ptr()) };
        if r == ARCHIVE_EOF {
            self.exhausted = true;
            return Ok(None);
        }
        match status::check(api, a, r) {
            Ok(_) => {
                self.inner.set_current(state);
                Ok(Some(entry))
            }
            Err(e) => {
                if e.is_fatal() {
                    self.exhausted = true;
                }
                Err(e)
            }
        }
    }

    /// Detected format, once the first header has been read
    pub fn format_name(&self) -> Option<String> {
        let a = self.inner.handle()?;
        unsafe { ffi::cstr_lossy((self.inner.api.format_name)(a)) }
    }

    /// Filters in the chain, outermost first
    pub fn filter_names(&self) -> Vec<String> {
        self.inner
            .handle()
            .map(|a| filter_names(self.inner.api, a))
            .unwrap_or_default()
    }

    /// Compressed bytes consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.inner
            .handle()
            .map(|a| unsafe { (self.inner.api.filter_bytes)(a, -1) }.max(0) as u64)
            .unwrap_or(0)
    }

    pub fn header_codec(&self) -> HeaderCodec {
        self.inner.codec
    }

    /// Release the engine handle, reporting close errors
    pub fn close(self) -> Result<()> {
        self.inner.release()
    }
}

impl Iterator for ReadSession<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

impl Drop for ReadSession<'_> {
    fn drop(&mut self) {
        // The engine may call the close callback while freeing, so the
        // adapter must outlive the handle.
        let _ = self.inner.release();
        if let Some(adapter) = self.adapter.take() {
            drop(unsafe { Box::from_raw(adapter.as_ptr()) });
        }
    }
}

/// Filter names, outermost first, without the pass-through `none` stage
pub(crate) fn filter_names(api: &Engine, a: *mut archive) -> Vec<String> {
    let count = unsafe { (api.filter_count)(a) };
    (0..count)
        .filter_map(|i| unsafe { ffi::cstr_lossy((api.filter_name)(a, i)) })
        .filter(|name| name != "none")
        .collect()
}

fn preferred_block_size(metadata: Option<std::fs::Metadata>) -> usize {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Some(size) = metadata.map(|m| m.blksize()).filter(|&b| b > 0) {
            return size as usize;
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;
    DEFAULT_BLOCK_SIZE
}

/// Preferred I/O size of a descriptor; an invalid descriptor is left for
/// the engine to reject
#[cfg(unix)]
fn fd_block_size(fd: std::os::fd::RawFd) -> usize {
    let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::fstat(fd, st.as_mut_ptr()) } != 0 {
        return DEFAULT_BLOCK_SIZE;
    }
    let blksize = unsafe { st.assume_init() }.st_blksize;
    usize::try_from(blksize)
        .ok()
        .filter(|&b| b > 0)
        .unwrap_or(DEFAULT_BLOCK_SIZE)
}

pub(crate) fn cstring(bytes: &[u8], what: &str) -> Result<CString> {
    CString::new(bytes)
        .map_err(|_| ArchiveError::InvalidArgument(format!("{} contains a NUL byte", what)))
}

pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        cstring(path.as_os_str().as_bytes(), "path")
    }
    #[cfg(not(unix))]
    {
        let text = path
            .to_str()
            .ok_or_else(|| ArchiveError::InvalidArgument(format!("{:?} is not UTF-8", path)))?;
        cstring(text.as_bytes(), "path")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_from() {
        assert_eq!(Selection::from("all"), Selection::All);
        assert_eq!(Selection::from("tar"), Selection::Named("tar".into()));
        assert_eq!(
            Selection::from(["tar", "zip"]),
            Selection::AnyOf(vec!["tar".into(), "zip".into()])
        );
        assert_eq!(Selection::All.names(), vec!["all"]);
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let options = ReadOptions::new().passphrase("hunter2");
        let shown = format!("{:?}", options);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn test_unknown_format_fails_before_io() {
        if ffi::engine().is_err() {
            eprintln!("skipping: libarchive not available");
            return;
        }
        let err = ReadOptions::new()
            .format("no_such_format")
            .open_memory(b"")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ArchiveError::Unsupported(Unsupported::ReadFormat(ref name)) if name == "no_such_format"
        ));
    }

    #[test]
    fn test_empty_memory_reads_no_entries() {
        if ffi::engine().is_err() {
            eprintln!("skipping: libarchive not available");
            return;
        }
        let mut reader = ReadOptions::new()
            .format(["empty", "tar"])
            .open_memory(b"")
            .unwrap();
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
        reader.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_descriptor_is_an_error() {
        assert_eq!(fd_block_size(-1), DEFAULT_BLOCK_SIZE);
        if ffi::engine().is_err() {
            eprintln!("skipping: libarchive not available");
            return;
        }
        let err = ReadOptions::new().open_fd(-1).err().unwrap();
        assert!(err.engine().is_some(), "{:?}", err);
        assert_eq!(err.errno(), Some(libc::EBADF));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_block_size_from_fstat() {
        use std::os::fd::AsRawFd;
        let file = tempfile::tempfile().unwrap();
        assert!(fd_block_size(file.as_raw_fd()) > 0);
    }
}
