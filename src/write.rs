//! Write sessions
//!
//! A [`WriteSession`] runs the per-entry protocol `write_header` →
//! `write_data`* → `finish_entry` against one engine handle. Closing commits
//! the archive; dropping an unclosed session calls `archive_write_fail`
//! first, so a half-written archive is never finalised as if it were
//! complete.

use crate::codec::HeaderCodec;
use crate::entry::{Entry, EntryAttributes, EntryName, FileType};
use crate::error::{Result, Unsupported};
use crate::ffi::{self, archive, archive_entry, Engine};
use crate::io::{self, ArchiveSink, StreamSink, WriteAdapter};
use crate::read::{cstring, filter_names, path_cstring};
use crate::status;
use std::fmt;
use std::io::Write;
use std::marker::PhantomData;
use std::os::raw::{c_int, c_void};
use std::path::Path;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Permission bits for entries built by [`WriteSession::add_file_from_memory`]
pub const DEFAULT_PERM: u32 = 0o664;

/// Block size used by `add_files` when the engine reports none
pub const DEFAULT_BYTES_PER_BLOCK: usize = 10240;

/// Builder for write sessions
///
/// ```rust,no_run
/// use libarchive_bridge::{MemoryEntry, Result, WriteOptions};
///
/// # fn main() -> Result<()> {
/// let mut buf = Vec::new();
/// WriteOptions::new("pax")
///     .filter("xz")
///     .open_vec(&mut buf)?
///     .run(|archive| {
///         archive.add_file_from_memory(&MemoryEntry::new("hello.txt", 5), [b"hello"])
///     })?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WriteOptions {
    format: String,
    filter: Option<String>,
    options: String,
    passphrase: Option<Vec<u8>>,
    codec: HeaderCodec,
    block_size: Option<usize>,
}

impl WriteOptions {
    /// Start from a format name such as `"gnutar"`, `"pax"`, `"zip"` or `"7zip"`
    pub fn new(format: impl Into<String>) -> Self {
        WriteOptions {
            format: format.into(),
            filter: None,
            options: String::new(),
            passphrase: None,
            codec: HeaderCodec::default(),
            block_size: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Engine option string, e.g. `"compression-level=9"` or `"zip:encryption=aes256"`
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Encryption passphrase
    ///
    /// Without an explicit `encryption` option the weakest scheme the format
    /// offers is switched on (ZipCrypto for zip) and a warning is logged.
    pub fn passphrase(mut self, passphrase: impl AsRef<[u8]>) -> Self {
        self.passphrase = Some(passphrase.as_ref().to_vec());
        self
    }

    pub fn header_codec(mut self, codec: HeaderCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Bytes per block handed to callback sinks (default: page size)
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size.max(1));
        self
    }

    /// Options string with encryption switched on when a passphrase needs it
    fn effective_options(&self) -> String {
        if self.passphrase.is_none() || self.options.contains("encryption") {
            return self.options.clone();
        }
        if self.format == "zip" {
            warn!(
                "zip passphrase given without an `encryption` option; falling back to \
                 ZipCrypto, which is weak. Set e.g. options(\"encryption=aes256\")"
            );
        }
        if self.options.is_empty() {
            "encryption".to_string()
        } else {
            format!("{},encryption", self.options)
        }
    }

    fn prepare<'a>(&self) -> Result<WriteSession<'a>> {
        let api = ffi::engine()?;
        let caps = &api.capabilities;

        let set_format = caps.write_format(&self.format)?;
        let add_filter = self
            .filter
            .as_deref()
            .map(|name| caps.write_filter(name))
            .transpose()?;
        let passphrase = match &self.passphrase {
            Some(secret) => {
                let set = api.optional.write_set_passphrase.ok_or_else(|| {
                    Unsupported::Encryption {
                        version: api.version().to_string(),
                    }
                })?;
                Some((set, cstring(secret, "passphrase")?))
            }
            None => None,
        };
        let options = self.effective_options();
        let options = if options.is_empty() {
            None
        } else {
            Some(cstring(options.as_bytes(), "options")?)
        };

        let handle = status::check_null(unsafe { (api.write_new)() }, "archive_write_new")?;
        let session = WriteSession {
            api,
            handle,
            open: true,
            adapter: None,
            codec: self.codec,
            body: None,
            _sink: PhantomData,
        };

        let a = handle.as_ptr();
        session.check(unsafe { set_format(a) })?;
        if let Some(add_filter) = add_filter {
            session.check(unsafe { add_filter(a) })?;
        }
        if let Some(options) = &options {
            session.check(unsafe { (api.write_set_options)(a, options.as_ptr()) })?;
        }
        if let Some((set, secret)) = passphrase {
            session.check(unsafe { set(a, secret.as_ptr()) })?;
        }
        Ok(session)
    }

    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<WriteSession<'static>> {
        let path = path.as_ref();
        let c_path = path_cstring(path)?;
        let session = self.prepare()?;
        debug!("Opening {} for writing ({})", path.display(), self.format);
        session.check(unsafe { (session.api.write_open_filename)(session.raw(), c_path.as_ptr()) })?;
        Ok(session)
    }

    /// Write to an open descriptor; the descriptor is not closed
    #[cfg(unix)]
    pub fn open_fd(&self, fd: std::os::fd::RawFd) -> Result<WriteSession<'static>> {
        let session = self.prepare()?;
        session.check(unsafe { (session.api.write_open_fd)(session.raw(), fd) })?;
        Ok(session)
    }

    /// Append the archive to `buf`
    pub fn open_vec<'a>(&self, buf: &'a mut Vec<u8>) -> Result<WriteSession<'a>> {
        self.open_stream(buf)
    }

    pub fn open_stream<'a, W: Write + 'a>(&self, writer: W) -> Result<WriteSession<'a>> {
        self.open_sink(StreamSink(writer))
    }

    /// Write through the callback bridge
    pub fn open_sink<'a, S: ArchiveSink + 'a>(&self, sink: S) -> Result<WriteSession<'a>> {
        let block_size = self.block_size.unwrap_or_else(crate::page_size);
        let bytes_per_block = c_int::try_from(block_size).unwrap_or(c_int::MAX);
        let mut session = self.prepare()?;

        let adapter = NonNull::from(Box::leak(Box::new(WriteAdapter::new(Box::new(sink)))));
        session.adapter = Some(adapter);
        let a = session.raw();
        let api = session.api;

        session.check(unsafe { (api.write_set_bytes_in_last_block)(a, 1) })?;
        session.check(unsafe { (api.write_set_bytes_per_block)(a, bytes_per_block) })?;
        session.check(unsafe {
            (api.write_open)(
                a,
                adapter.as_ptr() as *mut c_void,
                Some(io::write_open),
                Some(io::write_callback),
                Some(io::write_close),
            )
        })?;
        Ok(session)
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("format", &self.format)
            .field("filter", &self.filter)
            .field("options", &self.options)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("codec", &self.codec)
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// Fields for an entry synthesised without touching the disk
#[derive(Debug, Clone)]
pub struct MemoryEntry<'n> {
    pub pathname: EntryName<'n>,
    pub size: Option<u64>,
    pub file_type: FileType,
    pub perm: u32,
    pub attributes: EntryAttributes,
}

impl<'n> MemoryEntry<'n> {
    /// Regular file with [`DEFAULT_PERM`]
    pub fn new(pathname: impl Into<EntryName<'n>>, size: u64) -> Self {
        MemoryEntry {
            pathname: pathname.into(),
            size: Some(size),
            file_type: FileType::Regular,
            perm: DEFAULT_PERM,
            attributes: EntryAttributes::default(),
        }
    }

    pub fn file_type(mut self, file_type: FileType) -> Self {
        self.file_type = file_type;
        self
    }

    pub fn perm(mut self, perm: u32) -> Self {
        self.perm = perm;
        self
    }

    pub fn attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Progress of the entry between `write_header` and `finish_entry`
struct Body {
    pathname: String,
    declared: Option<u64>,
    written: u64,
}

/// An archive being written
pub struct WriteSession<'a> {
    pub(crate) api: &'static Engine,
    handle: NonNull<archive>,
    open: bool,
    adapter: Option<NonNull<WriteAdapter<'a>>>,
    pub(crate) codec: HeaderCodec,
    body: Option<Body>,
    _sink: PhantomData<&'a mut ()>,
}

impl<'a> WriteSession<'a> {
    pub(crate) fn raw(&self) -> *mut archive {
        self.handle.as_ptr()
    }

    fn check(&self, code: c_int) -> Result<c_int> {
        status::check(self.api, self.raw(), code)
    }

    pub fn header_codec(&self) -> HeaderCodec {
        self.codec
    }

    /// Engine block size, `DEFAULT_BYTES_PER_BLOCK` if it reports none
    pub fn bytes_per_block(&self) -> usize {
        let n = unsafe { (self.api.write_get_bytes_per_block)(self.raw()) };
        usize::try_from(n)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_BYTES_PER_BLOCK)
    }

    /// Start an entry; a still-open previous entry is finished first
    ///
    /// A non-regular entry without a size is written with size 0, since some
    /// formats (cpio) refuse a header with no size. `entry` itself is left
    /// untouched.
    pub fn write_header(&mut self, entry: &Entry) -> Result<()> {
        let sized = sized_header(entry)?;
        let raw = sized.as_ref().unwrap_or(entry).as_ptr();
        self.begin(raw, declared_body(entry), entry.to_string())
    }

    fn begin(&mut self, raw: *mut archive_entry, declared: Option<u64>, pathname: String) -> Result<()> {
        if self.body.is_some() {
            self.finish_entry()?;
        }
        self.check(unsafe { (self.api.write_header)(self.raw(), raw) })?;
        self.body = Some(Body {
            pathname,
            declared,
            written: 0,
        });
        Ok(())
    }

    /// Push body bytes, returning how many the engine accepted
    pub fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let n = unsafe {
            (self.api.write_data)(self.raw(), data.as_ptr() as *const c_void, data.len())
        };
        let n = status::check_len(self.api, self.raw(), n)?;
        if let Some(body) = &mut self.body {
            body.written += n as u64;
        }
        Ok(n)
    }

    /// Push all of `data`, stopping early only if the engine refuses more
    ///
    /// The engine stops accepting bytes once the declared size is reached;
    /// the surplus is logged as dropped.
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write_data(data)?;
            if n == 0 {
                let pathname = self.body.as_ref().map_or("", |b| b.pathname.as_str());
                warn!(
                    "{}: engine accepted no more body data, {} bytes dropped",
                    pathname,
                    data.len()
                );
                break;
            }
            data = &data[n..];
        }
        Ok(())
    }

    pub fn finish_entry(&mut self) -> Result<()> {
        let body = self.body.take();
        self.check(unsafe { (self.api.write_finish_entry)(self.raw()) })?;
        if let Some(Body {
            pathname,
            declared: Some(declared),
            written,
        }) = body
        {
            if declared != written {
                warn!(
                    "{}: header declares {} bytes but {} were written",
                    pathname, declared, written
                );
            }
        }
        Ok(())
    }

    /// Copy one entry, header and body
    ///
    /// The entry must be the current entry of a live read session; lifecycle
    /// errors are raised before anything is written.
    pub fn add_entry(&mut self, entry: &mut Entry) -> Result<()> {
        let sized = sized_header(entry)?;
        let raw = sized.as_ref().map_or(entry.as_ptr(), Entry::as_ptr);
        let declared = declared_body(entry);
        let pathname = entry.to_string();
        let blocks = entry.get_blocks()?;

        self.begin(raw, declared, pathname)?;
        for block in blocks {
            self.write_all(&block?)?;
        }
        self.finish_entry()
    }

    /// Copy every entry of an iterator, typically another [`ReadSession`](crate::ReadSession)
    pub fn add_entries<I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        for entry in entries {
            self.add_entry(&mut entry?)?;
        }
        Ok(())
    }

    /// Write one entry built from explicit fields
    ///
    /// `chunks` is consumed until it ends or yields an empty chunk.
    pub fn add_file_from_memory<I>(&mut self, spec: &MemoryEntry<'_>, chunks: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut entry = Entry::with_codec(self.codec)?;
        entry.set_pathname(spec.pathname.clone())?;
        entry.set_size(spec.size)?;
        entry.set_file_type(spec.file_type);
        entry.set_perm(spec.perm)?;
        entry.set_attributes(&spec.attributes)?;

        self.write_header(&entry)?;
        for chunk in chunks {
            let chunk = chunk.as_ref();
            if chunk.is_empty() {
                break;
            }
            self.write_all(chunk)?;
        }
        self.finish_entry()
    }

    /// Output bytes produced so far, after filters
    pub fn bytes_written(&self) -> u64 {
        unsafe { (self.api.filter_bytes)(self.raw(), -1) }.max(0) as u64
    }

    pub fn filter_names(&self) -> Vec<String> {
        filter_names(self.api, self.raw())
    }

    pub fn format_name(&self) -> Option<String> {
        unsafe { ffi::cstr_lossy((self.api.format_name)(self.raw())) }
    }

    /// Flush, finalise and free the archive
    ///
    /// If finalising fails the session is aborted instead and the error
    /// returned.
    pub fn close(mut self) -> Result<()> {
        if self.body.is_some() {
            self.finish_entry()?;
        }
        let a = self.raw();
        self.check(unsafe { (self.api.write_close)(a) })?;
        self.open = false;
        unsafe { (self.api.write_free)(a) };
        Ok(())
    }

    /// Discard the archive; the sink is told the output is invalid
    pub fn abort(self) {
        drop(self)
    }

    /// Run `f` and close on success, abort on error
    pub fn run<T>(mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let value = f(&mut self)?;
        self.close()?;
        Ok(value)
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            debug!("Write session dropped without close, marking output as failed");
            unsafe {
                (self.api.write_fail)(self.raw());
                (self.api.write_free)(self.raw());
            }
        }
        if let Some(adapter) = self.adapter.take() {
            drop(unsafe { Box::from_raw(adapter.as_ptr()) });
        }
    }
}

/// Size the body must add up to; only regular, non-hardlink entries carry data
fn declared_body(entry: &Entry) -> Option<u64> {
    if entry.file_type() == Some(FileType::Regular) {
        entry.size()
    } else {
        None
    }
}

/// Unbound copy with size 0 when a non-regular entry carries no size
fn sized_header(entry: &Entry) -> Result<Option<Entry>> {
    if entry.size().is_some() || entry.file_type() == Some(FileType::Regular) {
        return Ok(None);
    }
    let mut copy = entry.clone_metadata()?;
    copy.set_size(Some(0))?;
    Ok(Some(copy))
}
