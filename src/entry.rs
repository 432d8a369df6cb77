//! Archive entries
//!
//! An [`Entry`] owns one `struct archive_entry`. Entries produced by a
//! [`ReadSession`](crate::ReadSession) are additionally bound to that session
//! and can stream their body exactly once, and only while they are the
//! session's current entry. The session, not the entry, moves the shared
//! [`EntryState`] cell forward when it advances or closes.

use crate::codec::HeaderCodec;
use crate::error::{ArchiveError, EngineError, ErrorMessage, LifecycleError, Result, SessionRef};
use crate::ffi::{self, archive_entry, Engine, ARCHIVE_EOF, ARCHIVE_FAILED};
use crate::read::ReadInner;
use crate::status;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cell::Cell;
use std::ffi::CString;
use std::fmt;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Content-read eligibility of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Not produced by a read session; metadata only
    Unbound,
    /// Current entry of its session, body not read to the end yet
    Fresh,
    /// Body was read to the end
    Consumed,
    /// The session moved on before the body was read to the end
    Passed,
}

/// Kind of filesystem node an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    /// A regular-file entry that carries a hardlink target
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// Decode the `AE_IF*` bits of a mode
    pub fn from_mode(mode: u32) -> Option<FileType> {
        match mode & ffi::AE_IFMT {
            ffi::AE_IFREG => Some(FileType::Regular),
            ffi::AE_IFDIR => Some(FileType::Directory),
            ffi::AE_IFLNK => Some(FileType::Symlink),
            ffi::AE_IFCHR => Some(FileType::CharDevice),
            ffi::AE_IFBLK => Some(FileType::BlockDevice),
            ffi::AE_IFIFO => Some(FileType::Fifo),
            ffi::AE_IFSOCK => Some(FileType::Socket),
            _ => None,
        }
    }

    /// `AE_IF*` bits; hardlinks are stored as regular files
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Regular | FileType::Hardlink => ffi::AE_IFREG,
            FileType::Directory => ffi::AE_IFDIR,
            FileType::Symlink => ffi::AE_IFLNK,
            FileType::CharDevice => ffi::AE_IFCHR,
            FileType::BlockDevice => ffi::AE_IFBLK,
            FileType::Fifo => ffi::AE_IFIFO,
            FileType::Socket => ffi::AE_IFSOCK,
        }
    }
}

/// Seconds and nanoseconds since the Unix epoch
///
/// Kept in floor form: `nanos` is always in `0..1_000_000_000` and `secs`
/// carries the sign, so `-1.5` seconds is `(-2, 500_000_000)`. Field order
/// then matches chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: i64,
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

impl Timestamp {
    /// Normalizes any `nanos` into range, carrying whole seconds into `secs`
    pub fn new(secs: i64, nanos: i64) -> Self {
        Timestamp {
            secs: secs.saturating_add(nanos.div_euclid(NANOS_PER_SEC)),
            nanos: nanos.rem_euclid(NANOS_PER_SEC),
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / NANOS_PER_SEC as f64
    }

    pub fn to_system_time(&self) -> Option<SystemTime> {
        let t = Timestamp::new(self.secs, self.nanos);
        let secs = Duration::from_secs(t.secs.unsigned_abs());
        let base = if t.secs >= 0 {
            UNIX_EPOCH.checked_add(secs)?
        } else {
            UNIX_EPOCH.checked_sub(secs)?
        };
        base.checked_add(Duration::from_nanos(t.nanos as u64))
    }
}

impl From<i64> for Timestamp {
    fn from(secs: i64) -> Self {
        Timestamp { secs, nanos: 0 }
    }
}

impl From<(i64, i64)> for Timestamp {
    fn from((secs, nanos): (i64, i64)) -> Self {
        Timestamp::new(secs, nanos)
    }
}

impl From<f64> for Timestamp {
    fn from(value: f64) -> Self {
        let whole = value.floor();
        let nanos = ((value - whole) * NANOS_PER_SEC as f64).round() as i64;
        Timestamp::new(whole as i64, nanos)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp::new(d.as_secs() as i64, d.subsec_nanos() as i64),
            Err(e) => {
                let d = e.duration();
                Timestamp::new(-(d.as_secs() as i64), -(d.subsec_nanos() as i64))
            }
        }
    }
}

/// Pathname or link target as handed to an entry setter
///
/// Text goes through the entry's [`HeaderCodec`]; bytes are stored as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryName<'a> {
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
}

impl<'a> From<&'a str> for EntryName<'a> {
    fn from(text: &'a str) -> Self {
        EntryName::Text(Cow::Borrowed(text))
    }
}

impl From<String> for EntryName<'static> {
    fn from(text: String) -> Self {
        EntryName::Text(Cow::Owned(text))
    }
}

impl<'a> From<&'a String> for EntryName<'a> {
    fn from(text: &'a String) -> Self {
        EntryName::Text(Cow::Borrowed(text.as_str()))
    }
}

impl<'a> From<&'a [u8]> for EntryName<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        EntryName::Bytes(Cow::Borrowed(bytes))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for EntryName<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        EntryName::Bytes(Cow::Borrowed(&bytes[..]))
    }
}

impl From<Vec<u8>> for EntryName<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        EntryName::Bytes(Cow::Owned(bytes))
    }
}

impl<'a> From<&'a Path> for EntryName<'a> {
    #[cfg(unix)]
    fn from(path: &'a Path) -> Self {
        use std::os::unix::ffi::OsStrExt;
        EntryName::Bytes(Cow::Borrowed(path.as_os_str().as_bytes()))
    }

    #[cfg(not(unix))]
    fn from(path: &'a Path) -> Self {
        EntryName::Text(path.to_string_lossy())
    }
}

/// Metadata overrides applied by [`Entry::set_attributes`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAttributes {
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub perm: Option<u32>,
    pub atime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
    pub birthtime: Option<Timestamp>,
}

/// Owned snapshot of an entry's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub pathname: Option<String>,
    pub file_type: Option<FileType>,
    pub size: Option<u64>,
    pub perm: u32,
    pub uid: i64,
    pub gid: i64,
    pub uname: Option<String>,
    pub gname: Option<String>,
    pub linkpath: Option<String>,
    pub atime: Option<Timestamp>,
    pub mtime: Option<Timestamp>,
    pub ctime: Option<Timestamp>,
    pub birthtime: Option<Timestamp>,
}

struct Binding {
    session: Weak<ReadInner>,
    state: Rc<Cell<EntryState>>,
    /// The body stream was handed out; it stays taken even if abandoned
    taken: bool,
}

type RawText = unsafe extern "C" fn(*mut archive_entry) -> *const c_char;
type CopyText = unsafe extern "C" fn(*mut archive_entry, *const c_char);
type UpdateText = unsafe extern "C" fn(*mut archive_entry, *const c_char) -> i32;

/// One archive member
pub struct Entry {
    raw: NonNull<archive_entry>,
    api: &'static Engine,
    codec: HeaderCodec,
    binding: Option<Binding>,
}

impl Entry {
    /// Create an unbound entry, usable as a metadata carrier
    pub fn new() -> Result<Self> {
        Entry::with_codec(HeaderCodec::default())
    }

    pub fn with_codec(codec: HeaderCodec) -> Result<Self> {
        let api = ffi::engine()?;
        let raw = status::check_null(unsafe { (api.entry_new)() }, "archive_entry_new")?;
        Ok(Entry {
            raw,
            api,
            codec,
            binding: None,
        })
    }

    /// Create a fresh entry bound to `session`, returning the state cell the
    /// session uses to retire it
    pub(crate) fn bound(session: &Rc<ReadInner>) -> Result<(Entry, Rc<Cell<EntryState>>)> {
        let mut entry = Entry::with_codec(session.codec)?;
        let state = Rc::new(Cell::new(EntryState::Fresh));
        entry.binding = Some(Binding {
            session: Rc::downgrade(session),
            state: Rc::clone(&state),
            taken: false,
        });
        Ok((entry, state))
    }

    /// Unbound copy of this entry's metadata
    pub fn clone_metadata(&self) -> Result<Entry> {
        let raw = status::check_null(
            unsafe { (self.api.entry_clone)(self.as_ptr()) },
            "archive_entry_clone",
        )?;
        Ok(Entry {
            raw,
            api: self.api,
            codec: self.codec,
            binding: None,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut archive_entry {
        self.raw.as_ptr()
    }

    /// Reset all metadata; the binding is kept
    pub(crate) fn clear(&mut self) {
        unsafe { (self.api.entry_clear)(self.as_ptr()) };
    }

    pub fn codec(&self) -> HeaderCodec {
        self.codec
    }

    pub fn state(&self) -> EntryState {
        self.binding
            .as_ref()
            .map(|b| b.state.get())
            .unwrap_or(EntryState::Unbound)
    }

    // ---- text fields ----

    fn raw_text(&self, get: RawText) -> Option<&[u8]> {
        unsafe { ffi::cstr_bytes(get(self.as_ptr())) }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self.codec.decode(bytes) {
            Some(text) => text.into_owned(),
            None => self.codec.decode_lossy(bytes).into_owned(),
        }
    }

    fn text(&self, utf8: Option<RawText>, raw: RawText) -> Option<String> {
        if self.codec.is_utf8() {
            let wide = utf8
                .and_then(|get| self.raw_text(get))
                .and_then(|bytes| std::str::from_utf8(bytes).ok());
            if let Some(text) = wide {
                return Some(text.to_owned());
            }
        }
        self.raw_text(raw).map(|bytes| self.decode(bytes))
    }

    fn bytes(&self, raw: RawText, utf8: Option<RawText>) -> Option<Vec<u8>> {
        self.raw_text(raw)
            .or_else(|| utf8.and_then(|get| self.raw_text(get)))
            .map(<[u8]>::to_vec)
    }

    fn set_text(&mut self, name: EntryName<'_>, update: UpdateText, copy: CopyText) -> Result<()> {
        match name {
            EntryName::Text(text) if self.codec.is_utf8() => {
                let c = to_cstring(text.as_bytes())?;
                // The UTF-8 form is kept even when the locale conversion
                // behind the return value fails.
                unsafe { update(self.as_ptr(), c.as_ptr()) };
            }
            EntryName::Text(text) => {
                let encoded = self.codec.encode(&text)?;
                let c = to_cstring(&encoded)?;
                unsafe { copy(self.as_ptr(), c.as_ptr()) };
            }
            EntryName::Bytes(bytes) => {
                let c = to_cstring(&bytes)?;
                unsafe { copy(self.as_ptr(), c.as_ptr()) };
            }
        }
        Ok(())
    }

    fn set_owner_name(&mut self, name: &str, copy: CopyText) -> Result<()> {
        let encoded = self.codec.encode(name)?;
        let c = to_cstring(&encoded)?;
        unsafe { copy(self.as_ptr(), c.as_ptr()) };
        Ok(())
    }

    pub fn pathname(&self) -> Option<String> {
        self.text(self.api.optional.entry_pathname_utf8, self.api.entry_pathname)
    }

    /// Pathname exactly as stored in the header
    pub fn pathname_bytes(&self) -> Option<Vec<u8>> {
        self.bytes(self.api.entry_pathname, self.api.optional.entry_pathname_utf8)
    }

    /// Pathname as a filesystem path; byte-preserving on Unix
    pub fn path(&self) -> Option<PathBuf> {
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStringExt;
            self.pathname_bytes()
                .map(|bytes| PathBuf::from(std::ffi::OsString::from_vec(bytes)))
        }
        #[cfg(not(unix))]
        {
            self.pathname().map(PathBuf::from)
        }
    }

    pub fn set_pathname<'a>(&mut self, name: impl Into<EntryName<'a>>) -> Result<()> {
        let api = self.api;
        self.set_text(
            name.into(),
            api.entry_update_pathname_utf8,
            api.entry_copy_pathname,
        )
    }

    /// Where the disk reader found this entry
    pub fn sourcepath_bytes(&self) -> Option<Vec<u8>> {
        self.raw_text(self.api.entry_sourcepath).map(<[u8]>::to_vec)
    }

    pub fn symlink(&self) -> Option<String> {
        self.text(self.api.optional.entry_symlink_utf8, self.api.entry_symlink)
    }

    pub fn symlink_bytes(&self) -> Option<Vec<u8>> {
        self.bytes(self.api.entry_symlink, self.api.optional.entry_symlink_utf8)
    }

    pub fn set_symlink<'a>(&mut self, target: impl Into<EntryName<'a>>) -> Result<()> {
        let api = self.api;
        self.set_text(
            target.into(),
            api.entry_update_symlink_utf8,
            api.entry_copy_symlink,
        )
    }

    pub fn hardlink(&self) -> Option<String> {
        self.text(self.api.optional.entry_hardlink_utf8, self.api.entry_hardlink)
    }

    pub fn hardlink_bytes(&self) -> Option<Vec<u8>> {
        self.bytes(self.api.entry_hardlink, self.api.optional.entry_hardlink_utf8)
    }

    pub fn set_hardlink<'a>(&mut self, target: impl Into<EntryName<'a>>) -> Result<()> {
        let api = self.api;
        self.set_text(
            target.into(),
            api.entry_update_hardlink_utf8,
            api.entry_copy_hardlink,
        )
    }

    /// Link target, whichever kind of link this is
    pub fn linkpath(&self) -> Option<String> {
        self.hardlink().or_else(|| self.symlink())
    }

    pub fn uname(&self) -> Option<String> {
        self.raw_text(self.api.entry_uname).map(|b| self.decode(b))
    }

    pub fn set_uname(&mut self, name: &str) -> Result<()> {
        let copy = self.api.entry_copy_uname;
        self.set_owner_name(name, copy)
    }

    pub fn gname(&self) -> Option<String> {
        self.raw_text(self.api.entry_gname).map(|b| self.decode(b))
    }

    pub fn set_gname(&mut self, name: &str) -> Result<()> {
        let copy = self.api.entry_copy_gname;
        self.set_owner_name(name, copy)
    }

    // ---- numeric fields ----

    /// Body size; `None` when the header carries no size
    pub fn size(&self) -> Option<u64> {
        unsafe {
            if (self.api.entry_size_is_set)(self.as_ptr()) == 0 {
                return None;
            }
            u64::try_from((self.api.entry_size)(self.as_ptr())).ok()
        }
    }

    pub fn set_size(&mut self, size: Option<u64>) -> Result<()> {
        match size {
            Some(size) => {
                let size = i64::try_from(size).map_err(|_| out_of_range("size", size))?;
                unsafe { (self.api.entry_set_size)(self.as_ptr(), size) };
            }
            None => unsafe { (self.api.entry_unset_size)(self.as_ptr()) },
        }
        Ok(())
    }

    /// Node type; a set hardlink target wins over the mode bits
    pub fn file_type(&self) -> Option<FileType> {
        if self.raw_text(self.api.entry_hardlink).is_some() {
            return Some(FileType::Hardlink);
        }
        FileType::from_mode(unsafe { (self.api.entry_filetype)(self.as_ptr()) } as u32)
    }

    pub fn set_file_type(&mut self, file_type: FileType) {
        unsafe { (self.api.entry_set_filetype)(self.as_ptr(), file_type.mode_bits()) };
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(FileType::Symlink)
    }

    pub fn is_hardlink(&self) -> bool {
        self.file_type() == Some(FileType::Hardlink)
    }

    pub fn is_char_device(&self) -> bool {
        self.file_type() == Some(FileType::CharDevice)
    }

    pub fn is_block_device(&self) -> bool {
        self.file_type() == Some(FileType::BlockDevice)
    }

    pub fn is_dev(&self) -> bool {
        self.is_char_device() || self.is_block_device()
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type() == Some(FileType::Fifo)
    }

    pub fn is_socket(&self) -> bool {
        self.file_type() == Some(FileType::Socket)
    }

    /// Type and permission bits
    pub fn mode(&self) -> u32 {
        unsafe { (self.api.entry_mode)(self.as_ptr()) as u32 }
    }

    pub fn set_mode(&mut self, mode: u32) -> Result<()> {
        let mode = ffi::mode_t::try_from(mode).map_err(|_| out_of_range("mode", mode))?;
        unsafe { (self.api.entry_set_mode)(self.as_ptr(), mode) };
        Ok(())
    }

    pub fn perm(&self) -> u32 {
        unsafe { (self.api.entry_perm)(self.as_ptr()) as u32 }
    }

    pub fn set_perm(&mut self, perm: u32) -> Result<()> {
        let perm = ffi::mode_t::try_from(perm).map_err(|_| out_of_range("perm", perm))?;
        unsafe { (self.api.entry_set_perm)(self.as_ptr(), perm) };
        Ok(())
    }

    /// `ls -l` style mode string, e.g. `-rw-r--r-- `
    pub fn strmode(&self) -> String {
        unsafe { ffi::cstr_lossy((self.api.entry_strmode)(self.as_ptr())) }.unwrap_or_default()
    }

    pub fn uid(&self) -> i64 {
        unsafe { (self.api.entry_uid)(self.as_ptr()) }
    }

    pub fn set_uid(&mut self, uid: i64) {
        unsafe { (self.api.entry_set_uid)(self.as_ptr(), uid) };
    }

    pub fn gid(&self) -> i64 {
        unsafe { (self.api.entry_gid)(self.as_ptr()) }
    }

    pub fn set_gid(&mut self, gid: i64) {
        unsafe { (self.api.entry_set_gid)(self.as_ptr(), gid) };
    }

    pub fn set_attributes(&mut self, attrs: &EntryAttributes) -> Result<()> {
        if let Some(uid) = attrs.uid {
            self.set_uid(uid);
        }
        if let Some(gid) = attrs.gid {
            self.set_gid(gid);
        }
        if let Some(uname) = &attrs.uname {
            self.set_uname(uname)?;
        }
        if let Some(gname) = &attrs.gname {
            self.set_gname(gname)?;
        }
        if let Some(perm) = attrs.perm {
            self.set_perm(perm)?;
        }
        if let Some(t) = attrs.atime {
            self.set_atime(t)?;
        }
        if let Some(t) = attrs.mtime {
            self.set_mtime(t)?;
        }
        if let Some(t) = attrs.ctime {
            self.set_ctime(t)?;
        }
        if let Some(t) = attrs.birthtime {
            self.set_birthtime(t)?;
        }
        Ok(())
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            pathname: self.pathname(),
            file_type: self.file_type(),
            size: self.size(),
            perm: self.perm(),
            uid: self.uid(),
            gid: self.gid(),
            uname: self.uname(),
            gname: self.gname(),
            linkpath: self.linkpath(),
            atime: self.atime(),
            mtime: self.mtime(),
            ctime: self.ctime(),
            birthtime: self.birthtime(),
        }
    }

    // ---- content ----

    /// Claim the body stream: the session and state cell, if the body may
    /// still be read
    fn take_content(&mut self) -> Result<(Rc<ReadInner>, Rc<Cell<EntryState>>)> {
        let binding = self.binding.as_mut().ok_or(LifecycleError::Unbound)?;
        match binding.state.get() {
            EntryState::Fresh if binding.taken => return Err(LifecycleError::Consumed.into()),
            EntryState::Fresh => {}
            EntryState::Consumed => return Err(LifecycleError::Consumed.into()),
            EntryState::Passed => return Err(LifecycleError::NotCurrent.into()),
            EntryState::Unbound => return Err(LifecycleError::Unbound.into()),
        }
        let session = binding
            .session
            .upgrade()
            .filter(|s| s.handle().is_some())
            .ok_or(LifecycleError::NotCurrent)?;
        binding.taken = true;
        Ok((session, Rc::clone(&binding.state)))
    }

    /// Stream the body in page-sized chunks
    ///
    /// The sequence can be taken once. The entry counts as consumed only when
    /// the sequence reaches its end; a stream dropped part way cannot be
    /// restarted and the entry becomes passed once the session advances.
    pub fn get_blocks(&mut self) -> Result<Blocks<'_>> {
        self.get_blocks_sized(crate::page_size())
    }

    pub fn get_blocks_sized(&mut self, block_size: usize) -> Result<Blocks<'_>> {
        let (session, state) = self.take_content()?;
        Ok(Blocks {
            session,
            state,
            buffer: vec![0; block_size.max(1)],
            done: false,
            _entry: PhantomData,
        })
    }

    /// Read the whole body into memory
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(self.size().unwrap_or(0).min(1 << 20) as usize);
        for block in self.get_blocks()? {
            body.extend_from_slice(&block?);
        }
        Ok(body)
    }

    /// Hand each raw engine block and its offset to `f`
    ///
    /// Holes in sparse bodies show up as offset jumps.
    pub(crate) fn for_each_data_block(
        &mut self,
        mut f: impl FnMut(&[u8], i64) -> Result<()>,
    ) -> Result<()> {
        let (session, state) = self.take_content()?;
        let result = (|| -> Result<()> {
            let api = session.api;
            loop {
                let a = session.handle().ok_or(LifecycleError::NotCurrent)?;
                let mut buf: *const c_void = ptr::null();
                let mut size = 0usize;
                let mut offset = 0i64;
                let r = unsafe { (api.read_data_block)(a, &mut buf, &mut size, &mut offset) };
                if r == ARCHIVE_EOF {
                    return Ok(());
                }
                status::check(api, a, r)?;
                let block: &[u8] = if buf.is_null() || size == 0 {
                    &[]
                } else {
                    // SAFETY: the engine keeps the block valid until the next
                    // read call on this handle.
                    unsafe { std::slice::from_raw_parts(buf as *const u8, size) }
                };
                f(block, offset)?;
            }
        })();
        if result.is_ok() && state.get() == EntryState::Fresh {
            state.set(EntryState::Consumed);
        }
        result
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        unsafe { (self.api.entry_free)(self.as_ptr()) };
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pathname().unwrap_or_default())
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("pathname", &self.pathname())
            .field("file_type", &self.file_type())
            .field("size", &self.size())
            .field("state", &self.state())
            .finish()
    }
}

macro_rules! timestamp_accessors {
    ($( $get:ident, $set:ident, $unset:ident =>
        $raw_get:ident, $raw_nsec:ident, $raw_is_set:ident, $raw_set:ident, $raw_unset:ident; )*) => {
        impl Entry {
            $(
                pub fn $get(&self) -> Option<Timestamp> {
                    unsafe {
                        if (self.api.$raw_is_set)(self.as_ptr()) == 0 {
                            return None;
                        }
                        Some(Timestamp::new(
                            (self.api.$raw_get)(self.as_ptr()) as i64,
                            (self.api.$raw_nsec)(self.as_ptr()) as i64,
                        ))
                    }
                }

                /// Accepts whole seconds, `(secs, nanos)`, fractional seconds
                /// or a `SystemTime`
                pub fn $set(&mut self, time: impl Into<Timestamp>) -> Result<()> {
                    let time = time.into();
                    let secs = ffi::time_t::try_from(time.secs)
                        .map_err(|_| out_of_range(stringify!($get), time.secs))?;
                    let nanos = std::os::raw::c_long::try_from(time.nanos)
                        .map_err(|_| out_of_range(stringify!($get), time.nanos))?;
                    unsafe { (self.api.$raw_set)(self.as_ptr(), secs, nanos) };
                    Ok(())
                }

                pub fn $unset(&mut self) {
                    unsafe { (self.api.$raw_unset)(self.as_ptr()) };
                }
            )*
        }
    };
}

timestamp_accessors! {
    atime, set_atime, unset_atime =>
        entry_atime, entry_atime_nsec, entry_atime_is_set, entry_set_atime, entry_unset_atime;
    mtime, set_mtime, unset_mtime =>
        entry_mtime, entry_mtime_nsec, entry_mtime_is_set, entry_set_mtime, entry_unset_mtime;
    ctime, set_ctime, unset_ctime =>
        entry_ctime, entry_ctime_nsec, entry_ctime_is_set, entry_set_ctime, entry_unset_ctime;
    birthtime, set_birthtime, unset_birthtime =>
        entry_birthtime, entry_birthtime_nsec, entry_birthtime_is_set, entry_set_birthtime,
        entry_unset_birthtime;
}

/// Body of an entry, as owned chunks
///
/// Borrowing the entry mutably keeps metadata stable while the body streams.
pub struct Blocks<'e> {
    session: Rc<ReadInner>,
    state: Rc<Cell<EntryState>>,
    buffer: Vec<u8>,
    done: bool,
    _entry: PhantomData<&'e mut Entry>,
}

impl Blocks<'_> {
    /// End of body reached
    fn finish(&mut self) {
        self.done = true;
        if self.state.get() == EntryState::Fresh {
            self.state.set(EntryState::Consumed);
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.state.get() != EntryState::Fresh {
            self.done = true;
            return Some(Err(LifecycleError::NotCurrent.into()));
        }
        let Some(a) = self.session.handle() else {
            self.done = true;
            return Some(Err(LifecycleError::NotCurrent.into()));
        };

        let api = self.session.api;
        let n = unsafe {
            (api.read_data)(a, self.buffer.as_mut_ptr() as *mut c_void, self.buffer.len())
        };
        match status::check_len(api, a, n) {
            Ok(0) => {
                self.finish();
                None
            }
            Ok(n) => Some(Ok(self.buffer[..n].to_vec())),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| {
        ArchiveError::InvalidArgument(format!(
            "interior NUL at byte {} of {:?}",
            e.nul_position(),
            String::from_utf8_lossy(bytes)
        ))
    })
}

fn out_of_range(field: &str, value: impl fmt::Display) -> ArchiveError {
    ArchiveError::Failure(EngineError {
        message: ErrorMessage::Text(format!("{} out of range: {}", field, value)),
        errno: libc::ERANGE,
        retcode: ARCHIVE_FAILED,
        session: SessionRef::none(),
    })
}
