//! Filesystem trees into a write session
//!
//! The walk itself is libarchive's read-from-disk mode, so entries carry
//! whatever metadata the engine captures natively (ACLs, xattrs, fflags
//! unless disabled). This module only rewrites the stored paths and copies
//! regular-file bodies.

use super::flags::ReadDiskFlags;
use crate::entry::{Entry, EntryAttributes, FileType};
use crate::error::{ArchiveError, EngineError, ErrorMessage, Result, SessionRef};
use crate::ffi::{archive, Engine, ARCHIVE_EOF, ARCHIVE_FAILED};
use crate::read::path_cstring;
use crate::status;
use crate::write::WriteSession;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::debug;

/// OS errors that mean "this node has no readable body" rather than a failure
#[cfg(unix)]
const NO_BODY_ERRNOS: &[i32] = &[libc::EISDIR];
#[cfg(not(unix))]
const NO_BODY_ERRNOS: &[i32] = &[];

/// How [`WriteSession::add_files`] walks and names things
#[derive(Debug, Clone)]
pub struct DiskOptions {
    /// `archive_read_disk_set_behavior` flags
    pub flags: ReadDiskFlags,
    /// Fill in user and group names from the system databases
    pub standard_lookup: bool,
    /// Descend into directories
    pub recursive: bool,
    /// Archive what symlinks point to instead of the links
    pub follow_symlinks: bool,
    /// Store each walked root under this name instead of its own path
    pub destination: Option<PathBuf>,
    /// Overrides applied to every mirrored entry
    pub attributes: EntryAttributes,
}

impl Default for DiskOptions {
    fn default() -> Self {
        DiskOptions {
            flags: ReadDiskFlags::default(),
            standard_lookup: false,
            recursive: true,
            follow_symlinks: false,
            destination: None,
            attributes: EntryAttributes::default(),
        }
    }
}

impl DiskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: ReadDiskFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn standard_lookup(mut self, enabled: bool) -> Self {
        self.standard_lookup = enabled;
        self
    }

    pub fn recursive(mut self, enabled: bool) -> Self {
        self.recursive = enabled;
        self
    }

    pub fn follow_symlinks(mut self, enabled: bool) -> Self {
        self.follow_symlinks = enabled;
        self
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn attributes(mut self, attributes: EntryAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A read-from-disk handle, freed on drop
struct DiskReader {
    api: &'static Engine,
    handle: NonNull<archive>,
}

impl DiskReader {
    fn open(api: &'static Engine, root: &Path, options: &DiskOptions) -> Result<Self> {
        let c_root = path_cstring(root)?;
        let handle = status::check_null(unsafe { (api.read_disk_new)() }, "archive_read_disk_new")?;
        let disk = DiskReader { api, handle };
        let a = disk.raw();

        status::check(api, a, unsafe { (api.read_disk_set_behavior)(a, options.flags.bits()) })?;
        if options.standard_lookup {
            status::check(api, a, unsafe { (api.read_disk_set_standard_lookup)(a) })?;
        }
        let symlink_mode = if options.follow_symlinks {
            api.read_disk_set_symlink_logical
        } else {
            api.read_disk_set_symlink_physical
        };
        status::check(api, a, unsafe { symlink_mode(a) })?;
        status::check(api, a, unsafe { (api.read_disk_open)(a, c_root.as_ptr()) })?;
        Ok(disk)
    }

    fn raw(&self) -> *mut archive {
        self.handle.as_ptr()
    }
}

impl Drop for DiskReader {
    fn drop(&mut self) {
        unsafe { (self.api.read_free)(self.raw()) };
    }
}

impl WriteSession<'_> {
    /// Walk each path and write everything found under it
    ///
    /// Stored names lose their leading `/`. With a destination set, the
    /// walked root is replaced by the destination. Regular files are copied
    /// in engine-block-sized reads; other nodes get a header only.
    pub fn add_files<I, P>(&mut self, paths: I, options: &DiskOptions) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut entry = Entry::with_codec(self.codec)?;
        let mut buf = vec![0u8; self.bytes_per_block()];
        for path in paths {
            self.mirror(path.as_ref(), options, &mut entry, &mut buf)?;
        }
        Ok(())
    }

    fn mirror(
        &mut self,
        root: &Path,
        options: &DiskOptions,
        entry: &mut Entry,
        buf: &mut [u8],
    ) -> Result<()> {
        let api = self.api;
        let disk = DiskReader::open(api, root, options)?;
        let rd = disk.raw();
        let root_bytes = path_bytes(root);
        let destination = options.destination.as_deref().map(path_bytes);

        debug!("Mirroring {}", root.display());
        loop {
            let r = unsafe { (api.read_next_header2)(rd, entry.as_ptr()) };
            if r == ARCHIVE_EOF {
                break;
            }
            status::check(api, rd, r)?;

            let walked = entry.pathname_bytes().unwrap_or_default();
            let source = entry
                .sourcepath_bytes()
                .map(|b| bytes_path(&b))
                .unwrap_or_else(|| bytes_path(&walked));
            entry.set_pathname(stored_name(&root_bytes, &walked, destination.as_deref()))?;
            entry.set_attributes(&options.attributes)?;
            if options.recursive {
                status::check(api, rd, unsafe { (api.read_disk_descend)(rd) })?;
            }

            self.write_header(entry)?;
            if entry.file_type() == Some(FileType::Regular) {
                self.copy_body(&source, buf)?;
            }
            self.finish_entry()?;
            entry.clear();
        }
        Ok(())
    }

    fn copy_body(&mut self, source: &Path, buf: &mut [u8]) -> Result<()> {
        let mut file = match File::open(source) {
            Ok(file) => file,
            Err(e) if has_no_body(&e) => return Ok(()),
            Err(e) => return Err(self.host_failure(source, &e)),
        };
        loop {
            let n = match file.read(buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if has_no_body(&e) => {
                    debug!("{}: {}, writing header only", source.display(), e);
                    return Ok(());
                }
                Err(e) => return Err(self.host_failure(source, &e)),
            };
            self.write_all(&buf[..n])?;
        }
    }

    fn host_failure(&self, path: &Path, e: &io::Error) -> ArchiveError {
        ArchiveError::Failure(EngineError {
            message: ErrorMessage::Text(format!("{}: {}", path.display(), e)),
            errno: e.raw_os_error().unwrap_or(0),
            retcode: ARCHIVE_FAILED,
            session: SessionRef::of(self.raw()),
        })
    }
}

fn has_no_body(e: &io::Error) -> bool {
    e.raw_os_error()
        .map_or(false, |code| NO_BODY_ERRNOS.contains(&code))
}

/// Name to store for a walked path
fn stored_name(root: &[u8], walked: &[u8], destination: Option<&[u8]>) -> Vec<u8> {
    let name = match destination {
        Some(dest) => {
            debug_assert!(
                walked.starts_with(root),
                "walked path {:?} is outside root {:?}",
                String::from_utf8_lossy(walked),
                String::from_utf8_lossy(root)
            );
            let rest = trim_leading_slashes(walked.strip_prefix(root).unwrap_or(walked));
            let dest = trim_trailing_slashes(dest);
            if rest.is_empty() {
                dest.to_vec()
            } else {
                let mut joined = Vec::with_capacity(dest.len() + 1 + rest.len());
                joined.extend_from_slice(dest);
                joined.push(b'/');
                joined.extend_from_slice(rest);
                joined
            }
        }
        None => walked.to_vec(),
    };
    trim_leading_slashes(&name).to_vec()
}

fn trim_leading_slashes(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != b'/').unwrap_or(bytes.len());
    &bytes[start..]
}

fn trim_trailing_slashes(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b'/').map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn bytes_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
