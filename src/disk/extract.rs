//! Archive entries onto the filesystem
//!
//! Entries are replayed through libarchive's write-to-disk mode, which owns
//! path resolution, permission and time restoration, and the security checks
//! selected by [`ExtractFlags`]. Bodies are copied block by block with their
//! offsets so sparse files keep their holes.

use super::flags::ExtractFlags;
use crate::entry::Entry;
use crate::error::{ArchiveError, Result};
use crate::ffi::{archive, Engine};
use crate::read::ReadOptions;
use crate::status;
use std::os::raw::c_void;
use std::path::Path;
use std::ptr::NonNull;
use tracing::{debug, trace};

/// A write-to-disk handle, freed on drop
struct DiskWriter {
    api: &'static Engine,
    handle: NonNull<archive>,
}

impl DiskWriter {
    fn new(api: &'static Engine, flags: ExtractFlags) -> Result<Self> {
        let handle = status::check_null(unsafe { (api.write_disk_new)() }, "archive_write_disk_new")?;
        let writer = DiskWriter { api, handle };
        status::check(api, writer.raw(), unsafe {
            (api.write_disk_set_options)(writer.raw(), flags.bits())
        })?;
        Ok(writer)
    }

    fn raw(&self) -> *mut archive {
        self.handle.as_ptr()
    }

    fn extract(&mut self, entry: &mut Entry) -> Result<()> {
        let (api, w) = (self.api, self.raw());
        trace!("Extracting {}", entry);
        status::check(api, w, unsafe { (api.write_header)(w, entry.as_ptr()) })?;
        entry.for_each_data_block(|block, offset| {
            let n = unsafe {
                (api.write_data_block)(w, block.as_ptr() as *const c_void, block.len(), offset)
            };
            status::check_len(api, w, n).map(drop)
        })?;
        status::check(api, w, unsafe { (api.write_finish_entry)(w) })?;
        Ok(())
    }

    /// Applies deferred directory metadata
    fn close(self) -> Result<()> {
        status::check(self.api, self.raw(), unsafe { (self.api.write_close)(self.raw()) })?;
        Ok(())
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        unsafe { (self.api.write_free)(self.raw()) };
    }
}

/// Resolve the flags for one extraction
///
/// `None` means [`ExtractFlags::PREVENT_ESCAPE`], and is refused outright
/// while the working directory is `/`.
fn resolve_flags(flags: Option<ExtractFlags>) -> Result<ExtractFlags> {
    match flags {
        Some(flags) => Ok(flags),
        None => {
            if std::env::current_dir()? == Path::new("/") {
                return Err(ArchiveError::UnsafeDestination);
            }
            Ok(ExtractFlags::PREVENT_ESCAPE)
        }
    }
}

/// Write entries to disk relative to the working directory
///
/// Entries must come from a live read session, in order, so their bodies
/// are still readable.
pub fn extract_entries<I>(entries: I, flags: Option<ExtractFlags>) -> Result<()>
where
    I: IntoIterator<Item = Result<Entry>>,
{
    let flags = resolve_flags(flags)?;
    let api = crate::ffi::engine()?;
    let mut writer = DiskWriter::new(api, flags)?;
    debug!("Extracting with flags {:?}", flags);

    let mut count = 0usize;
    for entry in entries {
        writer.extract(&mut entry?)?;
        count += 1;
    }
    writer.close()?;
    debug!("Extracted {} entries", count);
    Ok(())
}

/// Extract an archive file into the working directory
pub fn extract_file(path: impl AsRef<Path>, flags: Option<ExtractFlags>) -> Result<()> {
    let flags = resolve_flags(flags)?;
    let session = ReadOptions::new().open_file(path)?;
    extract_entries(session, Some(flags))
}

/// Extract from an open descriptor; the descriptor is not closed
#[cfg(unix)]
pub fn extract_fd(fd: std::os::fd::RawFd, flags: Option<ExtractFlags>) -> Result<()> {
    let flags = resolve_flags(flags)?;
    let session = ReadOptions::new().open_fd(fd)?;
    extract_entries(session, Some(flags))
}

/// Extract an in-memory archive into the working directory
pub fn extract_memory(data: &[u8], flags: Option<ExtractFlags>) -> Result<()> {
    let flags = resolve_flags(flags)?;
    let session = ReadOptions::new().open_memory(data)?;
    extract_entries(session, Some(flags))
}
