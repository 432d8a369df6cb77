//! # libarchive-bridge - Safe Rust sessions over libarchive
//!
//! `libarchive-bridge` drives the system's libarchive (loaded at runtime) to
//! read and write tar, pax, zip, 7z, cpio and the other formats the engine
//! was built with, through any compression filter it supports.
//!
//! - **Read sessions** iterate headers and stream each entry's body once
//! - **Write sessions** run header / body / finish per entry and commit on close
//! - **Callback bridge** turns any `Read`, `Read + Seek` or `Write` into an
//!   engine stream
//! - **Disk mirror** walks directory trees into archives and extracts them
//!   back with path-escape protection on by default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use libarchive_bridge::{ReadOptions, Result};
//!
//! # fn main() -> Result<()> {
//! for entry in ReadOptions::new().open_file("backup.tar.gz")? {
//!     let mut entry = entry?;
//!     let body = entry.read_to_vec()?;
//!     println!("{} ({} bytes)", entry, body.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing
//!
//! ```rust,no_run
//! use libarchive_bridge::{DiskOptions, MemoryEntry, Result, WriteOptions};
//!
//! # fn main() -> Result<()> {
//! WriteOptions::new("pax")
//!     .filter("zstd")
//!     .open_file("site.tar.zst")?
//!     .run(|archive| {
//!         archive.add_files(["public"], &DiskOptions::new().destination("site"))?;
//!         archive.add_file_from_memory(&MemoryEntry::new("VERSION", 6), [b"1.0.0\n"])
//!     })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Extracting
//!
//! ```rust,no_run
//! use libarchive_bridge::{extract_file, ExtractFlags, Result};
//!
//! # fn main() -> Result<()> {
//! // Absolute paths, `..` and writes through symlinks are rejected
//! extract_file("upload.zip", None)?;
//!
//! // Explicit flags replace the default entirely
//! extract_file("trusted.tar", Some(ExtractFlags::PREVENT_ESCAPE | ExtractFlags::TIME))?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod disk;
pub mod entry;
pub mod error;
pub mod ffi;
pub mod io;
pub mod read;
pub mod registry;
pub mod status;
pub mod write;

pub use codec::HeaderCodec;
#[cfg(unix)]
pub use disk::extract_fd;
pub use disk::{
    extract_entries, extract_file, extract_memory, DiskOptions, ExtractFlags, ReadDiskFlags,
};
pub use entry::{
    Blocks, Entry, EntryAttributes, EntryInfo, EntryName, EntryState, FileType, Timestamp,
};
pub use error::{
    ArchiveError, EngineError, ErrorMessage, LifecycleError, Result, SessionRef, Unsupported,
};
pub use io::{ArchiveSink, ArchiveSource, SeekableSource, StreamSink, StreamSource};
pub use read::{ReadOptions, ReadSession, Selection};
pub use registry::Capabilities;
pub use status::Status;
pub use write::{MemoryEntry, WriteOptions, WriteSession};

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Which libarchive this process is using
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// `ARCHIVE_VERSION_NUMBER` style, e.g. `3007002`
    pub version_number: i32,
    pub version: String,
    /// Path or soname the library was opened from
    pub path: String,
}

/// Load the engine if needed and describe it
pub fn engine_info() -> Result<EngineInfo> {
    let engine = ffi::engine()?;
    Ok(EngineInfo {
        version_number: engine.version_number(),
        version: engine.version().to_string(),
        path: engine.path().to_string(),
    })
}

/// Formats and filters the loaded engine supports
///
/// ```rust,no_run
/// # fn main() -> libarchive_bridge::Result<()> {
/// let caps = libarchive_bridge::capabilities()?;
/// if caps.has_write_filter("zstd") {
///     println!("zstd available");
/// }
/// println!("{}", caps.write_formats().collect::<Vec<_>>().join(", "));
/// # Ok(())
/// # }
/// ```
pub fn capabilities() -> Result<&'static Capabilities> {
    Ok(&ffi::engine()?.capabilities)
}

/// Default block size for callback buffers
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        {
            let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if n > 0 {
                return n as usize;
            }
        }
        4096
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_sane() {
        let size = page_size();
        assert!(size >= 512);
        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn test_engine_info_matches_engine() {
        let Ok(engine) = ffi::engine() else {
            eprintln!("libarchive not available, skipping");
            return;
        };
        let info = engine_info().unwrap();
        assert_eq!(info.version, engine.version());
        assert!(info.version.starts_with("libarchive"));
        assert!(info.version_number >= 3_000_000);
        assert!(capabilities().unwrap().has_write_format("ustar"));
    }
}
