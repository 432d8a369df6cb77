//! Capability table
//!
//! libarchive exposes one registration function per format and filter
//! (`archive_read_support_format_tar`, `archive_write_add_filter_xz`, ...).
//! Which of them exist depends on the version and build options of the
//! loaded library, so every known name is probed once when the engine is
//! loaded. Lookups afterwards are plain map reads that answer with a typed
//! [`Unsupported`] error.

use crate::error::{Result, Unsupported};
use crate::ffi::SupportFn;
use libloading::Library;
use std::collections::BTreeMap;
use tracing::debug;

/// Formats the read side knows about
pub const READ_FORMATS: &[&str] = &[
    "7zip",
    "all",
    "ar",
    "cab",
    "cpio",
    "empty",
    "iso9660",
    "lha",
    "mtree",
    "rar",
    "rar5",
    "raw",
    "tar",
    "warc",
    "xar",
    "zip",
    "zip_seekable",
    "zip_streamable",
];

/// Filters the read side knows about
pub const READ_FILTERS: &[&str] = &[
    "all", "bzip2", "compress", "grzip", "gzip", "lrzip", "lz4", "lzip", "lzma", "lzop", "none",
    "rpm", "uu", "xz", "zstd",
];

/// Formats the write side knows about
pub const WRITE_FORMATS: &[&str] = &[
    "7zip",
    "ar_bsd",
    "ar_svr4",
    "cpio",
    "cpio_newc",
    "cpio_odc",
    "gnutar",
    "iso9660",
    "mtree",
    "mtree_classic",
    "pax",
    "pax_restricted",
    "raw",
    "shar",
    "shar_dump",
    "ustar",
    "v7tar",
    "warc",
    "xar",
    "zip",
];

/// Filters the write side knows about
pub const WRITE_FILTERS: &[&str] = &[
    "b64encode",
    "bzip2",
    "compress",
    "grzip",
    "gzip",
    "lrzip",
    "lz4",
    "lzip",
    "lzma",
    "lzop",
    "uuencode",
    "xz",
    "zstd",
];

type Table = BTreeMap<&'static str, SupportFn>;

/// Read-only map of what the loaded engine can do
pub struct Capabilities {
    read_formats: Table,
    read_filters: Table,
    write_formats: Table,
    write_filters: Table,
}

impl Capabilities {
    /// Resolve every known registration function in `lib`
    ///
    /// # Safety
    /// `lib` must be libarchive; the resolved symbols are typed as
    /// `int (*)(struct archive *)`.
    pub(crate) unsafe fn probe(lib: &Library) -> Self {
        Capabilities {
            read_formats: probe_table(lib, "archive_read_support_format_", READ_FORMATS),
            read_filters: probe_table(lib, "archive_read_support_filter_", READ_FILTERS),
            write_formats: probe_table(lib, "archive_write_set_format_", WRITE_FORMATS),
            write_filters: probe_table(lib, "archive_write_add_filter_", WRITE_FILTERS),
        }
    }

    pub fn read_formats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.read_formats.keys().copied()
    }

    pub fn read_filters(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.read_filters.keys().copied()
    }

    pub fn write_formats(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.write_formats.keys().copied()
    }

    pub fn write_filters(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.write_filters.keys().copied()
    }

    pub fn has_read_format(&self, name: &str) -> bool {
        self.read_formats.contains_key(name)
    }

    pub fn has_read_filter(&self, name: &str) -> bool {
        self.read_filters.contains_key(name)
    }

    pub fn has_write_format(&self, name: &str) -> bool {
        self.write_formats.contains_key(name)
    }

    pub fn has_write_filter(&self, name: &str) -> bool {
        self.write_filters.contains_key(name)
    }

    pub(crate) fn read_format(&self, name: &str) -> Result<SupportFn> {
        lookup(&self.read_formats, name, Unsupported::ReadFormat)
    }

    pub(crate) fn read_filter(&self, name: &str) -> Result<SupportFn> {
        lookup(&self.read_filters, name, Unsupported::ReadFilter)
    }

    pub(crate) fn write_format(&self, name: &str) -> Result<SupportFn> {
        lookup(&self.write_formats, name, Unsupported::WriteFormat)
    }

    pub(crate) fn write_filter(&self, name: &str) -> Result<SupportFn> {
        lookup(&self.write_filters, name, Unsupported::WriteFilter)
    }
}

unsafe fn probe_table(lib: &Library, prefix: &str, names: &[&'static str]) -> Table {
    let mut table = Table::new();
    for &name in names {
        let symbol = format!("{}{}\0", prefix, name);
        match lib.get::<SupportFn>(symbol.as_bytes()) {
            Ok(f) => {
                table.insert(name, *f);
            }
            Err(_) => debug!("libarchive has no {}{}", prefix, name),
        }
    }
    table
}

fn lookup(table: &Table, name: &str, missing: fn(String) -> Unsupported) -> Result<SupportFn> {
    table
        .get(name)
        .copied()
        .ok_or_else(|| missing(name.to_string()).into())
}
