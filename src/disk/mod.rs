//! Filesystem bridges: mirroring trees into archives and extracting them back

pub mod flags;
mod extract;
mod mirror;

#[cfg(unix)]
pub use extract::extract_fd;
pub use extract::{extract_entries, extract_file, extract_memory};
pub use flags::{ExtractFlags, ReadDiskFlags};
pub use mirror::DiskOptions;
