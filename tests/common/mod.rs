//! Shared helpers for the integration tests
//!
//! Everything here needs a loadable libarchive; tests call
//! `require_engine!()` first and return early without one.

#![allow(dead_code)]

use libarchive_bridge::{Entry, FileType, MemoryEntry, ReadOptions, WriteOptions, WriteSession};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

macro_rules! require_engine {
    () => {
        if let Err(e) = libarchive_bridge::ffi::engine() {
            eprintln!("skipping, libarchive not loadable: {}", e);
            return;
        }
    };
}

/// Serialises tests that change the process working directory
static CWD_LOCK: Mutex<()> = Mutex::new(());

/// Working directory switched for the lifetime of the guard
pub struct InDir {
    previous: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

pub fn in_dir(path: &Path) -> InDir {
    let guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let previous = env::current_dir().unwrap();
    env::set_current_dir(path).unwrap();
    InDir {
        previous,
        _guard: guard,
    }
}

impl Drop for InDir {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.previous);
    }
}

/// Deterministic, non-repeating-looking payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 7) % 251) as u8).collect()
}

pub fn can_write(format: &str, filter: Option<&str>) -> bool {
    let caps = libarchive_bridge::capabilities().unwrap();
    caps.has_write_format(format) && filter.map_or(true, |f| caps.has_write_filter(f))
}

/// Directory with an empty file, a `size`-byte file and a symlink to it
pub fn sample_tree(parent: &Path, size: usize) -> PathBuf {
    let root = parent.join("tree");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("empty"), b"").unwrap();
    fs::write(root.join("data.bin"), payload(size)).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("data.bin", root.join("link")).unwrap();
    root
}

pub fn add_symlink(session: &mut WriteSession<'_>, path: &str, target: &str) {
    let mut entry = Entry::new().unwrap();
    entry.set_pathname(path).unwrap();
    entry.set_file_type(FileType::Symlink);
    entry.set_perm(0o777).unwrap();
    entry.set_symlink(target).unwrap();
    session.write_header(&entry).unwrap();
    session.finish_entry().unwrap();
}

/// Archive holding `(name, body)` regular files, in order
pub fn archive_of(format: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut session = WriteOptions::new(format).open_vec(&mut buf).unwrap();
    for (name, body) in files {
        session
            .add_file_from_memory(&MemoryEntry::new(*name, body.len() as u64), [body])
            .unwrap();
    }
    session.close().unwrap();
    buf
}

/// Every entry of an in-memory archive as `(path, type, body)`
pub fn contents(data: &[u8]) -> Vec<(String, Option<FileType>, Vec<u8>)> {
    ReadOptions::new()
        .open_memory(data)
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let body = entry.read_to_vec().unwrap();
            let path = entry.pathname().unwrap();
            (path.trim_end_matches('/').to_string(), entry.file_type(), body)
        })
        .collect()
}
