//! Extraction through the engine's write-to-disk mode

#![cfg(unix)]

#[macro_use]
mod common;

use common::{archive_of, in_dir, payload, sample_tree};
use libarchive_bridge::{
    extract_entries, extract_file, extract_memory, ArchiveError, DiskOptions, ExtractFlags,
    ReadOptions, WriteOptions,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// `tmp/work` as the extraction directory, with `tmp` as the place escapes land
fn workspace() -> (TempDir, std::path::PathBuf) {
    let tmp = TempDir::new().unwrap();
    let work = tmp.path().join("work");
    fs::create_dir(&work).unwrap();
    (tmp, work)
}

#[test]
fn test_dotdot_rejected_by_default() {
    require_engine!();
    let (tmp, work) = workspace();
    let data = archive_of("ustar", &[("../escape", b"out")]);

    let _cwd = in_dir(&work);
    let err = extract_memory(&data, None).unwrap_err();
    assert!(matches!(err, ArchiveError::Failure(_)), "{:?}", err);
    assert!(!tmp.path().join("escape").exists());
}

#[test]
fn test_dotdot_allowed_when_flag_dropped() {
    require_engine!();
    let (tmp, work) = workspace();
    let data = archive_of("ustar", &[("../escape", b"out")]);

    let _cwd = in_dir(&work);
    let flags = ExtractFlags::PREVENT_ESCAPE.without(ExtractFlags::SECURE_NODOTDOT);
    extract_memory(&data, Some(flags)).unwrap();
    assert_eq!(fs::read(tmp.path().join("escape")).unwrap(), b"out");
}

#[test]
fn test_absolute_paths_rejected_by_default() {
    require_engine!();
    let (tmp, work) = workspace();
    let target = tmp.path().join("absolute.txt");
    let name = target.to_str().unwrap().to_string();
    let data = archive_of("pax", &[(name.as_str(), b"abs")]);

    let _cwd = in_dir(&work);
    assert!(extract_memory(&data, None).is_err());
    assert!(!target.exists());

    extract_memory(&data, Some(ExtractFlags::empty())).unwrap();
    assert_eq!(fs::read(&target).unwrap(), b"abs");
}

#[test]
fn test_root_working_directory_is_refused() {
    require_engine!();
    let data = archive_of("ustar", &[("never-written", b"x")]);

    let _cwd = in_dir(Path::new("/"));
    let err = extract_memory(&data, None).unwrap_err();
    assert!(matches!(err, ArchiveError::UnsafeDestination), "{:?}", err);
    assert!(!Path::new("/never-written").exists());
}

#[test]
fn test_mirror_then_extract_round_trip() {
    require_engine!();
    let (tmp, work) = workspace();
    let src = sample_tree(tmp.path(), 30_000);
    fs::create_dir(src.join("sub")).unwrap();
    fs::write(src.join("sub/inner.txt"), b"inner").unwrap();

    let archive = tmp.path().join("tree.tar.gz");
    WriteOptions::new("pax")
        .filter("gzip")
        .open_file(&archive)
        .unwrap()
        .run(|w| w.add_files([&src], &DiskOptions::new().destination("copy")))
        .unwrap();

    let _cwd = in_dir(&work);
    extract_file(&archive, None).unwrap();

    let copy = work.join("copy");
    assert_eq!(fs::read(copy.join("data.bin")).unwrap(), payload(30_000));
    assert_eq!(fs::read(copy.join("empty")).unwrap(), b"");
    assert_eq!(fs::read(copy.join("sub/inner.txt")).unwrap(), b"inner");
    assert_eq!(
        fs::read_link(copy.join("link")).unwrap(),
        Path::new("data.bin")
    );
}

#[test]
fn test_extract_entries_from_a_session() {
    require_engine!();
    let (_tmp, work) = workspace();
    let data = archive_of("gnutar", &[("a.txt", b"a"), ("dir/b.txt", b"bb")]);

    let _cwd = in_dir(&work);
    let session = ReadOptions::new().open_memory(&data).unwrap();
    extract_entries(session, Some(ExtractFlags::default() | ExtractFlags::TIME)).unwrap();

    assert_eq!(fs::read(work.join("a.txt")).unwrap(), b"a");
    assert_eq!(fs::read(work.join("dir/b.txt")).unwrap(), b"bb");
}

#[test]
fn test_extract_fd_leaves_descriptor_open() {
    use std::os::fd::AsRawFd;

    require_engine!();
    let (tmp, work) = workspace();
    let path = tmp.path().join("x.tar");
    fs::write(&path, archive_of("ustar", &[("from-fd", b"fd")])).unwrap();
    let file = fs::File::open(&path).unwrap();

    let _cwd = in_dir(&work);
    libarchive_bridge::extract_fd(file.as_raw_fd(), None).unwrap();
    assert_eq!(fs::read(work.join("from-fd")).unwrap(), b"fd");
    assert!(file.metadata().is_ok());
}

#[test]
fn test_invalid_descriptor_fails_cleanly() {
    require_engine!();
    let err = libarchive_bridge::extract_fd(-1, Some(ExtractFlags::PREVENT_ESCAPE)).unwrap_err();
    assert!(matches!(err, ArchiveError::Fatal(_)), "{:?}", err);
    assert_eq!(err.errno(), Some(libc::EBADF));
}
