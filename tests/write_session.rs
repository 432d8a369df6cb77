//! Write-session protocol, finalisation and configuration errors

#[macro_use]
mod common;

use common::{can_write, contents, payload};
use libarchive_bridge::{
    ArchiveError, ArchiveSink, Entry, FileType, MemoryEntry, ReadOptions, Unsupported,
    WriteOptions,
};
use std::cell::Cell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

struct CountingSink {
    opened: Rc<Cell<usize>>,
    written: Rc<Cell<usize>>,
}

impl ArchiveSink for CountingSink {
    fn open(&mut self) -> io::Result<()> {
        self.opened.set(self.opened.get() + 1);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.written.set(self.written.get() + data.len());
        Ok(data.len())
    }
}

#[test]
fn test_unsupported_format_fails_before_io() {
    require_engine!();
    let opened = Rc::new(Cell::new(0));
    let sink = CountingSink {
        opened: Rc::clone(&opened),
        written: Rc::new(Cell::new(0)),
    };

    let err = WriteOptions::new("no-such-format").open_sink(sink).err().unwrap();
    assert!(
        matches!(&err, ArchiveError::Unsupported(Unsupported::WriteFormat(f)) if f == "no-such-format"),
        "{:?}",
        err
    );
    assert_eq!(opened.get(), 0);

    let err = WriteOptions::new("ustar").filter("rot13").open_vec(&mut Vec::new()).err().unwrap();
    assert!(matches!(err, ArchiveError::Unsupported(Unsupported::WriteFilter(_))));

    let err = ReadOptions::new().format("no-such-format").open_memory(b"").err().unwrap();
    assert!(matches!(err, ArchiveError::Unsupported(Unsupported::ReadFormat(_))));

    let err = ReadOptions::new().filter(["gzip", "rot13"]).open_memory(b"").err().unwrap();
    assert!(matches!(err, ArchiveError::Unsupported(Unsupported::ReadFilter(_))));
}

#[test]
fn test_empty_chunk_ends_the_body() {
    require_engine!();
    let mut buf = Vec::new();
    let chunks: [&[u8]; 3] = [b"abc", b"", b"never"];
    WriteOptions::new("ustar")
        .open_vec(&mut buf)
        .unwrap()
        .run(|w| w.add_file_from_memory(&MemoryEntry::new("f", 3), chunks))
        .unwrap();

    let files = contents(&buf);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].2, b"abc");
}

#[test]
fn test_memory_entries_of_every_kind() {
    require_engine!();
    let mut buf = Vec::new();
    WriteOptions::new("pax")
        .open_vec(&mut buf)
        .unwrap()
        .run(|w| {
            w.add_file_from_memory(
                &MemoryEntry::new("d", 0).file_type(FileType::Directory).perm(0o750),
                std::iter::empty::<&[u8]>(),
            )?;
            w.add_file_from_memory(&MemoryEntry::new("d/x", 2).perm(0o600), [b"xx"])?;
            w.add_file_from_memory(
                &MemoryEntry::new("fifo", 0).file_type(FileType::Fifo),
                std::iter::empty::<&[u8]>(),
            )
        })
        .unwrap();

    let mut reader = ReadOptions::new().open_memory(&buf).unwrap();
    let d = reader.next_entry().unwrap().unwrap();
    assert!(d.is_dir());
    assert_eq!(d.perm(), 0o750);
    let x = reader.next_entry().unwrap().unwrap();
    assert_eq!(x.perm(), 0o600);
    assert!(x.strmode().starts_with("-rw-------"));
    let fifo = reader.next_entry().unwrap().unwrap();
    assert!(fifo.is_fifo());
    assert!(!fifo.is_file());
}

#[test]
fn test_abort_leaves_output_unfinished() {
    require_engine!();
    let body = payload(3000);

    let mut committed = Vec::new();
    {
        let mut w = WriteOptions::new("ustar").open_vec(&mut committed).unwrap();
        w.add_file_from_memory(&MemoryEntry::new("f", 3000), [&body]).unwrap();
        w.close().unwrap();
    }

    let mut aborted = Vec::new();
    {
        let mut w = WriteOptions::new("ustar").open_vec(&mut aborted).unwrap();
        w.add_file_from_memory(&MemoryEntry::new("f", 3000), [&body]).unwrap();
        w.abort();
    }

    let mut failed = Vec::new();
    let result = WriteOptions::new("ustar").open_vec(&mut failed).unwrap().run(|w| {
        w.add_file_from_memory(&MemoryEntry::new("f", 3000), [&body])?;
        Err::<(), _>(ArchiveError::InvalidArgument("caller gave up".into()))
    });
    assert!(matches!(result, Err(ArchiveError::InvalidArgument(_))));

    assert!(aborted.len() < committed.len());
    assert!(failed.len() < committed.len());
    assert_eq!(contents(&committed)[0].2, body);
}

#[test]
fn test_low_level_protocol() {
    require_engine!();
    let mut buf = Vec::new();
    let mut w = WriteOptions::new("gnutar").filter("gzip").open_vec(&mut buf).unwrap();
    assert_eq!(w.filter_names(), ["gzip"]);

    let mut entry = Entry::new().unwrap();
    entry.set_pathname("manual.txt").unwrap();
    entry.set_file_type(FileType::Regular);
    entry.set_perm(0o644).unwrap();
    entry.set_size(Some(11)).unwrap();
    entry.set_mtime((1_700_000_000i64, 5i64)).unwrap();

    w.write_header(&entry).unwrap();
    assert_eq!(w.write_data(b"hello ").unwrap(), 6);
    w.write_all(b"world").unwrap();
    w.finish_entry().unwrap();

    // A second header without finish_entry finishes the first implicitly
    entry.set_pathname("second.txt").unwrap();
    entry.set_size(Some(1)).unwrap();
    w.write_header(&entry).unwrap();
    w.write_data(b"2").unwrap();
    entry.set_pathname("third.txt").unwrap();
    w.write_header(&entry).unwrap();
    w.write_data(b"3").unwrap();
    w.close().unwrap();

    let files = contents(&buf);
    let names: Vec<&str> = files.iter().map(|f| f.0.as_str()).collect();
    assert_eq!(names, ["manual.txt", "second.txt", "third.txt"]);
    assert_eq!(files[0].2, b"hello world");
    assert_eq!(files[2].2, b"3");
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_short_body_warns_and_is_padded() {
    require_engine!();
    let captured = Captured::default();
    let sink = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();

    let mut buf = Vec::new();
    tracing::subscriber::with_default(subscriber, || {
        WriteOptions::new("ustar")
            .open_vec(&mut buf)
            .unwrap()
            .run(|w| w.add_file_from_memory(&MemoryEntry::new("short", 10), [b"1234"]))
            .unwrap();
    });

    let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(logged.contains("WARN"), "{}", logged);
    assert!(logged.contains("declares 10 bytes but 4"), "{}", logged);

    let files = contents(&buf);
    assert_eq!(files[0].2.len(), 10);
    assert_eq!(&files[0].2[..4], b"1234");
}

#[test]
fn test_zip_passphrase_round_trip() {
    require_engine!();
    if !can_write("zip", None) {
        return;
    }
    let api = libarchive_bridge::ffi::engine().unwrap();

    let mut buf = Vec::new();
    let written = WriteOptions::new("zip")
        .passphrase("correct horse")
        .open_vec(&mut buf)
        .and_then(|s| s.run(|w| w.add_file_from_memory(&MemoryEntry::new("s", 6), [b"secret"])));
    match written {
        Ok(()) => {}
        Err(ArchiveError::Unsupported(Unsupported::Encryption { .. })) => {
            assert!(api.optional.write_set_passphrase.is_none());
            return;
        }
        Err(e) => panic!("{}", e),
    }

    let mut reader = ReadOptions::new()
        .passphrase("correct horse")
        .open_memory(&buf)
        .unwrap();
    let mut entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.read_to_vec().unwrap(), b"secret");

    let mut locked = ReadOptions::new().open_memory(&buf).unwrap();
    let mut entry = locked.next_entry().unwrap().unwrap();
    assert!(entry.read_to_vec().is_err());
}

#[test]
fn test_sizeless_special_entries_in_cpio() {
    require_engine!();
    for format in ["cpio_newc", "cpio_odc"] {
        if !can_write(format, None) {
            continue;
        }
        let mut buf = Vec::new();
        let mut session = WriteOptions::new(format).open_vec(&mut buf).unwrap();

        let mut dir = Entry::new().unwrap();
        dir.set_pathname("dir").unwrap();
        dir.set_file_type(FileType::Directory);
        dir.set_perm(0o755).unwrap();
        session.write_header(&dir).unwrap();
        session.finish_entry().unwrap();
        // The caller's entry keeps its unset size
        assert_eq!(dir.size(), None);

        let mut link = Entry::new().unwrap();
        link.set_pathname("dir/link").unwrap();
        link.set_file_type(FileType::Symlink);
        link.set_symlink("target").unwrap();
        session.write_header(&link).unwrap();
        session.finish_entry().unwrap();

        let mut fifo = MemoryEntry::new("dir/fifo", 0).file_type(FileType::Fifo);
        fifo.size = None;
        session
            .add_file_from_memory(&fifo, std::iter::empty::<&[u8]>())
            .unwrap();
        session.close().unwrap();

        let files = contents(&buf);
        let kinds: Vec<(&str, Option<FileType>)> =
            files.iter().map(|(p, t, _)| (p.as_str(), *t)).collect();
        assert_eq!(
            kinds,
            [
                ("dir", Some(FileType::Directory)),
                ("dir/link", Some(FileType::Symlink)),
                ("dir/fifo", Some(FileType::Fifo)),
            ],
            "{}",
            format
        );
    }
}

#[test]
fn test_surplus_body_bytes_are_reported() {
    require_engine!();
    let captured = Captured::default();
    let sink = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .finish();

    let mut buf = Vec::new();
    tracing::subscriber::with_default(subscriber, || {
        WriteOptions::new("ustar")
            .open_vec(&mut buf)
            .unwrap()
            .run(|w| w.add_file_from_memory(&MemoryEntry::new("long", 4), [b"0123456789"]))
            .unwrap();
    });

    let logged = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
    assert!(logged.contains("WARN"), "{}", logged);
    assert!(logged.contains("long: engine accepted no more body data, 6 bytes dropped"), "{}", logged);

    let files = contents(&buf);
    assert_eq!(files[0].2, b"0123");
}
