//! Entry lifecycle and read-session protocol

#[macro_use]
mod common;

use common::{archive_of, payload};
use libarchive_bridge::{
    ArchiveError, Entry, EntryState, LifecycleError, ReadOptions,
};

fn lifecycle(err: ArchiveError) -> LifecycleError {
    match err {
        ArchiveError::Lifecycle(e) => e,
        other => panic!("expected a lifecycle error, got {:?}", other),
    }
}

#[test]
fn test_body_reads_once() {
    require_engine!();
    let data = archive_of("ustar", &[("a", b"alpha"), ("b", b"beta")]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut a = reader.next_entry().unwrap().unwrap();
    assert_eq!(a.state(), EntryState::Fresh);
    assert_eq!(a.read_to_vec().unwrap(), b"alpha");
    assert_eq!(a.state(), EntryState::Consumed);

    let err = a.get_blocks().err().unwrap();
    assert_eq!(lifecycle(err), LifecycleError::Consumed);
}

#[test]
fn test_advancing_passes_the_previous_entry() {
    require_engine!();
    let data = archive_of("ustar", &[("a", b"alpha"), ("b", b"beta")]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut a = reader.next_entry().unwrap().unwrap();
    let mut b = reader.next_entry().unwrap().unwrap();

    assert_eq!(a.state(), EntryState::Passed);
    let err = a.get_blocks().err().unwrap();
    assert_eq!(lifecycle(err), LifecycleError::NotCurrent);
    // Metadata survives the advance
    assert_eq!(a.pathname().as_deref(), Some("a"));
    assert_eq!(a.size(), Some(5));

    // The failed attempt did not disturb the current entry
    assert_eq!(b.read_to_vec().unwrap(), b"beta");
}

#[test]
fn test_consumed_and_passed_are_distinct() {
    require_engine!();
    let data = archive_of("pax", &[("a", b"1"), ("b", b"2"), ("c", b"3")]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut a = reader.next_entry().unwrap().unwrap();
    a.read_to_vec().unwrap();
    let _b = reader.next_entry().unwrap().unwrap();

    // Consumed stays consumed after the session moves on
    assert_eq!(a.state(), EntryState::Consumed);
    assert_eq!(lifecycle(a.read_to_vec().unwrap_err()), LifecycleError::Consumed);
}

#[test]
fn test_unbound_entries_have_no_body() {
    require_engine!();

    let mut entry = Entry::new().unwrap();
    assert_eq!(entry.state(), EntryState::Unbound);
    assert_eq!(lifecycle(entry.get_blocks().err().unwrap()), LifecycleError::Unbound);

    let data = archive_of("ustar", &[("a", b"alpha")]);
    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let current = reader.next_entry().unwrap().unwrap();
    let mut copy = current.clone_metadata().unwrap();
    assert_eq!(copy.pathname().as_deref(), Some("a"));
    assert_eq!(lifecycle(copy.read_to_vec().unwrap_err()), LifecycleError::Unbound);
}

#[test]
fn test_closed_session_invalidates_current_entry() {
    require_engine!();
    let data = archive_of("ustar", &[("a", b"alpha")]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut a = reader.next_entry().unwrap().unwrap();
    reader.close().unwrap();

    assert_eq!(lifecycle(a.read_to_vec().unwrap_err()), LifecycleError::NotCurrent);
}

#[test]
fn test_partial_read_is_passed_on_advance() {
    require_engine!();
    let big = payload(50_000);
    let data = archive_of("ustar", &[("big", &big[..]), ("next", b"after")]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut first = reader.next_entry().unwrap().unwrap();
    {
        let mut blocks = first.get_blocks_sized(1024).unwrap();
        assert_eq!(blocks.next().unwrap().unwrap(), &big[..1024]);
    }
    // Not read to the end, but the stream cannot be restarted
    assert_eq!(first.state(), EntryState::Fresh);
    assert_eq!(lifecycle(first.get_blocks().err().unwrap()), LifecycleError::Consumed);

    // The engine skips the unread remainder on advance
    let mut next = reader.next_entry().unwrap().unwrap();
    assert_eq!(first.state(), EntryState::Passed);
    assert_eq!(lifecycle(first.get_blocks().err().unwrap()), LifecycleError::NotCurrent);
    assert_eq!(next.pathname().as_deref(), Some("next"));
    assert_eq!(next.read_to_vec().unwrap(), b"after");
}

#[test]
fn test_full_drain_then_advance_stays_consumed() {
    require_engine!();
    let data = archive_of("ustar", &[("a", b"alpha"), ("b", b"beta")]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut a = reader.next_entry().unwrap().unwrap();
    let blocks: Vec<Vec<u8>> = a.get_blocks().unwrap().map(Result::unwrap).collect();
    assert_eq!(blocks.concat(), b"alpha");
    let _b = reader.next_entry().unwrap().unwrap();
    assert_eq!(a.state(), EntryState::Consumed);
}

#[test]
fn test_end_of_entries_is_not_an_error() {
    require_engine!();
    let data = archive_of("ustar", &[]);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    assert!(reader.next_entry().unwrap().is_none());
    assert!(reader.next_entry().unwrap().is_none());
    assert!(reader.next().is_none());
}

#[test]
fn test_iterator_yields_in_order() {
    require_engine!();
    let data = archive_of("gnutar", &[("one", b"1"), ("two", b"22"), ("three", b"333")]);

    let names: Vec<(String, Option<u64>)> = ReadOptions::new()
        .open_memory(&data)
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.to_string(), e.size())
        })
        .collect();
    assert_eq!(
        names,
        [
            ("one".to_string(), Some(1)),
            ("two".to_string(), Some(2)),
            ("three".to_string(), Some(3))
        ]
    );
}

#[test]
fn test_unrecognised_input_fails_at_open() {
    require_engine!();
    let garbage: Vec<u8> = (0..2048u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();

    let err = ReadOptions::new().open_memory(&garbage).err().unwrap();
    let engine = err.engine().expect("engine error");
    assert!(!engine.message.as_bytes().is_empty());
    assert!(engine.retcode < 0);
    assert_ne!(engine.errno, 0);
}

#[test]
fn test_truncated_body_raises() {
    require_engine!();
    let big = payload(20_000);
    let mut data = archive_of("ustar", &[("big", &big[..])]);
    data.truncate(4096);

    let mut reader = ReadOptions::new().open_memory(&data).unwrap();
    let mut entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.size(), Some(20_000));
    let err = entry.read_to_vec().unwrap_err();
    assert!(err.engine().is_some(), "{:?}", err);
    // The body never reached its end, and the failed stream is spent
    assert_eq!(entry.state(), EntryState::Fresh);
    assert_eq!(lifecycle(entry.get_blocks().err().unwrap()), LifecycleError::Consumed);
}
