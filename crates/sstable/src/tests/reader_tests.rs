use super::{memtable_of, small_interval};
use crate::format::TablePaths;
use crate::*;
use anyhow::Result;
use memtable::{ByteBuffer, Memtable};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::tempdir;

fn bb(s: &str) -> ByteBuffer {
    ByteBuffer::from(s.as_bytes())
}

fn flip_byte(path: &std::path::Path, offset: u64) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let mut f = OpenOptions::new().write(true).open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(&[bytes[offset as usize] ^ 0xFF])?;
    Ok(())
}

// -------------------- flush_from --------------------

#[test]
fn flush_then_get_returns_every_value() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("apple", "red"), ("banana", "yellow"), ("cherry", "dark")]);

    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;
    assert!(mem.is_empty());
    assert_eq!(mem.byte_size(), 0);

    assert_eq!(table.generation(), 1);
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(b"apple")?, Some(bb("red")));
    assert_eq!(table.get(b"banana")?, Some(bb("yellow")));
    assert_eq!(table.get(b"cherry")?, Some(bb("dark")));
    assert_eq!(table.get(b"durian")?, None);

    // Length-first order: the 5-byte key is smallest.
    assert_eq!(table.min_key(), &bb("apple"));
    assert_eq!(table.max_key(), &bb("cherry"));
    Ok(())
}

#[test]
fn flush_of_empty_memtable_fails_without_files() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    let err = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default()).unwrap_err();
    assert!(matches!(err, SSTableError::InvalidArgument(_)));
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn failed_flush_restores_memtable() -> Result<()> {
    let dir = tempdir()?;
    let opts = TableOptions::default();
    let mut first = memtable_of(&[("x", "1")]);
    SSTable::flush_from(&mut first, dir.path(), 1, &opts)?;

    // Generation 1 is taken, so this flush must fail.
    let mut mem = memtable_of(&[("a", "1"), ("bb", "22")]);
    let size_before = mem.byte_size();
    assert!(SSTable::flush_from(&mut mem, dir.path(), 1, &opts).is_err());

    assert_eq!(mem.len(), 2);
    assert_eq!(mem.byte_size(), size_before);
    assert_eq!(mem.get(b"bb"), Some(&bb("22")));
    Ok(())
}

#[test]
fn values_of_any_size_survive() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    let big = vec![b'x'; 500_000];
    mem.put(b"big", &big)?;
    mem.put(b"nil", b"")?;
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    assert_eq!(table.get(b"big")?.map(|v| v.len()), Some(500_000));
    assert_eq!(table.get(b"nil")?, Some(ByteBuffer::default()));
    Ok(())
}

#[test]
fn flushed_tombstone_reads_as_absent() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("live", "1")]);
    mem.delete(b"gone")?;
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    assert_eq!(table.len(), 2);
    assert_eq!(table.get(b"gone")?, None);
    assert_eq!(table.get_entry(b"gone")?, Some(None));
    assert_eq!(table.get_entry(b"live")?, Some(Some(bb("1"))));
    assert_eq!(table.get_entry(b"miss")?, None);

    let entries = table.iter()?.collect::<crate::Result<Vec<_>>>()?;
    assert_eq!(entries, vec![(bb("gone"), None), (bb("live"), Some(bb("1")))]);
    Ok(())
}

#[test]
fn table_of_only_tombstones_is_valid() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    mem.delete(b"a")?;
    mem.delete(b"b")?;
    SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?.close();

    let table = SSTable::open(dir.path(), 1)?;
    assert_eq!(table.len(), 2);
    assert_eq!(table.get_entry(b"a")?, Some(None));
    Ok(())
}

// -------------------- Lookups --------------------

#[test]
fn sparse_index_finds_every_key() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    for i in 0..200u32 {
        mem.put(format!("key{:05}", i).as_bytes(), format!("v{}", i).as_bytes())?;
    }
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &small_interval(4))?;
    assert_eq!(table.sample_count(), 50);

    for i in 0..200u32 {
        let got = table.get(format!("key{:05}", i).as_bytes())?;
        assert_eq!(got, Some(bb(&format!("v{}", i))), "key{:05}", i);
    }
    // Between two existing keys, same length.
    assert_eq!(table.get(b"key0001x")?, None);
    Ok(())
}

#[test]
fn mixed_key_lengths_are_found() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    let keys = ["z", "ab", "b", "aaa", "zz", "a", "abcd", "c"];
    for k in keys {
        mem.put(k.as_bytes(), k.to_uppercase().as_bytes())?;
    }
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &small_interval(2))?;

    for k in keys {
        assert_eq!(table.get(k.as_bytes())?, Some(bb(&k.to_uppercase())));
    }
    assert_eq!(table.min_key(), &bb("a"));
    assert_eq!(table.max_key(), &bb("abcd"));
    Ok(())
}

#[test]
fn out_of_bounds_lookup_does_no_io() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("bb", "1"), ("cc", "2")]);
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    assert_eq!(table.get(b"z")?, None); // shorter than min_key
    assert_eq!(table.get(b"aa")?, None); // below min_key
    assert_eq!(table.get(b"dd")?, None); // above max_key
    assert_eq!(table.get(b"aaa")?, None); // longer than max_key
    assert_eq!(table.io_reads(), 0);

    assert_eq!(table.get(b"cc")?, Some(bb("2")));
    assert_eq!(table.io_reads(), 1);
    Ok(())
}

#[test]
fn bloom_negative_lookup_does_no_io() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    for i in (0..200u32).step_by(2) {
        mem.put(format!("k{:03}", i).as_bytes(), b"v")?;
    }
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    // An odd key inside the bounds that the filter rules out.
    let missing = (1..200u32)
        .step_by(2)
        .map(|i| format!("k{:03}", i))
        .find(|k| !table.bloom().may_contain(k.as_bytes()))
        .expect("some odd key must be a bloom negative");

    assert_eq!(table.get(missing.as_bytes())?, None);
    assert_eq!(table.io_reads(), 0);
    Ok(())
}

#[test]
fn bloom_holds_every_written_key() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = Memtable::new();
    for i in 0..500u32 {
        mem.put(format!("key{:04}", i).as_bytes(), b"v")?;
    }
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;
    assert_eq!(table.bloom().len(), 500);
    for i in 0..500u32 {
        assert!(table.bloom().may_contain(format!("key{:04}", i).as_bytes()));
    }
    Ok(())
}

#[test]
fn iter_yields_records_in_key_order() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("ccc", "3"), ("a", "1"), ("bb", "2")]);
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    let entries = table.iter()?.collect::<crate::Result<Vec<_>>>()?;
    assert_eq!(
        entries,
        vec![
            (bb("a"), Some(bb("1"))),
            (bb("bb"), Some(bb("2"))),
            (bb("ccc"), Some(bb("3")))
        ]
    );
    Ok(())
}

// -------------------- Reopen & validation --------------------

#[test]
fn reopen_sees_same_contents() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("k1", "v1"), ("k2", "v2")]);
    let table = SSTable::flush_from(&mut mem, dir.path(), 4, &TableOptions::default())?;
    let data_size = table.data_size();
    table.close();

    let reopened = SSTable::open(dir.path(), 4)?;
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.data_size(), data_size);
    assert_eq!(reopened.get(b"k2")?, Some(bb("v2")));
    Ok(())
}

#[test]
fn missing_companion_is_not_found() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("k", "v")]);
    SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    std::fs::remove_file(TablePaths::new(dir.path(), 1).bloom)?;
    let err = SSTable::open(dir.path(), 1).unwrap_err();
    assert!(matches!(err, SSTableError::NotFound(_)), "got {err:?}");

    let err = SSTable::open(dir.path(), 99).unwrap_err();
    assert!(matches!(err, SSTableError::NotFound(_)));
    Ok(())
}

#[test]
fn tampered_index_or_bloom_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let opts = TableOptions::default();
    SSTable::flush_from(&mut memtable_of(&[("k", "v")]), dir.path(), 1, &opts)?;
    SSTable::flush_from(&mut memtable_of(&[("k", "v")]), dir.path(), 2, &opts)?;

    flip_byte(&TablePaths::new(dir.path(), 1).index, 10)?;
    let err = SSTable::open(dir.path(), 1).unwrap_err();
    assert!(matches!(err, SSTableError::Corrupt(_)), "got {err:?}");

    flip_byte(&TablePaths::new(dir.path(), 2).bloom, 6)?;
    let err = SSTable::open(dir.path(), 2).unwrap_err();
    assert!(matches!(err, SSTableError::Corrupt(_)), "got {err:?}");
    Ok(())
}

#[test]
fn tampered_record_fails_its_checksum() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("apple", "red"), ("banana", "yellow")]);
    SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    // First record: crc(4) key_len(4) "apple"(5) present(1) val_len(4), then the value.
    flip_byte(&TablePaths::new(dir.path(), 1).data, 18)?;

    let table = SSTable::open(dir.path(), 1)?;
    let err = table.get(b"apple").unwrap_err();
    assert!(matches!(err, SSTableError::Corrupt(_)), "got {err:?}");

    let first = table.iter()?.next();
    assert!(matches!(first, Some(Err(SSTableError::Corrupt(_)))));
    Ok(())
}

#[test]
fn unknown_present_flag_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("k", "v")]);
    SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    // crc(4) key_len(4) "k"(1), then the flag: 1 becomes 0xFE.
    flip_byte(&TablePaths::new(dir.path(), 1).data, 9)?;
    let table = SSTable::open(dir.path(), 1)?;
    let err = table.get(b"k").unwrap_err();
    assert!(err.to_string().contains("present flag"), "got {err}");
    Ok(())
}

#[test]
fn renamed_generation_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("k", "v")]);
    SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;

    let from = TablePaths::new(dir.path(), 1);
    let to = TablePaths::new(dir.path(), 2);
    std::fs::rename(&from.data, &to.data)?;
    std::fs::rename(&from.bloom, &to.bloom)?;
    std::fs::rename(&from.index, &to.index)?;

    let err = SSTable::open(dir.path(), 2).unwrap_err();
    assert!(err.to_string().contains("generation"), "got {err}");
    Ok(())
}

#[test]
fn delete_files_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("k", "v")]);
    let table = SSTable::flush_from(&mut mem, dir.path(), 3, &TableOptions::default())?;

    table.delete_files()?;
    assert!(list_generations(dir.path())?.is_empty());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    table.delete_files()?;
    Ok(())
}

#[test]
fn debug_output_is_compact() -> Result<()> {
    let dir = tempdir()?;
    let mut mem = memtable_of(&[("k", "v")]);
    let table = SSTable::flush_from(&mut mem, dir.path(), 1, &TableOptions::default())?;
    let dbg = format!("{:?}", table);
    assert!(dbg.contains("generation: 1"));
    assert!(dbg.contains("records: 1"));
    Ok(())
}
