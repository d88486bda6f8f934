use super::helpers::{bytes, count_index_files, test_config};
use crate::*;
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn compact_with_one_table_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(&test_config(dir.path()))?;
    engine.compact()?;
    assert_eq!(engine.table_count(), 0);

    engine.put(b"k", b"v")?;
    engine.flush()?;
    engine.compact()?;
    assert_eq!(engine.generations(), vec![1]);
    assert_eq!(engine.next_generation(), 2);
    Ok(())
}

#[test]
fn compact_merges_everything_into_one_table() -> Result<()> {
    let dir = tempdir()?;
    let cfg = test_config(dir.path());
    let mut engine = Engine::open(&cfg)?;

    for round in 0..4u32 {
        engine.put(b"shared", format!("round{}", round).as_bytes())?;
        engine.put(format!("own{}", round).as_bytes(), b"x")?;
        engine.flush()?;
    }
    assert_eq!(engine.table_count(), 4);

    engine.compact()?;
    assert_eq!(engine.table_count(), 1);
    assert_eq!(count_index_files(&cfg.data_dir), 1);
    // Three pairwise merges after generations 1..=4.
    assert_eq!(engine.generations(), vec![7]);
    assert_eq!(engine.next_generation(), 8);

    assert_eq!(engine.get(b"shared")?, Some(bytes("round3")));
    for round in 0..4u32 {
        assert_eq!(engine.get(format!("own{}", round).as_bytes())?, Some(bytes("x")));
    }
    Ok(())
}

#[test]
fn compaction_keeps_memtable_precedence() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(&test_config(dir.path()))?;

    engine.put(b"k", b"disk1")?;
    engine.flush()?;
    engine.put(b"k", b"disk2")?;
    engine.flush()?;
    engine.put(b"k", b"memory")?;

    engine.compact()?;
    assert_eq!(engine.get(b"k")?, Some(bytes("memory")));
    assert_eq!(engine.remove(b"k")?, Some(bytes("memory")));
    assert_eq!(engine.get(b"k")?, None);
    Ok(())
}

// --------------------- tombstones ---------------------

#[test]
fn bottom_merge_drops_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(&test_config(dir.path()))?;

    engine.put(b"a", b"1")?;
    engine.put(b"b", b"2")?;
    engine.flush()?;
    engine.remove(b"a")?;
    engine.put(b"c", b"3")?;
    engine.flush()?;

    engine.compact()?;
    assert_eq!(engine.table_count(), 1);
    // Only b and c are left; the tombstone for a is gone.
    assert_eq!(engine.tables[0].len(), 2);
    assert_eq!(engine.get(b"a")?, None);
    assert_eq!(engine.get(b"b")?, Some(bytes("2")));
    Ok(())
}

#[test]
fn tombstones_survive_merges_above_the_oldest_table() -> Result<()> {
    let dir = tempdir()?;
    let cfg = test_config(dir.path());
    let mut engine = Engine::open(&cfg)?;

    engine.put(b"a", b"old")?;
    engine.flush()?;
    engine.put(b"b", b"x")?;
    engine.flush()?;
    engine.remove(b"a")?;
    engine.flush()?;
    assert_eq!(engine.table_count(), 3);

    // 3+2 keeps the tombstone, so the final merge with 1 still sees it.
    engine.compact()?;
    assert_eq!(engine.generations(), vec![5]);
    assert_eq!(engine.get(b"a")?, None);
    assert_eq!(engine.get(b"b")?, Some(bytes("x")));
    drop(engine);

    let engine = Engine::open(&cfg)?;
    assert_eq!(engine.get(b"a")?, None);
    Ok(())
}

#[test]
fn compacting_only_deleted_records_leaves_no_table() -> Result<()> {
    let dir = tempdir()?;
    let cfg = test_config(dir.path());
    let mut engine = Engine::open(&cfg)?;

    engine.put(b"a", b"1")?;
    engine.flush()?;
    engine.remove(b"a")?;
    engine.flush()?;

    engine.compact()?;
    assert_eq!(engine.table_count(), 0);
    assert_eq!(count_index_files(&cfg.data_dir), 0);
    assert_eq!(engine.get(b"a")?, None);

    // Generation ids keep increasing after the tables disappear.
    engine.put(b"a", b"2")?;
    engine.flush()?;
    assert_eq!(engine.generations(), vec![4]);
    assert_eq!(engine.get(b"a")?, Some(bytes("2")));
    Ok(())
}

#[test]
fn failed_auto_compaction_does_not_fail_flush() -> Result<()> {
    let dir = tempdir()?;
    let mut cfg = test_config(dir.path());
    cfg.compaction_trigger = 2;
    let mut engine = Engine::open(&cfg)?;

    engine.put(b"a", b"1")?;
    engine.flush()?;

    // crc(4) key_len(4) "a"(1) present(1) val_len(4), then the value byte.
    let data = sstable::TablePaths::new(&cfg.data_dir, 1).data;
    let mut raw = std::fs::read(&data)?;
    raw[14] ^= 0xFF;
    std::fs::write(&data, raw)?;

    engine.put(b"b", b"2")?;
    engine.flush()?;
    assert_eq!(engine.table_count(), 2);
    assert_eq!(engine.memtable_len(), 0);
    assert_eq!(engine.get(b"b")?, Some(bytes("2")));

    // An explicit compaction still reports the problem.
    assert!(engine.compact().is_err());
    assert_eq!(engine.table_count(), 2);
    Ok(())
}

#[test]
fn auto_compaction_at_trigger() -> Result<()> {
    let dir = tempdir()?;
    let mut cfg = test_config(dir.path());
    cfg.compaction_trigger = 3;
    let mut engine = Engine::open(&cfg)?;

    for i in 0..2u32 {
        engine.put(format!("k{}", i).as_bytes(), b"v")?;
        engine.flush()?;
    }
    assert_eq!(engine.table_count(), 2);

    engine.put(b"k2", b"v")?;
    engine.flush()?;
    assert_eq!(engine.table_count(), 1);
    assert_eq!(count_index_files(&cfg.data_dir), 1);
    for i in 0..3u32 {
        assert_eq!(engine.get(format!("k{}", i).as_bytes())?, Some(bytes("v")));
    }
    Ok(())
}

#[test]
fn trigger_zero_disables_auto_compaction() -> Result<()> {
    let dir = tempdir()?;
    let mut engine = Engine::open(&test_config(dir.path()))?;
    assert_eq!(engine.compaction_trigger(), 0);

    for i in 0..6u32 {
        engine.put(format!("k{}", i).as_bytes(), b"v")?;
        engine.flush()?;
    }
    assert_eq!(engine.table_count(), 6);

    engine.set_compaction_trigger(2);
    engine.put(b"k6", b"v")?;
    engine.flush()?;
    assert_eq!(engine.table_count(), 1);
    Ok(())
}

#[test]
fn compacted_state_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let cfg = test_config(dir.path());
    {
        let mut engine = Engine::open(&cfg)?;
        for i in 0..50u32 {
            engine.put(format!("key{:03}", i).as_bytes(), format!("v{}", i).as_bytes())?;
            if i % 10 == 9 {
                engine.flush()?;
            }
        }
        engine.compact()?;
    }

    let engine = Engine::open(&cfg)?;
    assert_eq!(engine.table_count(), 1);
    for i in 0..50u32 {
        assert_eq!(
            engine.get(format!("key{:03}", i).as_bytes())?,
            Some(bytes(&format!("v{}", i)))
        );
    }
    Ok(())
}
