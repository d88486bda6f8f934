use crate::*;
use memtable::Memtable;

mod reader_tests;

fn memtable_of(pairs: &[(&str, &str)]) -> Memtable {
    let mut m = Memtable::new();
    for (k, v) in pairs {
        m.put(k.as_bytes(), v.as_bytes()).expect("put");
    }
    m
}

fn small_interval(interval: u32) -> TableOptions {
    TableOptions {
        index_interval: interval,
        ..TableOptions::default()
    }
}
