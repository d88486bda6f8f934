use config::Config;
use std::fs;
use std::path::Path;

/// Config rooted at `dir` with flushes and compaction left to the test.
pub fn test_config(dir: &Path) -> Config {
    Config {
        flush_threshold: 1024 * 1024,
        compaction_trigger: 0,
        index_interval: 4,
        ..Config::default().with_data_dir(dir.join("sst"))
    }
}

/// Number of committed generations (`.index` files) in `dir`.
pub fn count_index_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "index")
                .unwrap_or(false)
        })
        .count()
}

pub fn bytes(s: &str) -> memtable::ByteBuffer {
    memtable::ByteBuffer::from(s.as_bytes())
}
