//! # Config - runtime settings
//!
//! Every tunable of the sector index lives in [`Config`]. Defaults come from
//! [`Config::default`]; [`Config::from_env`] overlays `SECTORLOG_*`
//! environment variables on top of them.
//!
//! ```text
//! SECTORLOG_DATA_DIR            SSTable directory          (default: "data/sst")
//! SECTORLOG_FLUSH_KB            flush threshold in KiB     (default: 1024)
//! SECTORLOG_BLOOM_BITS_PER_KEY  bloom bits per key         (default: 10)
//! SECTORLOG_BLOOM_HASHES        bloom hash functions       (default: 7)
//! SECTORLOG_INDEX_INTERVAL      records per index sample   (default: 16)
//! SECTORLOG_COMPACTION_TRIGGER  tables before compaction   (default: 4, 0 = disabled)
//! SECTORLOG_DEVICE_SECTORS      physical sectors on device (default: 1048576)
//! SECTORLOG_LOG                 tracing filter             (default: "warn")
//! ```

use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_DATA_DIR: &str = "SECTORLOG_DATA_DIR";
pub const ENV_FLUSH_KB: &str = "SECTORLOG_FLUSH_KB";
pub const ENV_BLOOM_BITS_PER_KEY: &str = "SECTORLOG_BLOOM_BITS_PER_KEY";
pub const ENV_BLOOM_HASHES: &str = "SECTORLOG_BLOOM_HASHES";
pub const ENV_INDEX_INTERVAL: &str = "SECTORLOG_INDEX_INTERVAL";
pub const ENV_COMPACTION_TRIGGER: &str = "SECTORLOG_COMPACTION_TRIGGER";
pub const ENV_DEVICE_SECTORS: &str = "SECTORLOG_DEVICE_SECTORS";
pub const ENV_LOG: &str = "SECTORLOG_LOG";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the SSTable generations.
    pub data_dir: PathBuf,
    /// Memtable size in bytes that triggers a flush.
    pub flush_threshold: usize,
    pub bloom_bits_per_key: u64,
    pub bloom_hashes: u32,
    /// One sparse-index sample per this many records.
    pub index_interval: u32,
    /// Compact once this many tables exist. `0` disables auto-compaction.
    pub compaction_trigger: usize,
    /// Physical sectors available to the remapper's allocator.
    pub device_sectors: u64,
    /// `tracing_subscriber::EnvFilter` directive for the CLI.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sst"),
            flush_threshold: 1024 * 1024,
            bloom_bits_per_key: 10,
            bloom_hashes: 7,
            index_interval: 16,
            compaction_trigger: 4,
            device_sectors: 1 << 20,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Defaults overlaid with whatever `SECTORLOG_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Config::from_env) but reads variables through
    /// `lookup`, so callers can supply them from anywhere.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(dir) = lookup(ENV_DATA_DIR) {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(kb) = parse::<usize>(&lookup, ENV_FLUSH_KB)? {
            cfg.flush_threshold = kb.checked_mul(1024).ok_or_else(|| ConfigError::Invalid {
                key: ENV_FLUSH_KB,
                value: kb.to_string(),
            })?;
        }
        if let Some(v) = parse_nonzero::<u64>(&lookup, ENV_BLOOM_BITS_PER_KEY)? {
            cfg.bloom_bits_per_key = v;
        }
        if let Some(v) = parse_nonzero::<u32>(&lookup, ENV_BLOOM_HASHES)? {
            cfg.bloom_hashes = v;
        }
        if let Some(v) = parse_nonzero::<u32>(&lookup, ENV_INDEX_INTERVAL)? {
            cfg.index_interval = v;
        }
        if let Some(v) = parse::<usize>(&lookup, ENV_COMPACTION_TRIGGER)? {
            cfg.compaction_trigger = v;
        }
        if let Some(v) = parse_nonzero::<u64>(&lookup, ENV_DEVICE_SECTORS)? {
            cfg.device_sectors = v;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            cfg.log_filter = filter;
        }
        Ok(cfg)
    }

    /// Same config rooted at another table directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_nonzero<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>>
where
    T: FromStr + Default + PartialEq + ToString,
{
    match parse::<T>(lookup, key)? {
        Some(v) if v == T::default() => Err(ConfigError::Invalid {
            key,
            value: v.to_string(),
        }),
        other => Ok(other),
    }
}
