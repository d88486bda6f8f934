//! Logical → physical sector mapping on top of the index.
//!
//! Writes are log-structured: every write of a logical sector goes to the
//! next physical sector of a circular allocator, and the index records
//! where it went. Sector numbers are stored as 8-byte big-endian keys and
//! values.

use anyhow::Result;
use config::Config;
use memtable::ByteBuffer;

use crate::Engine;

/// Index key holding the allocator position. Sector keys are always 8
/// bytes long, so a 7-byte key cannot collide with one.
const CURSOR_KEY: &[u8] = b"\0cursor";

/// Remaps logical sectors to physical ones through an [`Engine`].
///
/// The allocator position is stored in the index next to the mappings, so
/// a reopened remapper continues where the last one stopped instead of
/// handing out sectors that live mappings still point at.
#[derive(Debug)]
pub struct SectorRemapper {
    engine: Engine,
    device_sectors: u64,
    cursor: u64,
}

impl SectorRemapper {
    /// Opens the index under `cfg.data_dir` and allocates over
    /// `cfg.device_sectors` physical sectors.
    pub fn open(cfg: &Config) -> Result<Self> {
        Self::new(Engine::open(cfg)?, cfg.device_sectors)
    }

    /// Wraps `engine`, resuming from the allocator position it has stored.
    pub fn new(engine: Engine, device_sectors: u64) -> Result<Self> {
        anyhow::ensure!(device_sectors > 0, "device must have at least one sector");
        let cursor = match engine.get(CURSOR_KEY)? {
            Some(value) => decode_sector(&value, "allocator cursor")? % device_sectors,
            None => 0,
        };
        tracing::debug!(cursor, device_sectors, "sector remapper ready");
        Ok(Self {
            engine,
            device_sectors,
            cursor,
        })
    }

    /// Assigns the next physical sector to `logical` and returns it.
    ///
    /// Wraps around to sector 0 after the last one. The advanced cursor is
    /// stored before the mapping, so a failure can skip a sector but never
    /// hand the same one out twice.
    pub fn write(&mut self, logical: u64) -> Result<u64> {
        let physical = self.cursor;
        let next = (physical + 1) % self.device_sectors;
        self.engine.put(CURSOR_KEY, &next.to_be_bytes())?;
        self.cursor = next;

        self.engine.put(&logical.to_be_bytes(), &physical.to_be_bytes())?;
        tracing::trace!(logical, physical, "remapped sector");
        Ok(physical)
    }

    /// Physical sector currently holding `logical`, if it is mapped.
    pub fn resolve(&self, logical: u64) -> Result<Option<u64>> {
        match self.engine.get(&logical.to_be_bytes())? {
            Some(value) => Ok(Some(decode_sector(&value, "mapping")?)),
            None => Ok(None),
        }
    }

    /// Unmaps `logical`. Returns `true` if it was mapped.
    pub fn discard(&mut self, logical: u64) -> Result<bool> {
        Ok(self.engine.remove(&logical.to_be_bytes())?.is_some())
    }

    /// Next physical sector [`write`](SectorRemapper::write) will hand out.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub fn device_sectors(&self) -> u64 {
        self.device_sectors
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }
}

fn decode_sector(value: &ByteBuffer, what: &str) -> Result<u64> {
    let bytes: [u8; 8] = value
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow::anyhow!("{} is {} bytes, expected 8", what, value.len()))?;
    Ok(u64::from_be_bytes(bytes))
}
