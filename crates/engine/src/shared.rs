//! Thread-safe handle to an [`Engine`].
//!
//! Lookups take the read lock and run concurrently; everything that mutates
//! (put, remove, flush, compact) takes the write lock, so writers are
//! serialised and never overlap a reader.

use anyhow::Result;
use config::Config;
use memtable::ByteBuffer;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

use crate::Engine;

/// Cloneable, shareable engine. Clones point at the same index.
#[derive(Clone, Debug)]
pub struct SharedEngine {
    inner: Arc<RwLock<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// Shorthand for [`Engine::open`] followed by [`SharedEngine::new`].
    pub fn open(cfg: &Config) -> Result<Self> {
        Ok(Self::new(Engine::open(cfg)?))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<ByteBuffer>> {
        self.inner.read().get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<usize> {
        self.inner.write().put(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<ByteBuffer>> {
        self.inner.write().remove(key)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.write().flush()
    }

    pub fn compact(&self) -> Result<()> {
        self.inner.write().compact()
    }

    /// Read access for several operations under one lock.
    pub fn read(&self) -> RwLockReadGuard<'_, Engine> {
        self.inner.read()
    }

    /// Exclusive access for several operations under one lock.
    pub fn write(&self) -> RwLockWriteGuard<'_, Engine> {
        self.inner.write()
    }
}

impl From<Engine> for SharedEngine {
    fn from(engine: Engine) -> Self {
        Self::new(engine)
    }
}
