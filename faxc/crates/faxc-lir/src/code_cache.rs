//! Code cache
//!
//! Append-only store of installed code blobs. Every blob gets a stable,
//! opaque entry address; nothing is ever freed or moved.

use crate::assembler::CodeBlob;
use crate::error::{LirError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// First entry address handed out
pub const CODE_CACHE_BASE: usize = 0x0000_0f00_0000_0000;

/// Distance between consecutive entry addresses
pub const CODE_BLOB_ALIGNMENT: usize = 0x1000;

pub struct CodeCache {
    blobs: RwLock<Vec<Arc<CodeBlob>>>,
    capacity: usize,
}

impl CodeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            blobs: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Install `blob`, returning its entry address
    pub fn install(&self, blob: CodeBlob) -> Result<usize> {
        let mut blobs = self.blobs.write();
        if blobs.len() >= self.capacity {
            return Err(LirError::CodeCacheFull {
                capacity: self.capacity,
            });
        }
        let address = CODE_CACHE_BASE + blobs.len() * CODE_BLOB_ALIGNMENT;
        blobs.push(Arc::new(blob));
        Ok(address)
    }

    /// Install every blob or none of them
    ///
    /// Addresses are returned in the order of `blobs`.
    pub fn install_all(&self, blobs: Vec<CodeBlob>) -> Result<Vec<usize>> {
        let mut installed = self.blobs.write();
        if installed.len() + blobs.len() > self.capacity {
            return Err(LirError::CodeCacheFull {
                capacity: self.capacity,
            });
        }
        let first = installed.len();
        installed.extend(blobs.into_iter().map(Arc::new));
        Ok((first..installed.len())
            .map(|index| CODE_CACHE_BASE + index * CODE_BLOB_ALIGNMENT)
            .collect())
    }

    pub fn lookup(&self, address: usize) -> Result<Arc<CodeBlob>> {
        let offset = address
            .checked_sub(CODE_CACHE_BASE)
            .filter(|offset| offset % CODE_BLOB_ALIGNMENT == 0)
            .ok_or(LirError::UnknownCodeAddress(address))?;
        self.blobs
            .read()
            .get(offset / CODE_BLOB_ALIGNMENT)
            .cloned()
            .ok_or(LirError::UnknownCodeAddress(address))
    }

    pub fn contains(&self, address: usize) -> bool {
        self.lookup(address).is_ok()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of installed blobs named `name`
    pub fn count_named(&self, name: &str) -> usize {
        self.blobs
            .read()
            .iter()
            .filter(|blob| blob.name() == name)
            .count()
    }
}

impl std::fmt::Debug for CodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeCache")
            .field("installed", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
