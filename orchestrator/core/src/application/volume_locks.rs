// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Lock Registry
//!
//! Serializes concurrent create/delete calls for the same logical volume.
//! Acquisition never waits: a caller that loses the race is told to retry
//! (`Aborted`). Entries live only in memory and vanish on release.

use dashmap::DashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct VolumeLockRegistry {
    held: DashSet<String>,
}

impl VolumeLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns `false` if `key` is already held.
    pub fn try_acquire(&self, key: &str) -> bool {
        let acquired = self.held.insert(key.to_string());
        debug!(key, acquired, "volume lock acquire");
        acquired
    }

    pub fn release(&self, key: &str) {
        if self.held.remove(key).is_some() {
            debug!(key, "volume lock released");
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.contains(key)
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Acquire `key` for the lifetime of the returned guard.
    ///
    /// The guard releases on drop, so a cancelled (dropped) request future
    /// releases its lock as well.
    pub fn try_lock(&self, key: &str) -> Option<VolumeLockGuard<'_>> {
        self.try_acquire(key).then(|| VolumeLockGuard {
            registry: self,
            key: key.to_string(),
        })
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct VolumeLockGuard<'a> {
    registry: &'a VolumeLockRegistry,
    key: String,
}

impl VolumeLockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for VolumeLockGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}
