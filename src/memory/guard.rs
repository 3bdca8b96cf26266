// Copyright 2024-2026 memstore Contributors
// Licensed under the Apache License, Version 2.0

//! Scoped-cleanup registry.
//!
//! A [`GuardManager`] maps a storage identity to the action that releases
//! whatever that storage acquired. `enter` and `exit` must alternate per key;
//! anything else is reported as a [`GuardError`]. The table is sharded, so
//! distinct keys never contend on a single lock.

use std::fmt;
use std::marker::PhantomData;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

use super::storage::StorageId;

/// Names the subsystem a registry belongs to.
pub trait GuardTag: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Tag of the registry tracking open storage mappings.
#[derive(Debug)]
pub struct MapTag;

impl GuardTag for MapTag {
    const NAME: &'static str = "map";
}

/// Registry protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("{tag} guard already entered for storage {key}")]
    AlreadyEntered { tag: &'static str, key: StorageId },

    #[error("{tag} guard not entered for storage {key}")]
    NotEntered { tag: &'static str, key: StorageId },
}

type Cleanup = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Registry of pending cleanup actions, one per key.
pub struct GuardManager<T: GuardTag> {
    entries: DashMap<StorageId, Cleanup>,
    _tag: PhantomData<fn() -> T>,
}

impl<T: GuardTag> GuardManager<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            _tag: PhantomData,
        }
    }

    /// Register `cleanup` under `key`.
    ///
    /// Fails if `key` already holds a registration; the rejected cleanup is
    /// run immediately so nothing it owns is leaked.
    pub fn enter<F>(&self, key: StorageId, cleanup: F) -> Result<(), GuardError>
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let cleanup: Cleanup = Box::new(cleanup);
        let rejected = match self.entries.entry(key) {
            Entry::Occupied(_) => Some(cleanup),
            Entry::Vacant(slot) => {
                slot.insert(cleanup);
                None
            }
        };

        if let Some(cleanup) = rejected {
            cleanup();
            return Err(GuardError::AlreadyEntered { tag: T::NAME, key });
        }
        trace!(tag = T::NAME, %key, "guard entered");
        Ok(())
    }

    /// Run and remove the cleanup registered under `key`.
    pub fn exit(&self, key: StorageId) -> Result<(), GuardError> {
        let (_, cleanup) = self
            .entries
            .remove(&key)
            .ok_or(GuardError::NotEntered { tag: T::NAME, key })?;
        cleanup();
        trace!(tag = T::NAME, %key, "guard exited");
        Ok(())
    }

    /// Run and remove the cleanup under `key` if there is one.
    pub fn discard(&self, key: StorageId) -> bool {
        match self.entries.remove(&key) {
            Some((_, cleanup)) => {
                cleanup();
                true
            }
            None => false,
        }
    }

    pub fn is_entered(&self, key: StorageId) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: GuardTag> Default for GuardManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GuardTag> fmt::Debug for GuardManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardManager")
            .field("tag", &T::NAME)
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
