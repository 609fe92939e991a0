//! Shadow Lock Table
//!
//! The Manager's private, non-authoritative view of who holds which record.
//! It only ever answers "definitely taken by someone else"; every other case
//! is forwarded to the Repository, whose answer is then mirrored back here.
//!
//! Entries are keyed by the lowercased record name, matching the Repository.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use super::types::ShadowOutcome;
use crate::protocol::ClientId;
use crate::repository::types::record_key;

pub struct ShadowLockTable {
    enabled: bool,
    entries: DashMap<String, ClientId>,
}

impl ShadowLockTable {
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            entries: DashMap::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check-and-reserve for OPEN, atomic per record.
    pub fn try_reserve(&self, name: &str, client: &ClientId) -> ShadowOutcome {
        if !self.enabled {
            return ShadowOutcome::Disabled;
        }

        match self.entries.entry(record_key(name)) {
            Entry::Occupied(entry) => {
                if entry.get().same_as(client) {
                    ShadowOutcome::AlreadyHeld
                } else {
                    ShadowOutcome::Conflict(entry.get().clone())
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(client.clone());
                ShadowOutcome::Reserved
            }
        }
    }

    /// Drops the entry for `name` if it names `client`.
    pub fn release(&self, name: &str, client: &ClientId) -> bool {
        self.entries
            .remove_if(&record_key(name), |_, owner| owner.same_as(client))
            .is_some()
    }

    /// Undoes a reservation the Repository refused.
    pub fn rollback(&self, name: &str, client: &ClientId) {
        if self.release(name, client) {
            tracing::debug!("Rolled back shadow entry {} for {}", name, client);
        }
    }

    /// Drops every entry naming `client`; returns how many went away.
    pub fn release_all(&self, client: &ClientId) -> usize {
        let mut released = 0;
        self.entries.retain(|_, owner| {
            if owner.same_as(client) {
                released += 1;
                false
            } else {
                true
            }
        });
        released
    }

    pub fn owner(&self, name: &str) -> Option<ClientId> {
        self.entries
            .get(&record_key(name))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
