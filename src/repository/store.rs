//! Authoritative Record Store
//!
//! Holds every record together with its lock state. All access goes through a
//! single mutex around the whole table: the TCP connections and the UDP
//! responder all read and write the same map.
//!
//! ## Critical sections
//! Each public method takes the mutex once, performs in-memory map work only,
//! and releases it before returning. No I/O ever happens while it is held, so
//! a failed method leaves the table exactly as it found it.
//!
//! ## Lease discipline
//! - **OPEN** sets `lock_owner` (re-entrant for the current owner).
//! - **EDIT / DELETE** require the caller to be the current owner:
//!   `NOT_OPENED` when nobody holds the lock, `LOCKED_BY` when someone else does.
//! - **CLOSE** clears the lock; **RELEASE_ALL** clears every lock of one owner.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::types::{Record, next_timestamp, record_key, validate_name};
use crate::protocol::ClientId;
use crate::protocol::ErrorReason;
use crate::protocol::types::{LatestRecord, ListEntry, RecordView, StatsSummary};

pub struct RecordStore {
    /// Lowercased name -> record. `BTreeMap` keeps LIST ordered by name.
    records: Mutex<BTreeMap<String, Record>>,
}

impl RecordStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all records, ordered by name.
    pub async fn list(&self) -> Vec<ListEntry> {
        let records = self.records.lock().await;
        records.values().map(Record::list_entry).collect()
    }

    /// Creates a record if the name is unused.
    pub async fn upload(
        &self,
        name: &str,
        author: &ClientId,
        content: String,
    ) -> Result<(), ErrorReason> {
        validate_name(name)?;
        let key = record_key(name);

        let mut records = self.records.lock().await;
        if records.contains_key(&key) {
            return Err(ErrorReason::AlreadyExists);
        }

        records.insert(
            key,
            Record {
                name: name.to_string(),
                author: author.clone(),
                content,
                last_modified: next_timestamp(None),
                lock_owner: None,
            },
        );

        tracing::debug!("Stored record {} (author {})", name, author);
        Ok(())
    }

    /// Reads a record regardless of its lock state.
    pub async fn download(&self, name: &str) -> Result<RecordView, ErrorReason> {
        let records = self.records.lock().await;
        records
            .get(&record_key(name))
            .map(Record::view)
            .ok_or(ErrorReason::NotFound)
    }

    /// Acquires the editing lock. `Ok(true)` when this call granted it,
    /// `Ok(false)` when the caller already held it.
    pub async fn open(&self, name: &str, client: &ClientId) -> Result<bool, ErrorReason> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&record_key(name))
            .ok_or(ErrorReason::NotFound)?;

        match &record.lock_owner {
            Some(owner) if !owner.same_as(client) => Err(ErrorReason::LockedBy(owner.clone())),
            Some(_) => Ok(false),
            None => {
                record.lock_owner = Some(client.clone());
                tracing::debug!("Lock on {} granted to {}", record.name, client);
                Ok(true)
            }
        }
    }

    /// Replaces the content of a record the caller holds open. Returns the new
    /// `lastModified`, which is strictly later than the previous one.
    pub async fn edit(
        &self,
        name: &str,
        client: &ClientId,
        content: String,
    ) -> Result<NaiveDateTime, ErrorReason> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&record_key(name))
            .ok_or(ErrorReason::NotFound)?;
        record.require_owner(client)?;

        record.content = content;
        record.last_modified = next_timestamp(Some(record.last_modified));
        Ok(record.last_modified)
    }

    /// Removes a record the caller holds open. Its lock goes with it.
    pub async fn delete(&self, name: &str, client: &ClientId) -> Result<(), ErrorReason> {
        let key = record_key(name);
        let mut records = self.records.lock().await;
        let record = records.get(&key).ok_or(ErrorReason::NotFound)?;
        record.require_owner(client)?;

        records.remove(&key);
        tracing::debug!("Record {} deleted by {}", name, client);
        Ok(())
    }

    /// Releases the caller's lock.
    pub async fn close(&self, name: &str, client: &ClientId) -> Result<(), ErrorReason> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(&record_key(name))
            .ok_or(ErrorReason::NotFound)?;

        match &record.lock_owner {
            None => Err(ErrorReason::NotLocked),
            Some(owner) if !owner.same_as(client) => Err(ErrorReason::LockedBy(owner.clone())),
            Some(_) => {
                record.lock_owner = None;
                tracing::debug!("Lock on {} released by {}", record.name, client);
                Ok(())
            }
        }
    }

    /// Releases every lock held by `client`. Idempotent; returns how many
    /// locks were released.
    pub async fn release_all(&self, client: &ClientId) -> usize {
        let mut records = self.records.lock().await;
        let mut released = 0;
        for record in records.values_mut() {
            if record.lock_owner.as_ref().is_some_and(|owner| owner.same_as(client)) {
                record.lock_owner = None;
                released += 1;
            }
        }
        released
    }

    /// Releases specific `(key, owner)` locks, skipping any that have since
    /// changed hands.
    pub async fn release_held(&self, held: &[(String, ClientId)]) -> usize {
        if held.is_empty() {
            return 0;
        }

        let mut records = self.records.lock().await;
        let mut released = 0;
        for (key, owner) in held {
            if let Some(record) = records.get_mut(key)
                && record.lock_owner.as_ref().is_some_and(|o| o.same_as(owner))
            {
                record.lock_owner = None;
                released += 1;
            }
        }
        released
    }

    /// Aggregates byte totals per author and the latest record modified at or
    /// after midnight of `after`.
    pub async fn stats(&self, client: Option<&ClientId>, after: Option<NaiveDate>) -> StatsSummary {
        let cutoff = after.and_then(|date| date.and_hms_opt(0, 0, 0));
        let records = self.records.lock().await;

        let my_files = client
            .map(|id| {
                records
                    .values()
                    .filter(|r| r.author.same_as(id))
                    .map(Record::size)
                    .sum()
            })
            .unwrap_or(0);

        let latest_after = records
            .values()
            .filter(|r| cutoff.is_none_or(|cutoff| r.last_modified >= cutoff))
            .max_by_key(|r| r.last_modified)
            .map(|r| LatestRecord {
                name: r.name.clone(),
                author: r.author.clone(),
                last_modified: r.last_modified,
            });

        let mut totals: BTreeMap<String, (ClientId, usize)> = BTreeMap::new();
        for record in records.values() {
            let entry = totals
                .entry(record.author.folded())
                .or_insert_with(|| (record.author.clone(), 0));
            entry.1 += record.size();
        }

        StatsSummary {
            my_files,
            latest_after,
            totals: totals.into_values().collect(),
        }
    }

    /// Copy of one record, for inspection.
    pub async fn get(&self, name: &str) -> Option<Record> {
        let records = self.records.lock().await;
        records.get(&record_key(name)).cloned()
    }

    /// `(records, locked records)`
    pub async fn counts(&self) -> (usize, usize) {
        let records = self.records.lock().await;
        let locked = records.values().filter(|r| r.lock_owner.is_some()).count();
        (records.len(), locked)
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }
}
