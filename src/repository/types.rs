use chrono::{Local, NaiveDateTime, SubsecRound, TimeDelta};

use crate::protocol::ClientId;
use crate::protocol::ErrorReason;
use crate::protocol::types::{ListEntry, RecordView};

/// A named text record, owned exclusively by the `RecordStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Display name, as first uploaded.
    pub name: String,
    pub author: ClientId,
    pub content: String,
    /// Set by the store on creation and on every successful edit.
    pub last_modified: NaiveDateTime,
    /// Present iff the record is checked out for editing.
    pub lock_owner: Option<ClientId>,
}

impl Record {
    pub fn list_entry(&self) -> ListEntry {
        ListEntry {
            name: self.name.clone(),
            author: self.author.clone(),
            last_modified: self.last_modified,
            locked: self.lock_owner.is_some(),
        }
    }

    pub fn view(&self) -> RecordView {
        RecordView {
            author: self.author.clone(),
            last_modified: self.last_modified,
            content: self.content.clone(),
        }
    }

    /// Content size in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// Lease check shared by EDIT and DELETE.
    pub fn require_owner(&self, client: &ClientId) -> Result<(), ErrorReason> {
        match &self.lock_owner {
            None => Err(ErrorReason::NotOpened),
            Some(owner) if !owner.same_as(client) => Err(ErrorReason::LockedBy(owner.clone())),
            Some(_) => Ok(()),
        }
    }
}

/// Locks taken through one TCP connection into the Repository.
///
/// Released when that connection goes away, so a vanished Manager (or a
/// dropped upstream link) cannot leave records checked out forever.
#[derive(Debug, Default)]
pub struct HeldLocks {
    pairs: Vec<(String, ClientId)>,
}

impl HeldLocks {
    pub fn record(&mut self, key: &str, owner: &ClientId) {
        if !self.holds(key, owner) {
            self.pairs.push((key.to_string(), owner.clone()));
        }
    }

    pub fn forget(&mut self, key: &str, owner: &ClientId) {
        self.pairs.retain(|(k, o)| !(k == key && o.same_as(owner)));
    }

    pub fn forget_client(&mut self, owner: &ClientId) {
        self.pairs.retain(|(_, o)| !o.same_as(owner));
    }

    pub fn holds(&self, key: &str, owner: &ClientId) -> bool {
        self.pairs.iter().any(|(k, o)| k == key && o.same_as(owner))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn take(&mut self) -> Vec<(String, ClientId)> {
        std::mem::take(&mut self.pairs)
    }
}

/// Case-insensitive lookup key for a record name.
pub fn record_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Names must be non-blank and free of the LIST/STATS separators.
pub fn validate_name(name: &str) -> Result<(), ErrorReason> {
    if name.trim().is_empty() || name.contains([',', ';', '|', '\n', '\r']) {
        return Err(ErrorReason::BadName);
    }
    Ok(())
}

/// Next `lastModified` value: the wall clock in whole seconds, but never at
/// or before `previous`. The wire shows seconds, so the bump is a second too.
pub fn next_timestamp(previous: Option<NaiveDateTime>) -> NaiveDateTime {
    let now = Local::now().naive_local().trunc_subsecs(0);
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::seconds(1),
        _ => now,
    }
}
