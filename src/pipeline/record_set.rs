// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Visible record set: the records a caller currently sees, including
//! optimistic `pending`/`signed` entries that have not settled yet.
//!
//! Records live in an arena of slots addressed through a `recordId` index, so
//! replacing a record never moves it and an id can never appear twice. Each
//! owner keeps at most `cap` entries; inserting past the cap evicts that
//! owner's oldest records by `created_at` (earliest insert on ties), which may
//! be the record just inserted. A replacement may only move a record forward
//! through its lifecycle.

use std::collections::HashMap;

use crate::models::{MessageRecord, HISTORY_CAP};

#[derive(Debug, Clone)]
struct Slot {
    /// Insertion sequence; orders eviction and breaks `created_at` ties.
    seq: u64,
    record: MessageRecord,
}

#[derive(Debug, Clone)]
pub struct RecordSet {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    next_seq: u64,
    cap: usize,
}

impl Default for RecordSet {
    fn default() -> Self {
        Self::with_cap(HISTORY_CAP)
    }
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with a per-owner cap other than [`HISTORY_CAP`].
    pub fn with_cap(cap: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
            cap: cap.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.index.contains_key(record_id)
    }

    pub fn get(&self, record_id: &str) -> Option<&MessageRecord> {
        let slot = *self.index.get(record_id)?;
        self.slots[slot].as_ref().map(|s| &s.record)
    }

    /// Insert `record`, or replace the entry with the same id in place.
    ///
    /// Returns the records evicted to keep the owner within the cap.
    pub fn insert(&mut self, record: MessageRecord) -> Vec<MessageRecord> {
        if self.contains(&record.record_id) {
            self.replace(record);
            return Vec::new();
        }

        let owner = record.owner_address.clone();
        let seq = self.next_seq;
        self.next_seq += 1;

        let record_id = record.record_id.clone();
        let slot = Slot { seq, record };
        let position = match self.free.pop() {
            Some(position) => {
                self.slots[position] = Some(slot);
                position
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(record_id, position);

        self.evict_over_cap(&owner)
    }

    /// Replace the entry with the same id. Returns `false` (and changes
    /// nothing) when the id is not present or `record` is not a forward step:
    /// it must be in the same state or one the current state advances to.
    pub fn replace(&mut self, record: MessageRecord) -> bool {
        let Some(&position) = self.index.get(&record.record_id) else {
            return false;
        };
        match self.slots[position].as_mut() {
            Some(slot) => {
                let current = slot.record.lifecycle_state;
                let next = record.lifecycle_state;
                if current != next && !current.can_advance_to(next) {
                    return false;
                }
                slot.record = record;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, record_id: &str) -> Option<MessageRecord> {
        let position = self.index.remove(record_id)?;
        let slot = self.slots[position].take()?;
        self.free.push(position);
        Some(slot.record)
    }

    /// Remove every record of `owner_address` (case-insensitive).
    pub fn remove_owner(&mut self, owner_address: &str) -> Vec<MessageRecord> {
        let ids: Vec<String> = self
            .owner_slots(owner_address)
            .into_iter()
            .map(|slot| slot.record.record_id.clone())
            .collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Records of `owner_address`, newest first (latest insert wins ties).
    pub fn for_owner(&self, owner_address: &str) -> Vec<MessageRecord> {
        let mut slots = self.owner_slots(owner_address);
        slots.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        slots.into_iter().map(|slot| slot.record.clone()).collect()
    }

    /// Every record, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &MessageRecord> {
        self.slots.iter().flatten().map(|slot| &slot.record)
    }

    fn owner_slots(&self, owner_address: &str) -> Vec<&Slot> {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.record.owned_by(owner_address))
            .collect()
    }

    fn evict_over_cap(&mut self, owner_address: &str) -> Vec<MessageRecord> {
        let mut owned: Vec<(i64, u64, String)> = self
            .owner_slots(owner_address)
            .into_iter()
            .map(|slot| (slot.record.created_at, slot.seq, slot.record.record_id.clone()))
            .collect();
        if owned.len() <= self.cap {
            return Vec::new();
        }

        owned.sort_by_key(|(created_at, seq, _)| (*created_at, *seq));
        let excess = owned.len() - self.cap;
        owned
            .into_iter()
            .take(excess)
            .filter_map(|(_, _, id)| self.remove(&id))
            .collect()
    }
}
