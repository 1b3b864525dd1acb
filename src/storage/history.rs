// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded per-owner history lists shared by the list-per-owner backends.

use crate::models::{sort_newest_first, MessageRecord};

/// Insert or replace `record` in a newest-first list and trim it to `cap`.
///
/// Returns the evicted (oldest) records.
pub fn upsert_capped(
    records: &mut Vec<MessageRecord>,
    record: MessageRecord,
    cap: usize,
) -> Vec<MessageRecord> {
    records.retain(|existing| existing.record_id != record.record_id);
    // Front insert + stable sort: ties on created_at keep the newest write first.
    records.insert(0, record);
    sort_newest_first(records);

    if records.len() > cap {
        records.split_off(cap)
    } else {
        Vec::new()
    }
}
