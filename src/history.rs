//! Append-only completion log kept under the `completedTasksHistory` key.
//!
//! Records are never deduplicated and do not follow the live category state:
//! deleting a task or category leaves its history untouched.

use crate::database::KeyValueStore;
use crate::models::CompletionRecord;
use crate::store::{StoreError, read_json, write_json};

pub const HISTORY_KEY: &str = "completedTasksHistory";

pub fn load<S: KeyValueStore + ?Sized>(kv: &S) -> Result<Vec<CompletionRecord>, StoreError> {
    read_json(kv, HISTORY_KEY)
}

pub fn append<S: KeyValueStore + ?Sized>(
    kv: &mut S,
    record: &CompletionRecord,
) -> Result<(), StoreError> {
    let mut records = load(kv)?;
    records.push(record.clone());
    write_json(kv, HISTORY_KEY, &records)
}

/// Drop every record equal to `record` (same task, category and timestamp).
pub fn remove_entry<S: KeyValueStore + ?Sized>(
    kv: &mut S,
    record: &CompletionRecord,
) -> Result<usize, StoreError> {
    let mut records = load(kv)?;
    let before = records.len();
    records.retain(|r| r != record);
    let removed = before - records.len();
    if removed > 0 {
        write_json(kv, HISTORY_KEY, &records)?;
    }
    Ok(removed)
}

/// Group records by category name, categories in first-seen order.
pub fn group_by_category(records: &[CompletionRecord]) -> Vec<(String, Vec<CompletionRecord>)> {
    let mut groups: Vec<(String, Vec<CompletionRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(name, _)| *name == record.category) {
            Some((_, group)) => group.push(record.clone()),
            None => groups.push((record.category.clone(), vec![record.clone()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn record(task: &str, category: &str, secs: i64) -> CompletionRecord {
        CompletionRecord {
            task: task.to_string(),
            completed_at: Utc.timestamp_opt(secs, 0).unwrap(),
            category: category.to_string(),
        }
    }

    #[test]
    fn append_keeps_duplicates_in_order() {
        let mut kv = MemoryStore::new();
        let r = record("Drink water", "Health", 0);
        append(&mut kv, &r).unwrap();
        append(&mut kv, &r).unwrap();
        append(&mut kv, &record("Sweep", "Chores", 10)).unwrap();

        let records = load(&kv).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], r);
        assert_eq!(records[2].task, "Sweep");
    }

    #[test]
    fn remove_entry_drops_all_equal_records() {
        let mut kv = MemoryStore::new();
        let r = record("Drink water", "Health", 0);
        append(&mut kv, &r).unwrap();
        append(&mut kv, &r).unwrap();
        append(&mut kv, &record("Drink water", "Health", 60)).unwrap();

        assert_eq!(remove_entry(&mut kv, &r).unwrap(), 2);
        assert_eq!(load(&kv).unwrap().len(), 1);
        assert_eq!(remove_entry(&mut kv, &r).unwrap(), 0);
    }

    #[test]
    fn grouping_preserves_first_seen_category_order() {
        let records = vec![
            record("a", "Chores", 0),
            record("b", "Health", 1),
            record("c", "Chores", 2),
        ];
        let groups = group_by_category(&records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Chores");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "Health");
    }

    #[test]
    fn history_is_stored_as_iso_timestamps() {
        let mut kv = MemoryStore::new();
        append(&mut kv, &record("Drink water", "Health", 0)).unwrap();
        let raw = kv.get(HISTORY_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["task"], "Drink water");
        assert_eq!(value[0]["category"], "Health");
        assert_eq!(value[0]["completedAt"], "1970-01-01T00:00:00Z");
    }
}
