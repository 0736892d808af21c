//! Ordered, id-indexed record set.

use crate::error::{Result, SyncError};
use crate::types::{Record, RecordId};
use std::collections::{HashMap, HashSet};

/// The in-memory record set.
///
/// Records are kept most-recent-first. The id index is rebuilt after
/// structural changes; sets are small enough that this stays cheap.
#[derive(Clone, Debug, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    index: HashMap<RecordId, usize>,
}

impl RecordSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from records in display order.
    ///
    /// If an id appears more than once only the first occurrence is kept.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut seen = HashSet::new();
        let records: Vec<Record> = records
            .into_iter()
            .filter(|r| seen.insert(r.id))
            .collect();

        let mut set = Self {
            records,
            index: HashMap::new(),
        };
        set.reindex();
        set
    }

    /// Insert a new record at the front.
    pub fn prepend(&mut self, record: Record) -> Result<()> {
        if self.index.contains_key(&record.id) {
            return Err(SyncError::DuplicateRecord(record.id));
        }
        self.records.insert(0, record);
        self.reindex();
        Ok(())
    }

    /// Replace the record with the same id, keeping its position.
    ///
    /// Returns the previous value.
    pub fn replace(&mut self, record: Record) -> Result<Record> {
        let pos = *self
            .index
            .get(&record.id)
            .ok_or(SyncError::RecordNotFound(record.id))?;
        Ok(std::mem::replace(&mut self.records[pos], record))
    }

    /// Remove a record by id.
    pub fn remove(&mut self, id: &RecordId) -> Result<Record> {
        let pos = self
            .index
            .remove(id)
            .ok_or(SyncError::RecordNotFound(*id))?;
        let removed = self.records.remove(pos);
        self.reindex();
        Ok(removed)
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.index.contains_key(id)
    }

    /// All ids in display order.
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[Record] {
        &self.records
    }

    pub fn into_vec(self) -> Vec<Record> {
        self.records
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, record) in self.records.iter().enumerate() {
            self.index.insert(record.id, pos);
        }
    }
}

impl PartialEq for RecordSet {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use chrono::{TimeZone, Utc};

    fn record(name: &str, amount: f64) -> Record {
        Record {
            id: RecordId::new(),
            name: name.to_string(),
            amount,
            category: Category::Other,
            location: None,
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_prepend_is_most_recent_first() {
        let mut set = RecordSet::new();
        let first = record("first", 10.0);
        let second = record("second", 5.0);

        set.prepend(first.clone()).unwrap();
        set.prepend(second.clone()).unwrap();

        assert_eq!(set.ids(), vec![second.id, first.id]);
        assert_eq!(set.get(&first.id).unwrap().name, "first");
    }

    #[test]
    fn test_prepend_rejects_duplicate_id() {
        let mut set = RecordSet::new();
        let r = record("lunch", 12.0);
        set.prepend(r.clone()).unwrap();

        let result = set.prepend(r.clone());
        assert!(matches!(result, Err(SyncError::DuplicateRecord(id)) if id == r.id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_replace_keeps_position() {
        let a = record("a", 1.0);
        let b = record("b", 2.0);
        let c = record("c", 3.0);
        let mut set = RecordSet::from_records(vec![a.clone(), b.clone(), c.clone()]);

        let mut edited = b.clone();
        edited.amount = 20.0;
        let previous = set.replace(edited).unwrap();

        assert_eq!(previous.amount, 2.0);
        assert_eq!(set.ids(), vec![a.id, b.id, c.id]);
        assert_eq!(set.get(&b.id).unwrap().amount, 20.0);
    }

    #[test]
    fn test_remove_reindexes() {
        let a = record("a", 1.0);
        let b = record("b", 2.0);
        let c = record("c", 3.0);
        let mut set = RecordSet::from_records(vec![a.clone(), b.clone(), c.clone()]);

        set.remove(&a.id).unwrap();

        assert!(!set.contains(&a.id));
        assert_eq!(set.get(&c.id).unwrap().name, "c");
        assert!(matches!(set.remove(&a.id), Err(SyncError::RecordNotFound(_))));
    }

    #[test]
    fn test_from_records_keeps_first_duplicate() {
        let a = record("a", 1.0);
        let mut shadow = a.clone();
        shadow.name = "shadow".into();

        let set = RecordSet::from_records(vec![a.clone(), shadow]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&a.id).unwrap().name, "a");
    }
}
