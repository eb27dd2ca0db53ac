use std::collections::HashMap;

use crate::models::ArticleRecord;

/// Resolved articles keyed by article id. Insertion is idempotent.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    records: Vec<ArticleRecord>,
    index: HashMap<String, usize>,
}

impl ResultSet {
    /// Returns false when a record with the same id is already present
    pub fn insert(&mut self, record: ArticleRecord) -> bool {
        if self.index.contains_key(&record.id) {
            return false;
        }
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ArticleRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in completion order
    pub fn iter(&self) -> impl Iterator<Item = &ArticleRecord> {
        self.records.iter()
    }
}
