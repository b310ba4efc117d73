//! Table entry queue consumed by an Orch.

use crate::task::{TaskError, TaskResult};
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;

/// Operation carried by a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Add or update
    Set,
    /// Delete
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// A field-value pair of a table entry.
pub type FieldValue = (String, String);

/// Key, operation and field-values of one table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOpFieldsValues {
    /// The key (e.g. "Vnet_1000:aa:bb:cc:dd:ee:ff")
    pub key: String,
    pub op: Operation,
    /// Field-value pairs (empty for Del operations)
    pub fvs: Vec<FieldValue>,
}

impl KeyOpFieldsValues {
    pub fn new(key: impl Into<String>, op: Operation, fvs: Vec<FieldValue>) -> Self {
        Self {
            key: key.into(),
            op,
            fvs,
        }
    }

    /// Creates a Set entry.
    pub fn set(key: impl Into<String>, fvs: Vec<FieldValue>) -> Self {
        Self::new(key, Operation::Set, fvs)
    }

    /// Creates a Del entry.
    pub fn del(key: impl Into<String>) -> Self {
        Self::new(key, Operation::Del, vec![])
    }

    /// Returns the value for a field, if present.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fvs.iter().any(|(f, _)| f == field)
    }

    /// Parses an optional field.
    ///
    /// Absent fields yield `Ok(None)`; present but unparsable ones are errors.
    pub fn parse_field<T: FromStr>(&self, field: &str) -> TaskResult<Option<T>> {
        match self.get_field(field) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| TaskError::invalid_field(field, raw)),
        }
    }

    /// Parses a mandatory field.
    pub fn require_field<T: FromStr>(&self, field: &str) -> TaskResult<T> {
        self.parse_field(field)?
            .ok_or_else(|| TaskError::missing_field(field))
    }

    /// Parses a comma separated list field.
    ///
    /// Empty items are skipped, so `"1,,2"` and `"1, 2"` both yield two items.
    pub fn parse_list<T: FromStr>(&self, field: &str) -> TaskResult<Option<Vec<T>>> {
        let raw = match self.get_field(field) {
            None => return Ok(None),
            Some(raw) => raw,
        };

        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| item.parse().map_err(|_| TaskError::invalid_field(field, raw)))
            .collect::<TaskResult<Vec<T>>>()
            .map(Some)
    }
}

/// Configuration for a Consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Table name (e.g. "DASH_ENI_FORWARD_TABLE")
    pub table_name: String,
    /// Priority (lower = higher priority)
    pub priority: i32,
}

impl ConsumerConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Pending entries of one table.
///
/// Operations on the same key are coalesced:
/// - a DEL drops everything queued before it for that key
/// - consecutive SETs merge their field-values, newer values win
/// - a SET after a DEL is kept as a separate entry so ordering survives
pub struct Consumer {
    config: ConsumerConfig,
    to_sync: BTreeMap<String, VecDeque<KeyOpFieldsValues>>,
    pending_count: usize,
}

impl Consumer {
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            to_sync: BTreeMap::new(),
            pending_count: 0,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Queues entries, coalescing per key.
    pub fn add_to_sync(&mut self, entries: Vec<KeyOpFieldsValues>) {
        for entry in entries {
            self.add_single_entry(entry);
        }
    }

    fn add_single_entry(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();

        if entry.op.is_del() {
            self.pending_count -= queue.len();
            queue.clear();
            queue.push_back(entry);
            self.pending_count += 1;
            return;
        }

        match queue.back_mut() {
            Some(last) if last.op.is_set() => {
                for (field, value) in entry.fvs {
                    match last.fvs.iter_mut().find(|(f, _)| *f == field) {
                        Some(existing) => existing.1 = value,
                        None => last.fvs.push((field, value)),
                    }
                }
            }
            _ => {
                queue.push_back(entry);
                self.pending_count += 1;
            }
        }
    }

    /// Removes and returns all pending entries, per key in arrival order.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let mut result = Vec::with_capacity(self.pending_count);
        for (_, queue) in std::mem::take(&mut self.to_sync) {
            result.extend(queue);
        }
        self.pending_count = 0;
        result
    }

    /// Puts a failed entry back in front of anything queued for its key.
    pub fn retry(&mut self, entry: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();
        queue.push_front(entry);
        self.pending_count += 1;
    }

    pub fn clear(&mut self) {
        self.to_sync.clear();
        self.pending_count = 0;
    }

    /// Dumps pending entries for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.to_sync
            .iter()
            .flat_map(|(key, queue)| {
                queue.iter().map(move |e| {
                    format!("{}: {} {:?}", key, if e.op.is_set() { "SET" } else { "DEL" }, e.fvs)
                })
            })
            .collect()
    }
}
