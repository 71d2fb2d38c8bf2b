//! The secondary index subsystem (C4): an ordered encode of a field's
//! value used as a sort/seek key, and a per-collection manager tracking
//! one ordered map per declared index. Grounded on the query acceleration
//! `collection.py` describes (`_indices`/`_get_ids_from_index`), expressed
//! here as a real ordered structure rather than a linear scan.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::value::{self, Document, Value};

mod key;

pub use key::EncKey;

/// One declared secondary index: the dotted field path it's built over,
/// its sort direction (`+1`/`-1`, spec §3/§4.4), and whether it enforces
/// uniqueness (an extension beyond the spec's index descriptor, kept for
/// the original's `unique` index support).
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub direction: i32,
    pub unique: bool,
}

/// An ordered map from a field's encoded value to the ids of every
/// document holding it, in insertion order (spec §4.4/§4.5). `direction`
/// reverses the order `all_ids` enumerates in; `-1` reverses iteration
/// per the spec's ordering invariant.
#[derive(Debug, Default)]
pub struct SecondaryIndex {
    spec_unique: bool,
    field: String,
    direction: i32,
    entries: BTreeMap<EncKey, Vec<Value>>,
}

impl SecondaryIndex {
    pub fn new(spec: &IndexSpec) -> Self {
        SecondaryIndex {
            spec_unique: spec.unique,
            field: spec.field.clone(),
            direction: spec.direction,
            entries: BTreeMap::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn direction(&self) -> i32 {
        self.direction
    }

    /// Every id in the index, walked in the index's own direction.
    pub fn all_ids(&self) -> Vec<Value> {
        let mut out = Vec::new();
        if self.direction >= 0 {
            for ids in self.entries.values() {
                out.extend(ids.iter().cloned());
            }
        } else {
            for ids in self.entries.values().rev() {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    /// Rebuilds the index from scratch over every `(id, doc)` pair.
    pub fn build<'a>(&mut self, docs: impl Iterator<Item = (&'a Value, &'a Document)>) -> Result<()> {
        self.entries.clear();
        for (id, doc) in docs {
            self.insert_one(id, doc)?;
        }
        Ok(())
    }

    /// Inserts one posting per key a document contributes to this index:
    /// the field's whole value, plus (for a list-valued field) one entry
    /// per element (spec §4.4 `build`, invariant 1).
    fn insert_one(&mut self, id: &Value, doc: &Document) -> Result<()> {
        let field_value = value::get(doc, &self.field).unwrap_or(Value::Null);
        self.insert_key(id, &field_value)?;
        if let Value::List(items) = &field_value {
            for item in items {
                self.insert_key(id, item)?;
            }
        }
        Ok(())
    }

    fn insert_key(&mut self, id: &Value, key_value: &Value) -> Result<()> {
        let key = EncKey::new(key_value);
        let bucket = self.entries.entry(key).or_default();
        if self.spec_unique && !bucket.is_empty() && !bucket.contains(id) {
            return Err(crate::error::Error::DuplicateKey(format!(
                "index on {:?} already has a document with this key",
                self.field
            )));
        }
        if !bucket.contains(id) {
            bucket.push(id.clone());
        }
        Ok(())
    }

    pub fn apply_insert(&mut self, id: &Value, doc: &Document) -> Result<()> {
        self.insert_one(id, doc)
    }

    pub fn apply_delete(&mut self, id: &Value, doc: &Document) {
        let field_value = value::get(doc, &self.field).unwrap_or(Value::Null);
        self.remove_key(id, &field_value);
        if let Value::List(items) = &field_value {
            for item in items {
                self.remove_key(id, item);
            }
        }
    }

    fn remove_key(&mut self, id: &Value, key_value: &Value) {
        let key = EncKey::new(key_value);
        if let Some(bucket) = self.entries.get_mut(&key) {
            bucket.retain(|existing| existing != id);
            if bucket.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn apply_update(&mut self, id: &Value, old_doc: &Document, new_doc: &Document) -> Result<()> {
        self.apply_delete(id, old_doc);
        self.insert_one(id, new_doc)
    }

    /// Ids of every document whose indexed field value equals `target`,
    /// in the index's key order.
    pub fn ids_eq(&self, target: &Value) -> Vec<Value> {
        self.entries
            .get(&EncKey::new(target))
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of every document whose indexed field value satisfies the
    /// inequality operator against `target` (`$lt/$lte/$gt/$gte`),
    /// walking the ordered map instead of scanning every document.
    /// Restricted to keys sharing `target`'s type tag: spec §4.5 says a
    /// range scan has "no cross-type matches", since `type_tag` ordering
    /// would otherwise pull in every lower- or higher-tagged value too.
    pub fn ids_matching(&self, op: RangeOp, target: &Value) -> Vec<Value> {
        let target_tag = target.type_tag();
        let target_key = EncKey::new(target);
        let mut out = Vec::new();
        match op {
            RangeOp::Lt => {
                for (k, ids) in self.entries.range(..target_key) {
                    if k.type_tag() == target_tag {
                        out.extend(ids.iter().cloned());
                    }
                }
            }
            RangeOp::Lte => {
                for (k, ids) in self.entries.range(..=target_key) {
                    if k.type_tag() == target_tag {
                        out.extend(ids.iter().cloned());
                    }
                }
            }
            RangeOp::Gt => {
                for (k, ids) in self.entries.iter() {
                    if k.type_tag() == target_tag && *k > target_key {
                        out.extend(ids.iter().cloned());
                    }
                }
            }
            RangeOp::Gte => {
                for (k, ids) in self.entries.iter() {
                    if k.type_tag() == target_tag && *k >= target_key {
                        out.extend(ids.iter().cloned());
                    }
                }
            }
        }
        out
    }

    pub fn ids_in(&self, targets: &[Value]) -> Vec<Value> {
        let mut out = Vec::new();
        for target in targets {
            out.extend(self.ids_eq(target));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Lt,
    Lte,
    Gt,
    Gte,
}
