//! The in-memory storage engine (C3): same contract as the disk engine,
//! backed by a plain map. In `strict` mode every write round-trips
//! through the BSON codec so non-representable values fail fast, exactly
//! as the original's `memory_engine.py` describes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Instant;

use parking_lot::ReentrantMutex;

use crate::codec;
use crate::error::{Error, Result};
use crate::value::{Document, Value};

use super::Engine;

#[derive(Default)]
struct MemoryState {
    /// Insertion order per collection, independent of the lookup map so
    /// deletions don't disturb the order of what remains.
    order: HashMap<String, Vec<String>>,
    storage: HashMap<(String, String), Document>,
    metadata: HashMap<String, (Document, Instant)>,
}

pub struct MemoryEngine {
    strict: bool,
    state: ReentrantMutex<RefCell<MemoryState>>,
}

impl MemoryEngine {
    pub fn open(strict: bool) -> Self {
        MemoryEngine {
            strict,
            state: ReentrantMutex::new(RefCell::new(MemoryState::default())),
        }
    }
}

impl Engine for MemoryEngine {
    fn put_doc(&self, collection: &str, doc: &Document, no_overwrite: bool) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = doc
            .get("_id")
            .ok_or_else(|| Error::BadArgument("document has no _id".into()))?
            .id_key()?;
        let key = (collection.to_string(), id.clone());

        if no_overwrite && state.storage.contains_key(&key) {
            return Ok(false);
        }

        let stored = if self.strict {
            codec::roundtrip(doc)?
        } else {
            doc.clone()
        };

        let is_new = !state.storage.contains_key(&key);
        state.storage.insert(key, stored);
        if is_new {
            state.order.entry(collection.to_string()).or_default().push(id);
        }
        Ok(true)
    }

    fn get_doc(&self, collection: &str, id: &Value) -> Result<Option<Document>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let id = id.id_key()?;
        Ok(state.storage.get(&(collection.to_string(), id)).cloned())
    }

    fn doc_exists(&self, collection: &str, id: &Value) -> Result<bool> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let id = id.id_key()?;
        Ok(state.storage.contains_key(&(collection.to_string(), id)))
    }

    fn delete_doc(&self, collection: &str, id: &Value) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = id.id_key()?;
        let removed = state
            .storage
            .remove(&(collection.to_string(), id.clone()))
            .is_some();
        if removed {
            if let Some(order) = state.order.get_mut(collection) {
                order.retain(|existing| existing != &id);
            }
        }
        Ok(removed)
    }

    fn list_ids(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Value>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let ids = state.order.get(collection).cloned().unwrap_or_default();
        let ids = match limit {
            Some(n) => ids.into_iter().take(n).collect(),
            None => ids,
        };
        Ok(ids.into_iter().map(id_to_value).collect())
    }

    fn put_metadata(&self, collection: &str, metadata: &Document) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state
            .metadata
            .insert(collection.to_string(), (metadata.clone(), Instant::now()));
        Ok(())
    }

    fn get_metadata(&self, collection: &str) -> Result<Option<Document>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        Ok(state.metadata.get(collection).map(|(doc, _)| doc.clone()))
    }

    fn touch_metadata(&self, collection: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(entry) = state.metadata.get_mut(collection) {
            entry.1 = Instant::now();
        }
        Ok(())
    }

    fn delete_dir(&self, collection: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.storage.retain(|(c, _), _| c != collection);
        state.order.remove(collection);
        state.metadata.remove(collection);
        Ok(())
    }

    fn create_path(&self, _collection: &str) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.storage.clear();
        state.order.clear();
        state.metadata.clear();
        Ok(())
    }
}

fn id_to_value(key: String) -> Value {
    match bson::oid::ObjectId::parse_str(&key) {
        Ok(oid) if oid.to_hex() == key => Value::ObjectId(oid),
        _ => Value::String(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_id(id: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("_id", Value::String(id.to_string()));
        doc
    }

    #[test]
    fn put_and_get_roundtrip() {
        let engine = MemoryEngine::open(false);
        let doc = doc_with_id("a");
        assert!(engine.put_doc("coll", &doc, false).unwrap());
        assert_eq!(
            engine.get_doc("coll", &Value::String("a".into())).unwrap(),
            Some(doc)
        );
    }

    #[test]
    fn strict_mode_roundtrips_through_bson() {
        let engine = MemoryEngine::open(true);
        let mut doc = doc_with_id("a");
        doc.insert("n", Value::Int64(7));
        engine.put_doc("coll", &doc, false).unwrap();
        let fetched = engine
            .get_doc("coll", &Value::String("a".into()))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.get("n"), Some(&Value::Int64(7)));
    }

    #[test]
    fn list_ids_preserves_insertion_order_after_delete() {
        let engine = MemoryEngine::open(false);
        for id in ["a", "b", "c"] {
            engine.put_doc("coll", &doc_with_id(id), false).unwrap();
        }
        engine.delete_doc("coll", &Value::String("b".into())).unwrap();
        let ids = engine.list_ids("coll", None).unwrap();
        assert_eq!(ids, vec![Value::String("a".into()), Value::String("c".into())]);
    }
}
