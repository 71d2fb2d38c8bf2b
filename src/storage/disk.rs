//! The disk storage engine (C2): a per-collection slotted append file
//! (`$.data`) with a position index (`$.file_attrs`) and metadata
//! (`$.metadata`), grounded on the original's `v1/engines/disk_engine.py`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;

use crate::codec;
use crate::error::{Error, Result};
use crate::name::secure_filename;
use crate::value::{document_from_bson, document_to_bson, Document, Value};

use super::Engine;

const DATA_FILE: &str = "$.data";
const FILE_ATTRS_FILE: &str = "$.file_attrs";
const METADATA_FILE: &str = "$.metadata";

/// Position index for one collection: doc id -> byte offset into
/// `$.data`, plus the byte accounting used to decide when to compact.
/// The backing vector preserves insertion order, matching the ordering
/// a BSON document's keys would have on disk.
#[derive(Debug, Clone, Default)]
struct FileAttrs {
    loc_idx: Vec<(String, i64)>,
    spare_bytes: i64,
    total_bytes: i64,
}

impl FileAttrs {
    fn get(&self, id: &str) -> Option<i64> {
        self.loc_idx.iter().find(|(k, _)| k == id).map(|(_, v)| *v)
    }

    fn set(&mut self, id: &str, offset: i64) {
        if let Some(slot) = self.loc_idx.iter_mut().find(|(k, _)| k == id) {
            slot.1 = offset;
        } else {
            self.loc_idx.push((id.to_string(), offset));
        }
    }

    fn remove(&mut self, id: &str) -> Option<i64> {
        let idx = self.loc_idx.iter().position(|(k, _)| k == id)?;
        Some(self.loc_idx.remove(idx).1)
    }

    fn ids(&self, limit: Option<usize>) -> Vec<String> {
        let iter = self.loc_idx.iter().map(|(k, _)| k.clone());
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    fn to_bson(&self) -> bson::Document {
        let mut loc_idx = bson::Document::new();
        for (id, offset) in &self.loc_idx {
            loc_idx.insert(id.clone(), bson::Bson::Int64(*offset));
        }
        let mut doc = bson::Document::new();
        doc.insert("loc_idx", loc_idx);
        doc.insert("spare_bytes", bson::Bson::Int64(self.spare_bytes));
        doc.insert("total_bytes", bson::Bson::Int64(self.total_bytes));
        doc
    }

    fn from_bson(doc: bson::Document) -> Self {
        let loc_idx = doc
            .get_document("loc_idx")
            .map(|d| {
                d.iter()
                    .filter_map(|(k, v)| v.as_i64().map(|offset| (k.clone(), offset)))
                    .collect()
            })
            .unwrap_or_default();
        FileAttrs {
            loc_idx,
            spare_bytes: doc.get_i64("spare_bytes").unwrap_or(0),
            total_bytes: doc.get_i64("total_bytes").unwrap_or(0),
        }
    }
}

#[derive(Default)]
struct DiskState {
    collection_fhs: HashMap<String, File>,
    doc_cache: HashMap<(String, String), Document>,
    file_attrs: HashMap<String, FileAttrs>,
    metadata_cache: HashMap<String, Document>,
}

pub struct DiskEngine {
    base: PathBuf,
    state: ReentrantMutex<RefCell<DiskState>>,
}

static INCUMBENTS: OnceLock<Mutex<HashMap<PathBuf, Arc<DiskEngine>>>> = OnceLock::new();

impl DiskEngine {
    /// Opens (or reuses, per the process-wide incumbent registry — spec
    /// §9) the engine rooted at `base`.
    pub fn open(base: impl AsRef<Path>) -> Result<Arc<DiskEngine>> {
        std::fs::create_dir_all(base.as_ref())?;
        let canonical = std::fs::canonicalize(base.as_ref())?;
        let registry = INCUMBENTS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut registry = registry.lock().expect("incumbent registry poisoned");
        if let Some(existing) = registry.get(&canonical) {
            return Ok(Arc::clone(existing));
        }
        let engine = Arc::new(DiskEngine {
            base: canonical.clone(),
            state: ReentrantMutex::new(RefCell::new(DiskState::default())),
        });
        registry.insert(canonical, Arc::clone(&engine));
        Ok(engine)
    }

    fn coll_dir(&self, collection: &str) -> Result<PathBuf> {
        let dir = self.base.join(secure_filename(collection));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Borrows only the file-handle table, so callers can hold a mutable
    /// borrow of `state.file_attrs`/`state.doc_cache` at the same time.
    fn get_coll_fh<'a>(
        &self,
        fhs: &'a mut HashMap<String, File>,
        collection: &str,
    ) -> Result<&'a mut File> {
        if !fhs.contains_key(collection) {
            let path = self.coll_dir(collection)?.join(DATA_FILE);
            let fh = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;
            fhs.insert(collection.to_string(), fh);
        }
        Ok(fhs.get_mut(collection).expect("just inserted"))
    }

    fn load_file_attrs(&self, collection: &str) -> Result<FileAttrs> {
        let path = self.coll_dir(collection)?.join(FILE_ATTRS_FILE);
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            if !bytes.is_empty() {
                let doc: bson::Document = bson::from_slice(&bytes)?;
                return Ok(FileAttrs::from_bson(doc));
            }
        }
        // No (usable) position index: if there is data on disk, rebuild
        // by a sequential rescan rather than silently losing it.
        let data_path = self.coll_dir(collection)?.join(DATA_FILE);
        if data_path.exists() {
            let bytes = std::fs::read(&data_path)?;
            if !bytes.is_empty() {
                return Ok(rescan_data(&bytes));
            }
        }
        Ok(FileAttrs::default())
    }

    fn write_file_attrs(&self, collection: &str, attrs: &FileAttrs) -> Result<()> {
        let path = self.coll_dir(collection)?.join(FILE_ATTRS_FILE);
        let bytes = bson::to_vec(&attrs.to_bson())?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn ensure_attrs_loaded(&self, state: &mut DiskState, collection: &str) -> Result<()> {
        if !state.file_attrs.contains_key(collection) {
            let attrs = self.load_file_attrs(collection)?;
            state.file_attrs.insert(collection.to_string(), attrs);
        }
        Ok(())
    }

    /// Rewrites `$.data` contiguously from offset 0, dropping dead slots
    /// (spec §4.2, Compaction).
    fn defrag(&self, state: &mut DiskState, collection: &str) -> Result<()> {
        self.ensure_attrs_loaded(state, collection)?;
        let ids = state.file_attrs[collection].ids(None);
        let mut chunks = Vec::with_capacity(ids.len());
        for id in &ids {
            let cache_key = (collection.to_string(), id.clone());
            let encoded = if let Some(doc) = state.doc_cache.get(&cache_key) {
                codec::encode(doc)?
            } else {
                let offset = state.file_attrs[collection]
                    .get(id)
                    .expect("id came from this collection's loc_idx");
                let fh = self.get_coll_fh(&mut state.collection_fhs, collection)?;
                fh.seek(SeekFrom::Start(offset as u64))?;
                let mut len_bytes = [0u8; 4];
                fh.read_exact(&mut len_bytes)?;
                let doc_len = i32::from_le_bytes(len_bytes) as usize;
                let mut rest = vec![0u8; doc_len - 4];
                fh.read_exact(&mut rest)?;
                let mut full = len_bytes.to_vec();
                full.extend(rest);
                full
            };
            chunks.push(encoded);
        }

        let mut write_pos: i64 = 0;
        let mut new_loc_idx = Vec::with_capacity(ids.len());
        for (id, encoded) in ids.iter().zip(chunks.iter()) {
            new_loc_idx.push((id.clone(), write_pos));
            write_pos += encoded.len() as i64;
        }

        let fh = self.get_coll_fh(&mut state.collection_fhs, collection)?;
        fh.seek(SeekFrom::Start(0))?;
        for chunk in &chunks {
            fh.write_all(chunk)?;
        }
        fh.set_len(write_pos as u64)?;
        fh.flush()?;

        let attrs = state.file_attrs.get_mut(collection).expect("loaded above");
        attrs.loc_idx = new_loc_idx;
        attrs.spare_bytes = 0;
        attrs.total_bytes = write_pos;
        Ok(())
    }
}

/// Sequentially decodes `$.data`, skipping zero-filled dead regions
/// (identified by an all-zero four-byte length word), to recover the
/// position index when `$.file_attrs` is missing or unreadable.
fn rescan_data(bytes: &[u8]) -> FileAttrs {
    let mut attrs = FileAttrs::default();
    let mut pos = 0usize;
    while pos + 4 <= bytes.len() {
        let len_word = &bytes[pos..pos + 4];
        if len_word == [0, 0, 0, 0] {
            pos += 4;
            continue;
        }
        let doc_len = i32::from_le_bytes(len_word.try_into().expect("4 bytes")) as usize;
        if doc_len < 5 || pos + doc_len > bytes.len() {
            break;
        }
        if let Ok(doc) = bson::from_slice::<bson::Document>(&bytes[pos..pos + doc_len]) {
            if let Some(id) = doc.get("_id") {
                if let Some(id_str) = bson_id_to_key(id) {
                    attrs.set(&id_str, pos as i64);
                    attrs.total_bytes += doc_len as i64;
                }
            }
        }
        pos += doc_len;
    }
    attrs
}

fn bson_id_to_key(id: &bson::Bson) -> Option<String> {
    match id {
        bson::Bson::ObjectId(oid) => Some(oid.to_hex()),
        bson::Bson::String(s) => Some(s.clone()),
        _ => None,
    }
}

impl Engine for DiskEngine {
    fn put_doc(&self, collection: &str, doc: &Document, no_overwrite: bool) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = doc
            .get("_id")
            .ok_or_else(|| Error::BadArgument("document has no _id".into()))?
            .id_key()?;

        self.ensure_attrs_loaded(&mut state, collection)?;
        if no_overwrite && state.file_attrs[collection].get(&id).is_some() {
            return Ok(false);
        }

        let cache_key = (collection.to_string(), id.clone());
        state.doc_cache.insert(cache_key, doc.clone());
        let encoded = codec::encode(doc)?;

        let old_pos = state.file_attrs[collection].get(&id);
        if let Some(old_pos) = old_pos {
            let fh = self.get_coll_fh(&mut state.collection_fhs, collection)?;
            fh.seek(SeekFrom::Start(old_pos as u64))?;
            let old_len = fh.read_i32::<LittleEndian>()? as i64;
            let spare = old_len - encoded.len() as i64;
            if spare >= 0 {
                fh.seek(SeekFrom::Start(old_pos as u64))?;
                fh.write_all(&encoded)?;
                fh.write_all(&vec![0u8; spare as usize])?;
                fh.flush()?;
                let attrs = state.file_attrs.get_mut(collection).expect("loaded above");
                attrs.spare_bytes += spare;
                attrs.total_bytes -= spare;
                return Ok(true);
            }
            // The new encoding no longer fits its old slot: the old slot
            // becomes dead space (zero-filled, same as delete_doc) and
            // the document gets a fresh slot appended at the end.
            fh.seek(SeekFrom::Start(old_pos as u64))?;
            fh.write_all(&vec![0u8; old_len as usize])?;
            fh.flush()?;
            let attrs = state.file_attrs.get_mut(collection).expect("loaded above");
            attrs.spare_bytes += old_len;
            attrs.total_bytes -= old_len;
        }

        let fh = self.get_coll_fh(&mut state.collection_fhs, collection)?;
        let new_pos = fh.seek(SeekFrom::End(0))?;
        fh.write_all(&encoded)?;
        fh.flush()?;
        let attrs = state.file_attrs.get_mut(collection).expect("loaded above");
        attrs.set(&id, new_pos as i64);
        attrs.total_bytes += encoded.len() as i64;
        Ok(true)
    }

    fn get_doc(&self, collection: &str, id: &Value) -> Result<Option<Document>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = id.id_key()?;
        let cache_key = (collection.to_string(), id.clone());
        if let Some(doc) = state.doc_cache.get(&cache_key) {
            return Ok(Some(doc.clone()));
        }

        self.ensure_attrs_loaded(&mut state, collection)?;
        let Some(offset) = state.file_attrs[collection].get(&id) else {
            return Ok(None);
        };
        let fh = self.get_coll_fh(&mut state.collection_fhs, collection)?;
        fh.seek(SeekFrom::Start(offset as u64))?;
        let mut len_bytes = [0u8; 4];
        fh.read_exact(&mut len_bytes)?;
        let doc_len = i32::from_le_bytes(len_bytes) as usize;
        let mut rest = vec![0u8; doc_len - 4];
        fh.read_exact(&mut rest)?;
        let mut full = len_bytes.to_vec();
        full.extend(rest);
        let doc = codec::decode(&full)?;
        state.doc_cache.insert(cache_key, doc.clone());
        Ok(Some(doc))
    }

    fn doc_exists(&self, collection: &str, id: &Value) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = id.id_key()?;
        self.ensure_attrs_loaded(&mut state, collection)?;
        Ok(state.file_attrs[collection].get(&id).is_some())
    }

    fn delete_doc(&self, collection: &str, id: &Value) -> Result<bool> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let id = id.id_key()?;
        self.ensure_attrs_loaded(&mut state, collection)?;
        let Some(offset) = state.file_attrs[collection].get(&id) else {
            return Ok(false);
        };

        let fh = self.get_coll_fh(&mut state.collection_fhs, collection)?;
        fh.seek(SeekFrom::Start(offset as u64))?;
        let old_len = fh.read_i32::<LittleEndian>()? as i64;
        fh.seek(SeekFrom::Start(offset as u64))?;
        fh.write_all(&vec![0u8; old_len as usize])?;
        fh.flush()?;

        let attrs = state.file_attrs.get_mut(collection).expect("loaded above");
        attrs.remove(&id);
        attrs.total_bytes -= old_len;
        attrs.spare_bytes += old_len;
        state.doc_cache.remove(&(collection.to_string(), id));
        Ok(true)
    }

    fn list_ids(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Value>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        self.ensure_attrs_loaded(&mut state, collection)?;
        Ok(state.file_attrs[collection]
            .ids(limit)
            .into_iter()
            .map(id_key_to_value)
            .collect())
    }

    fn put_metadata(&self, collection: &str, metadata: &Document) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state
            .metadata_cache
            .insert(collection.to_string(), metadata.clone());

        let path = self.coll_dir(collection)?.join(METADATA_FILE);
        let bson_doc = document_to_bson(metadata.clone());
        std::fs::write(path, bson::to_vec(&bson_doc)?)?;

        self.ensure_attrs_loaded(&mut state, collection)?;
        let (spare_bytes, total_bytes) = {
            let attrs = &state.file_attrs[collection];
            (attrs.spare_bytes, attrs.total_bytes)
        };
        if spare_bytes as f64 / (1.0 + total_bytes as f64) > 0.5 {
            self.defrag(&mut state, collection)?;
        }

        let attrs = state.file_attrs[collection].clone();
        self.write_file_attrs(collection, &attrs)?;
        Ok(())
    }

    fn get_metadata(&self, collection: &str) -> Result<Option<Document>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(meta) = state.metadata_cache.get(collection) {
            return Ok(Some(meta.clone()));
        }
        let path = self.coll_dir(collection)?.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let bson_doc: bson::Document = bson::from_slice(&bytes)?;
        let doc = document_from_bson(bson_doc)?;
        state.metadata_cache.insert(collection.to_string(), doc.clone());
        Ok(Some(doc))
    }

    fn touch_metadata(&self, _collection: &str) -> Result<()> {
        // The disk engine's metadata carries no staleness clock of its
        // own (single-process model); nothing to refresh.
        Ok(())
    }

    fn delete_dir(&self, collection: &str) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(fh) = state.collection_fhs.remove(collection) {
            drop(fh);
        }
        state.doc_cache.retain(|(c, _), _| c != collection);
        state.metadata_cache.remove(collection);
        state.file_attrs.remove(collection);
        let dir = self.coll_dir(collection)?;
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn create_path(&self, collection: &str) -> Result<()> {
        self.coll_dir(collection)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.collection_fhs.clear();
        state.doc_cache.clear();
        state.file_attrs.clear();
        state.metadata_cache.clear();
        Ok(())
    }
}

fn id_key_to_value(key: String) -> Value {
    match bson::oid::ObjectId::parse_str(&key) {
        Ok(oid) if oid.to_hex() == key => Value::ObjectId(oid),
        _ => Value::String(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Document;

    fn doc_with_id(id: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("_id", Value::String(id.to_string()));
        doc.insert("n", Value::Int64(1));
        doc
    }

    #[test]
    fn put_and_get_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiskEngine::open(tmp.path()).unwrap();
        let doc = doc_with_id("a");
        assert!(engine.put_doc("coll", &doc, false).unwrap());
        let fetched = engine.get_doc("coll", &Value::String("a".into())).unwrap();
        assert_eq!(fetched, Some(doc));
    }

    #[test]
    fn no_overwrite_rejects_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiskEngine::open(tmp.path()).unwrap();
        let doc = doc_with_id("a");
        assert!(engine.put_doc("coll", &doc, true).unwrap());
        assert!(!engine.put_doc("coll", &doc, true).unwrap());
    }

    #[test]
    fn delete_removes_and_zero_fills() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiskEngine::open(tmp.path()).unwrap();
        let doc = doc_with_id("a");
        engine.put_doc("coll", &doc, false).unwrap();
        assert!(engine.delete_doc("coll", &Value::String("a".into())).unwrap());
        assert!(!engine.doc_exists("coll", &Value::String("a".into())).unwrap());
    }

    #[test]
    fn growing_a_doc_past_its_slot_zero_fills_the_old_one() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiskEngine::open(tmp.path()).unwrap();
        let mut small = doc_with_id("a");
        small.insert("pad", Value::String("x".into()));
        engine.put_doc("coll", &small, false).unwrap();

        let mut big = doc_with_id("a");
        big.insert("pad", Value::String("x".repeat(500)));
        engine.put_doc("coll", &big, false).unwrap();

        let fetched = engine.get_doc("coll", &Value::String("a".into())).unwrap();
        assert_eq!(fetched, Some(big));

        let mut meta = Document::new();
        meta.insert("touch", Value::Int64(1));
        engine.put_metadata("coll", &meta).unwrap();
        let refetched = engine.get_doc("coll", &Value::String("a".into())).unwrap();
        assert!(refetched.is_some());
    }

    #[test]
    fn compaction_shrinks_file_after_many_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DiskEngine::open(tmp.path()).unwrap();
        for i in 0..20 {
            let doc = doc_with_id(&format!("id{i}"));
            engine.put_doc("coll", &doc, false).unwrap();
        }
        for i in 0..15 {
            engine
                .delete_doc("coll", &Value::String(format!("id{i}")))
                .unwrap();
        }
        let mut meta = Document::new();
        meta.insert("touch", Value::Int64(1));
        engine.put_metadata("coll", &meta).unwrap();

        for i in 15..20 {
            let got = engine
                .get_doc("coll", &Value::String(format!("id{i}")))
                .unwrap();
            assert!(got.is_some());
        }
    }
}
