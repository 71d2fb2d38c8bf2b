//! The top-level client (C7): owns the storage engine and the database
//! registry. Grounded on the original's `mongita_client.py`
//! (`MongitaClientDisk`/`MongitaClientMemory`).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::database::Database;
use crate::error::Result;
use crate::name::validate_name;
use crate::storage::{DiskEngine, Engine, MemoryEngine};
use crate::value::{Document, Value};

const REGISTRY_KEY: &str = "__client_registry__";

pub struct Client {
    engine: Arc<dyn Engine>,
    databases: Mutex<HashMap<String, Arc<Database>>>,
}

impl Client {
    pub fn open_disk(path: impl AsRef<Path>) -> Result<Client> {
        let engine = DiskEngine::open(path)?;
        Ok(Client::with_engine(engine))
    }

    pub fn open_memory() -> Client {
        Client::with_engine(Arc::new(MemoryEngine::open(false)))
    }

    /// An in-memory client whose writes round-trip through the BSON
    /// codec, so bugs that only a disk-backed client would catch (an
    /// un-encodable value, a silently truncated type) surface in tests
    /// that never touch the filesystem.
    pub fn open_memory_strict() -> Client {
        Client::with_engine(Arc::new(MemoryEngine::open(true)))
    }

    fn with_engine(engine: Arc<dyn Engine>) -> Client {
        Client {
            engine,
            databases: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self, name: &str) -> Result<Arc<Database>> {
        validate_name("database", name)?;
        let mut databases = self.databases.lock();
        if let Some(existing) = databases.get(name) {
            return Ok(Arc::clone(existing));
        }
        let handle = Arc::new(Database::open(Arc::clone(&self.engine), name)?);
        self.register(name)?;
        databases.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn register(&self, name: &str) -> Result<()> {
        let mut names = self.list_database_names()?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            let mut doc = Document::new();
            doc.insert(
                "names",
                Value::List(names.into_iter().map(Value::String).collect()),
            );
            self.engine.put_metadata(REGISTRY_KEY, &doc)?;
        }
        Ok(())
    }

    pub fn list_database_names(&self) -> Result<Vec<String>> {
        let Some(doc) = self.engine.get_metadata(REGISTRY_KEY)? else {
            return Ok(Vec::new());
        };
        Ok(doc
            .get("names")
            .and_then(Value::as_list)
            .unwrap_or(&[])
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    pub fn drop_database(&self, name: &str) -> Result<()> {
        let mut databases = self.databases.lock();
        let handle = match databases.remove(name) {
            Some(handle) => handle,
            None => Arc::new(Database::open(Arc::clone(&self.engine), name)?),
        };
        handle.drop()?;

        let remaining: Vec<String> = self
            .list_database_names()?
            .into_iter()
            .filter(|n| n != name)
            .collect();
        let mut doc = Document::new();
        doc.insert(
            "names",
            Value::List(remaining.into_iter().map(Value::String).collect()),
        );
        self.engine.put_metadata(REGISTRY_KEY, &doc)
    }

    pub fn close(&self) -> Result<()> {
        self.engine.close()
    }
}
