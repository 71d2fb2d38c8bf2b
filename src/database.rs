//! A database: a named group of collections sharing one storage engine
//! (C7). Grounded on the original's `database.py`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collection::Collection;
use crate::error::Result;
use crate::name::validate_name;
use crate::storage::Engine;
use crate::value::{Document, Value};

const REGISTRY_NAMESPACE: &str = "__registry__";

pub struct Database {
    engine: Arc<dyn Engine>,
    name: String,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
}

impl Database {
    pub(crate) fn open(engine: Arc<dyn Engine>, name: impl Into<String>) -> Result<Database> {
        let name = name.into();
        validate_name("database", &name)?;
        Ok(Database {
            engine,
            name,
            collections: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn namespaced(&self, collection: &str) -> String {
        format!("{}.{}", self.name, collection)
    }

    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        validate_name("collection", name)?;
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let handle = Arc::new(Collection::open(Arc::clone(&self.engine), self.namespaced(name))?);
        self.register(name)?;
        collections.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn register(&self, collection: &str) -> Result<()> {
        let key = self.namespaced(REGISTRY_NAMESPACE);
        let mut names = self.list_collection_names()?;
        if !names.iter().any(|n| n == collection) {
            names.push(collection.to_string());
            let mut doc = Document::new();
            doc.insert(
                "names",
                Value::List(names.into_iter().map(Value::String).collect()),
            );
            self.engine.put_metadata(&key, &doc)?;
        }
        Ok(())
    }

    pub fn list_collection_names(&self) -> Result<Vec<String>> {
        let key = self.namespaced(REGISTRY_NAMESPACE);
        let Some(doc) = self.engine.get_metadata(&key)? else {
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

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.lock();
        if let Some(handle) = collections.remove(name) {
            handle.drop()?;
        } else {
            self.engine.delete_dir(&self.namespaced(name))?;
        }

        let key = self.namespaced(REGISTRY_NAMESPACE);
        let remaining: Vec<String> = self
            .list_collection_names()?
            .into_iter()
            .filter(|n| n != name)
            .collect();
        let mut doc = Document::new();
        doc.insert(
            "names",
            Value::List(remaining.into_iter().map(Value::String).collect()),
        );
        self.engine.put_metadata(&key, &doc)
    }

    pub fn drop(&self) -> Result<()> {
        let names = self.list_collection_names()?;
        for name in names {
            self.drop_collection(&name)?;
        }
        self.engine.delete_dir(&self.namespaced(REGISTRY_NAMESPACE))
    }
}
