//! Storage engines (C2/C3): a per-collection slotted disk file and a
//! parallel in-memory map, behind one shared contract.

mod disk;
mod memory;

pub use disk::DiskEngine;
pub use memory::MemoryEngine;

use crate::error::Result;
use crate::value::{Document, Value};

/// The contract both storage engines satisfy. Every method is
/// synchronous and, per implementation, serialised behind a reentrant
/// lock (spec §5): callers never see a torn write.
pub trait Engine: Send + Sync {
    /// Writes `doc` under its own `_id`. When `no_overwrite` is set and a
    /// document already exists at that id, returns `Ok(false)` without
    /// writing.
    fn put_doc(&self, collection: &str, doc: &Document, no_overwrite: bool) -> Result<bool>;

    fn get_doc(&self, collection: &str, id: &Value) -> Result<Option<Document>>;

    fn doc_exists(&self, collection: &str, id: &Value) -> Result<bool>;

    /// Returns `true` if a document existed and was removed.
    fn delete_doc(&self, collection: &str, id: &Value) -> Result<bool>;

    /// Ids in the collection's insertion order (for disk, the order
    /// visible in the position index; for memory, map insertion order).
    fn list_ids(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Value>>;

    fn put_metadata(&self, collection: &str, metadata: &Document) -> Result<()>;

    fn get_metadata(&self, collection: &str) -> Result<Option<Document>>;

    /// Refreshes a metadata record's staleness clock without changing its
    /// content (used to signal liveness during long batch operations).
    fn touch_metadata(&self, collection: &str) -> Result<()>;

    fn delete_dir(&self, collection: &str) -> Result<()>;

    fn create_path(&self, collection: &str) -> Result<()>;

    fn close(&self) -> Result<()>;
}
