//! Operation result types, kept deliberately thin (grounded on the
//! original's `results.py`, which is itself a handful of plain records).

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

#[derive(Debug, Clone)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}
