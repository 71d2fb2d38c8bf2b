//! An embedded document store speaking a deliberate subset of a
//! MongoDB-style API: single-process, single-document atomicity, a disk
//! engine and a memory engine behind one contract, and an index-assisted
//! query planner over a small filter/update grammar.

pub mod client;
pub mod codec;
pub mod collection;
pub mod cursor;
pub mod database;
pub mod error;
pub mod index;
pub mod name;
pub mod query;
pub mod results;
pub mod storage;
pub mod value;

pub use client::Client;
pub use collection::Collection;
pub use cursor::Cursor;
pub use database::Database;
pub use error::{Error, Result};
pub use query::SortDirection;
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
pub use value::{Document, Value};
