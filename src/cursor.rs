//! A lazy result cursor (C8): `sort`/`limit`/`skip` configure the query
//! and may only be called before iteration starts, matching the
//! original's `cursor.py`.

use std::sync::Arc;

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::query::SortDirection;
use crate::value::Document;

pub struct Cursor {
    collection: Arc<Collection>,
    filter: Document,
    sort: Vec<(String, SortDirection)>,
    skip: usize,
    limit: Option<usize>,
    started: bool,
    buffer: Option<std::vec::IntoIter<Document>>,
}

impl Cursor {
    pub(crate) fn new(collection: Arc<Collection>, filter: Document) -> Cursor {
        Cursor {
            collection,
            filter,
            sort: Vec::new(),
            skip: 0,
            limit: None,
            started: false,
            buffer: None,
        }
    }

    fn check_not_started(&self) -> Result<()> {
        if self.started {
            Err(Error::InvalidOperation(
                "cannot modify a cursor after iteration has started".into(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Result<Cursor> {
        self.check_not_started()?;
        self.sort.push((field.into(), direction));
        Ok(self)
    }

    pub fn skip(mut self, n: usize) -> Result<Cursor> {
        self.check_not_started()?;
        self.skip = n;
        Ok(self)
    }

    pub fn limit(mut self, n: usize) -> Result<Cursor> {
        self.check_not_started()?;
        self.limit = Some(n);
        Ok(self)
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            self.started = true;
            let docs = self
                .collection
                .find(&self.filter, &self.sort, self.skip, self.limit)?;
            self.buffer = Some(docs.into_iter());
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<Option<Document>> {
        self.ensure_started()?;
        Ok(self.buffer.as_mut().expect("just started").next())
    }

    pub fn collect(mut self) -> Result<Vec<Document>> {
        self.ensure_started()?;
        Ok(self.buffer.expect("just started").collect())
    }

    pub fn close(mut self) {
        self.buffer = Some(Vec::new().into_iter());
        self.started = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;

    #[test]
    fn sort_after_first_next_is_rejected() {
        let client = Client::open_memory();
        let db = client.database("d").unwrap();
        let coll = db.collection("c").unwrap();
        coll.insert_one(Document::new()).unwrap();

        let mut cursor = Cursor::new(coll, Document::new());
        cursor.next().unwrap();
        assert!(cursor.sort("x", SortDirection::Asc).is_err());
    }
}
