//! BSON encode/decode for [`Document`] (C1). The storage engine treats the
//! encoded bytes as an opaque framed slot; everything above it works with
//! [`Document`]/[`Value`] directly.

use crate::error::Result;
use crate::value::{document_from_bson, document_to_bson, Document};

/// Encodes a document to its BSON byte representation. The first four
/// bytes are a little-endian signed length prefix covering the whole
/// encoding, per the BSON document framing the storage engine relies on.
pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    let bson_doc = document_to_bson(doc.clone());
    Ok(bson::to_vec(&bson_doc)?)
}

pub fn decode(bytes: &[u8]) -> Result<Document> {
    let bson_doc: bson::Document = bson::from_slice(bytes)?;
    document_from_bson(bson_doc)
}

/// `encode ∘ decode = id` on the domain of BSON-representable documents
/// (spec §8, Laws).
pub fn roundtrip(doc: &Document) -> Result<Document> {
    decode(&encode(doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn roundtrips_a_document() {
        let mut doc = Document::new();
        doc.insert("name", Value::String("alice".into()));
        doc.insert("age", Value::Int64(30));
        doc.insert("tags", Value::List(vec![Value::String("a".into())]));
        let decoded = roundtrip(&doc).unwrap();
        assert_eq!(decoded, doc);
    }
}
