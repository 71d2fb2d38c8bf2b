//! The document value model (C1): a recursively typed tagged value, an
//! ordered document type built on it, dotted-path get/set, and the
//! MongoDB-style sort-order comparison used by the index subsystem.

use std::cmp::Ordering;
use std::convert::TryFrom;

use bson::oid::ObjectId;
use bson::Bson;

use crate::error::{Error, Result};

/// A single document value. Mirrors the BSON type universe closely enough
/// that encoding is a structural mapping, not a re-interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    ObjectId(ObjectId),
    Regex(String, String),
    Object(Document),
    List(Vec<Value>),
}

/// An ordered mapping from field name to [`Value`]. Order is insertion
/// order and is preserved through get/set/encode/decode round trips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(Vec<(String, Value)>);

impl Document {
    pub fn new() -> Self {
        Document(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Inserts, replacing the value in place if the key already exists
    /// (preserving its original position) or appending otherwise.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

/// Type tags fixing the MongoDB-style sort order (spec §4.4 / §6.2).
pub mod type_tag {
    pub const NULL: u8 = 0x01;
    pub const NUMERIC: u8 = 0x02;
    pub const STRING: u8 = 0x03;
    pub const OBJECT: u8 = 0x04;
    pub const LIST: u8 = 0x05;
    pub const BINARY: u8 = 0x06;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOL: u8 = 0x08;
    pub const DATETIME: u8 = 0x09;
    pub const REGEX: u8 = 0x0A;
}

impl Value {
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Null => type_tag::NULL,
            Value::Int64(_) | Value::Double(_) => type_tag::NUMERIC,
            Value::String(_) => type_tag::STRING,
            Value::Object(_) => type_tag::OBJECT,
            Value::List(_) => type_tag::LIST,
            Value::Binary(_) => type_tag::BINARY,
            Value::ObjectId(_) => type_tag::OBJECT_ID,
            Value::Bool(_) => type_tag::BOOL,
            Value::DateTime(_) => type_tag::DATETIME,
            Value::Regex(..) => type_tag::REGEX,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(doc) => Some(doc),
            _ => None,
        }
    }

    /// A canonical string form of an `_id` value, used as the storage
    /// engine's on-disk/in-memory key.
    pub fn id_key(&self) -> Result<String> {
        match self {
            Value::ObjectId(oid) => Ok(oid.to_hex()),
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::BadArgument(format!(
                "_id must be an ObjectId or a string, got {:?}",
                other
            ))),
        }
    }
}

/// Total order mirroring MongoDB's cross-type comparison rules: same-tag
/// values compare naturally, different tags compare by tag byte.
pub fn cmp(a: &Value, b: &Value) -> Ordering {
    let (ta, tb) = (a.type_tag(), b.type_tag());
    if ta != tb {
        return ta.cmp(&tb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Binary(x), Value::Binary(y)) => x.cmp(y),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Value::Regex(xp, xo), Value::Regex(yp, yo)) => (xp, xo).cmp(&(yp, yo)),
        (Value::List(x), Value::List(y)) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let c = cmp(xv, yv);
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                let c = xk.cmp(yk).then_with(|| cmp(xv, yv));
                if c != Ordering::Equal {
                    return c;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => {
            // Same tag, numeric: compare as f64.
            let (xf, yf) = (a.as_f64(), b.as_f64());
            match (xf, yf) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        }
    }
}

/// Splits a dotted path into its segments. `"a.b.3.c"` -> `["a","b","3","c"]`.
fn segments(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Walks `doc` along `path`, returning the resolved value or `None`
/// ("absent") on a missing key, an out-of-range/non-numeric list index, or
/// traversal through a non-container.
pub fn get(doc: &Document, path: &str) -> Option<Value> {
    let segs = segments(path);
    let (first, rest) = segs.split_first()?;
    let mut current = doc.get(first)?.clone();
    for seg in rest {
        current = get_segment(&current, seg)?;
    }
    Some(current)
}

fn get_segment(value: &Value, seg: &str) -> Option<Value> {
    match value {
        Value::Object(obj) => obj.get(seg).cloned(),
        Value::List(items) => {
            let idx: usize = seg.parse().ok()?;
            items.get(idx).cloned()
        }
        _ => None,
    }
}

/// Mutates `doc` in place, creating intermediate objects as needed and
/// right-padding lists with `Null` when a numeric segment addresses past
/// the list's current end. Fails with [`Error::PathInvalid`] when a
/// traversal step would go through a non-container that cannot be
/// extended (e.g. a string or number in the middle of the path).
pub fn set(doc: &mut Document, path: &str, value: Value) -> Result<()> {
    let segs = segments(path);
    let (first, rest) = segs
        .split_first()
        .ok_or_else(|| Error::BadArgument("empty path".into()))?;

    if rest.is_empty() {
        doc.insert(*first, value);
        return Ok(());
    }

    if !doc.contains_key(first) {
        doc.insert(*first, Value::Object(Document::new()));
    }
    let slot = doc.get_mut(first).expect("just inserted");
    set_segment(slot, rest, value)
}

fn set_segment(current: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let (seg, rest) = path
        .split_first()
        .expect("set_segment always called with a non-empty path");

    if rest.is_empty() {
        return set_leaf(current, seg, value);
    }

    match current {
        Value::Object(obj) => {
            if !obj.contains_key(seg) {
                obj.insert(*seg, Value::Object(Document::new()));
            }
            let next = obj.get_mut(seg).expect("just inserted");
            set_segment(next, rest, value)
        }
        Value::List(items) => {
            let idx: usize = seg
                .parse()
                .map_err(|_| Error::PathInvalid(format!("{seg:?} is not a list index")))?;
            pad_list(items, idx);
            set_segment(&mut items[idx], rest, value)
        }
        _ => Err(Error::PathInvalid(format!(
            "cannot traverse through a non-container at {seg:?}"
        ))),
    }
}

fn set_leaf(current: &mut Value, seg: &str, value: Value) -> Result<()> {
    match current {
        Value::Object(obj) => {
            obj.insert(seg, value);
            Ok(())
        }
        Value::List(items) => {
            let idx: usize = seg
                .parse()
                .map_err(|_| Error::PathInvalid(format!("{seg:?} is not a list index")))?;
            pad_list(items, idx);
            items[idx] = value;
            Ok(())
        }
        _ => Err(Error::PathInvalid(format!(
            "cannot set {seg:?} through a non-container"
        ))),
    }
}

fn pad_list(items: &mut Vec<Value>, idx: usize) {
    while items.len() <= idx {
        items.push(Value::Null);
    }
}

pub fn deep_copy(value: &Value) -> Value {
    value.clone()
}

// --- bson conversions -------------------------------------------------

impl TryFrom<Bson> for Value {
    type Error = Error;

    fn try_from(bson: Bson) -> Result<Value> {
        Ok(match bson {
            Bson::Null => Value::Null,
            Bson::Boolean(b) => Value::Bool(b),
            Bson::Int32(i) => Value::Int64(i as i64),
            Bson::Int64(i) => Value::Int64(i),
            Bson::Double(d) => Value::Double(d),
            Bson::String(s) => Value::String(s),
            Bson::Binary(b) => Value::Binary(b.bytes),
            Bson::DateTime(dt) => Value::DateTime(dt.timestamp_millis()),
            Bson::ObjectId(oid) => Value::ObjectId(oid),
            Bson::RegularExpression(re) => {
                Value::Regex(re.pattern.to_string(), re.options.to_string())
            }
            Bson::Document(d) => Value::Object(document_from_bson(d)?),
            Bson::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::try_from(item)?);
                }
                Value::List(out)
            }
            other => {
                return Err(Error::StorageFailure(format!(
                    "unsupported bson type: {other:?}"
                )))
            }
        })
    }
}

impl From<Value> for Bson {
    fn from(value: Value) -> Bson {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(b),
            Value::Int64(i) => Bson::Int64(i),
            Value::Double(d) => Bson::Double(d),
            Value::String(s) => Bson::String(s),
            Value::Binary(bytes) => Bson::Binary(bson::Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes,
            }),
            Value::DateTime(millis) => Bson::DateTime(bson::DateTime::from_millis(millis)),
            Value::ObjectId(oid) => Bson::ObjectId(oid),
            Value::Regex(pattern, options) => Bson::RegularExpression(bson::Regex {
                pattern: pattern.into(),
                options: options.into(),
            }),
            Value::Object(doc) => Bson::Document(document_to_bson(doc)),
            Value::List(items) => Bson::Array(items.into_iter().map(Bson::from).collect()),
        }
    }
}

pub fn document_to_bson(doc: Document) -> bson::Document {
    let mut out = bson::Document::new();
    for (k, v) in doc {
        out.insert(k, Bson::from(v));
    }
    out
}

pub fn document_from_bson(doc: bson::Document) -> Result<Document> {
    let mut out = Document::new();
    for (k, v) in doc {
        out.insert(k, Value::try_from(v)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with(pairs: Vec<(&str, Value)>) -> Document {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn get_simple_field() {
        let doc = doc_with(vec![("name", Value::String("alice".into()))]);
        assert_eq!(get(&doc, "name"), Some(Value::String("alice".into())));
        assert_eq!(get(&doc, "missing"), None);
    }

    #[test]
    fn get_through_list_index() {
        let doc = doc_with(vec![(
            "v",
            Value::List(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]),
        )]);
        assert_eq!(get(&doc, "v.1"), Some(Value::Int64(2)));
        assert_eq!(get(&doc, "v.9"), None);
    }

    #[test]
    fn set_nested_field_creates_intermediate_objects() {
        let mut doc = Document::new();
        set(&mut doc, "a.b.c", Value::Int64(1)).unwrap();
        assert_eq!(get(&doc, "a.b.c"), Some(Value::Int64(1)));
    }

    #[test]
    fn set_list_index_right_pads_with_null() {
        let mut doc = doc_with(vec![("v", Value::List(vec![Value::Int64(1)]))]);
        set(&mut doc, "v.3", Value::Int64(9)).unwrap();
        assert_eq!(
            get(&doc, "v"),
            Some(Value::List(vec![
                Value::Int64(1),
                Value::Null,
                Value::Null,
                Value::Int64(9)
            ]))
        );
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut doc = doc_with(vec![("a", Value::Int64(1))]);
        let err = set(&mut doc, "a.b", Value::Int64(2)).unwrap_err();
        assert!(matches!(err, Error::PathInvalid(_)));
    }

    #[test]
    fn cmp_orders_by_type_tag_then_value() {
        assert_eq!(cmp(&Value::Null, &Value::Int64(0)), Ordering::Less);
        assert_eq!(cmp(&Value::Int64(1), &Value::Int64(2)), Ordering::Less);
        assert_eq!(
            cmp(&Value::Int64(5), &Value::Double(1.0)),
            Ordering::Greater
        );
        assert_eq!(
            cmp(&Value::String("a".into()), &Value::String("b".into())),
            Ordering::Less
        );
    }
}
