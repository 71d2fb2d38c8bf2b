//! Filter matching, update application, sorting, and the index-assisted
//! query planner (C5). Grounded on the original's `collection.py`
//! (`_validate_filter`/`_apply_filter`/`_doc_matches_slow_filters` and the
//! planner's index-vs-full-scan split) and `cursor.py`'s sort handling.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::index::{RangeOp, SecondaryIndex};
use crate::value::{self, Document, Value};

/// A single comparison operator in a field clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// One clause against a single dotted field path.
#[derive(Debug, Clone)]
pub enum FieldClause {
    Compare(CompareOp, Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
}

/// A parsed filter: an implicit AND of per-field clauses, matching the
/// original's flat (non-nested-$and/$or) filter grammar (spec's
/// Non-goals exclude a richer query language).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub clauses: Vec<(String, FieldClause)>,
}

const COMPARE_OPS: &[(&str, CompareOp)] = &[
    ("$eq", CompareOp::Eq),
    ("$ne", CompareOp::Ne),
    ("$lt", CompareOp::Lt),
    ("$lte", CompareOp::Lte),
    ("$gt", CompareOp::Gt),
    ("$gte", CompareOp::Gte),
];

impl Filter {
    pub fn parse(doc: &Document) -> Result<Filter> {
        let mut clauses = Vec::new();
        for (field, value) in doc.iter() {
            if field.starts_with('$') {
                return Err(Error::BadArgument(format!(
                    "unsupported top-level operator {field:?}"
                )));
            }
            match value {
                Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
                    for (op, operand) in ops.iter() {
                        match op.as_str() {
                            "$in" => clauses.push((
                                field.clone(),
                                FieldClause::In(operand.as_list().unwrap_or(&[]).to_vec()),
                            )),
                            "$nin" => clauses.push((
                                field.clone(),
                                FieldClause::Nin(operand.as_list().unwrap_or(&[]).to_vec()),
                            )),
                            _ => {
                                let (_, cmp_op) = COMPARE_OPS
                                    .iter()
                                    .find(|(name, _)| *name == op)
                                    .ok_or_else(|| {
                                        Error::BadArgument(format!("unsupported operator {op:?}"))
                                    })?;
                                clauses.push((
                                    field.clone(),
                                    FieldClause::Compare(*cmp_op, operand.clone()),
                                ));
                            }
                        }
                    }
                }
                other => clauses.push((field.clone(), FieldClause::Compare(CompareOp::Eq, other.clone()))),
            }
        }
        Ok(Filter { clauses })
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, clause)| matches_clause(doc, field, clause))
    }
}

fn matches_clause(doc: &Document, field: &str, clause: &FieldClause) -> bool {
    let Some(actual) = value::get(doc, field) else {
        // Absent fields never match, regardless of operator (spec §4.1:
        // "callers treat absent as 'does not match'").
        return false;
    };
    match clause {
        FieldClause::Compare(CompareOp::Eq, expected) => value_eq(&actual, expected),
        FieldClause::Compare(op, expected) => compare(op, &actual, expected),
        FieldClause::In(options) => options.iter().any(|o| value_eq(&actual, o)),
        FieldClause::Nin(options) => !options.iter().any(|o| value_eq(&actual, o)),
    }
}

/// Equality with MongoDB's list-membership extension (spec §4.5/§9): a
/// list-valued document field also matches when `expected` appears as one
/// of its elements, in addition to matching the whole list value.
fn value_eq(actual: &Value, expected: &Value) -> bool {
    if value::cmp(actual, expected) == Ordering::Equal {
        return true;
    }
    if let Some(items) = actual.as_list() {
        return items.iter().any(|item| value::cmp(item, expected) == Ordering::Equal);
    }
    false
}

fn compare(op: &CompareOp, actual: &Value, expected: &Value) -> bool {
    let ord = value::cmp(actual, expected);
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Lte => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Gte => ord != Ordering::Less,
    }
}

/// For every filter clause whose field has a secondary index, computes a
/// candidate id set per spec §4.5's per-operator rules (`$eq`/`$in`
/// lookup, `$lt..$gte` range scan, `$ne`/`$nin` as "all keys minus"
/// subtractive passes), then intersects all of them together (spec
/// §4.5 step 2: "Intersect id sets across indexed fields"). Every
/// candidate is still re-checked against the full filter afterward, so
/// an imperfect or absent index never affects correctness, only speed.
pub fn plan_candidate_ids(filter: &Filter, indices: &[(&String, &SecondaryIndex)]) -> Option<Vec<Value>> {
    let mut combined: Option<Vec<Value>> = None;
    for (field, clause) in &filter.clauses {
        let Some((_, index)) = indices.iter().find(|(name, _)| *name == field) else {
            continue;
        };
        let ids = match clause {
            FieldClause::Compare(CompareOp::Eq, v) => index.ids_eq(v),
            FieldClause::Compare(CompareOp::Lt, v) => index.ids_matching(RangeOp::Lt, v),
            FieldClause::Compare(CompareOp::Lte, v) => index.ids_matching(RangeOp::Lte, v),
            FieldClause::Compare(CompareOp::Gt, v) => index.ids_matching(RangeOp::Gt, v),
            FieldClause::Compare(CompareOp::Gte, v) => index.ids_matching(RangeOp::Gte, v),
            FieldClause::In(values) => index.ids_in(values),
            FieldClause::Compare(CompareOp::Ne, v) => minus(index.all_ids(), &index.ids_eq(v)),
            FieldClause::Nin(values) => minus(index.all_ids(), &index.ids_in(values)),
        };
        combined = Some(match combined {
            Some(existing) => intersect_ids(existing, &ids),
            None => ids,
        });
    }
    combined
}

/// Intersection of two id lists by `_id` key, preserving `a`'s order.
fn intersect_ids(a: Vec<Value>, b: &[Value]) -> Vec<Value> {
    let b_keys: HashSet<String> = b.iter().filter_map(|v| v.id_key().ok()).collect();
    a.into_iter()
        .filter(|v| v.id_key().map(|k| b_keys.contains(&k)).unwrap_or(false))
        .collect()
}

/// `all` with every id appearing in `excluded` removed, used for the
/// `$ne`/`$nin` "all keys minus" index plan (spec §4.5).
fn minus(all: Vec<Value>, excluded: &[Value]) -> Vec<Value> {
    let excluded: HashSet<String> = excluded.iter().filter_map(|v| v.id_key().ok()).collect();
    all.into_iter()
        .filter(|id| match id.id_key() {
            Ok(k) => !excluded.contains(&k),
            Err(_) => true,
        })
        .collect()
}

/// Sort direction (spec §6.3): `1` ascending, `-1` descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn from_i64(n: i64) -> Result<SortDirection> {
        match n {
            1 => Ok(SortDirection::Asc),
            -1 => Ok(SortDirection::Desc),
            other => Err(Error::BadArgument(format!(
                "sort direction must be 1 or -1, got {other}"
            ))),
        }
    }
}

/// Stably sorts `docs` by each `(field, direction)` key in order, ties
/// broken by the next key and finally by input order.
pub fn sort_documents(docs: &mut [Document], keys: &[(String, SortDirection)]) {
    docs.sort_by(|a, b| {
        for (field, direction) in keys {
            let av = value::get(a, field).unwrap_or(Value::Null);
            let bv = value::get(b, field).unwrap_or(Value::Null);
            let ord = value::cmp(&av, &bv);
            let ord = match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Applies an update document's operators (`$set`/`$inc`/`$push`) to
/// `doc` in place. Plain (non-`$`) top-level keys are rejected: this
/// store only supports operator updates, not whole-document replacement
/// through `update_*` (use `replace_one` for that).
pub fn apply_update(doc: &mut Document, update: &Document) -> Result<()> {
    for (op, operand) in update.iter() {
        let fields = operand
            .as_object()
            .ok_or_else(|| Error::BadArgument(format!("{op:?} operand must be a document")))?;
        match op.as_str() {
            "$set" => {
                for (field, value) in fields.iter() {
                    value::set(doc, field, value.clone())?;
                }
            }
            "$inc" => {
                for (field, delta) in fields.iter() {
                    let delta = delta
                        .as_f64()
                        .ok_or_else(|| Error::BadArgument(format!("$inc operand for {field:?} must be numeric")))?;
                    let current = value::get(doc, field).unwrap_or(Value::Int64(0));
                    let current = current.as_f64().ok_or_else(|| {
                        Error::BadArgument(format!("cannot $inc non-numeric field {field:?}"))
                    })?;
                    let updated = match (value::get(doc, field), delta) {
                        (Some(Value::Int64(_)), d) if d.fract() == 0.0 => {
                            Value::Int64(current as i64 + d as i64)
                        }
                        _ => Value::Double(current + delta),
                    };
                    value::set(doc, field, updated)?;
                }
            }
            "$push" => {
                for (field, item) in fields.iter() {
                    let mut list = match value::get(doc, field) {
                        None => Vec::new(),
                        Some(Value::List(items)) => items,
                        Some(other) => {
                            return Err(Error::BadArgument(format!(
                                "cannot $push onto non-list field {field:?}, found {other:?}"
                            )))
                        }
                    };
                    list.push(item.clone());
                    value::set(doc, field, Value::List(list))?;
                }
            }
            other => return Err(Error::BadArgument(format!("unsupported update operator {other:?}"))),
        }
    }
    Ok(())
}

/// Distinct values of `field` across `docs`, de-duplicated by MongoDB
/// comparison equality and returned in first-seen order.
pub fn distinct_values<'a>(docs: impl Iterator<Item = &'a Document>, field: &str) -> Vec<Value> {
    let mut seen: Vec<Value> = Vec::new();
    for doc in docs {
        let v = value::get(doc, field).unwrap_or(Value::Null);
        if !seen.iter().any(|existing| value::cmp(existing, &v) == Ordering::Equal) {
            seen.push(v);
        }
    }
    seen
}

pub fn dedup_ids(ids: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let key = match id.id_key() {
            Ok(k) => k,
            Err(_) => continue,
        };
        if seen.insert(key) {
            out.push(id);
        }
    }
    out
}
