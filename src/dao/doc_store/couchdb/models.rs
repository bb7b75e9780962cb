//! Wire shapes of the CouchDB endpoints used by the store and the mapping between
//! raw CouchDB documents and collection-scoped [`Document`]s.
//!
//! Every collection lives in one database: the `_id` is `<collection>:<id>` and a
//! `type` field repeats the collection so `_find` and `_changes` can select on it.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::dao::doc_store::{DocKey, Document, Fields, Filter};

pub const TYPE_FIELD: &str = "type";
const ID_FIELD: &str = "_id";
const REV_FIELD: &str = "_rev";
const DELETED_FIELD: &str = "_deleted";

/// Upper bound on `_find` results; CouchDB defaults to 25.
pub const FIND_LIMIT: u32 = 10_000;

pub fn couch_id(key: &DocKey) -> String {
    format!("{}:{}", key.collection, key.id)
}

/// Strip CouchDB bookkeeping fields, keeping the collection-local id.
pub fn into_document(mut raw: Fields) -> Option<Document> {
    let couch_id = match raw.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        _ => return None,
    };
    raw.remove(REV_FIELD);
    raw.remove(TYPE_FIELD);
    raw.remove(DELETED_FIELD);
    let (_, id) = couch_id.split_once(':')?;
    Some(Document {
        id: id.to_owned(),
        fields: raw,
    })
}

/// Raw body written for `key`: user fields plus `_id`, `type` and the known revision.
pub fn to_raw(key: &DocKey, mut fields: Fields, rev: Option<Value>) -> Fields {
    fields.insert(ID_FIELD.to_owned(), Value::String(couch_id(key)));
    fields.insert(TYPE_FIELD.to_owned(), Value::String(key.collection.clone()));
    match rev {
        Some(rev) => fields.insert(REV_FIELD.to_owned(), rev),
        None => fields.remove(REV_FIELD),
    };
    fields
}

pub fn revision(raw: &Fields) -> Option<Value> {
    raw.get(REV_FIELD).cloned()
}

/// Mango selector for `filter` within `collection`.
pub fn selector(collection: &str, filter: &Filter) -> Value {
    let mut selector = Map::new();
    for (field, value) in filter.clauses() {
        selector.insert(field.clone(), json!({ "$eq": value }));
    }
    selector.insert(TYPE_FIELD.to_owned(), json!({ "$eq": collection }));
    Value::Object(selector)
}

/// `since` parameter for an opaque (2.x string, 1.x number) sequence.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(seq) => seq.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub update_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    pub docs: Vec<Fields>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Fields>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDocsRow {
    pub id: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
