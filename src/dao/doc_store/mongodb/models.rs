//! Conversion between field maps and BSON. Documents are stored one collection per
//! [`DocKey::collection`] with the collection-local id as a string `_id`.

use mongodb::bson::{Bson, Document as BsonDocument, doc};
use serde_json::Value;

use crate::dao::doc_store::{DocKey, Document, Fields, Filter};

const ID_FIELD: &str = "_id";

pub fn to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => Bson::Int64(int),
            None => Bson::Double(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => Bson::String(text.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(to_bson).collect()),
        Value::Object(fields) => Bson::Document(to_bson_document(fields)),
    }
}

pub fn to_bson_document(fields: &Fields) -> BsonDocument {
    let mut document = BsonDocument::new();
    for (field, value) in fields {
        document.insert(field.clone(), to_bson(value));
    }
    document
}

pub fn id_filter(key: &DocKey) -> BsonDocument {
    let mut filter = BsonDocument::new();
    filter.insert(ID_FIELD, key.id.as_str());
    filter
}

/// Equality filter; `$eq` keeps array-valued clauses from matching by element.
pub fn query_filter(filter: &Filter) -> BsonDocument {
    let mut document = BsonDocument::new();
    for (field, value) in filter.clauses() {
        document.insert(field.clone(), doc! { "$eq": to_bson(value) });
    }
    document
}

pub fn set_update(fields: &Fields) -> BsonDocument {
    doc! { "$set": to_bson_document(fields) }
}

/// Full body for a replace: the user fields plus `_id`.
pub fn with_id(key: &DocKey, mut fields: Fields) -> Fields {
    fields.insert(ID_FIELD.to_owned(), Value::String(key.id.clone()));
    fields
}

pub fn into_document(mut raw: Fields) -> Option<Document> {
    let id = match raw.remove(ID_FIELD) {
        Some(Value::String(id)) => id,
        _ => return None,
    };
    Some(Document { id, fields: raw })
}
