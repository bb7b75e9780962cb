//! Document store client used by every view: keyed documents grouped in collections,
//! equality queries, partial updates and live change subscriptions.

#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::fmt;

use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::dao::storage::StorageResult;

/// Field map of a document (shallow JSON object).
pub type Fields = Map<String, Value>;

/// Fully qualified address of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    /// Collection holding the document.
    pub collection: String,
    /// Identifier unique within the collection.
    pub id: String,
}

impl DocKey {
    /// Build a key from a collection and document identifier.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Snapshot of a stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Identifier unique within the collection.
    pub id: String,
    /// Full field map at the time of the snapshot.
    pub fields: Fields,
}

impl Document {
    /// Decode the document fields into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Serialize an entity into a field map suitable for [`DocumentStore::put`].
pub fn to_fields<T: Serialize>(value: &T) -> serde_json::Result<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(serde::ser::Error::custom(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Conjunction of field-equality clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Filter matching every document of a collection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a `field == value` clause.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// Clauses in insertion order.
    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Whether a field map satisfies every clause.
    ///
    /// Numbers compare by value so `1`, `1u8` and `1.0` are equal regardless of how a
    /// backend round-tripped them.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| match fields.get(field) {
                Some(actual) => values_equal(actual, expected),
                None => false,
            })
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l == r,
            _ => l.as_f64() == r.as_f64(),
        },
        _ => left == right,
    }
}

/// Kind of delta carried by a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Document entered the subscription's result set.
    Added,
    /// Document already in the result set was updated.
    Modified,
    /// Document left the result set (deleted or no longer matching).
    Removed,
}

/// One per-document delta with the full snapshot after the change.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// What happened to the document.
    pub kind: ChangeKind,
    /// Snapshot after the change (last known snapshot for removals).
    pub document: Document,
}

impl Change {
    /// Convenience constructor.
    pub fn new(kind: ChangeKind, document: Document) -> Self {
        Self { kind, document }
    }
}

/// Ordered deltas delivered together.
pub type ChangeBatch = Vec<Change>;

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Live subscription handle. Dropping it releases the subscription.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<ChangeBatch>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    /// Wrap a receiver together with the backend hook that tears the subscription down.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<ChangeBatch>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    /// Wait for the next batch; `None` once the backend closed the feed.
    pub async fn next(&mut self) -> Option<ChangeBatch> {
        self.receiver.recv().await
    }

    /// Release the subscription explicitly.
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Abstraction over the real-time document store shared by the board and control views.
pub trait DocumentStore: Send + Sync {
    /// Read a single document.
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Document>>>;
    /// One-shot equality query over a collection.
    fn query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>>;
    /// Merge `fields` into an existing document.
    fn update_fields(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>>;
    /// Merge several partial updates as one unit where the backend allows it.
    fn update_many(&self, updates: Vec<(DocKey, Fields)>)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Create or fully replace a document.
    fn put(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to one document.
    fn subscribe_document(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Subscription>>;
    /// Subscribe to the documents of a collection matching `filter`.
    fn subscribe_query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>>;
    /// Cheap liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Tracks which documents a remote feed has reported as matching, turning raw
/// upserts/deletes into added/modified/removed deltas.
#[cfg(any(feature = "couch-store", feature = "mongo-store"))]
#[derive(Debug, Default)]
pub(crate) struct MatchTracker {
    known: std::collections::HashSet<String>,
}

#[cfg(any(feature = "couch-store", feature = "mongo-store"))]
impl MatchTracker {
    pub(crate) fn seed(documents: &[Document]) -> Self {
        Self {
            known: documents.iter().map(|doc| doc.id.clone()).collect(),
        }
    }

    /// Classify an upsert. Returns `None` when the document neither matched before nor now.
    pub(crate) fn upsert(&mut self, document: Document, filter: &Filter) -> Option<Change> {
        let matches = filter.matches(&document.fields);
        let was_known = self.known.contains(&document.id);
        match (was_known, matches) {
            (false, true) => {
                self.known.insert(document.id.clone());
                Some(Change::new(ChangeKind::Added, document))
            }
            (true, true) => Some(Change::new(ChangeKind::Modified, document)),
            (true, false) => {
                self.known.remove(&document.id);
                Some(Change::new(ChangeKind::Removed, document))
            }
            (false, false) => None,
        }
    }

    /// Classify a deletion.
    pub(crate) fn delete(&mut self, id: &str) -> Option<Change> {
        self.known.remove(id).then(|| {
            Change::new(
                ChangeKind::Removed,
                Document {
                    id: id.to_owned(),
                    fields: Fields::new(),
                },
            )
        })
    }
}
