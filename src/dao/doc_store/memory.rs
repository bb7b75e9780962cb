//! In-process document store with live subscriptions.
//!
//! Every write is applied under a single lock and its deltas are pushed to the
//! matching subscribers before the lock is released, so each subscriber sees the
//! writes of one document in commit order. `update_many` produces one batch per
//! subscriber, which is what makes multi-document transitions atomic for readers.

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use super::{
    Change, ChangeBatch, ChangeKind, DocKey, Document, DocumentStore, Fields, Filter, Subscription,
};
use crate::dao::storage::{StorageError, StorageResult};

#[derive(Clone, Default)]
/// Cheaply clonable in-memory [`DocumentStore`].
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    collections: Mutex<HashMap<String, IndexMap<String, Fields>>>,
    watchers: DashMap<u64, Watcher>,
    next_watcher: AtomicU64,
}

struct Watcher {
    target: WatchTarget,
    tx: mpsc::UnboundedSender<ChangeBatch>,
}

enum WatchTarget {
    Document(DocKey),
    Query { collection: String, filter: Filter },
}

/// Before/after images of one document touched by a write.
struct Touched {
    key: DocKey,
    before: Option<Fields>,
    after: Option<Fields>,
}

impl WatchTarget {
    fn delta(&self, touched: &Touched) -> Option<Change> {
        let document = |fields: &Fields| Document {
            id: touched.key.id.clone(),
            fields: fields.clone(),
        };

        match self {
            WatchTarget::Document(key) => {
                if *key != touched.key {
                    return None;
                }
                match (&touched.before, &touched.after) {
                    (None, Some(after)) => Some(Change::new(ChangeKind::Added, document(after))),
                    (Some(_), Some(after)) => {
                        Some(Change::new(ChangeKind::Modified, document(after)))
                    }
                    (Some(before), None) => {
                        Some(Change::new(ChangeKind::Removed, document(before)))
                    }
                    (None, None) => None,
                }
            }
            WatchTarget::Query { collection, filter } => {
                if *collection != touched.key.collection {
                    return None;
                }
                let before = touched.before.as_ref().filter(|f| filter.matches(f));
                let after = touched.after.as_ref().filter(|f| filter.matches(f));
                match (before, after) {
                    (None, Some(after)) => Some(Change::new(ChangeKind::Added, document(after))),
                    (Some(_), Some(after)) => {
                        Some(Change::new(ChangeKind::Modified, document(after)))
                    }
                    (Some(before), None) => {
                        Some(Change::new(ChangeKind::Removed, document(before)))
                    }
                    (None, None) => None,
                }
            }
        }
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions, exposed for leak checks.
    pub fn subscriber_count(&self) -> usize {
        self.inner.watchers.len()
    }
}

impl MemoryInner {
    /// Push the deltas of one committed write to every interested watcher.
    fn notify(&self, touched: &[Touched]) {
        let mut closed = Vec::new();
        for entry in self.watchers.iter() {
            let batch: ChangeBatch = touched
                .iter()
                .filter_map(|t| entry.target.delta(t))
                .collect();
            if batch.is_empty() {
                continue;
            }
            if entry.tx.send(batch).is_err() {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.watchers.remove(&id);
        }
    }

    async fn get(&self, key: &DocKey) -> Option<Document> {
        let collections = self.collections.lock().await;
        collections
            .get(&key.collection)
            .and_then(|docs| docs.get(&key.id))
            .map(|fields| Document {
                id: key.id.clone(),
                fields: fields.clone(),
            })
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Vec<Document> {
        let collections = self.collections.lock().await;
        matching(&collections, collection, filter)
    }

    async fn update_many(&self, updates: Vec<(DocKey, Fields)>) -> StorageResult<()> {
        let mut collections = self.collections.lock().await;

        // Validate up-front so a missing document leaves every target untouched.
        for (key, _) in &updates {
            let exists = collections
                .get(&key.collection)
                .is_some_and(|docs| docs.contains_key(&key.id));
            if !exists {
                return Err(StorageError::missing(key));
            }
        }

        let mut touched = Vec::with_capacity(updates.len());
        for (key, fields) in updates {
            let Some(current) = collections
                .get_mut(&key.collection)
                .and_then(|docs| docs.get_mut(&key.id))
            else {
                return Err(StorageError::missing(&key));
            };
            let before = current.clone();
            for (field, value) in fields {
                current.insert(field, value);
            }
            touched.push(Touched {
                key,
                before: Some(before),
                after: Some(current.clone()),
            });
        }

        self.notify(&touched);
        Ok(())
    }

    async fn put(&self, key: DocKey, fields: Fields) {
        let mut collections = self.collections.lock().await;
        let before = collections
            .entry(key.collection.clone())
            .or_default()
            .insert(key.id.clone(), fields.clone());
        self.notify(&[Touched {
            key,
            before,
            after: Some(fields),
        }]);
    }

    async fn subscribe(self: &Arc<Self>, target: WatchTarget) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        // Hold the lock while registering so no write slips between the initial
        // snapshot and the first delta.
        let collections = self.collections.lock().await;
        let initial: Option<ChangeBatch> = match &target {
            WatchTarget::Document(key) => collections
                .get(&key.collection)
                .and_then(|docs| docs.get(&key.id))
                .map(|fields| {
                    vec![Change::new(
                        ChangeKind::Added,
                        Document {
                            id: key.id.clone(),
                            fields: fields.clone(),
                        },
                    )]
                }),
            WatchTarget::Query { collection, filter } => Some(
                matching(&collections, collection, filter)
                    .into_iter()
                    .map(|doc| Change::new(ChangeKind::Added, doc))
                    .collect(),
            ),
        };

        if let Some(batch) = initial {
            let _ = tx.send(batch);
        }

        let id = self.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.watchers.insert(id, Watcher { target, tx });
        drop(collections);

        let weak: Weak<MemoryInner> = Arc::downgrade(self);
        Subscription::new(rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.watchers.remove(&id);
                debug!(subscription = id, "memory subscription released");
            }
        })
    }
}

fn matching(
    collections: &HashMap<String, IndexMap<String, Fields>>,
    collection: &str,
    filter: &Filter,
) -> Vec<Document> {
    collections
        .get(collection)
        .map(|docs| {
            docs.iter()
                .filter(|(_, fields)| filter.matches(fields))
                .map(|(id, fields)| Document {
                    id: id.clone(),
                    fields: fields.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.get(&key).await) })
    }

    fn query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.query(&collection, &filter).await) })
    }

    fn update_fields(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.update_many(vec![(key, fields)]).await })
    }

    fn update_many(
        &self,
        updates: Vec<(DocKey, Fields)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.update_many(updates).await })
    }

    fn put(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.put(key, fields).await;
            Ok(())
        })
    }

    fn subscribe_document(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.subscribe(WatchTarget::Document(key)).await) })
    }

    fn subscribe_query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .subscribe(WatchTarget::Query { collection, filter })
                .await)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
