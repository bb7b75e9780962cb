use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    change_stream::{
        ChangeStream,
        event::{ChangeStreamEvent, OperationType},
    },
    options::FullDocumentType,
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{id_filter, into_document, query_filter, set_update, with_id},
};
use crate::dao::{
    doc_store::{
        Change, ChangeBatch, ChangeKind, DocKey, Document, DocumentStore, Fields, Filter,
        MatchTracker, Subscription,
    },
    storage::{StorageError, StorageResult},
};

type Event = ChangeStreamEvent<Fields>;

/// [`DocumentStore`] backed by MongoDB. Change streams and transactions require a
/// replica set deployment.
#[derive(Clone)]
pub struct MongoStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoStore {
    /// Connect and wait for the server to answer.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        Ok(Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        })
    }

    async fn collection(&self, name: &str) -> Collection<Fields> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<Fields>(name)
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn fetch(&self, key: &DocKey) -> MongoResult<Option<Document>> {
        let collection = self.collection(&key.collection).await;
        let raw = collection
            .find_one(id_filter(key))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: key.collection.clone(),
                source,
            })?;
        Ok(raw.and_then(into_document))
    }

    async fn find(&self, name: &str, filter: &Filter) -> MongoResult<Vec<Document>> {
        let read_error = |source| MongoDaoError::Read {
            collection: name.to_owned(),
            source,
        };
        let raw: Vec<Fields> = self
            .collection(name)
            .await
            .find(query_filter(filter))
            .await
            .map_err(read_error)?
            .try_collect()
            .await
            .map_err(read_error)?;
        Ok(raw.into_iter().filter_map(into_document).collect())
    }

    async fn update_fields(&self, key: &DocKey, fields: &Fields) -> StorageResult<()> {
        let result = self
            .collection(&key.collection)
            .await
            .update_one(id_filter(key), set_update(fields))
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: key.collection.clone(),
                id: key.id.clone(),
                source,
            })?;
        if result.matched_count == 0 {
            return Err(StorageError::missing(key));
        }
        Ok(())
    }

    /// Apply every `$set` inside one transaction; a missing target aborts it.
    async fn update_many(&self, updates: Vec<(DocKey, Fields)>) -> StorageResult<()> {
        let client = self.client().await;
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;

        for (key, fields) in &updates {
            let outcome = self
                .collection(&key.collection)
                .await
                .update_one(id_filter(key), set_update(fields))
                .session(&mut session)
                .await;

            let failure = match outcome {
                Ok(result) if result.matched_count > 0 => continue,
                Ok(_) => StorageError::missing(key),
                Err(source) => MongoDaoError::Write {
                    collection: key.collection.clone(),
                    id: key.id.clone(),
                    source,
                }
                .into(),
            };
            if let Err(err) = session.abort_transaction().await {
                warn!(error = %err, "failed to abort MongoDB transaction");
            }
            return Err(failure);
        }

        session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;
        Ok(())
    }

    async fn replace(&self, key: &DocKey, fields: Fields) -> MongoResult<()> {
        self.collection(&key.collection)
            .await
            .replace_one(id_filter(key), with_id(key, fields))
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: key.collection.clone(),
                id: key.id.clone(),
                source,
            })?;
        Ok(())
    }

    /// Open the change stream before reading the initial state so no write falls
    /// between the two.
    async fn subscribe(
        &self,
        collection: String,
        document: Option<String>,
        filter: Filter,
    ) -> MongoResult<Subscription> {
        let watch_error = |source| MongoDaoError::Watch {
            collection: collection.clone(),
            source,
        };
        let target = self.collection(&collection).await;
        let pipeline = match &document {
            Some(id) => vec![doc! { "$match": { "documentKey._id": id.as_str() } }],
            None => Vec::new(),
        };
        let stream = target
            .watch()
            .pipeline(pipeline)
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(watch_error)?;

        let initial = match &document {
            Some(id) => self
                .fetch(&DocKey::new(collection.clone(), id.clone()))
                .await?
                .into_iter()
                .collect(),
            None => self.find(&collection, &filter).await?,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = MatchTracker::seed(&initial);
        if !initial.is_empty() || document.is_none() {
            let batch: ChangeBatch = initial
                .into_iter()
                .map(|doc| Change::new(ChangeKind::Added, doc))
                .collect();
            let _ = tx.send(batch);
        }

        let feed = tokio::spawn(follow_stream(collection, stream, filter, tracker, tx));
        let abort = feed.abort_handle();
        Ok(Subscription::new(rx, move || {
            abort.abort();
            debug!("MongoDB change stream released");
        }))
    }
}

fn classify(event: Event, filter: &Filter, tracker: &mut MatchTracker) -> Option<Change> {
    match event.operation_type {
        OperationType::Insert | OperationType::Update | OperationType::Replace => {
            match event.full_document.and_then(into_document) {
                Some(document) => tracker.upsert(document, filter),
                // Deleted before the lookup ran.
                None => event
                    .document_key
                    .as_ref()
                    .and_then(|key| key.get_str("_id").ok())
                    .and_then(|id| tracker.delete(id)),
            }
        }
        OperationType::Delete => event
            .document_key
            .as_ref()
            .and_then(|key| key.get_str("_id").ok())
            .and_then(|id| tracker.delete(id)),
        _ => None,
    }
}

/// Forward change events, grouping the events of one transaction into one batch.
async fn follow_stream(
    collection: String,
    mut stream: ChangeStream<Event>,
    filter: Filter,
    mut tracker: MatchTracker,
    tx: mpsc::UnboundedSender<ChangeBatch>,
) {
    let mut pending: Option<Event> = None;

    loop {
        let first = match pending.take() {
            Some(event) => event,
            None => match stream.try_next().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    warn!(collection, error = %err, "MongoDB change stream failed");
                    break;
                }
            },
        };

        if matches!(
            first.operation_type,
            OperationType::Invalidate | OperationType::Drop | OperationType::DropDatabase
        ) {
            warn!(collection, "MongoDB change stream invalidated");
            break;
        }

        let txn = first.txn_number;
        let mut batch: ChangeBatch = classify(first, &filter, &mut tracker).into_iter().collect();
        if txn.is_some() {
            loop {
                match stream.next_if_any().await {
                    Ok(Some(event)) if event.txn_number == txn => {
                        batch.extend(classify(event, &filter, &mut tracker));
                    }
                    Ok(Some(event)) => {
                        pending = Some(event);
                        break;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(collection, error = %err, "MongoDB change stream failed");
                        return;
                    }
                }
            }
        }

        if !batch.is_empty() && tx.send(batch).is_err() {
            break;
        }
    }
}

impl DocumentStore for MongoStore {
    fn get(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        Box::pin(async move { store.fetch(&key).await.map_err(Into::into) })
    }

    fn query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Vec<Document>>> {
        let store = self.clone();
        Box::pin(async move { store.find(&collection, &filter).await.map_err(Into::into) })
    }

    fn update_fields(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_fields(&key, &fields).await })
    }

    fn update_many(
        &self,
        updates: Vec<(DocKey, Fields)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_many(updates).await })
    }

    fn put(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.replace(&key, fields).await.map_err(Into::into) })
    }

    fn subscribe_document(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .subscribe(key.collection, Some(key.id), Filter::all())
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe_query(
        &self,
        collection: String,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .subscribe(collection, None, filter)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
