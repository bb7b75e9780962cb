use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dao::{
    doc_store::{
        Change, ChangeBatch, ChangeKind, DocKey, Document, DocumentStore, Fields, Filter,
        MatchTracker, Subscription,
    },
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        BulkDocsRow, ChangesResponse, DatabaseInfo, FIND_LIMIT, FindResponse, couch_id,
        into_document, revision, selector, seq_param, to_raw,
    },
};

const MAX_CONFLICT_ATTEMPTS: u32 = 5;
const LONGPOLL_TIMEOUT_MS: u64 = 25_000;

/// [`DocumentStore`] backed by a single CouchDB database.
#[derive(Clone)]
pub struct CouchStore {
    client: Client,
    database_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

/// What a `_changes` feed follows.
enum FeedTarget {
    Document(DocKey),
    Query { collection: String, filter: Filter },
}

impl CouchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            database_url: Arc::from(config.database_url()),
            database: Arc::from(config.database),
            auth: config
                .username
                .zip(config.password)
                .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p))),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.database_url, path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .authorize(self.client.get(self.database_url.as_ref()))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(self.database_url.as_ref()))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412: another instance created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        path: &str,
        builder: RequestBuilder,
    ) -> CouchResult<T> {
        let response = builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_owned(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: path.to_owned(),
                status: response.status(),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: path.to_owned(),
                source,
            })
    }

    async fn fetch_raw(&self, doc_id: &str) -> CouchResult<Option<Fields>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<Fields>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_owned(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn store_raw(&self, doc_id: &str, body: &Fields) -> CouchResult<()> {
        let response = self
            .request(Method::PUT, doc_id)
            .json(body)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: response.status(),
            })
        }
    }

    async fn fetch(&self, key: &DocKey) -> CouchResult<Option<Document>> {
        Ok(self.fetch_raw(&couch_id(key)).await?.and_then(into_document))
    }

    async fn find(&self, collection: &str, filter: &Filter) -> CouchResult<Vec<Document>> {
        const FIND: &str = "_find";
        let body = json!({
            "selector": selector(collection, filter),
            "limit": FIND_LIMIT,
        });
        let response: FindResponse = self
            .send_json(FIND, self.request(Method::POST, FIND).json(&body))
            .await?;
        Ok(response.docs.into_iter().filter_map(into_document).collect())
    }

    /// Read-merge-write of one document; `false` when it does not exist.
    async fn merge(&self, key: &DocKey, fields: &Fields) -> CouchResult<bool> {
        let doc_id = couch_id(key);
        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let Some(mut raw) = self.fetch_raw(&doc_id).await? else {
                return Ok(false);
            };
            raw.extend(fields.clone());
            match self.store_raw(&doc_id, &raw).await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_conflict() => {
                    debug!(doc_id, "CouchDB update conflicted; re-reading");
                }
                Err(err) => return Err(err),
            }
        }
        Err(CouchDaoError::Conflict {
            doc_id,
            attempts: MAX_CONFLICT_ATTEMPTS,
        })
    }

    async fn replace(&self, key: &DocKey, fields: Fields) -> CouchResult<()> {
        let doc_id = couch_id(key);
        for _ in 0..MAX_CONFLICT_ATTEMPTS {
            let rev = self.fetch_raw(&doc_id).await?.as_ref().and_then(revision);
            let body = to_raw(key, fields.clone(), rev);
            match self.store_raw(&doc_id, &body).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_conflict() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(CouchDaoError::Conflict {
            doc_id,
            attempts: MAX_CONFLICT_ATTEMPTS,
        })
    }

    /// Merge every update and write them with one `_bulk_docs` request so a single
    /// `_changes` response usually carries all of them. Conflicting rows fall back
    /// to a per-document merge.
    async fn merge_many(&self, updates: Vec<(DocKey, Fields)>) -> StorageResult<()> {
        const BULK_DOCS: &str = "_bulk_docs";

        let mut docs = Vec::with_capacity(updates.len());
        for (key, fields) in &updates {
            let Some(mut raw) = self.fetch_raw(&couch_id(key)).await? else {
                return Err(StorageError::missing(key));
            };
            raw.extend(fields.clone());
            docs.push(Value::Object(raw));
        }

        let rows: Vec<BulkDocsRow> = self
            .send_json(
                BULK_DOCS,
                self.request(Method::POST, BULK_DOCS)
                    .json(&json!({ "docs": docs })),
            )
            .await?;

        for row in rows {
            let Some(error) = row.error else { continue };
            if error != "conflict" {
                return Err(CouchDaoError::BulkRejected {
                    doc_id: row.id,
                    reason: format!("{error}: {}", row.reason.unwrap_or_default()),
                }
                .into());
            }
            let Some((key, fields)) = updates.iter().find(|(key, _)| couch_id(key) == row.id)
            else {
                continue;
            };
            if !self.merge(key, fields).await? {
                return Err(StorageError::missing(key));
            }
        }
        Ok(())
    }

    async fn current_seq(&self) -> CouchResult<String> {
        let info: DatabaseInfo = self
            .send_json("", self.authorize(self.client.get(self.database_url.as_ref())))
            .await?;
        Ok(seq_param(&info.update_seq))
    }

    async fn poll_changes(&self, target: &FeedTarget, since: &str) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let timeout = LONGPOLL_TIMEOUT_MS.to_string();
        let (filter, body) = match target {
            FeedTarget::Document(key) => ("_doc_ids", json!({ "doc_ids": [couch_id(key)] })),
            FeedTarget::Query { collection, .. } => (
                "_selector",
                json!({ "selector": selector(collection, &Filter::all()) }),
            ),
        };
        let query = [
            ("feed", "longpoll"),
            ("include_docs", "true"),
            ("since", since),
            ("timeout", timeout.as_str()),
            ("filter", filter),
        ];
        self.send_json(
            CHANGES,
            self.request(Method::POST, CHANGES).query(&query).json(&body),
        )
        .await
    }

    /// Capture the sequence, read the initial state, then follow `_changes` from that
    /// sequence so nothing written in between is lost.
    async fn subscribe(&self, target: FeedTarget) -> CouchResult<Subscription> {
        let since = self.current_seq().await?;
        let initial = match &target {
            FeedTarget::Document(key) => self.fetch(key).await?.into_iter().collect(),
            FeedTarget::Query { collection, filter } => self.find(collection, filter).await?,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = MatchTracker::seed(&initial);
        if !initial.is_empty() || matches!(target, FeedTarget::Query { .. }) {
            let batch: ChangeBatch = initial
                .into_iter()
                .map(|doc| Change::new(ChangeKind::Added, doc))
                .collect();
            let _ = tx.send(batch);
        }

        let feed = tokio::spawn(follow_changes(self.clone(), target, since, tracker, tx));
        let abort = feed.abort_handle();
        Ok(Subscription::new(rx, move || {
            abort.abort();
            debug!("CouchDB change feed released");
        }))
    }
}

async fn follow_changes(
    store: CouchStore,
    target: FeedTarget,
    mut since: String,
    mut tracker: MatchTracker,
    tx: mpsc::UnboundedSender<ChangeBatch>,
) {
    let filter = match &target {
        FeedTarget::Document(_) => Filter::all(),
        FeedTarget::Query { filter, .. } => filter.clone(),
    };

    while !tx.is_closed() {
        let response = match store.poll_changes(&target, &since).await {
            Ok(response) => response,
            Err(err) => {
                // Closing the channel tells the subscriber to resubscribe.
                warn!(error = %err, "CouchDB change feed failed");
                return;
            }
        };
        since = seq_param(&response.last_seq);

        let batch: ChangeBatch = response
            .results
            .into_iter()
            .filter_map(|row| {
                let document = row.doc.and_then(into_document);
                match document {
                    Some(document) if !row.deleted => tracker.upsert(document, &filter),
                    _ => row
                        .id
                        .split_once(':')
                        .and_then(|(_, id)| tracker.delete(id)),
                }
            })
            .collect();

        if !batch.is_empty() && tx.send(batch).is_err() {
            return;
        }
    }
}

impl DocumentStore for CouchStore {
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
        Box::pin(async move {
            if store.merge(&key, &fields).await? {
                Ok(())
            } else {
                Err(StorageError::missing(&key))
            }
        })
    }

    fn update_many(
        &self,
        updates: Vec<(DocKey, Fields)>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.merge_many(updates).await })
    }

    fn put(&self, key: DocKey, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.replace(&key, fields).await.map_err(Into::into) })
    }

    fn subscribe_document(&self, key: DocKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .subscribe(FeedTarget::Document(key))
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
                .subscribe(FeedTarget::Query { collection, filter })
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let database_url = store.database_url.to_string();
            let response = store
                .authorize(store.client.get(&database_url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: database_url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: database_url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
