//! # HTTP Remote Store
//!
//! Maps the remote store operations onto REST calls through [`ApiClient`].
//!
//! ```text
//! add(c, doc)        POST   {base}/{c}                 → created document
//! update(c, id, doc) PUT    {base}/{c}/{id}
//! delete(c, id)      DELETE {base}/{c}/{id}
//! query(c, filter)   GET    {base}/{c}?updatedSince=ms → [documents]
//! subscribe(c)       poll query() every `poll_interval`
//! ```
//!
//! Mutations bypass the offline queue: the sync engine keeps its own pending
//! list and retry schedule, so a queued reply would hide the failure.
//!
//! ## Polling Backoff
//! A failed poll waits on an `ExponentialBackoff` (starting at the poll
//! interval, capped at ten intervals) before trying again; the first success
//! resets it.

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use fairway_core::{doc_id, set_doc_id, Collection, RequestOptions};

use crate::remote::{ChangeKind, QueryFilter, RemoteChange, RemoteError, RemoteStore, Subscription};
use crate::request_queue::ApiClient;

/// REST-backed remote store.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    api: ApiClient,
    poll_interval: Duration,
}

impl HttpRemoteStore {
    pub fn new(api: ApiClient, poll_interval: Duration) -> Self {
        HttpRemoteStore { api, poll_interval }
    }

    fn mutation_options(collection: &Collection) -> RequestOptions {
        RequestOptions::default()
            .without_queue()
            .no_cache()
            .invalidating(format!("/{collection}"))
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.poll_interval,
            max_interval: self.poll_interval * 10,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Characters escaped in a path segment (WHATWG path set plus `/` and `%`).
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%');

fn document_path(collection: &Collection, id: &str) -> String {
    format!("{collection}/{}", utf8_percent_encode(id, PATH_SEGMENT))
}

/// Accepts a bare array or an envelope with `data`/`items`.
fn documents_from(body: Value) -> Result<Vec<Value>, RemoteError> {
    match body {
        Value::Array(docs) => Ok(docs),
        Value::Object(mut map) => match map.remove("data").or_else(|| map.remove("items")) {
            Some(Value::Array(docs)) => Ok(docs),
            _ => Err(RemoteError::InvalidResponse(
                "expected an array of documents".into(),
            )),
        },
        Value::Null => Ok(Vec::new()),
        other => Err(RemoteError::InvalidResponse(format!(
            "expected an array of documents, got {other}"
        ))),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn add(&self, collection: &Collection, doc: Value) -> Result<Value, RemoteError> {
        let reply = self
            .api
            .post(collection.as_str(), doc.clone(), Self::mutation_options(collection))
            .await?;

        let mut stored = doc;
        match reply.data {
            Value::Object(fields) => {
                if let Value::Object(ref mut map) = stored {
                    map.extend(fields);
                }
            }
            Value::String(id) => set_doc_id(&mut stored, &id),
            _ => {}
        }
        if doc_id(&stored).is_none() {
            return Err(RemoteError::InvalidResponse(
                "create response carried no id".into(),
            ));
        }
        Ok(stored)
    }

    async fn update(&self, collection: &Collection, id: &str, doc: Value) -> Result<(), RemoteError> {
        self.api
            .put(
                &document_path(collection, id),
                doc,
                Self::mutation_options(collection),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: &Collection, id: &str) -> Result<(), RemoteError> {
        self.api
            .delete(&document_path(collection, id), Self::mutation_options(collection))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &Collection,
        filter: QueryFilter,
    ) -> Result<Vec<Value>, RemoteError> {
        let path = match filter.updated_since {
            Some(since) => format!("{collection}?updatedSince={since}"),
            None => collection.to_string(),
        };
        let reply = self.api.get(&path, RequestOptions::default().no_cache()).await?;
        documents_from(reply.data)
    }

    fn subscribe(
        &self,
        collection: &Collection,
        sink: mpsc::UnboundedSender<RemoteChange>,
    ) -> Result<Subscription, RemoteError> {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let store = self.clone();
        let collection = collection.clone();
        let mut backoff = self.create_backoff();

        tokio::spawn(async move {
            info!(%collection, "Polling feed started");
            let mut since = Some(crate::now_millis());
            let mut wait = store.poll_interval;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = &mut cancel_rx => break,
                }

                let started = crate::now_millis();
                match store.query(&collection, QueryFilter { updated_since: since }).await {
                    Ok(docs) => {
                        backoff.reset();
                        wait = store.poll_interval;
                        since = Some(started);
                        debug!(%collection, count = docs.len(), "Polled remote changes");

                        let mut closed = false;
                        for doc in docs {
                            let Some(id) = doc_id(&doc) else { continue };
                            let change = RemoteChange {
                                kind: ChangeKind::Modified,
                                id,
                                doc: Some(doc),
                            };
                            if sink.send(change).is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Err(e) => {
                        wait = backoff.next_backoff().unwrap_or(store.poll_interval * 10);
                        warn!(%collection, error = %e, ?wait, "Poll failed, backing off");
                    }
                }
            }
            info!(%collection, "Polling feed stopped");
        });

        Ok(Subscription::new(move || {
            let _ = cancel_tx.send(());
        }))
    }
}
