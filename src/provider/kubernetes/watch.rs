//! Watching Kubernetes secret provider.
//!
//! One watch subscription is held per referenced Secret object, no matter
//! how many keys of that object are registered. Each watched object gets a
//! background task that applies watch events to a cached copy of the payload
//! and reopens the subscription with jitter whenever the server closes it.
//! Fetches are answered from the cache and never wait on the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::client::{SecretEvent, SecretEventStream, SecretStore};
use super::{secret_key_value, SecretConfig};
use crate::error::{Error, Result};
use crate::provider::{Fetcher, Provider};

/// Base delay before a closed watch stream is reopened.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound (exclusive) of the uniform jitter added to the base delay, in
/// milliseconds. Spreads reconnects of many watchers after a server restart.
const RECONNECT_JITTER_MILLIS: u64 = 30_000;

fn reconnect_delay() -> Duration {
    RECONNECT_BASE_DELAY
        + Duration::from_millis(rand::thread_rng().gen_range(0..RECONNECT_JITTER_MILLIS))
}

struct WatcherState {
    /// Number of registrations currently pointing at this object.
    ref_count: usize,
    /// Last observed payload, or `None` while the object does not exist.
    secret: Option<Secret>,
}

/// Per-object bookkeeping: the cached payload plus the reconnect loop's
/// decisions, all guarded by one lock.
struct Watcher {
    namespace: String,
    name: String,
    stop: CancellationToken,
    state: Mutex<WatcherState>,
}

impl Watcher {
    /// Open the watch subscription and seed the cache, then hand the stream
    /// to a background task.
    async fn open(
        store: Arc<dyn SecretStore>,
        scope: &CancellationToken,
        config: &SecretConfig,
    ) -> Result<Arc<Self>> {
        let stream = store
            .watch(&config.namespace, &config.name)
            .await
            .map_err(|source| Error::WatchSecret {
                namespace: config.namespace.clone(),
                name: config.name.clone(),
                source,
            })?;

        // The first watch event cannot tell us that the object does not
        // exist, so seed the cache with a point read. A missing object is
        // not an error; anything else aborts the add and releases the
        // subscription.
        let secret = store
            .get(&config.namespace, &config.name)
            .await
            .map_err(|source| Error::FetchSecret {
                namespace: config.namespace.clone(),
                name: config.name.clone(),
                source,
            })?;

        let watcher = Arc::new(Self {
            namespace: config.namespace.clone(),
            name: config.name.clone(),
            stop: scope.child_token(),
            state: Mutex::new(WatcherState {
                ref_count: 1,
                secret,
            }),
        });
        tokio::spawn(Watcher::run(watcher.clone(), store, stream));
        Ok(watcher)
    }

    /// Consume watch events until the watcher is stopped, reconnecting when
    /// the server closes the stream.
    async fn run(self: Arc<Self>, store: Arc<dyn SecretStore>, mut stream: SecretEventStream) {
        loop {
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => return,
                    event = stream.next() => match event {
                        Some(event) => self.apply(event).await,
                        None => break,
                    },
                }
            }

            stream = match self.reconnect(&store).await {
                Some(stream) => stream,
                None => return,
            };
        }
    }

    /// Reopen the watch subscription, retrying indefinitely while the object
    /// is still referenced. Returns `None` once the last registration is
    /// gone or the watcher is stopped.
    async fn reconnect(&self, store: &Arc<dyn SecretStore>) -> Option<SecretEventStream> {
        loop {
            // The stream may have closed because the last consumer released
            // the watcher.
            if self.state.lock().await.ref_count == 0 {
                return None;
            }

            tokio::select! {
                _ = self.stop.cancelled() => return None,
                _ = tokio::time::sleep(reconnect_delay()) => {}
            }

            // Hold the lock across the reopen: `remove` takes the same lock
            // to decrement, so the last consumer cannot release the watcher
            // between the recheck and the new subscription.
            let state = self.state.lock().await;
            if state.ref_count == 0 {
                return None;
            }
            match store.watch(&self.namespace, &self.name).await {
                Ok(stream) => return Some(stream),
                Err(error) => {
                    warn!(
                        namespace = %self.namespace,
                        name = %self.name,
                        error = %error,
                        "unable to restart watch for secret"
                    );
                }
            }
        }
    }

    async fn apply(&self, event: SecretEvent) {
        let mut state = self.state.lock().await;
        match event {
            SecretEvent::Added(secret) | SecretEvent::Modified(secret) => {
                state.secret = Some(secret);
            }
            SecretEvent::Deleted(_) => state.secret = None,
            // Disabled explicitly when opening the subscription.
            SecretEvent::Bookmark => {}
            SecretEvent::Error(message) => {
                warn!(
                    namespace = %self.namespace,
                    name = %self.name,
                    message = message.as_deref().unwrap_or(""),
                    "watch error event"
                );
            }
        }
    }
}

/// Fetcher bound to one key of one watched object.
struct KeyFetcher {
    watcher: Arc<Watcher>,
    config: SecretConfig,
}

#[async_trait]
impl Fetcher for KeyFetcher {
    async fn fetch(&self) -> Result<String> {
        let state = self.watcher.state.lock().await;
        match &state.secret {
            Some(secret) => secret_key_value(secret, &self.config),
            None => Err(Error::ObjectNotFound {
                namespace: self.config.namespace.clone(),
                name: self.config.name.clone(),
            }),
        }
    }
}

/// Secret provider that keeps one live watch per referenced Secret object.
///
/// All entry points are serialized by the manager, so the watcher map itself
/// needs no lock; each watcher carries its own for the reconnect loop.
pub struct WatchProvider {
    store: Arc<dyn SecretStore>,
    scope: CancellationToken,
    watchers: HashMap<String, Arc<Watcher>>,
}

impl WatchProvider {
    pub fn new(store: Arc<dyn SecretStore>, scope: CancellationToken) -> Self {
        Self {
            store,
            scope,
            watchers: HashMap::new(),
        }
    }

    #[cfg(test)]
    fn is_clean(&self) -> bool {
        self.watchers.is_empty()
    }
}

#[async_trait]
impl Provider<SecretConfig> for WatchProvider {
    async fn add(&mut self, config: &SecretConfig) -> Result<Box<dyn Fetcher>> {
        let object_key = config.object_key();
        if let Some(watcher) = self.watchers.get(&object_key) {
            // Another key of the same object is already registered; share
            // its watch.
            watcher.state.lock().await.ref_count += 1;
            return Ok(Box::new(KeyFetcher {
                watcher: watcher.clone(),
                config: config.clone(),
            }));
        }

        let watcher = Watcher::open(self.store.clone(), &self.scope, config).await?;
        self.watchers.insert(object_key, watcher.clone());
        Ok(Box::new(KeyFetcher {
            watcher,
            config: config.clone(),
        }))
    }

    async fn update(&mut self, before: &SecretConfig, after: &SecretConfig) -> Result<Box<dyn Fetcher>> {
        if before.object_key() == after.object_key() {
            // Same object, different key: remap onto the existing watch.
            let Some(watcher) = self.watchers.get(&after.object_key()) else {
                // The manager never updates an unregistered config; validate
                // anyway.
                return Err(Error::ObjectNotFound {
                    namespace: after.namespace.clone(),
                    name: after.name.clone(),
                });
            };
            return Ok(Box::new(KeyFetcher {
                watcher: watcher.clone(),
                config: after.clone(),
            }));
        }
        self.remove(before).await?;
        self.add(after).await
    }

    async fn remove(&mut self, config: &SecretConfig) -> Result<()> {
        let object_key = config.object_key();
        let Some(watcher) = self.watchers.get(&object_key).cloned() else {
            return Ok(());
        };

        // Taking the watcher lock excludes the reconnect loop, which cannot
        // reopen the stream once the count hits zero.
        let mut state = watcher.state.lock().await;
        state.ref_count -= 1;
        if state.ref_count > 0 {
            return Ok(());
        }
        watcher.stop.cancel();
        drop(state);
        self.watchers.remove(&object_key);
        Ok(())
    }
}
