//! Kubernetes API access for the secret providers.
//!
//! [`SecretStore`] is the seam between the providers and the API server:
//! production code goes through [`KubeSecretStore`], tests substitute an
//! in-memory implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, WatchParams};
use kube::core::WatchEvent;

/// One decoded event from a secret watch subscription.
#[derive(Debug, Clone)]
pub enum SecretEvent {
    Added(Secret),
    Modified(Secret),
    Deleted(Secret),
    /// Bookmarks are disabled at subscription time; arrival is a protocol
    /// anomaly, not an error.
    Bookmark,
    /// Status message from the API server. The stream is expected to close
    /// shortly after.
    Error(Option<String>),
}

/// Stream of events for exactly one watched object.
pub type SecretEventStream = Pin<Box<dyn Stream<Item = SecretEvent> + Send>>;

/// Read and watch access to Secret objects.
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Point read of one object. `Ok(None)` when the object does not exist.
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Secret>>;

    /// Open a watch subscription filtered to exactly one object, with
    /// bookmarks disabled.
    async fn watch(&self, namespace: &str, name: &str) -> anyhow::Result<SecretEventStream>;
}

/// [`SecretStore`] backed by a live API server connection.
#[derive(Clone)]
pub struct KubeSecretStore {
    client: kube::Client,
}

impl KubeSecretStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Secret>> {
        Ok(self.secrets(namespace).get_opt(name).await?)
    }

    async fn watch(&self, namespace: &str, name: &str) -> anyhow::Result<SecretEventStream> {
        let params = WatchParams::default()
            .fields(&format!("metadata.name={name}"))
            .disable_bookmarks();
        let events = self.secrets(namespace).watch(&params, "0").await?;
        Ok(events
            .map(|event| match event {
                Ok(WatchEvent::Added(secret)) => SecretEvent::Added(secret),
                Ok(WatchEvent::Modified(secret)) => SecretEvent::Modified(secret),
                Ok(WatchEvent::Deleted(secret)) => SecretEvent::Deleted(secret),
                Ok(WatchEvent::Bookmark(_)) => SecretEvent::Bookmark,
                Ok(WatchEvent::Error(status)) => SecretEvent::Error(Some(status.message)),
                Err(error) => SecretEvent::Error(Some(error.to_string())),
            })
            .boxed())
    }
}
