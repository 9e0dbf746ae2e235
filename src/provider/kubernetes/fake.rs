//! In-memory [`SecretStore`] for provider tests.
//!
//! Mimics the API server closely enough for the providers: point reads from
//! a map, watch subscriptions as channels that receive typed events when the
//! map is mutated, and a kill switch that closes every open stream the way a
//! server-side disconnect would.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tokio::sync::mpsc;

use super::client::{SecretEvent, SecretEventStream, SecretStore};

pub(crate) fn make_secret(
    namespace: &str,
    name: &str,
    binary: &[(&str, &[u8])],
    string: &[(&str, &str)],
) -> Secret {
    let mut secret = Secret {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..Secret::default()
    };
    if !binary.is_empty() {
        secret.data = Some(
            binary
                .iter()
                .map(|(key, value)| (key.to_string(), ByteString(value.to_vec())))
                .collect(),
        );
    }
    if !string.is_empty() {
        secret.string_data = Some(
            string
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        );
    }
    secret
}

fn object_key(secret: &Secret) -> (String, String) {
    (
        secret.metadata.namespace.clone().unwrap_or_default(),
        secret.metadata.name.clone().unwrap_or_default(),
    )
}

struct Subscription {
    namespace: String,
    name: String,
    sender: mpsc::UnboundedSender<SecretEvent>,
}

#[derive(Default)]
struct FakeState {
    secrets: HashMap<(String, String), Secret>,
    subscriptions: Vec<Subscription>,
    streams_opened: usize,
}

impl FakeState {
    fn notify(&mut self, key: &(String, String), event: SecretEvent) {
        self.subscriptions.retain(|subscription| {
            if subscription.namespace != key.0 || subscription.name != key.1 {
                return !subscription.sender.is_closed();
            }
            subscription.sender.send(event.clone()).is_ok()
        });
    }
}

#[derive(Default)]
pub(crate) struct FakeSecretStore {
    state: Mutex<FakeState>,
}

impl FakeSecretStore {
    pub(crate) fn new(initial: impl IntoIterator<Item = Secret>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for secret in initial {
                state.secrets.insert(object_key(&secret), secret);
            }
        }
        store
    }

    /// Create or replace an object, notifying matching subscriptions.
    pub(crate) fn upsert(&self, secret: Secret) {
        let key = object_key(&secret);
        let mut state = self.state.lock().unwrap();
        let existed = state.secrets.insert(key.clone(), secret.clone()).is_some();
        let event = if existed {
            SecretEvent::Modified(secret)
        } else {
            SecretEvent::Added(secret)
        };
        state.notify(&key, event);
    }

    /// Delete an object, notifying matching subscriptions.
    pub(crate) fn delete(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        let mut state = self.state.lock().unwrap();
        if let Some(secret) = state.secrets.remove(&key) {
            state.notify(&key, SecretEvent::Deleted(secret));
        }
    }

    /// Close every open stream, as a server-side disconnect would.
    pub(crate) fn kill_streams(&self) {
        self.state.lock().unwrap().subscriptions.clear();
    }

    /// Streams whose consumer has not gone away yet.
    pub(crate) fn open_stream_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .filter(|subscription| !subscription.sender.is_closed())
            .count()
    }

    /// Total number of watch subscriptions ever opened.
    pub(crate) fn streams_opened(&self) -> usize {
        self.state.lock().unwrap().streams_opened
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> anyhow::Result<Option<Secret>> {
        let key = (namespace.to_string(), name.to_string());
        Ok(self.state.lock().unwrap().secrets.get(&key).cloned())
    }

    async fn watch(&self, namespace: &str, name: &str) -> anyhow::Result<SecretEventStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.streams_opened += 1;
        state.subscriptions.push(Subscription {
            namespace: namespace.to_string(),
            name: name.to_string(),
            sender,
        });
        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        })
        .boxed())
    }
}
