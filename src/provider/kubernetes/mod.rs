//! # Kubernetes Secret Providers
//!
//! Providers backed by the Kubernetes API, serving keys out of `Secret`
//! objects.
//!
//! Two implementations share one client seam ([`SecretStore`]):
//! - [`WatchProvider`]: keeps a single live watch per referenced object and
//!   answers fetches from its cache, reconnecting in the background
//! - [`OnDemandProvider`]: stateless, one API read per fetch

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderConfig, ProviderOptions};

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod on_demand;
mod watch;

pub use client::{KubeSecretStore, SecretEvent, SecretEventStream, SecretStore};
pub use on_demand::OnDemandProvider;
pub use watch::WatchProvider;

/// Reference to one key within one Secret object.
///
/// Two configurations with the same `(namespace, name)` pair address the
/// same object and share a watch in the watching provider.
///
/// ```
/// use secret_provider::kubernetes::SecretConfig;
///
/// let config = SecretConfig {
///     namespace: "ns1".into(),
///     name: "s2".into(),
///     key: "k1".into(),
/// };
/// assert_eq!(config.object_key(), "ns1/s2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfig {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl SecretConfig {
    /// The `"NAMESPACE/NAME"` index under which watches are shared.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Access to the Kubernetes API server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Path to a kubeconfig file. When unset the client configuration is
    /// inferred from the environment (in-cluster service account or the
    /// default kubeconfig).
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Context to select from the kubeconfig file.
    #[serde(default)]
    pub context: Option<String>,
}

impl ClientConfig {
    async fn client(&self) -> Result<kube::Client> {
        let config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("unable to read kubeconfig {}", path.display()))?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &KubeConfigOptions {
                        context: self.context.clone(),
                        ..KubeConfigOptions::default()
                    },
                )
                .await
                .context("unable to load kubeconfig")?
            }
            None => kube::Config::infer()
                .await
                .context("unable to infer Kubernetes client configuration")?,
        };
        Ok(kube::Client::try_from(config).context("unable to build Kubernetes client")?)
    }
}

/// Configuration for the watching secret provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchProviderConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
}

#[async_trait]
impl ProviderConfig for WatchProviderConfig {
    type Secret = SecretConfig;

    fn name(&self) -> &str {
        "kubernetes_watch"
    }

    async fn new_provider(&self, opts: ProviderOptions) -> Result<Box<dyn Provider<SecretConfig>>> {
        let client = self.client.client().await?;
        Ok(Box::new(WatchProvider::new(
            Arc::new(KubeSecretStore::new(client)),
            opts.shutdown,
        )))
    }
}

/// Configuration for the on-demand secret provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnDemandProviderConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
}

#[async_trait]
impl ProviderConfig for OnDemandProviderConfig {
    type Secret = SecretConfig;

    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn new_provider(&self, _opts: ProviderOptions) -> Result<Box<dyn Provider<SecretConfig>>> {
        let client = self.client.client().await?;
        Ok(Box::new(OnDemandProvider::new(Arc::new(
            KubeSecretStore::new(client),
        ))))
    }
}

/// Resolve a key within a Secret payload.
///
/// The binary map takes precedence over the string map when both carry the
/// same key.
pub(crate) fn secret_key_value(secret: &Secret, config: &SecretConfig) -> Result<String> {
    if let Some(data) = &secret.data {
        if let Some(value) = data.get(&config.key) {
            return Ok(String::from_utf8_lossy(&value.0).into_owned());
        }
    }
    if let Some(string_data) = &secret.string_data {
        if let Some(value) = string_data.get(&config.key) {
            return Ok(value.clone());
        }
    }
    Err(Error::KeyNotFound {
        namespace: config.namespace.clone(),
        name: config.name.clone(),
        key: config.key.clone(),
    })
}
