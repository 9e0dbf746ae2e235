//! On-demand Kubernetes secret provider.

use std::sync::Arc;

use async_trait::async_trait;

use super::client::SecretStore;
use super::{secret_key_value, SecretConfig};
use crate::error::{Error, Result};
use crate::provider::{Fetcher, Provider};

/// Secret provider that reads the object from the API server on every fetch.
///
/// Always fresh and entirely stateless, at the cost of one API round trip
/// per fetch. Registrations allocate nothing, so add and remove cannot fail.
pub struct OnDemandProvider {
    store: Arc<dyn SecretStore>,
}

impl OnDemandProvider {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Provider<SecretConfig> for OnDemandProvider {
    async fn add(&mut self, config: &SecretConfig) -> Result<Box<dyn Fetcher>> {
        Ok(Box::new(OnDemandFetcher {
            store: self.store.clone(),
            config: config.clone(),
        }))
    }

    async fn update(&mut self, _before: &SecretConfig, after: &SecretConfig) -> Result<Box<dyn Fetcher>> {
        self.add(after).await
    }

    async fn remove(&mut self, _config: &SecretConfig) -> Result<()> {
        Ok(())
    }
}

struct OnDemandFetcher {
    store: Arc<dyn SecretStore>,
    config: SecretConfig,
}

#[async_trait]
impl Fetcher for OnDemandFetcher {
    async fn fetch(&self) -> Result<String> {
        let secret = self
            .store
            .get(&self.config.namespace, &self.config.name)
            .await
            .map_err(|source| Error::FetchSecret {
                namespace: self.config.namespace.clone(),
                name: self.config.name.clone(),
                source,
            })?;
        match secret {
            Some(secret) => secret_key_value(&secret, &self.config),
            None => Err(Error::ObjectNotFound {
                namespace: self.config.namespace.clone(),
                name: self.config.name.clone(),
            }),
        }
    }
}
