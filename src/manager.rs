//! # Provider Manager
//!
//! Reconciles the running set of secret fetchers against configuration
//! snapshots.
//!
//! Every call to [`ProviderManager::apply_config`] carries the full desired
//! state: one provider configuration plus the list of named per-secret
//! configurations. The manager diffs both against the last accepted snapshot
//! and dispatches the minimal set of add / update / remove operations to the
//! provider. Per-secret failures are accumulated and returned as an advisory
//! composite error; they never fail the snapshot as a whole.
//!
//! All "did this change?" questions are answered by byte-equality of the
//! canonical YAML form, so fields excluded from serialization (runtime
//! caches, test counters) never trigger spurious work.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Errors, Result};
use crate::observability::ManagerMetrics;
use crate::provider::{Fetcher, Provider, ProviderConfig, ProviderOptions};

/// Maps a secret name to a provider-specific secret configuration.
///
/// The name is the stable external handle used by [`ProviderManager::fetch`];
/// it must be unique within a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig<T> {
    pub name: String,
    pub config: T,
}

struct SecretEntry<T> {
    config: T,
    fetcher: Box<dyn Fetcher>,
}

fn yaml_serialize<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}

fn yaml_equal<T: Serialize>(x: &T, y: &T) -> Result<bool> {
    Ok(yaml_serialize(x)? == yaml_serialize(y)?)
}

/// Manages one secret provider and the registrations made against it.
///
/// The manager is single-writer: `apply_config` and `close` take `&mut self`
/// and must not race each other. `fetch` takes `&self` and may be called
/// concurrently from any number of readers.
pub struct ProviderManager<T> {
    shutdown: CancellationToken,
    scope: Option<CancellationToken>,
    provider: Option<Box<dyn Provider<T>>>,
    config: Option<String>,
    entries: HashMap<String, SecretEntry<T>>,
    metrics: ManagerMetrics,
}

impl<T> ProviderManager<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    /// Create a manager. When a registry is supplied the snapshot gauges are
    /// registered against it until [`ProviderManager::close`].
    pub fn new(registry: Option<prometheus::Registry>) -> Result<Self> {
        Ok(Self {
            shutdown: CancellationToken::new(),
            scope: None,
            provider: None,
            config: None,
            entries: HashMap::new(),
            metrics: ManagerMetrics::new(registry)?,
        })
    }

    /// Apply a configuration snapshot, diffing each secret against the last
    /// accepted snapshot to dispatch the relevant provider operation.
    ///
    /// A changed provider configuration (or the absence of a live provider)
    /// rebuilds the provider first: the old generation's cancellation scope
    /// fires strictly before the new provider sees any registration, and all
    /// previous entries are re-created against it. An empty snapshot tears
    /// everything down.
    ///
    /// Per-secret failures are collected into the returned [`Errors`]; the
    /// names they belong to are left unregistered until a later snapshot
    /// succeeds for them.
    pub async fn apply_config<C>(
        &mut self,
        provider_config: &C,
        configs: &[SecretConfig<T>],
    ) -> Result<(), Errors>
    where
        C: ProviderConfig<Secret = T>,
    {
        // No secrets at all: cancel any existing provider and start from a
        // clean slate on the next snapshot.
        if configs.is_empty() {
            if let Some(scope) = self.scope.take() {
                scope.cancel();
            }
            self.provider = None;
            self.entries.clear();
            self.config = None;
            return Ok(());
        }

        let serialized = match yaml_serialize(provider_config) {
            Ok(serialized) => serialized,
            Err(error) => return Err(Errors::from(error)),
        };

        if self.provider.is_none() || self.config.as_deref() != Some(serialized.as_str()) {
            let scope = self.shutdown.child_token();
            let provider = match provider_config
                .new_provider(ProviderOptions {
                    shutdown: scope.clone(),
                })
                .await
            {
                Ok(provider) => provider,
                Err(error) => {
                    // The previous generation keeps serving; the unchanged
                    // cached config makes the next snapshot retry the build.
                    scope.cancel();
                    return Err(Errors::from(error));
                }
            };

            // Cancel the old generation strictly before the new provider
            // sees any registration. The old entries hold fetchers into the
            // cancelled provider and are dropped with it.
            if let Some(old) = self.scope.replace(scope) {
                old.cancel();
            }
            self.provider = Some(provider);
            self.entries.clear();
        }
        self.config = Some(serialized);

        self.update_secrets(configs).await
    }

    async fn update_secrets(&mut self, configs: &[SecretConfig<T>]) -> Result<(), Errors> {
        let mut errs = Errors::default();

        // First pass: a name that occurs more than once is disabled outright,
        // with one error per collision.
        let mut enabled: HashMap<&str, bool> = HashMap::new();
        for secret in configs {
            match enabled.entry(secret.name.as_str()) {
                Entry::Vacant(entry) => {
                    entry.insert(true);
                }
                Entry::Occupied(mut entry) => {
                    if *entry.get() {
                        errs.push(Error::DuplicateKey {
                            name: secret.name.clone(),
                        });
                        entry.insert(false);
                    }
                }
            }
        }

        let Some(provider) = self.provider.as_mut() else {
            // apply_config rebuilds before calling in; this is unreachable
            // short of a bug, but not worth a panic.
            errs.push(Error::Provider(anyhow::anyhow!("no provider configured")));
            return errs.into_result();
        };

        let mut next: HashMap<String, SecretEntry<T>> = HashMap::new();
        for incoming in configs {
            if !enabled.get(incoming.name.as_str()).copied().unwrap_or(false) {
                continue;
            }
            // Entries still present in `self.entries` after this walk are
            // exactly the removed set.
            if let Some(mut previous) = self.entries.remove(&incoming.name) {
                match yaml_equal(&previous.config, &incoming.config) {
                    Ok(true) => {
                        next.insert(incoming.name.clone(), previous);
                    }
                    Ok(false) => match provider.update(&previous.config, &incoming.config).await {
                        Ok(fetcher) => {
                            previous.config = incoming.config.clone();
                            previous.fetcher = fetcher;
                            next.insert(incoming.name.clone(), previous);
                        }
                        Err(error) => errs.push(error),
                    },
                    Err(error) => errs.push(error),
                }
            } else {
                match provider.add(&incoming.config).await {
                    Ok(fetcher) => {
                        next.insert(
                            incoming.name.clone(),
                            SecretEntry {
                                config: incoming.config.clone(),
                                fetcher,
                            },
                        );
                    }
                    Err(error) => errs.push(error),
                }
            }
        }

        // Whatever the snapshot no longer names gets released. Best effort;
        // failures are advisory.
        for (_, unused) in self.entries.drain() {
            if let Err(error) = provider.remove(&unused.config).await {
                errs.push(error);
            }
        }
        self.entries = next;

        let total = enabled.len() as i64;
        let failed = total - self.entries.len() as i64;
        self.metrics.observe_snapshot(total, failed);

        errs.into_result()
    }

    /// Resolve the current plaintext for a registered secret name.
    pub async fn fetch(&self, name: &str) -> Result<String> {
        match self.entries.get(name) {
            Some(entry) => entry.fetcher.fetch().await,
            None => Err(Error::NotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Number of live registrations from the last snapshot.
    pub fn secret_count(&self) -> usize {
        self.entries.len()
    }

    /// Cancel the manager, stopping every provider background task, and drop
    /// the gauges from the injected registry. The manager must not be used
    /// afterwards.
    pub fn close(&mut self) {
        self.shutdown.cancel();
        self.metrics.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Identity {
        endpoint: String,
        timeout_secs: u64,
        #[serde(skip)]
        attempt: u32,
    }

    #[test]
    fn serialized_equality_ignores_skipped_fields() {
        let x = Identity {
            endpoint: "https://example.test".into(),
            timeout_secs: 5,
            attempt: 1,
        };
        let y = Identity {
            endpoint: "https://example.test".into(),
            timeout_secs: 5,
            attempt: 99,
        };
        assert!(yaml_equal(&x, &y).unwrap());
    }

    #[test]
    fn serialized_equality_detects_field_changes() {
        let x = Identity {
            endpoint: "https://example.test".into(),
            timeout_secs: 5,
            attempt: 0,
        };
        let y = Identity {
            endpoint: "https://example.test".into(),
            timeout_secs: 6,
            attempt: 0,
        };
        assert!(!yaml_equal(&x, &y).unwrap());
    }

    #[test]
    fn serialization_is_deterministic() {
        let value = Identity {
            endpoint: "https://example.test".into(),
            timeout_secs: 5,
            attempt: 0,
        };
        assert_eq!(
            yaml_serialize(&value).unwrap(),
            yaml_serialize(&value).unwrap()
        );
    }
}
