//! # Metrics
//!
//! Gauges tracking the outcome of the most recent configuration snapshot.
//!
//! ## Metrics Exposed
//!
//! - `secret_provider_secrets_total` - Current number of secrets
//! - `secret_provider_failed_secret_configs` - Current number of secret
//!   configurations that failed to load

use prometheus::{IntGauge, Registry};

use crate::error::Result;

/// The manager's gauges, registered against an optionally injected registry.
///
/// Registration happens at construction, unregistration when the manager
/// closes; gauges are owned by the manager instance rather than shared
/// process-wide, so multiple managers with their own registries never
/// interfere.
pub(crate) struct ManagerMetrics {
    registry: Option<Registry>,
    failed_secret_configs: IntGauge,
    secrets_total: IntGauge,
}

impl ManagerMetrics {
    pub(crate) fn new(registry: Option<Registry>) -> Result<Self> {
        let failed_secret_configs = IntGauge::new(
            "secret_provider_failed_secret_configs",
            "Current number of secret configurations that failed to load.",
        )?;
        let secrets_total = IntGauge::new(
            "secret_provider_secrets_total",
            "Current number of secrets.",
        )?;
        if let Some(registry) = &registry {
            registry.register(Box::new(failed_secret_configs.clone()))?;
            registry.register(Box::new(secrets_total.clone()))?;
        }
        Ok(Self {
            registry,
            failed_secret_configs,
            secrets_total,
        })
    }

    /// Record the outcome of one applied snapshot.
    pub(crate) fn observe_snapshot(&self, total: i64, failed: i64) {
        self.secrets_total.set(total);
        self.failed_secret_configs.set(failed);
    }

    /// Drop the gauges from the registry. Best effort.
    pub(crate) fn unregister(&self) {
        if let Some(registry) = &self.registry {
            let _ = registry.unregister(Box::new(self.failed_secret_configs.clone()));
            let _ = registry.unregister(Box::new(self.secrets_total.clone()));
        }
    }
}
