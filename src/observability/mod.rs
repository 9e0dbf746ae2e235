//! # Observability
//!
//! Prometheus metrics exposed by the provider manager.

pub(crate) mod metrics;

pub(crate) use metrics::ManagerMetrics;
