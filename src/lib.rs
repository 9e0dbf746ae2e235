//! # Secret Provider
//!
//! A reconfigurable, in-process manager for secret providers.
//!
//! The manager is driven by configuration snapshots: each call to
//! [`ProviderManager::apply_config`] carries the full desired set of named
//! secret references, and the manager reconciles the running set of fetchers
//! against it — adding, updating, and removing registrations while absorbing
//! per-secret failures.
//!
//! ## Overview
//!
//! 1. **Provider traits** - [`Provider`] owns the lifecycle of fetchers for
//!    one backend kind; [`ProviderConfig`] is the factory whose serialized
//!    form defines provider identity across snapshots
//! 2. **Fetchers** - a [`Fetcher`] is a caller-facing handle that resolves
//!    the current plaintext for one registered secret reference
//! 3. **Kubernetes backends** - [`kubernetes::WatchProvider`] keeps one live
//!    watch per referenced Secret object and serves reads from its cache;
//!    [`kubernetes::OnDemandProvider`] reads the object on every fetch
//! 4. **Prometheus metrics** - the manager exposes gauges for the secret
//!    count and the number of failed secret configurations through an
//!    injected registry

pub mod error;
pub mod manager;
mod observability;
pub mod provider;

pub use error::{Error, Errors, Result};
pub use manager::{ProviderManager, SecretConfig};
pub use provider::kubernetes;
pub use provider::{Fetcher, Provider, ProviderConfig, ProviderOptions};
