//! # Provider Traits
//!
//! The seams between the provider manager and backend implementations.
//!
//! A backend implements three pieces:
//! - [`ProviderConfig`]: serializable factory; its serialized form is the
//!   provider's identity across configuration snapshots
//! - [`Provider`]: lifecycle of registrations for one backend kind
//! - [`Fetcher`]: per-registration read handle returned by the provider

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod kubernetes;

/// A handle on one registered secret reference.
///
/// Fetchers are cheap value objects closing over provider-owned state; they
/// stay valid until the registration they came from is removed or replaced.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Resolve the current plaintext of the secret.
    async fn fetch(&self) -> Result<String>;
}

/// A secret provider: owns the lifecycle of fetchers for one backend kind.
///
/// All three operations are serialized by the manager, which is the sole
/// caller. On failure an operation must leave the provider's bookkeeping
/// unchanged; no partial allocation may be visible to subsequent calls.
#[async_trait]
pub trait Provider<T>: Send + Sync {
    /// Register a new secret reference and return its fetcher.
    async fn add(&mut self, config: &T) -> Result<Box<dyn Fetcher>>;

    /// Transition a registration from `before` to `after`.
    ///
    /// The returned fetcher replaces the one handed out for `before`, which
    /// must not be used again.
    async fn update(&mut self, before: &T, after: &T) -> Result<Box<dyn Fetcher>>;

    /// Release the registration for `config`.
    ///
    /// Removing an unknown configuration is a silent no-op, so the manager
    /// can issue removes during error recovery without reverse bookkeeping.
    async fn remove(&mut self, config: &T) -> Result<()>;
}

/// Options handed to a provider factory.
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    /// Cancellation scope for this provider generation. The manager cancels
    /// it when the provider is rebuilt or closed; every background task the
    /// provider spawns must terminate when it fires.
    pub shutdown: CancellationToken,
}

/// Configuration and constructor for a [`Provider`].
///
/// Two configs are considered the same provider identity when their
/// serialized forms are byte-equal; fields excluded from serialization
/// (`#[serde(skip)]`) never trigger a rebuild.
#[async_trait]
pub trait ProviderConfig: Serialize + Send + Sync {
    /// The per-secret configuration type this provider consumes.
    type Secret: Serialize + Clone + Send + Sync + 'static;

    /// Human-readable name of the provider kind.
    fn name(&self) -> &str;

    /// Build a provider bound to the given options.
    async fn new_provider(&self, opts: ProviderOptions) -> Result<Box<dyn Provider<Self::Secret>>>;
}
