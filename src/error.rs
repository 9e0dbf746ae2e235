//! Error types for the secret provider subsystem.

use std::fmt;

use thiserror::Error;

/// Result type for secret provider operations.
pub type Result<T, E = self::Error> = std::result::Result<T, E>;

/// Errors surfaced by the manager and the built-in providers.
///
/// The `Display` wordings of the first four variants are part of the public
/// contract and must stay stable; callers and tests match on them.
#[derive(Debug, Error)]
pub enum Error {
    /// No secret with this name is registered with the manager.
    #[error("secret {name:?} not found")]
    NotFound { name: String },

    /// The same name occurred more than once within one snapshot.
    #[error("duplicate secret key {name:?}")]
    DuplicateKey { name: String },

    /// The referenced Secret object does not exist (or was deleted).
    #[error("secret {namespace}/{name} not found")]
    ObjectNotFound { namespace: String, name: String },

    /// The Secret object exists but does not carry the requested key.
    #[error("secret {namespace}/{name} does not contain key: {key}")]
    KeyNotFound {
        namespace: String,
        name: String,
        key: String,
    },

    /// Opening the watch subscription for an object failed.
    #[error("unable to watch secret {namespace}/{name}: {source}")]
    WatchSecret {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The point read seeding or serving an object failed.
    #[error("unable to fetch secret {namespace}/{name}: {source}")]
    FetchSecret {
        namespace: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A configuration could not be put into its canonical serialized form.
    #[error(transparent)]
    Serialize(#[from] serde_yaml::Error),

    /// Gauge registration against the injected registry failed.
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    /// Provider-specific failure, surfaced verbatim.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// An accumulation of per-secret errors from one snapshot.
///
/// Applying a snapshot never stops at the first failure: every add, update,
/// and remove is attempted and the failures are collected here. `Display`
/// joins the constituents with newlines.
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// Record one more error.
    pub fn push(&mut self, error: Error) {
        self.0.push(error);
    }

    /// Whether any error was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The recorded errors, in the order they occurred.
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    /// `Ok(())` when empty, `Err(self)` otherwise.
    pub fn into_result(self) -> Result<(), Errors> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Error> for Errors {
    fn from(error: Error) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}
