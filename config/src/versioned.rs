//! # Versioned Configuration Values
//!
//! Every mutable operational setting is held in an immutable value carrying a
//! content-derived `version`. Updates never touch a live value: callers seed
//! an overlay from the current snapshot, stage the fields they want to change,
//! and build a new snapshot whose version is recomputed from the final staged
//! values.
//!
//! The version doubles as an optimistic-concurrency token: a writer supplies
//! the version it last saw, and the holder of the live value rejects the
//! update when the versions differ.

use serde::Serialize;

/// A configuration value with a deterministic, content-derived version tag.
pub trait Versioned {
    /// Hex digest of the ordered tuple of all settings.
    fn version(&self) -> &str;

    /// Whether `candidate` is the version of this exact value.
    fn is_version(&self, candidate: &str) -> bool {
        self.version() == candidate
    }
}

/// UI-facing representation of a versioned value.
///
/// Persistence encodings of config values never carry the version; this
/// wrapper flattens the settings and appends it for clients that need the
/// concurrency token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiView<T> {
    #[serde(flatten)]
    pub config: T,
    pub version: String
}

impl<T: Versioned + Clone> UiView<T> {
    pub fn of(config: &T) -> Self {
        Self {
            config: config.clone(),
            version: config.version().to_string()
        }
    }
}
