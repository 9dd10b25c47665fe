//! # Collector Utilities
//!
//! Common utility functions for config version tags and list parsing.
//!
//! # Best Practices
//!
//! - Uses SHA-2 for content-derived version tags

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Compute the version tag of a config value from the ordered tuple of its
/// settings.
///
/// The tuple is JSON-encoded before hashing, so field order matters and
/// `(1, 2)` never collides with `(12,)`.
///
/// ```
/// use utils::compute_version_hash;
///
/// let a = compute_version_hash(&(168_u32, 1000_u32));
/// let b = compute_version_hash(&(168_u32, 1000_u32));
/// assert_eq!(a, b);
/// assert_ne!(a, compute_version_hash(&(1000_u32, 168_u32)));
/// ```
#[must_use]
pub fn compute_version_hash<T: Serialize + ?Sized>(fields: &T) -> String {
    let encoded = serde_json::to_vec(fields).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    hex::encode(hasher.finalize())
}

/// Split a comma-separated list, trimming whitespace and omitting empty
/// entries.
#[must_use]
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_hash_is_order_sensitive() {
        let forward = compute_version_hash(&(vec![48_u32, 720], 168_u32));
        let swapped = compute_version_hash(&(168_u32, vec![48_u32, 720]));
        assert_ne!(forward, swapped);
        assert_eq!(forward.len(), 64);
    }

    #[test]
    fn test_split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" 10.0.0.1 , ,10.0.0.2,, "),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
        );
        assert!(split_list(" , ").is_empty());
    }
}
