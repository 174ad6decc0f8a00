//! Versioned cache sets.
//!
//! Responses live in named sets; each deployment version owns three
//! canonical sets and activation removes every set that does not belong
//! to the current version. Storage is in-memory and shared, so handles
//! are cheap to clone into background refresh tasks.

use std::sync::Arc;

use dashmap::DashMap;

use crate::request::CachedResponse;

/// The three canonical cache sets of one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSet {
    StaticAssets,
    DynamicContent,
    ApiResponses,
}

impl CacheSet {
    pub const ALL: [CacheSet; 3] = [
        CacheSet::StaticAssets,
        CacheSet::DynamicContent,
        CacheSet::ApiResponses,
    ];

    /// Set name with the version suffix baked in.
    pub fn name(self, version: u32) -> String {
        match self {
            Self::StaticAssets => format!("static-assets-v{version}"),
            Self::DynamicContent => format!("dynamic-content-v{version}"),
            Self::ApiResponses => format!("api-responses-v{version}"),
        }
    }

    /// All three canonical names for a version.
    pub fn names_for(version: u32) -> Vec<String> {
        Self::ALL.iter().map(|set| set.name(version)).collect()
    }
}

type Entries = Arc<DashMap<String, CachedResponse>>;

/// Shared in-memory storage for all cache sets.
#[derive(Clone, Default)]
pub struct CacheStorage {
    sets: Arc<DashMap<String, Entries>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a response, creating the set on first use.
    pub fn put(&self, set: &str, key: String, response: CachedResponse) {
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(key, response);
    }

    pub fn get(&self, set: &str, key: &str) -> Option<CachedResponse> {
        let entries = self.sets.get(set)?;
        let hit = entries.get(key)?;
        Some(hit.clone())
    }

    pub fn contains(&self, set: &str, key: &str) -> bool {
        self.sets
            .get(set)
            .is_some_and(|entries| entries.contains_key(key))
    }

    /// Remove a whole set. Returns false when no such set existed.
    pub fn delete_set(&self, set: &str) -> bool {
        self.sets.remove(set).is_some()
    }

    /// Delete every set whose name is not in `keep`. Returns the removed
    /// names, sorted.
    pub fn retain_sets(&self, keep: &[String]) -> Vec<String> {
        let mut removed: Vec<String> = self
            .sets
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !keep.contains(name))
            .collect();
        for name in &removed {
            self.sets.remove(name);
        }
        removed.sort();
        removed
    }

    /// All current set names, sorted.
    pub fn set_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of entries in a set, zero when the set does not exist.
    pub fn len(&self, set: &str) -> usize {
        self.sets.get(set).map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_names_embed_version() {
        assert_eq!(CacheSet::StaticAssets.name(3), "static-assets-v3");
        assert_eq!(
            CacheSet::names_for(2),
            vec![
                "static-assets-v2".to_string(),
                "dynamic-content-v2".to_string(),
                "api-responses-v2".to_string(),
            ]
        );
    }

    #[test]
    fn test_retain_sets_removes_everything_else() {
        let storage = CacheStorage::new();
        for version in [1, 2] {
            for set in CacheSet::names_for(version) {
                storage.put(
                    &set,
                    "https://app.test/x".to_string(),
                    CachedResponse::text(200, "text/plain", "x"),
                );
            }
        }
        storage.put(
            "legacy-cache",
            "https://app.test/y".to_string(),
            CachedResponse::text(200, "text/plain", "y"),
        );

        let removed = storage.retain_sets(&CacheSet::names_for(2));

        assert_eq!(
            removed,
            vec![
                "api-responses-v1".to_string(),
                "dynamic-content-v1".to_string(),
                "legacy-cache".to_string(),
                "static-assets-v1".to_string(),
            ]
        );
        assert_eq!(
            storage.set_names(),
            vec![
                "api-responses-v2".to_string(),
                "dynamic-content-v2".to_string(),
                "static-assets-v2".to_string(),
            ]
        );
        assert!(!storage.contains("static-assets-v1", "https://app.test/x"));
        assert!(storage.contains("static-assets-v2", "https://app.test/x"));
    }

    #[test]
    fn test_get_clones_the_stored_response() {
        let storage = CacheStorage::new();
        storage.put(
            "static-assets-v1",
            "https://app.test/app.js".to_string(),
            CachedResponse::text(200, "text/javascript", "console.log(1)"),
        );
        let hit = storage.get("static-assets-v1", "https://app.test/app.js");
        assert_eq!(hit.map(|r| r.status), Some(200));
        assert_eq!(storage.len("static-assets-v1"), 1);
        assert_eq!(storage.len("missing-set"), 0);
    }
}
