use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::schema::RefinementResponse;

const CACHE_FORMAT_VERSION: u32 = 1;

/// Cache key: hash of the record content plus the prompt version that refined it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub content_hash: String,
    pub prompt_version: String,
}

impl CacheKey {
    pub fn new(content: &[&str], prompt_version: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in content {
            // Length prefix keeps ("ab", "c") and ("a", "bc") apart
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self {
            content_hash: hex::encode(hasher.finalize()),
            prompt_version: prompt_version.to_string(),
        }
    }

    fn storage_key(&self) -> String {
        format!("{}:{}", self.prompt_version, self.content_hash)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, RefinementResponse>,
}

/// Refinement results shared across worker tasks and persisted between runs.
#[derive(Clone, Default)]
pub struct RefinementCache {
    entries: Arc<DashMap<String, RefinementResponse>>,
}

impl RefinementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a persisted cache; a missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        let cache = Self::new();
        if !path.exists() {
            return Ok(cache);
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read refinement cache: {:?}", path))?;
        let file: CacheFile = serde_json::from_str(&content)
            .context(format!("Failed to parse refinement cache: {:?}", path))?;

        if file.version != CACHE_FORMAT_VERSION {
            tracing::warn!(
                found = file.version,
                expected = CACHE_FORMAT_VERSION,
                "Ignoring refinement cache with unknown format"
            );
            return Ok(cache);
        }

        for (key, value) in file.entries {
            cache.entries.insert(key, value);
        }
        Ok(cache)
    }

    /// Persist atomically; entries are written in sorted order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).context(format!("Failed to create {:?}", dir))?;

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self
                .entries
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path)
            .context(format!("Failed to write refinement cache: {:?}", path))?;
        Ok(())
    }

    pub fn get(&self, key: &CacheKey) -> Option<RefinementResponse> {
        self.entries.get(&key.storage_key()).map(|r| r.value().clone())
    }

    pub fn insert(&self, key: &CacheKey, response: RefinementResponse) {
        self.entries.insert(key.storage_key(), response);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(label: &str) -> RefinementResponse {
        RefinementResponse {
            type_label: label.to_string(),
            description: "d".to_string(),
            disambiguation: "h".to_string(),
        }
    }

    #[test]
    fn test_key_depends_on_content_and_prompt_version() {
        let a = CacheKey::new(&["Paris", "location"], "v1");
        assert_eq!(a, CacheKey::new(&["Paris", "location"], "v1"));
        assert_ne!(a, CacheKey::new(&["Paris", "location"], "v2"));
        assert_ne!(a, CacheKey::new(&["Pari", "slocation"], "v1"));
    }

    #[test]
    fn test_prompt_version_bump_misses() {
        let cache = RefinementCache::new();
        cache.insert(&CacheKey::new(&["Paris"], "v1"), response("City"));

        assert!(cache.get(&CacheKey::new(&["Paris"], "v1")).is_some());
        assert!(cache.get(&CacheKey::new(&["Paris"], "v2")).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("refine_cache.json");

        let cache = RefinementCache::new();
        let key = CacheKey::new(&["Paris", "location"], "v1");
        cache.insert(&key, response("City"));
        cache.save(&path).unwrap();

        let loaded = RefinementCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&key).unwrap().type_label, "City");
    }

    #[test]
    fn test_missing_file_is_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RefinementCache::load(&dir.path().join("absent.json")).unwrap();
        assert!(cache.is_empty());
    }
}
