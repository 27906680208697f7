use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Canonical form of an entity name: lowercase, trimmed, single-spaced.
/// Punctuation is significant: "Node.js" and "Nodejs" stay distinct.
pub fn canonicalize(name: &str) -> String {
    let lowered = name.to_lowercase();
    WHITESPACE.replace_all(lowered.trim(), " ").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    New,
    Duplicate { kept_id: String },
}

/// First-occurrence-wins registry of canonical entity names.
#[derive(Debug, Default)]
pub struct EntityNormalizer {
    /// Maps canonical name -> id of the entity that claimed it first
    canonical_ids: HashMap<String, String>,
    /// Maps raw entity id -> kept entity id (identity for kept entities)
    id_aliases: HashMap<String, String>,
}

impl EntityNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &str, name: &str) -> Registration {
        let canonical = canonicalize(name);

        if let Some(kept_id) = self.canonical_ids.get(&canonical) {
            let kept_id = kept_id.clone();
            self.id_aliases
                .entry(id.to_string())
                .or_insert_with(|| kept_id.clone());
            return Registration::Duplicate { kept_id };
        }

        self.canonical_ids.insert(canonical, id.to_string());
        self.id_aliases.insert(id.to_string(), id.to_string());
        Registration::New
    }

    /// Resolve a relationship endpoint (entity id or entity name) to a kept entity id.
    pub fn resolve(&self, endpoint: &str) -> Option<&str> {
        if let Some(id) = self.id_aliases.get(endpoint) {
            return Some(id);
        }
        self.canonical_ids
            .get(&canonicalize(endpoint))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.canonical_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(canonicalize("GraphRAG"), "graphrag");
        assert_eq!(canonicalize("  GraphRAG  "), "graphrag");
        assert_eq!(canonicalize("New   York\tCity"), "new york city");
    }

    #[test]
    fn test_punctuation_keeps_names_apart() {
        assert_eq!(canonicalize("Node.js"), "node.js");
        assert_ne!(canonicalize("Node.js"), canonicalize("Nodejs"));

        let mut normalizer = EntityNormalizer::new();
        assert_eq!(normalizer.register("1", "Node.js"), Registration::New);
        assert_eq!(normalizer.register("2", "Nodejs"), Registration::New);
        assert_eq!(
            normalizer.register("3", "NODE.JS"),
            Registration::Duplicate { kept_id: "1".to_string() }
        );
    }

    #[test]
    fn test_first_occurrence_wins() {
        let mut normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.register("1", "Paris"), Registration::New);
        assert_eq!(
            normalizer.register("7", "PARIS"),
            Registration::Duplicate { kept_id: "1".to_string() }
        );
        assert_eq!(normalizer.len(), 1);
    }

    #[test]
    fn test_resolve_by_id_name_and_alias() {
        let mut normalizer = EntityNormalizer::new();
        normalizer.register("1", "Paris");
        normalizer.register("7", "paris");
        normalizer.register("2", "France");

        assert_eq!(normalizer.resolve("2"), Some("2"));
        assert_eq!(normalizer.resolve("7"), Some("1"));
        assert_eq!(normalizer.resolve("FRANCE"), Some("2"));
        assert_eq!(normalizer.resolve("Berlin"), None);
    }
}
