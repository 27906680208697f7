use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_ENTITY_NS: &str = "http://graphrag.local/entity/";
pub const DEFAULT_ONTOLOGY_NS: &str = "http://dbpedia.org/ontology/";
pub const DEFAULT_FALLBACK_PREDICATE: &str = "http://dbpedia.org/ontology/wikiPageWikiLink";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Namespaces {
    /// Prefix for minted entity IRIs
    pub entity: String,
    /// Bound to `dbo:` in the Turtle output
    pub ontology: String,
    /// Predicate for relationships without a property mapping
    pub fallback_predicate: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            entity: DEFAULT_ENTITY_NS.to_string(),
            ontology: DEFAULT_ONTOLOGY_NS.to_string(),
            fallback_predicate: DEFAULT_FALLBACK_PREDICATE.to_string(),
        }
    }
}

impl Namespaces {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("entity", &self.entity), ("ontology", &self.ontology)] {
            if Url::parse(value).is_err() {
                bail!("namespaces.{} is not an absolute IRI: {:?}", field, value);
            }
            if !value.ends_with('/') && !value.ends_with('#') {
                bail!("namespaces.{} must end with '/' or '#': {:?}", field, value);
            }
        }
        if Url::parse(&self.fallback_predicate).is_err() {
            bail!(
                "namespaces.fallback_predicate is not an absolute IRI: {:?}",
                self.fallback_predicate
            );
        }
        Ok(())
    }
}
