use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::similarity;

const BUILTIN_ONTOLOGY: &str = include_str!("../data/dbpedia_core.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    Class,
    Property,
}

/// One class or property of the target ontology.
#[derive(Debug, Clone, PartialEq)]
pub struct OntologyTerm {
    pub kind: TermKind,
    pub uri: String,
    pub name: String,
    pub label: String,
    pub comment: String,
    pub parent: Option<String>,
    /// Distance from a hierarchy root; 0 for properties
    pub depth: usize,
    pub(crate) label_tokens: Vec<String>,
    pub(crate) context_tokens: HashSet<String>,
    embedding_text: String,
}

impl OntologyTerm {
    /// Text embedded for semantic matching: `label: comment`, or the label alone.
    pub fn embedding_text(&self) -> &str {
        &self.embedding_text
    }
}

/// On-disk ontology format, shared by bundled, user-supplied and fetched ontologies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyFile {
    pub name: String,
    pub namespace: String,
    pub classes: Vec<TermEntry>,
    #[serde(default)]
    pub properties: Vec<TermEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Read-only index over the ontology. Built once per run, then shared.
#[derive(Debug, Clone)]
pub struct OntologyIndex {
    name: String,
    namespace: String,
    classes: Vec<OntologyTerm>,
    properties: Vec<OntologyTerm>,
}

impl OntologyIndex {
    /// The bundled DBpedia core subset.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_ONTOLOGY).context("Failed to load built-in ontology")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read ontology: {:?}", path))?;
        Self::from_json(&content).context(format!("Invalid ontology file: {:?}", path))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: OntologyFile = serde_json::from_str(content)?;
        Self::build(file)
    }

    pub fn build(file: OntologyFile) -> Result<Self> {
        if file.classes.is_empty() {
            bail!("ontology {:?} declares no classes", file.name);
        }

        let mut seen = HashSet::new();
        for entry in file.classes.iter().chain(&file.properties) {
            if entry.name.trim().is_empty() {
                bail!("ontology term with empty name");
            }
            if !seen.insert(entry.name.as_str()) {
                bail!("duplicate ontology term {:?}", entry.name);
            }
        }

        let parents: HashMap<&str, Option<&str>> = file
            .classes
            .iter()
            .map(|c| (c.name.as_str(), c.parent.as_deref()))
            .collect();

        let mut classes = Vec::with_capacity(file.classes.len());
        for entry in &file.classes {
            let depth = class_depth(&entry.name, &parents)?;
            classes.push(make_term(&file.namespace, TermKind::Class, entry, depth));
        }

        let properties = file
            .properties
            .iter()
            .map(|entry| make_term(&file.namespace, TermKind::Property, entry, 0))
            .collect();

        Ok(Self {
            name: file.name,
            namespace: file.namespace,
            classes,
            properties,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn classes(&self) -> &[OntologyTerm] {
        &self.classes
    }

    pub fn properties(&self) -> &[OntologyTerm] {
        &self.properties
    }

    pub fn terms(&self, kind: TermKind) -> &[OntologyTerm] {
        match kind {
            TermKind::Class => &self.classes,
            TermKind::Property => &self.properties,
        }
    }

    pub fn find(&self, name: &str) -> Option<&OntologyTerm> {
        self.classes
            .iter()
            .chain(&self.properties)
            .find(|t| t.name == name)
    }
}

fn make_term(namespace: &str, kind: TermKind, entry: &TermEntry, depth: usize) -> OntologyTerm {
    let label = entry.label.clone().unwrap_or_else(|| entry.name.clone());
    let mut context_tokens: HashSet<String> = similarity::tokens(&label).into_iter().collect();
    context_tokens.extend(similarity::tokens(&entry.comment));
    let embedding_text = if entry.comment.trim().is_empty() {
        label.clone()
    } else {
        format!("{}: {}", label, entry.comment.trim())
    };

    OntologyTerm {
        kind,
        uri: entry
            .uri
            .clone()
            .unwrap_or_else(|| format!("{}{}", namespace, entry.name)),
        name: entry.name.clone(),
        label_tokens: similarity::tokens(&label),
        label,
        comment: entry.comment.clone(),
        parent: entry.parent.clone(),
        depth,
        context_tokens,
        embedding_text,
    }
}

// Parents outside the ontology count as roots
fn class_depth(name: &str, parents: &HashMap<&str, Option<&str>>) -> Result<usize> {
    let mut depth = 0;
    let mut visited = HashSet::from([name]);
    let mut current = name;

    while let Some(Some(parent)) = parents.get(current).copied() {
        if !parents.contains_key(parent) {
            break;
        }
        if !visited.insert(parent) {
            bail!("class hierarchy cycle through {:?}", name);
        }
        depth += 1;
        current = parent;
    }

    Ok(depth)
}
