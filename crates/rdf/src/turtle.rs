use anyhow::{Context, Result};
use oxttl::TurtleSerializer;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::build::GraphBuild;
use crate::model::{GR_NS, RDF_NS, RDFS_NS};
use crate::namespaces::Namespaces;
use crate::validate::{OutputValidationError, validate};

/// Prefix bindings declared at the top of the output.
fn prefixes(namespaces: &Namespaces) -> [(&'static str, &str); 4] {
    [
        ("rdf", RDF_NS),
        ("rdfs", RDFS_NS),
        ("dbo", namespaces.ontology.as_str()),
        ("gr", GR_NS),
    ]
}

/// Serialize the graph as Turtle. Triples are emitted in sorted order, so
/// statements about one subject are grouped.
pub fn render_turtle(graph: &GraphBuild, namespaces: &Namespaces) -> Result<Vec<u8>> {
    let mut serializer = TurtleSerializer::new();
    for (prefix, iri) in prefixes(namespaces) {
        serializer = serializer
            .with_prefix(prefix, iri)
            .context(format!("Invalid namespace for prefix {}: {:?}", prefix, iri))?;
    }

    let mut writer = serializer.for_writer(Vec::new());
    for triple in &graph.triples {
        let triple = triple
            .to_oxrdf()
            .map_err(|first| OutputValidationError { count: 1, first })?;
        writer.serialize_triple(&triple)?;
    }
    Ok(writer.finish()?)
}

/// Validate the graph, then write it atomically. On validation failure
/// nothing is written.
pub fn write_turtle(graph: &GraphBuild, namespaces: &Namespaces, path: &Path) -> Result<()> {
    validate(&graph.triples)?;
    let rendered = render_turtle(graph, namespaces)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).context(format!("Failed to create {:?}", dir))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&rendered)?;
    tmp.persist(path)
        .context(format!("Failed to write graph: {:?}", path))?;

    info!(path = ?path, triples = graph.len(), "Graph written");
    Ok(())
}
