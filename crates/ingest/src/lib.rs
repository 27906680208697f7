pub mod clean;
pub mod error;
pub mod normalizer;
pub mod reader;
pub mod schema;

pub use error::IngestError;
pub use normalizer::{EntityNormalizer, Registration, canonicalize};
pub use reader::{ARTIFACT_EXTENSIONS, FileReader, Table};
pub use schema::{
    CanonicalCollision, ExtractedData, LabelCount, Provenance, RawEntity, RawRelationship,
    RejectedRow,
};

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use clean::{cell_number, cell_text};

/// Artifact file stems; each is read as `.parquet` when present, else `.json`.
pub const ENTITIES_ARTIFACT: &str = "create_final_entities";
pub const RELATIONSHIPS_ARTIFACT: &str = "create_final_relationships";

pub const ENTITY_COLUMNS: [&str; 4] = ["id", "name", "type", "description"];
pub const RELATIONSHIP_COLUMNS: [&str; 4] = ["source", "target", "description", "weight"];

const MAX_EXAMPLES: usize = 3;

/// Read both artifacts from `artifacts_dir` and build the stage-1 record set.
pub async fn extract(artifacts_dir: &Path) -> Result<ExtractedData, IngestError> {
    let locate = |stem: &str| {
        FileReader::locate(artifacts_dir, stem).ok_or_else(|| IngestError::Schema {
            artifact: artifacts_dir.to_string_lossy().to_string(),
            detail: format!(
                "required artifact {} not found (tried {})",
                stem,
                ARTIFACT_EXTENSIONS.join(", ")
            ),
        })
    };
    let entities_path = locate(ENTITIES_ARTIFACT)?;
    let relationships_path = locate(RELATIONSHIPS_ARTIFACT)?;

    info!(path = %entities_path.display(), "Reading entities");
    let entities = FileReader::read_table(&entities_path).await?;
    info!(path = %relationships_path.display(), "Reading relationships");
    let relationships = FileReader::read_table(&relationships_path).await?;

    extract_tables(&entities, &relationships)
}

/// Validate, clean and deduplicate two already-loaded artifact tables.
pub fn extract_tables(
    entities: &Table,
    relationships: &Table,
) -> Result<ExtractedData, IngestError> {
    check_schema(entities, relationships)?;

    let mut data = ExtractedData::default();
    let mut normalizer = EntityNormalizer::new();
    let mut seen_ids = HashSet::new();

    // Entities
    for (row_idx, row) in entities.rows.iter().enumerate() {
        let id = cell_text(row.get("id"));
        let name = cell_text(row.get("name"));

        if id.is_empty() || name.is_empty() {
            data.rejected_rows.push(RejectedRow {
                artifact: ENTITIES_ARTIFACT.to_string(),
                row: row_idx,
                reason: "missing id or name".to_string(),
            });
            continue;
        }

        // An id names one record; a repeat would give two records one provenance
        if !seen_ids.insert(id.clone()) {
            data.rejected_rows.push(RejectedRow {
                artifact: ENTITIES_ARTIFACT.to_string(),
                row: row_idx,
                reason: format!("duplicate id {:?}", id),
            });
            continue;
        }

        match normalizer.register(&id, &name) {
            Registration::New => {
                let entity_type = cell_text(row.get("type"));
                let description = cell_text(row.get("description"));
                if !entity_type.is_empty() {
                    tally(&mut data.types, &entity_type, &name);
                }
                data.entities.push(RawEntity::new(id, name, entity_type, description));
            }
            Registration::Duplicate { kept_id } => {
                data.collisions.push(CanonicalCollision {
                    canonical: canonicalize(&name),
                    kept_id,
                    dropped_id: id,
                    dropped_name: name,
                });
            }
        }
    }

    if data.entities.is_empty() {
        return Err(IngestError::EmptyInput {
            artifact: ENTITIES_ARTIFACT.to_string(),
            total: entities.rows.len(),
        });
    }

    // Relationships
    for (row_idx, row) in relationships.rows.iter().enumerate() {
        let source = cell_text(row.get("source"));
        let target = cell_text(row.get("target"));

        if source.is_empty() || target.is_empty() {
            data.rejected_rows.push(RejectedRow {
                artifact: RELATIONSHIPS_ARTIFACT.to_string(),
                row: row_idx,
                reason: "missing source or target".to_string(),
            });
            continue;
        }

        let weight = match cell_number(row.get("weight")) {
            Ok(weight) => weight.unwrap_or(1.0),
            Err(reason) => {
                data.rejected_rows.push(RejectedRow {
                    artifact: RELATIONSHIPS_ARTIFACT.to_string(),
                    row: row_idx,
                    reason,
                });
                continue;
            }
        };

        let description = cell_text(row.get("description"));
        let resolved_source = normalizer.resolve(&source).map(str::to_string);
        let resolved_target = normalizer.resolve(&target).map(str::to_string);
        let resolved = resolved_source.is_some() && resolved_target.is_some();

        if !description.is_empty() {
            tally(
                &mut data.predicates,
                &description,
                &format!("{} -> {}", source, target),
            );
        }

        data.relationships.push(RawRelationship::new(
            row_idx,
            resolved_source.unwrap_or(source),
            resolved_target.unwrap_or(target),
            description,
            weight,
            resolved,
        ));
    }

    if !relationships.rows.is_empty() && data.relationships.is_empty() {
        return Err(IngestError::EmptyInput {
            artifact: RELATIONSHIPS_ARTIFACT.to_string(),
            total: relationships.rows.len(),
        });
    }

    if !data.collisions.is_empty() {
        warn!(
            collisions = data.collisions.len(),
            "Entities merged by canonical name"
        );
    }
    if !data.rejected_rows.is_empty() {
        warn!(rejected = data.rejected_rows.len(), "Rows rejected during extraction");
    }
    let dangling = data.dangling_relationships();
    if dangling > 0 {
        warn!(dangling, "Relationships with unresolved endpoints");
    }

    info!(
        entities = data.entities.len(),
        relationships = data.relationships.len(),
        types = data.types.len(),
        predicates = data.predicates.len(),
        "Extraction complete"
    );

    Ok(data)
}

fn check_schema(entities: &Table, relationships: &Table) -> Result<(), IngestError> {
    let missing_entities = entities.missing(&ENTITY_COLUMNS);
    let missing_relationships = relationships.missing(&RELATIONSHIP_COLUMNS);

    let mut problems = Vec::new();
    if !missing_entities.is_empty() {
        problems.push((ENTITIES_ARTIFACT, missing_entities));
    }
    if !missing_relationships.is_empty() {
        problems.push((RELATIONSHIPS_ARTIFACT, missing_relationships));
    }

    match problems.as_slice() {
        [] => Ok(()),
        [(artifact, fields)] => Err(IngestError::missing_fields(artifact, fields)),
        _ => Err(IngestError::Schema {
            artifact: "artifacts".to_string(),
            detail: problems
                .iter()
                .map(|(artifact, fields)| {
                    format!("{} missing required fields: {}", artifact, fields.join(", "))
                })
                .collect::<Vec<_>>()
                .join("; "),
        }),
    }
}

fn tally(counts: &mut BTreeMap<String, LabelCount>, label: &str, example: &str) {
    let entry = counts.entry(label.to_string()).or_default();
    entry.count += 1;
    if entry.examples.len() < MAX_EXAMPLES {
        entry.examples.push(example.to_string());
    }
}
