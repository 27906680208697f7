/// Bump whenever the prompt text changes; part of every cache key.
pub const PROMPT_VERSION: &str = "refine-v1";

const MAX_DESCRIPTION_CHARS: usize = 400;
const MAX_NAME_CHARS: usize = 120;

/// Truncate on a char boundary, marking the cut.
pub fn bounded(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub fn build_entity_prompt(name: &str, entity_type: &str, description: &str) -> String {
    format!(
        r#"You normalize knowledge graph entities onto DBpedia-style ontology classes.

ENTITY:
- name: "{}"
- extracted type: "{}"
- description: "{}"

INSTRUCTIONS:
1. "type": the most specific ontology class for this entity, as a single PascalCase word or compound (e.g. City, Person, Organisation, SoftwareApplication)
2. "description": the description rewritten as one clean factual sentence
3. "disambiguation": a short hint telling this entity apart from same-named ones (e.g. "city in France")
4. Output ONLY a JSON object, no markdown, no explanations

SCHEMA:
{{"type": "ClassName", "description": "clean description", "disambiguation": "short hint"}}

JSON OUTPUT:"#,
        bounded(name, MAX_NAME_CHARS),
        bounded(entity_type, MAX_NAME_CHARS),
        bounded(description, MAX_DESCRIPTION_CHARS),
    )
}

pub fn build_relationship_prompt(source: &str, target: &str, description: &str) -> String {
    format!(
        r#"You normalize knowledge graph relationships onto DBpedia-style ontology properties.

RELATIONSHIP:
- source: "{}"
- target: "{}"
- description: "{}"

INSTRUCTIONS:
1. "type": the ontology property linking source to target, as a single camelCase verb phrase (e.g. capital, birthPlace, locatedInArea, foundedBy)
2. "description": the description rewritten as one clean factual sentence
3. "disambiguation": a short hint about the direction or sense of the link
4. Output ONLY a JSON object, no markdown, no explanations

SCHEMA:
{{"type": "propertyName", "description": "clean description", "disambiguation": "short hint"}}

JSON OUTPUT:"#,
        bounded(source, MAX_NAME_CHARS),
        bounded(target, MAX_NAME_CHARS),
        bounded(description, MAX_DESCRIPTION_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_respects_char_boundaries() {
        assert_eq!(bounded("héllo", 2), "hé...");
        assert_eq!(bounded("short", 10), "short");
    }

    #[test]
    fn test_prompts_are_bounded() {
        let long = "x".repeat(5_000);
        let prompt = build_entity_prompt("Paris", "location", &long);
        assert!(prompt.len() < 2_000);
        assert!(prompt.contains("\"Paris\""));

        let prompt = build_relationship_prompt("Paris", "France", "is the capital of");
        assert!(prompt.contains("camelCase"));
    }
}
