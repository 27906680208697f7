use oxrdf::NamedNode;
use thiserror::Error;

use crate::model::{Term, Triple};

/// The triple set cannot be serialized. Nothing is written when this is returned.
#[derive(Debug, Error)]
#[error("{count} invalid triple(s) in output graph; first: {first}")]
pub struct OutputValidationError {
    pub count: usize,
    pub first: String,
}

// Characters Turtle does not allow inside an IRIREF
const FORBIDDEN: &[char] = &['<', '>', '"', '{', '}', '|', '^', '`', '\\'];

fn check_iri(role: &str, iri: &str) -> Result<(), String> {
    if iri.is_empty() {
        return Err(format!("empty {}", role));
    }
    if let Some(c) = iri
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN.contains(c))
    {
        return Err(format!("{} {:?} contains forbidden character {:?}", role, iri, c));
    }
    NamedNode::new(iri).map_err(|e| format!("{} {:?} is not an absolute IRI: {}", role, iri, e))?;
    Ok(())
}

fn check_triple(triple: &Triple) -> Result<(), String> {
    check_iri("subject", &triple.subject)?;
    check_iri("predicate", &triple.predicate)?;
    if let Term::Iri(object) = &triple.object {
        check_iri("object", object)?;
    }
    Ok(())
}

/// Check every triple; literals may hold any text.
pub fn validate<'a>(
    triples: impl IntoIterator<Item = &'a Triple>,
) -> Result<(), OutputValidationError> {
    let mut count = 0;
    let mut first = None;

    for triple in triples {
        if let Err(problem) = check_triple(triple) {
            count += 1;
            first.get_or_insert(problem);
        }
    }

    match first {
        None => Ok(()),
        Some(first) => Err(OutputValidationError { count, first }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RDFS_LABEL;

    #[test]
    fn test_valid_triples_pass() {
        let triples = [
            Triple::new("http://x/a", RDFS_LABEL, Term::literal("has <angle> \"quotes\"")),
            Triple::new("http://x/a", "http://x/p", Term::iri("http://x/b")),
        ];
        assert!(validate(&triples).is_ok());
    }

    #[test]
    fn test_invalid_triples_are_counted() {
        let triples = [
            Triple::new("", RDFS_LABEL, Term::literal("x")),
            Triple::new("http://x/a b", RDFS_LABEL, Term::literal("x")),
            Triple::new("http://x/a", "relative", Term::literal("x")),
            Triple::new("http://x/a", RDFS_LABEL, Term::iri("http://x/{b}")),
        ];
        let err = validate(&triples).unwrap_err();
        assert_eq!(err.count, 4);
        assert!(err.first.contains("empty subject"));
    }
}
