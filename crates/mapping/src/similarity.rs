use std::collections::HashSet;

use refine::labels;

/// How much description overlap can lift a partial label match.
pub const CONTEXT_WEIGHT: f64 = 0.2;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it", "its",
    "of", "on", "or", "such", "that", "the", "this", "to", "was", "were", "which", "with",
];

/// Lowercased content words of a label or free text, camelCase split.
pub fn tokens(text: &str) -> Vec<String> {
    labels::words(text)
        .into_iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Similarity of two token sequences in [0,1]: the better of edit-distance
/// similarity over the joined words and word-set Jaccard.
pub fn label_similarity(query: &[String], candidate: &[String]) -> f64 {
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }

    let joined_query = query.join(" ");
    let joined_candidate = candidate.join(" ");
    let edit = strsim::normalized_levenshtein(&joined_query, &joined_candidate);

    let q: HashSet<&String> = query.iter().collect();
    let c: HashSet<&String> = candidate.iter().collect();
    let jaccard = q.intersection(&c).count() as f64 / q.union(&c).count() as f64;

    edit.max(jaccard).clamp(0.0, 1.0)
}

/// Overlap coefficient between the term's context and the candidate's label + comment.
pub fn context_overlap(context: &HashSet<String>, candidate: &HashSet<String>) -> f64 {
    let smaller = context.len().min(candidate.len());
    if smaller == 0 {
        return 0.0;
    }
    context.intersection(candidate).count() as f64 / smaller as f64
}

/// Combined score: label similarity, lifted toward 1 by context overlap.
pub fn combine(label: f64, context: f64) -> f64 {
    let score = label + (1.0 - label) * CONTEXT_WEIGHT * context;
    round(score.clamp(0.0, 1.0))
}

/// Scores are compared at 4 decimals so float noise never breaks a tie.
pub fn round(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}
