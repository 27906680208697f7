use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static MODEL_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[A-Z_]+\|>").expect("valid token pattern"));
static ENTITY_SPILLOVER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\)\s*\("entity".*$"#).expect("valid spillover pattern"));

/// Clean a GraphRAG string: enclosing quotes, `<|TOKEN|>` markers and
/// tuple spill-over from the extraction prompt format.
pub fn clean_string(s: &str) -> String {
    let mut s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = &s[1..s.len() - 1];
    }
    let s = MODEL_TOKENS.replace_all(s, "");
    let s = ENTITY_SPILLOVER.replace(&s, "");
    s.trim().to_string()
}

/// Cell value as cleaned text; numbers are stringified, null/absent is empty.
pub fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => clean_string(s),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => clean_string(&other.to_string()),
    }
}

/// Cell value as a weight. `Ok(None)` for null/absent, `Err` for non-numeric
/// text and for NaN or infinite values, which checkpoints cannot hold.
pub fn cell_number(value: Option<&Value>) -> Result<Option<f64>, String> {
    let weight = match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("weight {} is not representable", n)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("weight {:?} is not numeric", s)),
        Some(other) => Err(format!("weight {} is not numeric", other)),
    }?;

    match weight {
        Some(w) if !w.is_finite() => Err(format!("weight {} is not finite", w)),
        weight => Ok(weight),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_string() {
        assert_eq!(clean_string("  \"PARIS\" "), "PARIS");
        assert_eq!(clean_string("capital<|COMPLETE|>"), "capital");
        assert_eq!(
            clean_string(r#"France)("entity"<|>"BERLIN"<|>"GEO""#),
            "France"
        );
        assert_eq!(clean_string("\""), "\"");
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(Some(&json!(12))), "12");
        assert_eq!(cell_text(Some(&json!(null))), "");
        assert_eq!(cell_text(None), "");
        assert_eq!(cell_text(Some(&json!("\"Paris\""))), "Paris");
    }

    #[test]
    fn test_cell_number() {
        assert_eq!(cell_number(Some(&json!(2.5))), Ok(Some(2.5)));
        assert_eq!(cell_number(Some(&json!("3"))), Ok(Some(3.0)));
        assert_eq!(cell_number(None), Ok(None));
        assert!(cell_number(Some(&json!("heavy"))).is_err());
    }

    #[test]
    fn test_non_finite_weights_are_rejected() {
        for text in ["NaN", "nan", "inf", "-inf", "infinity"] {
            let err = cell_number(Some(&json!(text))).unwrap_err();
            assert!(err.contains("not finite"), "{}: {}", text, err);
        }
        assert_eq!(cell_number(Some(&json!("1e3"))), Ok(Some(1000.0)));
    }
}
