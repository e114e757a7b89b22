//! Filter evaluation against stored objects.
//!
//! Equality is case-insensitive, like the directory backends this crate
//! stands in for. Callers that need exact matches must re-check client side.

use govsync_api::{Clause, Filter};
use serde_json::{Map, Value};

/// Check if an object matches every clause of `filter`.
pub fn matches(filter: &Filter, object: &Map<String, Value>) -> bool {
    filter.clauses.iter().all(|clause| clause_matches(clause, object))
}

fn clause_matches(clause: &Clause, object: &Map<String, Value>) -> bool {
    match field_value(object, &clause.field) {
        Some(Value::String(s)) => s.eq_ignore_ascii_case(&clause.value),
        Some(Value::Bool(b)) => b.to_string() == clause.value.to_ascii_lowercase(),
        Some(Value::Number(n)) => n.to_string() == clause.value,
        _ => false,
    }
}

/// Resolves a `/`-separated filter path (`catalog/id`).
fn field_value<'a>(object: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('/');
    let mut current = object.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Keeps only the selected top-level fields. `id` is always returned.
pub fn select(object: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    if fields.is_empty() {
        return object.clone();
    }
    object
        .iter()
        .filter(|(k, _)| k.as_str() == "id" || fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_equality_ignores_case() {
        let obj = object(json!({"displayName": "Engineering"}));
        assert!(matches(&Filter::eq("displayName", "engineering"), &obj));
        assert!(!matches(&Filter::eq("displayName", "Eng"), &obj));
    }

    #[test]
    fn test_nested_path_and_conjunction() {
        let obj = object(json!({"displayName": "Pkg", "catalog": {"id": "c1"}}));
        let filter = Filter::eq("displayName", "Pkg").and_eq("catalog/id", "c1");
        assert!(matches(&filter, &obj));
        let filter = Filter::eq("displayName", "Pkg").and_eq("catalog/id", "c2");
        assert!(!matches(&filter, &obj));
    }

    #[test]
    fn test_select_keeps_id() {
        let obj = object(json!({"id": "1", "displayName": "a", "description": "b"}));
        let selected = select(&obj, &["displayName".to_string()]);
        assert_eq!(Value::Object(selected), json!({"id": "1", "displayName": "a"}));
    }
}
