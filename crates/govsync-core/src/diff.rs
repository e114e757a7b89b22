//! Structural comparison of property bags.
//!
//! Remote objects come back with keys in whatever order the backend chose and
//! with numbers re-serialized (`1` may come back as `1.0`). Equality here is
//! therefore structural:
//!
//! - objects compare as unordered key sets, values recursively
//! - arrays compare position by position (rule stage ordering is meaningful)
//! - numbers compare by their normalized textual form
//!
//! [`project`] and [`changed_fields`] build on [`equal`] to answer the
//! question the engine actually asks: do the fields the caller manages
//! already hold the desired values?

use serde_json::{Map, Number, Value};

/// Returns `true` if `a` and `b` are structurally equal.
pub fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => maps_equal(x, y),
        _ => false,
    }
}

/// Object equality ignoring key order.
pub fn maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, left)| b.get(key).is_some_and(|right| equal(left, right)))
}

/// Compares two numbers by normalized textual form.
pub fn numbers_equal(a: &Number, b: &Number) -> bool {
    normalize_number(a) == normalize_number(b)
}

/// Canonical text for a JSON number.
///
/// Integers print as integers. Floats with no fractional part print as the
/// integer they hold (within the exactly representable range), everything
/// else prints as the shortest round-trip representation.
pub fn normalize_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            format!("{}", f as i64)
        }
        Some(f) => format!("{f}"),
        None => n.to_string(),
    }
}

/// Projects `remote` onto the key set of `desired`.
///
/// Keys listed in `ignored` are dropped first; keys `desired` does not mention
/// are unmanaged and never take part in the comparison. A key present in
/// `desired` but missing remotely stays missing, so the projection then
/// differs from `desired`.
pub fn project(
    remote: &Map<String, Value>,
    desired: &Map<String, Value>,
    ignored: &[String],
) -> Map<String, Value> {
    desired
        .keys()
        .filter(|key| !ignored.iter().any(|i| i == *key))
        .filter_map(|key| remote.get(key).map(|v| (key.clone(), v.clone())))
        .collect()
}

/// Returns the sorted top-level fields of `desired` whose remote value differs.
///
/// Ignored fields are skipped on both sides.
pub fn changed_fields(
    remote: &Map<String, Value>,
    desired: &Map<String, Value>,
    ignored: &[String],
) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(key, _)| !ignored.iter().any(|i| i == *key))
        .filter(|(key, want)| match remote.get(key.as_str()) {
            Some(have) => !equal(have, want),
            None => true,
        })
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}

/// Returns `true` when the managed fields of `remote` already match `desired`.
pub fn matches_desired(
    remote: &Map<String, Value>,
    desired: &Map<String, Value>,
    ignored: &[String],
) -> bool {
    changed_fields(remote, desired, ignored).is_empty()
}
