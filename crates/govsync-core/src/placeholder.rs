//! `${name}` substitution over property trees.
//!
//! Desired documents often reference identifiers that only exist once an
//! earlier resource has converged (a policy rule naming the package it guards,
//! a package naming its catalog). Those references are written as
//! `${name}` and resolved right before the document is compared or sent.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

/// Errors raised while rendering placeholders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceholderError {
    #[error("unresolved placeholder: ${{{name}}}")]
    Unresolved { name: String },

    #[error("unterminated placeholder in: {input}")]
    Unterminated { input: String },
}

/// Values available for substitution.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: HashMap<String, String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Renders every placeholder in `input`.
    pub fn render_str(&self, input: &str) -> Result<String, PlaceholderError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| PlaceholderError::Unterminated {
                input: input.to_string(),
            })?;
            let name = after[..end].trim();
            let value = self.get(name).ok_or_else(|| PlaceholderError::Unresolved {
                name: name.to_string(),
            })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Renders every string leaf (and object key) of `value`.
    pub fn render(&self, value: &Value) -> Result<Value, PlaceholderError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render_str(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(self.render_str(key)?, self.render(item)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

/// Collects the placeholder names referenced anywhere inside `value`.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect(value, &mut names);
    names
}

/// Collects the placeholder names referenced by a single string.
pub fn references_in(input: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_str(input, &mut names);
    names
}

fn collect(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => collect_str(s, names),
        Value::Array(items) => items.iter().for_each(|item| collect(item, names)),
        Value::Object(map) => {
            for (key, item) in map {
                collect_str(key, names);
                collect(item, names);
            }
        }
        _ => {}
    }
}

fn collect_str(input: &str, names: &mut BTreeSet<String>) {
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return;
        };
        names.insert(after[..end].trim().to_string());
        rest = &after[end + 1..];
    }
}
