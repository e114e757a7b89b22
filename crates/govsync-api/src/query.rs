//! List queries.
//!
//! Filters are kept structured so every backend can evaluate them its own
//! way: the HTTP client renders an OData expression, the in-memory API
//! evaluates clauses directly.

use serde::{Deserialize, Serialize};

/// A single `field eq 'value'` clause. `field` may be a `/`-separated path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub field: String,
    pub value: String,
}

/// Conjunction of equality clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().and_eq(field, value)
    }

    #[must_use]
    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.clauses.push(Clause {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Renders as an OData `$filter` expression.
    #[must_use]
    pub fn to_odata(&self) -> String {
        self.clauses
            .iter()
            .map(|c| format!("{} eq '{}'", c.field, escape_literal(&c.value)))
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

/// Escapes an OData string literal (single quotes are doubled).
#[must_use]
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Parameters of a `list` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Option<Filter>,
    pub select: Vec<String>,
}

impl ListQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            select: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_select(mut self, fields: &[String]) -> Self {
        self.select = fields.to_vec();
        self
    }

    /// Query-string pairs for the HTTP transport.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(filter) = self.filter.as_ref().filter(|f| !f.is_empty()) {
            params.push(("$filter".to_string(), filter.to_odata()));
        }
        if !self.select.is_empty() {
            params.push(("$select".to_string(), self.select.join(",")));
        }
        params
    }
}
