//! Coerced descriptor fields.
//!
//! Task descriptors arrive either as JSON or as markdown front-matter, with
//! authors free to use snake_case or camelCase keys. Both sources funnel
//! into [`Fields`], which normalises keys and coerces values per lookup, so
//! the loader only ever sees typed data.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Number(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Default)]
pub struct Fields {
    values: HashMap<String, FieldValue>,
}

/// Keys compare case-insensitively with separators stripped, so
/// `acceptance_criteria`, `acceptanceCriteria` and `Acceptance-Criteria`
/// all address the same field.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

impl Fields {
    pub fn insert(&mut self, key: &str, value: FieldValue) {
        self.values.insert(normalize_key(key), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn from_json(value: &Value) -> Self {
        let mut fields = Self::default();
        let Some(object) = value.as_object() else {
            return fields;
        };

        for (key, value) in object {
            let coerced = match value {
                Value::String(s) => FieldValue::Text(s.clone()),
                Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
                Value::Bool(b) => FieldValue::Bool(*b),
                Value::Array(items) => FieldValue::List(
                    items
                        .iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .collect(),
                ),
                _ => continue,
            };
            fields.insert(key, coerced);
        }
        fields
    }

    /// Scalar text; numbers render to their string form.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.values.get(&normalize_key(key))? {
            FieldValue::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            FieldValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// List value; a scalar text degrades to comma-separated items.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(&normalize_key(key))? {
            FieldValue::List(items) => Some(items.clone()),
            FieldValue::Text(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(&normalize_key(key))? {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// First present key among aliases, coerced to text.
    pub fn text_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.text(key))
    }

    /// First present key among aliases, coerced to a list.
    pub fn list_any(&self, keys: &[&str]) -> Option<Vec<String>> {
        keys.iter().find_map(|key| self.list(key))
    }
}
