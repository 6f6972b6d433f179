//! Flat field-name → text records.
//!
//! Model output and caller-supplied records are arbitrary JSON trees. Every
//! writer works on the flattened form: nested keys lose their prefix, and when
//! two leaves end up with the same bare key the later one in traversal order
//! wins. Key order is the traversal order of the source document and is what
//! containment lookups iterate over.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Placeholder the model uses for "nothing found"; never written to a sheet.
pub const BLANK_PLACEHOLDER: &str = "（空白）";

/// True for values that must not be written: empty, whitespace or the blank
/// placeholder.
pub fn is_blank(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == BLANK_PLACEHOLDER
}

/// Flattens a JSON tree into `(bare key, text)` pairs in traversal order.
///
/// - nested objects are walked, their keys kept without a prefix
/// - arrays of scalars become one newline-joined value under the parent key
/// - objects inside arrays are walked like nested objects
/// - `null` becomes an empty string
pub fn flatten(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    match value {
        Value::Object(map) => flatten_object(map, &mut out),
        Value::Array(items) => {
            for item in items {
                if let Value::Object(map) = item {
                    flatten_object(map, &mut out);
                }
            }
        }
        _ => {}
    }
    out
}

fn flatten_object(map: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in map {
        match value {
            Value::Object(inner) => flatten_object(inner, out),
            Value::Array(items) => {
                let scalars: Vec<String> = items
                    .iter()
                    .filter(|item| !item.is_object() && !item.is_array())
                    .map(scalar_text)
                    .collect();
                if !scalars.is_empty() || items.is_empty() {
                    out.push((key.clone(), scalars.join("\n")));
                }
                for item in items {
                    if let Value::Object(inner) = item {
                        flatten_object(inner, out);
                    }
                }
            }
            scalar => out.push((key.clone(), scalar_text(scalar))),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Ordered map of field name to extracted text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatRecord {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl FlatRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: &Value) -> Self {
        let mut record = Self::new();
        record.merge_value(value);
        record
    }

    /// Inserts or overwrites. An overwritten key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// Flattens `value` into the record, last write wins. Returns the number of
    /// leaves applied.
    pub fn merge_value(&mut self, value: &Value) -> usize {
        let pairs = flatten(value);
        let count = pairs.len();
        for (key, text) in pairs {
            self.insert(key, text);
        }
        count
    }

    pub fn extend_from(&mut self, other: &FlatRecord) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(|&pos| self.entries[pos].1.as_str())
    }

    /// Value of `key`, or an empty string.
    pub fn text(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// First entry, in record order, whose key contains `name` or is contained
    /// in it. Empty keys never match.
    pub fn find_related(&self, name: &str) -> Option<(&str, &str)> {
        if name.is_empty() {
            return None;
        }
        self.iter()
            .find(|(key, _)| !key.is_empty() && (key.contains(name) || name.contains(*key)))
    }

    /// Exact key first, then [`FlatRecord::find_related`].
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name)
            .or_else(|| self.find_related(name).map(|(_, value)| value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (key, value) in iter {
            record.insert(key, value);
        }
        record
    }
}

impl Serialize for FlatRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

impl<'de> Deserialize<'de> for FlatRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}
