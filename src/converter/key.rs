//! Configuration Canonicalizer
//!
//! A [`ConverterConfig`] is the flat option mapping handed to the engine. Its
//! [`ConfigurationKey`] is a canonical string: object keys sorted at every
//! depth, `null` entries dropped, integral floats written as integers. Two
//! mappings with the same pairs in any insertion order yield the same key.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Engine configuration for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConverterConfig(BTreeMap<String, Value>);

impl ConverterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Boolean option; accepts JSON booleans and the usual string spellings
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => parse_bool(s),
            Value::Number(n) => n.as_i64().map(|n| n != 0),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Canonical cache key for this configuration
    pub fn key(&self) -> ConfigurationKey {
        let mut out = String::with_capacity(64);
        write_canonical_object(
            self.0.iter().map(|(k, v)| (k.as_str(), v)),
            &mut out,
        );
        ConfigurationKey(out)
    }
}

impl FromIterator<(String, Value)> for ConverterConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Map<String, Value>> for ConverterConfig {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Canonical, order-independent identity of a [`ConverterConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigurationKey(String);

impl ConfigurationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 digest for log fields
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..6])
    }
}

impl fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Canonical encoding
// ============================================================================

fn write_canonical_object<'a>(entries: impl Iterator<Item = (&'a str, &'a Value)>, out: &mut String) {
    let mut sorted: Vec<(&str, &Value)> = entries.filter(|(_, v)| !v.is_null()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_object(map.iter().map(|(k, v)| (k.as_str(), v)), out),
    }
}

fn write_number(n: &Number, out: &mut String) {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                out.push_str(&(f as i64).to_string());
                return;
            }
        }
    }
    out.push_str(&n.to_string());
}

fn write_string(s: &str, out: &mut String) {
    // serde_json escaping of a plain string cannot fail
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => out.push_str(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = ConverterConfig::new()
            .with("backend", "pipeline")
            .with("lang", "en")
            .with("formula_enable", true);
        let b = ConverterConfig::new()
            .with("formula_enable", true)
            .with("lang", "en")
            .with("backend", "pipeline");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().digest(), b.key().digest());
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let mut first = Map::new();
        first.insert("schema".into(), json!({"b": 1, "a": {"y": 2, "x": 1}}));
        let mut second = Map::new();
        second.insert("schema".into(), json!({"a": {"x": 1, "y": 2}, "b": 1}));

        let a = ConverterConfig::from(first);
        let b = ConverterConfig::from(second);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().as_str(), r#"{"schema":{"a":{"x":1,"y":2},"b":1}}"#);
    }

    #[test]
    fn test_values_are_normalized() {
        let a = ConverterConfig::new()
            .with("max_new_tokens", json!(4096.0))
            .with("server_url", Value::Null);
        let b = ConverterConfig::new().with("max_new_tokens", 4096);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_different_values_differ() {
        let a = ConverterConfig::new().with("lang", "en");
        let b = ConverterConfig::new().with("lang", "ch");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_typed_getters() {
        let config = ConverterConfig::new()
            .with("use_llm", "true")
            .with("temperature", 0.5)
            .with("top_k", 20)
            .with("lang", "en");
        assert_eq!(config.get_bool("use_llm"), Some(true));
        assert_eq!(config.get_f64("temperature"), Some(0.5));
        assert_eq!(config.get_u64("top_k"), Some(20));
        assert_eq!(config.get_str("lang"), Some("en"));
        assert_eq!(config.get_bool("missing"), None);
    }
}
