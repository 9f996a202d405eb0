//! Walks structured documents (JSON, YAML, TOML) collecting string leaves by
//! path and writing translated strings back into the same paths.
//!
//! Paths join map keys with `.` and list positions with `[i]`, e.g.
//! `menu.items[2].label`. Keys that contain path syntax are quoted
//! (`menu["a.b"]`) and non-string YAML keys use brackets (`errors[404]`),
//! so distinct leaves never share a path.

use super::TextUnit;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-./]+$").expect("valid identifier regex"))
}

/// Heuristic for values that should never be sent for translation: short
/// hex-looking ids, version numbers and numeric codes.
pub fn is_identifier_like(text: &str) -> bool {
    if !identifier_re().is_match(text) {
        return false;
    }
    // Any letter past 'f' means it is not hex-like
    if text
        .chars()
        .any(|c| c.is_ascii_alphabetic() && c.to_ascii_lowercase() > 'f')
    {
        return false;
    }
    let letters = text.chars().filter(|c| c.is_ascii_alphabetic()).count();
    letters < 3 && text.len() < 30
}

fn should_extract(text: &str) -> bool {
    !text.trim().is_empty() && !is_identifier_like(text)
}

fn needs_quoting(key: &str) -> bool {
    key.is_empty() || key.contains(['.', '[', ']', '"', '\\'])
}

fn join_key(prefix: &str, key: &str) -> String {
    if needs_quoting(key) {
        let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{}[\"{}\"]", prefix, escaped)
    } else if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn index_key(prefix: &str, index: usize) -> String {
    format!("{}[{}]", prefix, index)
}

/// A structured value that can expose and replace its string leaves.
pub trait TextTree {
    fn collect_texts(&self, prefix: &str, out: &mut Vec<TextUnit>);
    fn replace_texts(&mut self, prefix: &str, translations: &HashMap<String, String>);
}

impl TextTree for serde_json::Value {
    fn collect_texts(&self, prefix: &str, out: &mut Vec<TextUnit>) {
        use serde_json::Value;
        match self {
            Value::Object(map) => {
                for (key, value) in map {
                    value.collect_texts(&join_key(prefix, key), out);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_texts(&index_key(prefix, i), out);
                }
            }
            Value::String(s) if should_extract(s) => out.push(TextUnit::new(prefix, s)),
            _ => {}
        }
    }

    fn replace_texts(&mut self, prefix: &str, translations: &HashMap<String, String>) {
        use serde_json::Value;
        match self {
            Value::Object(map) => {
                for (key, value) in map.iter_mut() {
                    value.replace_texts(&join_key(prefix, key), translations);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    item.replace_texts(&index_key(prefix, i), translations);
                }
            }
            Value::String(s) => {
                if let Some(translated) = translations.get(prefix) {
                    *s = translated.clone();
                }
            }
            _ => {}
        }
    }
}

/// YAML mapping keys may be scalars other than strings.
fn yaml_join_key(prefix: &str, key: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;
    match key {
        Value::String(s) => Some(join_key(prefix, s)),
        Value::Number(n) => Some(format!("{}[{}]", prefix, n)),
        Value::Bool(b) => Some(format!("{}[{}]", prefix, b)),
        _ => None,
    }
}

impl TextTree for serde_yaml::Value {
    fn collect_texts(&self, prefix: &str, out: &mut Vec<TextUnit>) {
        use serde_yaml::Value;
        match self {
            Value::Mapping(map) => {
                for (key, value) in map {
                    if let Some(path) = yaml_join_key(prefix, key) {
                        value.collect_texts(&path, out);
                    }
                }
            }
            Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_texts(&index_key(prefix, i), out);
                }
            }
            Value::Tagged(tagged) => tagged.value.collect_texts(prefix, out),
            Value::String(s) if should_extract(s) => out.push(TextUnit::new(prefix, s)),
            _ => {}
        }
    }

    fn replace_texts(&mut self, prefix: &str, translations: &HashMap<String, String>) {
        use serde_yaml::Value;
        match self {
            Value::Mapping(map) => {
                for (key, value) in map.iter_mut() {
                    if let Some(path) = yaml_join_key(prefix, key) {
                        value.replace_texts(&path, translations);
                    }
                }
            }
            Value::Sequence(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    item.replace_texts(&index_key(prefix, i), translations);
                }
            }
            Value::Tagged(tagged) => tagged.value.replace_texts(prefix, translations),
            Value::String(s) => {
                if let Some(translated) = translations.get(prefix) {
                    *s = translated.clone();
                }
            }
            _ => {}
        }
    }
}

impl TextTree for toml::Value {
    fn collect_texts(&self, prefix: &str, out: &mut Vec<TextUnit>) {
        use toml::Value;
        match self {
            Value::Table(table) => table.collect_texts(prefix, out),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_texts(&index_key(prefix, i), out);
                }
            }
            Value::String(s) if should_extract(s) => out.push(TextUnit::new(prefix, s)),
            _ => {}
        }
    }

    fn replace_texts(&mut self, prefix: &str, translations: &HashMap<String, String>) {
        use toml::Value;
        match self {
            Value::Table(table) => table.replace_texts(prefix, translations),
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    item.replace_texts(&index_key(prefix, i), translations);
                }
            }
            Value::String(s) => {
                if let Some(translated) = translations.get(prefix) {
                    *s = translated.clone();
                }
            }
            _ => {}
        }
    }
}

impl TextTree for toml::Table {
    fn collect_texts(&self, prefix: &str, out: &mut Vec<TextUnit>) {
        for (key, value) in self {
            value.collect_texts(&join_key(prefix, key), out);
        }
    }

    fn replace_texts(&mut self, prefix: &str, translations: &HashMap<String, String>) {
        for (key, value) in self.iter_mut() {
            value.replace_texts(&join_key(prefix, key), translations);
        }
    }
}
