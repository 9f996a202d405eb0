use crate::document::TextUnit;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A batch of text units sent to the model in a single request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub units: Vec<TextUnit>,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.units.iter().map(TextUnit::char_len).sum()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.key.as_str())
    }

    /// The untranslated text keyed by unit key.
    pub fn source_map(&self) -> HashMap<String, String> {
        self.units
            .iter()
            .map(|u| (u.key.clone(), u.text.clone()))
            .collect()
    }

    /// JSON object of key to text, in unit order.
    pub fn to_json_object(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .units
            .iter()
            .map(|u| (u.key.clone(), serde_json::Value::String(u.text.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Pack units into chunks of at most `max_chars` characters.
///
/// Units keep their document order. A unit longer than the budget is sent on
/// its own rather than split, since splitting a string would break the key
/// mapping.
pub fn chunk_units(units: Vec<TextUnit>, max_chars: usize) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<TextUnit> = Vec::new();
    let mut current_chars = 0;

    fn push_chunk(units: Vec<TextUnit>, chunks: &mut Vec<Chunk>) {
        let index = chunks.len();
        chunks.push(Chunk { index, units });
    }

    for unit in units {
        let len = unit.char_len();

        if len > max_chars {
            if !current.is_empty() {
                push_chunk(std::mem::take(&mut current), &mut chunks);
                current_chars = 0;
            }
            debug!("Unit {} ({} chars) exceeds chunk budget, sending alone", unit.key, len);
            push_chunk(vec![unit], &mut chunks);
            continue;
        }

        if current_chars + len > max_chars && !current.is_empty() {
            push_chunk(std::mem::take(&mut current), &mut chunks);
            current_chars = 0;
        }

        current_chars += len;
        current.push(unit);
    }

    if !current.is_empty() {
        push_chunk(current, &mut chunks);
    }

    chunks
}
