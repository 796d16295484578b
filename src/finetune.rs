//! Conversion of extracted entity records into fine-tuning examples.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("record is not a valid example: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Turns one extracted entity object into a training record.
pub trait ExampleFormatter {
    fn format(&self, entity: &Value) -> Result<Value, FormatError>;
}

#[derive(Debug, Deserialize)]
struct Example {
    text: String,
    #[serde(default)]
    entities: Vec<Mention>,
}

#[derive(Debug, Deserialize)]
struct Mention {
    entity: String,
    #[serde(default)]
    types: Vec<String>,
}

/// Token/span format used for GLiNER-style NER training:
/// `{"tokenized_text": [..], "ner": [[start, end, label], ..]}` with inclusive
/// token offsets and lowercased labels.
pub struct SpanFormatter;

impl ExampleFormatter for SpanFormatter {
    fn format(&self, entity: &Value) -> Result<Value, FormatError> {
        let example = Example::deserialize(entity)?;
        let tokens = tokenize(&example.text);
        let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

        let mut ner = Vec::new();
        for mention in &example.entities {
            let needle: Vec<String> = tokenize(&mention.entity).iter().map(|t| t.to_lowercase()).collect();
            if needle.is_empty() || needle.len() > lowered.len() {
                continue;
            }
            for start in 0..=lowered.len() - needle.len() {
                if lowered[start..start + needle.len()] == needle[..] {
                    let end = start + needle.len() - 1;
                    for label in &mention.types {
                        ner.push(json!([start, end, label.to_lowercase()]));
                    }
                }
            }
        }

        Ok(json!({ "tokenized_text": tokens, "ner": ner }))
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\w+(?:[-_]\w+)*|\S").unwrap());
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_keeps_hyphenated_words() {
        assert_eq!(tokenize("E-211, a food-grade salt."), ["E-211", ",", "a", "food-grade", "salt", "."]);
    }

    #[test]
    fn spans_cover_every_match_and_type() {
        let record = json!({
            "text": "Sodium benzoate (E211) is a preservative. Sodium benzoate dissolves in water.",
            "entities": [
                {"entity": "sodium benzoate", "types": ["Additive", "Preservative"]},
                {"entity": "E211", "types": ["E number"]},
                {"entity": "not present", "types": ["x"]}
            ]
        });
        let out = SpanFormatter.format(&record).unwrap();
        let ner = out["ner"].as_array().unwrap();

        assert_eq!(out["tokenized_text"][0], "Sodium");
        assert!(ner.contains(&json!([0, 1, "additive"])));
        assert!(ner.contains(&json!([0, 1, "preservative"])));
        assert!(ner.contains(&json!([3, 3, "e number"])));
        assert!(ner.contains(&json!([9, 10, "additive"])));
        assert_eq!(ner.len(), 5);
    }

    #[test]
    fn record_without_text_is_rejected() {
        assert!(SpanFormatter.format(&json!({"entities": []})).is_err());
    }
}
