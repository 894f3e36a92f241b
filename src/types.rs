use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::LISTINGS_KEY;

/// One extracted record: field name to value, in insertion order.
pub type Record = serde_json::Map<String, Value>;

/// Token counters reported by the generative-text API for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The shape of an extraction payload, resolved once when the response arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedData {
    /// A list of records, either under a single wrapping key or as a bare array.
    Listings(Vec<Record>),
    /// A single mapping that does not wrap a list.
    Single(Record),
    /// The response was not a JSON object or array.
    Unparsed(String),
}

impl ExtractedData {
    /// Resolves raw response text into a variant.
    ///
    /// A mapping with a `listings` array, or with exactly one key holding an array,
    /// becomes `Listings`; a bare array becomes `Listings`; any other mapping becomes
    /// `Single`. Text that does not parse, or parses to a scalar, is kept as `Unparsed`.
    pub fn from_json_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::from_value(value).unwrap_or_else(|| Self::Unparsed(text.to_string())),
            Err(_) => Self::Unparsed(text.to_string()),
        }
    }

    /// Resolves an already parsed value, or `None` when it is a scalar.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::Listings(records_from(items))),
            Value::Object(mut map) => {
                let wrapped_key = if matches!(map.get(LISTINGS_KEY), Some(Value::Array(_))) {
                    Some(LISTINGS_KEY.to_string())
                } else if map.len() == 1 {
                    map.iter()
                        .find(|(_, v)| v.is_array())
                        .map(|(k, _)| k.clone())
                } else {
                    None
                };

                match wrapped_key.and_then(|key| map.remove(&key)) {
                    Some(Value::Array(items)) => Some(Self::Listings(records_from(items))),
                    _ => Some(Self::Single(map)),
                }
            }
            _ => None,
        }
    }

    /// The records held by this payload; `Unparsed` holds none.
    pub fn records(&self) -> Vec<Record> {
        match self {
            Self::Listings(records) => records.clone(),
            Self::Single(record) => vec![record.clone()],
            Self::Unparsed(_) => Vec::new(),
        }
    }

    /// The payload as JSON, with listings wrapped back under `listings`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Listings(records) => {
                let rows = records.iter().cloned().map(Value::Object).collect();
                let mut map = Record::new();
                map.insert(LISTINGS_KEY.to_string(), Value::Array(rows));
                Value::Object(map)
            }
            Self::Single(record) => Value::Object(record.clone()),
            Self::Unparsed(text) => Value::String(text.clone()),
        }
    }
}

/// Non-object array items become single-column records so nothing is dropped silently;
/// the schema check reports them.
fn records_from(items: Vec<Value>) -> Vec<Record> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => map,
            other => {
                let mut map = Record::new();
                map.insert("value".to_string(), other);
                map
            }
        })
        .collect()
}

/// The outcome of one extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    /// The verbatim response text.
    pub raw_json: String,
    pub data: ExtractedData,
    pub usage: TokenUsage,
    /// Whether the page text was cut to fit the token budget.
    pub truncated: bool,
}

/// Everything one successfully processed URL contributed to a run.
#[derive(Debug, Clone)]
pub struct UrlResult {
    /// 1-based position of the URL in the batch.
    pub index: usize,
    pub url: String,
    pub raw_path: PathBuf,
    pub json_path: PathBuf,
    /// Absent when the records could not be laid out as a table.
    pub xlsx_path: Option<PathBuf>,
    pub extraction: ExtractionResult,
}

/// A URL whose processing failed; it contributes no extraction result.
#[derive(Debug, Clone)]
pub struct SkippedUrl {
    pub index: usize,
    pub url: String,
    pub reason: String,
}

/// The accumulated output of one batch.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub output_dir: PathBuf,
    pub results: Vec<UrlResult>,
    pub skipped: Vec<SkippedUrl>,
}

impl RunOutput {
    /// Total token usage over every successful extraction.
    pub fn total_usage(&self) -> TokenUsage {
        self.results
            .iter()
            .fold(TokenUsage::default(), |acc, r| TokenUsage {
                input_tokens: acc.input_tokens + r.extraction.usage.input_tokens,
                output_tokens: acc.output_tokens + r.extraction.usage.output_tokens,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_listings_wrapper_is_unwrapped() {
        let data = ExtractedData::from_json_text(r#"{"listings":[{"title":"A"},{"title":"B"}]}"#);

        match data {
            ExtractedData::Listings(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[1]["title"], "B");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_single_key_array_is_treated_as_rows() {
        let data = ExtractedData::from_json_text(r#"{"items":[{"name":"x"}]}"#);
        assert_eq!(data.records().len(), 1);
        assert!(matches!(data, ExtractedData::Listings(_)));
    }

    #[test]
    fn test_bare_array_and_plain_mapping() {
        let list = ExtractedData::from_json_text(r#"[{"a":"1"},{"a":"2"}]"#);
        assert_eq!(list.records().len(), 2);

        let single = ExtractedData::from_json_text(r#"{"a":"1","b":"2"}"#);
        assert!(matches!(single, ExtractedData::Single(_)));
        assert_eq!(single.records().len(), 1);
    }

    #[test]
    fn test_non_json_is_unparsed() {
        let data = ExtractedData::from_json_text("Sorry, I can't help with that");
        assert!(matches!(data, ExtractedData::Unparsed(_)));
        assert!(data.records().is_empty());

        assert!(matches!(ExtractedData::from_json_text("42"), ExtractedData::Unparsed(_)));
    }

    #[test]
    fn test_to_value_rewraps_listings() {
        let data = ExtractedData::from_json_text(r#"[{"title":"A"}]"#);
        assert_eq!(data.to_value(), json!({"listings": [{"title": "A"}]}));
    }

    #[test]
    fn test_total_usage() {
        let extraction = |i, o| ExtractionResult {
            raw_json: "{}".to_string(),
            data: ExtractedData::Single(Record::new()),
            usage: TokenUsage { input_tokens: i, output_tokens: o },
            truncated: false,
        };
        let result = |index, e| UrlResult {
            index,
            url: format!("https://example.com/{}", index),
            raw_path: PathBuf::new(),
            json_path: PathBuf::new(),
            xlsx_path: None,
            extraction: e,
        };
        let output = RunOutput {
            output_dir: PathBuf::from("out"),
            results: vec![result(1, extraction(10, 3)), result(2, extraction(5, 2))],
            skipped: Vec::new(),
        };

        assert_eq!(output.total_usage(), TokenUsage { input_tokens: 15, output_tokens: 5 });
    }
}
