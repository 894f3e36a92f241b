//! Per-request record schemas built from the user's field list.

use serde_json::{json, Value};
use std::collections::HashSet;

use crate::{types::Record, Result, ScraperError, LISTINGS_KEY};

/// Every field is a required string. Built fresh for each scrape request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    fields: Vec<String>,
}

/// A list of records wrapped under `listings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSchema {
    record: RecordSchema,
}

impl RecordSchema {
    /// Builds a record schema from field names, trimming each and keeping their order.
    ///
    /// Fails when the list is empty, a name is blank, or a name repeats.
    pub fn build(field_names: &[impl AsRef<str>]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(field_names.len());

        for name in field_names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(ScraperError::InvalidInput("field names must not be blank".into()));
            }
            if !seen.insert(name.to_string()) {
                return Err(ScraperError::InvalidInput(format!("duplicate field name: {}", name)));
            }
            fields.push(name.to_string());
        }

        if fields.is_empty() {
            return Err(ScraperError::InvalidInput(
                "Please enter at least one field to extract.".into(),
            ));
        }

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The schema of a single record in the generative API's schema dialect.
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.clone(), json!({ "type": "STRING" })))
            .collect();

        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": self.fields,
            "propertyOrdering": self.fields,
        })
    }

    /// Checks that a record has exactly the schema's fields, each holding text.
    pub fn conform(&self, record: &Record) -> Result<()> {
        for field in &self.fields {
            match record.get(field) {
                Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(ScraperError::MalformedResponse(format!(
                        "field '{}' is not text: {}",
                        field, other
                    )))
                }
                None => {
                    return Err(ScraperError::MalformedResponse(format!(
                        "missing field '{}'",
                        field
                    )))
                }
            }
        }

        if let Some(extra) = record.keys().find(|k| !self.fields.contains(k)) {
            return Err(ScraperError::MalformedResponse(format!(
                "unexpected field '{}'",
                extra
            )));
        }

        Ok(())
    }
}

impl ContainerSchema {
    pub fn wrap(record: RecordSchema) -> Self {
        Self { record }
    }

    /// `{ listings: [record] }`, the contract handed to the generative API.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert(
            LISTINGS_KEY.to_string(),
            json!({ "type": "ARRAY", "items": self.record.to_json_schema() }),
        );

        json!({
            "type": "OBJECT",
            "properties": properties,
            "required": [LISTINGS_KEY],
        })
    }

    /// Checks a whole reply: an object whose only key is `listings`, holding an array
    /// of records that each conform to the record schema.
    pub fn conform(&self, reply: &Value) -> Result<()> {
        let map = reply.as_object().ok_or_else(|| {
            ScraperError::MalformedResponse(format!("reply is not an object: {}", reply))
        })?;

        if let Some(extra) = map.keys().find(|k| k.as_str() != LISTINGS_KEY) {
            return Err(ScraperError::MalformedResponse(format!(
                "unexpected key '{}' in reply",
                extra
            )));
        }

        let items = map
            .get(LISTINGS_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ScraperError::MalformedResponse(format!("reply has no '{}' array", LISTINGS_KEY))
            })?;

        items.iter().try_for_each(|item| match item.as_object() {
            Some(record) => self.record.conform(record),
            None => Err(ScraperError::MalformedResponse(format!(
                "listing is not a mapping: {}",
                item
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_build_keeps_order_and_trims() {
        let schema = RecordSchema::build(&[" title ", "price", "location"]).unwrap();
        assert_eq!(schema.fields(), ["title", "price", "location"]);
    }

    #[test]
    fn test_build_rejects_empty_blank_and_duplicates() {
        let empty: [&str; 0] = [];
        assert!(matches!(RecordSchema::build(&empty), Err(ScraperError::InvalidInput(_))));
        assert!(RecordSchema::build(&["title", "  "]).is_err());
        assert!(RecordSchema::build(&["title", "title"]).is_err());
    }

    #[test]
    fn test_container_json_schema() {
        let container = ContainerSchema::wrap(RecordSchema::build(&["title", "price"]).unwrap());
        let schema = container.to_json_schema();

        assert_eq!(schema["required"], json!(["listings"]));
        assert_eq!(schema["properties"]["listings"]["type"], "ARRAY");

        let item = &schema["properties"]["listings"]["items"];
        assert_eq!(item["required"], json!(["title", "price"]));
        assert_eq!(item["properties"]["price"]["type"], "STRING");
        assert_eq!(item["properties"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_conform() {
        let schema = RecordSchema::build(&["title", "price"]).unwrap();

        let ok = record(&[("title", json!("A")), ("price", json!("1"))]);
        assert!(schema.conform(&ok).is_ok());

        let missing = record(&[("title", json!("A"))]);
        assert!(matches!(schema.conform(&missing), Err(ScraperError::MalformedResponse(_))));

        let not_text = record(&[("title", json!("A")), ("price", json!(1))]);
        assert!(schema.conform(&not_text).is_err());

        let extra = record(&[("title", json!("A")), ("price", json!("1")), ("url", json!("x"))]);
        assert!(schema.conform(&extra).is_err());
    }

    #[test]
    fn test_container_conform_requires_listings_only() {
        let container = ContainerSchema::wrap(RecordSchema::build(&["title"]).unwrap());

        assert!(container.conform(&json!({"listings": [{"title": "A"}]})).is_ok());
        assert!(container.conform(&json!({"listings": []})).is_ok());

        let rejected = [
            json!({"listings": [{"title": "A"}], "note": "extra"}),
            json!({"items": [{"title": "A"}]}),
            json!([{"title": "A"}]),
            json!({"title": "A"}),
            json!({"listings": ["A"]}),
            json!({"listings": [{"title": "A", "price": "1"}]}),
        ];
        for reply in &rejected {
            assert!(
                matches!(container.conform(reply), Err(ScraperError::MalformedResponse(_))),
                "accepted {}",
                reply
            );
        }
    }
}
