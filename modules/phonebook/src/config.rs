//! Provider bootstrap configuration:
//! `{ "phonebook": { "type": "<backend>", "config": { ... } } }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phonebook: Option<PhonebookSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonebookSection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ProviderConfig {
    /// Parse a bootstrap document.
    ///
    /// Only malformed JSON is an error. A document that is not an object, has
    /// no `phonebook` object, or no string `type` in it parses to a config
    /// without backend. A blank document is treated as `{}`.
    pub fn parse(document: &str) -> Result<Self, serde_json::Error> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        let root: Value = serde_json::from_str(document)?;

        let Some(section) = root.get("phonebook").and_then(Value::as_object) else {
            return Ok(Self::default());
        };
        let Some(kind) = section.get("type").and_then(Value::as_str) else {
            return Ok(Self::default());
        };
        let config = section.get("config").cloned().unwrap_or_else(empty_object);

        Ok(Self {
            phonebook: Some(PhonebookSection {
                kind: kind.to_string(),
                config,
            }),
        })
    }

    pub fn with_backend(kind: impl Into<String>, config: Value) -> Self {
        Self {
            phonebook: Some(PhonebookSection {
                kind: kind.into(),
                config,
            }),
        }
    }

    pub fn to_json(&self) -> Value {
        match &self.phonebook {
            Some(section) => serde_json::json!({
                "phonebook": { "type": section.kind, "config": section.config }
            }),
            None => empty_object(),
        }
    }
}

impl std::fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_document_is_parsed() {
        let cfg = ProviderConfig::parse(r#"{"phonebook":{"type":"dummy","config":{"path":"/tmp/x"}}}"#)
            .unwrap();
        let section = cfg.phonebook.unwrap();
        assert_eq!(section.kind, "dummy");
        assert_eq!(section.config, json!({ "path": "/tmp/x" }));
    }

    #[test]
    fn missing_backend_config_defaults_to_empty_object() {
        let cfg = ProviderConfig::parse(r#"{"phonebook":{"type":"dummy"}}"#).unwrap();
        assert_eq!(cfg.phonebook.unwrap().config, json!({}));
    }

    #[test]
    fn incomplete_documents_mean_no_backend() {
        for doc in [
            "{}",
            "[]",
            "42",
            "\"phonebook\"",
            r#"{"phonebook": 3}"#,
            r#"{"phonebook": {}}"#,
            r#"{"phonebook": {"type": 7}}"#,
            "",
            "  ",
        ] {
            let cfg = ProviderConfig::parse(doc).unwrap();
            assert!(cfg.phonebook.is_none(), "{doc:?} should have no backend");
        }
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ProviderConfig::parse("{ phonebook: ").is_err());
    }

    #[test]
    fn display_is_the_inverse_of_parse() {
        let cfg = ProviderConfig::with_backend("dummy", json!({ "a": [1, 2] }));
        let reparsed = ProviderConfig::parse(&cfg.to_string()).unwrap();
        assert_eq!(reparsed, cfg);

        assert_eq!(ProviderConfig::default().to_string(), "{}");
    }

    #[test]
    fn serde_layout_uses_type_key() {
        let cfg = ProviderConfig::with_backend("dummy", json!({}));
        assert_eq!(
            serde_json::to_value(&cfg).unwrap(),
            json!({ "phonebook": { "type": "dummy", "config": {} } })
        );
        let back: ProviderConfig =
            serde_json::from_value(json!({ "phonebook": { "type": "dummy" } })).unwrap();
        assert_eq!(back, cfg);
    }
}
