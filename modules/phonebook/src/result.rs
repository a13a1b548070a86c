//! Success/error/value envelope returned by every phonebook operation.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Outcome of a phonebook operation, as exchanged on the wire:
/// `{ "success": bool, "error"?: string, "value"?: T }`.
///
/// `success == false` implies `error` is set; a successful result may carry
/// no value (e.g. `destroy` on some backends).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhonebookResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
}

impl<T> PhonebookResult<T> {
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            error: None,
            value: Some(value),
        }
    }

    /// Successful result without a payload.
    pub fn empty() -> Self {
        Self {
            success: true,
            error: None,
            value: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Collapse into a plain `Result`. A success without value yields `Ok(None)`.
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.value)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "operation failed without an error message".to_string()))
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for PhonebookResult<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_omits_error_field() {
        let encoded = serde_json::to_value(PhonebookResult::ok(93)).unwrap();
        assert_eq!(encoded, json!({ "success": true, "value": 93 }));
    }

    #[test]
    fn failure_omits_value_field() {
        let encoded =
            serde_json::to_value(PhonebookResult::<i32>::failure("Provider has no phonebook attached"))
                .unwrap();
        assert_eq!(
            encoded,
            json!({ "success": false, "error": "Provider has no phonebook attached" })
        );
    }

    #[test]
    fn missing_optional_fields_decode_as_none() {
        let decoded: PhonebookResult<bool> = serde_json::from_value(json!({ "success": true })).unwrap();
        assert_eq!(decoded, PhonebookResult::empty());
        assert_eq!(decoded.into_result(), Ok(None));
    }

    #[test]
    fn values_without_default_decode() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Entry {
            name: String,
        }

        let decoded: PhonebookResult<Entry> =
            serde_json::from_value(json!({ "success": true, "value": { "name": "ada" } })).unwrap();
        assert_eq!(decoded.value, Some(Entry { name: "ada".into() }));

        let missing: PhonebookResult<Entry> =
            serde_json::from_value(json!({ "success": false, "error": "gone" })).unwrap();
        assert!(missing.value.is_none());
    }

    #[test]
    fn failure_without_message_still_reports_an_error() {
        let bare = PhonebookResult::<i32> {
            success: false,
            error: None,
            value: None,
        };
        assert!(bare.into_result().is_err());
    }

    #[test]
    fn converts_from_std_result() {
        let failed: PhonebookResult<i32> = Err::<i32, _>("bad input").into();
        assert!(!failed.is_success());
        assert_eq!(failed.error.as_deref(), Some("bad input"));

        let ok: PhonebookResult<i32> = Ok::<_, String>(5).into();
        assert_eq!(ok.into_result(), Ok(Some(5)));
    }
}
