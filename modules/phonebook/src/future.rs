use std::marker::PhantomData;

use phonebook_engine::{AsyncResponse, EngineError};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PhonebookError;
use crate::result::PhonebookResult;

/// Pending answer of a phonebook operation. Waiting consumes it.
#[must_use = "a PhonebookFuture does nothing unless waited on"]
#[derive(Debug)]
pub struct PhonebookFuture<T> {
    response: AsyncResponse,
    _value: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PhonebookFuture<T> {
    pub(crate) fn new(response: AsyncResponse) -> Self {
        Self {
            response,
            _value: PhantomData,
        }
    }

    /// Block until the provider answers.
    ///
    /// Transport failures, including those that happened when the call was
    /// issued, surface here. A failed envelope becomes [`PhonebookError::Remote`].
    /// Must not be called from an async context; use [`wait_async`](Self::wait_async).
    pub fn wait(self) -> Result<T, PhonebookError> {
        settle(self.response.wait()?)
    }

    pub async fn wait_async(self) -> Result<T, PhonebookError> {
        settle(self.response.wait_async().await?)
    }
}

fn settle<T: DeserializeOwned>(body: Value) -> Result<T, PhonebookError> {
    let result: PhonebookResult<T> = serde_json::from_value(body).map_err(EngineError::Decode)?;
    match result.into_result() {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(PhonebookError::MissingValue),
        Err(message) => Err(PhonebookError::Remote(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_yields_the_value() {
        let value: i32 = settle(json!({ "success": true, "value": 93 })).unwrap();
        assert_eq!(value, 93);
    }

    #[test]
    fn failure_carries_the_envelope_error() {
        let err = settle::<i32>(json!({ "success": false, "error": "Provider has no phonebook attached" }))
            .unwrap_err();
        assert_eq!(err.to_string(), "Provider has no phonebook attached");
    }

    #[test]
    fn success_without_value_is_reported() {
        assert!(matches!(
            settle::<i32>(json!({ "success": true })),
            Err(PhonebookError::MissingValue)
        ));
    }

    #[test]
    fn non_envelope_body_is_a_decode_error() {
        assert!(matches!(
            settle::<i32>(json!("surprise")),
            Err(PhonebookError::Engine(EngineError::Decode(_)))
        ));
    }
}
