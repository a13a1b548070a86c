//! Reference backend: keeps its configuration and adds.

use phonebook_engine::Engine;
use serde_json::Value;

use crate::backend::{BackendType, PhonebookBackend};
use crate::result::PhonebookResult;

crate::register_backend!("dummy", DummyPhonebook);

#[derive(Debug, Clone)]
pub struct DummyPhonebook {
    config: Value,
}

impl PhonebookBackend for DummyPhonebook {
    fn config(&self) -> String {
        self.config.to_string()
    }

    /// Wraps on overflow.
    fn compute_sum(&self, x: i32, y: i32) -> PhonebookResult<i32> {
        PhonebookResult::ok(x.wrapping_add(y))
    }

    fn destroy(&self) -> PhonebookResult<bool> {
        PhonebookResult::ok(true)
    }
}

impl BackendType for DummyPhonebook {
    fn create(_engine: &Engine, config: &Value) -> anyhow::Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    fn open(_engine: &Engine, config: &Value) -> anyhow::Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dummy(config: Value) -> DummyPhonebook {
        let engine = Engine::builder().worker_threads(1).build().unwrap();
        DummyPhonebook::create(&engine, &config).unwrap()
    }

    #[test]
    fn adds() {
        let backend = dummy(json!({}));
        for (x, y) in [(42, 51), (-7, 7), (0, 0), (i32::MIN, 1)] {
            let result = backend.compute_sum(x, y);
            assert!(result.success);
            assert_eq!(result.value, Some(x + y));
        }
    }

    #[test]
    fn overflow_wraps() {
        let backend = dummy(json!({}));
        assert_eq!(backend.compute_sum(i32::MAX, 1).value, Some(i32::MIN));
        assert_eq!(backend.compute_sum(i32::MIN, -1).value, Some(i32::MAX));
    }

    #[test]
    fn config_is_echoed_back() {
        let backend = dummy(json!({ "name": "alice", "nested": { "n": 1 } }));
        let exported: Value = serde_json::from_str(&backend.config()).unwrap();
        assert_eq!(exported, json!({ "name": "alice", "nested": { "n": 1 } }));
    }

    #[test]
    fn destroy_succeeds() {
        assert_eq!(dummy(json!({})).destroy().value, Some(true));
    }
}
