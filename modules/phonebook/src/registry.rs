use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use phonebook_engine::Engine;
use serde_json::Value;
use thiserror::Error;

use crate::backend::{BackendFactory, BackendRegistration, BackendType, BoundBackend};

/// Name -> factory table for phonebook backends.
///
/// Built once and read-only afterwards. The process-wide instance comes from
/// [`BackendRegistry::global`]; tests and embedders can assemble their own
/// through [`BackendRegistry::builder`].
pub struct BackendRegistry {
    factories: HashMap<&'static str, BackendRegistration>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

static GLOBAL: OnceLock<Arc<BackendRegistry>> = OnceLock::new();

impl BackendRegistry {
    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::default()
    }

    /// Collect every `register_backend!` submission linked into the binary.
    pub fn discover() -> Result<Self, RegistryError> {
        let mut b = BackendRegistryBuilder::default();
        for registration in ::inventory::iter::<BackendRegistration> {
            b.register_entry(*registration);
        }
        b.build()
    }

    /// Process-wide registry, discovered on first use. Duplicate names keep
    /// the first registration and are logged.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                let mut b = BackendRegistryBuilder::default();
                for registration in ::inventory::iter::<BackendRegistration> {
                    b.register_entry(*registration);
                }
                for error in &b.errors {
                    tracing::error!(%error, "ignoring backend registration");
                }
                let registry = BackendRegistry {
                    factories: b.factories,
                };
                tracing::debug!(backends = ?registry.names(), "backend registry ready");
                Arc::new(registry)
            })
            .clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Build a new backend of type `name`. `Ok(None)` when the name is unknown.
    pub fn create_backend(
        &self,
        name: &str,
        engine: &Engine,
        config: &Value,
    ) -> Result<Option<BoundBackend>, RegistryError> {
        let Some(registration) = self.factories.get(name) else {
            return Ok(None);
        };
        instantiate(registration.name, registration.create, engine, config)
            .map(Some)
            .map_err(|source| RegistryError::Create {
                backend: name.to_string(),
                source,
            })
    }

    /// Attach to an existing backend of type `name`. `Ok(None)` when the name is unknown.
    pub fn open_backend(
        &self,
        name: &str,
        engine: &Engine,
        config: &Value,
    ) -> Result<Option<BoundBackend>, RegistryError> {
        let Some(registration) = self.factories.get(name) else {
            return Ok(None);
        };
        instantiate(registration.name, registration.open, engine, config)
            .map(Some)
            .map_err(|source| RegistryError::Open {
                backend: name.to_string(),
                source,
            })
    }
}

fn instantiate(
    name: &'static str,
    factory: BackendFactory,
    engine: &Engine,
    config: &Value,
) -> anyhow::Result<BoundBackend> {
    let backend = catch_unwind(AssertUnwindSafe(|| factory(engine, config)))
        .map_err(|_| anyhow::anyhow!("backend factory panicked"))??;
    Ok(BoundBackend::new(name, backend))
}

/// Collects registrations; duplicate names are reported by [`build`](Self::build).
#[derive(Default)]
pub struct BackendRegistryBuilder {
    factories: HashMap<&'static str, BackendRegistration>,
    errors: Vec<String>,
}

impl BackendRegistryBuilder {
    pub fn register(
        &mut self,
        name: &'static str,
        create: BackendFactory,
        open: BackendFactory,
    ) -> &mut Self {
        self.register_entry(BackendRegistration { name, create, open })
    }

    pub fn register_type<B: BackendType>(&mut self, name: &'static str) -> &mut Self {
        self.register_entry(BackendRegistration::of::<B>(name))
    }

    fn register_entry(&mut self, registration: BackendRegistration) -> &mut Self {
        if self.factories.contains_key(registration.name) {
            self.errors.push(format!(
                "Backend type '{}' is already registered",
                registration.name
            ));
            return self;
        }
        self.factories.insert(registration.name, registration);
        self
    }

    pub fn build(self) -> Result<BackendRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }
        Ok(BackendRegistry {
            factories: self.factories,
        })
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to create phonebook of type '{backend}': {source:#}")]
    Create {
        backend: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to open phonebook of type '{backend}': {source:#}")]
    Open {
        backend: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid backend registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PhonebookBackend;
    use crate::result::PhonebookResult;
    use serde_json::json;

    /* --------------------------- Test helpers ------------------------- */

    struct Fixed(i32);

    impl PhonebookBackend for Fixed {
        fn config(&self) -> String {
            json!({ "value": self.0 }).to_string()
        }
        fn compute_sum(&self, _x: i32, _y: i32) -> PhonebookResult<i32> {
            PhonebookResult::ok(self.0)
        }
        fn destroy(&self) -> PhonebookResult<bool> {
            PhonebookResult::ok(true)
        }
    }

    impl BackendType for Fixed {
        fn create(_engine: &Engine, config: &Value) -> anyhow::Result<Self> {
            let value = config
                .get("value")
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow::anyhow!("missing 'value'"))?;
            Ok(Fixed(i32::try_from(value)?))
        }
        fn open(_engine: &Engine, _config: &Value) -> anyhow::Result<Self> {
            Ok(Fixed(-1))
        }
    }

    fn panicking(_engine: &Engine, _config: &Value) -> anyhow::Result<Box<dyn PhonebookBackend>> {
        panic!("factory exploded")
    }

    fn engine() -> Engine {
        Engine::builder().worker_threads(1).build().unwrap()
    }

    /* ------------------------------- Tests ---------------------------- */

    #[test]
    fn unknown_name_yields_none() {
        let registry = BackendRegistry::builder().build().unwrap();
        let engine = engine();
        assert!(registry
            .create_backend("unknown-type", &engine, &json!({}))
            .unwrap()
            .is_none());
        assert!(registry
            .open_backend("unknown-type", &engine, &json!({}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut b = BackendRegistry::builder();
        b.register_type::<Fixed>("fixed");
        b.register_type::<Fixed>("fixed");

        match b.build().unwrap_err() {
            RegistryError::InvalidRegistryConfiguration { errors } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("fixed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn create_and_open_use_their_own_factory() {
        let mut b = BackendRegistry::builder();
        b.register_type::<Fixed>("fixed");
        let registry = b.build().unwrap();
        let engine = engine();

        let created = registry
            .create_backend("fixed", &engine, &json!({ "value": 9 }))
            .unwrap()
            .unwrap();
        assert_eq!(created.name(), "fixed");
        assert_eq!(created.compute_sum(0, 0).value, Some(9));

        let opened = registry
            .open_backend("fixed", &engine, &json!({}))
            .unwrap()
            .unwrap();
        assert_eq!(opened.compute_sum(0, 0).value, Some(-1));
    }

    #[test]
    fn factory_errors_are_returned() {
        let mut b = BackendRegistry::builder();
        b.register_type::<Fixed>("fixed");
        let registry = b.build().unwrap();

        let err = registry
            .create_backend("fixed", &engine(), &json!({}))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Create { ref backend, .. } if backend == "fixed"));
        assert!(err.to_string().contains("missing 'value'"));
    }

    #[test]
    fn factory_panics_become_errors() {
        let mut b = BackendRegistry::builder();
        b.register("panicky", panicking, panicking);
        let registry = b.build().unwrap();

        let err = registry
            .create_backend("panicky", &engine(), &json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn discovered_registry_contains_dummy() {
        let registry = BackendRegistry::discover().unwrap();
        assert!(registry.contains("dummy"));
        assert!(BackendRegistry::global().contains("dummy"));
        assert!(registry.names().contains(&"dummy"));
    }
}
