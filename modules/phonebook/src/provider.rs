//! Server side: a provider owns one backend and answers `yp_compute_sum`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use phonebook_engine::{AutoRespond, Engine, EngineError, FinalizeHookId, Pool, Request};
use serde_json::Value;
use tracing::{debug, error, instrument, trace, warn};

use crate::backend::BoundBackend;
use crate::config::ProviderConfig;
use crate::registry::BackendRegistry;
use crate::result::PhonebookResult;

/// Identity tag every phonebook provider registers with the engine.
pub const PHONEBOOK_IDENTITY: &str = "YP";

/// Name of the one remote operation.
pub const COMPUTE_SUM_RPC: &str = "yp_compute_sum";

pub const NO_BACKEND_ERROR: &str = "Provider has no phonebook attached";

const ALREADY_ATTACHED_ERROR: &str = "Provider already has a phonebook attached";
const FINALIZED_ERROR: &str = "Provider has been finalized";

#[derive(Clone, Copy)]
enum Attach {
    Create,
    Open,
}

/// Everything that must be torn down together, exactly once.
struct ProviderState {
    engine: Engine,
    provider_id: u16,
    registry: Arc<BackendRegistry>,
    backend: ArcSwapOption<BoundBackend>,
    attach_lock: Mutex<()>,
}

impl ProviderState {
    fn bootstrap(&self, config: &str) {
        match ProviderConfig::parse(config) {
            Err(e) => {
                error!(provider_id = self.provider_id, error = %e, "could not parse provider configuration");
            }
            Ok(ProviderConfig { phonebook: None }) => {
                debug!(provider_id = self.provider_id, "no phonebook configured");
            }
            Ok(ProviderConfig {
                phonebook: Some(section),
            }) => {
                // Failures are logged by attach; the provider keeps serving without a backend.
                let _ = self.attach(&section.kind, &section.config, Attach::Create);
            }
        }
    }

    fn attach(&self, kind: &str, config: &Value, mode: Attach) -> PhonebookResult<bool> {
        let _guard = self.attach_lock.lock();
        if self.backend.load().is_some() {
            warn!(provider_id = self.provider_id, backend = kind, "phonebook already attached");
            return PhonebookResult::failure(ALREADY_ATTACHED_ERROR);
        }

        let bound = match mode {
            Attach::Create => self.registry.create_backend(kind, &self.engine, config),
            Attach::Open => self.registry.open_backend(kind, &self.engine, config),
        };
        match bound {
            Ok(Some(backend)) => {
                self.backend.store(Some(Arc::new(backend)));
                debug!(provider_id = self.provider_id, backend = kind, "phonebook attached");
                PhonebookResult::ok(true)
            }
            Ok(None) => {
                error!(provider_id = self.provider_id, backend = kind, "unknown phonebook type");
                PhonebookResult::failure(format!("Unknown phonebook type {kind}"))
            }
            Err(e) => {
                error!(provider_id = self.provider_id, backend = kind, error = %e, "error when creating phonebook");
                PhonebookResult::failure(e.to_string())
            }
        }
    }

    fn get_config(&self) -> String {
        let Some(backend) = self.backend.load_full() else {
            return ProviderConfig::default().to_string();
        };
        let config = backend.config();
        let config = serde_json::from_str(&config).unwrap_or_else(|e| {
            warn!(
                provider_id = self.provider_id,
                backend = backend.name(),
                error = %e,
                "backend exported unparsable configuration, using {{}}"
            );
            Value::Object(Default::default())
        });
        ProviderConfig::with_backend(backend.name(), config).to_string()
    }
}

impl Drop for ProviderState {
    fn drop(&mut self) {
        trace!(provider_id = self.provider_id, "deregistering provider");
        self.engine.deregister_provider(self.provider_id);
        if let Some(backend) = self.backend.swap(None) {
            let result = backend.destroy();
            match result.into_result() {
                Ok(_) => debug!(provider_id = self.provider_id, backend = backend.name(), "phonebook destroyed"),
                Err(e) => warn!(provider_id = self.provider_id, backend = backend.name(), error = %e, "phonebook destroy failed"),
            }
        }
    }
}

/// Phonebook provider bound to one engine and provider id.
///
/// Teardown (deregistration and backend `destroy`) happens once, either when
/// the provider is dropped or when the engine is finalized, whichever comes first.
pub struct Provider {
    engine: Engine,
    provider_id: u16,
    slot: Arc<Mutex<Option<Arc<ProviderState>>>>,
    hook: FinalizeHookId,
}

impl Provider {
    /// Register a provider using the process-wide backend registry.
    ///
    /// `config` is the JSON bootstrap document. A missing or invalid backend
    /// section is not an error: the provider starts without a backend.
    pub fn new(
        engine: &Engine,
        provider_id: u16,
        config: &str,
        pool: Option<Pool>,
    ) -> Result<Self, EngineError> {
        Self::with_registry(engine, provider_id, config, pool, BackendRegistry::global())
    }

    pub fn with_registry(
        engine: &Engine,
        provider_id: u16,
        config: &str,
        pool: Option<Pool>,
        registry: Arc<BackendRegistry>,
    ) -> Result<Self, EngineError> {
        engine.register_provider(provider_id, PHONEBOOK_IDENTITY)?;
        let state = Arc::new(ProviderState {
            engine: engine.clone(),
            provider_id,
            registry,
            backend: ArcSwapOption::empty(),
            attach_lock: Mutex::new(()),
        });

        let pool = pool.unwrap_or_else(|| engine.default_pool());
        let handler_state = Arc::downgrade(&state);
        // On failure dropping `state` undoes the provider registration.
        engine.register_rpc(COMPUTE_SUM_RPC, provider_id, pool, move |request| {
            compute_sum_rpc(&handler_state, request)
        })?;
        trace!(provider_id, "registered provider");

        state.bootstrap(config);

        let slot = Arc::new(Mutex::new(Some(state)));
        let finalize_slot = slot.clone();
        let hook = engine.push_finalize_callback(move || {
            let state = finalize_slot.lock().take();
            drop(state);
        });

        Ok(Self {
            engine: engine.clone(),
            provider_id,
            slot,
            hook,
        })
    }

    pub fn provider_id(&self) -> u16 {
        self.provider_id
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// `false` once the engine has been finalized and the provider torn down.
    pub fn is_valid(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn has_backend(&self) -> bool {
        self.backend_name().is_some()
    }

    pub fn backend_name(&self) -> Option<String> {
        let state = self.state()?;
        let backend = state.backend.load_full()?;
        Some(backend.name().to_string())
    }

    /// Current configuration in bootstrap form; `{}` without a backend.
    pub fn get_config(&self) -> String {
        match self.state() {
            Some(state) => state.get_config(),
            None => ProviderConfig::default().to_string(),
        }
    }

    /// Create a backend of type `kind` and bind it, if none is bound yet.
    pub fn attach_phonebook(&self, kind: &str, config: &Value) -> PhonebookResult<bool> {
        match self.state() {
            Some(state) => state.attach(kind, config, Attach::Create),
            None => PhonebookResult::failure(FINALIZED_ERROR),
        }
    }

    /// Bind an existing backend of type `kind`, if none is bound yet.
    pub fn open_phonebook(&self, kind: &str, config: &Value) -> PhonebookResult<bool> {
        match self.state() {
            Some(state) => state.attach(kind, config, Attach::Open),
            None => PhonebookResult::failure(FINALIZED_ERROR),
        }
    }

    fn state(&self) -> Option<Arc<ProviderState>> {
        self.slot.lock().clone()
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        self.engine.pop_finalize_callback(self.hook);
        let state = self.slot.lock().take();
        drop(state);
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("provider_id", &self.provider_id)
            .field("backend", &self.backend_name())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[instrument(name = "yp_compute_sum", skip_all, fields(provider_id = request.provider_id()))]
fn compute_sum_rpc(state: &Weak<ProviderState>, request: Request) {
    trace!("received compute_sum request");
    let mut response = AutoRespond::new(request, PhonebookResult::<i32>::failure(NO_BACKEND_ERROR));

    let (x, y) = match response.request().args::<(i32, i32)>() {
        Ok(args) => args,
        Err(e) => {
            warn!(error = %e, "invalid compute_sum arguments");
            response.set(PhonebookResult::failure(format!("invalid arguments: {e}")));
            return;
        }
    };
    let Some(backend) = state.upgrade().and_then(|state| state.backend.load_full()) else {
        return;
    };

    let result = catch_unwind(AssertUnwindSafe(|| backend.compute_sum(x, y))).unwrap_or_else(|_| {
        error!(backend = backend.name(), "phonebook backend panicked");
        PhonebookResult::failure("phonebook backend panicked")
    });
    response.set(result);
    trace!("executed compute_sum");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendType, PhonebookBackend};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting;

    impl PhonebookBackend for Counting {
        fn config(&self) -> String {
            "not json".to_string()
        }
        fn compute_sum(&self, x: i32, y: i32) -> PhonebookResult<i32> {
            PhonebookResult::ok(x * y)
        }
        fn destroy(&self) -> PhonebookResult<bool> {
            PhonebookResult::ok(true)
        }
    }

    impl BackendType for Counting {
        fn create(_engine: &Engine, _config: &Value) -> anyhow::Result<Self> {
            Ok(Counting)
        }
        fn open(_engine: &Engine, _config: &Value) -> anyhow::Result<Self> {
            Ok(Counting)
        }
    }

    /// Bound only by the teardown test.
    static TRACKED_DESTROYS: AtomicUsize = AtomicUsize::new(0);

    struct Tracked;

    impl PhonebookBackend for Tracked {
        fn config(&self) -> String {
            "{}".to_string()
        }
        fn compute_sum(&self, x: i32, y: i32) -> PhonebookResult<i32> {
            PhonebookResult::ok(x + y)
        }
        fn destroy(&self) -> PhonebookResult<bool> {
            TRACKED_DESTROYS.fetch_add(1, Ordering::SeqCst);
            PhonebookResult::ok(true)
        }
    }

    impl BackendType for Tracked {
        fn create(_engine: &Engine, _config: &Value) -> anyhow::Result<Self> {
            Ok(Tracked)
        }
        fn open(_engine: &Engine, _config: &Value) -> anyhow::Result<Self> {
            Ok(Tracked)
        }
    }

    fn registry() -> Arc<BackendRegistry> {
        let mut b = BackendRegistry::builder();
        b.register_type::<Counting>("counting");
        b.register_type::<Tracked>("tracked");
        Arc::new(b.build().unwrap())
    }

    fn engine() -> Engine {
        Engine::builder().worker_threads(1).build().unwrap()
    }

    #[test]
    fn unknown_type_leaves_provider_without_backend() {
        let engine = engine();
        let provider = Provider::with_registry(
            &engine,
            1,
            r#"{"phonebook":{"type":"unknown-type"}}"#,
            None,
            registry(),
        )
        .unwrap();
        assert!(provider.is_valid());
        assert!(!provider.has_backend());
        assert_eq!(provider.get_config(), "{}");
    }

    #[test]
    fn attach_after_startup_and_reject_second_attach() {
        let engine = engine();
        let provider = Provider::with_registry(&engine, 2, "{}", None, registry()).unwrap();

        let unknown = provider.attach_phonebook("nope", &json!({}));
        assert_eq!(unknown.error.as_deref(), Some("Unknown phonebook type nope"));

        assert!(provider.attach_phonebook("counting", &json!({})).success);
        assert_eq!(provider.backend_name().as_deref(), Some("counting"));

        let again = provider.open_phonebook("counting", &json!({}));
        assert_eq!(again.error.as_deref(), Some(ALREADY_ATTACHED_ERROR));
    }

    #[test]
    fn unparsable_backend_config_exports_empty_object() {
        let engine = engine();
        let provider = Provider::with_registry(
            &engine,
            3,
            r#"{"phonebook":{"type":"counting"}}"#,
            None,
            registry(),
        )
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&provider.get_config()).unwrap(),
            json!({ "phonebook": { "type": "counting", "config": {} } })
        );
    }

    #[test]
    fn duplicate_provider_id_is_an_error() {
        let engine = engine();
        let _first = Provider::with_registry(&engine, 4, "{}", None, registry()).unwrap();
        let err = Provider::with_registry(&engine, 4, "{}", None, registry()).unwrap_err();
        assert!(matches!(err, EngineError::ProviderIdInUse(4)));
    }

    #[test]
    fn teardown_destroys_once_whichever_path_fires_first() {
        let engine = engine();

        let dropped_first = Provider::with_registry(
            &engine,
            5,
            r#"{"phonebook":{"type":"tracked"}}"#,
            None,
            registry(),
        )
        .unwrap();
        let moved = dropped_first;
        drop(moved);

        let finalized_first = Provider::with_registry(
            &engine,
            6,
            r#"{"phonebook":{"type":"tracked"}}"#,
            None,
            registry(),
        )
        .unwrap();
        engine.finalize();
        assert!(!finalized_first.is_valid());
        assert_eq!(finalized_first.get_config(), "{}");
        drop(finalized_first);

        assert_eq!(TRACKED_DESTROYS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_provider_frees_its_id() {
        let engine = engine();
        let provider = Provider::with_registry(&engine, 7, "{}", None, registry()).unwrap();
        drop(provider);
        Provider::with_registry(&engine, 7, "{}", None, registry()).unwrap();
    }
}
