//! Backend contract and the static registration hook used by backend crates.

use std::fmt;

use phonebook_engine::Engine;
use serde_json::Value;

use crate::result::PhonebookResult;

/// Storage and logic behind a phonebook provider.
///
/// Implementations are shared between handler threads and must tolerate
/// concurrent calls. Failures are reported through the returned envelope.
pub trait PhonebookBackend: Send + Sync {
    /// JSON snapshot from which [`BackendType::open`] can rebuild equivalent state.
    fn config(&self) -> String;

    fn compute_sum(&self, x: i32, y: i32) -> PhonebookResult<i32>;

    /// Release persistent resources. Called once, when the owning provider is torn down.
    ///
    /// Teardown does not wait for running calls: a `compute_sum` that
    /// already started may still be executing while and after `destroy` runs.
    fn destroy(&self) -> PhonebookResult<bool>;
}

/// Constructors a backend exposes to the registry.
pub trait BackendType: PhonebookBackend + Sized + 'static {
    /// Build a fresh backend from its configuration.
    fn create(engine: &Engine, config: &Value) -> anyhow::Result<Self>;

    /// Attach to state that already exists outside the process.
    fn open(engine: &Engine, config: &Value) -> anyhow::Result<Self>;
}

pub type BackendFactory = fn(&Engine, &Value) -> anyhow::Result<Box<dyn PhonebookBackend>>;

/// Entry submitted through [`register_backend!`](crate::register_backend).
#[derive(Clone, Copy)]
pub struct BackendRegistration {
    pub name: &'static str,
    pub create: BackendFactory,
    pub open: BackendFactory,
}

impl BackendRegistration {
    pub const fn of<B: BackendType>(name: &'static str) -> Self {
        Self {
            name,
            create: create_boxed::<B>,
            open: open_boxed::<B>,
        }
    }
}

impl fmt::Debug for BackendRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

inventory::collect!(BackendRegistration);

fn create_boxed<B: BackendType>(
    engine: &Engine,
    config: &Value,
) -> anyhow::Result<Box<dyn PhonebookBackend>> {
    Ok(Box::new(B::create(engine, config)?))
}

fn open_boxed<B: BackendType>(
    engine: &Engine,
    config: &Value,
) -> anyhow::Result<Box<dyn PhonebookBackend>> {
    Ok(Box::new(B::open(engine, config)?))
}

/// Register a [`BackendType`] under a name for the process-wide registry.
///
/// ```rust,ignore
/// phonebook::register_backend!("dummy", DummyPhonebook);
/// ```
#[macro_export]
macro_rules! register_backend {
    ($name:literal, $backend:ty) => {
        $crate::inventory::submit! {
            $crate::backend::BackendRegistration::of::<$backend>($name)
        }
    };
}

/// A backend instance tagged with the type name it was created under.
pub struct BoundBackend {
    name: String,
    inner: Box<dyn PhonebookBackend>,
}

impl BoundBackend {
    pub fn new(name: impl Into<String>, inner: Box<dyn PhonebookBackend>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> String {
        self.inner.config()
    }

    pub fn compute_sum(&self, x: i32, y: i32) -> PhonebookResult<i32> {
        self.inner.compute_sum(x, y)
    }

    pub fn destroy(&self) -> PhonebookResult<bool> {
        self.inner.destroy()
    }
}

impl fmt::Debug for BoundBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundBackend")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
