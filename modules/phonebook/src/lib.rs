//! # Phonebook
//!
//! Provider/client pair exposing one remote operation, `compute_sum`, backed
//! by a pluggable backend chosen by name at provider startup.
//!
//! ## Server side
//!
//! ```rust,ignore
//! let engine = Engine::builder().listen("127.0.0.1:0").build()?;
//! let provider = Provider::new(
//!     &engine,
//!     42,
//!     r#"{ "phonebook": { "type": "dummy", "config": {} } }"#,
//!     None,
//! )?;
//! ```
//!
//! ## Client side
//!
//! ```rust,ignore
//! let client = Client::new(&engine);
//! let handle = client.make_phonebook_handle("tcp://127.0.0.1:7120", 42, true)?;
//! assert_eq!(handle.compute_sum(42, 51)?.wait()?, 93);
//! ```
//!
//! ## Backends
//!
//! Implement [`PhonebookBackend`] and [`BackendType`], then register the type
//! with [`register_backend!`]. The process-wide [`BackendRegistry`] collects
//! every registration linked into the binary.

// Re-export inventory for `register_backend!`
pub use inventory;

pub mod backend;
pub mod config;
pub mod dummy;
pub mod error;
pub mod registry;
pub mod result;

mod client;
mod future;
mod handle;
mod provider;

pub use backend::{BackendType, BoundBackend, PhonebookBackend};
pub use client::Client;
pub use config::{PhonebookSection, ProviderConfig};
pub use dummy::DummyPhonebook;
pub use error::PhonebookError;
pub use future::PhonebookFuture;
pub use handle::PhonebookHandle;
pub use provider::{Provider, COMPUTE_SUM_RPC, NO_BACKEND_ERROR, PHONEBOOK_IDENTITY};
pub use registry::{BackendRegistry, BackendRegistryBuilder, RegistryError};
pub use result::PhonebookResult;

// Engine types that appear in this crate's public API
pub use phonebook_engine::{Engine, EngineBuilder, EngineError, Pool};
