//! # Phonebook Engine
//!
//! Transport for phonebook providers and clients: a tokio runtime, a TCP
//! listener, cached outbound connections and a table of named operations.
//!
//! ## Server side
//!
//! ```rust,ignore
//! let engine = Engine::builder().listen("127.0.0.1:0").build()?;
//! engine.register_provider(42, "YP")?;
//! engine.register_rpc("add", 42, engine.default_pool(), |req: Request| {
//!     let (x, y): (i32, i32) = req.args().unwrap_or_default();
//!     let _ = req.respond(&(x + y));
//! })?;
//! ```
//!
//! ## Client side
//!
//! ```rust,ignore
//! let target = ProviderHandle::new(engine.lookup("tcp://127.0.0.1:7120")?, 42);
//! let sum = engine.remote_procedure("add").call_async(&target, &(1, 2)).wait()?;
//! ```

pub mod endpoint;
pub mod error;
pub mod wire;

mod connection;
mod engine;
mod pool;
mod procedure;
mod request;

pub use connection::AsyncResponse;
pub use endpoint::{Endpoint, EndpointKind};
pub use engine::{Engine, EngineBuilder, FinalizeHookId};
pub use error::{EngineError, EngineResult};
pub use pool::Pool;
pub use procedure::{Address, ProviderHandle, RemoteProcedure};
pub use request::{AutoRespond, Request};
