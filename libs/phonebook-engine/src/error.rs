use std::io;

use thiserror::Error;

/// Errors raised by the engine: addressing, connection and framing failures,
/// plus transport-level rejections reported by the remote side.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build engine runtime")]
    Runtime(#[source] io::Error),

    #[error("failed to listen on '{address}'")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed address '{0}'")]
    MalformedAddress(String),

    #[error("unsupported transport scheme in '{0}', expected tcp://host:port")]
    UnsupportedScheme(String),

    #[error("could not resolve '{address}'")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to '{address}'")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("engine is running in client mode and has no listening address")]
    NotListening,

    #[error("engine has been finalized")]
    Finalized,

    #[error("provider id {0} is already registered with this engine")]
    ProviderIdInUse(u16),

    #[error("rpc '{name}' is already registered for provider {provider_id}")]
    RpcAlreadyRegistered { name: String, provider_id: u16 },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    #[error("failed to encode payload")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode payload")]
    Decode(#[source] serde_json::Error),

    #[error("request has already been answered")]
    AlreadyResponded,
}

pub type EngineResult<T> = Result<T, EngineError>;
