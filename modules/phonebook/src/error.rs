use phonebook_engine::EngineError;
use thiserror::Error;

/// Client-facing errors.
#[derive(Debug, Error)]
pub enum PhonebookError {
    #[error("invalid phonebook handle")]
    InvalidHandle,

    #[error("could not resolve address '{address}'")]
    Resolution {
        address: String,
        #[source]
        source: EngineError,
    },

    #[error("provider {provider_id} at '{address}' is not a phonebook provider")]
    NotAPhonebookProvider {
        address: String,
        provider_id: u16,
        #[source]
        source: Option<EngineError>,
    },

    /// Failure reported by the remote provider inside the result envelope.
    #[error("{0}")]
    Remote(String),

    #[error("provider answered successfully but returned no value")]
    MissingValue,

    #[error(transparent)]
    Engine(#[from] EngineError),
}
