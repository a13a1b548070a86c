use std::sync::Arc;

use phonebook_engine::{Engine, ProviderHandle, RemoteProcedure};
use tracing::debug;

use crate::error::PhonebookError;
use crate::handle::PhonebookHandle;
use crate::provider::{COMPUTE_SUM_RPC, PHONEBOOK_IDENTITY};

struct ClientInner {
    engine: Engine,
    compute_sum: RemoteProcedure,
}

/// Client side entry point. Cheap to clone; handles keep their client alive.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(engine: &Engine) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                engine: engine.clone(),
                compute_sum: engine.remote_procedure(COMPUTE_SUM_RPC),
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Build a handle to provider `provider_id` at `address`.
    ///
    /// With `check_identity` the remote provider must report the phonebook
    /// identity; any failure while asking counts as a mismatch.
    pub fn make_phonebook_handle(
        &self,
        address: &str,
        provider_id: u16,
        check_identity: bool,
    ) -> Result<PhonebookHandle, PhonebookError> {
        let endpoint =
            self.inner
                .engine
                .lookup(address)
                .map_err(|source| PhonebookError::Resolution {
                    address: address.to_string(),
                    source,
                })?;
        let target = ProviderHandle::new(endpoint, provider_id);

        if check_identity {
            match target.get_identity() {
                Ok(identity) if identity == PHONEBOOK_IDENTITY => {}
                Ok(identity) => {
                    debug!(address, provider_id, %identity, "identity mismatch");
                    return Err(PhonebookError::NotAPhonebookProvider {
                        address: address.to_string(),
                        provider_id,
                        source: None,
                    });
                }
                Err(e) => {
                    debug!(address, provider_id, error = %e, "identity check failed");
                    return Err(PhonebookError::NotAPhonebookProvider {
                        address: address.to_string(),
                        provider_id,
                        source: Some(e),
                    });
                }
            }
        }

        Ok(PhonebookHandle::new(self.clone(), target))
    }

    /// Client configuration; the client keeps no state worth exporting.
    pub fn get_config(&self) -> String {
        "{}".to_string()
    }

    pub(crate) fn compute_sum_rpc(&self) -> &RemoteProcedure {
        &self.inner.compute_sum
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.inner.engine)
            .finish()
    }
}
