use std::sync::Arc;

use phonebook_engine::ProviderHandle;

use crate::client::Client;
use crate::error::PhonebookError;
use crate::future::PhonebookFuture;

struct HandleInner {
    client: Client,
    target: ProviderHandle,
}

/// Reference to one remote phonebook provider.
///
/// The default value is a null handle: every operation on it fails with
/// [`PhonebookError::InvalidHandle`] without touching the network.
#[derive(Clone, Default)]
pub struct PhonebookHandle {
    inner: Option<Arc<HandleInner>>,
}

impl PhonebookHandle {
    pub(crate) fn new(client: Client, target: ProviderHandle) -> Self {
        Self {
            inner: Some(Arc::new(HandleInner { client, target })),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn client(&self) -> Option<&Client> {
        self.inner.as_ref().map(|inner| &inner.client)
    }

    pub fn provider_id(&self) -> Option<u16> {
        self.inner.as_ref().map(|inner| inner.target.provider_id())
    }

    /// Issue `compute_sum(x, y)` without waiting for the answer.
    pub fn compute_sum(&self, x: i32, y: i32) -> Result<PhonebookFuture<i32>, PhonebookError> {
        let inner = self.inner.as_ref().ok_or(PhonebookError::InvalidHandle)?;
        let response = inner
            .client
            .compute_sum_rpc()
            .call_async(&inner.target, &(x, y));
        Ok(PhonebookFuture::new(response))
    }
}

impl std::fmt::Debug for PhonebookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("PhonebookHandle")
                .field("address", &inner.target.address().to_string())
                .field("provider_id", &inner.target.provider_id())
                .finish(),
            None => f.write_str("PhonebookHandle(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_fails_without_network() {
        let handle = PhonebookHandle::default();
        assert!(!handle.is_valid());
        assert!(handle.client().is_none());
        assert!(handle.provider_id().is_none());
        assert!(matches!(
            handle.compute_sum(1, 2),
            Err(PhonebookError::InvalidHandle)
        ));
        assert_eq!(format!("{handle:?}"), "PhonebookHandle(null)");
    }
}
