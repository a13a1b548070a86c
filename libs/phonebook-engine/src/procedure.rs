use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::connection::{self, AsyncResponse, Connection, Connections};
use crate::endpoint::Endpoint;
use crate::error::{EngineError, EngineResult};
use crate::wire::IDENTITY_RPC;

/// Connection state shared by every clone of one [`Address`].
struct Link {
    current: Mutex<Arc<Connection>>,
    connections: Connections,
    runtime: Handle,
}

impl Link {
    fn connection(&self) -> Arc<Connection> {
        self.current.lock().clone()
    }

    /// Resolve again and swap in a live connection from the engine cache.
    async fn reconnect(&self, endpoint: &Endpoint) -> EngineResult<Arc<Connection>> {
        let peer = endpoint.resolve().await?;
        let conn = connection::open_cached(peer, &self.connections).await?;
        *self.current.lock() = conn.clone();
        tracing::debug!(address = %endpoint, %peer, "reconnected");
        Ok(conn)
    }
}

/// A resolved peer together with its live connection.
///
/// When the peer closes the connection, the next call through this address
/// re-resolves the endpoint and reconnects on the engine runtime.
#[derive(Clone)]
pub struct Address {
    endpoint: Endpoint,
    link: Arc<Link>,
}

impl Address {
    pub(crate) fn new(
        endpoint: Endpoint,
        connection: Arc<Connection>,
        connections: Connections,
        runtime: Handle,
    ) -> Self {
        Self {
            endpoint,
            link: Arc::new(Link {
                current: Mutex::new(connection),
                connections,
                runtime,
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn peer(&self) -> SocketAddr {
        self.link.connection().peer()
    }

    /// `false` once the current connection has been closed by either side.
    pub fn is_connected(&self) -> bool {
        !self.link.connection().is_closed()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("endpoint", &self.endpoint.uri)
            .field("peer", &self.peer())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.endpoint, f)
    }
}

/// Reference to one provider behind an address.
#[derive(Clone, Debug)]
pub struct ProviderHandle {
    address: Address,
    provider_id: u16,
}

impl ProviderHandle {
    pub fn new(address: Address, provider_id: u16) -> Self {
        Self {
            address,
            provider_id,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn provider_id(&self) -> u16 {
        self.provider_id
    }

    /// Ask the remote engine which kind of provider is registered under this id.
    pub fn get_identity(&self) -> EngineResult<String> {
        match self.call(IDENTITY_RPC, Value::Null).wait()? {
            Value::String(identity) => Ok(identity),
            other => Err(EngineError::Remote(format!(
                "unexpected identity payload: {other}"
            ))),
        }
    }

    fn call(&self, rpc: &str, payload: Value) -> AsyncResponse {
        let link = &self.address.link;
        let current = link.connection();
        if !current.is_closed() {
            return current.call(self.provider_id, rpc, payload);
        }

        let (tx, rx) = oneshot::channel();
        let link = link.clone();
        let endpoint = self.address.endpoint.clone();
        let provider_id = self.provider_id;
        let rpc = rpc.to_string();
        let runtime = link.runtime.clone();
        // Dropped unrun once the runtime is shut down, which fails the waiter.
        drop(runtime.spawn(async move {
            let result = match link.reconnect(&endpoint).await {
                Ok(conn) => conn.call(provider_id, &rpc, payload).wait_async().await,
                Err(e) => Err(e),
            };
            let _ = tx.send(result);
        }));
        AsyncResponse::deferred(rx)
    }
}

/// Client-side descriptor of a named remote operation.
#[derive(Clone, Debug)]
pub struct RemoteProcedure {
    name: Arc<str>,
}

impl RemoteProcedure {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issue the call and return immediately. Encoding and connection
    /// failures are reported when the response is waited on.
    pub fn call_async<A>(&self, target: &ProviderHandle, args: &A) -> AsyncResponse
    where
        A: Serialize + ?Sized,
    {
        match serde_json::to_value(args) {
            Ok(payload) => target.call(&self.name, payload),
            Err(e) => AsyncResponse::failed(EngineError::Encode(e)),
        }
    }
}
