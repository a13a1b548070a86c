//! Engine: owns the runtime, the listener, outbound connections, the RPC and
//! identity tables and the finalize hooks.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::connection::{self, Connections};
use crate::endpoint::Endpoint;
use crate::error::{EngineError, EngineResult};
use crate::pool::Pool;
use crate::procedure::{Address, RemoteProcedure};
use crate::request::Request;
use crate::wire::{self, Outcome, RequestFrame, ResponseFrame, IDENTITY_RPC};

type Handler = Arc<dyn Fn(Request) + Send + Sync>;
type FinalizeHook = Box<dyn FnOnce() + Send>;

/// Token returned by [`Engine::push_finalize_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizeHookId(u64);

struct RpcEntry {
    pool: Pool,
    handler: Handler,
}

/// Tables read by the serving tasks.
#[derive(Default)]
struct Shared {
    rpcs: DashMap<(u16, String), RpcEntry>,
    identities: DashMap<u16, String>,
}

/// Builder for [`Engine`].
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    listen: Option<String>,
    worker_threads: Option<usize>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve requests on `address` (`tcp://host:port` or `host:port`, port 0 picks one).
    pub fn listen(mut self, address: impl Into<String>) -> Self {
        self.listen = Some(address.into());
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    /// Start the runtime and, in server mode, the listener.
    ///
    /// Must be called from synchronous code.
    pub fn build(self) -> EngineResult<Engine> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("phonebook-engine");
        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder.build().map_err(EngineError::Runtime)?;

        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();

        let listen_addr = match self.listen.as_deref() {
            Some(address) => {
                let listener = runtime.block_on(bind(address))?;
                let local = listener
                    .local_addr()
                    .map_err(|source| EngineError::Bind {
                        address: address.to_string(),
                        source,
                    })?;
                tracing::info!(address = %local, "engine listening");
                runtime.spawn(serve(listener, shared.clone(), shutdown.clone()));
                Some(local)
            }
            None => None,
        };

        Ok(Engine {
            inner: Arc::new(EngineInner {
                handle: runtime.handle().clone(),
                runtime: Mutex::new(Some(runtime)),
                shared,
                connections: Connections::default(),
                listen_addr,
                hooks: Mutex::new(Vec::new()),
                next_hook: AtomicU64::new(1),
                shutdown,
                finalized: AtomicBool::new(false),
            }),
        })
    }
}

struct EngineInner {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    shared: Arc<Shared>,
    connections: Connections,
    listen_addr: Option<SocketAddr>,
    hooks: Mutex<Vec<(FinalizeHookId, FinalizeHook)>>,
    next_hook: AtomicU64,
    shutdown: CancellationToken,
    finalized: AtomicBool,
}

impl EngineInner {
    fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("finalizing engine");

        let hooks = std::mem::take(&mut *self.hooks.lock());
        for (id, hook) in hooks.into_iter().rev() {
            tracing::debug!(hook = id.0, "running finalize hook");
            hook();
        }

        self.shutdown.cancel();
        for conn in self.connections.iter() {
            conn.close();
        }
        self.connections.clear();
        self.shared.rpcs.clear();
        self.shared.identities.clear();

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Transport engine shared by providers and clients.
///
/// Cloning yields another handle to the same engine. The synchronous methods
/// (`lookup`, `block_on`, and waiting on responses) must not be called from
/// inside an async context.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Address clients use to reach this engine.
    pub fn self_addr(&self) -> EngineResult<Endpoint> {
        self.inner
            .listen_addr
            .map(Endpoint::from_socket_addr)
            .ok_or(EngineError::NotListening)
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listen_addr.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finalized.load(Ordering::SeqCst)
    }

    /// Blocking pool of the engine runtime.
    pub fn default_pool(&self) -> Pool {
        Pool::from_handle(self.inner.handle.clone())
    }

    /// Run `future` to completion on the engine runtime.
    pub fn block_on<F: Future>(&self, future: F) -> EngineResult<F::Output> {
        self.ensure_live()?;
        Ok(self.inner.handle.block_on(future))
    }

    /// Resolve `address` and return a connected [`Address`].
    pub fn lookup(&self, address: &str) -> EngineResult<Address> {
        self.block_on(self.lookup_async(address))?
    }

    pub async fn lookup_async(&self, address: &str) -> EngineResult<Address> {
        self.ensure_live()?;
        let endpoint = Endpoint::parse(address)?;
        let connections = self.inner.connections.clone();
        let runtime = self.inner.handle.clone();
        // Connection tasks belong on the engine runtime, whoever is awaiting.
        self.inner
            .handle
            .spawn(connect(endpoint, connections, runtime))
            .await
            .map_err(|_| EngineError::Finalized)?
    }

    pub fn register_provider(&self, provider_id: u16, identity: &str) -> EngineResult<()> {
        self.ensure_live()?;
        match self.inner.shared.identities.entry(provider_id) {
            Entry::Occupied(_) => Err(EngineError::ProviderIdInUse(provider_id)),
            Entry::Vacant(slot) => {
                slot.insert(identity.to_string());
                tracing::debug!(provider_id, identity, "provider registered");
                Ok(())
            }
        }
    }

    /// Remove the identity and every rpc of `provider_id`.
    pub fn deregister_provider(&self, provider_id: u16) -> bool {
        let removed = self.inner.shared.identities.remove(&provider_id).is_some();
        self.inner
            .shared
            .rpcs
            .retain(|(owner, _), _| *owner != provider_id);
        if removed {
            tracing::debug!(provider_id, "provider deregistered");
        }
        removed
    }

    pub fn register_rpc<F>(
        &self,
        name: &str,
        provider_id: u16,
        pool: Pool,
        handler: F,
    ) -> EngineResult<()>
    where
        F: Fn(Request) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        match self.inner.shared.rpcs.entry((provider_id, name.to_string())) {
            Entry::Occupied(_) => Err(EngineError::RpcAlreadyRegistered {
                name: name.to_string(),
                provider_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(RpcEntry {
                    pool,
                    handler: Arc::new(handler),
                });
                tracing::debug!(rpc = name, provider_id, "rpc registered");
                Ok(())
            }
        }
    }

    pub fn remote_procedure(&self, name: &str) -> RemoteProcedure {
        RemoteProcedure::new(name)
    }

    /// Register `hook` to run during [`Engine::finalize`]. Hooks run in
    /// reverse registration order. On an already finalized engine the hook
    /// runs immediately.
    pub fn push_finalize_callback<F>(&self, hook: F) -> FinalizeHookId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = FinalizeHookId(self.inner.next_hook.fetch_add(1, Ordering::Relaxed));
        let mut hooks = self.inner.hooks.lock();
        if self.is_finalized() {
            drop(hooks);
            hook();
        } else {
            hooks.push((id, Box::new(hook)));
        }
        id
    }

    /// Remove a hook without running it. Returns `false` if it already ran or was removed.
    pub fn pop_finalize_callback(&self, id: FinalizeHookId) -> bool {
        let removed = {
            let mut hooks = self.inner.hooks.lock();
            let position = hooks.iter().position(|(hook_id, _)| *hook_id == id);
            position.map(|pos| hooks.remove(pos))
        };
        removed.is_some()
    }

    /// Run finalize hooks, stop serving, fail outstanding calls and shut the
    /// runtime down. Safe to call more than once.
    pub fn finalize(&self) {
        self.inner.finalize();
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.is_finalized() {
            Err(EngineError::Finalized)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("listen_addr", &self.inner.listen_addr)
            .field("providers", &self.inner.shared.identities.len())
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

async fn bind(address: &str) -> EngineResult<TcpListener> {
    let addr = Endpoint::parse(address)?.resolve().await?;
    TcpListener::bind(addr)
        .await
        .map_err(|source| EngineError::Bind {
            address: address.to_string(),
            source,
        })
}

async fn connect(
    endpoint: Endpoint,
    connections: Connections,
    runtime: Handle,
) -> EngineResult<Address> {
    let peer = endpoint.resolve().await?;
    let conn = connection::open_cached(peer, &connections).await?;
    Ok(Address::new(endpoint, conn, connections, runtime))
}

async fn serve(listener: TcpListener, shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        tokio::spawn(serve_connection(stream, peer, shared.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
    tracing::debug!("listener stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "could not disable nagle");
    }
    let (read, write) = stream.into_split();
    let mut frames = FramedRead::new(read, wire::codec());
    let (tx, rx) = mpsc::unbounded_channel();
    // The writer outlives this loop while handlers still hold reply senders.
    tokio::spawn(write_frames(write, rx, peer));

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(bytes)) => match wire::decode::<RequestFrame>(&bytes) {
                Ok(frame) => dispatch(&shared, frame, &tx),
                Err(e) => reject(&bytes, e, peer, &tx),
            },
            Some(Err(e)) => {
                tracing::warn!(%peer, error = %e, "read failed");
                break;
            }
            None => break,
        }
    }
    tracing::debug!(%peer, "connection closed");
}

async fn write_frames(
    write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ResponseFrame>,
    peer: SocketAddr,
) {
    let mut sink = FramedWrite::new(write, wire::codec());
    while let Some(frame) = rx.recv().await {
        let bytes = match wire::encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(%peer, seq = frame.seq, error = %e, "failed to encode response");
                continue;
            }
        };
        if let Err(e) = sink.send(bytes).await {
            tracing::debug!(%peer, error = %e, "peer went away");
            break;
        }
    }
}

/// Answer an undecodable request when its `seq` can be read. Without one
/// the frame is dropped and the caller waits until the connection closes.
fn reject(
    bytes: &[u8],
    error: EngineError,
    peer: SocketAddr,
    tx: &mpsc::UnboundedSender<ResponseFrame>,
) {
    match wire::salvage_seq(bytes) {
        Some(seq) => {
            tracing::warn!(%peer, seq, error = %error, "rejecting malformed request");
            let _ = tx.send(ResponseFrame {
                seq,
                outcome: Outcome::Err(format!("malformed request: {error}")),
            });
        }
        None => tracing::warn!(%peer, error = %error, "dropping undecodable request"),
    }
}

fn dispatch(shared: &Shared, frame: RequestFrame, tx: &mpsc::UnboundedSender<ResponseFrame>) {
    if frame.rpc == IDENTITY_RPC {
        let outcome = match shared.identities.get(&frame.provider_id) {
            Some(identity) => Outcome::Ok(Value::String(identity.clone())),
            None => Outcome::Err(format!("no provider with id {}", frame.provider_id)),
        };
        let _ = tx.send(ResponseFrame {
            seq: frame.seq,
            outcome,
        });
        return;
    }

    let entry = shared
        .rpcs
        .get(&(frame.provider_id, frame.rpc.clone()))
        .map(|entry| (entry.pool.clone(), entry.handler.clone()));
    let Some((pool, handler)) = entry else {
        tracing::debug!(rpc = %frame.rpc, provider_id = frame.provider_id, "unknown rpc");
        let _ = tx.send(ResponseFrame {
            seq: frame.seq,
            outcome: Outcome::Err(format!(
                "no rpc '{}' registered for provider {}",
                frame.rpc, frame.provider_id
            )),
        });
        return;
    };

    let request = Request::new(frame, tx.clone());
    pool.spawn(move || handler(request));
}
