//! Client side of a peer connection: request issuing and response matching.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::wire::{self, Outcome, RequestFrame, ResponseFrame};

/// Calls waiting for their response, keyed by sequence number.
#[derive(Default)]
struct Inflight {
    pending: DashMap<u64, oneshot::Sender<Outcome>>,
    closed: AtomicBool,
}

impl Inflight {
    /// Dropping the senders wakes every waiter with `ConnectionClosed`.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Owned by the reader task; closes the connection however the task ends,
/// including when the runtime drops it during shutdown.
struct CloseOnDrop(Arc<Inflight>);

impl CloseOnDrop {
    fn complete(&self, frame: ResponseFrame) -> bool {
        match self.0.pending.remove(&frame.seq) {
            Some((_, waiter)) => {
                let _ = waiter.send(frame.outcome);
                true
            }
            None => false,
        }
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Outbound connections shared by every lookup on one engine, keyed by peer.
pub(crate) type Connections = Arc<DashMap<SocketAddr, Arc<Connection>>>;

/// Cached live connection to `peer`, opening a new one when missing or closed.
pub(crate) async fn open_cached(
    peer: SocketAddr,
    connections: &Connections,
) -> EngineResult<Arc<Connection>> {
    let cached = connections.get(&peer).map(|conn| conn.value().clone());
    if let Some(conn) = cached.filter(|conn| !conn.is_closed()) {
        return Ok(conn);
    }

    let conn = Connection::open(peer).await?;
    connections.insert(peer, conn.clone());
    debug!(%peer, "connected");
    Ok(conn)
}

pub(crate) struct Connection {
    peer: SocketAddr,
    next_seq: AtomicU64,
    inflight: Arc<Inflight>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Connection {
    /// Connect to `peer` and start the reader and writer tasks on the current runtime.
    pub(crate) async fn open(peer: SocketAddr) -> EngineResult<Arc<Self>> {
        let stream = TcpStream::connect(peer)
            .await
            .map_err(|source| EngineError::Connect {
                address: peer.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "could not disable nagle");
        }

        let (read, write) = stream.into_split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Bytes>();
        let inflight = Arc::new(Inflight::default());

        tokio::spawn(async move {
            let mut sink = FramedWrite::new(write, wire::codec());
            while let Some(frame) = queue.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(%peer, error = %e, "write failed, dropping outbound queue");
                    break;
                }
            }
        });

        let guard = CloseOnDrop(inflight.clone());
        tokio::spawn(async move {
            let mut frames = FramedRead::new(read, wire::codec());
            while let Some(next) = frames.next().await {
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(%peer, error = %e, "read failed");
                        break;
                    }
                };
                match wire::decode::<ResponseFrame>(&bytes) {
                    Ok(frame) => {
                        let seq = frame.seq;
                        if !guard.complete(frame) {
                            debug!(%peer, seq, "response for unknown call");
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "undecodable response frame"),
                }
            }
            debug!(%peer, "connection closed by peer");
        });

        Ok(Arc::new(Self {
            peer,
            next_seq: AtomicU64::new(1),
            inflight,
            outbound,
        }))
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inflight.is_closed()
    }

    pub(crate) fn close(&self) {
        self.inflight.close();
    }

    /// Send one call without waiting. Failures are carried by the returned response.
    pub(crate) fn call(&self, provider_id: u16, rpc: &str, payload: Value) -> AsyncResponse {
        if self.is_closed() {
            return AsyncResponse::failed(EngineError::ConnectionClosed);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = RequestFrame {
            seq,
            provider_id,
            rpc: rpc.to_string(),
            payload,
        };
        let bytes = match wire::encode(&frame) {
            Ok(bytes) => bytes,
            Err(e) => return AsyncResponse::failed(e),
        };

        let (tx, rx) = oneshot::channel();
        self.inflight.pending.insert(seq, tx);
        // Re-check after inserting: a concurrent close may have missed this entry.
        if self.is_closed() || self.outbound.send(bytes).is_err() {
            self.inflight.pending.remove(&seq);
            return AsyncResponse::failed(EngineError::ConnectionClosed);
        }
        AsyncResponse::pending(rx)
    }
}

enum State {
    Pending(oneshot::Receiver<Outcome>),
    // Issued by a task that first has to reconnect.
    Deferred(oneshot::Receiver<EngineResult<Value>>),
    Failed(EngineError),
}

/// Response to a call issued without blocking. Waiting consumes it.
pub struct AsyncResponse {
    state: State,
}

impl AsyncResponse {
    fn pending(rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            state: State::Pending(rx),
        }
    }

    pub(crate) fn deferred(rx: oneshot::Receiver<EngineResult<Value>>) -> Self {
        Self {
            state: State::Deferred(rx),
        }
    }

    pub(crate) fn failed(error: EngineError) -> Self {
        Self {
            state: State::Failed(error),
        }
    }

    /// Block the calling thread until the response arrives.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async execution context; use
    /// [`AsyncResponse::wait_async`] there.
    pub fn wait(self) -> EngineResult<Value> {
        match self.state {
            State::Pending(rx) => settle(rx.blocking_recv()),
            State::Deferred(rx) => rx.blocking_recv().unwrap_or(Err(EngineError::ConnectionClosed)),
            State::Failed(e) => Err(e),
        }
    }

    pub async fn wait_async(self) -> EngineResult<Value> {
        match self.state {
            State::Pending(rx) => settle(rx.await),
            State::Deferred(rx) => rx.await.unwrap_or(Err(EngineError::ConnectionClosed)),
            State::Failed(e) => Err(e),
        }
    }

    /// Wait and decode the response body.
    pub fn wait_as<T: DeserializeOwned>(self) -> EngineResult<T> {
        let body = self.wait()?;
        serde_json::from_value(body).map_err(EngineError::Decode)
    }
}

impl std::fmt::Debug for AsyncResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Pending(_) | State::Deferred(_) => "pending",
            State::Failed(_) => "failed",
        };
        f.debug_struct("AsyncResponse")
            .field("state", &state)
            .finish()
    }
}

fn settle(received: Result<Outcome, oneshot::error::RecvError>) -> EngineResult<Value> {
    match received {
        Ok(Outcome::Ok(body)) => Ok(body),
        Ok(Outcome::Err(message)) => Err(EngineError::Remote(message)),
        Err(_) => Err(EngineError::ConnectionClosed),
    }
}
