use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{EngineError, EngineResult};
use crate::wire::{Outcome, RequestFrame, ResponseFrame};

struct Reply {
    seq: u64,
    tx: UnboundedSender<ResponseFrame>,
}

/// An inbound call delivered to a registered handler.
///
/// Answer it with [`Request::respond`]. A request dropped without an answer
/// sends a transport error so the caller never waits forever.
pub struct Request {
    provider_id: u16,
    rpc: String,
    payload: Value,
    reply: Option<Reply>,
}

impl Request {
    pub(crate) fn new(frame: RequestFrame, tx: UnboundedSender<ResponseFrame>) -> Self {
        Self {
            provider_id: frame.provider_id,
            rpc: frame.rpc,
            payload: frame.payload,
            reply: Some(Reply { seq: frame.seq, tx }),
        }
    }

    pub fn provider_id(&self) -> u16 {
        self.provider_id
    }

    pub fn rpc(&self) -> &str {
        &self.rpc
    }

    /// Decode the call arguments.
    pub fn args<T: DeserializeOwned>(&self) -> EngineResult<T> {
        T::deserialize(&self.payload).map_err(EngineError::Decode)
    }

    pub fn respond<T: Serialize + ?Sized>(mut self, value: &T) -> EngineResult<()> {
        let body = serde_json::to_value(value).map_err(EngineError::Encode)?;
        self.send(Outcome::Ok(body))
    }

    /// Answer with a transport-level error.
    pub fn fail(mut self, message: impl Into<String>) -> EngineResult<()> {
        self.send(Outcome::Err(message.into()))
    }

    fn send(&mut self, outcome: Outcome) -> EngineResult<()> {
        let reply = self.reply.take().ok_or(EngineError::AlreadyResponded)?;
        reply
            .tx
            .send(ResponseFrame {
                seq: reply.seq,
                outcome,
            })
            .map_err(|_| EngineError::ConnectionClosed)
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if self.reply.is_some() {
            tracing::warn!(
                rpc = %self.rpc,
                provider_id = self.provider_id,
                "request dropped without a response"
            );
            let message = format!("rpc '{}' finished without responding", self.rpc);
            let _ = self.send(Outcome::Err(message));
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("provider_id", &self.provider_id)
            .field("rpc", &self.rpc)
            .field("answered", &self.reply.is_none())
            .finish()
    }
}

/// Scoped response: holds a request together with the value to answer it
/// with, and sends that value when dropped, whichever way the scope is left.
pub struct AutoRespond<T: Serialize> {
    request: Request,
    slot: T,
}

impl<T: Serialize> AutoRespond<T> {
    pub fn new(request: Request, initial: T) -> Self {
        Self {
            request,
            slot: initial,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Replace the value that will be sent.
    pub fn set(&mut self, value: T) {
        self.slot = value;
    }

    pub fn slot_mut(&mut self) -> &mut T {
        &mut self.slot
    }
}

impl<T: Serialize> Drop for AutoRespond<T> {
    fn drop(&mut self) {
        let outcome = match serde_json::to_value(&self.slot) {
            Ok(body) => Outcome::Ok(body),
            Err(e) => Outcome::Err(format!("failed to encode response: {e}")),
        };
        if let Err(e) = self.request.send(outcome) {
            tracing::debug!(rpc = %self.request.rpc, error = %e, "response not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn request(payload: Value) -> (Request, mpsc::UnboundedReceiver<ResponseFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let frame = RequestFrame {
            seq: 11,
            provider_id: 4,
            rpc: "add".to_string(),
            payload,
        };
        (Request::new(frame, tx), rx)
    }

    #[test]
    fn respond_sends_one_frame() {
        let (req, mut rx) = request(json!([1, 2]));
        let (a, b): (i32, i32) = req.args().unwrap();
        req.respond(&(a + b)).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.seq, 11);
        assert_eq!(frame.outcome, Outcome::Ok(json!(3)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_request_reports_an_error() {
        let (req, mut rx) = request(Value::Null);
        drop(req);

        match rx.try_recv().unwrap().outcome {
            Outcome::Err(msg) => assert!(msg.contains("add")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn bad_arguments_are_a_decode_error() {
        let (req, _rx) = request(json!("not a pair"));
        let err = req.args::<(i32, i32)>().unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn auto_respond_sends_the_last_value_on_every_exit_path() {
        let (req, mut rx) = request(Value::Null);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut guard = AutoRespond::new(req, "initial");
            guard.set("updated");
            panic!("handler blew up");
        }));
        assert!(outcome.is_err());

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.outcome, Outcome::Ok(json!("updated")));
        assert!(rx.try_recv().is_err());
    }
}
