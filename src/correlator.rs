//! JSON-RPC request correlation
//!
//! Many callers share one duplex transport. Each call gets a fresh UUID
//! and a one-shot result slot in the pending registry; a single reader
//! task matches inbound responses to slots by id, whatever order they
//! arrive in. When the transport ends every waiting caller is woken with
//! [`Error::TransportClosed`] and the registry stops accepting calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::transport::{MessageStream, Transport};
use crate::{Error, Result};

type Slot = oneshot::Sender<Result<JsonRpcResponse>>;

/// Calls awaiting their response
#[derive(Default)]
struct Registry {
    pending: HashMap<String, Slot>,
    /// Set once the transport is gone; no further registrations
    closed: Option<String>,
}

#[derive(Default)]
struct Shared {
    registry: Mutex<Registry>,
}

impl Shared {
    fn register(&self, id: &str) -> Result<oneshot::Receiver<Result<JsonRpcResponse>>> {
        let mut registry = self.registry.lock();
        if let Some(reason) = &registry.closed {
            return Err(Error::TransportClosed(reason.clone()));
        }
        let (tx, rx) = oneshot::channel();
        registry.pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    fn remove(&self, id: &str) {
        self.registry.lock().pending.remove(id);
    }

    fn deliver(&self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_ref().map(RequestId::to_string) else {
            debug!("Dropping response without id");
            return;
        };

        let slot = self.registry.lock().pending.remove(&id);
        match slot {
            Some(tx) => {
                if tx.send(Ok(response)).is_err() {
                    debug!(id = %id, "Caller gone before its response arrived");
                }
            }
            None => debug!(id = %id, "Dropping response for unknown request"),
        }
    }

    /// Close the registry and fail every waiting call; returns how many were woken
    fn sweep(&self, reason: &str) -> usize {
        let drained: Vec<Slot> = {
            let mut registry = self.registry.lock();
            if registry.closed.is_none() {
                registry.closed = Some(reason.to_string());
            }
            registry.pending.drain().map(|(_, tx)| tx).collect()
        };

        let woken = drained.len();
        for tx in drained {
            let _ = tx.send(Err(Error::TransportClosed(reason.to_string())));
        }
        woken
    }

    fn pending(&self) -> usize {
        self.registry.lock().pending.len()
    }
}

/// Removes a call's registry entry however the call ends
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.remove(self.id);
    }
}

/// Routes JSON-RPC responses back to the exact caller waiting for them
pub struct RequestCorrelator {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    default_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RequestCorrelator {
    /// Take the transport's inbound stream and start the reader task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Result<Self> {
        let stream = transport.receive()?;
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&shared), transport.kind()));

        Ok(Self {
            transport,
            shared,
            default_timeout,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// The underlying transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Calls currently waiting for a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending()
    }

    /// Call `method` with the default timeout
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Call `method`, giving up after `timeout`
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.call_cancellable(method, params, timeout, &CancellationToken::new())
            .await
    }

    /// Call `method`, giving up after `timeout` or when `cancel` fires
    ///
    /// A JSON-RPC error object in the response becomes [`Error::Protocol`].
    pub async fn call_cancellable(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let rx = self.shared.register(&id)?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id: &id,
        };

        let request = JsonRpcRequest::new(RequestId::String(id.clone()), method, params);
        let frame = serde_json::to_string(&request)?;
        debug!(id = %id, method = %method, "Sending request");

        let exchange = async {
            self.transport.send(frame).await?;
            rx.await
                .map_err(|_| Error::TransportClosed("response reader stopped".to_string()))?
        };

        let response = tokio::select! {
            result = exchange => result?,
            () = cancel.cancelled() => {
                debug!(id = %id, method = %method, "Request canceled");
                return Err(Error::Canceled(format!("{method} ({id})")));
            }
            () = tokio::time::sleep(timeout) => {
                warn!(id = %id, method = %method, ?timeout, "Request timed out");
                return Err(Error::Timeout(format!("no response to {method} within {timeout:?}")));
            }
        };

        debug!(id = %id, method = %method, is_error = response.error.is_some(), "Received response");
        response.into_result()
    }

    /// Send a notification (no id, no response)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let closed = self.shared.registry.lock().closed.clone();
        if let Some(reason) = closed {
            return Err(Error::TransportClosed(reason));
        }
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        debug!(method = %method, "Sending notification");
        self.transport.send(frame).await
    }

    /// Close the transport and fail anything still waiting
    ///
    /// Returns [`Error::TransportClosed`] if calls were still in flight.
    pub async fn close(&self) -> Result<()> {
        let in_flight = self.shared.pending();
        let closed = self.transport.close().await;
        self.shared.sweep("agent closed");
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        closed?;

        if in_flight > 0 {
            return Err(Error::TransportClosed(format!(
                "closed with {in_flight} call(s) still pending"
            )));
        }
        Ok(())
    }
}

impl Drop for RequestCorrelator {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

/// The one consumer of inbound frames
async fn read_loop(mut stream: MessageStream, shared: Arc<Shared>, kind: &'static str) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(frame)) => dispatch(&shared, &frame),
            Some(Err(e)) => break e.to_string(),
            None => break format!("{kind} peer closed the connection"),
        }
    };

    let woken = shared.sweep(&reason);
    info!(transport = kind, reason = %reason, woken, "Response reader stopped");
}

fn dispatch(shared: &Shared, frame: &str) {
    let frame = frame.trim();
    if frame.is_empty() {
        return;
    }
    debug!(frame = %frame, "Inbound frame");

    match serde_json::from_str::<JsonRpcMessage>(frame) {
        Ok(JsonRpcMessage::Response(response)) => shared.deliver(response),
        Ok(message) => {
            debug!(method = ?message.method(), "Ignoring peer-initiated message");
        }
        Err(e) => warn!(error = %e, "Skipping unparsable frame"),
    }
}
