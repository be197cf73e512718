use crate::{
    message::{ProtocolError, Request, RequestId},
    pending::{PendingCalls, PendingGuard},
    router::ResponseRouter,
};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    io,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

/// Hands encoded messages to the other side.
///
/// `send` returns once the payload has been handed off, not when it has been
/// answered. Implementations serialize concurrent sends themselves.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        payload: String,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, io::Result<()>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout used by [`Client::call`].
    #[serde(rename = "default_timeout_ms", with = "millis")]
    pub default_timeout: Duration,
    /// Longest reply a stream transport reads before skipping the line.
    pub max_message_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_message_bytes: crate::net::DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    pub fn max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("{method} timed out after {elapsed:?}")]
    Timeout { method: String, elapsed: Duration },

    #[error("{method} was cancelled")]
    Cancelled { method: String },

    #[error("response {id} to {method} has neither result nor error")]
    MalformedResponse { method: String, id: RequestId },

    #[error("encoding params for {method}: {source}")]
    Encode {
        method: String,
        source: serde_json::Error,
    },

    #[error("decoding result of {method}: {source}")]
    Decode {
        method: String,
        source: serde_json::Error,
    },

    #[error("connection closed before {method} was answered")]
    Closed { method: String },
}

/// Issues calls over a [`Transport`] and matches the replies to them.
///
/// Replies are not read by the client itself: whatever receives data from
/// the transport feeds it to [`Client::router`]. Calls may be issued
/// concurrently; each waits only for the response carrying its own id.
pub struct Client {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingCalls>,
    router: ResponseRouter,
    next_id: AtomicI64,
    config: ClientConfig,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::build(transport, None)
    }

    /// Like [`Client::new`], also returning the error responses the server
    /// sends without an id.
    pub fn with_unsolicited_errors(
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<ProtocolError>) {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        (Self::build(transport, Some(error_tx)), error_rx)
    }

    fn build(
        transport: Arc<dyn Transport>,
        unsolicited: Option<mpsc::UnboundedSender<ProtocolError>>,
    ) -> Self {
        let pending = Arc::new(PendingCalls::default());
        let router = ResponseRouter::new(pending.clone(), unsolicited);
        Self {
            transport,
            pending,
            router,
            next_id: AtomicI64::new(0),
            config: ClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn router(&self) -> ResponseRouter {
        self.router.clone()
    }

    /// Shorthand for `self.router().on_data_received(raw)`.
    pub fn on_data_received(&self, raw: &str) {
        self.router.on_data_received(raw)
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Fails every in-flight call with [`CallError::Closed`] and refuses new ones.
    pub fn close(&self) {
        self.pending.close();
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let cancel = CancellationToken::new();
        self.call_with(method, params, self.config.default_timeout, &cancel)
            .await
    }

    /// Calls `method` and waits for its response, at most `timeout`, giving
    /// up early when `cancel` fires.
    ///
    /// `params` is sent as is when it serializes to an array or object,
    /// omitted when it serializes to `null`, and wrapped in a one-element
    /// array otherwise.
    pub async fn call_with<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let params = encode_params(method, params)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::call(method, params, RequestId::Number(id));
        let payload = serde_json::to_string(&request).map_err(|source| CallError::Encode {
            method: method.to_owned(),
            source,
        })?;

        let response_rx = self.pending.insert(id).ok_or_else(|| CallError::Closed {
            method: method.to_owned(),
        })?;
        let _guard = PendingGuard::new(&self.pending, id);
        let deadline = started + timeout;

        tracing::trace!(payload = %payload, "Sending JSON-RPC message");
        // The deadline covers the send too; a transport may block on backpressure.
        tokio::select! {
            biased;
            sent = self.transport.send(payload, cancel) => sent?,
            _ = cancel.cancelled() => return Err(cancelled(id, method)),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out(id, method, started)),
        }

        let response = tokio::select! {
            biased;
            response = response_rx => response.map_err(|_| CallError::Closed {
                method: method.to_owned(),
            })?,
            _ = cancel.cancelled() => return Err(cancelled(id, method)),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out(id, method, started)),
        };

        let id = response.id.clone().unwrap_or(RequestId::Number(id));
        match response.into_outcome() {
            Some(Ok(result)) => serde_json::from_value(result).map_err(|source| CallError::Decode {
                method: method.to_owned(),
                source,
            }),
            Some(Err(error)) => Err(CallError::Protocol(error)),
            None => Err(CallError::MalformedResponse {
                method: method.to_owned(),
                id,
            }),
        }
    }

    /// Sends a notification. Returns once the transport has taken it.
    pub async fn notify<P>(&self, method: &str, params: P) -> Result<(), CallError>
    where
        P: Serialize,
    {
        let params = encode_params(method, params)?;
        let request = Request::notification(method, params);
        let payload = serde_json::to_string(&request).map_err(|source| CallError::Encode {
            method: method.to_owned(),
            source,
        })?;
        tracing::trace!(payload = %payload, "Sending JSON-RPC message");
        self.transport.send(payload, &CancellationToken::new()).await?;
        Ok(())
    }
}

fn cancelled(id: i64, method: &str) -> CallError {
    tracing::debug!(id, method, "call cancelled");
    CallError::Cancelled {
        method: method.to_owned(),
    }
}

fn timed_out(id: i64, method: &str, started: Instant) -> CallError {
    let elapsed = started.elapsed();
    tracing::debug!(id, method, ?elapsed, "call timed out");
    CallError::Timeout {
        method: method.to_owned(),
        elapsed,
    }
}

fn encode_params<P: Serialize>(method: &str, params: P) -> Result<Option<Value>, CallError> {
    let value = serde_json::to_value(params).map_err(|source| CallError::Encode {
        method: method.to_owned(),
        source,
    })?;
    Ok(match value {
        Value::Null => None,
        structured @ (Value::Array(_) | Value::Object(_)) => Some(structured),
        scalar => Some(Value::Array(vec![scalar])),
    })
}
