use crate::{
    message::{ProtocolError, Request, RequestId, Response, VERSION},
    registry::{InvokeError, ProcedureDescriptor, ProcedureRegistry},
};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    str,
    sync::Arc,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Reject requests whose `jsonrpc` member is not `"2.0"`.
    pub require_version: bool,
}

impl DispatcherConfig {
    pub fn require_version(mut self, require_version: bool) -> Self {
        self.require_version = require_version;
        self
    }
}

/// Turns requests into responses using a frozen [`ProcedureRegistry`].
///
/// A dispatcher is cheap to clone and may be driven from many tasks at once.
/// Calls always get a response, including calls to procedures returning
/// nothing (`"result": null`). Notifications never get one, not even on error.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ProcedureRegistry>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(registry: impl Into<Arc<ProcedureRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }

    /// Handles one wire message, returning the wire response if one is due.
    pub async fn handle_text(&self, raw: &str) -> Option<String> {
        tracing::trace!(payload = %raw, "Received JSON-RPC message");
        let response = match decode_request(raw) {
            Ok(request) => self.handle(request).await?,
            Err(response) => response,
        };
        encode_response(&response)
    }

    /// Like [`handle_text`](Self::handle_text) for raw bytes off a transport.
    /// Bytes that are not UTF-8 get the same parse error as malformed JSON.
    pub async fn handle_bytes(&self, raw: &[u8]) -> Option<String> {
        match str::from_utf8(raw) {
            Ok(text) => self.handle_text(text).await,
            Err(err) => self.reject_unparseable(err),
        }
    }

    /// The response owed to a message that could not be read at all, such as
    /// one cut off by a size limit.
    pub fn reject_unparseable(&self, reason: impl fmt::Display) -> Option<String> {
        tracing::debug!(%reason, "rejecting unparseable message");
        let error = ProtocolError::parse_error().with_data(reason.to_string());
        encode_response(&Response::error(None, error))
    }

    pub async fn handle(&self, request: Request) -> Option<Response> {
        let id = request.id.clone();
        let method = request.method.clone();
        let outcome = self.dispatch(request).await;

        let Some(id) = id else {
            if let Err(error) = outcome {
                tracing::warn!(%method, ?error, "notification failed");
            }
            return None;
        };

        Some(match outcome {
            Ok(result) => Response::success(Some(id), result),
            Err(error) => {
                tracing::debug!(%method, %id, code = error.code, "responding with error");
                Response::error(Some(id), error)
            }
        })
    }

    async fn dispatch(&self, request: Request) -> Result<Value, ProtocolError> {
        let Request {
            jsonrpc,
            method,
            params,
            id,
        } = request;

        if self.config.require_version && jsonrpc.as_deref() != Some(VERSION) {
            return Err(ProtocolError::invalid_request()
                .with_data(format!("expected jsonrpc \"{VERSION}\", found {jsonrpc:?}")));
        }

        let descriptor = self.registry.resolve(&method).ok_or_else(|| {
            ProtocolError::method_not_found().with_data(format!("no procedure named {method:?}"))
        })?;

        let args = shape_arguments(descriptor, params)?;
        tracing::debug!(%method, id = ?id, "invoking procedure");

        // An invoker may panic while building its future or while running it.
        let invoked = match panic::catch_unwind(AssertUnwindSafe(|| descriptor.invoke(args))) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        let result = match invoked {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(&*panic);
                tracing::error!(%method, %reason, "procedure panicked");
                return Err(ProtocolError::internal_error().with_data(reason));
            }
        };

        match result {
            Ok(value) => {
                let returns = &descriptor.signature().returns;
                if value.is_null() && !returns.admits_null() {
                    tracing::warn!(%method, %returns, "procedure produced a null result");
                }
                Ok(value)
            }
            Err(InvokeError::Domain(mismatch)) => {
                Err(ProtocolError::invalid_params().with_data(mismatch.to_string()))
            }
            Err(InvokeError::Procedure(err)) => Err(err.into()),
            Err(err @ InvokeError::Range(_)) => {
                tracing::error!(%method, %err, "procedure result could not be encoded");
                Err(ProtocolError::internal_error().with_data(err.to_string()))
            }
        }
    }
}

fn encode_response(response: &Response) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(text) => {
            tracing::trace!(payload = %text, "Sending JSON-RPC message");
            Some(text)
        }
        Err(err) => {
            tracing::error!(%err, id = ?response.id, "failed to serialize response");
            None
        }
    }
}

/// Parses a wire message, or builds the error response owed for it.
fn decode_request(raw: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(raw).map_err(|err| {
        Response::error(None, ProtocolError::parse_error().with_data(err.to_string()))
    })?;
    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
    serde_json::from_value(value).map_err(|err| {
        Response::error(id, ProtocolError::invalid_request().with_data(err.to_string()))
    })
}

/// Checks `params` against the parameter shape and flattens it into
/// positional arguments.
fn shape_arguments(
    descriptor: &ProcedureDescriptor,
    params: Option<Value>,
) -> Result<Vec<Value>, ProtocolError> {
    let expected = descriptor.signature().arity();
    let count_mismatch = |received: usize| {
        ProtocolError::invalid_params().with_data(format!(
            "Expecting {expected} parameters, and received {received}"
        ))
    };

    match params {
        None if expected == 0 => Ok(Vec::new()),
        None => Err(count_mismatch(0)),
        Some(Value::Array(values)) if values.len() == expected => Ok(values),
        Some(Value::Array(values)) => Err(count_mismatch(values.len())),
        Some(object @ Value::Object(_)) if expected == 1 => Ok(vec![object]),
        Some(Value::Object(_)) => Err(count_mismatch(1)),
        Some(other) => Err(ProtocolError::invalid_params().with_data(format!(
            "params must be an array or an object, found {other}"
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "procedure panicked".to_owned()
    }
}
