//! JSON-RPC 2.0 over any text transport.
//!
//! The server side is a [`ProcedureRegistry`] frozen behind a [`Dispatcher`],
//! which turns a request into a response (or nothing, for notifications).
//! The client side is a [`Client`] that assigns ids, hands requests to a
//! [`Transport`] and matches replies fed to its [`ResponseRouter`].

pub mod client;
pub mod dispatcher;
mod macros;
pub mod message;
pub mod net;
mod pending;
pub mod registry;
pub mod router;
pub mod types;

pub use client::{CallError, Client, ClientConfig, Transport};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use futures::future::BoxFuture;
pub use message::{ProtocolError, Request, RequestId, Response};
pub use registry::{Expose, Invoker, ProcedureDescriptor, ProcedureRegistry};
pub use router::ResponseRouter;
pub use tokio_util::sync::CancellationToken;
pub use types::{Decode, Encode, Param, Signature, Type, TypeMismatch, Typed};

use std::{fmt, future::Future, sync::Arc};
use thiserror::Error;

/// A procedure that can be registered by name and called remotely.
///
/// `Domain` is the tuple of positional arguments; `Range` is the return
/// value, with `()` meaning the procedure returns nothing.
pub trait RpcFunction {
    type Domain: Decode;
    type Range: Encode;
    type RangeFut: Future<Output = Result<Self::Range, ProcedureError>> + Send + 'static;

    fn name(&self) -> &str;

    fn signature(&self) -> Signature {
        Signature::infer::<Self::Domain, Self::Range>()
    }

    fn call(self: Arc<Self>, args: Self::Domain) -> Self::RangeFut;
}

/// Failure raised by a procedure body.
#[derive(Debug, Error)]
pub enum ProcedureError {
    /// Sent to the caller as is.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Sent to the caller as an internal error carrying this message.
    #[error("{0}")]
    Application(String),
}

impl ProcedureError {
    pub fn application(err: impl fmt::Display) -> Self {
        ProcedureError::Application(err.to_string())
    }
}

impl From<ProcedureError> for ProtocolError {
    fn from(err: ProcedureError) -> Self {
        match err {
            ProcedureError::Protocol(err) => err,
            ProcedureError::Application(message) => ProtocolError::internal_error().with_data(message),
        }
    }
}

impl From<serde_json::Error> for ProcedureError {
    fn from(err: serde_json::Error) -> Self {
        ProcedureError::application(err)
    }
}

impl From<std::io::Error> for ProcedureError {
    fn from(err: std::io::Error) -> Self {
        ProcedureError::application(err)
    }
}
