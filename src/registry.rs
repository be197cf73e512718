use crate::{
    types::{Decode, Encode, Signature, TypeMismatch},
    ProcedureError, RpcFunction,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};
use thiserror::Error;

/// Calls the native procedure behind a descriptor with already-shaped arguments.
pub type Invoker = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, InvokeResult> + Send + Sync>;

pub type InvokeResult = Result<Value, InvokeError>;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("domain type mismatch: {0}")]
    Domain(#[from] TypeMismatch),

    #[error(transparent)]
    Procedure(#[from] ProcedureError),

    #[error("(BUG in RPC function) range could not be encoded: {0}")]
    Range(serde_json::Error),
}

#[derive(Clone)]
pub struct ProcedureDescriptor {
    name: String,
    signature: Signature,
    invoker: Invoker,
}

impl ProcedureDescriptor {
    pub fn new(name: impl Into<String>, signature: Signature, invoker: Invoker) -> Self {
        Self {
            name: name.into(),
            signature,
            invoker,
        }
    }

    /// Wraps a typed async closure, inferring the signature from its argument
    /// tuple and return type.
    pub fn from_fn<Domain, Range, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        Domain: Decode + Send + 'static,
        Range: Encode + 'static,
        F: Fn(Domain) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Range, ProcedureError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let invoker: Invoker = Arc::new(move |args: Vec<Value>| -> BoxFuture<'static, InvokeResult> {
            let f = f.clone();
            Box::pin(async move {
                let decoded_args = Domain::decode(args)?;
                let retval = f(decoded_args).await?;
                retval.encode().map_err(InvokeError::Range)
            })
        });
        Self::new(name, Signature::infer::<Domain, Range>(), invoker)
    }

    pub fn with_param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signature = self.signature.with_param_names(names);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, InvokeResult> {
        (self.invoker)(args)
    }
}

impl fmt::Debug for ProcedureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProcedureDescriptor")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Something that knows which of its procedures should be callable remotely.
pub trait Expose {
    fn procedures(self: Arc<Self>) -> Vec<ProcedureDescriptor>;
}

/// Maps procedure names to their descriptors.
///
/// Procedures are registered with [`add`](Self::add), [`add_fn`](Self::add_fn),
/// [`expose`](Self::expose) or [`register`](Self::register) while the registry
/// is still owned; once handed to a [`Dispatcher`](crate::Dispatcher) it is
/// read-only. Registering a name twice replaces the earlier procedure.
#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: BTreeMap<String, ProcedureDescriptor>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
        invoker: Invoker,
    ) -> &mut Self {
        self.insert(ProcedureDescriptor::new(name, signature, invoker))
    }

    pub fn add<RFn>(&mut self, rpc_function: RFn) -> &mut Self
    where
        RFn: RpcFunction + Send + Sync + 'static,
        RFn::Domain: Send,
    {
        let signature = rpc_function.signature();
        let name = rpc_function.name().to_owned();
        let typed = TypedRpcFunction {
            rpc_function: Arc::new(rpc_function),
        };
        let invoker: Invoker = Arc::new(move |args: Vec<Value>| typed.call(args));
        self.register(name, signature, invoker)
    }

    pub fn add_fn<Domain, Range, F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        Domain: Decode + Send + 'static,
        Range: Encode + 'static,
        F: Fn(Domain) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Range, ProcedureError>> + Send + 'static,
    {
        self.insert(ProcedureDescriptor::from_fn(name, f))
    }

    pub fn expose<T>(&mut self, object: Arc<T>) -> &mut Self
    where
        T: Expose + ?Sized,
    {
        for descriptor in object.procedures() {
            self.insert(descriptor);
        }
        self
    }

    pub fn insert(&mut self, descriptor: ProcedureDescriptor) -> &mut Self {
        if self.procedures.contains_key(descriptor.name()) {
            tracing::debug!(procedure = descriptor.name(), "replacing registered procedure");
        }
        self.procedures.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&ProcedureDescriptor> {
        self.procedures.get(name)
    }

    pub fn procedures(&self) -> Vec<ProcedureInfo> {
        self.procedures
            .values()
            .map(|descriptor| ProcedureInfo {
                name: descriptor.name.clone(),
                signature: descriptor.signature.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcedureInfo {
    pub name: String,
    pub signature: Signature,
}

struct TypedRpcFunction<RFn> {
    rpc_function: Arc<RFn>,
}

impl<RFn> TypedRpcFunction<RFn>
where
    RFn: RpcFunction + Send + Sync + 'static,
    RFn::Domain: Send,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, InvokeResult> {
        let rpc_function = self.rpc_function.clone();
        Box::pin(async move {
            let decoded_args = RFn::Domain::decode(args)?;
            let retval = rpc_function.call(decoded_args).await?;
            retval.encode().map_err(InvokeError::Range)
        })
    }
}
