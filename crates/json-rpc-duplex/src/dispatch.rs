//! Method registry and inbound routing.
//!
//! A [`Dispatcher`] is built once from a [`DispatcherBuilder`] and never
//! changes afterwards. It routes inbound requests and notifications to their
//! handlers and answers protocol errors itself.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::Schema;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{JsonRpcErrorObject, ToJsonRpcError, TransportError};
use crate::message::{Envelope, MessageKind};
use crate::request::RequestContext;
use crate::transport::{SharedSink, send_envelope};
use crate::typed::TypedHandler;

/// Trait for handling inbound JSON-RPC method calls and notifications.
///
/// The handler owns the [`RequestContext`] and is solely responsible for
/// answering it, either before `handle` returns or later from another task.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(&self, request: RequestContext);

    /// Schema of the accepted params (introspection only)
    fn params_schema(&self) -> Option<Schema> {
        None
    }

    /// Schema of the produced result (introspection only)
    fn result_schema(&self) -> Option<Schema> {
        None
    }
}

/// A simple function-based handler
pub struct FnHandler<F> {
    handler_fn: F,
}

impl<F> FnHandler<F> {
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, request: RequestContext) {
        (self.handler_fn)(request).await
    }
}

struct Method {
    docs: Option<String>,
    errors: BTreeMap<i64, String>,
    handler: Arc<dyn MethodHandler>,
}

/// Description of a registered method
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<String>,
    /// Declared error codes; documentation only, never enforced.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<i64, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<Schema>,
}

/// JSON-RPC method dispatcher.
///
/// Built once through [`DispatcherBuilder`] and immutable afterwards, so it can
/// be shared across any number of concurrent dispatches without locking.
#[derive(Default)]
pub struct Dispatcher {
    methods: HashMap<String, Method>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// All registered methods, sorted by name
    pub fn methods(&self) -> Vec<MethodInfo> {
        let mut infos: Vec<MethodInfo> = self
            .methods
            .iter()
            .map(|(name, method)| Self::describe(name, method))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn method_info(&self, name: &str) -> Option<MethodInfo> {
        self.methods.get(name).map(|method| Self::describe(name, method))
    }

    fn describe(name: &str, method: &Method) -> MethodInfo {
        MethodInfo {
            name: name.to_string(),
            docs: method.docs.clone(),
            errors: method.errors.clone(),
            params_schema: method.handler.params_schema(),
            result_schema: method.handler.result_schema(),
        }
    }

    /// Route one decoded envelope.
    ///
    /// Protocol errors are answered on `sink` and reported as success; only a
    /// failure to write to `sink` comes back as an error.
    pub async fn dispatch(&self, envelope: Envelope, sink: SharedSink) -> Result<(), TransportError> {
        match envelope.kind() {
            MessageKind::Request | MessageKind::Notification => {}
            MessageKind::Reply => {
                debug!(id = ?envelope.id, "dispatcher ignoring reply envelope");
                return Ok(());
            }
            MessageKind::Invalid => {
                debug!(id = ?envelope.id, "envelope is neither a call nor a reply");
                let reply = Envelope::failure(envelope.id, JsonRpcErrorObject::invalid_request(None));
                return send_envelope(&*sink, &reply).await;
            }
        }

        let name = envelope.method.as_deref().unwrap_or_default();
        match self.methods.get(name) {
            Some(method) => {
                debug!(method = name, id = ?envelope.id, "dispatching");
                method.handler.handle(RequestContext::new(envelope, sink)).await;
                Ok(())
            }
            None if envelope.is_notification() => {
                debug!(method = name, "no handler for notification, ignoring");
                Ok(())
            }
            None => {
                debug!(method = name, id = ?envelope.id, "method not found");
                let reply = Envelope::failure(envelope.id, JsonRpcErrorObject::method_not_found());
                send_envelope(&*sink, &reply).await
            }
        }
    }

    /// Decode raw bytes and dispatch them.
    ///
    /// Undecodable input is answered with `-32600 Invalid Request` (no `id`,
    /// since none could be recovered) rather than returned as an error.
    pub async fn decode_and_dispatch(&self, raw: &[u8], sink: SharedSink) -> Result<(), TransportError> {
        match Envelope::decode(raw) {
            Ok(envelope) => self.dispatch(envelope, sink).await,
            Err(e) => {
                debug!(error = %e, "rejecting undecodable message");
                let reply = Envelope::failure(None, JsonRpcErrorObject::invalid_request(None));
                send_envelope(&*sink, &reply).await
            }
        }
    }
}

/// Builder collecting method registrations before serving begins
#[derive(Default)]
pub struct DispatcherBuilder {
    methods: HashMap<String, Method>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start describing a method. Finish with [`MethodBuilder::register`].
    pub fn method(self, name: impl Into<String>) -> MethodBuilder {
        MethodBuilder {
            dispatcher: self,
            name: name.into(),
            docs: None,
            errors: BTreeMap::new(),
            handler: None,
        }
    }

    /// Register `handler` under `name`. A later registration of the same name wins.
    pub fn register<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: MethodHandler + 'static,
    {
        self.insert(name.into(), None, BTreeMap::new(), Arc::new(handler));
        self
    }

    /// Register a closure taking the raw [`RequestContext`].
    pub fn register_fn<F, Fut>(self, name: impl Into<String>, handler_fn: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(name, FnHandler::new(handler_fn))
    }

    /// Register a typed function; see [`TypedHandler`].
    pub fn register_typed<F, Fut, P, R, E>(self, name: impl Into<String>, f: F) -> Self
    where
        TypedHandler<F, P, R, E>: MethodHandler + 'static,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: ToJsonRpcError,
    {
        self.register(name, TypedHandler::new(f))
    }

    fn insert(
        &mut self,
        name: String,
        docs: Option<String>,
        errors: BTreeMap<i64, String>,
        handler: Arc<dyn MethodHandler>,
    ) {
        if self.methods.contains_key(&name) {
            debug!(method = %name, "replacing existing registration");
        }
        self.methods.insert(
            name,
            Method {
                docs,
                errors,
                handler,
            },
        );
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            methods: self.methods,
        }
    }
}

/// Fluent registration of one method with documentation
pub struct MethodBuilder {
    dispatcher: DispatcherBuilder,
    name: String,
    docs: Option<String>,
    errors: BTreeMap<i64, String>,
    handler: Option<Arc<dyn MethodHandler>>,
}

impl MethodBuilder {
    pub fn docs(mut self, docs: impl Into<String>) -> Self {
        self.docs = Some(docs.into());
        self
    }

    /// Declare an error code this method may return (documentation only)
    pub fn error(mut self, code: i64, description: impl Into<String>) -> Self {
        self.errors.insert(code, description.into());
        self
    }

    pub fn handler<H>(mut self, handler: H) -> Self
    where
        H: MethodHandler + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn handler_fn<F, Fut>(self, handler_fn: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler(FnHandler::new(handler_fn))
    }

    pub fn typed<F, Fut, P, R, E>(self, f: F) -> Self
    where
        TypedHandler<F, P, R, E>: MethodHandler + 'static,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: ToJsonRpcError,
    {
        self.handler(TypedHandler::new(f))
    }

    /// Add the method to the dispatcher. A method without a handler is skipped.
    pub fn register(self) -> DispatcherBuilder {
        let MethodBuilder {
            mut dispatcher,
            name,
            docs,
            errors,
            handler,
        } = self;
        match handler {
            Some(handler) => dispatcher.insert(name, docs, errors, handler),
            None => warn!(method = %name, "method registered without a handler, skipping"),
        }
        dispatcher
    }
}
