//! Typed handler adapter.
//!
//! Wraps `async fn(P) -> Result<R, E>` into a [`MethodHandler`]:
//! params that fail to decode into `P` are answered with `-32602` and the
//! function is never called; `Err(e)` is answered with `e.to_error_object()`;
//! `Ok(r)` is answered with `r` as the result. Schemas for `P` and `R` are
//! generated for introspection and never consulted at runtime.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use schemars::{JsonSchema, Schema, schema_for};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::dispatch::MethodHandler;
use crate::error::ToJsonRpcError;
use crate::request::RequestContext;

pub struct TypedHandler<F, P, R, E> {
    f: F,
    _marker: PhantomData<fn(P) -> Result<R, E>>,
}

impl<F, P, R, E> TypedHandler<F, P, R, E> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, P, R, E> MethodHandler for TypedHandler<F, P, R, E>
where
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    P: DeserializeOwned + JsonSchema + Send,
    R: Serialize + JsonSchema + Send,
    E: ToJsonRpcError,
{
    async fn handle(&self, request: RequestContext) {
        let params: P = match request.bind_params().await {
            Ok(params) => params,
            Err(e) => {
                debug!(method = request.method(), error = %e, "typed handler rejected params");
                return;
            }
        };

        let outcome = match (self.f)(params).await {
            Ok(result) => match serde_json::value::to_raw_value(&result) {
                Ok(raw) => request.respond_raw(raw).await,
                Err(e) => {
                    warn!(method = request.method(), error = %e, "result failed to serialize");
                    return;
                }
            },
            Err(e) => request.respond_error_object(e.to_error_object()).await,
        };

        if let Err(e) = outcome {
            warn!(method = request.method(), error = %e, "failed to send reply");
        }
    }

    fn params_schema(&self) -> Option<Schema> {
        Some(schema_for!(P))
    }

    fn result_schema(&self) -> Option<Schema> {
        Some(schema_for!(R))
    }
}
