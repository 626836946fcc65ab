//! Per-request reply capability handed to method handlers.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::value::RawValue;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

use crate::error::{BindError, JsonRpcErrorObject, RespondError};
use crate::message::Envelope;
use crate::transport::{SharedSink, send_envelope};
use crate::types::RequestId;

/// One inbound request or notification plus the sink its reply goes to.
///
/// The first reply-producing call answers the request; later calls fail with
/// [`RespondError::AlreadyResponded`] and write nothing. Replies to
/// notifications are accepted and suppressed. A request dropped without a
/// reply is answered with `-32603 Internal error`.
pub struct RequestContext {
    id: Option<RequestId>,
    method: String,
    params: Option<Box<RawValue>>,
    sink: SharedSink,
    answered: AtomicBool,
}

impl RequestContext {
    pub fn new(envelope: Envelope, sink: SharedSink) -> Self {
        Self {
            id: envelope.id,
            method: envelope.method.unwrap_or_default(),
            params: envelope.params,
            sink,
            answered: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&RawValue> {
        self.params.as_deref()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }

    fn claim(&self) -> Result<(), RespondError> {
        if self.answered.swap(true, Ordering::AcqRel) {
            Err(RespondError::AlreadyResponded)
        } else {
            Ok(())
        }
    }

    async fn write(&self, envelope: Envelope) -> Result<(), RespondError> {
        self.claim()?;
        if self.is_notification() {
            debug!(method = %self.method, "suppressing reply to notification");
            return Ok(());
        }
        send_envelope(&*self.sink, &envelope).await?;
        Ok(())
    }

    /// Reply with `result` serialized as the `result` member.
    pub async fn respond<T: Serialize + ?Sized>(&self, result: &T) -> Result<(), RespondError> {
        let raw = serde_json::value::to_raw_value(result).map_err(RespondError::Encode)?;
        self.respond_raw(raw).await
    }

    /// Reply with an already-encoded result.
    pub async fn respond_raw(&self, result: Box<RawValue>) -> Result<(), RespondError> {
        self.write(Envelope::success(self.id.clone(), result)).await
    }

    /// Reply with an error. `data` is omitted from the wire when `None`.
    pub async fn respond_error(
        &self,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), RespondError> {
        self.respond_error_object(JsonRpcErrorObject::custom(code, message, data))
            .await
    }

    pub async fn respond_error_object(&self, error: JsonRpcErrorObject) -> Result<(), RespondError> {
        self.write(Envelope::failure(self.id.clone(), error)).await
    }

    /// Decode params into `T`. Absent params decode as JSON `null`.
    ///
    /// On failure an `Invalid params` reply has already been sent, so the
    /// caller must not respond again.
    pub async fn bind_params<T: DeserializeOwned>(&self) -> Result<T, BindError> {
        let text = self.params.as_deref().map(RawValue::get).unwrap_or("null");
        match serde_json::from_str(text) {
            Ok(params) => Ok(params),
            Err(e) => {
                debug!(method = %self.method, error = %e, "params failed to bind");
                self.respond_error_object(JsonRpcErrorObject::invalid_params(None))
                    .await?;
                Err(BindError::InvalidParams(e))
            }
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("answered", &self.is_answered())
            .finish()
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        let Some(id) = self.id.clone() else {
            return;
        };
        if self.answered.swap(true, Ordering::AcqRel) {
            return;
        }

        warn!(method = %self.method, id = %id, "request dropped without reply, sending internal error");
        let envelope = Envelope::failure(Some(id), JsonRpcErrorObject::internal_error(None));
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode default reply");
                return;
            }
        };

        let sink = self.sink.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sink.send(bytes).await {
                        warn!(error = %e, "failed to deliver default reply");
                    }
                });
            }
            Err(_) => {
                error!(method = %self.method, "no async runtime to deliver default reply");
            }
        }
    }
}
