use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::error_codes;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// Never produced locally (undecodable input is answered with
    /// `InvalidRequest`); recognized in error replies from peers.
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    UnknownApplicationError,
    Application(i64),
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::UnknownApplicationError => error_codes::UNKNOWN_APPLICATION_ERROR,
            JsonRpcErrorCode::Application(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::UnknownApplicationError => "unknown application error",
            JsonRpcErrorCode::Application(_) => "Application error",
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            error_codes::PARSE_ERROR => JsonRpcErrorCode::ParseError,
            error_codes::INVALID_REQUEST => JsonRpcErrorCode::InvalidRequest,
            error_codes::METHOD_NOT_FOUND => JsonRpcErrorCode::MethodNotFound,
            error_codes::INVALID_PARAMS => JsonRpcErrorCode::InvalidParams,
            error_codes::INTERNAL_ERROR => JsonRpcErrorCode::InternalError,
            error_codes::UNKNOWN_APPLICATION_ERROR => JsonRpcErrorCode::UnknownApplicationError,
            other => JsonRpcErrorCode::Application(other),
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC Error object, as carried in the `error` member of a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    /// Error with an arbitrary application-defined code.
    pub fn custom(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn invalid_request(data: Option<Value>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, None, data)
    }

    pub fn method_not_found() -> Self {
        Self::new(JsonRpcErrorCode::MethodNotFound, None, None)
    }

    pub fn invalid_params(data: Option<Value>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidParams, None, data)
    }

    pub fn internal_error(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError, message, None)
    }

    /// -32099 with the failure's description under `data.error`.
    pub fn unknown_application_error(description: impl fmt::Display) -> Self {
        Self::new(
            JsonRpcErrorCode::UnknownApplicationError,
            None,
            Some(json!({ "error": description.to_string() })),
        )
    }

    pub fn kind(&self) -> JsonRpcErrorCode {
        JsonRpcErrorCode::from_code(self.code)
    }
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorObject {}

/// Trait for errors that can be converted to JSON-RPC error objects.
///
/// The default collapses any failure into -32099 "unknown application error"
/// with the error's `Display` text as data. Override it to pick a code.
pub trait ToJsonRpcError: std::error::Error + Send + Sync + 'static {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject::unknown_application_error(self)
    }
}

impl ToJsonRpcError for JsonRpcErrorObject {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        self.clone()
    }
}

/// Inbound bytes that are not a JSON-RPC 2.0 envelope
#[derive(Debug, Error)]
#[error("malformed message: {0}")]
pub struct MalformedMessage(#[from] pub serde_json::Error);

/// Transport-level errors (no domain logic). The only failures `serve` reports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,
}

/// Failure to produce a reply through a request context
#[derive(Debug, Error)]
pub enum RespondError {
    #[error("request already responded to")]
    AlreadyResponded,

    #[error("failed to encode reply: {0}")]
    Encode(serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure to bind request params
#[derive(Debug, Error)]
pub enum BindError {
    /// Params did not decode; an Invalid params reply has been sent.
    #[error("invalid params: {0}")]
    InvalidParams(serde_json::Error),

    #[error("params rejected but error reply failed: {0}")]
    Respond(#[from] RespondError),
}

/// Outcome of an outbound call that did not produce a result
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote peer replied with an error object.
    #[error("remote error: {0}")]
    Remote(JsonRpcErrorObject),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("call cancelled")]
    Cancelled,

    #[error("call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to encode params: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode result: {0}")]
    InvalidResult(serde_json::Error),
}

impl CallError {
    /// Remote error object, if the peer answered with one.
    pub fn remote(&self) -> Option<&JsonRpcErrorObject> {
        match self {
            CallError::Remote(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled | CallError::TimedOut(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    impl ToJsonRpcError for DiskError {}

    #[derive(Debug, Error)]
    #[error("quota exceeded")]
    struct QuotaError;

    impl ToJsonRpcError for QuotaError {
        fn to_error_object(&self) -> JsonRpcErrorObject {
            JsonRpcErrorObject::custom(429, self.to_string(), None)
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(JsonRpcErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(JsonRpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(JsonRpcErrorCode::InvalidParams.code(), -32602);
        assert_eq!(JsonRpcErrorCode::UnknownApplicationError.code(), -32099);
        assert_eq!(JsonRpcErrorCode::from_code(-32601), JsonRpcErrorCode::MethodNotFound);
        assert_eq!(JsonRpcErrorCode::from_code(42), JsonRpcErrorCode::Application(42));
    }

    #[test]
    fn test_remote_parse_error_is_classified() {
        let error: JsonRpcErrorObject =
            serde_json::from_str(r#"{"code":-32700,"message":"Parse error"}"#).unwrap();
        assert_eq!(error.kind(), JsonRpcErrorCode::ParseError);
        assert_eq!(error.kind().message(), "Parse error");
    }

    #[test]
    fn test_absent_data_is_omitted() {
        let json = serde_json::to_string(&JsonRpcErrorObject::method_not_found()).unwrap();
        assert_eq!(json, r#"{"code":-32601,"message":"Method not found"}"#);
    }

    #[test]
    fn test_default_application_error_mapping() {
        let error = DiskError.to_error_object();
        assert_eq!(error.code, -32099);
        assert_eq!(error.message, "unknown application error");
        assert_eq!(error.data, Some(json!({"error": "disk on fire"})));
    }

    #[test]
    fn test_custom_application_error_mapping() {
        let error = QuotaError.to_error_object();
        assert_eq!(error.code, 429);
        assert_eq!(error.kind(), JsonRpcErrorCode::Application(429));
        assert!(error.data.is_none());
    }
}
