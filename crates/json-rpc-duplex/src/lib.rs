//! # Duplex JSON-RPC 2.0 Peer
//!
//! A transport-agnostic JSON-RPC 2.0 endpoint that is client and server at once.
//! The caller supplies a [`MessageSink`] for outbound bytes and feeds inbound
//! messages to [`DuplexConnection::serve`]; framing and I/O stay with the caller.
//!
//! ## Features
//! - Outbound calls correlated to replies by numeric id, with cancellation and timeouts
//! - Method registry with typed handlers and schema introspection
//! - Exactly-once replies: double replies are rejected, missing replies become `-32603`
//! - Notifications in both directions

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod prelude;
pub mod request;
pub mod transport;
pub mod typed;
pub mod types;

// Re-export main types
pub use config::ConnectionConfig;
pub use connection::DuplexConnection;
pub use dispatch::{Dispatcher, DispatcherBuilder, FnHandler, MethodBuilder, MethodHandler, MethodInfo};
pub use error::{
    BindError, CallError, JsonRpcErrorCode, JsonRpcErrorObject, MalformedMessage, RespondError,
    ToJsonRpcError, TransportError,
};
pub use message::{Envelope, MessageKind, Reply};
pub use request::RequestContext;
pub use transport::{MessageSink, SharedSink, WriterSink};
pub use typed::TypedHandler;
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    /// Handler failures that carry no code of their own
    pub const UNKNOWN_APPLICATION_ERROR: i64 = -32099;
}
