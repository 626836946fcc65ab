//! # Duplex JSON-RPC Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use json_rpc_duplex::prelude::*;
//! ```

pub use crate::config::ConnectionConfig;
pub use crate::connection::DuplexConnection;
pub use crate::dispatch::{Dispatcher, DispatcherBuilder, MethodHandler};
pub use crate::error::{
    BindError, CallError, JsonRpcErrorCode, JsonRpcErrorObject, RespondError, ToJsonRpcError,
    TransportError,
};
pub use crate::message::{Envelope, Reply};
pub use crate::request::RequestContext;
pub use crate::transport::{MessageSink, SharedSink, WriterSink};
pub use crate::types::RequestId;

// Standard error codes
pub use crate::error_codes::*;
