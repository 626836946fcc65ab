//! Two peers wired back to back over an in-memory pipe with newline framing.
//!
//! The "server" peer exposes a typed `divide` method and calls back into the
//! "client" peer while handling `greet`. Run with `RUST_LOG=debug` to see the
//! wire traffic.

use std::io;
use std::sync::{Arc, OnceLock};

use futures::TryStreamExt;
use json_rpc_duplex::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize, JsonSchema)]
struct DivideParams {
    dividend: f64,
    divisor: f64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DivideResult {
    quotient: f64,
}

#[derive(Debug, thiserror::Error)]
enum DivideError {
    #[error("division by zero")]
    DivisionByZero,
}

impl ToJsonRpcError for DivideError {
    fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject::custom(-32001, self.to_string(), None)
    }
}

async fn divide(params: DivideParams) -> Result<DivideResult, DivideError> {
    if params.divisor == 0.0 {
        return Err(DivideError::DivisionByZero);
    }
    Ok(DivideResult {
        quotient: params.dividend / params.divisor,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_stream);
    let (server_read, server_write) = tokio::io::split(server_stream);

    // Client side: answers "name" so the server can ask who is calling
    let client_dispatcher = Dispatcher::builder()
        .register_fn("name", |request: RequestContext| async move {
            let _ = request.respond("echo-client").await;
        })
        .build();
    let client = Arc::new(DuplexConnection::new(
        Arc::new(WriterSink::new(client_write).with_delimiter("\n")),
        Arc::new(client_dispatcher),
    ));

    let server_handle: Arc<OnceLock<Arc<DuplexConnection>>> = Arc::new(OnceLock::new());
    let server_dispatcher = Dispatcher::builder()
        .method("divide")
        .docs("Divide two numbers")
        .error(-32001, "division by zero")
        .typed(divide)
        .register()
        .register_fn("greet", {
            let server_handle = server_handle.clone();
            move |request: RequestContext| {
                let server_handle = server_handle.clone();
                async move {
                    let Some(server) = server_handle.get() else {
                        return;
                    };
                    let outcome = match server.call::<_, String>("name", ()).await {
                        Ok(name) => request.respond(&format!("hello, {name}")).await,
                        Err(e) => request.respond_error(-32002, e.to_string(), None).await,
                    };
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "greet reply failed");
                    }
                }
            }
        })
        .build();
    let server = Arc::new(DuplexConnection::new(
        Arc::new(WriterSink::new(server_write).with_delimiter("\n")),
        Arc::new(server_dispatcher),
    ));
    let _ = server_handle.set(server.clone());

    for (connection, reader) in [(client.clone(), client_read), (server.clone(), server_read)] {
        tokio::spawn(async move {
            let lines = FramedRead::new(reader, LinesCodec::new()).map_err(io::Error::other);
            if let Err(e) = connection.serve_incoming(lines).await {
                tracing::warn!(error = %e, "read loop ended");
            }
        });
    }

    let quotient: DivideResult = client
        .call("divide", serde_json::json!({"dividend": 10.0, "divisor": 4.0}))
        .await?;
    info!(quotient = quotient.quotient, "divide returned");

    match client
        .call::<_, DivideResult>("divide", serde_json::json!({"dividend": 1.0, "divisor": 0.0}))
        .await
    {
        Err(CallError::Remote(error)) => info!(code = error.code, message = %error.message, "divide refused"),
        other => info!(?other, "unexpected divide outcome"),
    }

    let greeting: String = client.call("greet", ()).await?;
    info!(%greeting, "greet returned");

    for method in server.dispatcher().methods() {
        info!(method = %serde_json::to_string(&method)?, "server method");
    }

    Ok(())
}
