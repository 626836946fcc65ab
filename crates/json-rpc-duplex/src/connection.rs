//! Duplex connection: outbound calls and inbound dispatch over one transport.
//!
//! Every outbound call takes a fresh numeric id, parks a one-shot reply slot
//! in the pending table under that id, writes the request and waits. Inbound
//! replies are matched to slots by id; inbound requests and notifications go
//! to the [`Dispatcher`]. Replies nobody is waiting for are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{CallError, JsonRpcErrorObject, TransportError};
use crate::message::{Envelope, MessageKind, Reply, encode_params};
use crate::transport::{SharedSink, send_envelope};
use crate::types::RequestId;

type PendingTable = Mutex<HashMap<i64, oneshot::Sender<Reply>>>;

/// Removes a call's pending entry on every exit path, including when the
/// calling future is dropped mid-await.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Only the members needed to tell whether undecodable bytes were meant as a reply
#[derive(Deserialize)]
struct ReplyProbe {
    #[serde(default)]
    result: Option<IgnoredAny>,
    #[serde(default)]
    error: Option<IgnoredAny>,
}

fn looks_like_reply(raw: &[u8]) -> bool {
    serde_json::from_slice::<ReplyProbe>(raw)
        .map(|probe| probe.result.is_some() || probe.error.is_some())
        .unwrap_or(false)
}

/// A JSON-RPC 2.0 peer that both issues and serves calls
pub struct DuplexConnection {
    dispatcher: Arc<Dispatcher>,
    sink: SharedSink,
    pending: PendingTable,
    next_id: AtomicI64,
    config: ConnectionConfig,
}

impl DuplexConnection {
    pub fn new(sink: SharedSink, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            sink,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            config: ConnectionConfig::default(),
        }
    }

    /// A connection that only issues calls; inbound requests get `-32601`.
    pub fn without_dispatcher(sink: SharedSink) -> Self {
        Self::new(sink, Arc::new(Dispatcher::default()))
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Number of outbound calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Call `method` and decode its result into `R`.
    ///
    /// Bounded by the configured call timeout, if any.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = encode_params(&params).map_err(CallError::Encode)?;
        self.call_raw(method, Some(params), None).await?.into_result()
    }

    /// Like [`call`](Self::call), but also gives up as soon as `cancel` fires.
    pub async fn call_with_cancel<P, R>(
        &self,
        method: &str,
        params: P,
        cancel: &CancellationToken,
    ) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = encode_params(&params).map_err(CallError::Encode)?;
        self.call_raw(method, Some(params), Some(cancel)).await?.into_result()
    }

    /// Issue a call with pre-encoded params and return the reply undecoded.
    ///
    /// A remote error reply is returned as `Ok(reply)` with an `Err` outcome;
    /// `Err` from this function is always local (transport, cancellation,
    /// timeout or encoding).
    pub async fn call_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Reply, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let _registration = self.register(id, reply_tx);

        let request = Envelope::request(RequestId::Number(id), method, params);
        let bytes = request.encode().map_err(CallError::Encode)?;
        debug!(id, method, "sending request");
        if let Err(e) = self.sink.send(bytes).await {
            warn!(id, method, error = %e, "failed to send request");
            return Err(CallError::Transport(e));
        }

        let outcome = self.await_reply(reply_rx, cancel).await;
        if let Err(ref e) = outcome {
            debug!(id, method, error = %e, "call ended without reply");
        }
        outcome
    }

    fn register(&self, id: i64, reply_tx: oneshot::Sender<Reply>) -> PendingGuard<'_> {
        if self.pending.lock().insert(id, reply_tx).is_some() {
            warn!(id, "request id reused while still pending");
        }
        PendingGuard {
            pending: &self.pending,
            id,
        }
    }

    async fn await_reply(
        &self,
        reply_rx: oneshot::Receiver<Reply>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Reply, CallError> {
        // The slot's sender only disappears without a reply when the
        // connection gives up on all pending calls.
        let delivered = async {
            match cancel {
                Some(token) => tokio::select! {
                    reply = reply_rx => reply.map_err(|_| CallError::Transport(TransportError::Closed)),
                    _ = token.cancelled() => Err(CallError::Cancelled),
                },
                None => reply_rx
                    .await
                    .map_err(|_| CallError::Transport(TransportError::Closed)),
            }
        };

        match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, delivered)
                .await
                .unwrap_or(Err(CallError::TimedOut(limit))),
            None => delivered.await,
        }
    }

    /// Send a notification. No id is allocated and no reply is expected.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), CallError> {
        let params = encode_params(&params).map_err(CallError::Encode)?;
        self.notify_raw(method, Some(params)).await
    }

    pub async fn notify_raw(&self, method: &str, params: Option<Box<RawValue>>) -> Result<(), CallError> {
        let notification = Envelope::notification(method, params);
        let bytes = notification.encode().map_err(CallError::Encode)?;
        debug!(method, "sending notification");
        self.sink.send(bytes).await?;
        Ok(())
    }

    /// Handle one raw inbound message; the transport's read loop calls this
    /// once per received message.
    ///
    /// Only a failure to write a reply is reported. Malformed input,
    /// unknown methods and stray replies are handled on the wire or dropped.
    pub async fn serve(&self, raw: &[u8]) -> Result<(), TransportError> {
        match Envelope::decode(raw) {
            Ok(envelope) => self.serve_envelope(envelope).await,
            Err(e) if looks_like_reply(raw) => {
                warn!(error = %e, "dropping malformed reply");
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "rejecting undecodable message");
                let reply = Envelope::failure(None, JsonRpcErrorObject::invalid_request(None));
                send_envelope(&*self.sink, &reply).await
            }
        }
    }

    /// Handle one already-decoded inbound envelope
    pub async fn serve_envelope(&self, envelope: Envelope) -> Result<(), TransportError> {
        if envelope.kind() == MessageKind::Reply {
            self.deliver(envelope);
            return Ok(());
        }
        self.dispatcher.dispatch(envelope, self.sink.clone()).await
    }

    fn deliver(&self, envelope: Envelope) {
        let Some(id) = envelope.id.as_ref().and_then(RequestId::as_number) else {
            debug!(id = ?envelope.id, "dropping reply without a numeric id");
            return;
        };

        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(reply_tx) => {
                if reply_tx.send(Reply::from(envelope)).is_err() {
                    debug!(id, "caller stopped waiting before the reply arrived");
                }
            }
            None => debug!(id, "dropping reply for unknown or completed call"),
        }
    }

    /// Fail every in-flight call with [`TransportError::Closed`].
    pub fn fail_pending(&self) {
        let abandoned: Vec<_> = self.pending.lock().drain().collect();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing pending calls");
        }
    }

    /// Drive a stream of inbound messages until it ends.
    ///
    /// Each message is served on its own task, so slow handlers never block
    /// reply delivery and handlers may call back into this connection. When
    /// the stream ends (or fails) all pending calls are failed and in-flight
    /// handlers are awaited.
    pub async fn serve_incoming<S, B>(self: &Arc<Self>, incoming: S) -> Result<(), TransportError>
    where
        S: Stream<Item = std::io::Result<B>>,
        B: AsRef<[u8]> + Send + 'static,
    {
        let tracker = TaskTracker::new();
        let mut incoming = std::pin::pin!(incoming);

        let result = loop {
            match incoming.next().await {
                Some(Ok(message)) => {
                    let connection = Arc::clone(self);
                    tracker.spawn(async move {
                        if let Err(e) = connection.serve(message.as_ref()).await {
                            warn!(error = %e, "failed to answer inbound message");
                        }
                    });
                }
                Some(Err(e)) => break Err(TransportError::Io(e)),
                None => break Ok(()),
            }
        };

        debug!("inbound stream finished");
        self.fail_pending();
        tracker.close();
        tracker.wait().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    fn connection() -> (Arc<DuplexConnection>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = DuplexConnection::without_dispatcher(Arc::new(tx))
            .with_config(ConnectionConfig::default().with_call_timeout(None));
        (Arc::new(connection), rx)
    }

    async fn sent_id(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> i64 {
        let sent: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        sent["id"].as_i64().unwrap()
    }

    #[test]
    fn test_reply_probe() {
        assert!(looks_like_reply(br#"{"jsonrpc":"2.0","id":1.5,"result":1}"#));
        assert!(looks_like_reply(br#"{"jsonrpc":"1.0","id":1,"error":{}}"#));
        assert!(!looks_like_reply(br#"{"jsonrpc":"2.0","id":1.5,"method":"x"}"#));
        assert!(!looks_like_reply(b"not json"));
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let (connection, mut rx) = connection();

        let first = tokio::spawn({
            let connection = connection.clone();
            async move { connection.call::<_, Value>("a", ()).await }
        });
        assert_eq!(sent_id(&mut rx).await, 1);

        let second = tokio::spawn({
            let connection = connection.clone();
            async move { connection.call::<_, Value>("b", ()).await }
        });
        assert_eq!(sent_id(&mut rx).await, 2);

        connection.fail_pending();
        assert!(matches!(first.await.unwrap(), Err(CallError::Transport(TransportError::Closed))));
        assert!(matches!(second.await.unwrap(), Err(CallError::Transport(TransportError::Closed))));
        assert_eq!(connection.pending_calls(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_late_reply_is_dropped_quietly() {
        let (connection, mut rx) = connection();
        let cancel = CancellationToken::new();

        let call = tokio::spawn({
            let connection = connection.clone();
            let cancel = cancel.clone();
            async move { connection.call_with_cancel::<_, Value>("slow", (), &cancel).await }
        });
        let id = sent_id(&mut rx).await;
        cancel.cancel();
        assert!(matches!(call.await.unwrap(), Err(CallError::Cancelled)));
        assert_eq!(connection.pending_calls(), 0);

        let late = format!(r#"{{"jsonrpc":"2.0","id":{},"result":"late"}}"#, id);
        connection.serve(late.as_bytes()).await.unwrap();

        assert!(logs_contain("dropping reply for unknown or completed call"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_string_and_fractional_reply_ids_are_dropped() {
        let (connection, mut rx) = connection();

        connection
            .serve(br#"{"jsonrpc":"2.0","id":"1","result":true}"#)
            .await
            .unwrap();
        assert!(logs_contain("dropping reply without a numeric id"));

        connection
            .serve(br#"{"jsonrpc":"2.0","id":1.5,"result":true}"#)
            .await
            .unwrap();
        assert!(logs_contain("dropping malformed reply"));

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = DuplexConnection::without_dispatcher(Arc::new(tx))
            .with_config(ConnectionConfig::default().with_call_timeout(Some(Duration::from_secs(5))));

        let outcome = connection.call::<_, Value>("never", ()).await;

        assert!(matches!(outcome, Err(CallError::TimedOut(limit)) if limit == Duration::from_secs(5)));
        assert!(outcome.unwrap_err().is_cancelled());
        assert_eq!(connection.pending_calls(), 0);
        assert!(rx.try_recv().is_ok());
    }
}
