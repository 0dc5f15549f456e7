//! Per-request response handle.
//!
//! A [`Transaction`] is handed to the request handler and is the only way to
//! answer a request. It enforces exactly-one-response: the first send wins,
//! every later attempt fails with [`RpcError::AlreadyResponded`], no matter
//! how many clones of the transaction race.
//!
//! For a notification the transaction is inert: responding is a no-op, since
//! the peer is not waiting for anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::message::{Request, Response, ResponseError};
use crate::transport::Transport;
use crate::{RpcError, TransportError};

#[derive(Clone, Debug)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

#[derive(Debug)]
struct TransactionInner {
    request_id: Option<u64>,
    method: String,
    session_id: Option<String>,
    transport: Transport,
    responded: AtomicBool,
    async_mode: AtomicBool,
}

impl Transaction {
    pub(crate) fn new(request: &Request, session_id: Option<String>, transport: Transport) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                request_id: request.id,
                method: request.method.clone(),
                session_id,
                transport,
                responded: AtomicBool::new(false),
                async_mode: AtomicBool::new(false),
            }),
        }
    }

    pub fn request_id(&self) -> Option<u64> {
        self.inner.request_id
    }

    pub fn is_notification(&self) -> bool {
        self.inner.request_id.is_none()
    }

    pub fn has_responded(&self) -> bool {
        self.inner.responded.load(Ordering::Acquire)
    }

    /// Mark the response as deferred: the handler will return without
    /// responding and some other task answers later through a clone.
    pub fn start_async(&self) {
        self.inner.async_mode.store(true, Ordering::Release);
    }

    pub fn is_async(&self) -> bool {
        self.inner.async_mode.load(Ordering::Acquire)
    }

    /// Send a success response carrying `result`.
    pub async fn send_response(&self, result: serde_json::Value) -> Result<(), RpcError> {
        self.send(Response::ok(self.inner.request_id, result)).await
    }

    /// Send a success response with a null result.
    pub async fn send_void_response(&self) -> Result<(), RpcError> {
        self.send_response(serde_json::Value::Null).await
    }

    /// Send an error response.
    pub async fn send_error(&self, error: ResponseError) -> Result<(), RpcError> {
        self.send(Response::err(self.inner.request_id, error)).await
    }

    /// Send an error response from a bare code and message.
    pub async fn send_error_code(
        &self,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), RpcError> {
        self.send_error(ResponseError::new(code, message)).await
    }

    async fn send(&self, response: Response) -> Result<(), RpcError> {
        if self.is_notification() {
            debug!(method = %self.inner.method, "dropping response to a notification");
            return Ok(());
        }
        // First responder wins; everyone else gets AlreadyResponded.
        if self
            .inner
            .responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RpcError::AlreadyResponded);
        }
        let response = response.with_session_id(self.inner.session_id.clone());
        match self.inner.transport.send(response.to_text()).await {
            Ok(()) => Ok(()),
            Err(TransportError::Closed) => {
                // The client is gone; its request died with it.
                debug!(
                    id = ?self.inner.request_id,
                    method = %self.inner.method,
                    "response dropped on closed transport"
                );
                Err(RpcError::Transport(TransportError::Closed))
            }
            Err(e) => Err(RpcError::Transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    fn transaction(id: Option<u64>) -> (Transaction, Transport) {
        let (server, client) = Transport::mem_pair();
        let request = Request::new(id, "echo", None);
        (Transaction::new(&request, Some("S1".into()), server), client)
    }

    #[tokio::test]
    async fn second_response_is_rejected() {
        let (tx, client) = transaction(Some(1));
        tx.send_response(serde_json::json!("first")).await.unwrap();
        let err = tx.send_response(serde_json::json!("second")).await.unwrap_err();
        assert!(matches!(err, RpcError::AlreadyResponded));

        // Exactly one frame reaches the peer.
        let frame = client.recv().await.unwrap();
        assert!(frame.contains("first"));
    }

    #[tokio::test]
    async fn racing_clones_respond_exactly_once() {
        let (tx, client) = transaction(Some(2));
        let mut tasks = Vec::new();
        for i in 0..8 {
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                tx.send_response(serde_json::json!(i)).await.is_ok()
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        client.recv().await.unwrap();
    }

    #[tokio::test]
    async fn notification_response_is_a_silent_no_op() {
        let (tx, _client) = transaction(None);
        assert!(tx.is_notification());
        tx.send_response(serde_json::json!("ignored")).await.unwrap();
        tx.send_response(serde_json::json!("again")).await.unwrap();
        assert!(!tx.has_responded());
    }
}
