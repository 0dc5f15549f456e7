//! Small request handlers used across the tests.

use std::sync::Arc;

use futures::future::BoxFuture;
use remox_core::dispatcher::{RequestHandler, ServerSession};
use remox_core::{Dispatcher, Request, RpcError, Transaction};
use serde_json::{Value, json};

/// Answers every request with its own params.
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(
        &self,
        transaction: Transaction,
        _session: Arc<ServerSession>,
        request: Request,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        Box::pin(async move {
            let params = request.params.unwrap_or(Value::Null);
            transaction.send_response(params).await
        })
    }
}

/// Register a `whoami` method answering with the resolved session's identity,
/// for session-continuity assertions.
pub fn register_session_info(dispatcher: &Dispatcher) {
    dispatcher.register_fn("whoami", |transaction, session, _request| async move {
        transaction
            .send_response(json!({
                "sessionId": session.session_id(),
                "isNew": session.is_new(),
            }))
            .await
    });
}
