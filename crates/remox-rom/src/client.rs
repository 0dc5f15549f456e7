//! Low-level ROM client: one method per wire operation.
//!
//! [`RomClient`] renders [`RomOperation`]s onto an [`RpcSession`] and
//! normalizes the results. Result payloads may arrive wrapped in a
//! `{"value": ...}` envelope (a side effect of session-id injection on the
//! server); this layer unwraps it so callers see the bare value.

use std::sync::Arc;

use remox_core::message::VALUE_PROPERTY;
use remox_core::{ProtocolError, RpcError, RpcSession};
use serde_json::Value;
use tracing::debug;

use crate::ops::{Props, RomOperation};

#[derive(Clone)]
pub struct RomClient {
    session: Arc<RpcSession>,
}

impl RomClient {
    pub fn new(session: Arc<RpcSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<RpcSession> {
        &self.session
    }

    async fn execute(&self, op: RomOperation) -> Result<Value, RpcError> {
        debug!(method = op.method(), "rom operation");
        let result = self.session.call(op.method(), Some(op.params())).await?;
        Ok(unwrap_value(result))
    }

    /// Instantiate a remote object, returning its reference.
    pub async fn create(
        &self,
        remote_class: &str,
        constructor_params: Props,
    ) -> Result<String, RpcError> {
        let result = self
            .execute(RomOperation::Create {
                remote_class: remote_class.to_owned(),
                constructor_params,
            })
            .await?;
        expect_string(result, "object reference")
    }

    /// Invoke a named operation on a remote object.
    pub async fn invoke(
        &self,
        object: &str,
        operation: &str,
        operation_params: Props,
    ) -> Result<Value, RpcError> {
        self.execute(RomOperation::Invoke {
            object: object.to_owned(),
            operation: operation.to_owned(),
            operation_params,
        })
        .await
    }

    /// Subscribe to an event type, returning the subscription id.
    ///
    /// The server answers with either a bare string or a single-entry object
    /// holding the id; anything else is a protocol error.
    pub async fn subscribe(&self, object: &str, event_type: &str) -> Result<String, RpcError> {
        let result = self
            .execute(RomOperation::Subscribe {
                object: object.to_owned(),
                event_type: event_type.to_owned(),
            })
            .await?;
        match result {
            Value::String(subscription) => Ok(subscription),
            Value::Object(obj) if obj.len() == 1 => {
                let value = obj.into_iter().next().map(|(_, v)| v);
                match value {
                    Some(Value::String(subscription)) => Ok(subscription),
                    other => Err(unexpected("subscription id string", &other.unwrap_or(Value::Null))),
                }
            }
            other => Err(unexpected("subscription id string or single-entry object", &other)),
        }
    }

    pub async fn unsubscribe(&self, object: &str, subscription: &str) -> Result<(), RpcError> {
        self.execute(RomOperation::Unsubscribe {
            object: object.to_owned(),
            subscription: subscription.to_owned(),
        })
        .await?;
        Ok(())
    }

    pub async fn release(&self, object: &str) -> Result<(), RpcError> {
        self.execute(RomOperation::Release {
            object: object.to_owned(),
        })
        .await?;
        Ok(())
    }

    pub async fn keep_alive(&self, object: &str) -> Result<(), RpcError> {
        self.execute(RomOperation::KeepAlive {
            object: object.to_owned(),
        })
        .await?;
        Ok(())
    }
}

/// Strip the `{"value": ...}` envelope if present.
pub(crate) fn unwrap_value(result: Value) -> Value {
    match result {
        Value::Object(mut obj) if obj.len() == 1 && obj.contains_key(VALUE_PROPERTY) => obj
            .remove(VALUE_PROPERTY)
            .unwrap_or(Value::Null),
        other => other,
    }
}

fn expect_string(value: Value, expected: &'static str) -> Result<String, RpcError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(unexpected(expected, &other)),
    }
}

fn unexpected(expected: &'static str, found: &Value) -> RpcError {
    RpcError::Protocol(ProtocolError::UnexpectedValue {
        expected,
        found: found.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_envelope_is_unwrapped() {
        assert_eq!(unwrap_value(json!({"value": "1_MediaPipeline"})), json!("1_MediaPipeline"));
        assert_eq!(unwrap_value(json!({"value": [1, 2]})), json!([1, 2]));
    }

    #[test]
    fn plain_objects_pass_through() {
        let obj = json!({"value": "x", "sessionId2": "y"});
        assert_eq!(unwrap_value(obj.clone()), obj);
        assert_eq!(unwrap_value(json!("bare")), json!("bare"));
    }
}
