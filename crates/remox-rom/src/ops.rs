//! Wire model of remote object operations.
//!
//! Every action the client can take against the object server is one variant
//! of [`RomOperation`]; each renders its method name and exact parameter
//! object. Parameters are always named, never positional.

use serde_json::{Map, Value, json};

/// Named parameters for constructors and operations.
pub type Props = Map<String, Value>;

/// Wire method names.
pub const CREATE_METHOD: &str = "create";
pub const INVOKE_METHOD: &str = "invoke";
pub const SUBSCRIBE_METHOD: &str = "subscribe";
pub const UNSUBSCRIBE_METHOD: &str = "unsubscribe";
pub const RELEASE_METHOD: &str = "release";
pub const KEEPALIVE_METHOD: &str = "keepAlive";
pub const ONEVENT_METHOD: &str = "onEvent";

/// Wire parameter keys.
pub const TYPE_PROPERTY: &str = "type";
pub const CONSTRUCTOR_PARAMS_PROPERTY: &str = "constructorParams";
pub const OBJECT_PROPERTY: &str = "object";
pub const OPERATION_PROPERTY: &str = "operation";
pub const OPERATION_PARAMS_PROPERTY: &str = "operationParams";
pub const SUBSCRIPTION_PROPERTY: &str = "subscription";
pub const DATA_PROPERTY: &str = "data";

#[derive(Debug, Clone)]
pub enum RomOperation {
    Create {
        remote_class: String,
        constructor_params: Props,
    },
    Invoke {
        object: String,
        operation: String,
        operation_params: Props,
    },
    Subscribe {
        object: String,
        event_type: String,
    },
    Unsubscribe {
        object: String,
        subscription: String,
    },
    Release {
        object: String,
    },
    KeepAlive {
        object: String,
    },
}

impl RomOperation {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Create { .. } => CREATE_METHOD,
            Self::Invoke { .. } => INVOKE_METHOD,
            Self::Subscribe { .. } => SUBSCRIBE_METHOD,
            Self::Unsubscribe { .. } => UNSUBSCRIBE_METHOD,
            Self::Release { .. } => RELEASE_METHOD,
            Self::KeepAlive { .. } => KEEPALIVE_METHOD,
        }
    }

    /// The exact wire parameter object for this operation.
    pub fn params(&self) -> Value {
        match self {
            Self::Create {
                remote_class,
                constructor_params,
            } => json!({
                TYPE_PROPERTY: remote_class,
                CONSTRUCTOR_PARAMS_PROPERTY: constructor_params,
            }),
            Self::Invoke {
                object,
                operation,
                operation_params,
            } => json!({
                OBJECT_PROPERTY: object,
                OPERATION_PROPERTY: operation,
                OPERATION_PARAMS_PROPERTY: operation_params,
            }),
            Self::Subscribe { object, event_type } => json!({
                OBJECT_PROPERTY: object,
                TYPE_PROPERTY: event_type,
            }),
            Self::Unsubscribe {
                object,
                subscription,
            } => json!({
                OBJECT_PROPERTY: object,
                SUBSCRIPTION_PROPERTY: subscription,
            }),
            Self::Release { object } => json!({ OBJECT_PROPERTY: object }),
            Self::KeepAlive { object } => json!({ OBJECT_PROPERTY: object }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_params_are_bit_exact() {
        let mut props = Props::new();
        props.insert("garbagePeriod".into(), json!(120));
        let op = RomOperation::Create {
            remote_class: "MediaPipeline".into(),
            constructor_params: props,
        };
        assert_eq!(op.method(), "create");
        assert_eq!(
            op.params(),
            json!({"type": "MediaPipeline", "constructorParams": {"garbagePeriod": 120}})
        );
    }

    #[test]
    fn invoke_params_carry_named_arguments() {
        let mut props = Props::new();
        props.insert("sdpOffer".into(), json!("v=0"));
        let op = RomOperation::Invoke {
            object: "1_MediaPipeline".into(),
            operation: "processOffer".into(),
            operation_params: props,
        };
        assert_eq!(
            op.params(),
            json!({
                "object": "1_MediaPipeline",
                "operation": "processOffer",
                "operationParams": {"sdpOffer": "v=0"},
            })
        );
    }

    #[test]
    fn subscribe_uses_type_key() {
        let op = RomOperation::Subscribe {
            object: "1_MediaPipeline".into(),
            event_type: "Error".into(),
        };
        assert_eq!(op.params(), json!({"object": "1_MediaPipeline", "type": "Error"}));
    }
}
