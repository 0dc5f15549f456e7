//! JSON-RPC 2.0 message model.
//!
//! A [`Request`] with an id expects exactly one [`Response`] with the same id;
//! a request without an id is a notification and never produces a response.
//!
//! Session ids ride inside the envelope transparently: a request's session id
//! is injected into `params.sessionId`, and a response's session id into the
//! result object (wrapping a non-object result as `{"value": ..,
//! "sessionId": ..}`). Application code never sees those keys; decoding strips
//! them back out. This wrapping is why scalar results can arrive inside a
//! `{"value": ...}` envelope.

use serde_json::{Map, Value, json};

use crate::ProtocolError;

pub const JSON_RPC_VERSION: &str = "2.0";

pub const JSON_RPC_PROPERTY: &str = "jsonrpc";
pub const METHOD_PROPERTY: &str = "method";
pub const PARAMS_PROPERTY: &str = "params";
pub const RESULT_PROPERTY: &str = "result";
pub const ERROR_PROPERTY: &str = "error";
pub const ID_PROPERTY: &str = "id";
pub const SESSION_ID_PROPERTY: &str = "sessionId";
pub const VALUE_PROPERTY: &str = "value";

/// Reserved method names handled by the protocol layer itself.
pub const METHOD_PING: &str = "ping";
pub const METHOD_CONNECT: &str = "connect";
pub const PONG: &str = "pong";
pub const RECONNECTION_SUCCESSFUL: &str = "OK";

/// An inbound or outbound JSON-RPC message.
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Parse a text frame. Classification follows the `method` property:
    /// present means request (or notification), absent means response.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;
        let Value::Object(obj) = value else {
            return Err(ProtocolError::MalformedMessage(format!(
                "expected a JSON object, got: {text}"
            )));
        };
        if obj.contains_key(METHOD_PROPERTY) {
            Request::from_object(obj).map(Message::Request)
        } else {
            Response::from_object(obj).map(Message::Response)
        }
    }
}

/// A JSON-RPC request or notification.
///
/// `id == None` is the notification signal: no response is expected and none
/// may ever be sent.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Option<u64>,
    pub method: String,
    pub params: Option<Value>,
    pub session_id: Option<String>,
}

impl Request {
    pub fn new(id: Option<u64>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            session_id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    fn from_object(mut obj: Map<String, Value>) -> Result<Self, ProtocolError> {
        let method = match obj.remove(METHOD_PROPERTY) {
            Some(Value::String(m)) => m,
            other => {
                return Err(ProtocolError::MalformedMessage(format!(
                    "request method must be a string, got {other:?}"
                )));
            }
        };
        let id = decode_id(obj.remove(ID_PROPERTY))?;
        let mut params = obj.remove(PARAMS_PROPERTY);
        let session_id = extract_session_id(params.as_mut());
        Ok(Self {
            id,
            method,
            params,
            session_id,
        })
    }

    /// Encode to the wire object, injecting the session id into `params`.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(JSON_RPC_PROPERTY.into(), json!(JSON_RPC_VERSION));
        if let Some(id) = self.id {
            obj.insert(ID_PROPERTY.into(), json!(id));
        }
        obj.insert(METHOD_PROPERTY.into(), json!(self.method));

        let params = match (&self.params, &self.session_id) {
            (Some(p), Some(sid)) => Some(inject_session_id(p.clone(), sid)),
            (Some(p), None) => Some(p.clone()),
            (None, Some(sid)) => Some(json!({ SESSION_ID_PROPERTY: sid })),
            (None, None) => None,
        };
        if let Some(params) = params {
            obj.insert(PARAMS_PROPERTY.into(), params);
        }
        Value::Object(obj)
    }

    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

/// A JSON-RPC response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<ResponseError>,
    pub session_id: Option<String>,
}

impl Response {
    pub fn ok(id: Option<u64>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            session_id: None,
        }
    }

    pub fn err(id: Option<u64>, error: ResponseError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    fn from_object(mut obj: Map<String, Value>) -> Result<Self, ProtocolError> {
        let id = decode_id(obj.remove(ID_PROPERTY))?;
        let error = match obj.remove(ERROR_PROPERTY) {
            Some(v) if !v.is_null() => Some(ResponseError::from_value(v)?),
            _ => None,
        };
        let mut result = obj.remove(RESULT_PROPERTY);
        if result.is_some() && error.is_some() {
            return Err(ProtocolError::MalformedMessage(
                "response carries both result and error".into(),
            ));
        }
        if result.is_none() && error.is_none() {
            return Err(ProtocolError::MalformedMessage(
                "response carries neither result nor error".into(),
            ));
        }
        let session_id = extract_session_id(result.as_mut());
        Ok(Self {
            id,
            result,
            error,
            session_id,
        })
    }

    /// Encode to the wire object, carrying the session id inside the result.
    ///
    /// A non-object result is wrapped as `{"value": result, "sessionId": sid}`
    /// so the session id always has an object to live in.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert(JSON_RPC_PROPERTY.into(), json!(JSON_RPC_VERSION));
        if let Some(id) = self.id {
            obj.insert(ID_PROPERTY.into(), json!(id));
        }
        if let Some(error) = &self.error {
            obj.insert(ERROR_PROPERTY.into(), error.to_value());
        } else {
            let result = self.result.clone().unwrap_or(Value::Null);
            let result = match &self.session_id {
                Some(sid) => inject_session_id(result, sid),
                None => result,
            };
            obj.insert(RESULT_PROPERTY.into(), result);
        }
        Value::Object(obj)
    }

    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }

    /// Consume the response, turning the peer's error object into `Err`.
    pub fn into_result(self) -> Result<Value, crate::RpcError> {
        match self.error {
            Some(e) => Err(crate::RpcError::Server {
                code: e.code,
                message: e.message,
                data: e.data,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// The JSON-RPC error object: `{"code": .., "message": .., "data": ..}`.
#[derive(Debug, Clone)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::MalformedMessage(format!(
                "error must be an object, got {value}"
            )));
        };
        let code = obj
            .remove("code")
            .and_then(|c| c.as_i64())
            .ok_or_else(|| ProtocolError::MalformedMessage("error without integer code".into()))?;
        let message = match obj.remove("message") {
            Some(Value::String(m)) => m,
            _ => String::new(),
        };
        Ok(Self {
            code,
            message,
            data: obj.remove("data"),
        })
    }

    fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("code".into(), json!(self.code));
        obj.insert("message".into(), json!(self.message));
        if let Some(data) = &self.data {
            obj.insert("data".into(), data.clone());
        }
        Value::Object(obj)
    }
}

fn decode_id(id: Option<Value>) -> Result<Option<u64>, ProtocolError> {
    match id {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            ProtocolError::MalformedMessage(format!("id must be a non-negative integer, got {n}"))
        }),
        Some(other) => Err(ProtocolError::MalformedMessage(format!(
            "id must be an integer, got {other}"
        ))),
    }
}

fn inject_session_id(value: Value, session_id: &str) -> Value {
    match value {
        Value::Object(mut obj) => {
            obj.insert(SESSION_ID_PROPERTY.into(), json!(session_id));
            Value::Object(obj)
        }
        other => json!({ VALUE_PROPERTY: other, SESSION_ID_PROPERTY: session_id }),
    }
}

fn extract_session_id(value: Option<&mut Value>) -> Option<String> {
    let Value::Object(obj) = value? else {
        return None;
    };
    match obj.remove(SESSION_ID_PROPERTY) {
        Some(Value::String(sid)) => Some(sid),
        _ => None,
    }
}
