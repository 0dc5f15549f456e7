//! Error codes and error types.

use core::fmt;

use serde_json::Value;

/// JSON-RPC error codes used on the wire.
///
/// The `-32700..=-32600` block is reserved by the JSON-RPC 2.0 spec.
/// The `-32099..=-32000` block is the server-error range; object-liveness
/// errors reported by the remote object server live there.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const SERVER_ERROR_MAX: i64 = -32000;
    pub const SERVER_ERROR_MIN: i64 = -32099;

    /// The remote object referenced by a request no longer exists.
    pub const OBJECT_NOT_FOUND: i64 = -32000;

    /// Session resumption was attempted with an unknown or missing session id.
    /// The odd value is historical; peers match on it, so it stays.
    pub const INVALID_SESSION: i64 = 99999;

    /// True if `code` signals that a remote object is gone.
    ///
    /// The whole server-error range counts: different server versions report
    /// stale references with different codes inside it.
    pub fn is_object_not_found(code: i64) -> bool {
        (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code)
    }
}

/// Transport-level errors.
#[derive(Debug)]
pub enum TransportError {
    /// The channel is gone and cannot deliver any more messages.
    Closed,
    /// The peer actively refused a new connection. This is the only failure
    /// class eligible for a transparent single retry.
    ConnectionRefused,
    Io(std::io::Error),
    /// The transport delivered something that is not a text frame.
    BadFrame(String),
}

impl TransportError {
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::ConnectionRefused => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BadFrame(msg) => write!(f, "bad frame: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::ConnectionRefused {
            Self::ConnectionRefused
        } else {
            Self::Io(e)
        }
    }
}

/// Violations of the message protocol itself, as opposed to errors a peer
/// reports inside a well-formed response. Always fatal to the affected call.
#[derive(Debug)]
pub enum ProtocolError {
    /// The frame is not a JSON-RPC 2.0 request or response.
    MalformedMessage(String),
    /// A response carried a payload whose shape does not match what the
    /// operation requires (e.g. a JSON array where a scalar is expected).
    UnexpectedValue {
        expected: &'static str,
        found: String,
    },
    /// A response referenced a remote object this client has never seen.
    UnknownObject(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Self::UnexpectedValue { expected, found } => {
                write!(f, "unexpected value: expected {expected}, found {found}")
            }
            Self::UnknownObject(object_ref) => {
                write!(f, "unknown remote object reference '{object_ref}'")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// High-level RPC errors surfaced to callers.
#[derive(Debug)]
pub enum RpcError {
    Transport(TransportError),
    /// An error object reported by the peer inside a response.
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    Protocol(ProtocolError),
    /// A second attempt to respond to the same transaction.
    AlreadyResponded,
    /// The pending-call table is full; the call was refused locally.
    TooManyPending,
    /// The per-call timeout elapsed before a response arrived. The pending
    /// entry is abandoned locally; a late response is discarded.
    Timeout,
}

impl RpcError {
    /// Build a server error from an error object's fields.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// True if this is a peer-reported "object not found" error.
    pub fn is_object_not_found(&self) -> bool {
        matches!(self, Self::Server { code, .. } if codes::is_object_not_found(*code))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Server { code, message, .. } => write!(f, "server error {code}: {message}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::AlreadyResponded => write!(f, "request already responded"),
            Self::TooManyPending => write!(f, "too many pending requests"),
            Self::Timeout => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for RpcError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
