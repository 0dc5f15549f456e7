//! Core JSON-RPC 2.0 protocol engine: message model, transports, sessions
//! and request dispatch.
//!
//! The layering is strict. A [`Transport`] moves whole text frames and knows
//! nothing about JSON. The [`message`] module gives those frames meaning. An
//! [`RpcSession`] multiplexes calls over one transport and recovers the
//! logical session across connection loss. The [`Dispatcher`] serves the
//! other direction, turning inbound requests into handler invocations with
//! exactly-once responses.
//!
//! Higher-level object semantics live in separate crates on top of this one.

pub mod dispatcher;
mod error;
pub mod message;
pub mod reconnect;
pub mod session;
pub mod transaction;
pub mod transport;

pub use error::{ProtocolError, RpcError, TransportError, codes};

pub use dispatcher::{Dispatcher, DispatcherConfig, RequestHandler, ServerSession};
pub use message::{Message, Request, Response, ResponseError};
pub use reconnect::{ConnectionState, ReconnectConfig};
pub use session::{RetryPolicy, RpcSession, SessionConfig};
pub use transaction::Transaction;
pub use transport::Transport;
