//! remox: a control-plane protocol engine for driving remote stateful
//! object servers over JSON-RPC 2.0.
//!
//! The facade re-exports the two layers:
//!
//! - [`remox_core`]: JSON-RPC message model, transports, client sessions
//!   with reconnection, and the server-side request dispatcher.
//! - [`remox_rom`]: the remote object model layered on it: create and invoke
//!   by name, server-push events, and keepalive-based distributed GC.
//!
//! # Example
//!
//! ```ignore
//! use remox::prelude::*;
//!
//! let transport = Transport::websocket("ws://localhost:8888/control").await?;
//! let session = RpcSession::new(transport, SessionConfig::default());
//! tokio::spawn(Arc::clone(&session).run());
//!
//! let factory = RomFactory::new(session, DgcConfig::default());
//! let pipeline = factory.build("MediaPipeline").build().await?;
//! let endpoint = factory
//!     .invoke(&pipeline, "newEndpoint", Props::new())
//!     .await?;
//! ```

pub use remox_core as core;
pub use remox_rom as rom;

pub use remox_core::{
    ConnectionState, Dispatcher, DispatcherConfig, Message, ProtocolError, ReconnectConfig,
    Request, RequestHandler, Response, ResponseError, RetryPolicy, RpcError, RpcSession,
    ServerSession, SessionConfig, Transaction, Transport, TransportError, codes,
};
pub use remox_rom::{
    CreateBuilder, DgcConfig, DistributedGarbageCollector, EventListener, ObjectRegistry, Props,
    RemoteEvent, RemoteObject, RomClient, RomFactory, RomOperation,
};

pub mod prelude {
    pub use crate::{
        DgcConfig, Dispatcher, DispatcherConfig, EventListener, Props, RemoteEvent, RemoteObject,
        RequestHandler, RetryPolicy, RomClient, RomFactory, RpcError, RpcSession, SessionConfig,
        Transaction, Transport,
    };
}
