//! Remote object model client over the core protocol engine.
//!
//! The server owns a graph of stateful objects; this crate gives the client
//! typed-enough handles to drive it: create and invoke by name, subscribe to
//! server-push events, and keep references alive with periodic keepalives
//! until they are released.
//!
//! [`RomFactory`] is the entry point; it wires the [`RomClient`], the
//! [`ObjectRegistry`] and the [`DistributedGarbageCollector`] over one
//! session.

pub mod client;
pub mod dgc;
pub mod events;
pub mod factory;
pub mod object;
pub mod ops;
pub mod registry;

pub use client::RomClient;
pub use dgc::{DgcConfig, DistributedGarbageCollector};
pub use events::RomEventRouter;
pub use factory::{CreateBuilder, RomFactory};
pub use object::{EventListener, RemoteEvent, RemoteObject};
pub use ops::{Props, RomOperation};
pub use registry::ObjectRegistry;
