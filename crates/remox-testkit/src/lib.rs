//! remox-testkit: in-process harness for exercising remox sessions.
//!
//! Everything runs over the mem transport: directly linked session pairs for
//! protocol-level tests, a listener-backed server for reconnection tests, and
//! [`RomServerMock`], a scripted remote object server that allocates refs
//! like `"1_MediaPipeline"`, counts keepalives and can push events.
//!
//! # Usage
//!
//! ```ignore
//! let mock = RomServerMock::new();
//! let dialer = spawn_rom_server(Arc::clone(&mock));
//! let client = connect_client(&dialer, SessionConfig::default());
//! ```

pub mod handlers;
pub mod harness;
pub mod mock;

pub use handlers::{EchoHandler, register_session_info};
pub use harness::{connect_client, session_pair, session_pair_with, spawn_server};
pub use mock::{RomServerMock, spawn_rom_server};
