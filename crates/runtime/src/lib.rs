//! cdptun runtime - debugging connection, request executor and supervisor
//!
//! This crate bridges two links:
//!
//! - **Debugging link**: JSON commands and events exchanged with a remote
//!   browser's DevTools socket
//! - **Operator link**: binary tunnel frames exchanged with the operator relay
//!
//! # Architecture
//!
//! ```text
//! operator link ──frames──► C2Session ──► BrowserExecutor
//!                                               │
//! Supervisor (Lifecycle) ─────────────────► Connection ──► DevTools socket
//! ```
//!
//! [`Lifecycle`] is a pure state machine; [`Supervisor`] carries out its
//! actions over a [`Dialer`].

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod session;
pub mod supervisor;
pub mod transport;

// Re-export key types at crate root
pub use config::TunnelConfig;
pub use connection::{Connection, DEFAULT_COMMAND_TIMEOUT, EventWait};
pub use error::{Error, ErrorKind, Result};
pub use executor::{BrowserExecutor, DEFAULT_RESPONSE_TIMEOUT, RequestExecutor};
pub use lifecycle::{Action, C2State, DebugState, Lifecycle, LifecycleEvent};
pub use session::{C2Session, ServeExit};
pub use supervisor::{Dialer, Supervisor, attach_to_target, enable_interception};
pub use transport::{Payload, TransportParts, WebSocketTransport, memory_pair};
