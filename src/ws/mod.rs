//! WebSocket layer: wire protocol, connection hub and client sessions

pub mod handler;
pub mod hub;
pub mod protocol;
pub mod session;

pub use hub::{Hub, HubHandle};
pub use session::SessionContext;
