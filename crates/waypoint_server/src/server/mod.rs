//! Server implementation: the accept loop and per-connection sessions.

pub mod core;
pub mod handlers;
pub mod session;

pub use self::core::RelayServer;
pub use session::{Session, SessionEnd, SessionSettings, SessionState};
