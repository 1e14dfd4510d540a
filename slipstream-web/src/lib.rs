//! Slipstream HTTP surface.
//!
//! Thin JSON/byte-range layer over the core gateway: every handler
//! translates one request into gateway operations and maps session errors
//! onto HTTP status codes.

pub mod handlers;
pub mod server;

pub use server::{AppState, build_router, run_server};
