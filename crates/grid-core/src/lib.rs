//! # grid-core
//!
//! Core crate for the grid slot sync system, providing:
//!
//! - **Types** (`types`): canonical orders, positions, accounts, market data and slot enums
//! - **Configuration** (`config`): JSON config deserialization and startup validation
//! - **Error types** (`error`): exchange-facing `GridError` via thiserror
//! - **WebSocket** (`ws`): `StreamSession` state machine with login, heartbeat and reconnect
//! - **Time utilities** (`time_util`): millisecond timestamps and injectable clocks
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use error::{GridError, GridResult};
pub use types::*;
