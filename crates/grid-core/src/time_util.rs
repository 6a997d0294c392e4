//! Wall-clock helpers.
//!
//! Exchange signatures and last-write-wins ordering both work in
//! **milliseconds** since the Unix epoch. Components that need a timestamp
//! take a [`Clock`] so tests can pin time.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Injectable millisecond clock.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Current time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}

/// Current time as **seconds** since Unix epoch (Bitget WS login).
#[inline]
pub fn now_secs() -> u64 {
    now_ms() / 1_000
}

/// Clock backed by the system wall clock.
pub fn system_clock() -> Clock {
    Arc::new(now_ms)
}

/// Clock frozen at `ms`.
pub fn fixed_clock(ms: u64) -> Clock {
    Arc::new(move || ms)
}
