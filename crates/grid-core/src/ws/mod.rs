//! WebSocket session with login, subscriptions, heartbeat and reconnect.

pub mod dialer;
pub mod protocol;
pub mod session;

pub use dialer::{Dialer, TungsteniteDialer, WsLink, WsSink, WsSource};
pub use protocol::{DecodedFrame, FrameKind, StreamProtocol};
pub use session::{FrameCallback, SessionConfig, SessionState, SessionStats, StreamSession};
