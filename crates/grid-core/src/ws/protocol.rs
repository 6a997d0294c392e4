//! Exchange-specific framing plugged into a [`StreamSession`](super::StreamSession).

use serde_json::Value;

/// An inbound frame after the generic decode step.
#[derive(Debug)]
pub enum DecodedFrame<'a> {
    /// The frame parsed as JSON.
    Json(Value),
    /// Not JSON (e.g. Bitget's bare `pong`).
    Text(&'a str),
}

impl<'a> DecodedFrame<'a> {
    pub fn decode(raw: &'a str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(raw),
        }
    }
}

/// What the session should do with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// Heartbeat reply.
    Pong,
    /// Answer to the login frame.
    LoginAck { success: bool, message: Option<String> },
    /// Answer to one subscription frame.
    SubscribeAck { channel: String, success: bool, message: Option<String> },
    /// Venue error not tied to a channel. Fails the login while
    /// authenticating and drops the link once streaming.
    Error { message: Option<String> },
    /// Application data for the registered callback.
    Data(Value),
    /// Anything else; logged and dropped.
    Unknown,
}

/// Per-exchange framing rules.
///
/// Implementations own the URL, sign login frames with a fresh timestamp and
/// classify every inbound frame. They hold no connection state.
pub trait StreamProtocol: Send + Sync + 'static {
    /// Label used in log lines (e.g. `"mexc-private"`).
    fn label(&self) -> &str;

    /// WebSocket endpoint.
    fn url(&self) -> &str;

    /// Signed login frame, or `None` for public streams.
    fn login_frame(&self) -> Option<String>;

    /// One frame per channel, sent after login succeeds.
    fn subscribe_frames(&self) -> Vec<String>;

    /// Heartbeat frame.
    fn ping_frame(&self) -> String;

    fn classify(&self, frame: DecodedFrame<'_>) -> FrameKind;
}
