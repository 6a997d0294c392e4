//! MEXC edge WebSocket framing.
//!
//! Frames are JSON objects keyed by `method` (outbound) or `channel`
//! (inbound). Replies to requests use `rs.*` channels; pushes use `push.*`.
//!
//! | Direction | Frame                                                          |
//! |-----------|----------------------------------------------------------------|
//! | out       | `{"method":"login","param":{apiKey,reqTime,signature}}`         |
//! | out       | `{"method":"sub.personal.order"}` / `sub.personal.position`    |
//! | out       | `{"method":"sub.ticker","param":{symbol}}`                      |
//! | out       | `{"method":"sub.kline","param":{symbol,interval}}`              |
//! | out       | `{"method":"ping"}`                                            |
//! | in        | `{"channel":"pong"}`                                           |
//! | in        | `{"channel":"rs.login","data":"success"}`                      |
//! | in        | `{"channel":"rs.error","data":"..."}`                          |
//! | in        | `{"channel":"rs.sub.kline","data":"success"}`                  |
//! | in        | `{"channel":"push.personal.order","data":{...}}`               |

use serde_json::{Value, json};

use grid_core::time_util::Clock;
use grid_core::ws::{DecodedFrame, FrameKind, StreamProtocol};

use crate::signer::Signer;

pub struct MexcStreamProtocol {
    label: &'static str,
    url: String,
    signer: Option<Signer>,
    clock: Option<Clock>,
    subscriptions: Vec<String>,
}

impl MexcStreamProtocol {
    /// Authenticated stream carrying personal order and position pushes.
    pub fn private(url: &str, signer: Signer, clock: Clock) -> Self {
        Self {
            label: "mexc-private",
            url: url.to_string(),
            signer: Some(signer),
            clock: Some(clock),
            subscriptions: vec![
                json!({"method": "sub.personal.order"}).to_string(),
                json!({"method": "sub.personal.position"}).to_string(),
            ],
        }
    }

    /// Public ticker and kline pushes for venue symbols.
    pub fn public(url: &str, venue_symbols: &[String], interval_token: &str) -> Self {
        let subscriptions = venue_symbols
            .iter()
            .flat_map(|symbol| {
                [
                    json!({"method": "sub.ticker", "param": {"symbol": symbol}}).to_string(),
                    json!({"method": "sub.kline", "param": {"symbol": symbol, "interval": interval_token}}).to_string(),
                ]
            })
            .collect();
        Self { label: "mexc-public", url: url.to_string(), signer: None, clock: None, subscriptions }
    }
}

impl StreamProtocol for MexcStreamProtocol {
    fn label(&self) -> &str {
        self.label
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn login_frame(&self) -> Option<String> {
        let (signer, clock) = (self.signer.as_ref()?, self.clock.as_ref()?);
        let req_time = clock().to_string();
        let signature = signer.sign_payload(&format!("{}{req_time}", signer.api_key()));
        Some(
            json!({
                "method": "login",
                "param": {"apiKey": signer.api_key(), "reqTime": req_time, "signature": signature},
            })
            .to_string(),
        )
    }

    fn subscribe_frames(&self) -> Vec<String> {
        self.subscriptions.clone()
    }

    fn ping_frame(&self) -> String {
        json!({"method": "ping"}).to_string()
    }

    fn classify(&self, frame: DecodedFrame<'_>) -> FrameKind {
        let DecodedFrame::Json(value) = frame else {
            return FrameKind::Unknown;
        };
        let Some(channel) = value.get("channel").or_else(|| value.get("method")).and_then(Value::as_str) else {
            return FrameKind::Unknown;
        };
        let data_text = || value.get("data").and_then(Value::as_str).map(str::to_string);
        match channel {
            "pong" => FrameKind::Pong,
            "rs.login" => {
                FrameKind::LoginAck { success: data_text().as_deref() == Some("success"), message: data_text() }
            }
            "rs.error" => FrameKind::Error { message: data_text() },
            c if c.starts_with("rs.sub.") => FrameKind::SubscribeAck {
                channel: c.trim_start_matches("rs.").to_string(),
                success: data_text().as_deref() == Some("success"),
                message: data_text(),
            },
            c if c.starts_with("push.") => FrameKind::Data(value),
            _ => FrameKind::Unknown,
        }
    }
}
