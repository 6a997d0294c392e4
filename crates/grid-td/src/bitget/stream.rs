//! Bitget V2 WebSocket framing.
//!
//! The heartbeat is the bare text `ping`, answered by bare `pong`. Control
//! replies carry an `event` field (`login`, `subscribe`, `error`); data
//! pushes carry `arg` plus a `data` array.

use serde_json::{Value, json};

use grid_core::time_util::Clock;
use grid_core::ws::{DecodedFrame, FrameKind, StreamProtocol};

use super::config::PRODUCT_TYPE;
use crate::signer::Signer;

pub struct BitgetStreamProtocol {
    label: &'static str,
    url: String,
    login: Option<(Signer, String, Clock)>,
    subscriptions: Vec<String>,
}

fn subscribe_frame(channel: &str, inst_id: &str) -> String {
    json!({"op": "subscribe", "args": [{"instType": PRODUCT_TYPE, "channel": channel, "instId": inst_id}]}).to_string()
}

impl BitgetStreamProtocol {
    /// Authenticated `orders` and `positions` channels for all symbols.
    pub fn private(url: &str, signer: Signer, passphrase: &str, clock: Clock) -> Self {
        Self {
            label: "bitget-private",
            url: url.to_string(),
            login: Some((signer, passphrase.to_string(), clock)),
            subscriptions: vec![subscribe_frame("orders", "default"), subscribe_frame("positions", "default")],
        }
    }

    /// `ticker` and candle channels per venue symbol.
    pub fn public(url: &str, venue_symbols: &[String], candle_channel: &str) -> Self {
        let subscriptions = venue_symbols
            .iter()
            .flat_map(|symbol| [subscribe_frame("ticker", symbol), subscribe_frame(candle_channel, symbol)])
            .collect();
        Self { label: "bitget-public", url: url.to_string(), login: None, subscriptions }
    }
}

fn code_is_zero(value: &Value) -> bool {
    match value.get("code") {
        None => true,
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::String(s)) => s == "0",
        Some(_) => false,
    }
}

impl StreamProtocol for BitgetStreamProtocol {
    fn label(&self) -> &str {
        self.label
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn login_frame(&self) -> Option<String> {
        let (signer, passphrase, clock) = self.login.as_ref()?;
        let timestamp = (clock() / 1_000).to_string();
        let sign = signer.sign_payload(&format!("{timestamp}GET/user/verify"));
        Some(
            json!({
                "op": "login",
                "args": [{"apiKey": signer.api_key(), "passphrase": passphrase, "timestamp": timestamp, "sign": sign}],
            })
            .to_string(),
        )
    }

    fn subscribe_frames(&self) -> Vec<String> {
        self.subscriptions.clone()
    }

    fn ping_frame(&self) -> String {
        "ping".into()
    }

    fn classify(&self, frame: DecodedFrame<'_>) -> FrameKind {
        let value = match frame {
            DecodedFrame::Text(text) if text.trim() == "pong" => return FrameKind::Pong,
            DecodedFrame::Text(_) => return FrameKind::Unknown,
            DecodedFrame::Json(value) => value,
        };
        let message = value.get("msg").and_then(Value::as_str).filter(|m| !m.is_empty()).map(str::to_string);
        let arg_channel = value.pointer("/arg/channel").and_then(Value::as_str).map(str::to_string);

        match value.get("event").and_then(Value::as_str) {
            Some("login") => FrameKind::LoginAck { success: code_is_zero(&value), message },
            Some("subscribe") => FrameKind::SubscribeAck {
                channel: arg_channel.unwrap_or_default(),
                success: code_is_zero(&value),
                message,
            },
            Some("error") => match arg_channel {
                Some(channel) => FrameKind::SubscribeAck { channel, success: false, message },
                None => FrameKind::Error { message },
            },
            Some(_) => FrameKind::Unknown,
            None if arg_channel.is_some() && value.get("data").is_some() => FrameKind::Data(value),
            None => FrameKind::Unknown,
        }
    }
}
