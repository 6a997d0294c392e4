//! Authenticated WebSocket session with fixed-backoff reconnect.
//!
//! Each `StreamSession` runs as a tokio task that cycles through
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Subscribing → Streaming
//!      ^                                                         |
//!      +---------------------- (error / close) ------------------+
//! ```
//!
//! and reaches `Stopped` only through [`StreamSession::stop`]. Every blocking
//! point (dial, backoff sleep, login wait, read) also waits on the shutdown
//! signal, so a stop request never waits for more than the join timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, trace, warn};

use super::dialer::{Dialer, WsLink};
use super::protocol::{DecodedFrame, FrameKind, StreamProtocol};
use crate::error::{GridError, GridResult};

/// Callback invoked for each data frame, on the session's read loop.
pub type FrameCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Lifecycle state, observable through [`StreamSession::subscribe_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
    Stopped,
}

/// Timing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed delay between reconnect attempts.
    pub backoff: Duration,
    /// Period between heartbeat frames while streaming.
    pub heartbeat_interval: Duration,
    /// How long to wait for the login acknowledgement.
    pub auth_timeout: Duration,
    /// Bound on joining the session task during [`StreamSession::stop`].
    pub stop_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters exposed for status pages and tests.
#[derive(Debug, Default)]
pub struct SessionStats {
    dial_attempts: AtomicU64,
    backoff_sleeps: AtomicU64,
    streaming_entries: AtomicU64,
    frames_dispatched: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SessionStats {
    pub fn dial_attempts(&self) -> u64 {
        self.dial_attempts.load(Ordering::Relaxed)
    }

    pub fn backoff_sleeps(&self) -> u64 {
        self.backoff_sleeps.load(Ordering::Relaxed)
    }

    /// Number of times the session reached `Streaming`.
    pub fn streaming_entries(&self) -> u64 {
        self.streaming_entries.load(Ordering::Relaxed)
    }

    pub fn frames_dispatched(&self) -> u64 {
        self.frames_dispatched.load(Ordering::Relaxed)
    }

    /// Unrecognized or undecodable frames.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

struct Running {
    shutdown_tx: watch::Sender<bool>,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// A resilient WebSocket session for one exchange stream.
pub struct StreamSession {
    config: SessionConfig,
    protocol: Arc<dyn StreamProtocol>,
    dialer: Arc<dyn Dialer>,
    state_tx: Arc<watch::Sender<SessionState>>,
    stats: Arc<SessionStats>,
    running: Option<Running>,
}

impl StreamSession {
    /// Create a new (not yet started) session.
    pub fn new(config: SessionConfig, protocol: Arc<dyn StreamProtocol>, dialer: Arc<dyn Dialer>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            protocol,
            dialer,
            state_tx: Arc::new(state_tx),
            stats: Arc::new(SessionStats::default()),
            running: None,
        }
    }

    pub fn label(&self) -> &str {
        self.protocol.label()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the session task. Data frames are forwarded to `on_frame`.
    ///
    /// Fails with [`GridError::StreamAlreadyRunning`] instead of opening a
    /// second connection.
    pub fn start(&mut self, on_frame: FrameCallback) -> GridResult<()> {
        if self.running.is_some() {
            return Err(GridError::StreamAlreadyRunning(self.label().to_string()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));
        let ctx = Context {
            label: self.label().to_string(),
            config: self.config.clone(),
            protocol: Arc::clone(&self.protocol),
            dialer: Arc::clone(&self.dialer),
            state_tx: Arc::clone(&self.state_tx),
            stats: Arc::clone(&self.stats),
            stopped: Arc::clone(&stopped),
            on_frame,
        };

        let task = tokio::spawn(session_loop(ctx, shutdown_rx));
        self.running = Some(Running { shutdown_tx, stopped, task });
        Ok(())
    }

    /// Stop the session and wait for its task to finish.
    ///
    /// Idempotent. Once this returns the frame callback is never invoked again.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.stopped.store(true, Ordering::Release);
        let _ = running.shutdown_tx.send(true);

        let mut task = running.task;
        if tokio::time::timeout(self.config.stop_timeout, &mut task).await.is_err() {
            warn!("[stream:{}] task did not stop within {:?}, aborting", self.label(), self.config.stop_timeout);
            task.abort();
            let _ = task.await;
        }
        self.state_tx.send_replace(SessionState::Stopped);
        info!("[stream:{}] stopped", self.label());
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stopped.store(true, Ordering::Release);
            let _ = running.shutdown_tx.send(true);
            running.task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct Context {
    label: String,
    config: SessionConfig,
    protocol: Arc<dyn StreamProtocol>,
    dialer: Arc<dyn Dialer>,
    state_tx: Arc<watch::Sender<SessionState>>,
    stats: Arc<SessionStats>,
    stopped: Arc<AtomicBool>,
    on_frame: FrameCallback,
}

impl Context {
    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn dispatch(&self, value: &Value) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        (self.on_frame)(value);
        self.stats.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn drop_frame(&self, raw: &str) {
        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        debug!("[stream:{}] dropping unrecognized frame: {}", self.label, preview(raw));
    }
}

enum LinkExit {
    Shutdown,
    Dropped(String),
}

async fn session_loop(ctx: Context, mut shutdown_rx: watch::Receiver<bool>) {
    let url = ctx.protocol.url().to_string();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        ctx.set_state(SessionState::Connecting);
        ctx.stats.dial_attempts.fetch_add(1, Ordering::Relaxed);
        info!("[stream:{}] connecting to {url}", ctx.label);

        let dialed = tokio::select! {
            res = ctx.dialer.dial(&url) => res,
            _ = shutdown_rx.changed() => break,
        };

        let exit = match dialed {
            Ok(link) => {
                info!("[stream:{}] connected", ctx.label);
                drive_link(&ctx, link, &mut shutdown_rx).await
            }
            Err(e) => LinkExit::Dropped(format!("connect failed: {e}")),
        };

        match exit {
            LinkExit::Shutdown => break,
            LinkExit::Dropped(reason) => {
                ctx.set_state(SessionState::Disconnected);
                warn!("[stream:{}] {reason}, reconnecting in {:?}", ctx.label, ctx.config.backoff);
                if !wait_backoff(&ctx, &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }

    ctx.set_state(SessionState::Stopped);
}

/// Sleep one backoff interval. Returns `false` when shutdown was requested.
async fn wait_backoff(ctx: &Context, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    ctx.stats.backoff_sleeps.fetch_add(1, Ordering::Relaxed);
    tokio::select! {
        _ = sleep(ctx.config.backoff) => true,
        _ = shutdown_rx.changed() => false,
    }
}

/// Authenticate, subscribe and stream on one connection until it drops.
async fn drive_link(ctx: &Context, link: WsLink, shutdown_rx: &mut watch::Receiver<bool>) -> LinkExit {
    let WsLink { mut sink, mut source } = link;

    // -- Authenticating --
    if let Some(login) = ctx.protocol.login_frame() {
        ctx.set_state(SessionState::Authenticating);
        if let Err(e) = sink.send(login).await {
            return LinkExit::Dropped(format!("login send failed: {e}"));
        }

        let deadline = sleep(ctx.config.auth_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    close_quietly(&mut sink).await;
                    return LinkExit::Shutdown;
                }
                _ = &mut deadline => {
                    close_quietly(&mut sink).await;
                    return LinkExit::Dropped(format!("no login ack within {:?}", ctx.config.auth_timeout));
                }
                frame = source.next() => {
                    let raw = match frame {
                        Some(Ok(raw)) => raw,
                        Some(Err(e)) => return LinkExit::Dropped(format!("read error during login: {e}")),
                        None => return LinkExit::Dropped("stream ended during login".into()),
                    };
                    match ctx.protocol.classify(DecodedFrame::decode(&raw)) {
                        FrameKind::LoginAck { success: true, .. } => {
                            info!("[stream:{}] login accepted", ctx.label);
                            break;
                        }
                        FrameKind::LoginAck { success: false, message } | FrameKind::Error { message } => {
                            close_quietly(&mut sink).await;
                            return LinkExit::Dropped(format!("login rejected: {}", message.unwrap_or_default()));
                        }
                        FrameKind::Data(value) => ctx.dispatch(&value),
                        FrameKind::Pong | FrameKind::SubscribeAck { .. } => {}
                        FrameKind::Unknown => ctx.drop_frame(&raw),
                    }
                }
            }
        }
    }

    // -- Subscribing --
    ctx.set_state(SessionState::Subscribing);
    for frame in ctx.protocol.subscribe_frames() {
        debug!("[stream:{}] subscribing: {frame}", ctx.label);
        if let Err(e) = sink.send(frame).await {
            return LinkExit::Dropped(format!("subscribe send failed: {e}"));
        }
    }

    // -- Streaming --
    ctx.set_state(SessionState::Streaming);
    ctx.stats.streaming_entries.fetch_add(1, Ordering::Relaxed);

    let period = ctx.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("[stream:{}] shutdown signal received", ctx.label);
                close_quietly(&mut sink).await;
                return LinkExit::Shutdown;
            }

            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(ctx.protocol.ping_frame()).await {
                    return LinkExit::Dropped(format!("heartbeat send failed: {e}"));
                }
                trace!("[stream:{}] ping sent", ctx.label);
            }

            frame = source.next() => {
                match frame {
                    Some(Ok(raw)) => {
                        if let Err(reason) = handle_frame(ctx, &raw) {
                            close_quietly(&mut sink).await;
                            return LinkExit::Dropped(reason);
                        }
                    }
                    Some(Err(e)) => {
                        error!("[stream:{}] read error: {e}", ctx.label);
                        return LinkExit::Dropped(format!("read error: {e}"));
                    }
                    None => return LinkExit::Dropped("stream ended".into()),
                }
            }
        }
    }
}

/// Route one frame received while streaming. `Err` forces a reconnect.
fn handle_frame(ctx: &Context, raw: &str) -> Result<(), String> {
    match ctx.protocol.classify(DecodedFrame::decode(raw)) {
        FrameKind::Pong => trace!("[stream:{}] pong", ctx.label),
        FrameKind::LoginAck { success, .. } => debug!("[stream:{}] late login ack (success={success})", ctx.label),
        FrameKind::SubscribeAck { channel, success: true, .. } => {
            debug!("[stream:{}] subscribed to {channel}", ctx.label)
        }
        FrameKind::SubscribeAck { channel, success: false, message } => {
            return Err(format!("subscription to {channel} rejected: {}", message.unwrap_or_default()));
        }
        FrameKind::Error { message } => {
            return Err(format!("venue error: {}", message.unwrap_or_default()));
        }
        FrameKind::Data(value) => ctx.dispatch(&value),
        FrameKind::Unknown => ctx.drop_frame(raw),
    }
    Ok(())
}

async fn close_quietly(sink: &mut super::dialer::WsSink) {
    let _ = tokio::time::timeout(Duration::from_secs(1), sink.close()).await;
}

fn preview(raw: &str) -> &str {
    match raw.char_indices().nth(200) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
