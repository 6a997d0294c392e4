//! Guarded stream handles shared by the adapters.

use std::sync::Arc;

use grid_core::config::AccountConfig;
use grid_core::ws::{Dialer, FrameCallback, SessionConfig, StreamProtocol, StreamSession, TungsteniteDialer};
use grid_core::{GridError, GridResult};
use tokio::sync::Mutex;

/// Session timing plus the transport used to open connections.
#[derive(Clone)]
pub struct StreamSettings {
    pub session: SessionConfig,
    pub dialer: Arc<dyn Dialer>,
}

impl StreamSettings {
    pub fn from_account(config: &AccountConfig) -> Self {
        Self {
            session: SessionConfig {
                backoff: config.reconnect_backoff(),
                heartbeat_interval: config.heartbeat_interval(),
                auth_timeout: config.auth_timeout(),
                ..SessionConfig::default()
            },
            dialer: Arc::new(TungsteniteDialer),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { session: SessionConfig::default(), dialer: Arc::new(TungsteniteDialer) }
    }
}

/// At most one running [`StreamSession`] per slot.
pub struct StreamSlot {
    label: &'static str,
    session: Mutex<Option<StreamSession>>,
}

impl StreamSlot {
    pub fn new(label: &'static str) -> Self {
        Self { label, session: Mutex::new(None) }
    }

    /// Start a session unless one is already running.
    pub async fn start(
        &self,
        settings: &StreamSettings,
        protocol: Arc<dyn StreamProtocol>,
        on_frame: FrameCallback,
    ) -> GridResult<()> {
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(StreamSession::is_running) {
            return Err(GridError::StreamAlreadyRunning(self.label.to_string()));
        }
        let mut session = StreamSession::new(settings.session.clone(), protocol, Arc::clone(&settings.dialer));
        session.start(on_frame)?;
        *guard = Some(session);
        Ok(())
    }

    /// Stop the running session, if any.
    pub async fn stop(&self) {
        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            session.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.as_ref().is_some_and(StreamSession::is_running)
    }
}
