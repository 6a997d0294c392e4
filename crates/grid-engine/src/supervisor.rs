//! Owner of the long-running loops.
//!
//! Every loop receives a clone of the shutdown `watch` receiver. Shutdown
//! flips the flag, then joins each task against one shared deadline and
//! aborts whatever is still running when it passes.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct TaskSupervisor {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx, tasks: Vec::new() }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!("[supervisor] spawned {name}");
        self.tasks.push((name, tokio::spawn(future)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal shutdown and join all tasks within `timeout`. Returns how many
    /// had to be aborted.
    pub async fn shutdown(self, timeout: Duration) -> usize {
        self.shutdown_tx.send_replace(true);
        let deadline = Instant::now() + timeout;
        let mut aborted = 0;
        for (name, mut task) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("[supervisor] {name} ended abnormally: {e}"),
                Err(_) => {
                    warn!("[supervisor] {name} did not stop within {timeout:?}, aborting");
                    task.abort();
                    aborted += 1;
                }
            }
        }
        info!("[supervisor] shutdown complete, {aborted} aborted");
        aborted
    }
}
