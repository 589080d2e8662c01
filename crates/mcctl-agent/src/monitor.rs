use crate::external::Multiplexer;
use crate::publish::Publisher;
use mcctl_core::FrameDeduper;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

pub const TICK: Duration = Duration::from_secs(1);
pub const CAPTURE_BACKOFF: Duration = Duration::from_secs(5);
pub const STOP_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    pub tick: Duration,
    pub backoff: Duration,
    pub stop_wait: Duration,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            tick: TICK,
            backoff: CAPTURE_BACKOFF,
            stop_wait: STOP_WAIT,
        }
    }
}

/// Owned handle onto one running monitor loop.
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn stop(self, wait: Duration) {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        if tokio::time::timeout(wait, &mut task).await.is_err() {
            warn!(event = "monitor_stop_timeout", wait_ms = wait.as_millis() as u64);
            task.abort();
        }
    }
}

/// Streams the server session's screen to the terminal channel whenever it
/// changes. Start and stop are both idempotent.
pub struct TerminalMonitor {
    mux: Arc<dyn Multiplexer>,
    publisher: Publisher,
    session: String,
    timing: MonitorTiming,
    handle: Option<MonitorHandle>,
}

impl TerminalMonitor {
    pub fn new(mux: Arc<dyn Multiplexer>, publisher: Publisher, session: impl Into<String>) -> Self {
        Self {
            mux,
            publisher,
            session: session.into(),
            timing: MonitorTiming::default(),
            handle: None,
        }
    }

    pub fn with_timing(mut self, timing: MonitorTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(MonitorHandle::is_running)
    }

    pub fn start(&mut self) {
        if self.is_active() {
            info!(event = "monitor_already_running", session = %self.session);
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(
            self.mux.clone(),
            self.publisher.clone(),
            self.session.clone(),
            self.timing,
            shutdown_rx,
        ));
        self.handle = Some(MonitorHandle { shutdown, task });
        info!(event = "monitor_started", session = %self.session);
    }

    pub async fn stop(&mut self) {
        match self.handle.take() {
            Some(handle) => {
                handle.stop(self.timing.stop_wait).await;
                info!(event = "monitor_stopped", session = %self.session);
            }
            None => debug!(event = "monitor_not_running", session = %self.session),
        }
    }
}

async fn monitor_loop(
    mux: Arc<dyn Multiplexer>,
    publisher: Publisher,
    session: String,
    timing: MonitorTiming,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut deduper = FrameDeduper::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let delay = match mux.capture(&session).await {
            Ok(raw) => {
                if let Some(frame) = deduper.observe(&raw) {
                    publisher.terminal(frame);
                }
                timing.tick
            }
            Err(err) => {
                warn!(event = "monitor_capture_error", session = %session, error = %err);
                timing.backoff
            }
        };
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(event = "monitor_loop_exit", session = %session);
}
