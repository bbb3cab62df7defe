//! Engine: the control surface owning the tunnel lifecycle
//!
//! One engine value per process, no globals. A mutex-guarded state machine
//! (`Stopped → Starting → Running → Stopping → Stopped`) serializes the
//! lifecycle; the session slot has its own lock and is only ever taken
//! after the engine lock. Resource teardown always happens after the
//! engine lock is released, so callbacks that re-enter the engine cannot
//! deadlock.

use crate::config::ProxyType;
use crate::masquerade::TrafficCounters;
use crate::proxy::{self, ProxyContext};
use crate::session::{supervisor, SessionSlot};
use crate::split::SplitTunnel;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("already running")]
    AlreadyRunning,
}

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Default)]
struct EngineInner {
    state: ControlState,
    stop_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// The tunnel engine
pub struct Engine {
    inner: Mutex<EngineInner>,
    slot: Arc<SessionSlot>,
    split: Arc<SplitTunnel>,
    counters: Arc<TrafficCounters>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EngineInner::default()),
            slot: Arc::new(SessionSlot::new()),
            split: Arc::new(SplitTunnel::new()),
            counters: Arc::new(TrafficCounters::default()),
        }
    }

    /// Start the supervisor and the local proxy.
    ///
    /// Returns as soon as both tasks are spawned; the first dial happens
    /// asynchronously. A proxy bind failure triggers an internal [`stop`].
    ///
    /// [`stop`]: Engine::stop
    pub fn start(
        self: &Arc<Self>,
        local_port: &str,
        server: &str,
        password: &str,
        proxy_type: ProxyType,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ControlState::Stopped {
            return Err(EngineError::AlreadyRunning);
        }
        inner.state = ControlState::Starting;

        // A residual session can only exist after an unclean teardown.
        self.slot.clear();

        let (stop_tx, stop_rx) = watch::channel(false);
        let bind_addr = normalize_listen_addr(local_port);

        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(supervisor::run(
            Arc::clone(&self.slot),
            server.to_string(),
            password.to_string(),
            Arc::clone(&self.counters),
            stop_rx,
        )));

        let engine = Arc::clone(self);
        let ctx = Arc::new(ProxyContext {
            slot: Arc::clone(&self.slot),
            split: Arc::clone(&self.split),
        });
        tasks.push(tokio::spawn(async move {
            let listener = match TcpListener::bind(&bind_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("proxy listen failed on {bind_addr}: {e}");
                    engine.stop();
                    return;
                }
            };
            info!("listening for {proxy_type} on {bind_addr}");
            match proxy_type {
                ProxyType::Socks5 => proxy::socks5::run(listener, ctx).await,
                ProxyType::Http => proxy::http::run(listener, ctx).await,
            }
        }));

        inner.stop_tx = Some(stop_tx);
        inner.tasks = tasks;
        inner.state = ControlState::Running;
        info!(%server, "engine started");
        Ok(())
    }

    /// Stop everything: proxy listener, supervisor, current session.
    /// No-op unless running.
    pub fn stop(&self) {
        let (stop_tx, tasks) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != ControlState::Running {
                return;
            }
            inner.state = ControlState::Stopping;
            (inner.stop_tx.take(), std::mem::take(&mut inner.tasks))
        };

        // Closes happen outside the engine lock.
        if let Some(tx) = stop_tx {
            let _ = tx.send(true);
        }
        for task in tasks {
            // Aborting the proxy task drops its listener; the supervisor
            // also honors the stop signal on its own.
            task.abort();
        }
        // The session goes last so in-flight proxy requests see a closed
        // listener before a dead tunnel.
        self.slot.clear();

        self.inner.lock().unwrap().state = ControlState::Stopped;
        info!("engine stopped");
    }

    /// Whether the engine is in the running state.
    pub fn is_active(&self) -> bool {
        self.inner.lock().unwrap().state == ControlState::Running
    }

    /// TCP round-trip latency to `server` in milliseconds, `-1` on error.
    /// Independent of session state.
    pub async fn ping(server: &str) -> i64 {
        let start = std::time::Instant::now();
        match tokio::time::timeout(PING_TIMEOUT, TcpStream::connect(server)).await {
            Ok(Ok(conn)) => {
                drop(conn);
                start.elapsed().as_millis() as i64
            }
            _ => -1,
        }
    }

    /// Replace the split-tunnel rules from a comma-separated path list.
    /// Safe in any state.
    pub fn update_split_rules(&self, rules: &str) {
        let paths: Vec<&str> = rules
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        self.split.update_rules(&paths);
    }

    /// Lifetime (uploaded, downloaded) plaintext byte counters.
    pub fn stats(&self) -> (u64, u64) {
        self.counters.snapshot()
    }
}

/// Accept the port forms the desktop wrapper sends: `":1080"` binds all
/// interfaces, a bare port binds loopback, anything else is used verbatim.
fn normalize_listen_addr(local_port: &str) -> String {
    if let Some(port) = local_port.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else if local_port.contains(':') {
        local_port.to_string()
    } else {
        format!("127.0.0.1:{local_port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr(":1080"), "0.0.0.0:1080");
        assert_eq!(normalize_listen_addr("1080"), "127.0.0.1:1080");
        assert_eq!(normalize_listen_addr("0.0.0.0:1080"), "0.0.0.0:1080");
    }

    #[tokio::test]
    async fn test_ping_unreachable() {
        // TEST-NET-1 is guaranteed unroutable.
        assert_eq!(Engine::ping("192.0.2.1:25565").await, -1);
    }
}
