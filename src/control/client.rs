//! Control-channel client: registers the tunnel, holds the long-lived
//! signal connection open, reacts to `PING`/`CONNECT` lines, and
//! reconnects with exponential backoff when the connection drops.
//!
//! Grounded in `router-core::service::registry::client`'s shape (one
//! background task that blocks reading a stream forever and dispatches on
//! message content) and `router-core::system::terminator`'s
//! flag-plus-notify shutdown idiom, generalized to a TCP line protocol with
//! its own reconnect state machine instead of a single always-connected
//! Redis subscription.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};

use crate::config::ConfigStore;
use crate::control::data_channel;
use crate::resources::ResourceTracker;
use crate::stats::ConnectionStats;

/// How long the OS waits idle before probing the signal socket, and how
/// often it re-probes — matched to the relay's own `PING` cadence so a
/// dead relay is noticed by the OS layer around the same time the
/// application-level heartbeat would notice it.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle state of the control channel, exposed for the admin `/status`
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum ControlState {
    Idle = 0,
    Dialing = 1,
    Registered = 2,
    Retrying = 3,
}

impl From<u8> for ControlState {
    fn from(v: u8) -> Self {
        match v {
            1 => ControlState::Dialing,
            2 => ControlState::Registered,
            3 => ControlState::Retrying,
            _ => ControlState::Idle,
        }
    }
}

/// Caps the backoff sequence at 60s: `min(3 * 2^min(n-1, 4), 60)` for the
/// n-th consecutive failed attempt, giving 3, 6, 12, 24, 48, 60, 60, ...
fn backoff_seconds(attempt: u32) -> u64 {
    let exponent = (attempt.saturating_sub(1)).min(4);
    (3u64 * (1u64 << exponent)).min(60)
}

/// Owns the control-channel session loop and the shared state a running
/// session needs: the route/config store, per-rule stats, and the resource
/// tracker every data channel and background task registers with.
pub struct ControlClient {
    config_store: Arc<ConfigStore>,
    stats: Arc<ConnectionStats>,
    resources: Arc<ResourceTracker>,
    semaphore: Arc<tokio::sync::Semaphore>,
    state: AtomicU8,
    stop: Notify,
    stopped: std::sync::atomic::AtomicBool,
}

impl ControlClient {
    pub fn new(config_store: Arc<ConfigStore>, stats: Arc<ConnectionStats>, resources: Arc<ResourceTracker>) -> Arc<ControlClient> {
        let max_concurrent = config_store.snapshot().max_concurrent_requests;
        Arc::new(ControlClient {
            config_store,
            stats,
            resources,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            state: AtomicU8::new(ControlState::Idle as u8),
            stop: Notify::new(),
            stopped: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ControlState {
        ControlState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ControlState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Runs the reconnect loop until `disconnect()` is called. Intended to
    /// be spawned once at startup (or from the admin `/client/start`
    /// endpoint) and left running.
    pub async fn run(self: Arc<Self>) {
        self.stopped.store(false, Ordering::SeqCst);
        let mut attempt: u32 = 0;

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            self.set_state(ControlState::Dialing);
            match self.run_tracked_session().await {
                Ok(()) => {
                    log::info!("[control] session ended cleanly");
                    attempt = 0;
                }
                Err(e) => {
                    log::warn!("[control] session error: {e}");
                    attempt += 1;
                }
            }

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            if !self.config_store.snapshot().auto_reconnect {
                log::info!("[control] autoReconnect disabled, not retrying");
                break;
            }

            let wait = backoff_seconds(attempt.max(1));
            self.set_state(ControlState::Retrying);
            log::info!("[control] retrying in {wait}s (attempt {attempt})");

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {}
                _ = self.stop.notified() => break,
            }
        }

        self.set_state(ControlState::Idle);
    }

    /// Stops the reconnect loop and tears down every registered resource
    /// (open data channels, background tasks).
    pub fn disconnect(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
        self.resources.close_all();
    }

    /// Runs one `session()` as a task registered with the resource tracker,
    /// so `disconnect()`'s `resources.close_all()` can `.abort()` it
    /// directly — the signal socket closes the instant the task is
    /// dropped, regardless of what await point `handle_line` happens to be
    /// stuck in. A `Notify` racing in `session()`'s own read loop can't
    /// give that guarantee: it only wakes a task already parked on
    /// `notified()`, so a `disconnect()` landing mid-`write_all` (not a
    /// `select!` branch) would be missed entirely.
    async fn run_tracked_session(self: &Arc<Self>) -> std::io::Result<()> {
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.session().await;
            let _ = tx.send(result);
        });
        let id = self.resources.register_task(handle);
        let result = rx.await;
        self.resources.unregister(id);
        // `Err` here means the task was aborted mid-flight by
        // `disconnect()` before it could send its result — that's the
        // normal shutdown path, not a session error.
        result.unwrap_or(Ok(()))
    }

    async fn session(&self) -> std::io::Result<()> {
        let config = self.config_store.snapshot();
        let stream = TcpStream::connect((config.signal_host.as_str(), config.signal_port)).await?;

        let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_INTERVAL);
        if let Err(e) = socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            log::warn!("[control] failed to set TCP keepalive on signal socket: {e}");
        }

        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(format!("REGISTER {}\n", config.domain).as_bytes())
            .await?;
        self.set_state(ControlState::Registered);
        log::info!("[control] registered as {}", config.domain);

        loop {
            let line = match lines.next_line().await? {
                Some(line) => line,
                None => return Ok(()),
            };
            self.handle_line(&line, &mut write_half).await?;
        }
    }

    async fn handle_line(&self, line: &str, write_half: &mut tokio::net::tcp::OwnedWriteHalf) -> std::io::Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if line == "PING" {
            write_half.write_all(b"PONG\n").await?;
            log::debug!("[control] heartbeat: PING -> PONG");
            return Ok(());
        }

        if let Some(id) = line.strip_prefix("CONNECT ") {
            let id = id.trim().to_string();
            log::debug!("[control] CONNECT {id}");
            tokio::spawn(data_channel::open(
                id,
                self.config_store.clone(),
                self.stats.clone(),
                self.resources.clone(),
                self.semaphore.clone(),
            ));
            return Ok(());
        }

        log::debug!("[control] ignoring unrecognized line: {line:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_the_capped_doubling_sequence() {
        let expected = [3, 6, 12, 24, 48, 60, 60, 60, 60, 60];
        for (i, &want) in expected.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(backoff_seconds(attempt), want, "attempt {attempt}");
        }
    }

    #[test]
    fn control_state_round_trips_through_u8() {
        for state in [
            ControlState::Idle,
            ControlState::Dialing,
            ControlState::Registered,
            ControlState::Retrying,
        ] {
            assert_eq!(ControlState::from(state as u8), state);
        }
    }
}
