//! Data-channel dialer: what happens when the control channel receives a
//! `CONNECT <id>` line.
//!
//! One new TCP connection per request, announced with a `REGISTER` line
//! carrying the tunnel's domain and the request id the gateway handed out,
//! then handed straight to the mode dispatcher. Grounded in
//! `router-core::app::proxy`'s per-connection task-spawn shape: a fresh
//! task per accepted socket, registered so shutdown can reach it.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;

use crate::config::ConfigStore;
use crate::control::dispatch;
use crate::resources::ResourceTracker;
use crate::stats::ConnectionStats;

/// Opens one data-channel socket for `request_id`, registers it, and spawns
/// the dispatcher on it. Logs and returns on any dial/write error — a
/// failed data channel never affects the control channel itself.
///
/// `semaphore` soft-bounds how many requests run concurrently
/// (`maxConcurrentRequests`); the permit is acquired here, inside the task
/// already spawned for this one `CONNECT`, so a saturated pool makes this
/// request wait rather than blocking the control-channel read loop that
/// dispatches every other request.
pub async fn open(
    request_id: String,
    config_store: Arc<ConfigStore>,
    stats: Arc<ConnectionStats>,
    resources: Arc<ResourceTracker>,
    semaphore: Arc<Semaphore>,
) {
    let permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };
    let config = config_store.snapshot();

    let mut stream = match TcpStream::connect((config.signal_host.as_str(), config.data_port)).await {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("[data-channel] request {request_id}: failed to dial {}:{}: {e}", config.signal_host, config.data_port);
            return;
        }
    };

    use tokio::io::AsyncWriteExt;
    let register_line = format!("REGISTER {} {}\n", config.domain, request_id);
    if let Err(e) = stream.write_all(register_line.as_bytes()).await {
        log::error!("[data-channel] request {request_id}: failed to send REGISTER: {e}");
        return;
    }

    let task_id = request_id.clone();
    let handle = tokio::spawn(async move {
        dispatch::dispatch(stream, config_store, stats, task_id).await;
        drop(permit);
    });
    // Registered so a `disconnect()` mid-request aborts it; `close_all`
    // aborting an already-finished handle is a harmless no-op.
    resources.register_task(handle);
}
