//! Mode dispatcher: decides, per accepted data-channel socket, whether to
//! splice it straight to a fixed raw target or parse an HTTP head and route
//! it by path.
//!
//! Grounded in `router-core::app::proxy`'s top-level branch between its
//! fast raw-copy path (`proxy_fast`) and its header-aware path
//! (`proxy_host`/`proxy_sni`) — this is the same shape of decision, made
//! once per connection from a config flag instead of from SNI/Host
//! sniffing.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{ConfigStore, Mode};
use crate::http::parser::{parse_head, DEFAULT_HEAD_BUFFER};
use crate::http::route_handler::handle_routed_request;
use crate::pipe;
use crate::stats::ConnectionStats;
use crate::tls::dial_backend;

/// Handles one data-channel socket end to end: raw splice or routed HTTP
/// forward, depending on `config_store`'s current mode. Errors are logged
/// against `request_id` and swallowed — a failed request never takes down
/// the control channel.
pub async fn dispatch<S>(
    data_channel: S,
    config_store: Arc<ConfigStore>,
    stats: Arc<ConnectionStats>,
    request_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = config_store.snapshot();

    let result = match config.mode {
        Mode::Raw => dispatch_raw(data_channel, &config, &request_id).await,
        Mode::Routing => dispatch_routing(data_channel, &config_store, &stats, &request_id).await,
    };

    if let Err(e) = result {
        log::warn!("[dispatch] request {request_id}: {e}");
    }
}

async fn dispatch_raw<S>(
    data_channel: S,
    config: &crate::config::Config,
    request_id: &str,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    log::debug!(
        "[dispatch] request {request_id}: RAW mode -> {}:{}",
        config.raw_target_host,
        config.raw_target_port
    );
    let backend = dial_backend(&config.raw_target_host, config.raw_target_port, false).await?;
    pipe::shuffle(data_channel, backend).await
}

async fn dispatch_routing<S>(
    mut data_channel: S,
    config_store: &Arc<ConfigStore>,
    stats: &Arc<ConnectionStats>,
    request_id: &str,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let parse_result = match parse_head(&mut data_channel, DEFAULT_HEAD_BUFFER).await {
        Ok(result) => result,
        Err(e) => {
            log::warn!("[dispatch] request {request_id}: head parse failed: {e}");
            return Ok(());
        }
    };

    let table = config_store.route_table();
    let rule = match table.lookup(&parse_result.path) {
        Some(rule) => rule.clone(),
        None => {
            log::info!("[dispatch] request {request_id}: no route found for {}", parse_result.path);
            return Ok(());
        }
    };

    let force_close = config_store.snapshot().force_connection_close;
    handle_routed_request(data_channel, parse_result, &rule, force_close, stats, request_id).await
}
