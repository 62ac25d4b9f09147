//! Minimal local admin HTTP surface: inspect and edit routing rules,
//! start/stop the control channel, read status. No authentication — this
//! binds to loopback only and is meant for a trusted operator or a sibling
//! process on the same host.
//!
//! The teacher's own HTTP framework (`actix-web`, see the now-trimmed
//! `router-api` crate) is reused here rather than reaching for a second web
//! framework, scaled down from a full REST+SQL admin API to a handful of
//! handlers closing directly over in-process state.

use std::sync::Mutex;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;

use crate::config::{ConfigStore, Mode};
use crate::control::client::{ControlClient, ControlState};
use crate::resources::ResourceTracker;
use crate::routing::RoutingRule;
use crate::stats::ConnectionStats;

pub struct AdminState {
    pub config_store: std::sync::Arc<ConfigStore>,
    pub stats: std::sync::Arc<ConnectionStats>,
    pub resources: std::sync::Arc<ResourceTracker>,
    pub control: std::sync::Arc<ControlClient>,
    pub client_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

async fn list_routes(state: web::Data<AdminState>) -> impl Responder {
    HttpResponse::Ok().json(state.config_store.snapshot().routes)
}

async fn add_route(state: web::Data<AdminState>, rule: web::Json<RoutingRule>) -> impl Responder {
    match state.config_store.add_rule(rule.into_inner()) {
        Ok(()) => HttpResponse::Created().finish(),
        Err(e) => HttpResponse::BadRequest().body(e.to_string()),
    }
}

async fn replace_route(
    state: web::Data<AdminState>,
    index: web::Path<usize>,
    rule: web::Json<RoutingRule>,
) -> impl Responder {
    match state.config_store.replace_rule(index.into_inner(), rule.into_inner()) {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e @ crate::error::ConfigError::InvalidRule { ref reason, .. }) if reason == "out of range" => {
            HttpResponse::NotFound().body(e.to_string())
        }
        Err(e) => HttpResponse::BadRequest().body(e.to_string()),
    }
}

async fn delete_route(state: web::Data<AdminState>, index: web::Path<usize>) -> impl Responder {
    match state.config_store.remove_rule(index.into_inner()) {
        Ok(rule) => HttpResponse::Ok().json(rule),
        Err(e) => HttpResponse::NotFound().body(e.to_string()),
    }
}

async fn start_client(state: web::Data<AdminState>) -> impl Responder {
    let mut task = state.client_task.lock().unwrap();
    if task.as_ref().is_some_and(|h| !h.is_finished()) {
        return HttpResponse::Ok().body("already running");
    }
    let control = state.control.clone();
    *task = Some(tokio::spawn(async move { control.run().await }));
    HttpResponse::Ok().body("started")
}

async fn stop_client(state: web::Data<AdminState>) -> impl Responder {
    state.control.disconnect();
    HttpResponse::Ok().body("stopped")
}

#[derive(serde::Serialize)]
struct StatusResponse {
    domain: String,
    mode: Mode,
    control_state: ControlState,
    tracked_resources: usize,
    stats: std::collections::HashMap<String, crate::stats::RuleStatsSnapshot>,
}

async fn status(state: web::Data<AdminState>) -> impl Responder {
    let config = state.config_store.snapshot();
    HttpResponse::Ok().json(StatusResponse {
        domain: config.domain,
        mode: config.mode,
        control_state: state.control.state(),
        tracked_resources: state.resources.len(),
        stats: state.stats.snapshot(),
    })
}

#[derive(Deserialize)]
struct DomainUpdate {
    domain: String,
}

async fn set_domain(state: web::Data<AdminState>, body: web::Json<DomainUpdate>) -> impl Responder {
    state.config_store.set_domain(body.into_inner().domain);
    HttpResponse::Ok().finish()
}

#[derive(Deserialize)]
struct SignalUpdate {
    host: String,
    port: u16,
}

async fn set_signal(state: web::Data<AdminState>, body: web::Json<SignalUpdate>) -> impl Responder {
    let body = body.into_inner();
    state.config_store.set_signal(body.host, body.port);
    HttpResponse::Ok().finish()
}

#[derive(Deserialize)]
struct ModeUpdate {
    mode: Mode,
}

async fn set_mode(state: web::Data<AdminState>, body: web::Json<ModeUpdate>) -> impl Responder {
    state.config_store.set_mode(body.into_inner().mode);
    HttpResponse::Ok().finish()
}

/// Builds and runs the admin server on `127.0.0.1:<admin_port>` until the
/// process exits. Returns only on a bind/listen error.
pub async fn run(bind_port: u16, state: std::sync::Arc<AdminState>) -> std::io::Result<()> {
    log::info!("[admin] listening on 127.0.0.1:{bind_port}");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(state.clone()))
            .route("/routes", web::get().to(list_routes))
            .route("/routes", web::post().to(add_route))
            .route("/routes/{index}", web::put().to(replace_route))
            .route("/routes/{index}", web::delete().to(delete_route))
            .route("/client/start", web::post().to(start_client))
            .route("/client/stop", web::post().to(stop_client))
            .route("/status", web::get().to(status))
            .route("/config/domain", web::put().to(set_domain))
            .route("/config/signal", web::put().to(set_signal))
            .route("/config/mode", web::put().to(set_mode))
    })
    .bind(("127.0.0.1", bind_port))?
    .run()
    .await
}
