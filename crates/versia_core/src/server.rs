/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};
use uuid::Uuid;
use versia_protocol::{InstanceMetadata, PublicKey, HEADER_NONCE, HEADER_SIGNATURE, HEADER_SIGNED_BY};

use crate::actor_fetch::HttpFetcher;
use crate::bridge::client_ip;
use crate::config::{default_data_dir, InboxConfig};
use crate::delivery::HttpDelivery;
use crate::directory::FederatedDirectory;
use crate::error::InboxError;
use crate::http_sig::ALGORITHM_ED25519;
use crate::inbox::{InboxPipeline, InboxRequest};
use crate::keys::{load_or_generate_identity, InstanceIdentity};
use crate::social_db::SocialDb;

pub struct AppState {
    pub pipeline: InboxPipeline,
    pub db: SocialDb,
    pub metadata: InstanceMetadata,
    pub trust_proxy_headers: bool,
}

impl AppState {
    pub fn new(cfg: &InboxConfig, pipeline: InboxPipeline, db: SocialDb, identity: &InstanceIdentity) -> Self {
        let metadata = InstanceMetadata {
            ty: "InstanceMetadata".to_string(),
            name: cfg.instance.name.clone(),
            host: cfg.local_host(),
            public_key: PublicKey {
                actor: None,
                algorithm: ALGORITHM_ED25519.to_string(),
                key: identity.public_key.clone(),
            },
            created_at: None,
        };
        Self {
            pipeline,
            db,
            metadata,
            trust_proxy_headers: cfg.http.trust_proxy_headers,
        }
    }
}

/// Wires the SQLite store, the HTTP fetcher and the signed delivery into a
/// ready-to-serve state.
pub fn build_state(cfg: &InboxConfig) -> Result<Arc<AppState>> {
    let data_dir = cfg.storage.data_dir.clone().unwrap_or_else(default_data_dir);
    let identity = Arc::new(load_or_generate_identity(&data_dir)?);
    let db_path = cfg
        .storage
        .db_path
        .clone()
        .unwrap_or_else(|| data_dir.join("versia_inbox.db"));
    let db = SocialDb::open(&db_path)?;
    info!("database: {}", db_path.display());

    for user in &cfg.instance.local_users {
        let actor = db.ensure_local_actor(cfg.base_url(), &user.username, &identity.public_key, user.locked)?;
        info!(username = %actor.username, id = %actor.id, locked = actor.is_locked, "local user");
    }

    let mut fetcher = HttpFetcher::new(cfg.deadline())?;
    if cfg.base_url().starts_with("http://") {
        fetcher = fetcher.with_plain_http();
    }
    let directory = Arc::new(FederatedDirectory::new(db.clone(), Arc::new(fetcher), cfg.local_host()));
    let outbox = Arc::new(HttpDelivery::new(identity.clone())?);
    let pipeline = InboxPipeline::new(cfg, directory, Arc::new(db.clone()), outbox);
    Ok(Arc::new(AppState::new(cfg, pipeline, db, &identity)))
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/.well-known/versia", get(well_known))
        .route("/users/:uuid/inbox", post(inbox))
        .with_state(state)
        .layer(middleware::map_response(add_security_headers))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("req");
                info_span!("http", method = %req.method(), uri = %req.uri(), request_id = %request_id)
            }),
        )
}

pub async fn serve(cfg: InboxConfig) -> Result<()> {
    let addr = cfg.bind_addr()?;
    let state = build_state(&cfg)?;
    let app = router(state, cfg.http.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("versia inbox listening on http://{addr}");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl_c handler failed: {e}");
            }
            info!("shutdown requested");
        })
        .await
        .context("serve")?;
    Ok(())
}

async fn add_security_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.entry("X-Content-Type-Options").or_insert(HeaderValue::from_static("nosniff"));
    headers.entry("X-Frame-Options").or_insert(HeaderValue::from_static("DENY"));
    headers.entry("Referrer-Policy").or_insert(HeaderValue::from_static("no-referrer"));
    resp
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<AppState>>) -> Response<Body> {
    let check = tokio::time::timeout(Duration::from_secs(2), state.db.blocking(|db| db.health_check())).await;
    match check {
        Ok(Ok(())) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => {
            warn!("readiness check failed: {e:#}");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
        }
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "database timeout").into_response(),
    }
}

async fn well_known(State(state): State<Arc<AppState>>) -> Json<InstanceMetadata> {
    Json(state.metadata.clone())
}

async fn inbox(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    let Ok(target_id) = Uuid::parse_str(&uuid) else {
        return InboxError::validation("Invalid user ID").into_response();
    };
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let req = InboxRequest {
        target_id,
        method,
        path_and_query,
        signature: header(HEADER_SIGNATURE),
        nonce: header(HEADER_NONCE),
        signed_by: header(HEADER_SIGNED_BY),
        authorization: header("authorization"),
        request_ip: client_ip(peer.map(|c| c.0), &headers, state.trust_proxy_headers),
        raw_body: body,
    };
    state.pipeline.process(req).await
}
