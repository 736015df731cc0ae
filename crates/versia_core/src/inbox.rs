/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::anyhow;
use axum::{body::Body, http::Response, response::IntoResponse};
use bytes::Bytes;
use futures_util::FutureExt as _;
use http::{Method, StatusCode};
use std::{any::Any, net::IpAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use uuid::Uuid;
use versia_protocol::Entity;

use crate::bridge::Bridge;
use crate::config::{host_with_port, InboxConfig};
use crate::defederation::Defederation;
use crate::error::{InboxError, InboxResult, Outcome};
use crate::handlers::{dispatch, HandlerContext};
use crate::http_sig::verify_request;
use crate::sender::{body_author, origin_host, RemoteActor, SenderResolver, SignedBy};
use crate::store::{ActorDirectory, FederationOutbox, SocialStore};

/// One inbound delivery. `raw_body` is read once and shared by signature
/// verification and entity decoding.
#[derive(Debug, Clone)]
pub struct InboxRequest {
    pub target_id: Uuid,
    pub method: Method,
    pub path_and_query: String,
    pub signature: Option<String>,
    pub nonce: Option<String>,
    pub signed_by: Option<String>,
    pub authorization: Option<String>,
    pub request_ip: Option<IpAddr>,
    pub raw_body: Bytes,
}

pub struct InboxPipeline {
    directory: Arc<dyn ActorDirectory>,
    store: Arc<dyn SocialStore>,
    outbox: Arc<dyn FederationOutbox>,
    senders: SenderResolver,
    defederation: Defederation,
    bridge: Bridge,
    deadline: Duration,
    trace_federation: bool,
}

impl InboxPipeline {
    pub fn new(
        cfg: &InboxConfig,
        directory: Arc<dyn ActorDirectory>,
        store: Arc<dyn SocialStore>,
        outbox: Arc<dyn FederationOutbox>,
    ) -> Self {
        let senders = SenderResolver::new(directory.clone(), cfg.local_host(), cfg.actor_cache_ttl());
        Self {
            directory,
            store,
            outbox,
            senders,
            defederation: Defederation::new(&cfg.federation.blocked),
            bridge: Bridge::new(&cfg.federation.bridge),
            deadline: cfg.deadline(),
            trace_federation: cfg.debug.federation,
        }
    }

    pub async fn process(&self, req: InboxRequest) -> Response<Body> {
        if self.trace_federation {
            info!(
                method = %req.method,
                path = %req.path_and_query,
                signature = ?req.signature,
                nonce = ?req.nonce,
                signed_by = ?req.signed_by,
                authorization = req.authorization.as_ref().map(|_| "[redacted]"),
                ip = ?req.request_ip,
                body = %String::from_utf8_lossy(&req.raw_body),
                "federation request"
            );
        }

        let result = self.run(&req).await;
        let status = match &result {
            Ok(outcome) => outcome.status(),
            Err(e) => e.status(),
        };
        match &result {
            Err(InboxError::Internal(e)) => error!(
                target_user = %req.target_id,
                signed_by = ?req.signed_by,
                status = status.as_u16(),
                "inbox request failed: {e:#}"
            ),
            _ => info!(
                target_user = %req.target_id,
                signed_by = ?req.signed_by,
                status = status.as_u16(),
                "inbox request"
            ),
        }

        let resp = match result {
            Ok(outcome) => outcome.into_response(),
            Err(e) => e.into_response(),
        };
        if self.trace_federation {
            info!(target_user = %req.target_id, status = status.as_u16(), "federation response");
        }
        resp
    }

    async fn run(&self, req: &InboxRequest) -> InboxResult {
        let origin = origin_host(req.signed_by.as_deref(), &req.raw_body);
        if self.defederation.is_defederated(&origin) {
            info!(host = %origin, "dropping delivery from defederated host");
            return Ok(Outcome::Empty(StatusCode::CREATED));
        }

        let target = self
            .directory
            .find_by_id(req.target_id)
            .await?
            .ok_or_else(|| InboxError::not_found("User not found"))?;
        if target.is_remote {
            return Err(InboxError::Forbidden("Cannot view users from remote instances".to_string()));
        }

        let sender = match self.bridge.engaged(req.authorization.as_deref()) {
            Some(token) => {
                self.bridge.handle_bridge(token, req.request_ip)?;
                None
            }
            None => Some(
                tokio::time::timeout(self.deadline, self.authenticate(req))
                    .await
                    .map_err(|_| InboxError::Timeout("Sender could not be verified in time".to_string()))??,
            ),
        };

        let entity: Entity =
            serde_json::from_slice(&req.raw_body).map_err(|e| InboxError::validation(e.to_string()))?;

        let instance_host = sender
            .as_ref()
            .filter(|s| s.actor.is_none())
            .and_then(|s| host_with_port(&s.uri));
        let ctx = HandlerContext {
            directory: self.directory.as_ref(),
            store: self.store.as_ref(),
            outbox: self.outbox.as_ref(),
            senders: &self.senders,
            target: &target,
            signer: sender.as_ref().and_then(|s| s.actor.as_ref()).map(|a| &a.uri),
            instance_host: instance_host.as_deref(),
        };
        let kind = entity.kind();
        match AssertUnwindSafe(dispatch(&ctx, entity)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(InboxError::Internal(anyhow!(
                "{kind} handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn authenticate(&self, req: &InboxRequest) -> Result<RemoteActor, InboxError> {
        let signature = required(req.signature.as_deref(), "X-Signature")?;
        let nonce = required(req.nonce.as_deref(), "X-Nonce")?;
        let signed_by = SignedBy::parse(required(req.signed_by.as_deref(), "X-Signed-By")?)?;

        let author = body_author(&req.raw_body);
        let sender = self.senders.resolve(&signed_by, author.as_ref()).await?;

        if let Err(e) = verify_request(
            &sender.public_key,
            &sender.key_algorithm,
            &req.method,
            &req.path_and_query,
            nonce,
            &req.raw_body,
            signature,
        ) {
            warn!(signer = %sender.uri, "signature verification failed: {e:#}");
            return Err(InboxError::Unauthorized("Signature could not be verified".to_string()));
        }
        Ok(sender)
    }
}

fn required<'a>(value: Option<&'a str>, header: &str) -> Result<&'a str, InboxError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| InboxError::validation(format!("Missing {header} header")))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
