/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use http::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;
use versia_protocol::{Entity, HEADER_NONCE, HEADER_SIGNATURE, HEADER_SIGNED_BY, SIGNED_BY_INSTANCE};

use crate::http_retry::{send_with_retry, RetryPolicy};
use crate::http_sig::{new_nonce, sign_request};
use crate::keys::InstanceIdentity;
use crate::store::{Actor, FederationOutbox};

/// Signed Versia request ready to be POSTed.
#[derive(Debug, Clone)]
pub struct SignedDelivery {
    pub inbox: Url,
    pub body: Vec<u8>,
    pub nonce: String,
    pub signature: String,
}

pub fn sign_delivery(identity: &InstanceIdentity, entity: &Entity, inbox: &Url) -> Result<SignedDelivery> {
    let body = serde_json::to_vec(entity).context("serialize entity")?;
    let nonce = new_nonce();
    let signature = sign_request(&identity.signing_key, &Method::POST, &path_and_query(inbox), &nonce, &body);
    Ok(SignedDelivery {
        inbox: inbox.clone(),
        body,
        nonce,
        signature,
    })
}

pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_string(),
    }
}

#[derive(Clone)]
pub struct HttpDelivery {
    client: reqwest::Client,
    identity: Arc<InstanceIdentity>,
    retry: RetryPolicy,
}

impl HttpDelivery {
    pub fn new(identity: Arc<InstanceIdentity>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("versia-inbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build delivery client")?;
        Ok(Self {
            client,
            identity,
            retry: RetryPolicy::default(),
        })
    }
}

#[async_trait]
impl FederationOutbox for HttpDelivery {
    async fn send(&self, entity: Entity, recipient: &Actor) -> Result<()> {
        let inbox = recipient
            .inbox
            .clone()
            .ok_or_else(|| anyhow!("recipient has no inbox: {}", recipient.uri))?;
        let delivery = sign_delivery(&self.identity, &entity, &inbox)?;
        let client = self.client.clone();
        let retry = self.retry;
        let kind = entity.kind();
        tokio::spawn(async move {
            let res = send_with_retry(
                || {
                    client
                        .post(delivery.inbox.as_str())
                        .header(CONTENT_TYPE, "application/json; charset=utf-8")
                        .header(ACCEPT, "application/json")
                        .header(HEADER_SIGNATURE, delivery.signature.as_str())
                        .header(HEADER_NONCE, delivery.nonce.as_str())
                        .header(HEADER_SIGNED_BY, SIGNED_BY_INSTANCE)
                        .body(delivery.body.clone())
                },
                retry,
            )
            .await;
            match res {
                Ok(resp) if resp.status().is_success() => {
                    info!(inbox = %delivery.inbox, kind, status = %resp.status(), "delivered");
                }
                Ok(resp) => warn!(inbox = %delivery.inbox, kind, status = %resp.status(), "delivery rejected"),
                Err(e) => warn!(inbox = %delivery.inbox, kind, "delivery failed: {e:#}"),
            }
        });
        Ok(())
    }
}
