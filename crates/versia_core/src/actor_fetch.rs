/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::ACCEPT, StatusCode};
use std::time::Duration;
use url::Url;
use versia_protocol::{InstanceMetadata, User};

use crate::http_retry::{send_with_retry, RetryPolicy};

const VERSIA_JSON: &str = "application/vnd.versia+json, application/json";

/// Network side of actor resolution.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// `Ok(None)` when the remote says the user does not exist.
    async fn fetch_user(&self, uri: &Url) -> Result<Option<User>>;

    async fn fetch_instance(&self, host: &str) -> Result<Option<InstanceMetadata>>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    scheme: &'static str,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("versia-inbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Fetch instance metadata over plain http. Only for local testing setups.
    pub fn with_plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let resp = send_with_retry(
            || self.client.get(url).header(ACCEPT, VERSIA_JSON),
            RetryPolicy::once(),
        )
        .await
        .with_context(|| format!("fetch: {url}"))?;
        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .with_context(|| format!("fetch not ok: {url}"))?;
        let bytes = resp.bytes().await?;
        let value = serde_json::from_slice(&bytes).with_context(|| format!("parse json from {url}"))?;
        Ok(Some(value))
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch_user(&self, uri: &Url) -> Result<Option<User>> {
        let Some(user) = self.get_json::<User>(uri.as_str()).await? else {
            return Ok(None);
        };
        if user.uri != *uri {
            return Err(anyhow!("user document at {uri} claims uri {}", user.uri));
        }
        Ok(Some(user))
    }

    async fn fetch_instance(&self, host: &str) -> Result<Option<InstanceMetadata>> {
        let url = format!("{}://{host}/.well-known/versia", self.scheme);
        self.get_json(&url).await
    }
}
