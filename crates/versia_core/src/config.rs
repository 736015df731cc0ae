/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    pub http: HttpConfig,
    pub instance: InstanceConfig,
    pub storage: StorageConfig,
    pub federation: FederationConfig,
    pub debug: DebugConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    /// Only safe when a reverse proxy in front overwrites the forwarding headers.
    pub trust_proxy_headers: bool,
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            trust_proxy_headers: false,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub name: String,
    pub base_url: String,
    /// Local accounts created at startup if missing.
    pub local_users: Vec<LocalUserConfig>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "Versia".to_string(),
            base_url: "http://localhost:8080".to_string(),
            local_users: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalUserConfig {
    pub username: String,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Glob patterns matched against the sender's host, e.g. `*.spam.example`.
    pub blocked: Vec<String>,
    pub bridge: BridgeConfig,
    pub deadline_secs: u64,
    pub actor_cache_ttl_secs: u64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            blocked: Vec::new(),
            bridge: BridgeConfig::default(),
            deadline_secs: 5,
            actor_cache_ttl_secs: 300,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub enabled: bool,
    pub token: String,
    /// IPs, CIDRs (`10.0.0.0/8`) or wildcard patterns (`192.168.*.*`).
    pub allowed_ips: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Trace every inbox request and response.
    pub federation: bool,
}

impl InboxConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: InboxConfig = serde_json::from_str(text).context("parse config json")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;
        url::Url::parse(&self.instance.base_url).context("instance.base_url is not a valid URL")?;
        if self.instance.local_users.iter().any(|u| u.username.trim().is_empty()) {
            anyhow::bail!("instance.local_users entries need a username");
        }
        if self.federation.bridge.enabled && self.federation.bridge.token.trim().is_empty() {
            anyhow::bail!("federation.bridge.token must be set when the bridge is enabled");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.http
            .bind
            .parse()
            .with_context(|| format!("http.bind invalid: {}", self.http.bind))
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.federation.deadline_secs.max(1))
    }

    pub fn actor_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.federation.actor_cache_ttl_secs)
    }

    pub fn base_url(&self) -> &str {
        self.instance.base_url.trim_end_matches('/')
    }

    /// Host (with port, if any) of the local instance.
    pub fn local_host(&self) -> String {
        url::Url::parse(&self.instance.base_url)
            .ok()
            .and_then(|u| host_with_port(&u))
            .unwrap_or_default()
    }
}

pub fn host_with_port(url: &url::Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(p) => format!("{host}:{p}"),
        None => host,
    })
}

pub fn default_config_path() -> PathBuf {
    if let Some(proj) = directories::ProjectDirs::from("pub", "versia", "VersiaInbox") {
        return proj.config_dir().join("config.json");
    }
    PathBuf::from("config.json")
}

pub fn default_data_dir() -> PathBuf {
    if let Ok(v) = std::env::var("VERSIA_DATA_DIR") {
        return PathBuf::from(v);
    }
    directories::ProjectDirs::from("pub", "versia", "VersiaInbox")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_defaults() {
        let cfg = InboxConfig::from_json("{}").unwrap();
        assert_eq!(cfg.federation.deadline_secs, 5);
        assert!(!cfg.federation.bridge.enabled);
        assert!(!cfg.debug.federation);
    }

    #[test]
    fn nested_sections_are_read() {
        let cfg = InboxConfig::from_json(
            r#"{
                "instance": {
                    "base_url": "https://social.example:8443/",
                    "local_users": [{ "username": "alice", "locked": true }, { "username": "bob" }]
                },
                "federation": {
                    "blocked": ["*.bad.example"],
                    "bridge": { "enabled": true, "token": "s3cret", "allowed_ips": ["10.0.0.0/8"] }
                },
                "debug": { "federation": true }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.federation.blocked, vec!["*.bad.example".to_string()]);
        assert_eq!(cfg.federation.bridge.allowed_ips.len(), 1);
        assert!(cfg.debug.federation);
        assert_eq!(cfg.base_url(), "https://social.example:8443");
        assert_eq!(cfg.local_host(), "social.example:8443");
        assert!(cfg.instance.local_users[0].locked);
        assert!(!cfg.instance.local_users[1].locked);
    }

    #[test]
    fn bridge_without_token_is_rejected() {
        let err = InboxConfig::from_json(r#"{"federation":{"bridge":{"enabled":true}}}"#).unwrap_err();
        assert!(format!("{err:#}").contains("bridge.token"));
    }

    #[test]
    fn bad_bind_is_rejected() {
        assert!(InboxConfig::from_json(r#"{"http":{"bind":"nope"}}"#).is_err());
    }
}
