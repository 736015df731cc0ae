/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::actor_fetch::RemoteFetcher;
use crate::config::host_with_port;
use crate::social_db::SocialDb;
use crate::store::{Actor, ActorDirectory, InstanceKey};

/// Actors known locally, backed by the database, falling back to the
/// network for remote ones.
pub struct FederatedDirectory {
    db: SocialDb,
    fetcher: Arc<dyn RemoteFetcher>,
    local_host: String,
}

impl FederatedDirectory {
    pub fn new(db: SocialDb, fetcher: Arc<dyn RemoteFetcher>, local_host: impl Into<String>) -> Self {
        Self {
            db,
            fetcher,
            local_host: local_host.into(),
        }
    }

    fn is_local(&self, uri: &Url) -> bool {
        host_with_port(uri).is_some_and(|h| h == self.local_host)
    }

    async fn fetch_and_store(&self, uri: &Url) -> Result<Option<Actor>> {
        let Some(user) = self.fetcher.fetch_user(uri).await? else {
            debug!(%uri, "remote user not found");
            return Ok(None);
        };
        let instance_base_url = instance_base_url(uri);
        let actor = self
            .db
            .blocking(move |db| db.upsert_remote_actor(&user, &instance_base_url))
            .await?;
        Ok(Some(actor))
    }
}

fn instance_base_url(uri: &Url) -> String {
    let mut base = uri.clone();
    base.set_path("");
    base.set_query(None);
    base.set_fragment(None);
    base.as_str().trim_end_matches('/').to_string()
}

#[async_trait]
impl ActorDirectory for FederatedDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Actor>> {
        self.db.blocking(move |db| db.get_actor_by_id(id)).await
    }

    async fn find_by_uri(&self, uri: &Url) -> Result<Option<Actor>> {
        let key = uri.clone();
        self.db.blocking(move |db| db.get_actor_by_uri(&key)).await
    }

    async fn resolve(&self, uri: &Url) -> Result<Option<Actor>> {
        if let Some(actor) = self.find_by_uri(uri).await? {
            return Ok(Some(actor));
        }
        if self.is_local(uri) {
            return Ok(None);
        }
        self.fetch_and_store(uri).await
    }

    async fn save_from_remote(&self, uri: &Url) -> Result<Option<Actor>> {
        if self.is_local(uri) {
            return self.find_by_uri(uri).await;
        }
        self.fetch_and_store(uri).await
    }

    async fn resolve_instance(&self, host: &str) -> Result<Option<InstanceKey>> {
        let key = host.to_ascii_lowercase();
        let cached = {
            let key = key.clone();
            self.db.blocking(move |db| db.get_instance(&key)).await?
        };
        if cached.is_some() {
            return Ok(cached);
        }
        let Some(meta) = self.fetcher.fetch_instance(&key).await? else {
            return Ok(None);
        };
        if !meta.host.eq_ignore_ascii_case(&key) {
            warn!(host = %key, claimed = %meta.host, "instance metadata host mismatch");
            return Ok(None);
        }
        let instance = InstanceKey {
            base_url: format!("https://{key}"),
            host: key,
            public_key: meta.public_key.key,
            key_algorithm: meta.public_key.algorithm,
        };
        let stored = instance.clone();
        self.db.blocking(move |db| db.upsert_instance(&stored)).await?;
        Ok(Some(instance))
    }

    async fn delete_actor(&self, id: Uuid) -> Result<bool> {
        self.db.blocking(move |db| db.delete_actor(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_keeps_scheme_host_and_port() {
        let u = Url::parse("https://remote.example:8443/users/1?x=1#k").unwrap();
        assert_eq!(instance_base_url(&u), "https://remote.example:8443");
    }
}
