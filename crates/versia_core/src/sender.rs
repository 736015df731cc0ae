/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::Url;
use versia_protocol::SIGNED_BY_INSTANCE;

use crate::config::host_with_port;
use crate::error::InboxError;
use crate::store::{Actor, ActorDirectory};

/// Parsed `X-Signed-By` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedBy {
    Actor(Url),
    /// The remote server signed with its instance key.
    Instance,
}

impl SignedBy {
    pub fn parse(raw: &str) -> Result<Self, InboxError> {
        let raw = raw.trim();
        if raw == SIGNED_BY_INSTANCE {
            return Ok(SignedBy::Instance);
        }
        let url = Url::parse(raw)
            .map_err(|_| InboxError::validation(format!("Invalid X-Signed-By header: {raw}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(InboxError::validation(format!("Invalid X-Signed-By header: {raw}")));
        }
        Ok(SignedBy::Actor(url))
    }
}

/// Host the request claims to come from, derived without any network I/O.
/// For instance signatures it is the host of the body's `author`. Empty when
/// nothing usable is present.
pub fn origin_host(signed_by: Option<&str>, raw_body: &[u8]) -> String {
    if let Some(raw) = signed_by.map(str::trim) {
        if raw != SIGNED_BY_INSTANCE {
            if let Some(host) = Url::parse(raw).ok().as_ref().and_then(host_with_port) {
                return host;
            }
        }
    }
    body_author(raw_body)
        .as_ref()
        .and_then(host_with_port)
        .unwrap_or_default()
}

/// `author` field of a JSON body, tolerating bodies that are not valid entities.
pub fn body_author(raw_body: &[u8]) -> Option<Url> {
    let value: serde_json::Value = serde_json::from_slice(raw_body).ok()?;
    let author = value.get("author")?.as_str()?;
    Url::parse(author).ok()
}

/// Identity a request was signed with.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteActor {
    /// Actor URI, or the instance base URL for instance signatures.
    pub uri: Url,
    pub public_key: String,
    pub key_algorithm: String,
    pub instance_base_url: String,
    pub is_remote: bool,
    /// Directory entry when the signer is an actor.
    pub actor: Option<Actor>,
}

impl RemoteActor {
    fn from_actor(actor: Actor) -> Self {
        Self {
            uri: actor.uri.clone(),
            public_key: actor.public_key.clone(),
            key_algorithm: actor.key_algorithm.clone(),
            instance_base_url: actor.instance_base_url.clone(),
            is_remote: actor.is_remote,
            actor: Some(actor),
        }
    }
}

#[derive(Clone)]
struct CachedSender {
    sender: RemoteActor,
    expires_at: Instant,
}

/// Lookup gate shared by every caller waiting on the same key.
struct Flight {
    gate: Arc<Mutex<()>>,
    waiters: usize,
}

type Inflight = StdMutex<HashMap<String, Flight>>;

/// Membership in a [`Flight`]. Dropping it, including when the caller's
/// future is cancelled, releases the slot; the last waiter removes the entry.
struct FlightTicket<'a> {
    inflight: &'a Inflight,
    key: String,
    gate: Arc<Mutex<()>>,
}

impl<'a> FlightTicket<'a> {
    fn join(inflight: &'a Inflight, key: &str) -> Self {
        let mut map = inflight.lock().unwrap_or_else(PoisonError::into_inner);
        let flight = map.entry(key.to_string()).or_insert_with(|| Flight {
            gate: Arc::default(),
            waiters: 0,
        });
        flight.waiters += 1;
        let gate = flight.gate.clone();
        Self {
            inflight,
            key: key.to_string(),
            gate,
        }
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut map = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = map.get_mut(&self.key) {
            flight.waiters = flight.waiters.saturating_sub(1);
            if flight.waiters == 0 {
                map.remove(&self.key);
            }
        }
    }
}

/// Shared sender cache in front of the actor directory. At most one lookup per
/// key is in flight; concurrent callers for the same key wait and reuse it.
pub struct SenderResolver {
    directory: Arc<dyn ActorDirectory>,
    local_host: String,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedSender>>,
    inflight: Inflight,
}

impl SenderResolver {
    pub fn new(directory: Arc<dyn ActorDirectory>, local_host: impl Into<String>, ttl: Duration) -> Self {
        Self {
            directory,
            local_host: local_host.into(),
            ttl,
            cache: RwLock::new(HashMap::new()),
            inflight: StdMutex::new(HashMap::new()),
        }
    }

    /// `body_author` is only consulted for instance signatures.
    pub async fn resolve(&self, signed_by: &SignedBy, body_author: Option<&Url>) -> Result<RemoteActor, InboxError> {
        let sender = match signed_by {
            SignedBy::Actor(uri) => self.resolve_actor(uri).await?,
            SignedBy::Instance => {
                let host = body_author
                    .and_then(host_with_port)
                    .ok_or_else(|| InboxError::validation("Instance signature requires an author in the body"))?;
                self.resolve_instance(&host).await?
            }
        };
        if !sender.is_remote {
            return Err(InboxError::bad_request("Cannot send federation requests to local users"));
        }
        Ok(sender)
    }

    pub async fn invalidate(&self, uri: &Url) {
        self.cache.write().await.remove(&actor_key(uri));
    }

    async fn resolve_actor(&self, uri: &Url) -> Result<RemoteActor, InboxError> {
        let key = actor_key(uri);
        let not_found = || InboxError::not_found(format!("Could not resolve sender URI {uri}"));
        self.single_flight(&key, move || async move {
            match self.directory.resolve(uri).await {
                Ok(found) => Ok::<_, InboxError>(found.map(RemoteActor::from_actor)),
                Err(e) => {
                    warn!(%uri, "sender resolution failed: {e:#}");
                    Ok(None)
                }
            }
        })
        .await?
        .ok_or_else(not_found)
    }

    async fn resolve_instance(&self, host: &str) -> Result<RemoteActor, InboxError> {
        if host == self.local_host {
            return Err(InboxError::bad_request("Cannot send federation requests to local users"));
        }
        let key = format!("instance:{host}");
        let not_found = || InboxError::not_found(format!("Could not resolve instance {host}"));
        self.single_flight(&key, move || async move {
            let instance = match self.directory.resolve_instance(host).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(%host, "instance resolution failed: {e:#}");
                    None
                }
            };
            let Some(instance) = instance else {
                return Ok::<_, InboxError>(None);
            };
            let uri = match Url::parse(&instance.base_url) {
                Ok(uri) => uri,
                Err(e) => return Err(InboxError::Internal(anyhow::anyhow!("instance base url: {e}"))),
            };
            Ok(Some(RemoteActor {
                uri,
                public_key: instance.public_key,
                key_algorithm: instance.key_algorithm,
                instance_base_url: instance.base_url,
                is_remote: true,
                actor: None,
            }))
        })
        .await?
        .ok_or_else(not_found)
    }

    async fn cached(&self, key: &str) -> Option<RemoteActor> {
        let cache = self.cache.read().await;
        cache
            .get(key)
            .filter(|c| c.expires_at > Instant::now())
            .map(|c| c.sender.clone())
    }

    async fn single_flight<F, Fut>(&self, key: &str, lookup: F) -> Result<Option<RemoteActor>, InboxError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<RemoteActor>, InboxError>>,
    {
        if let Some(hit) = self.cached(key).await {
            return Ok(Some(hit));
        }
        let ticket = FlightTicket::join(&self.inflight, key);
        let _turn = ticket.gate.lock().await;
        if let Some(hit) = self.cached(key).await {
            return Ok(Some(hit));
        }
        debug!(key, "resolving sender");
        let found = lookup().await;
        if let Ok(Some(sender)) = &found {
            let now = Instant::now();
            let mut cache = self.cache.write().await;
            cache.retain(|_, c| c.expires_at > now);
            cache.insert(
                key.to_string(),
                CachedSender {
                    sender: sender.clone(),
                    expires_at: now + self.ttl,
                },
            );
        }
        found
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn actor_key(uri: &Url) -> String {
    format!("actor:{uri}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InstanceKey;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingDirectory {
        calls: AtomicUsize,
        actor: Option<Actor>,
        delay: Duration,
    }

    #[async_trait]
    impl ActorDirectory for CountingDirectory {
        async fn find_by_id(&self, _id: Uuid) -> Result<Option<Actor>> {
            Ok(None)
        }
        async fn find_by_uri(&self, _uri: &Url) -> Result<Option<Actor>> {
            Ok(None)
        }
        async fn resolve(&self, _uri: &Url) -> Result<Option<Actor>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.actor.clone())
        }
        async fn save_from_remote(&self, _uri: &Url) -> Result<Option<Actor>> {
            Ok(None)
        }
        async fn resolve_instance(&self, host: &str) -> Result<Option<InstanceKey>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(InstanceKey {
                host: host.to_string(),
                base_url: format!("https://{host}"),
                public_key: "k".into(),
                key_algorithm: "ed25519".into(),
            }))
        }
        async fn delete_actor(&self, _id: Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    fn actor(remote: bool) -> Actor {
        Actor {
            id: Uuid::new_v4(),
            uri: Url::parse("https://remote.example/users/bob").unwrap(),
            username: "bob".into(),
            public_key: "k".into(),
            key_algorithm: "ed25519".into(),
            inbox: None,
            instance_base_url: "https://remote.example".into(),
            is_remote: remote,
            is_locked: false,
        }
    }

    fn resolver(actor: Option<Actor>) -> (Arc<CountingDirectory>, SenderResolver) {
        resolver_with(actor, Duration::from_millis(20), Duration::from_secs(60))
    }

    fn resolver_with(actor: Option<Actor>, delay: Duration, ttl: Duration) -> (Arc<CountingDirectory>, SenderResolver) {
        let dir = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            actor,
            delay,
        });
        let r = SenderResolver::new(dir.clone(), "local.example", ttl);
        (dir, r)
    }

    #[test]
    fn signed_by_parsing() {
        assert_eq!(SignedBy::parse("instance").unwrap(), SignedBy::Instance);
        assert!(matches!(
            SignedBy::parse("https://remote.example/users/bob").unwrap(),
            SignedBy::Actor(_)
        ));
        assert!(SignedBy::parse("not a uri").is_err());
        assert!(SignedBy::parse("mailto:bob@remote.example").is_err());
    }

    #[test]
    fn origin_host_prefers_signer_then_body_author() {
        let body = br#"{"type":"Follow","author":"https://Author.example:8443/users/a"}"#;
        assert_eq!(origin_host(Some("https://signer.example/users/s"), body), "signer.example");
        assert_eq!(origin_host(Some("instance"), body), "author.example:8443");
        assert_eq!(origin_host(None, body), "author.example:8443");
        assert_eq!(origin_host(Some("instance"), b"{not json"), "");
    }

    #[tokio::test]
    async fn concurrent_lookups_fetch_once() {
        let (dir, r) = resolver(Some(actor(true)));
        let r = Arc::new(r);
        let signer = SignedBy::parse("https://remote.example/users/bob").unwrap();
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let r = r.clone();
                let signer = signer.clone();
                tokio::spawn(async move { r.resolve(&signer, None).await })
            })
            .collect();
        for t in tasks {
            assert!(t.await.unwrap().is_ok());
        }
        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.inflight_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let (dir, r) = resolver(Some(actor(true)));
        let uri = Url::parse("https://remote.example/users/bob").unwrap();
        let signer = SignedBy::Actor(uri.clone());
        r.resolve(&signer, None).await.unwrap();
        r.resolve(&signer, None).await.unwrap();
        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
        r.invalidate(&uri).await;
        r.resolve(&signer, None).await.unwrap();
        assert_eq!(dir.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_sender_is_not_found_with_identifier() {
        let (_dir, r) = resolver(None);
        let err = r
            .resolve(&SignedBy::parse("https://remote.example/users/ghost").unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, InboxError::NotFound(_)));
        assert!(err.to_string().contains("https://remote.example/users/ghost"));
    }

    #[tokio::test]
    async fn local_sender_is_rejected() {
        let (_dir, r) = resolver(Some(actor(false)));
        let err = r
            .resolve(&SignedBy::parse("https://remote.example/users/bob").unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, InboxError::BadRequest(_)));
    }

    #[tokio::test]
    async fn instance_signer_uses_body_author_host() {
        let (_dir, r) = resolver(None);
        let author = Url::parse("https://remote.example/users/bob").unwrap();
        let sender = r.resolve(&SignedBy::Instance, Some(&author)).await.unwrap();
        assert!(sender.actor.is_none());
        assert_eq!(sender.instance_base_url, "https://remote.example");

        let local = Url::parse("https://local.example/users/a").unwrap();
        let err = r.resolve(&SignedBy::Instance, Some(&local)).await.unwrap_err();
        assert!(matches!(err, InboxError::BadRequest(_)));
        assert!(matches!(
            r.resolve(&SignedBy::Instance, None).await.unwrap_err(),
            InboxError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn cancelled_lookups_leave_no_inflight_entries() {
        let (_dir, r) = resolver_with(Some(actor(true)), Duration::from_secs(60), Duration::from_secs(60));
        for i in 0..100 {
            let signer = SignedBy::parse(&format!("https://slow.example/users/{i}")).unwrap();
            let res = tokio::time::timeout(Duration::from_millis(5), r.resolve(&signer, None)).await;
            assert!(res.is_err());
        }
        assert_eq!(r.inflight_len(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_strand_the_leader() {
        let (dir, r) = resolver_with(Some(actor(true)), Duration::from_millis(50), Duration::from_secs(60));
        let r = Arc::new(r);
        let signer = SignedBy::parse("https://remote.example/users/bob").unwrap();
        let leader = {
            let (r, signer) = (r.clone(), signer.clone());
            tokio::spawn(async move { r.resolve(&signer, None).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(tokio::time::timeout(Duration::from_millis(5), r.resolve(&signer, None)).await.is_err());
        assert!(leader.await.unwrap().is_ok());
        assert_eq!(r.inflight_len(), 0);
        r.resolve(&signer, None).await.unwrap();
        assert_eq!(dir.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_on_insert() {
        let (_dir, r) = resolver_with(Some(actor(true)), Duration::ZERO, Duration::from_millis(10));
        r.resolve(&SignedBy::parse("https://remote.example/users/a").unwrap(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        r.resolve(&SignedBy::parse("https://remote.example/users/b").unwrap(), None).await.unwrap();
        let cache = r.cache.read().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("actor:https://remote.example/users/b"));
    }
}
