/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Collaborator interfaces the inbox reads and mutates. The pipeline only
//! sees these traits; `social_db` and `directory` hold the concrete adapters.

use anyhow::Result;
use async_trait::async_trait;
use url::Url;
use uuid::Uuid;
use versia_protocol::Entity;

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: Uuid,
    pub uri: Url,
    pub username: String,
    pub public_key: String,
    pub key_algorithm: String,
    pub inbox: Option<Url>,
    pub instance_base_url: String,
    pub is_remote: bool,
    /// Follows need manual approval.
    pub is_locked: bool,
}

/// Public key of a remote server as a whole, from its `/.well-known/versia`.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceKey {
    pub host: String,
    pub base_url: String,
    pub public_key: String,
    pub key_algorithm: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub owner: Uuid,
    pub subject: Uuid,
    pub following: bool,
    pub requested: bool,
    pub showing_reblogs: bool,
    pub notifying: bool,
    pub languages: Vec<String>,
}

impl Relationship {
    pub fn state(&self) -> FollowState {
        FollowState {
            following: self.following,
            requested: self.requested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowState {
    pub following: bool,
    pub requested: bool,
}

impl FollowState {
    pub const NONE: FollowState = FollowState { following: false, requested: false };
    pub const REQUESTED: FollowState = FollowState { following: false, requested: true };
    pub const FOLLOWING: FollowState = FollowState { following: true, requested: false };
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPatch {
    pub state: FollowState,
    pub showing_reblogs: Option<bool>,
    pub notifying: Option<bool>,
}

impl RelationshipPatch {
    pub fn state(state: FollowState) -> Self {
        Self {
            state,
            showing_reblogs: None,
            notifying: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Follow,
    FollowRequest,
    Favourite,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::FollowRequest => "follow_request",
            NotificationKind::Favourite => "favourite",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    /// Account that caused the notification.
    pub account_id: Uuid,
    pub notified_id: Uuid,
    pub note_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNote {
    pub uri: Url,
    pub author_id: Uuid,
    pub content: String,
    pub content_type: String,
    pub is_sensitive: bool,
    pub subject: Option<String>,
    pub replies_to: Option<Url>,
    pub quotes: Option<Url>,
    pub created_at: String,
    pub raw_json: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNote {
    pub id: Uuid,
    pub uri: Url,
    pub author_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLike {
    pub uri: Url,
    pub liker_id: Uuid,
    pub note_id: Uuid,
}

#[async_trait]
pub trait ActorDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Actor>>;

    /// Local lookup only, never touches the network.
    async fn find_by_uri(&self, uri: &Url) -> Result<Option<Actor>>;

    /// Cached lookup, fetching unknown remote actors.
    async fn resolve(&self, uri: &Url) -> Result<Option<Actor>>;

    /// Re-fetch a remote actor from its canonical URI and overwrite the cache.
    async fn save_from_remote(&self, uri: &Url) -> Result<Option<Actor>>;

    async fn resolve_instance(&self, host: &str) -> Result<Option<InstanceKey>>;

    async fn delete_actor(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait SocialStore: Send + Sync {
    /// Upsert-on-read: the (owner, subject) row exists after this returns.
    async fn relationship(&self, owner: Uuid, subject: Uuid) -> Result<Relationship>;

    /// Compare-and-set on the follow flags. Applies `patch` (and inserts
    /// `notify`) only when the row is still in `expected`; returns whether it did.
    async fn transition_relationship(
        &self,
        owner: Uuid,
        subject: Uuid,
        expected: FollowState,
        patch: RelationshipPatch,
        notify: Option<NewNotification>,
    ) -> Result<bool>;

    async fn upsert_note(&self, note: NewNote) -> Result<StoredNote>;

    async fn find_note_by_uri(&self, uri: &Url) -> Result<Option<StoredNote>>;

    async fn delete_note_owned(&self, uri: &Url, author_id: Uuid) -> Result<bool>;

    /// Returns false when a like with this URI (or by this liker on this note) already exists.
    async fn add_like(&self, like: NewLike, notify: Option<NewNotification>) -> Result<bool>;

    async fn delete_like_owned(&self, uri: &Url, liker_id: Uuid) -> Result<bool>;
}

/// Outbound side of federation. Implementations must not block on delivery.
#[async_trait]
pub trait FederationOutbox: Send + Sync {
    async fn send(&self, entity: Entity, recipient: &Actor) -> Result<()>;
}
