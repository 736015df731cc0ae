/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNED_BY: &str = "x-signed-by";

/// `X-Signed-By` value used when the remote server itself signed the request.
pub const SIGNED_BY_INSTANCE: &str = "instance";

pub const LIKE_TYPE: &str = "pub.versia:likes/Like";

/// Inbound federation entity. The set is closed: anything with an
/// unrecognised `type` decodes to `Unknown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Entity {
    Note(Note),
    Follow(Follow),
    FollowAccept(FollowAccept),
    FollowReject(FollowReject),
    #[serde(rename = "pub.versia:likes/Like")]
    Like(Like),
    Delete(Delete),
    User(User),
    #[serde(other)]
    Unknown,
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Note(_) => "Note",
            Entity::Follow(_) => "Follow",
            Entity::FollowAccept(_) => "FollowAccept",
            Entity::FollowReject(_) => "FollowReject",
            Entity::Like(_) => LIKE_TYPE,
            Entity::Delete(_) => "Delete",
            Entity::User(_) => "User",
            Entity::Unknown => "unknown",
        }
    }
}

/// Content keyed by MIME type, e.g. `{"text/html": {"content": "<p>hi</p>"}}`.
pub type ContentFormat = BTreeMap<String, ContentValue>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentValue {
    pub content: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remote: bool,
}

/// Picks the richest representation available: HTML first, then plain text,
/// then whatever comes first.
pub fn preferred_content(content: &ContentFormat) -> Option<(&str, &str)> {
    for mime in ["text/html", "text/markdown", "text/plain"] {
        if let Some(v) = content.get(mime) {
            return Some((mime, v.content.as_str()));
        }
    }
    content
        .iter()
        .next()
        .map(|(k, v)| (k.as_str(), v.content.as_str()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: String,
    pub uri: Url,
    pub author: Url,
    pub created_at: String,
    #[serde(default)]
    pub content: Option<ContentFormat>,
    #[serde(default)]
    pub is_sensitive: bool,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub replies_to: Option<Url>,
    #[serde(default)]
    pub quotes: Option<Url>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Follow {
    pub id: String,
    pub author: Url,
    pub followee: Url,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowAccept {
    pub id: String,
    pub author: Url,
    pub follower: Url,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowReject {
    pub id: String,
    pub author: Url,
    pub follower: Url,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Like {
    pub id: String,
    pub uri: Url,
    pub author: Url,
    pub liked: Url,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delete {
    pub id: String,
    #[serde(default)]
    pub author: Option<Url>,
    pub deleted_type: String,
    pub deleted: Url,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub uri: Url,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub public_key: PublicKey,
    pub inbox: Url,
    #[serde(default)]
    pub manually_approves_followers: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicKey {
    #[serde(default)]
    pub actor: Option<Url>,
    pub algorithm: String,
    pub key: String,
}

/// Served from `/.well-known/versia`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceMetadata {
    #[serde(rename = "type")]
    pub ty: String,
    pub name: String,
    pub host: String,
    pub public_key: PublicKey,
    #[serde(default)]
    pub created_at: Option<String>,
}
