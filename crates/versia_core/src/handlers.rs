/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! One function per entity kind. Each applies a single idempotent transition
//! and returns the protocol outcome; unexpected failures bubble up as
//! `InboxError::Internal` to the dispatcher.

use anyhow::Context;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;
use versia_protocol::{
    preferred_content, Delete, Entity, Follow, FollowAccept, FollowReject, Like, Note, User, LIKE_TYPE,
};

use crate::config::host_with_port;
use crate::error::{InboxError, InboxResult, Outcome};
use crate::sender::SenderResolver;
use crate::store::{
    Actor, ActorDirectory, FederationOutbox, FollowState, NewLike, NewNote, NewNotification, NotificationKind,
    RelationshipPatch, SocialStore,
};

pub struct HandlerContext<'a> {
    pub directory: &'a dyn ActorDirectory,
    pub store: &'a dyn SocialStore,
    pub outbox: &'a dyn FederationOutbox,
    pub senders: &'a SenderResolver,
    /// Local owner of the inbox.
    pub target: &'a Actor,
    /// Signing actor, absent for bridged and instance-signed requests.
    pub signer: Option<&'a Url>,
    /// Host whose instance key signed the request.
    pub instance_host: Option<&'a str>,
}

pub async fn dispatch(ctx: &HandlerContext<'_>, entity: Entity) -> InboxResult {
    authorize(&entity, ctx.signer, ctx.instance_host)?;
    match entity {
        Entity::Note(note) => handle_note(ctx, note).await,
        Entity::Follow(follow) => handle_follow(ctx, follow).await,
        Entity::FollowAccept(accept) => handle_follow_accept(ctx, accept).await,
        Entity::FollowReject(reject) => handle_follow_reject(ctx, reject).await,
        Entity::Like(like) => handle_like(ctx, like).await,
        Entity::Delete(delete) => handle_delete(ctx, delete).await,
        Entity::User(user) => handle_user(ctx, user).await,
        Entity::Unknown => Err(InboxError::bad_request("Unknown entity type")),
    }
}

/// Account an entity claims to act for.
fn claimed_author(entity: &Entity) -> Option<&Url> {
    match entity {
        Entity::Note(n) => Some(&n.author),
        Entity::Follow(f) => Some(&f.author),
        Entity::FollowAccept(a) => Some(&a.author),
        Entity::FollowReject(r) => Some(&r.author),
        Entity::Like(l) => Some(&l.author),
        Entity::Delete(d) => d.author.as_ref(),
        Entity::User(u) => Some(&u.uri),
        Entity::Unknown => None,
    }
}

/// An actor signature only vouches for that actor; an instance signature
/// only for accounts on that instance.
fn authorize(entity: &Entity, signer: Option<&Url>, instance_host: Option<&str>) -> Result<(), InboxError> {
    let Some(author) = claimed_author(entity) else {
        return Ok(());
    };
    if let Some(signer) = signer {
        if author != signer {
            return Err(InboxError::Forbidden(format!(
                "{} author does not match the signer",
                entity.kind()
            )));
        }
    }
    if let Some(host) = instance_host {
        if host_with_port(author).as_deref() != Some(host) {
            return Err(InboxError::Forbidden(format!(
                "{} author is not on the signing instance",
                entity.kind()
            )));
        }
    }
    Ok(())
}

async fn handle_note(ctx: &HandlerContext<'_>, note: Note) -> InboxResult {
    let author = ctx
        .directory
        .resolve(&note.author)
        .await?
        .ok_or_else(|| InboxError::not_found("Author not found"))?;

    let (content_type, content) = note
        .content
        .as_ref()
        .and_then(preferred_content)
        .map(|(t, c)| (t.to_string(), c.to_string()))
        .unwrap_or_else(|| ("text/plain".to_string(), String::new()));
    let raw_json = serde_json::to_vec(&note).context("serialize note")?;
    let new_note = NewNote {
        uri: note.uri,
        author_id: author.id,
        content,
        content_type,
        is_sensitive: note.is_sensitive,
        subject: note.subject,
        replies_to: note.replies_to,
        quotes: note.quotes,
        created_at: note.created_at,
        raw_json,
    };
    ctx.store
        .upsert_note(new_note)
        .await
        .map_err(|e| InboxError::Internal(e.context("Note could not be created")))?;
    Ok(Outcome::created("Note created"))
}

async fn handle_follow(ctx: &HandlerContext<'_>, follow: Follow) -> InboxResult {
    let author = ctx
        .directory
        .resolve(&follow.author)
        .await?
        .ok_or_else(|| InboxError::bad_request("Author not found"))?;
    let target = ctx.target;

    let existing = ctx.store.relationship(author.id, target.id).await?;
    if existing.following || existing.requested {
        return Ok(Outcome::ok("Already following"));
    }

    let (state, kind) = if target.is_locked {
        (FollowState::REQUESTED, NotificationKind::FollowRequest)
    } else {
        (FollowState::FOLLOWING, NotificationKind::Follow)
    };
    let applied = ctx
        .store
        .transition_relationship(
            author.id,
            target.id,
            FollowState::NONE,
            RelationshipPatch {
                state,
                showing_reblogs: Some(true),
                notifying: Some(true),
            },
            Some(NewNotification {
                kind,
                account_id: author.id,
                notified_id: target.id,
                note_id: None,
            }),
        )
        .await?;
    if !applied {
        // Lost the race against a concurrent delivery of the same follow.
        return Ok(Outcome::ok("Already following"));
    }

    if !target.is_locked {
        let accept = Entity::FollowAccept(FollowAccept {
            id: Uuid::new_v4().to_string(),
            author: target.uri.clone(),
            follower: author.uri.clone(),
            created_at: now_rfc3339(),
        });
        if let Err(e) = ctx.outbox.send(accept, &author).await {
            warn!(follower = %author.uri, "FollowAccept not queued: {e:#}");
        }
    }
    Ok(Outcome::ok("Follow request sent"))
}

async fn handle_follow_accept(ctx: &HandlerContext<'_>, accept: FollowAccept) -> InboxResult {
    let author = ctx
        .directory
        .resolve(&accept.author)
        .await?
        .ok_or_else(|| InboxError::bad_request("Author not found"))?;
    let accepted = ctx
        .store
        .transition_relationship(
            ctx.target.id,
            author.id,
            FollowState::REQUESTED,
            RelationshipPatch::state(FollowState::FOLLOWING),
            None,
        )
        .await?;
    Ok(Outcome::ok(if accepted {
        "Follow request accepted"
    } else {
        "There is no follow request to accept"
    }))
}

async fn handle_follow_reject(ctx: &HandlerContext<'_>, reject: FollowReject) -> InboxResult {
    let author = ctx
        .directory
        .resolve(&reject.author)
        .await?
        .ok_or_else(|| InboxError::bad_request("Author not found"))?;
    let rejected = ctx
        .store
        .transition_relationship(
            ctx.target.id,
            author.id,
            FollowState::REQUESTED,
            RelationshipPatch::state(FollowState::NONE),
            None,
        )
        .await?;
    Ok(Outcome::ok(if rejected {
        "Follow request rejected"
    } else {
        "There is no follow request to reject"
    }))
}

async fn handle_like(ctx: &HandlerContext<'_>, like: Like) -> InboxResult {
    let author = ctx
        .directory
        .resolve(&like.author)
        .await?
        .ok_or_else(|| InboxError::bad_request("Author not found"))?;
    let note = ctx
        .store
        .find_note_by_uri(&like.liked)
        .await?
        .ok_or_else(|| InboxError::bad_request("Liked Note not found"))?;

    let note_author = ctx.directory.find_by_id(note.author_id).await?;
    let notify = note_author.filter(|a| !a.is_remote).map(|a| NewNotification {
        kind: NotificationKind::Favourite,
        account_id: author.id,
        notified_id: a.id,
        note_id: Some(note.id),
    });
    let added = ctx
        .store
        .add_like(
            NewLike {
                uri: like.uri,
                liker_id: author.id,
                note_id: note.id,
            },
            notify,
        )
        .await?;
    if !added {
        debug!(liker = %author.uri, note = %note.uri, "like already recorded");
    }
    Ok(Outcome::ok("Like added"))
}

async fn handle_delete(ctx: &HandlerContext<'_>, delete: Delete) -> InboxResult {
    let target = ctx.target;
    match delete.deleted_type.as_str() {
        "Note" => {
            if !ctx.store.delete_note_owned(&delete.deleted, target.id).await? {
                return Err(InboxError::not_found("Note not found or not owned by user"));
            }
            Ok(Outcome::ok("Note deleted"))
        }
        "User" => {
            let author = delete.author.as_ref().or(ctx.signer);
            if delete.deleted != target.uri || author.is_some_and(|a| *a != target.uri) {
                return Err(InboxError::bad_request("Cannot delete other users than self"));
            }
            if !ctx.directory.delete_actor(target.id).await? {
                return Err(InboxError::not_found("User not found"));
            }
            ctx.senders.invalidate(&target.uri).await;
            Ok(Outcome::ok("Account deleted, goodbye 👋"))
        }
        LIKE_TYPE => {
            if !ctx.store.delete_like_owned(&delete.deleted, target.id).await? {
                return Err(InboxError::not_found("Like not found or not owned by user"));
            }
            Ok(Outcome::ok("Like deleted"))
        }
        other => Err(InboxError::bad_request(format!(
            "Deletion of object type {other} not implemented"
        ))),
    }
}

async fn handle_user(ctx: &HandlerContext<'_>, user: User) -> InboxResult {
    match ctx.directory.save_from_remote(&user.uri).await {
        Ok(Some(_)) => {
            ctx.senders.invalidate(&user.uri).await;
            Ok(Outcome::ok("User refreshed"))
        }
        Ok(None) => Err(InboxError::Internal(anyhow::anyhow!(
            "Could not refresh user {}",
            user.uri
        ))),
        Err(e) => Err(InboxError::Internal(e.context("Failed to update user"))),
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
