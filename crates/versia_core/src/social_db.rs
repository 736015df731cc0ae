/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;
use uuid::Uuid;

use crate::store::{
    Actor, FollowState, InstanceKey, NewLike, NewNote, NewNotification, NotificationKind, Relationship,
    RelationshipPatch, SocialStore, StoredNote,
};

const ACTOR_COLUMNS: &str =
    "id, uri, username, public_key, key_algorithm, inbox, instance_base_url, is_remote, is_locked";

#[derive(Clone)]
pub struct SocialDb {
    path: PathBuf,
}

impl SocialDb {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS actors (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              username TEXT NOT NULL,
              public_key TEXT NOT NULL,
              key_algorithm TEXT NOT NULL,
              inbox TEXT NULL,
              instance_base_url TEXT NOT NULL,
              is_remote INTEGER NOT NULL,
              is_locked INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS instances (
              host TEXT PRIMARY KEY,
              base_url TEXT NOT NULL,
              public_key TEXT NOT NULL,
              key_algorithm TEXT NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relationships (
              owner_id TEXT NOT NULL,
              subject_id TEXT NOT NULL,
              following INTEGER NOT NULL DEFAULT 0,
              requested INTEGER NOT NULL DEFAULT 0,
              showing_reblogs INTEGER NOT NULL DEFAULT 0,
              notifying INTEGER NOT NULL DEFAULT 0,
              languages TEXT NOT NULL DEFAULT '[]',
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              PRIMARY KEY(owner_id, subject_id)
            );

            CREATE TABLE IF NOT EXISTS notifications (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              kind TEXT NOT NULL,
              account_id TEXT NOT NULL,
              notified_id TEXT NOT NULL,
              note_id TEXT NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_notified ON notifications(notified_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS notes (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              author_id TEXT NOT NULL,
              content TEXT NOT NULL,
              content_type TEXT NOT NULL,
              is_sensitive INTEGER NOT NULL,
              subject TEXT NULL,
              replies_to TEXT NULL,
              quotes TEXT NULL,
              created_at TEXT NOT NULL,
              note_json BLOB NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notes_author ON notes(author_id);

            CREATE TABLE IF NOT EXISTS likes (
              id TEXT PRIMARY KEY,
              uri TEXT NOT NULL UNIQUE,
              liker_id TEXT NOT NULL,
              note_id TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL,
              UNIQUE(liker_id, note_id)
            );
            "#,
        )?;
        Ok(Self { path })
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn insert_local_actor(
        &self,
        base_url: &str,
        username: &str,
        public_key: &str,
        is_locked: bool,
    ) -> Result<Actor> {
        let id = Uuid::new_v4();
        let base = base_url.trim_end_matches('/');
        let uri = Url::parse(&format!("{base}/users/{id}")).context("local actor uri")?;
        let inbox = Url::parse(&format!("{base}/users/{id}/inbox")).context("local inbox uri")?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO actors({ACTOR_COLUMNS}, updated_at_ms) VALUES (?1, ?2, ?3, ?4, 'ed25519', ?5, ?6, 0, ?7, ?8)"
            ),
            params![id.to_string(), uri.as_str(), username, public_key, inbox.as_str(), base, is_locked, now_ms()],
        )?;
        self.get_actor_by_id(id)?
            .ok_or_else(|| anyhow!("local actor vanished after insert"))
    }

    /// Returns the local account with this username, creating it if needed.
    pub fn ensure_local_actor(
        &self,
        base_url: &str,
        username: &str,
        public_key: &str,
        is_locked: bool,
    ) -> Result<Actor> {
        let existing = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {ACTOR_COLUMNS} FROM actors WHERE username=?1 AND is_remote=0"),
                params![username],
                map_actor,
            )
            .optional()?
        };
        match existing {
            Some(actor) => Ok(actor),
            None => self.insert_local_actor(base_url, username, public_key, is_locked),
        }
    }

    pub fn upsert_remote_actor(&self, user: &versia_protocol::User, instance_base_url: &str) -> Result<Actor> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO actors({ACTOR_COLUMNS}, updated_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9)
                ON CONFLICT(uri) DO UPDATE SET
                  username=excluded.username,
                  public_key=excluded.public_key,
                  key_algorithm=excluded.key_algorithm,
                  inbox=excluded.inbox,
                  instance_base_url=excluded.instance_base_url,
                  is_locked=excluded.is_locked,
                  updated_at_ms=excluded.updated_at_ms
                WHERE actors.is_remote=1
                "#
            ),
            params![
                Uuid::new_v4().to_string(),
                user.uri.as_str(),
                user.username,
                user.public_key.key,
                user.public_key.algorithm,
                user.inbox.as_str(),
                instance_base_url,
                user.manually_approves_followers,
                now_ms()
            ],
        )?;
        let actor = self
            .get_actor_by_uri(&user.uri)?
            .ok_or_else(|| anyhow!("remote actor vanished after upsert"))?;
        if !actor.is_remote {
            return Err(anyhow!("refusing to overwrite local actor {}", user.uri));
        }
        Ok(actor)
    }

    pub fn get_actor_by_id(&self, id: Uuid) -> Result<Option<Actor>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ACTOR_COLUMNS} FROM actors WHERE id=?1"),
            params![id.to_string()],
            map_actor,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_actor_by_uri(&self, uri: &Url) -> Result<Option<Actor>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ACTOR_COLUMNS} FROM actors WHERE uri=?1"),
            params![uri.as_str()],
            map_actor,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Removes the actor and everything it owns.
    pub fn delete_actor(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id = id.to_string();
        tx.execute(
            "DELETE FROM likes WHERE liker_id=?1 OR note_id IN (SELECT id FROM notes WHERE author_id=?1)",
            params![id],
        )?;
        tx.execute("DELETE FROM notes WHERE author_id=?1", params![id])?;
        tx.execute(
            "DELETE FROM relationships WHERE owner_id=?1 OR subject_id=?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM notifications WHERE account_id=?1 OR notified_id=?1",
            params![id],
        )?;
        let n = tx.execute("DELETE FROM actors WHERE id=?1", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    pub fn upsert_instance(&self, key: &InstanceKey) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO instances(host, base_url, public_key, key_algorithm, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(host) DO UPDATE SET
              base_url=excluded.base_url,
              public_key=excluded.public_key,
              key_algorithm=excluded.key_algorithm,
              updated_at_ms=excluded.updated_at_ms
            "#,
            params![key.host, key.base_url, key.public_key, key.key_algorithm, now_ms()],
        )?;
        Ok(())
    }

    pub fn get_instance(&self, host: &str) -> Result<Option<InstanceKey>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT host, base_url, public_key, key_algorithm FROM instances WHERE host=?1",
            params![host],
            |r| {
                Ok(InstanceKey {
                    host: r.get(0)?,
                    base_url: r.get(1)?,
                    public_key: r.get(2)?,
                    key_algorithm: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn get_relationship(&self, owner: Uuid, subject: Uuid) -> Result<Relationship> {
        let conn = self.conn()?;
        ensure_relationship(&conn, owner, subject)?;
        let row = conn.query_row(
            r#"
            SELECT following, requested, showing_reblogs, notifying, languages
            FROM relationships WHERE owner_id=?1 AND subject_id=?2
            "#,
            params![owner.to_string(), subject.to_string()],
            |r| {
                Ok((
                    r.get::<_, bool>(0)?,
                    r.get::<_, bool>(1)?,
                    r.get::<_, bool>(2)?,
                    r.get::<_, bool>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )?;
        let (following, requested, showing_reblogs, notifying, languages) = row;
        Ok(Relationship {
            owner,
            subject,
            following,
            requested,
            showing_reblogs,
            notifying,
            languages: serde_json::from_str(&languages).unwrap_or_default(),
        })
    }

    pub fn count_relationships(&self, owner: Uuid, subject: Uuid) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM relationships WHERE owner_id=?1 AND subject_id=?2",
            params![owner.to_string(), subject.to_string()],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    pub fn transition_relationship(
        &self,
        owner: Uuid,
        subject: Uuid,
        expected: FollowState,
        patch: &RelationshipPatch,
        notify: Option<&NewNotification>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_relationship(&tx, owner, subject)?;
        let changed = tx.execute(
            r#"
            UPDATE relationships SET
              following=?3,
              requested=?4,
              showing_reblogs=COALESCE(?5, showing_reblogs),
              notifying=COALESCE(?6, notifying),
              updated_at_ms=?7
            WHERE owner_id=?1 AND subject_id=?2 AND following=?8 AND requested=?9
            "#,
            params![
                owner.to_string(),
                subject.to_string(),
                patch.state.following,
                patch.state.requested,
                patch.showing_reblogs,
                patch.notifying,
                now_ms(),
                expected.following,
                expected.requested
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        if let Some(n) = notify {
            insert_notification(&tx, n)?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn count_notifications(&self, notified: Uuid, kind: NotificationKind) -> Result<u64> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE notified_id=?1 AND kind=?2",
            params![notified.to_string(), kind.as_str()],
            |r| r.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    pub fn upsert_note(&self, note: &NewNote) -> Result<StoredNote> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO notes(id, uri, author_id, content, content_type, is_sensitive, subject, replies_to, quotes, created_at, note_json, updated_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(uri) DO UPDATE SET
              content=excluded.content,
              content_type=excluded.content_type,
              is_sensitive=excluded.is_sensitive,
              subject=excluded.subject,
              note_json=excluded.note_json,
              updated_at_ms=excluded.updated_at_ms
            WHERE notes.author_id=excluded.author_id
            "#,
            params![
                Uuid::new_v4().to_string(),
                note.uri.as_str(),
                note.author_id.to_string(),
                note.content,
                note.content_type,
                note.is_sensitive,
                note.subject,
                note.replies_to.as_ref().map(Url::as_str),
                note.quotes.as_ref().map(Url::as_str),
                note.created_at,
                note.raw_json,
                now_ms()
            ],
        )?;
        let stored = self
            .find_note_by_uri(&note.uri)?
            .ok_or_else(|| anyhow!("note vanished after upsert"))?;
        if stored.author_id != note.author_id {
            return Err(anyhow!("note {} belongs to another author", note.uri));
        }
        Ok(stored)
    }

    pub fn find_note_by_uri(&self, uri: &Url) -> Result<Option<StoredNote>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, uri, author_id FROM notes WHERE uri=?1",
            params![uri.as_str()],
            |r| {
                Ok(StoredNote {
                    id: uuid_col(r, 0)?,
                    uri: url_col(r, 1)?,
                    author_id: uuid_col(r, 2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn delete_note_owned(&self, uri: &Url, author_id: Uuid) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let note_id: Option<String> = tx
            .query_row(
                "SELECT id FROM notes WHERE uri=?1 AND author_id=?2",
                params![uri.as_str(), author_id.to_string()],
                |r| r.get(0),
            )
            .optional()?;
        let Some(note_id) = note_id else {
            return Ok(false);
        };
        tx.execute("DELETE FROM likes WHERE note_id=?1", params![note_id])?;
        tx.execute("DELETE FROM notifications WHERE note_id=?1", params![note_id])?;
        tx.execute("DELETE FROM notes WHERE id=?1", params![note_id])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn add_like(&self, like: &NewLike, notify: Option<&NewNotification>) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO likes(id, uri, liker_id, note_id, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                like.uri.as_str(),
                like.liker_id.to_string(),
                like.note_id.to_string(),
                now_ms()
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        if let Some(n) = notify {
            insert_notification(&tx, n)?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn like_exists(&self, uri: &Url) -> Result<bool> {
        let conn = self.conn()?;
        let hit: Option<i64> = conn
            .query_row("SELECT 1 FROM likes WHERE uri=?1", params![uri.as_str()], |r| r.get(0))
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn delete_like_owned(&self, uri: &Url, liker_id: Uuid) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM likes WHERE uri=?1 AND liker_id=?2",
            params![uri.as_str(), liker_id.to_string()],
        )?;
        Ok(n > 0)
    }
}

fn ensure_relationship(conn: &Connection, owner: Uuid, subject: Uuid) -> Result<()> {
    let now = now_ms();
    conn.execute(
        "INSERT OR IGNORE INTO relationships(owner_id, subject_id, created_at_ms, updated_at_ms) VALUES (?1, ?2, ?3, ?3)",
        params![owner.to_string(), subject.to_string(), now],
    )?;
    Ok(())
}

fn insert_notification(conn: &Connection, n: &NewNotification) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications(kind, account_id, notified_id, note_id, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            n.kind.as_str(),
            n.account_id.to_string(),
            n.notified_id.to_string(),
            n.note_id.map(|id| id.to_string()),
            now_ms()
        ],
    )?;
    Ok(())
}

fn map_actor(r: &Row<'_>) -> rusqlite::Result<Actor> {
    let inbox: Option<String> = r.get(5)?;
    Ok(Actor {
        id: uuid_col(r, 0)?,
        uri: url_col(r, 1)?,
        username: r.get(2)?,
        public_key: r.get(3)?,
        key_algorithm: r.get(4)?,
        inbox: inbox.and_then(|s| Url::parse(&s).ok()),
        instance_base_url: r.get(6)?,
        is_remote: r.get(7)?,
        is_locked: r.get(8)?,
    })
}

fn uuid_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = r.get(idx)?;
    Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn url_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<Url> {
    let s: String = r.get(idx)?;
    Url::parse(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl SocialDb {
    /// Runs `f` on the blocking pool with its own handle to the database.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&SocialDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl SocialStore for SocialDb {
    async fn relationship(&self, owner: Uuid, subject: Uuid) -> Result<Relationship> {
        self.blocking(move |db| db.get_relationship(owner, subject)).await
    }

    async fn transition_relationship(
        &self,
        owner: Uuid,
        subject: Uuid,
        expected: FollowState,
        patch: RelationshipPatch,
        notify: Option<NewNotification>,
    ) -> Result<bool> {
        self.blocking(move |db| {
            SocialDb::transition_relationship(db, owner, subject, expected, &patch, notify.as_ref())
        })
        .await
    }

    async fn upsert_note(&self, note: NewNote) -> Result<StoredNote> {
        self.blocking(move |db| SocialDb::upsert_note(db, &note)).await
    }

    async fn find_note_by_uri(&self, uri: &Url) -> Result<Option<StoredNote>> {
        let uri = uri.clone();
        self.blocking(move |db| SocialDb::find_note_by_uri(db, &uri)).await
    }

    async fn delete_note_owned(&self, uri: &Url, author_id: Uuid) -> Result<bool> {
        let uri = uri.clone();
        self.blocking(move |db| SocialDb::delete_note_owned(db, &uri, author_id)).await
    }

    async fn add_like(&self, like: NewLike, notify: Option<NewNotification>) -> Result<bool> {
        self.blocking(move |db| SocialDb::add_like(db, &like, notify.as_ref())).await
    }

    async fn delete_like_owned(&self, uri: &Url, liker_id: Uuid) -> Result<bool> {
        let uri = uri.clone();
        self.blocking(move |db| SocialDb::delete_like_owned(db, &uri, liker_id)).await
    }
}
