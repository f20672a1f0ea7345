//! Identity Store: durable linked-user and whitelist records (SQLite).
//!
//! Every write runs in its own transaction, so a crash leaves either the
//! whole row or nothing. Uniqueness of both ids is enforced by the schema
//! (primary key on the Telegram id, unique index on the Twitch id) and
//! pre-checked inside the same transaction so callers learn which id clashed.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::{
    domain::{LinkedUser, TelegramId, TwitchId, WhitelistedUser},
    errors::Error,
    Result,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS linked_users (
        tg_id        INTEGER NOT NULL PRIMARY KEY,
        twitch_id    INTEGER NOT NULL,
        display_name TEXT    NOT NULL,
        linked_at    INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_linked_users_twitch_id
        ON linked_users(twitch_id);

    CREATE TABLE IF NOT EXISTS whitelisted_users (
        tg_id INTEGER NOT NULL PRIMARY KEY,
        note  TEXT    NOT NULL DEFAULT ''
    );
";

pub struct IdentityStore {
    conn: Mutex<Connection>,
}

impl IdentityStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "opening identity store");
        let conn = Connection::open(path)?;
        // WAL keeps readers off the writer's back; not available for every
        // filesystem, so a refusal is only worth a debug line.
        if let Err(e) = conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(())) {
            debug!(error = %e, "WAL journal mode unavailable");
        }
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::External("identity store lock poisoned".to_string()))
    }

    // ============== Linked users ==============

    pub fn add_linked(
        &self,
        telegram_id: TelegramId,
        twitch_id: TwitchId,
        display_name: &str,
    ) -> Result<LinkedUser> {
        let linked_at = Utc::now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let tg_taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM linked_users WHERE tg_id = ?1)",
            params![telegram_id.0],
            |row| row.get(0),
        )?;
        if tg_taken {
            return Err(Error::telegram_exists(telegram_id));
        }
        let tw_taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM linked_users WHERE twitch_id = ?1)",
            params![twitch_id.0],
            |row| row.get(0),
        )?;
        if tw_taken {
            return Err(Error::twitch_exists(twitch_id));
        }

        tx.execute(
            "INSERT INTO linked_users (tg_id, twitch_id, display_name, linked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                telegram_id.0,
                twitch_id.0,
                display_name,
                linked_at.timestamp()
            ],
        )
        .map_err(|e| constraint_to_exists(e, telegram_id))?;
        tx.commit()?;

        Ok(LinkedUser {
            telegram_id,
            twitch_id,
            display_name: display_name.to_string(),
            linked_at: from_unix(linked_at.timestamp()),
        })
    }

    pub fn remove_linked(&self, telegram_id: TelegramId) -> Result<()> {
        let affected = self.conn()?.execute(
            "DELETE FROM linked_users WHERE tg_id = ?1",
            params![telegram_id.0],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "linked telegram user {}",
                telegram_id.0
            )));
        }
        Ok(())
    }

    pub fn get_by_telegram_id(&self, telegram_id: TelegramId) -> Result<Option<LinkedUser>> {
        let user = self
            .conn()?
            .query_row(
                "SELECT tg_id, twitch_id, display_name, linked_at
                 FROM linked_users WHERE tg_id = ?1",
                params![telegram_id.0],
                linked_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_by_twitch_id(&self, twitch_id: TwitchId) -> Result<Option<LinkedUser>> {
        let user = self
            .conn()?
            .query_row(
                "SELECT tg_id, twitch_id, display_name, linked_at
                 FROM linked_users WHERE twitch_id = ?1",
                params![twitch_id.0],
                linked_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Every linked user keyed by Twitch id, for bulk diffing.
    pub fn list_all_linked(&self) -> Result<HashMap<TwitchId, TelegramId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT twitch_id, tg_id FROM linked_users")?;
        let rows = stmt.query_map([], |row| {
            Ok((TwitchId(row.get(0)?), TelegramId(row.get(1)?)))
        })?;

        let mut out = HashMap::new();
        for row in rows {
            let (twitch_id, telegram_id) = row?;
            out.insert(twitch_id, telegram_id);
        }
        Ok(out)
    }

    // ============== Whitelist ==============

    pub fn add_whitelisted(&self, telegram_id: TelegramId, note: &str) -> Result<WhitelistedUser> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM whitelisted_users WHERE tg_id = ?1)",
            params![telegram_id.0],
            |row| row.get(0),
        )?;
        if taken {
            return Err(Error::telegram_exists(telegram_id));
        }

        tx.execute(
            "INSERT INTO whitelisted_users (tg_id, note) VALUES (?1, ?2)",
            params![telegram_id.0, note],
        )
        .map_err(|e| constraint_to_exists(e, telegram_id))?;
        tx.commit()?;

        Ok(WhitelistedUser {
            telegram_id,
            note: note.to_string(),
        })
    }

    pub fn remove_whitelisted(&self, telegram_id: TelegramId) -> Result<()> {
        let affected = self.conn()?.execute(
            "DELETE FROM whitelisted_users WHERE tg_id = ?1",
            params![telegram_id.0],
        )?;
        if affected == 0 {
            return Err(Error::NotFound(format!(
                "whitelisted telegram user {}",
                telegram_id.0
            )));
        }
        Ok(())
    }

    pub fn get_whitelisted(&self, telegram_id: TelegramId) -> Result<Option<WhitelistedUser>> {
        let user = self
            .conn()?
            .query_row(
                "SELECT tg_id, note FROM whitelisted_users WHERE tg_id = ?1",
                params![telegram_id.0],
                |row| {
                    Ok(WhitelistedUser {
                        telegram_id: TelegramId(row.get(0)?),
                        note: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

fn linked_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkedUser> {
    Ok(LinkedUser {
        telegram_id: TelegramId(row.get(0)?),
        twitch_id: TwitchId(row.get(1)?),
        display_name: row.get(2)?,
        linked_at: from_unix(row.get(3)?),
    })
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

/// A racing writer that slipped past the pre-check still lands here.
fn constraint_to_exists(err: rusqlite::Error, telegram_id: TelegramId) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::telegram_exists(telegram_id)
        }
        _ => Error::Storage(err),
    }
}
