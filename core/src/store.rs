//! SQLite persistence for synthesized record identities.
//!
//! RULE: Only store.rs talks to the database.
//! Ingestion calls store methods; it never executes SQL directly.

use crate::{
    error::DeskResult,
    types::{CollectionKind, ItemId},
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

pub struct IdentityStore {
    conn: Connection,
}

impl IdentityStore {
    /// Open (or create) the identity database at `path`.
    pub fn open(path: &str) -> DeskResult<Self> {
        if path == ":memory:" {
            return Self::in_memory();
        }
        let conn = Connection::open(path)?;
        // WAL mode: the runner may be restarted while a reader holds the file.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests and by default).
    pub fn in_memory() -> DeskResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> DeskResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_identity.sql"))?;
        Ok(())
    }

    /// Identities for identical records are kept in minting order. The
    /// `occurrence`-th copy of `fingerprint` in a snapshot takes the
    /// `occurrence`-th identity still held, and a new one is minted at the
    /// end of the order when none is left.
    pub fn assign_item_id(
        &self,
        kind: CollectionKind,
        fingerprint: &str,
        occurrence: u32,
    ) -> DeskResult<ItemId> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT item_id FROM record_identity
                 WHERE kind = ?1 AND fingerprint = ?2
                 ORDER BY ordinal LIMIT 1 OFFSET ?3",
                params![kind.path(), fingerprint, occurrence],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(ItemId(id));
        }

        let item_id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO record_identity (kind, fingerprint, ordinal, item_id, first_seen)
             SELECT ?1, ?2, COALESCE(MAX(ordinal) + 1, 0), ?3, ?4
             FROM record_identity WHERE kind = ?1 AND fingerprint = ?2",
            params![
                kind.path(),
                fingerprint,
                item_id,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        log::debug!(
            "identity: minted {item_id} for {kind} fingerprint={fingerprint} occurrence={occurrence}"
        );
        Ok(ItemId(item_id))
    }

    /// Forget one identity after its record was deleted, so the next
    /// identical record keeps its own id instead of inheriting this one.
    pub fn retire(&self, kind: CollectionKind, item_id: &ItemId) -> DeskResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM record_identity WHERE kind = ?1 AND item_id = ?2",
            params![kind.path(), item_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    /// Drop identities of `kind` that are absent from the latest snapshot.
    /// Returns the number of rows removed.
    pub fn prune(&mut self, kind: CollectionKind, live: &HashSet<ItemId>) -> DeskResult<usize> {
        let tx = self.conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT item_id FROM record_identity WHERE kind = ?1")?;
            let ids = stmt
                .query_map(params![kind.path()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.into_iter()
                .filter(|id| !live.contains(&ItemId(id.clone())))
                .collect()
        };
        for id in &stale {
            tx.execute("DELETE FROM record_identity WHERE item_id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(stale.len())
    }

    pub fn identity_count(&self, kind: CollectionKind) -> DeskResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM record_identity WHERE kind = ?1",
            params![kind.path()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
