//! The local search index.
//!
//! Maps human-facing search terms to record keys in SQLite, with an
//! FTS5 companion table for free-text search. The same database carries
//! the client-side cart and favorites tables.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::debug;

use nero_core::RecordKey;

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mappings (
    search_term TEXT NOT NULL,
    key         TEXT NOT NULL,
    content     TEXT NOT NULL,
    UNIQUE(search_term, key, content)
);
CREATE VIRTUAL TABLE IF NOT EXISTS mappings_fts USING fts5(
    search_term,
    key UNINDEXED,
    content UNINDEXED
);
CREATE TABLE IF NOT EXISTS cart (
    uuid    TEXT PRIMARY KEY,
    user_id TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS cart_item (
    cart_uuid   TEXT NOT NULL REFERENCES cart(uuid),
    listing_key TEXT NOT NULL,
    quantity    INTEGER NOT NULL DEFAULT 1,
    UNIQUE(cart_uuid, listing_key)
);
CREATE TABLE IF NOT EXISTS favorites (
    user_id     TEXT NOT NULL,
    listing_key TEXT NOT NULL,
    UNIQUE(user_id, listing_key)
);
";

/// One row of the mappings table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRow {
    /// The indexed search term.
    pub search_term: String,
    /// Record key hex.
    pub key: String,
    /// Content tag of the record.
    pub content: String,
}

/// The SQLite-backed search index.
///
/// The connection is serialized behind a mutex: readers are cheap and
/// writers are brief, matching the one-writer model of the database.
pub struct MappingsIndex {
    conn: Mutex<Connection>,
}

impl MappingsIndex {
    /// Opens (and migrates) the index at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory index.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts a mapping row. Returns false when the row already
    /// existed.
    pub fn add(&self, search_term: &str, key: &RecordKey, content: &str) -> Result<bool, StoreError> {
        let key_hex = key.to_hex();
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO mappings (search_term, key, content) VALUES (?1, ?2, ?3)",
            params![search_term, key_hex, content],
        )?;
        if inserted > 0 {
            conn.execute(
                "INSERT INTO mappings_fts (search_term, key, content) VALUES (?1, ?2, ?3)",
                params![search_term, key_hex, content],
            )?;
            debug!(search_term, key = %key_hex, content, "mapping added");
        }
        Ok(inserted > 0)
    }

    /// Returns the rows indexed under an exact search term.
    pub fn search(&self, term: &str) -> Result<Vec<MappingRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT search_term, key, content FROM mappings WHERE search_term = ?1",
        )?;
        let rows = stmt
            .query_map(params![term], |row| {
                Ok(MappingRow {
                    search_term: row.get(0)?,
                    key: row.get(1)?,
                    content: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Free-text search over the FTS companion.
    pub fn search_text(&self, query: &str) -> Result<Vec<MappingRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT search_term, key, content FROM mappings_fts WHERE mappings_fts MATCH ?1",
        )?;
        let rows = stmt
            .query_map(params![query], |row| {
                Ok(MappingRow {
                    search_term: row.get(0)?,
                    key: row.get(1)?,
                    content: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Removes every mapping row referencing a key. Used after a key is
    /// proven absent from the DHT.
    pub fn purge_key(&self, key: &RecordKey) -> Result<usize, StoreError> {
        let key_hex = key.to_hex();
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM mappings WHERE key = ?1", params![key_hex])?;
        conn.execute("DELETE FROM mappings_fts WHERE key = ?1", params![key_hex])?;
        if removed > 0 {
            debug!(key = %key_hex, rows = removed, "mappings purged");
        }
        Ok(removed)
    }

    /// Number of mapping rows.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM mappings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Returns true when the index holds no mappings.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Marks a listing as a favorite of a user.
    pub fn add_favorite(&self, user_id: &str, listing_key: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO favorites (user_id, listing_key) VALUES (?1, ?2)",
            params![user_id, listing_key],
        )?;
        Ok(())
    }

    /// Lists a user's favorite listing keys.
    pub fn favorites(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT listing_key FROM favorites WHERE user_id = ?1")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Creates a cart for a user.
    pub fn create_cart(&self, uuid: &str, user_id: &str) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO cart (uuid, user_id) VALUES (?1, ?2)",
            params![uuid, user_id],
        )?;
        Ok(())
    }

    /// Puts a listing into a cart.
    pub fn add_cart_item(
        &self,
        cart_uuid: &str,
        listing_key: &str,
        quantity: u32,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO cart_item (cart_uuid, listing_key, quantity)
             VALUES (?1, ?2, ?3)",
            params![cart_uuid, listing_key, quantity],
        )?;
        Ok(())
    }
}
