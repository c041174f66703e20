use std::path::PathBuf;

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::config::Config;

pub const KEY_CONVERSATIONS: &str = "conversations";
pub const KEY_SELECTED_MODEL: &str = "selected_model";
pub const KEY_CHAT_MODE: &str = "chat_mode";
pub const KEY_SELECTED_DOMAINS: &str = "selected_domains";

/// Client-local key/value store backing the conversation cache. Values are
/// JSON strings under fixed keys; the whole thing is rehydrated at startup.
pub struct LocalStore {
    conn: Connection,
}

fn db_path() -> PathBuf {
    Config::get_config_dir().join("deepcite.sqlite")
}

impl LocalStore {
    pub fn open_default() -> Result<Self> {
        std::fs::create_dir_all(Config::get_config_dir())?;
        Self::open(Connection::open(db_path())?)
    }

    /// Backed by a throwaway in-memory database; used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(Connection::open_in_memory()?)
    }

    fn open(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(LocalStore { conn })
    }

    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
