use crate::api::models::{ChatLog, Contact};
use crate::error::Result;
use directories::ProjectDirs;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};

// Last known snapshots, shown while the REST fetch is still in flight.
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn default_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "EngageLive")?;
        Some(proj.data_dir().join("cache.sqlite"))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let cache = Self { path: path.as_ref().to_path_buf() };
        let conn = cache.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS cached_contacts (
                id TEXT PRIMARY KEY,
                batch INTEGER NOT NULL,
                position INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chat_logs (
                id TEXT PRIMARY KEY,
                contact_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS chat_logs_contact ON chat_logs(contact_id, position);
            "#,
        )?;
        Ok(cache)
    }

    fn conn(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Connection::open(&self.path)?)
    }

    /// Store one page as a new batch; each store sorts ahead of all earlier ones.
    pub fn store_contacts(&self, contacts: &[Contact]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let batch: i64 =
            tx.query_row("SELECT COALESCE(MAX(batch), 0) + 1 FROM cached_contacts", [], |row| {
                row.get(0)
            })?;
        for (position, c) in contacts.iter().enumerate() {
            let raw = serde_json::to_string(c)?;
            tx.execute(
                r#"
                INSERT INTO cached_contacts (id, batch, position, raw_json)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    batch=excluded.batch,
                    position=excluded.position,
                    raw_json=excluded.raw_json
                "#,
                params![c.id, batch, position as i64, raw],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recently stored contacts first, in the order the server returned them.
    pub fn load_contacts(&self, limit: Option<usize>) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT raw_json FROM cached_contacts ORDER BY batch DESC, position ASC LIMIT ?1")?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![lim], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            let raw = raw?;
            match serde_json::from_str::<Contact>(&raw) {
                Ok(c) => out.push(c),
                Err(e) => log::warn!("skipping unreadable cached contact: {e}"),
            }
        }
        Ok(out)
    }

    /// Replace the cached log of `contact_id` with `logs`.
    pub fn store_chat_logs(&self, contact_id: &str, logs: &[ChatLog]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chat_logs WHERE contact_id = ?1", params![contact_id])?;
        for (idx, l) in logs.iter().enumerate() {
            let raw = serde_json::to_string(l)?;
            tx.execute(
                r#"
                INSERT INTO chat_logs (id, contact_id, position, raw_json)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    contact_id=excluded.contact_id,
                    position=excluded.position,
                    raw_json=excluded.raw_json
                "#,
                params![l.id, contact_id, idx as i64, raw],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_chat_logs(&self, contact_id: &str) -> Result<Vec<ChatLog>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT raw_json FROM chat_logs WHERE contact_id = ?1 ORDER BY position ASC")?;
        let rows = stmt.query_map(params![contact_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            let raw = raw?;
            match serde_json::from_str::<ChatLog>(&raw) {
                Ok(l) => out.push(l),
                Err(e) => log::warn!("skipping unreadable cached chat log: {e}"),
            }
        }
        Ok(out)
    }
}
