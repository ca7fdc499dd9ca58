//! SQLite storage for user preferences, transfer history, and staged blobs.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};
use tracing::info;

/// Per-user delivery preferences. Both default on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSettings {
    /// Send video files as playable videos instead of plain documents.
    pub upload_as_video: bool,
    /// Start the transfer immediately instead of waiting for a button tap.
    pub auto_upload: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            upload_as_video: true,
            auto_upload: true,
        }
    }
}

/// Aggregated transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub completed: u64,
    pub failed: u64,
    pub bytes: u64,
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path)
            .map_err(|e| format!("Failed to open database at {}: {e}", path.display()))?;
        Self::init(conn)
    }

    /// Ephemeral database, lost on shutdown. Used by the memory-ish
    /// deployments and by tests.
    pub fn in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open in-memory database: {e}"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, String> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS user_settings (
                user_id INTEGER PRIMARY KEY,
                upload_as_video INTEGER NOT NULL DEFAULT 1,
                auto_upload INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                bytes INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS staged_blobs (
                blob_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (blob_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_transfers_user ON transfers(user_id);",
        )
        .map_err(|e| format!("Failed to initialize schema: {e}"))?;

        info!("💾 Database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get_settings(&self, user_id: i64) -> Result<UserSettings, String> {
        let conn = self.conn.lock().unwrap();
        Self::settings_locked(&conn, user_id)
    }

    fn settings_locked(conn: &Connection, user_id: i64) -> Result<UserSettings, String> {
        let row = conn
            .query_row(
                "SELECT upload_as_video, auto_upload FROM user_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserSettings {
                        upload_as_video: row.get::<_, i64>(0)? != 0,
                        auto_upload: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(format!("Failed to read settings: {other}")),
            })?;
        Ok(row.unwrap_or_default())
    }

    /// Flip upload_as_video and return the new settings. Read-modify-write
    /// under one lock so concurrent toggles cannot interleave.
    pub fn toggle_upload_as_video(&self, user_id: i64) -> Result<UserSettings, String> {
        self.toggle(user_id, |s| s.upload_as_video = !s.upload_as_video)
    }

    /// Flip auto_upload and return the new settings.
    pub fn toggle_auto_upload(&self, user_id: i64) -> Result<UserSettings, String> {
        self.toggle(user_id, |s| s.auto_upload = !s.auto_upload)
    }

    fn toggle(
        &self,
        user_id: i64,
        apply: impl FnOnce(&mut UserSettings),
    ) -> Result<UserSettings, String> {
        let conn = self.conn.lock().unwrap();
        let mut settings = Self::settings_locked(&conn, user_id)?;
        apply(&mut settings);
        conn.execute(
            "INSERT OR REPLACE INTO user_settings (user_id, upload_as_video, auto_upload)
             VALUES (?1, ?2, ?3)",
            params![
                user_id,
                settings.upload_as_video as i64,
                settings.auto_upload as i64
            ],
        )
        .map_err(|e| format!("Failed to save settings: {e}"))?;
        Ok(settings)
    }

    /// Record a finished transfer attempt. status is "completed" or "failed".
    pub fn record_transfer(
        &self,
        user_id: i64,
        file_name: &str,
        bytes: u64,
        status: &str,
    ) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transfers (user_id, file_name, bytes, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                file_name,
                bytes as i64,
                status,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| format!("Failed to record transfer: {e}"))?;
        Ok(())
    }

    pub fn totals(&self) -> Result<TransferTotals, String> {
        let conn = self.conn.lock().unwrap();
        Self::totals_query(&conn, "SELECT status, bytes FROM transfers", params![])
    }

    pub fn user_totals(&self, user_id: i64) -> Result<TransferTotals, String> {
        let conn = self.conn.lock().unwrap();
        Self::totals_query(
            &conn,
            "SELECT status, bytes FROM transfers WHERE user_id = ?1",
            params![user_id],
        )
    }

    fn totals_query(
        conn: &Connection,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<TransferTotals, String> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| format!("Failed to prepare stats query: {e}"))?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| format!("Failed to query stats: {e}"))?;

        let mut totals = TransferTotals::default();
        for row in rows {
            let (status, bytes) = row.map_err(|e| format!("Failed to read stats row: {e}"))?;
            if status == "completed" {
                totals.completed += 1;
                totals.bytes += bytes as u64;
            } else {
                totals.failed += 1;
            }
        }
        Ok(totals)
    }

    /// Append one chunk to a staged blob. seq orders chunks on read-back.
    pub fn append_blob_chunk(&self, blob_id: &str, seq: u64, data: &[u8]) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO staged_blobs (blob_id, seq, data) VALUES (?1, ?2, ?3)",
            params![blob_id, seq as i64, data],
        )
        .map_err(|e| format!("Failed to append blob chunk: {e}"))?;
        Ok(())
    }

    /// Reassemble a staged blob in sequence order.
    pub fn read_blob(&self, blob_id: &str) -> Result<Vec<u8>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT data FROM staged_blobs WHERE blob_id = ?1 ORDER BY seq")
            .map_err(|e| format!("Failed to prepare blob query: {e}"))?;
        let rows = stmt
            .query_map(params![blob_id], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|e| format!("Failed to query blob: {e}"))?;

        let mut out = Vec::new();
        for row in rows {
            out.extend_from_slice(&row.map_err(|e| format!("Failed to read blob chunk: {e}"))?);
        }
        Ok(out)
    }

    pub fn delete_blob(&self, blob_id: &str) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM staged_blobs WHERE blob_id = ?1",
            params![blob_id],
        )
        .map_err(|e| format!("Failed to delete blob: {e}"))?;
        Ok(())
    }
}
