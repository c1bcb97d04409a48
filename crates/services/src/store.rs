//! Persistent task store.
//!
//! Records live in a single SQLite table keyed by a locally assigned rowid.
//! Structured fields (`params`, `buttons`) are stored as JSON columns and
//! round-trip exactly. There are no transactions across calls; concurrent
//! writers get last-write-wins, which the poller's sticky terminal merge
//! accounts for.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use shared::{TaskRecord, TaskStatus};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
    /// Bumped on every write; consumers subscribe to re-read the list
    /// instead of polling an ambient global counter.
    revision: watch::Sender<u64>,
}

impl TaskStore {
    /// Open (or create) the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("tasks.db"))?;
        Self::init_schema(&conn)?;
        Ok(Self::wrap(conn))
    }

    /// In-memory store, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        let (revision, _) = watch::channel(0u64);
        Self {
            conn: Arc::new(Mutex::new(conn)),
            revision,
        }
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL,
                vendor_task_id TEXT NOT NULL,
                bot_type TEXT NOT NULL,
                prompt TEXT NOT NULL,
                params TEXT NOT NULL,
                progress TEXT NOT NULL,
                result_url TEXT NOT NULL,
                buttons TEXT NOT NULL,
                error TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            [],
        )?;
        Ok(())
    }

    /// Insert a record and return its assigned id.
    pub fn add(&self, rec: &TaskRecord) -> Result<i64> {
        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO tasks
                 (status, vendor_task_id, bot_type, prompt, params, progress,
                  result_url, buttons, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    rec.status.as_str(),
                    rec.vendor_task_id,
                    rec.bot_type,
                    rec.prompt,
                    serde_json::to_string(&rec.params)?,
                    rec.progress,
                    rec.result_url,
                    serde_json::to_string(&rec.buttons)?,
                    rec.error,
                    rec.created_at.to_rfc3339(),
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.bump();
        Ok(id)
    }

    /// Overwrite the stored record with `rec` (matched by `rec.id`).
    pub fn update(&self, rec: &TaskRecord) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE tasks SET
                 status = ?2, vendor_task_id = ?3, bot_type = ?4, prompt = ?5,
                 params = ?6, progress = ?7, result_url = ?8, buttons = ?9,
                 error = ?10, created_at = ?11
                 WHERE id = ?1",
                params![
                    rec.id,
                    rec.status.as_str(),
                    rec.vendor_task_id,
                    rec.bot_type,
                    rec.prompt,
                    serde_json::to_string(&rec.params)?,
                    rec.progress,
                    rec.result_url,
                    serde_json::to_string(&rec.buttons)?,
                    rec.error,
                    rec.created_at.to_rfc3339(),
                ],
            )?;
        }
        self.bump();
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, status, vendor_task_id, bot_type, prompt, params,
                    progress, result_url, buttons, error, created_at
             FROM tasks WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_row(row)?)),
            None => Ok(None),
        }
    }

    /// All records, newest first.
    pub fn get_all(&self) -> Result<Vec<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, status, vendor_task_id, bot_type, prompt, params,
                    progress, result_url, buttons, error, created_at
             FROM tasks ORDER BY id DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(decode_row(row)?);
        }
        Ok(records)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        }
        self.bump();
        Ok(())
    }

    /// Subscribe to write notifications; the value is a revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|v| *v += 1);
    }
}

fn decode_row(row: &Row<'_>) -> Result<TaskRecord> {
    let status: String = row.get(1)?;
    let params_json: String = row.get(5)?;
    let buttons_json: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        status: TaskStatus::from_vendor(&status),
        vendor_task_id: row.get(2)?,
        bot_type: row.get(3)?,
        prompt: row.get(4)?,
        params: serde_json::from_str(&params_json)?,
        progress: row.get(6)?,
        result_url: row.get(7)?,
        buttons: serde_json::from_str(&buttons_json)?,
        error: row.get(9)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{TaskParams, TaskStatus};
    use tempfile::TempDir;

    fn record(prompt: &str) -> TaskRecord {
        TaskRecord::new(
            TaskParams {
                text_prompt: prompt.into(),
                seed: 7,
                ..TaskParams::default()
            },
            prompt.into(),
        )
    }

    #[test]
    fn params_round_trip_by_id() {
        let store = TaskStore::open_in_memory().unwrap();
        let rec = record("a red fox");
        let id = store.add(&rec).unwrap();

        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.params, rec.params);
        assert_eq!(loaded.prompt, "a red fox");
        assert_eq!(loaded.status, TaskStatus::Submitted);
    }

    #[test]
    fn get_all_is_newest_first() {
        let store = TaskStore::open_in_memory().unwrap();
        let first = store.add(&record("one")).unwrap();
        let second = store.add(&record("two")).unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second);
        assert_eq!(all[1].id, first);
    }

    #[test]
    fn update_overwrites_in_place() {
        let store = TaskStore::open_in_memory().unwrap();
        let mut rec = record("fox");
        rec.id = store.add(&rec).unwrap();

        rec.status = TaskStatus::Success;
        rec.result_url = "https://cdn/done.png".into();
        store.update(&rec).unwrap();

        let loaded = store.get(rec.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Success);
        assert_eq!(loaded.result_url, "https://cdn/done.png");
    }

    #[test]
    fn delete_removes_the_record() {
        let store = TaskStore::open_in_memory().unwrap();
        let id = store.add(&record("gone")).unwrap();
        store.delete(id).unwrap();
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn writes_bump_the_revision() {
        let store = TaskStore::open_in_memory().unwrap();
        let rx = store.subscribe();
        assert_eq!(*rx.borrow(), 0);
        store.add(&record("x")).unwrap();
        assert_eq!(*rx.borrow(), 1);
        store.delete(1).unwrap();
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = TaskStore::open(dir.path()).unwrap();
            store.add(&record("durable")).unwrap()
        };
        let store = TaskStore::open(dir.path()).unwrap();
        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.prompt, "durable");
    }
}
