use std::sync::Mutex;

use rusqlite::{params, Connection};

/// The two persisted run states. The gate is open only when the latest
/// row says COMPLETED (or when no run has happened yet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            _ => None,
        }
    }
}

/// Append-only run log; the row with the largest id is the current state.
pub struct RunDb {
    conn: Mutex<Connection>,
}

impl RunDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self { conn: Mutex::new(conn) };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rundb (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status    TEXT NOT NULL CHECK(status IN ('RUNNING','COMPLETED'))
            );
            ",
        )?;
        Ok(())
    }

    pub fn persist_status(&self, status: RunStatus) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rundb (timestamp, status) VALUES (?1, ?2)",
            params![chrono::Utc::now().to_rfc3339(), status.as_str()],
        )?;
        Ok(())
    }

    /// The latest persisted status; `None` before the first run.
    pub fn get_status(&self) -> anyhow::Result<Option<RunStatus>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status FROM rundb ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        match rows.next().transpose()? {
            Some(text) => RunStatus::parse(&text)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("unknown run status {text:?}")),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_has_no_status() {
        let db = RunDb::open_in_memory().unwrap();
        assert_eq!(db.get_status().unwrap(), None);
    }

    #[test]
    fn latest_row_wins() {
        let db = RunDb::open_in_memory().unwrap();
        db.persist_status(RunStatus::Running).unwrap();
        assert_eq!(db.get_status().unwrap(), Some(RunStatus::Running));
        db.persist_status(RunStatus::Completed).unwrap();
        assert_eq!(db.get_status().unwrap(), Some(RunStatus::Completed));
    }

    #[test]
    fn states_round_trip_through_text() {
        assert_eq!(RunStatus::parse("RUNNING"), Some(RunStatus::Running));
        assert_eq!(RunStatus::parse("COMPLETED"), Some(RunStatus::Completed));
        assert_eq!(RunStatus::parse("DONE"), None);
    }
}
