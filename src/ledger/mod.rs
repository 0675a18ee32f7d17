//! Durable per-directory conversion ledger
//!
//! A single SQLite database, keyed by `source_path`, that records the
//! outcome of every conversion attempt. The walker consults it to decide
//! whether a file has already been handled; the work pool writes it on
//! every job-state transition. See SPEC_FULL.md §4.A.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

pub const LEDGER_FILE_NAME: &str = ".ffmpeg-processor.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Processing,
    Complete,
    Failed,
}

impl LedgerState {
    fn as_str(self) -> &'static str {
        match self {
            LedgerState::Processing => "processing",
            LedgerState::Complete => "complete",
            LedgerState::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(LedgerState::Processing),
            "complete" => Some(LedgerState::Complete),
            "failed" => Some(LedgerState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerRecord {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub state: LedgerState,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
    pub source_bytes: Option<i64>,
    pub output_bytes: Option<i64>,
}

/// Handle to the durable conversion ledger for one input root.
///
/// Cheap to clone: internally a pooled `sqlx::SqlitePool`, safe to share
/// across worker tasks. Single-writer-per-key is guaranteed by the work
/// pool (at most one job per `source_path` is ever in flight), so this
/// layer only needs the pool's own connection-level synchronisation.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if absent) the ledger database at `root/.ffmpeg-processor.db`.
    pub async fn open(root: &Path) -> Result<Self, String> {
        let db_path = root.join(LEDGER_FILE_NAME);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| format!("Failed to open ledger at {}: {e}", db_path.display()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversions (
                id            INTEGER PRIMARY KEY,
                source_path   TEXT UNIQUE NOT NULL,
                target_path   TEXT NOT NULL,
                state         TEXT NOT NULL,
                started_at    INTEGER NOT NULL,
                completed_at  INTEGER,
                error         TEXT,
                source_bytes  INTEGER,
                output_bytes  INTEGER
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| format!("Failed to create conversions table: {e}"))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversions_state ON conversions(state)")
            .execute(&pool)
            .await
            .map_err(|e| format!("Failed to create state index: {e}"))?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversions_source ON conversions(source_path)",
        )
        .execute(&pool)
        .await
        .map_err(|e| format!("Failed to create source_path index: {e}"))?;

        log::debug!("Ledger opened at {}", db_path.display());

        Ok(Self { pool })
    }

    /// `start_conversion`: upsert a `processing` record, wiping any prior
    /// attempt's terminal fields for this `source_path`.
    pub async fn start(
        &self,
        source: &Path,
        target: &Path,
        source_bytes: Option<u64>,
    ) -> Result<(), String> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO conversions (source_path, target_path, state, started_at, completed_at, error, source_bytes, output_bytes)
             VALUES (?1, ?2, 'processing', ?3, NULL, NULL, ?4, NULL)
             ON CONFLICT(source_path) DO UPDATE SET
                target_path = excluded.target_path,
                state = 'processing',
                started_at = excluded.started_at,
                completed_at = NULL,
                error = NULL,
                source_bytes = excluded.source_bytes,
                output_bytes = NULL",
        )
        .bind(source.to_string_lossy().to_string())
        .bind(target.to_string_lossy().to_string())
        .bind(now)
        .bind(source_bytes.map(|b| b as i64))
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Ledger.start failed for {}: {e}", source.display()))?;
        Ok(())
    }

    pub async fn complete(&self, source: &Path, output_bytes: u64) -> Result<(), String> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE conversions SET state = 'complete', completed_at = ?1, output_bytes = ?2
             WHERE source_path = ?3",
        )
        .bind(now)
        .bind(output_bytes as i64)
        .bind(source.to_string_lossy().to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Ledger.complete failed for {}: {e}", source.display()))?;
        Ok(())
    }

    pub async fn fail(&self, source: &Path, error_text: &str) -> Result<(), String> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "UPDATE conversions SET state = 'failed', completed_at = ?1, error = ?2
             WHERE source_path = ?3",
        )
        .bind(now)
        .bind(error_text)
        .bind(source.to_string_lossy().to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Ledger.fail failed for {}: {e}", source.display()))?;
        Ok(())
    }

    pub async fn get(&self, source: &Path) -> Result<Option<LedgerRecord>, String> {
        let row = sqlx::query(
            "SELECT source_path, target_path, state, started_at, completed_at, error, source_bytes, output_bytes
             FROM conversions WHERE source_path = ?1",
        )
        .bind(source.to_string_lossy().to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| format!("Ledger.get failed for {}: {e}", source.display()))?;

        Ok(row.map(row_to_record))
    }

    pub async fn query_by_state(&self, state: LedgerState) -> Result<Vec<LedgerRecord>, String> {
        let rows = sqlx::query(
            "SELECT source_path, target_path, state, started_at, completed_at, error, source_bytes, output_bytes
             FROM conversions WHERE state = ?1 ORDER BY started_at ASC",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Ledger.query_by_state failed: {e}"))?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    pub async fn delete(&self, source: &Path) -> Result<(), String> {
        sqlx::query("DELETE FROM conversions WHERE source_path = ?1")
            .bind(source.to_string_lossy().to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Ledger.delete failed for {}: {e}", source.display()))?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> LedgerRecord {
    let state_str: String = row.get("state");
    LedgerRecord {
        source_path: PathBuf::from(row.get::<String, _>("source_path")),
        target_path: PathBuf::from(row.get::<String, _>("target_path")),
        state: LedgerState::from_str(&state_str).unwrap_or(LedgerState::Processing),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
        source_bytes: row.get("source_bytes"),
        output_bytes: row.get("output_bytes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn start_then_complete_round_trip() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).await.unwrap();

        let source = PathBuf::from("/videos/a.mp4");
        let target = PathBuf::from("/videos/a.mp3");

        ledger.start(&source, &target, Some(1000)).await.unwrap();
        let rec = ledger.get(&source).await.unwrap().unwrap();
        assert_eq!(rec.state, LedgerState::Processing);
        assert!(rec.completed_at.is_none());

        ledger.complete(&source, 200).await.unwrap();
        let rec = ledger.get(&source).await.unwrap().unwrap();
        assert_eq!(rec.state, LedgerState::Complete);
        assert_eq!(rec.output_bytes, Some(200));
        assert!(rec.error.is_none());
    }

    #[tokio::test]
    async fn restart_wipes_prior_terminal_fields() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).await.unwrap();
        let source = PathBuf::from("/videos/b.mp4");
        let target = PathBuf::from("/videos/b.mp3");

        ledger.start(&source, &target, None).await.unwrap();
        ledger.fail(&source, "invalid_input").await.unwrap();
        let rec = ledger.get(&source).await.unwrap().unwrap();
        assert_eq!(rec.state, LedgerState::Failed);

        // A restart (not an update) must wipe the previous attempt's error.
        ledger.start(&source, &target, None).await.unwrap();
        let rec = ledger.get(&source).await.unwrap().unwrap();
        assert_eq!(rec.state, LedgerState::Processing);
        assert!(rec.error.is_none());
        assert!(rec.completed_at.is_none());
    }

    #[tokio::test]
    async fn query_by_state_and_delete() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path()).await.unwrap();

        for name in ["x.mp4", "y.mp4", "z.mp4"] {
            let source = PathBuf::from(format!("/videos/{name}"));
            let target = source.with_extension("mp3");
            ledger.start(&source, &target, None).await.unwrap();
        }
        ledger
            .complete(&PathBuf::from("/videos/x.mp4"), 10)
            .await
            .unwrap();

        let processing = ledger.query_by_state(LedgerState::Processing).await.unwrap();
        assert_eq!(processing.len(), 2);

        ledger.delete(&PathBuf::from("/videos/y.mp4")).await.unwrap();
        let processing = ledger.query_by_state(LedgerState::Processing).await.unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].source_path, PathBuf::from("/videos/z.mp4"));
    }

    #[tokio::test]
    async fn fresh_open_sees_prior_writes() {
        let dir = tempdir().unwrap();
        let source = PathBuf::from("/videos/durable.mp4");
        {
            let ledger = Ledger::open(dir.path()).await.unwrap();
            ledger
                .start(&source, &source.with_extension("mp3"), None)
                .await
                .unwrap();
            ledger.complete(&source, 42).await.unwrap();
            ledger.close().await;
        }
        let reopened = Ledger::open(dir.path()).await.unwrap();
        let rec = reopened.get(&source).await.unwrap().unwrap();
        assert_eq!(rec.state, LedgerState::Complete);
        assert_eq!(rec.output_bytes, Some(42));
    }
}
