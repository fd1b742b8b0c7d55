//! Scan history persistence
//!
//! The engine writes completed scans through the [`ScanSink`] interface.
//! Two implementations ship: async SQLite (WAL mode, pragma-tuned, batch
//! inserts) and an in-memory twin used when no database is configured and
//! in tests. Construction picks the backend once; nothing switches per
//! call.

use chrono::{DateTime, Utc};
use netscout_core::{Error, Result, ScanRecord, ScanStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One row of scan history
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanSummary {
    pub scan_id: Uuid,
    pub target: String,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub open_ports: usize,
}

/// Outbound persistence interface
pub trait ScanSink: Send + Sync {
    /// Persist a finished scan and its per-port results
    fn record_scan<'a>(&'a self, record: &'a ScanRecord) -> BoxFuture<'a, Result<()>>;

    /// Most recent scans, newest first
    fn recent_scans(&self, limit: usize) -> BoxFuture<'_, Result<Vec<ScanSummary>>>;
}

/// In-memory history, the no-database twin
#[derive(Default)]
pub struct MemorySink {
    records: parking_lot::Mutex<Vec<ScanRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ScanSink for MemorySink {
    fn record_scan<'a>(&'a self, record: &'a ScanRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.records.lock().push(record.clone());
            Ok(())
        })
    }

    fn recent_scans(&self, limit: usize) -> BoxFuture<'_, Result<Vec<ScanSummary>>> {
        Box::pin(async move {
            let records = self.records.lock();
            let mut summaries: Vec<ScanSummary> = records
                .iter()
                .map(|r| ScanSummary {
                    scan_id: r.scan_id,
                    target: r.target.host.clone(),
                    status: r.status,
                    created_at: r.created_at,
                    completed_at: r.completed_at,
                    open_ports: r.open_count(),
                })
                .collect();
            summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            summaries.truncate(limit);
            Ok(summaries)
        })
    }
}

/// Async SQLite history sink
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Open (or create) the database and initialize the schema
    ///
    /// Uses WAL journaling so readers never block the writer, plus the
    /// usual pragma tuning for write-heavy workloads.
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref().to_string_lossy().to_string();
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(|e| Error::Storage(format!("invalid database path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        info!("scan history database: {}", path);

        let sink = Self { pool };
        sink.init_schema().await?;
        Ok(sink)
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("initializing scan history schema");

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("PRAGMA busy_timeout = 10000")
            .execute(&self.pool)
            .await
            .ok();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id TEXT NOT NULL UNIQUE,
                target TEXT NOT NULL,
                status TEXT NOT NULL,
                user_id TEXT,
                created_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                config_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("failed to create scans table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER NOT NULL,
                port INTEGER NOT NULL,
                state TEXT NOT NULL,
                service TEXT,
                version TEXT,
                banner TEXT,
                risk TEXT,
                metadata_json TEXT,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (scan_id) REFERENCES scans(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("failed to create scan_results table: {}", e)))?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_scans_user_created ON scans(user_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status)",
            "CREATE INDEX IF NOT EXISTS idx_results_scan_port ON scan_results(scan_id, port)",
        ] {
            sqlx::query(index).execute(&self.pool).await.ok();
        }

        debug!("scan history schema ready");
        Ok(())
    }

    async fn insert_record(&self, record: &ScanRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("begin failed: {}", e)))?;

        let config_json = serde_json::to_string(&record.config)?;
        let row = sqlx::query(
            r#"
            INSERT INTO scans (scan_id, target, status, created_at, completed_at, config_json)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(record.scan_id.to_string())
        .bind(&record.target.host)
        .bind(record.status.to_string())
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(config_json)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("insert scan failed: {}", e)))?;

        let row_id: i64 = row.get(0);
        let now = Utc::now();

        for result in &record.results {
            let metadata = serde_json::json!({
                "confidence": result.confidence,
                "response_time_ms": result.response_time.as_millis() as u64,
                "cvss_score": result.cvss_score,
                "vulnerabilities": result.vulnerabilities,
                "recommendations": result.recommendations,
                "tls": result.tls,
                "http": result.http,
            });
            sqlx::query(
                r#"
                INSERT INTO scan_results
                    (scan_id, port, state, service, version, banner, risk, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row_id)
            .bind(result.port as i64)
            .bind(result.state.to_string())
            .bind(&result.service)
            .bind(&result.version)
            .bind(&result.banner)
            .bind(result.risk.map(|r| r.to_string()))
            .bind(metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(format!("insert result failed: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("commit failed: {}", e)))?;

        debug!(
            "persisted scan {} with {} results",
            record.scan_id,
            record.results.len()
        );
        Ok(())
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<ScanSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.scan_id, s.target, s.status, s.created_at, s.completed_at,
                   (SELECT COUNT(*) FROM scan_results r
                     WHERE r.scan_id = s.id AND r.state = 'open') AS open_ports
            FROM scans s
            ORDER BY s.created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("recent scans query failed: {}", e)))?;

        rows.into_iter()
            .map(|row| {
                let scan_id: String = row.get("scan_id");
                let status: String = row.get("status");
                Ok(ScanSummary {
                    scan_id: Uuid::parse_str(&scan_id)
                        .map_err(|e| Error::Storage(format!("bad scan_id in row: {}", e)))?,
                    target: row.get("target"),
                    status: parse_status(&status)?,
                    created_at: row.get("created_at"),
                    completed_at: row.get("completed_at"),
                    open_ports: row.get::<i64, _>("open_ports") as usize,
                })
            })
            .collect()
    }
}

fn parse_status(status: &str) -> Result<ScanStatus> {
    match status {
        "pending" => Ok(ScanStatus::Pending),
        "running" => Ok(ScanStatus::Running),
        "completed" => Ok(ScanStatus::Completed),
        "failed" => Ok(ScanStatus::Failed),
        "cancelled" => Ok(ScanStatus::Cancelled),
        other => Err(Error::Storage(format!("unknown scan status {:?}", other))),
    }
}

impl ScanSink for SqliteSink {
    fn record_scan<'a>(&'a self, record: &'a ScanRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.insert_record(record))
    }

    fn recent_scans(&self, limit: usize) -> BoxFuture<'_, Result<Vec<ScanSummary>>> {
        Box::pin(self.query_recent(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netscout_core::{PortResult, PortSet, PortState, ScanConfig, Target, TargetClass};

    fn sample_record(host: &str) -> ScanRecord {
        let mut record = ScanRecord::new(
            Target {
                host: host.to_string(),
                resolved_ip: "127.0.0.1".parse().unwrap(),
                classification: TargetClass::Loopback,
            },
            PortSet::parse("22,80").unwrap(),
            ScanConfig::default(),
        );
        record.results.push(
            PortResult::new(22, PortState::Open).with_service("ssh", 0.95),
        );
        record.results.push(PortResult::new(80, PortState::Closed));
        record.finish(ScanStatus::Completed);
        record
    }

    #[tokio::test]
    async fn test_memory_sink_round_trip() {
        let sink = MemorySink::new();
        sink.record_scan(&sample_record("a")).await.unwrap();
        sink.record_scan(&sample_record("b")).await.unwrap();

        let recent = sink.recent_scans(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].open_ports, 1);
    }

    #[tokio::test]
    async fn test_memory_sink_respects_limit() {
        let sink = MemorySink::new();
        for i in 0..5 {
            sink.record_scan(&sample_record(&format!("host-{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(sink.recent_scans(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sqlite_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let sink = SqliteSink::new(&path).await.unwrap();

        let record = sample_record("scan-target");
        sink.record_scan(&record).await.unwrap();

        let recent = sink.recent_scans(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].scan_id, record.scan_id);
        assert_eq!(recent[0].target, "scan-target");
        assert_eq!(recent[0].status, ScanStatus::Completed);
        assert_eq!(recent[0].open_ports, 1);
        assert!(recent[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_sqlite_sink_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        {
            let sink = SqliteSink::new(&path).await.unwrap();
            sink.record_scan(&sample_record("persisted")).await.unwrap();
        }

        let sink = SqliteSink::new(&path).await.unwrap();
        let recent = sink.recent_scans(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].target, "persisted");
    }

    #[test]
    fn test_parse_status_rejects_unknown() {
        assert!(parse_status("completed").is_ok());
        assert!(parse_status("nonsense").is_err());
    }
}
