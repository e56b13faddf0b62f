//! StateManager
//! Durable mirror of the registry: process descriptors with their last known
//! status, plus metric samples with 24h retention. All writes go through the
//! storage port; multi-statement writes are atomic batches.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::METRICS_RETENTION_HOURS;
use crate::domain::ports::{DatabaseKind, SqlValue, StateStore, Statement};
use crate::domain::{
    MetricSample, ProcessDescriptor, ProcessStatus, Result, SupervisorError,
};

/// One persisted registry row
#[derive(Debug, Clone)]
pub struct PersistedProcess {
    pub descriptor: ProcessDescriptor,
    pub status: ProcessStatus,
    pub updated_at: DateTime<Utc>,
}

/// Persists process descriptors and metric samples; answers status queries
pub struct StateManager {
    store: Arc<dyn StateStore>,
    init_lock: Mutex<bool>,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            init_lock: Mutex::new(false),
        }
    }

    pub fn kind(&self) -> DatabaseKind {
        self.store.kind()
    }

    /// Create tables and indices if absent. Idempotent; serialized by its own
    /// mutex.
    pub async fn initialize(&self) -> Result<()> {
        let mut initialized = self.init_lock.lock().await;
        if *initialized {
            return Ok(());
        }

        self.store
            .execute_batch(&[
                Statement::new(
                    "CREATE TABLE IF NOT EXISTS processes (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        type TEXT NOT NULL,
                        version TEXT NOT NULL,
                        status TEXT NOT NULL,
                        metadata_blob TEXT NOT NULL,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL
                    )",
                    vec![],
                ),
                Statement::new(
                    "CREATE TABLE IF NOT EXISTS process_metrics (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        process_id TEXT NOT NULL,
                        cpu_pct REAL NOT NULL,
                        memory_bytes INTEGER NOT NULL,
                        thread_count INTEGER NOT NULL,
                        handle_count INTEGER NOT NULL,
                        timestamp INTEGER NOT NULL
                    )",
                    vec![],
                ),
                Statement::new(
                    "CREATE INDEX IF NOT EXISTS idx_process_metrics_process_ts
                     ON process_metrics (process_id, timestamp)",
                    vec![],
                ),
            ])
            .await?;

        *initialized = true;
        info!(kind = %self.store.kind(), "State store initialized");
        Ok(())
    }

    /// Upsert a descriptor snapshot together with its current status
    pub async fn save_process(
        &self,
        descriptor: &ProcessDescriptor,
        status: ProcessStatus,
    ) -> Result<()> {
        let blob = serde_json::to_string(descriptor)
            .map_err(|e| SupervisorError::Storage(format!("descriptor encode failed: {}", e)))?;
        let now = Utc::now().timestamp_millis();
        let kind = self.store.kind();

        let sql = format!(
            "INSERT INTO processes (id, name, type, version, status, metadata_blob, created_at, updated_at)
             VALUES ({p1}, {p2}, {p3}, {p4}, {p5}, {p6}, {p7}, {p8})
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 type = excluded.type,
                 version = excluded.version,
                 status = excluded.status,
                 metadata_blob = excluded.metadata_blob,
                 updated_at = excluded.updated_at",
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
            p3 = kind.placeholder(3),
            p4 = kind.placeholder(4),
            p5 = kind.placeholder(5),
            p6 = kind.placeholder(6),
            p7 = kind.placeholder(7),
            p8 = kind.placeholder(8),
        );

        self.store
            .execute(
                &sql,
                &[
                    SqlValue::from(descriptor.id.as_str()),
                    SqlValue::from(descriptor.display_name()),
                    SqlValue::from(descriptor.metadata.kind.as_str()),
                    SqlValue::from(descriptor.metadata.version.as_str()),
                    SqlValue::from(status.to_string()),
                    SqlValue::from(blob),
                    SqlValue::from(now),
                    SqlValue::from(now),
                ],
            )
            .await?;

        debug!(process_id = %descriptor.id, status = %status, "Persisted process");
        Ok(())
    }

    /// Write the current status and timestamp for one process
    pub async fn update_status(&self, id: &str, status: ProcessStatus) -> Result<()> {
        let kind = self.store.kind();
        let sql = format!(
            "UPDATE processes SET status = {p1}, updated_at = {p2} WHERE id = {p3}",
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
            p3 = kind.placeholder(3),
        );

        let affected = self
            .store
            .execute(
                &sql,
                &[
                    SqlValue::from(status.to_string()),
                    SqlValue::from(Utc::now().timestamp_millis()),
                    SqlValue::from(id),
                ],
            )
            .await?;

        if affected == 0 {
            warn!(process_id = id, "Status update for unknown process");
        }
        Ok(())
    }

    /// Insert a metric sample and prune samples older than the retention
    /// window for the same process, atomically.
    pub async fn save_metrics(&self, sample: &MetricSample) -> Result<()> {
        let kind = self.store.kind();
        let cutoff =
            (Utc::now() - chrono::Duration::hours(METRICS_RETENTION_HOURS)).timestamp_millis();

        let insert = format!(
            "INSERT INTO process_metrics
                 (process_id, cpu_pct, memory_bytes, thread_count, handle_count, timestamp)
             VALUES ({p1}, {p2}, {p3}, {p4}, {p5}, {p6})",
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
            p3 = kind.placeholder(3),
            p4 = kind.placeholder(4),
            p5 = kind.placeholder(5),
            p6 = kind.placeholder(6),
        );
        let prune = format!(
            "DELETE FROM process_metrics WHERE process_id = {p1} AND timestamp < {p2}",
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
        );

        self.store
            .execute_batch(&[
                Statement::new(
                    insert,
                    vec![
                        SqlValue::from(sample.process_id.as_str()),
                        SqlValue::from(sample.cpu_pct),
                        SqlValue::from(sample.memory_bytes),
                        SqlValue::from(sample.thread_count),
                        SqlValue::from(sample.handle_count),
                        SqlValue::from(sample.timestamp.timestamp_millis()),
                    ],
                ),
                Statement::new(
                    prune,
                    vec![
                        SqlValue::from(sample.process_id.as_str()),
                        SqlValue::from(cutoff),
                    ],
                ),
            ])
            .await
    }

    /// All processes whose persisted status is not Stopped
    pub async fn get_active(&self) -> Result<Vec<PersistedProcess>> {
        let kind = self.store.kind();
        let sql = format!(
            "SELECT metadata_blob, status, updated_at FROM processes WHERE status != {p1}",
            p1 = kind.placeholder(1),
        );

        let rows = self
            .store
            .query(&sql, &[SqlValue::from(ProcessStatus::Stopped.to_string())])
            .await?;

        let mut processes = Vec::with_capacity(rows.len());
        for row in rows {
            processes.push(persisted_from_row(
                row.get_text(0)?,
                row.get_text(1)?,
                row.get_i64(2)?,
            )?);
        }
        Ok(processes)
    }

    /// Persisted status for one process
    pub async fn get_status(&self, id: &str) -> Result<ProcessStatus> {
        let kind = self.store.kind();
        let sql = format!(
            "SELECT status FROM processes WHERE id = {p1}",
            p1 = kind.placeholder(1),
        );

        let row = self
            .store
            .query_single(&sql, &[SqlValue::from(id)])
            .await?
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        row.get_text(0)?.parse()
    }

    /// The full persisted row for one process
    pub async fn get_process(&self, id: &str) -> Result<PersistedProcess> {
        let kind = self.store.kind();
        let sql = format!(
            "SELECT metadata_blob, status, updated_at FROM processes WHERE id = {p1}",
            p1 = kind.placeholder(1),
        );

        let row = self
            .store
            .query_single(&sql, &[SqlValue::from(id)])
            .await?
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        persisted_from_row(row.get_text(0)?, row.get_text(1)?, row.get_i64(2)?)
    }

    /// Delete a process row (metric history goes with it)
    pub async fn delete_process(&self, id: &str) -> Result<()> {
        let kind = self.store.kind();
        let delete_metrics = format!(
            "DELETE FROM process_metrics WHERE process_id = {p1}",
            p1 = kind.placeholder(1),
        );
        let delete_process = format!(
            "DELETE FROM processes WHERE id = {p1}",
            p1 = kind.placeholder(1),
        );

        self.store
            .execute_batch(&[
                Statement::new(delete_metrics, vec![SqlValue::from(id)]),
                Statement::new(delete_process, vec![SqlValue::from(id)]),
            ])
            .await
    }

    /// Metric samples for one process within `[start, end]`, newest first
    pub async fn get_metrics(
        &self,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<MetricSample>> {
        let kind = self.store.kind();
        let mut sql = format!(
            "SELECT process_id, cpu_pct, memory_bytes, thread_count, handle_count, timestamp
             FROM process_metrics
             WHERE process_id = {p1} AND timestamp >= {p2} AND timestamp <= {p3}
             ORDER BY timestamp DESC",
            p1 = kind.placeholder(1),
            p2 = kind.placeholder(2),
            p3 = kind.placeholder(3),
        );
        let mut params = vec![
            SqlValue::from(id),
            SqlValue::from(start.timestamp_millis()),
            SqlValue::from(end.timestamp_millis()),
        ];
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {p}", p = kind.placeholder(4)));
            params.push(SqlValue::from(limit));
        }

        let rows = self.store.query(&sql, &params).await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            samples.push(MetricSample {
                process_id: row.get_text(0)?.to_string(),
                cpu_pct: row.get_f64(1)?,
                memory_bytes: row.get_i64(2)? as u64,
                thread_count: row.get_i64(3)? as u32,
                handle_count: row.get_i64(4)? as u32,
                timestamp: millis_to_datetime(row.get_i64(5)?)?,
            });
        }
        Ok(samples)
    }
}

fn persisted_from_row(blob: &str, status: &str, updated_at: i64) -> Result<PersistedProcess> {
    let descriptor: ProcessDescriptor = serde_json::from_str(blob)
        .map_err(|e| SupervisorError::Storage(format!("descriptor decode failed: {}", e)))?;
    Ok(PersistedProcess {
        descriptor,
        status: status.parse()?,
        updated_at: millis_to_datetime(updated_at)?,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| SupervisorError::Storage(format!("invalid timestamp {}", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::SqliteStore;

    async fn state_manager() -> StateManager {
        let manager = StateManager::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
        manager.initialize().await.unwrap();
        manager
    }

    fn descriptor(id: &str) -> ProcessDescriptor {
        ProcessDescriptor::builder(id, "/bin/sleep")
            .name(format!("{} name", id))
            .kind("service")
            .version("1.0.0")
            .arg("3600")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let manager = state_manager().await;
        manager.initialize().await.unwrap();
        manager.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let manager = state_manager().await;
        let d = descriptor("web");

        manager.save_process(&d, ProcessStatus::Stopped).await.unwrap();

        let persisted = manager.get_process("web").await.unwrap();
        assert_eq!(persisted.descriptor, d);
        assert_eq!(persisted.status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_update_status() {
        let manager = state_manager().await;
        manager
            .save_process(&descriptor("web"), ProcessStatus::Stopped)
            .await
            .unwrap();

        manager
            .update_status("web", ProcessStatus::Running)
            .await
            .unwrap();
        assert_eq!(
            manager.get_status("web").await.unwrap(),
            ProcessStatus::Running
        );
    }

    #[tokio::test]
    async fn test_get_status_unknown_is_not_found() {
        let manager = state_manager().await;
        assert!(matches!(
            manager.get_status("missing").await,
            Err(SupervisorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_active_excludes_stopped() {
        let manager = state_manager().await;
        manager
            .save_process(&descriptor("a"), ProcessStatus::Running)
            .await
            .unwrap();
        manager
            .save_process(&descriptor("b"), ProcessStatus::Stopped)
            .await
            .unwrap();
        manager
            .save_process(&descriptor("c"), ProcessStatus::Crashed)
            .await
            .unwrap();

        let active = manager.get_active().await.unwrap();
        let mut ids: Vec<_> = active.iter().map(|p| p.descriptor.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_metrics_round_trip() {
        let manager = state_manager().await;
        let sample = MetricSample {
            process_id: "web".to_string(),
            cpu_pct: 12.34,
            memory_bytes: 1024,
            thread_count: 4,
            handle_count: 16,
            timestamp: Utc::now(),
        };

        manager.save_metrics(&sample).await.unwrap();

        let window_start = sample.timestamp - chrono::Duration::seconds(1);
        let window_end = sample.timestamp + chrono::Duration::seconds(1);
        let samples = manager
            .get_metrics("web", window_start, window_end, None)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].cpu_pct, 12.34);
        assert_eq!(samples[0].memory_bytes, 1024);
    }

    #[tokio::test]
    async fn test_old_metrics_are_pruned_on_save() {
        let manager = state_manager().await;
        let stale = MetricSample {
            process_id: "web".to_string(),
            cpu_pct: 1.0,
            memory_bytes: 1,
            thread_count: 1,
            handle_count: 1,
            timestamp: Utc::now() - chrono::Duration::hours(METRICS_RETENTION_HOURS + 1),
        };
        manager.save_metrics(&stale).await.unwrap();

        let fresh = MetricSample {
            timestamp: Utc::now(),
            ..stale.clone()
        };
        manager.save_metrics(&fresh).await.unwrap();

        let all = manager
            .get_metrics(
                "web",
                Utc::now() - chrono::Duration::days(30),
                Utc::now() + chrono::Duration::days(1),
                None,
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1, "stale sample must be pruned");
    }

    #[tokio::test]
    async fn test_metrics_ordered_newest_first_with_limit() {
        let manager = state_manager().await;
        let base = Utc::now();
        for i in 0..5 {
            let sample = MetricSample {
                process_id: "web".to_string(),
                cpu_pct: i as f64,
                memory_bytes: 1,
                thread_count: 1,
                handle_count: 1,
                timestamp: base + chrono::Duration::seconds(i),
            };
            manager.save_metrics(&sample).await.unwrap();
        }

        let samples = manager
            .get_metrics(
                "web",
                base - chrono::Duration::seconds(10),
                base + chrono::Duration::seconds(10),
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].cpu_pct, 4.0);
        assert_eq!(samples[1].cpu_pct, 3.0);
    }

    #[tokio::test]
    async fn test_delete_process_removes_row_and_metrics() {
        let manager = state_manager().await;
        manager
            .save_process(&descriptor("web"), ProcessStatus::Running)
            .await
            .unwrap();
        let sample = MetricSample {
            process_id: "web".to_string(),
            cpu_pct: 1.0,
            memory_bytes: 1,
            thread_count: 1,
            handle_count: 1,
            timestamp: Utc::now(),
        };
        manager.save_metrics(&sample).await.unwrap();

        manager.delete_process("web").await.unwrap();

        assert!(manager.get_status("web").await.is_err());
        let samples = manager
            .get_metrics(
                "web",
                Utc::now() - chrono::Duration::days(1),
                Utc::now() + chrono::Duration::days(1),
                None,
            )
            .await
            .unwrap();
        assert!(samples.is_empty());
    }
}
