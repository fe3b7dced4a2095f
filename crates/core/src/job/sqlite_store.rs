//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{
    CreateJobRequest, JobEnvelope, JobFilter, JobStage, JobStore, Stage, StoreError, WorkerClass,
};

/// SQLite-backed job store.
///
/// The stage column holds the serialized [`JobStage`]; CAS guards compare the
/// JSON `type` tag so a transition only applies when the caller's view of the
/// stage is still current.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                stage TEXT NOT NULL,
                payload_ref TEXT NOT NULL,
                worker_class TEXT NOT NULL,
                capture_attempts INTEGER NOT NULL DEFAULT 0,
                detection_attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
            "#,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref stage) = filter.stage {
            conditions.push("json_extract(stage, '$.type') = ?");
            params.push(Box::new(stage.clone()));
        }

        if let Some(class) = filter.worker_class {
            conditions.push("worker_class = ?");
            params.push(Box::new(class.as_label().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobEnvelope> {
        let id: String = row.get(0)?;
        let stage_json: String = row.get(1)?;
        let payload_ref: String = row.get(2)?;
        let worker_class_str: String = row.get(3)?;
        let capture_attempts: u32 = row.get(4)?;
        let detection_attempts: u32 = row.get(5)?;
        let max_attempts: u32 = row.get(6)?;
        let last_error: Option<String> = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let stage: JobStage = serde_json::from_str(&stage_json).unwrap_or(JobStage::Pending);

        let worker_class_hint = match worker_class_str.as_str() {
            "cpu" => WorkerClass::Cpu,
            "gpu" => WorkerClass::Gpu,
            _ => WorkerClass::Any,
        };

        Ok(JobEnvelope {
            id,
            stage,
            payload_ref,
            worker_class_hint,
            capture_attempts,
            detection_attempts,
            max_attempts,
            last_error,
            created_at,
            updated_at,
        })
    }

    const SELECT_COLUMNS: &'static str = "id, stage, payload_ref, worker_class, capture_attempts, detection_attempts, max_attempts, last_error, created_at, updated_at";

    fn get_locked(conn: &Connection, id: &str) -> Result<Option<JobEnvelope>, StoreError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?", Self::SELECT_COLUMNS);
        let result = conn.query_row(&sql, params![id], Self::row_to_job);

        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e.to_string())),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<JobEnvelope, StoreError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let stage = JobStage::Pending;

        let stage_json =
            serde_json::to_string(&stage).map_err(|e| StoreError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, stage, payload_ref, worker_class, capture_attempts, detection_attempts, max_attempts, last_error, created_at, updated_at) VALUES (?, ?, ?, ?, 0, 0, ?, NULL, ?, ?)",
            params![
                id,
                stage_json,
                request.payload_ref,
                request.worker_class_hint.as_label(),
                request.max_attempts,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(JobEnvelope {
            id,
            stage,
            payload_ref: request.payload_ref,
            worker_class_hint: request.worker_class_hint,
            capture_attempts: 0,
            detection_attempts: 0,
            max_attempts: request.max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<JobEnvelope>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::get_locked(&conn, id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<JobEnvelope>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at ASC LIMIT ? OFFSET ?",
            Self::SELECT_COLUMNS,
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row_result in rows {
            let job = row_result.map_err(|e| StoreError::Database(e.to_string()))?;
            jobs.push(job);
        }

        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count)
    }

    fn transition(
        &self,
        id: &str,
        expected: &str,
        new_stage: JobStage,
    ) -> Result<JobEnvelope, StoreError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let stage_json =
            serde_json::to_string(&new_stage).map_err(|e| StoreError::Database(e.to_string()))?;

        let affected = conn
            .execute(
                "UPDATE jobs SET stage = ?1, updated_at = ?2 WHERE id = ?3 AND json_extract(stage, '$.type') = ?4",
                params![stage_json, now.to_rfc3339(), id, expected],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if affected == 0 {
            // Either the job is gone or the guard did not match.
            return match Self::get_locked(&conn, id)? {
                Some(current) => Err(StoreError::Conflict {
                    job_id: id.to_string(),
                    expected: expected.to_string(),
                    actual: current.stage.stage_type().to_string(),
                }),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }

        Self::get_locked(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn claim(&self, id: &str, stage: Stage, claimed_by: &str) -> Result<JobEnvelope, StoreError> {
        let conn = self.conn.lock().unwrap();

        let current =
            Self::get_locked(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let expected = stage.queued_type();
        let now = Utc::now();

        // The detection running state carries the artifact forward, so the
        // new stage is built from the current queued variant.
        let new_stage = match (stage, &current.stage) {
            (Stage::Capture, JobStage::CaptureQueued) => JobStage::CaptureRunning {
                claimed_by: claimed_by.to_string(),
                started_at: now,
            },
            (Stage::Detection, JobStage::DetectionQueued { artifact_ref }) => {
                JobStage::DetectionRunning {
                    artifact_ref: artifact_ref.clone(),
                    claimed_by: claimed_by.to_string(),
                    started_at: now,
                }
            }
            _ => {
                return Err(StoreError::Conflict {
                    job_id: id.to_string(),
                    expected: expected.to_string(),
                    actual: current.stage.stage_type().to_string(),
                });
            }
        };

        let stage_json =
            serde_json::to_string(&new_stage).map_err(|e| StoreError::Database(e.to_string()))?;

        let attempts_column = match stage {
            Stage::Capture => "capture_attempts",
            Stage::Detection => "detection_attempts",
        };

        let sql = format!(
            "UPDATE jobs SET stage = ?1, updated_at = ?2, {col} = {col} + 1 WHERE id = ?3 AND json_extract(stage, '$.type') = ?4",
            col = attempts_column
        );

        let affected = conn
            .execute(&sql, params![stage_json, now.to_rfc3339(), id, expected])
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if affected == 0 {
            return Err(StoreError::Conflict {
                job_id: id.to_string(),
                expected: expected.to_string(),
                actual: current.stage.stage_type().to_string(),
            });
        }

        Self::get_locked(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn record_attempt_failure(
        &self,
        id: &str,
        stage: Stage,
        error: &str,
    ) -> Result<JobEnvelope, StoreError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let message = format!("{}: {}", stage.as_label(), error);

        let affected = conn
            .execute(
                "UPDATE jobs SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![message, now.to_rfc3339(), id],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Self::get_locked(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn requeue_orphaned(&self) -> Result<Vec<JobEnvelope>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let sql = format!(
            "SELECT {} FROM jobs WHERE json_extract(stage, '$.type') IN ('capture_running', 'detection_running') ORDER BY created_at ASC",
            Self::SELECT_COLUMNS
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_job)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut orphaned = Vec::new();
        for row_result in rows {
            let job = row_result.map_err(|e| StoreError::Database(e.to_string()))?;
            orphaned.push(job);
        }

        let now = Utc::now();
        let mut requeued = Vec::new();

        for job in orphaned {
            let folded = match &job.stage {
                JobStage::CaptureRunning { .. } => JobStage::CaptureQueued,
                JobStage::DetectionRunning { artifact_ref, .. } => JobStage::DetectionQueued {
                    artifact_ref: artifact_ref.clone(),
                },
                _ => continue,
            };

            let stage_json = serde_json::to_string(&folded)
                .map_err(|e| StoreError::Database(e.to_string()))?;

            conn.execute(
                "UPDATE jobs SET stage = ?1, updated_at = ?2 WHERE id = ?3",
                params![stage_json, now.to_rfc3339(), job.id],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

            requeued.push(JobEnvelope {
                stage: folded,
                updated_at: now,
                ..job
            });
        }

        Ok(requeued)
    }

    fn delete(&self, id: &str) -> Result<JobEnvelope, StoreError> {
        let conn = self.conn.lock().unwrap();

        let job =
            Self::get_locked(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        conn.execute("DELETE FROM jobs WHERE id = ?", params![id])
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(job)
    }
}
