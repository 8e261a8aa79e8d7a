use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use adscout_core::error::AppError;
use adscout_core::job::{
    ActiveJobsFilter, Job, JobFilters, JobStatus, JobSummary, PhaseResult, StatusCounts,
    SubmitJobRequest,
};
use adscout_core::job_store::{JobFinish, JobStore};

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct SearchJobRepository {
    pool: Pool<Postgres>,
}

impl SearchJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SearchJobRow {
    id: Uuid,
    status: String,
    keywords: Vec<String>,
    countries: Vec<String>,
    languages: Vec<String>,
    filters: Json<JobFilters>,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    current_phase: i16,
    progress_percent: i16,
    progress_message: Option<String>,
    phase_history: Json<Vec<PhaseResult>>,
    result: Option<Json<JobSummary>>,
    error_message: Option<String>,
    worker_id: Option<String>,
}

impl From<SearchJobRow> for Job {
    fn from(row: SearchJobRow) -> Self {
        Job {
            id: row.id,
            status: row.status.parse().unwrap_or(JobStatus::Pending),
            keywords: row.keywords,
            countries: row.countries,
            languages: row.languages,
            filters: row.filters.0,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            current_phase: row.current_phase.clamp(0, u8::MAX as i16) as u8,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            progress_message: row.progress_message,
            phase_history: row.phase_history.0,
            result: row.result.map(|r| r.0),
            error_message: row.error_message,
            worker_id: row.worker_id,
        }
    }
}

const JOB_COLUMNS: &str = "id, status, keywords, countries, languages, filters, priority, \
    created_at, updated_at, started_at, completed_at, current_phase, progress_percent, \
    progress_message, phase_history, result, error_message, worker_id";

impl JobStore for SearchJobRepository {
    async fn create_job(&self, request: SubmitJobRequest) -> Result<Job, AppError> {
        let request = request.normalized()?;
        let row = sqlx::query_as::<_, SearchJobRow>(&format!(
            r#"
            INSERT INTO search_jobs (keywords, countries, languages, filters, priority)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&request.keywords)
        .bind(&request.countries)
        .bind(&request.languages)
        .bind(Json(&request.filters))
        .bind(request.priority)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn claim_pending(&self, worker_id: &str, limit: usize) -> Result<Vec<Job>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, SearchJobRow>(&format!(
            r#"
            UPDATE search_jobs
            SET status = 'running', worker_id = $1, started_at = NOW(), updated_at = NOW(),
                cancel_requested = FALSE, progress_message = 'Claimed by worker'
            WHERE id IN (
                SELECT id FROM search_jobs
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $2
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut jobs: Vec<Job> = rows.into_iter().map(Into::into).collect();
        // RETURNING does not preserve the subquery order.
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    async fn recover_interrupted(
        &self,
        stale_before: DateTime<Utc>,
        worker_id: Option<&str>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = 'pending', worker_id = NULL, started_at = NULL,
                current_phase = 0, progress_percent = 0, phase_history = '[]',
                progress_message = 'Recovered after interruption',
                cancel_requested = FALSE, updated_at = NOW()
            WHERE status = 'running'
              AND (updated_at < $1 OR ($2::text IS NOT NULL AND worker_id = $2))
            "#,
        )
        .bind(stale_before)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn heartbeat(&self, job_ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(Uuid, bool)> = sqlx::query_as(
            r#"
            UPDATE search_jobs
            SET updated_at = NOW()
            WHERE id = ANY($1) AND status = 'running'
            RETURNING id, cancel_requested
            "#,
        )
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter(|(_, requested)| *requested)
            .map(|(id, _)| id)
            .collect())
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        phase: u8,
        percent: u8,
        message: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE search_jobs
            SET current_phase = $2, progress_percent = $3, progress_message = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(phase as i16)
        .bind(percent.min(100) as i16)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn append_phase(&self, job_id: Uuid, result: PhaseResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE search_jobs
            SET phase_history = phase_history || $2, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(Json(vec![result]))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn finish_job(&self, job_id: Uuid, finish: JobFinish) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = $2, completed_at = NOW(), updated_at = NOW(),
                result = $3, error_message = $4,
                progress_message = COALESCE($5, progress_message),
                progress_percent = CASE WHEN $2 = 'completed' THEN 100 ELSE progress_percent END,
                cancel_requested = FALSE
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(finish.status.as_str())
        .bind(finish.summary.map(Json))
        .bind(finish.error)
        .bind(finish.message)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_pending(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = 'cancelled', completed_at = NOW(), updated_at = NOW(),
                progress_message = 'Cancelled before start'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE search_jobs
            SET cancel_requested = TRUE
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, SearchJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM search_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, AppError> {
        let rows = sqlx::query_as::<_, SearchJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM search_jobs
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active(&self, filter: &ActiveJobsFilter) -> Result<Vec<Job>, AppError> {
        if filter.status.is_some_and(|s| !s.is_active()) {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, SearchJobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM search_jobs
            WHERE status IN ('pending', 'running')
              AND ($1::text IS NULL OR status = $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, AppError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM search_jobs GROUP BY status"#)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut counts = BTreeMap::new();
        for (status, count) in rows {
            match status.parse::<JobStatus>() {
                Ok(status) => {
                    counts.insert(status, count.max(0) as u64);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unknown job status"),
            }
        }
        Ok(StatusCounts(counts))
    }

    async fn release_job(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE search_jobs
            SET status = 'pending', worker_id = NULL, started_at = NULL,
                current_phase = 0, progress_percent = 0, phase_history = '[]',
                progress_message = 'Released on shutdown', updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
