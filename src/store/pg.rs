use std::time::Duration;

use delayed_job_migrations::{migrate, MigrateError};
use delayed_job_record::{JobRecord, QueueStatus};
use delayed_job_spec::NewJob;
use getset::Getters;
use indoc::formatdoc;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{query, query_as, query_scalar, PgPool};
use tracing::info;

use super::JobStore;
use crate::errors::Result;
use crate::utils::escape_identifier;

pub const DEFAULT_SCHEMA: &str = "delayed_job";

const DEFAULT_MAX_PG_CONN: u32 = 20;

/// Claimable rows: due, not failed, and unlocked, stale, or already held by `$2`.
/// `$3` is the staleness window in seconds.
const CLAIMABLE_CLAUSE: &str = indoc::indoc! {r#"
    (run_at is null or run_at <= now())
    and (
        locked_at is null
        or locked_at < now() - make_interval(secs => $3::double precision)
        or locked_by = $2::text
    )
    and failed_at is null
"#};

/// `jobs` table of a PostgreSQL schema.
#[derive(Getters, Clone, Debug)]
#[getset(get = "pub")]
pub struct PgJobStore {
    pg_pool: PgPool,
    /// Schema name, already escaped for SQL
    escaped_schema: String,
}

impl PgJobStore {
    pub async fn new(pg_pool: PgPool, schema: &str) -> Result<Self> {
        let escaped_schema = escape_identifier(&pg_pool, schema).await?;
        Ok(PgJobStore {
            pg_pool,
            escaped_schema,
        })
    }

    /// Connects a pool of at most 20 connections and uses `schema` for the jobs table.
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self> {
        let pg_pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_PG_CONN)
            .connect(database_url)
            .await?;
        Self::new(pg_pool, schema).await
    }

    /// Installs or upgrades the schema and `jobs` table.
    pub async fn migrate(&self) -> std::result::Result<(), MigrateError> {
        migrate(&self.pg_pool, &self.escaped_schema).await
    }

    fn jobs_table(&self) -> String {
        format!("{}.jobs", self.escaped_schema)
    }
}

impl JobStore for PgJobStore {
    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", queue = queue, worker_id = worker_id))]
    async fn find_candidates(
        &self,
        queue: &str,
        worker_id: &str,
        stale_after: Duration,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let sql = formatdoc!(
            r#"
                select id from {jobs}
                    where queue = $1::text
                    and {CLAIMABLE_CLAUSE}
                    order by priority asc, random()
                    limit $4::bigint
            "#,
            jobs = self.jobs_table(),
        );

        let ids = query_scalar(&sql)
            .bind(queue)
            .bind(worker_id)
            .bind(stale_after.as_secs_f64())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pg_pool)
            .await?;
        Ok(ids)
    }

    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", job_id = job_id, worker_id = worker_id))]
    async fn acquire_lock(
        &self,
        job_id: i64,
        worker_id: &str,
        stale_after: Duration,
    ) -> Result<Option<JobRecord>> {
        let sql = formatdoc!(
            r#"
                update {jobs}
                    set locked_at = now(), locked_by = $2::text
                    where id = $1::bigint
                    and {CLAIMABLE_CLAUSE}
                    returning *
            "#,
            jobs = self.jobs_table(),
        );

        let job = query_as(&sql)
            .bind(job_id)
            .bind(worker_id)
            .bind(stale_after.as_secs_f64())
            .fetch_optional(&self.pg_pool)
            .await?;
        Ok(job)
    }

    async fn get_job(&self, job_id: i64) -> Result<Option<JobRecord>> {
        let sql = format!("select * from {} where id = $1::bigint", self.jobs_table());
        let job = query_as(&sql)
            .bind(job_id)
            .fetch_optional(&self.pg_pool)
            .await?;
        Ok(job)
    }

    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", job_id = job_id, worker_id = worker_id))]
    async fn complete_job(&self, job_id: i64, worker_id: &str) -> Result<bool> {
        let sql = format!(
            "delete from {} where id = $1::bigint and locked_by = $2::text",
            self.jobs_table()
        );
        let result = query(&sql)
            .bind(job_id)
            .bind(worker_id)
            .execute(&self.pg_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", job_id = job_id, worker_id = worker_id))]
    async fn retry_job(
        &self,
        job_id: i64,
        worker_id: &str,
        interval: Duration,
        handler: Option<&Value>,
        release_lock: bool,
    ) -> Result<bool> {
        let sql = formatdoc!(
            r#"
                update {jobs}
                    set
                        run_at = now() + make_interval(secs => $3::double precision),
                        handler = coalesce($4::jsonb, handler),
                        locked_at = case when $5::boolean then null else locked_at end,
                        locked_by = case when $5::boolean then null else locked_by end
                    where id = $1::bigint and locked_by = $2::text
            "#,
            jobs = self.jobs_table(),
        );

        let result = query(&sql)
            .bind(job_id)
            .bind(worker_id)
            .bind(interval.as_secs_f64())
            .bind(handler.cloned())
            .bind(release_lock)
            .execute(&self.pg_pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", job_id = job_id, worker_id = worker_id))]
    async fn fail_job(
        &self,
        job_id: i64,
        worker_id: &str,
        max_attempts: i32,
        error: &str,
        release_lock: bool,
    ) -> Result<Option<JobRecord>> {
        let sql = formatdoc!(
            r#"
                update {jobs}
                    set
                        attempts = attempts + 1,
                        failed_at = case when attempts + 1 >= $3::int then now() else null end,
                        error = case when attempts + 1 >= $3::int then $4::text else null end,
                        locked_at = case when $5::boolean then null else locked_at end,
                        locked_by = case when $5::boolean then null else locked_by end
                    where id = $1::bigint and locked_by = $2::text
                    returning *
            "#,
            jobs = self.jobs_table(),
        );

        let job = query_as(&sql)
            .bind(job_id)
            .bind(worker_id)
            .bind(max_attempts)
            .bind(error)
            .bind(release_lock)
            .fetch_optional(&self.pg_pool)
            .await?;
        Ok(job)
    }

    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", worker_id = worker_id))]
    async fn release_locks(&self, worker_id: &str) -> Result<u64> {
        let sql = format!(
            "update {} set locked_at = null, locked_by = null where locked_by = $1::text",
            self.jobs_table()
        );
        let result = query(&sql)
            .bind(worker_id)
            .execute(&self.pg_pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip_all, err, fields(db.system = "postgresql", count = jobs.len()))]
    async fn insert_jobs(&self, jobs: &[NewJob]) -> Result<Vec<JobRecord>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let sql = formatdoc!(
            r#"
                insert into {jobs} (handler, queue, priority, run_at, created_at)
                    select h, q, p, r, now()
                    from unnest($1::jsonb[], $2::text[], $3::int[], $4::timestamptz[]) as t(h, q, p, r)
                    returning *
            "#,
            jobs = self.jobs_table(),
        );

        let handlers: Vec<Value> = jobs.iter().map(|job| job.handler().clone()).collect();
        let queues: Vec<String> = jobs.iter().map(|job| job.queue().clone()).collect();
        let priorities: Vec<i32> = jobs.iter().map(|job| *job.priority()).collect();
        let run_ats: Vec<_> = jobs.iter().map(|job| *job.run_at()).collect();

        let inserted: Vec<JobRecord> = query_as(&sql)
            .bind(handlers)
            .bind(queues)
            .bind(priorities)
            .bind(run_ats)
            .fetch_all(&self.pg_pool)
            .await?;

        info!(count = inserted.len(), "Inserted jobs");
        Ok(inserted)
    }

    async fn queue_status(&self, queue: &str) -> Result<QueueStatus> {
        let sql = formatdoc!(
            r#"
                select
                    count(*) as total,
                    count(locked_at) as locked,
                    count(*) filter (where failed_at is not null) as failed
                from {jobs}
                where queue = $1::text
            "#,
            jobs = self.jobs_table(),
        );

        let (total, locked, failed): (i64, i64, i64) = query_as(&sql)
            .bind(queue)
            .fetch_one(&self.pg_pool)
            .await?;
        Ok(QueueStatus::from_counts(total, locked, failed))
    }
}
