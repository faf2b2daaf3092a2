#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use delayed_job::clock::mock::MockClock;
use delayed_job::{
    HandlerPayload, JobContext, JobError, JobHandler, MemoryJobStore, PgJobStore, RetryLater,
    WorkerOptions,
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub type TestStore = MemoryJobStore<MockClock>;

pub fn memory_store() -> (TestStore, MockClock) {
    let clock = MockClock::new(Utc::now());
    (MemoryJobStore::with_clock(clock.clone()), clock)
}

pub fn worker_options(store: TestStore, worker_id: &str) -> WorkerOptions<TestStore> {
    WorkerOptions::default()
        .store(store)
        .worker_id(worker_id)
        .poll_interval(Duration::from_millis(10))
        .listen_os_shutdown_signals(false)
        .define_job::<Succeed>()
        .define_job::<AlwaysFail>()
        .define_job::<Panics>()
        .define_job::<Retry>()
        .define_job::<ReplaceWithSucceed>()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Succeed;

impl JobHandler for Succeed {
    const KIND: &'static str = "succeed";

    async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AlwaysFail {
    pub message: String,
}

impl JobHandler for AlwaysFail {
    const KIND: &'static str = "always_fail";

    async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
        Err(anyhow::anyhow!("{}", self.message).into())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Panics;

impl JobHandler for Panics {
    const KIND: &'static str = "panics";

    async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
        panic!("handler exploded");
    }
}

/// Asks to be retried on every run, counting its own runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Retry {
    pub interval_secs: Option<u64>,
    pub count_as_failure: bool,
    pub keep_lock: bool,
    pub update_handler: bool,
    pub runs: u32,
}

impl JobHandler for Retry {
    const KIND: &'static str = "retry";

    async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
        self.runs += 1;

        let mut retry = match self.interval_secs {
            Some(secs) => RetryLater::after(Duration::from_secs(secs)),
            None => RetryLater::new(),
        };
        if self.count_as_failure {
            retry = retry.count_as_failure();
        }
        if self.keep_lock {
            retry = retry.keep_lock();
        }
        if self.update_handler {
            retry = retry.update_handler();
        }
        Err(retry.into())
    }
}

/// Retries in an hour as a [`Succeed`] job.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReplaceWithSucceed;

impl JobHandler for ReplaceWithSucceed {
    const KIND: &'static str = "replace_with_succeed";

    async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
        let next = HandlerPayload::encode(&Succeed)?;
        Err(RetryLater::after(Duration::from_secs(60 * 60))
            .replace_handler(next)
            .into())
    }
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer().with_test_writer();
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("debug,sqlx=warn"))
            .unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}

#[derive(Clone, Debug)]
pub struct TestDatabase {
    pub source_pool: PgPool,
    pub test_pool: PgPool,
    pub name: String,
}

impl TestDatabase {
    async fn drop(&self) {
        self.test_pool.close().await;
        sqlx::query(&format!("DROP DATABASE {} WITH (FORCE)", self.name))
            .execute(&self.source_pool)
            .await
            .expect("Failed to drop test database");
    }

    pub async fn create_store(&self) -> PgJobStore {
        let store = PgJobStore::new(self.test_pool.clone(), "delayed_job")
            .await
            .expect("Failed to create store");
        store.migrate().await.expect("Failed to migrate");
        store
    }
}

async fn create_test_database(db_url: &str) -> TestDatabase {
    let pg_conn_options: PgConnectOptions = db_url
        .parse::<PgConnectOptions>()
        .expect("Failed to parse DATABASE_URL")
        .application_name("__test_delayed_job");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.clone())
        .await
        .expect("Failed to connect to database");

    let db_name = format!("__test_delayed_job_{}", uuid::Uuid::new_v4().simple());

    sqlx::query(&format!("CREATE DATABASE {db_name}"))
        .execute(&pg_pool)
        .await
        .expect("Failed to create test database");

    let test_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(4)
        .connect_with(pg_conn_options.database(&db_name))
        .await
        .expect("Failed to connect to test database");

    TestDatabase {
        source_pool: pg_pool,
        test_pool,
        name: db_name,
    }
}

/// Runs `test_fn` against a throwaway database. Does nothing when `DATABASE_URL` is unset.
pub async fn with_test_db<F, Fut>(test_fn: F)
where
    F: FnOnce(TestDatabase) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping PostgreSQL test");
        return;
    };

    let test_db = create_test_database(&db_url).await;
    let test_db_2 = test_db.clone();

    let result = tokio::spawn(async move {
        test_fn(test_db_2).await;
    })
    .await;

    test_db.drop().await;
    result.expect("Test failed");
}
