use std::time::Duration;

use delayed_job::{
    JobContext, JobError, JobHandler, JobSpec, JobStore, MemoryJobStore, PgJobStore, Worker,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    filter::EnvFilter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[derive(Serialize, Deserialize)]
struct HelloWorldJob {
    name: String,
}

impl JobHandler for HelloWorldJob {
    const KIND: &'static str = "hello_world";

    async fn perform(&mut self, ctx: &JobContext) -> Result<(), JobError> {
        println!("Hello {} (job {})", self.name, ctx.job_id());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct FailingJob;

impl JobHandler for FailingJob {
    const KIND: &'static str = "failing";

    async fn perform(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
        Err(JobError::failed("Uh oh"))
    }
}

fn enable_logs() {
    let fmt_layer = tracing_subscriber::fmt::layer();
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sqlx=warn"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

async fn run_demo<S: JobStore>(store: S) -> Result<(), Box<dyn std::error::Error>> {
    let worker = Worker::options()
        .store(store)
        .poll_interval(Duration::from_millis(500))
        .max_iterations(7)
        .max_attempts(3)
        .define_job::<HelloWorldJob>()
        .define_job::<FailingJob>()
        .init()?;
    let utils = worker.create_utils();

    utils
        .add_job(
            &HelloWorldJob {
                name: "world".into(),
            },
            JobSpec::default(),
        )
        .await?;
    utils
        .add_jobs(
            &[
                HelloWorldJob {
                    name: "batch 1".into(),
                },
                HelloWorldJob {
                    name: "batch 2".into(),
                },
            ],
            JobSpec::default(),
        )
        .await?;
    utils.add_job(&FailingJob, JobSpec::default()).await?;

    println!("{:?}", utils.status("default").await?);

    let stats = worker.run().await?;
    println!(
        "ran {} jobs over {} iterations",
        stats.jobs_run(),
        stats.iterations()
    );

    println!("{:?}", utils.status("default").await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_logs();

    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let store = PgJobStore::connect(&database_url, "delayed_job").await?;
            store.migrate().await?;
            run_demo(store).await
        }
        Err(_) => run_demo(MemoryJobStore::new()).await,
    }
}
