use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::{Getters, MutGetters, Setters};
use serde_json::Value;

/// Queue used when a job spec does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Priority used when a job spec does not set one.
pub const DEFAULT_PRIORITY: i32 = 9;

/// Options for a job being added to the queue.
///
/// ```
/// use delayed_job_spec::JobSpecBuilder;
/// use chrono::Utc;
///
/// let spec = JobSpecBuilder::new()
///     .queue("emails")
///     .run_at(Utc::now() + chrono::Duration::minutes(5))
///     .priority(1)
///     .build();
/// ```
#[derive(Getters, Setters, MutGetters, Debug, Default, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub", set = "pub", get_mut = "pub")]
#[builder(
    build_fn(private, name = "build_internal"),
    setter(strip_option),
    default,
    pattern = "owned"
)]
pub struct JobSpec {
    /// Queue the job is added to. Workers only claim jobs of their own queue.
    #[builder(setter(into))]
    pub queue: Option<String>,

    /// Earliest time the job may run. Jobs without one are eligible immediately.
    #[builder(setter(into))]
    pub run_at: Option<DateTime<Utc>>,

    /// Lower values are served first.
    pub priority: Option<i32>,
}

impl JobSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }

    pub fn queue_or_default(&self) -> &str {
        self.queue.as_deref().unwrap_or(DEFAULT_QUEUE)
    }

    pub fn priority_or_default(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

impl JobSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> JobSpec {
        self.build_internal()
            .expect("There is a default value for all fields")
    }
}

impl From<Option<JobSpec>> for JobSpec {
    fn from(spec: Option<JobSpec>) -> Self {
        spec.unwrap_or_default()
    }
}

/// A row about to be inserted into the `jobs` table.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct NewJob {
    handler: Value,
    queue: String,
    priority: i32,
    run_at: Option<DateTime<Utc>>,
}

impl NewJob {
    /// Resolves the spec defaults around an encoded handler envelope.
    pub fn new(handler: Value, spec: &JobSpec) -> Self {
        NewJob {
            handler,
            queue: spec.queue_or_default().to_string(),
            priority: spec.priority_or_default(),
            run_at: spec.run_at,
        }
    }
}
