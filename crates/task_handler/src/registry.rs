use std::collections::HashMap;
use std::fmt::Debug;

use delayed_job_ctx::JobContext;
use serde_json::Value;

use crate::handler::JobHandler;
use crate::payload::{DecodeError, HandlerPayload};
use crate::runner::{run_handler, HandlerFuture};

type RunHandlerFn = Box<dyn Fn(Value, JobContext) -> Result<HandlerFuture, DecodeError> + Send + Sync>;

/// Maps handler kinds to the code able to decode and perform them.
#[derive(Default)]
pub struct HandlerRegistry {
    runners: HashMap<String, RunHandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `H` under `H::KIND`. Registering the same kind twice keeps the last one.
    pub fn register<H: JobHandler>(&mut self) -> &mut Self {
        self.runners
            .insert(H::KIND.to_string(), Box::new(run_handler::<H>));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.runners.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }

    /// Decodes a stored handler column into a runnable future.
    pub fn runner(&self, handler: &Value, ctx: JobContext) -> Result<HandlerFuture, DecodeError> {
        let payload = HandlerPayload::from_value(handler)?;
        let run = self
            .runners
            .get(payload.kind())
            .ok_or_else(|| DecodeError::UnknownKind(payload.kind().clone()))?;
        run(payload.into_data(), ctx)
    }
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
