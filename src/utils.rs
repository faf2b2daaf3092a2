use sqlx::{query_scalar, PgExecutor};

use crate::errors::Result;

pub async fn escape_identifier<'e>(executor: impl PgExecutor<'e>, identifier: &str) -> Result<String> {
    let escaped_identifier: String = query_scalar("select format('%I', $1::text)")
        .bind(identifier)
        .fetch_one(executor)
        .await?;

    Ok(escaped_identifier)
}

/// `host::<hostname> pid::<pid>`, the identity a worker uses when none is configured.
pub fn default_worker_id() -> String {
    format!("host::{} pid::{}", hostname(), std::process::id())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| String::from("localhost"))
}
