use sqlx::{query_scalar, PgExecutor};

use crate::MigrateError;

/// Lowest `server_version_num` the jobs table and its queries are tested against.
pub const MIN_SERVER_VERSION_NUM: u32 = 120000;

pub async fn fetch_and_check_postgres_version<'e, E>(executor: E) -> Result<u32, MigrateError>
where
    E: PgExecutor<'e>,
{
    let version_string: String =
        query_scalar("select current_setting('server_version_num') as server_version_num")
            .fetch_one(executor)
            .await?;

    check_postgres_version(&version_string)
}

pub fn check_postgres_version(version_string: &str) -> Result<u32, MigrateError> {
    let version = version_string.trim().parse::<u32>()?;

    if version < MIN_SERVER_VERSION_NUM {
        return Err(MigrateError::IncompatibleVersion(version));
    }

    Ok(version)
}
