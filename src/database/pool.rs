use crate::error::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;

/// Every connection carries a server-side `statement_timeout`, so no store
/// query outlives `store_timeout`.
pub async fn create_pool(database_url: &str, store_timeout: Duration) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(database_url)?.options([(
        "statement_timeout",
        store_timeout.as_millis().to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .acquire_timeout(store_timeout)
        .connect_with(options)
        .await?;
    Ok(pool)
}
