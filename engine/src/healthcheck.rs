use std::time::Duration;

use anyhow::{Context, Result};

const CHECK_INTERVAL: Duration = Duration::from_secs(2);
const TIMEOUT: Duration = Duration::from_secs(60);

/// Blocks until Redis and, when configured, PostgreSQL are reachable.
///
/// Checks run in parallel, polling every 2 seconds, and fail after 60.
pub async fn wait_for_services(redis_url: &str, database_url: Option<&str>) -> Result<()> {
    tracing::info!("healthcheck_starting");

    tokio::try_join!(wait_for_redis(redis_url), async {
        match database_url {
            Some(url) => wait_for_postgres(url).await,
            None => Ok(()),
        }
    })?;

    tracing::info!("healthcheck_passed");
    Ok(())
}

async fn wait_for_redis(url: &str) -> Result<()> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;

    loop {
        let check = async {
            let client = redis::Client::open(url)?;
            let mut conn = client.get_multiplexed_tokio_connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            Ok::<(), anyhow::Error>(())
        };

        match check.await {
            Ok(()) => {
                tracing::info!("redis_ready");
                return Ok(());
            }
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(e).context("Redis not ready within 60s");
                }
                tracing::warn!(error = %e, "waiting_for_redis");
                tokio::time::sleep(CHECK_INTERVAL).await;
            }
        }
    }
}

async fn wait_for_postgres(url: &str) -> Result<()> {
    use sqlx::Connection;

    let deadline = tokio::time::Instant::now() + TIMEOUT;

    loop {
        match sqlx::PgConnection::connect(url).await {
            Ok(conn) => {
                let _ = conn.close().await;
                tracing::info!("postgres_ready");
                return Ok(());
            }
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(e).context("PostgreSQL not ready within 60s");
                }
                tracing::warn!(error = %e, "waiting_for_postgres");
                tokio::time::sleep(CHECK_INTERVAL).await;
            }
        }
    }
}
