//! Database connection management
//!
//! Pools for the local project database, single connections for the shadow
//! server, and the transactional statement runner shared by the applier,
//! the migration runner and the seed runner.

pub mod queries;

use crate::cancel::CancellationToken;
use crate::connection::ConnectionParams;
use crate::error::{AppError, AppResult};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio::time::Instant;
use tokio_postgres::{Client, NoTls, Transaction};
use tracing::debug;

const MAX_POOL_SIZE: usize = 4;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Database manager owning the local database pool
pub struct DatabaseManager {
    pool: Pool,
    params: ConnectionParams,
}

impl DatabaseManager {
    /// Create a pool and verify the server answers
    pub async fn new(params: ConnectionParams) -> AppResult<Self> {
        let pool = Self::create_pool(&params)?;

        // Test connection
        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        drop(client);

        debug!("Connection pool established for {}", params.to_display_string());
        Ok(Self { pool, params })
    }

    /// Create a connection pool with given parameters
    fn create_pool(params: &ConnectionParams) -> AppResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(params.host.clone());
        cfg.port = Some(params.port);
        cfg.user = Some(params.user.clone());
        cfg.password = Some(params.password.clone());
        cfg.dbname = Some(params.database.clone());
        cfg.application_name = Some("supadev".to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(MAX_POOL_SIZE));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

/// Open one connection outside any pool.
/// The shadow manager needs this so no idle pooled session blocks `CREATE DATABASE ... TEMPLATE`.
pub async fn connect(params: &ConnectionParams) -> AppResult<Client> {
    let (client, connection) = params.to_pg_config().connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Connection closed with error: {}", e);
        }
    });
    Ok(client)
}

/// Poll until the server accepts connections or `timeout` elapses
pub async fn wait_until_ready(params: &ConnectionParams, timeout: Duration) -> AppResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match connect(params).await {
            Ok(client) => {
                client.simple_query("SELECT 1").await?;
                debug!("Database ready at {}", params.to_display_string());
                return Ok(());
            }
            Err(e) if Instant::now() < deadline => {
                debug!("Waiting for {}: {}", params.to_display_string(), e);
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
            Err(e) => {
                return Err(AppError::Container(format!(
                    "database at {} did not become ready within {}s: {}",
                    params.to_display_string(),
                    timeout.as_secs(),
                    e
                )))
            }
        }
    }
}

/// Execute statements in order inside `transaction`, checking for cancellation
/// before each one. The caller commits; dropping the transaction rolls it back.
pub async fn execute_statements<'a, I>(
    transaction: &Transaction<'_>,
    statements: I,
    cancel: &CancellationToken,
) -> AppResult<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut executed = 0;
    for (index, sql) in statements.into_iter().enumerate() {
        cancel.check()?;
        transaction
            .batch_execute(sql)
            .await
            .map_err(|e| statement_error(index, &e))?;
        executed += 1;
    }
    Ok(executed)
}

/// Map a failed statement to `ApplyFailed` carrying its SQLSTATE
pub fn statement_error(index: usize, err: &tokio_postgres::Error) -> AppError {
    let message = err
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string());
    AppError::ApplyFailed {
        statement_index: index,
        sql_state: err.code().map(|c| c.code().to_string()),
        message,
    }
}

/// Prefix an `ApplyFailed` message with the file it came from
pub fn in_source(err: AppError, source: &str) -> AppError {
    match err {
        AppError::ApplyFailed {
            statement_index,
            sql_state,
            message,
        } => AppError::ApplyFailed {
            statement_index,
            sql_state,
            message: format!("{}: {}", source, message),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_source_prefixes_apply_errors() {
        let err = AppError::ApplyFailed {
            statement_index: 2,
            sql_state: Some("42601".to_string()),
            message: "syntax error".to_string(),
        };
        match in_source(err, "20240101000000_init.sql") {
            AppError::ApplyFailed {
                statement_index,
                message,
                ..
            } => {
                assert_eq!(statement_index, 2);
                assert_eq!(message, "20240101000000_init.sql: syntax error");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_in_source_leaves_other_errors() {
        assert!(matches!(
            in_source(AppError::Cancelled, "seed.sql"),
            AppError::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        // Nothing listens on port 1
        let params = ConnectionParams::local(1);
        let err = wait_until_ready(&params, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Container(_)));
    }
}
