//! PostgreSQL plumbing shared by every stage.
//!
//! The pool holds a single connection; each stage acquires it, works, and
//! drops it at the end of the stage.

use crate::error::{EtlError, EtlResult};
use crate::sql::{count_rows_sql, create_table_as_sql, drop_table_sql};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool};
use std::time::Duration;
use tracing::info;

/// Connect and verify the session with a trivial query
pub async fn connect(options: PgConnectOptions) -> EtlResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(EtlError::Connect)?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(EtlError::Connect)?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Replace `table` with the result of `select_sql` in one transaction
pub async fn replace_table_as(
    conn: &mut PgConnection,
    table: &str,
    select_sql: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = conn.begin().await?;
    sqlx::query(&drop_table_sql(table)).execute(&mut *tx).await?;
    sqlx::query(&create_table_as_sql(table, select_sql))
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

pub async fn count_rows(conn: &mut PgConnection, table: &str) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(&count_rows_sql(table))
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Column names of `table` in the current schema, in ordinal order.
///
/// Empty when the table does not exist.
pub async fn table_columns(conn: &mut PgConnection, table: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT column_name::text
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = $1
        ORDER BY ordinal_position
        "#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}
