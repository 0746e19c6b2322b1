//! Raw table load: the sheet lands 1:1 in `datos_crudos_<suffix>`, every
//! column as TEXT, replaced on each run.

use crate::error::{db, EtlError, EtlResult, Stage};
use crate::extract::RawSheet;
use crate::sql::{drop_table_sql, quote_ident};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::info;

/// Rows per INSERT statement
pub const INSERT_CHUNK_ROWS: usize = 1000;

/// PostgreSQL bind parameter limit per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per INSERT for a table of `columns` columns
pub fn chunk_rows(columns: usize) -> usize {
    (MAX_BIND_PARAMS / columns.max(1)).clamp(1, INSERT_CHUNK_ROWS)
}

pub fn create_raw_table_sql(table: &str, columns: &[String]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), defs)
}

fn insert_prefix(table: &str, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({}) ", quote_ident(table), cols)
}

/// Replace the raw table with the sheet contents. Returns rows inserted.
pub async fn load_raw_table(conn: &mut PgConnection, table: &str, sheet: &RawSheet) -> EtlResult<u64> {
    if sheet.rows.is_empty() {
        return Err(EtlError::EmptySheet {
            sheet: sheet.sheet_name.clone(),
        });
    }

    let mut tx = conn.begin().await.map_err(db(Stage::Load))?;

    sqlx::query(&drop_table_sql(table))
        .execute(&mut *tx)
        .await
        .map_err(db(Stage::Load))?;
    sqlx::query(&create_raw_table_sql(table, &sheet.columns))
        .execute(&mut *tx)
        .await
        .map_err(db(Stage::Load))?;

    let prefix = insert_prefix(table, &sheet.columns);
    let mut inserted = 0u64;
    for chunk in sheet.rows.chunks(chunk_rows(sheet.columns.len())) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(prefix.as_str());
        qb.push_values(chunk, |mut b, row| {
            for cell in row {
                b.push_bind(cell.clone());
            }
        });
        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(db(Stage::Load))?;
        inserted += result.rows_affected();
    }

    tx.commit().await.map_err(db(Stage::Load))?;

    info!("Table '{}' created", table);
    info!("Total records: {}", inserted);
    Ok(inserted)
}
