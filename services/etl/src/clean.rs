//! Clean table: every logical field projected out of the raw table through
//! generated column expressions, plus the shift split into start and end.

use crate::db::{count_rows, replace_table_as, table_columns};
use crate::error::{db, EtlError, EtlResult, Stage};
use crate::extract::{RawRow, RawSheet};
use crate::mapping::ColumnMapping;
use crate::schema::{FieldKind, FieldRole, LogicalSchema, SHIFT_END, SHIFT_FIELD, SHIFT_START};
use crate::sql::{
    column_expression, numeric_value, select_from, trim_blank, trim_blank_sql, ColumnExpr,
};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::collections::HashMap;
use tracing::info;

/// Separator between shift start and end ("8-16")
pub const SHIFT_SEPARATOR: char = '-';

fn shift_start_sql(shift_sql: &str) -> String {
    trim_blank_sql(&format!("split_part({shift_sql}, '{SHIFT_SEPARATOR}', 1)"))
}

fn shift_end_sql(shift_sql: &str) -> String {
    trim_blank_sql(&format!("regexp_replace({shift_sql}, '^.*{SHIFT_SEPARATOR}', '')"))
}

/// Text before the first separator and after the last one, trimmed.
/// Without a separator both parts are the whole text.
pub fn split_shift(shift: &str) -> (String, String) {
    let start = shift.split(SHIFT_SEPARATOR).next().unwrap_or(shift);
    let end = shift.rsplit(SHIFT_SEPARATOR).next().unwrap_or(shift);
    (trim_blank(start).to_string(), trim_blank(end).to_string())
}

/// Column expressions of the clean table, in output order:
/// scalars, shift start/end, the 18 slot pairs, free-text extras
pub fn clean_columns(schema: &LogicalSchema, mapping: &ColumnMapping) -> Vec<ColumnExpr> {
    let mut columns: Vec<ColumnExpr> = schema
        .scalars()
        .map(|f| column_expression(&f.name, mapping, f.kind))
        .collect();

    let shift = column_expression(SHIFT_FIELD, mapping, FieldKind::Text);
    columns.push(ColumnExpr::new(shift_start_sql(&shift.sql), SHIFT_START));
    columns.push(ColumnExpr::new(shift_end_sql(&shift.sql), SHIFT_END));

    columns.extend(
        schema
            .fields()
            .iter()
            .filter(|f| matches!(f.role, FieldRole::StoppageHours(_) | FieldRole::StoppageReason(_)))
            .map(|f| column_expression(&f.name, mapping, f.kind)),
    );

    columns.extend(schema.extras().map(|f| column_expression(&f.name, mapping, f.kind)));
    columns
}

pub fn clean_select_sql(schema: &LogicalSchema, mapping: &ColumnMapping, raw_table: &str) -> String {
    select_from(&clean_columns(schema, mapping), raw_table)
}

/// Read the raw table's actual columns; fails when the table is missing
pub async fn raw_columns(conn: &mut PgConnection, raw_table: &str) -> EtlResult<Vec<String>> {
    let columns = table_columns(conn, raw_table)
        .await
        .map_err(db(Stage::Clean))?;
    if columns.is_empty() {
        return Err(EtlError::RawTableMissing {
            table: raw_table.to_string(),
        });
    }
    Ok(columns)
}

/// Replace the clean table. Returns its row count.
pub async fn build_clean_table(
    conn: &mut PgConnection,
    schema: &LogicalSchema,
    mapping: &ColumnMapping,
    raw_table: &str,
    clean_table: &str,
) -> EtlResult<i64> {
    info!("Creating clean table '{}'...", clean_table);
    let select = clean_select_sql(schema, mapping, raw_table);
    replace_table_as(conn, clean_table, &select)
        .await
        .map_err(db(Stage::Clean))?;

    let rows = count_rows(conn, clean_table).await.map_err(db(Stage::Clean))?;
    info!("Table '{}' created with {} records", clean_table, rows);
    Ok(rows)
}

// =============================================================================
// In-memory projection (dry run)
// =============================================================================

/// One clean-table row evaluated in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanRecord {
    pub text: HashMap<String, Option<String>>,
    pub numeric: HashMap<String, Decimal>,
}

impl CleanRecord {
    pub fn text(&self, column: &str) -> Option<&str> {
        self.text.get(column).and_then(|v| v.as_deref())
    }

    pub fn numeric(&self, column: &str) -> Decimal {
        self.numeric.get(column).copied().unwrap_or(Decimal::ZERO)
    }
}

fn lookup<'r>(mapping: &ColumnMapping, sheet: &RawSheet, row: &'r RawRow, logical: &str) -> Option<&'r str> {
    let actual = mapping.resolve(logical)?;
    let idx = sheet.column_index(actual)?;
    row.get(idx).and_then(|c| c.as_deref())
}

/// Evaluate the clean projection for one raw row, mirroring the generated SQL
pub fn project_row(
    schema: &LogicalSchema,
    mapping: &ColumnMapping,
    sheet: &RawSheet,
    row: &RawRow,
) -> CleanRecord {
    let cell = |logical: &str| lookup(mapping, sheet, row, logical);

    let mut record = CleanRecord::default();
    for field in schema.fields() {
        match field.kind {
            FieldKind::Numeric => {
                record
                    .numeric
                    .insert(field.name.clone(), numeric_value(cell(&field.name)));
            }
            FieldKind::Text => {
                record
                    .text
                    .insert(field.name.clone(), cell(&field.name).map(str::to_string));
            }
        }
    }

    let (start, end) = match cell(SHIFT_FIELD) {
        Some(shift) => {
            let (s, e) = split_shift(shift);
            (Some(s), Some(e))
        }
        None => (None, None),
    };
    record.text.insert(SHIFT_START.to_string(), start);
    record.text.insert(SHIFT_END.to_string(), end);
    record
}
