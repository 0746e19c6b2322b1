//! Stoppage-code processing.
//!
//! For each of the 18 slots the clean table carries a raw reason marker and a
//! raw duration text. The processed table replaces them with:
//! - `codigo_paro_<n>`: the slot number as text when the reason cell has
//!   content, else NULL (the marker's own text is not kept)
//! - `minutos_paro_<n>`: minutes extracted from the duration text, 0 when the
//!   slot did not occur or the duration is blank or unparseable
//!
//! Statistics (occurrences and minute sums per slot) are for reporting only.

use crate::clean::CleanRecord;
use crate::db::{count_rows, replace_table_as};
use crate::error::{db, EtlResult, Stage};
use crate::schema::{
    code_column, hours_field, minutes_column, reason_field, EXTRA_FIELDS, PROCESSED_BASE_COLUMNS,
    PROCESSED_TABLE, STOPPAGE_SLOTS,
};
use crate::sql::{
    numeric_extract, numeric_value, quote_ident, select_from, trim_blank, trim_blank_sql,
    ColumnExpr,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, Row};
use tracing::info;

/// Slots shown in the sample rows
const SAMPLE_SLOTS: usize = 3;
const SAMPLE_LIMIT: usize = 5;

/// `cell IS NOT NULL AND cell has non-blank content`
fn present_sql(column_sql: &str) -> String {
    format!("{column_sql} IS NOT NULL AND {} <> ''", trim_blank_sql(column_sql))
}

fn is_present(cell: Option<&str>) -> bool {
    cell.map(|c| !trim_blank(c).is_empty()).unwrap_or(false)
}

pub fn code_expression(slot: usize) -> ColumnExpr {
    let reason = quote_ident(&reason_field(slot));
    ColumnExpr::new(
        format!("CASE WHEN {} THEN '{slot}' ELSE NULL END", present_sql(&reason)),
        code_column(slot),
    )
}

pub fn minutes_expression(slot: usize) -> ColumnExpr {
    let reason = quote_ident(&reason_field(slot));
    let hours = quote_ident(&hours_field(slot));
    ColumnExpr::new(
        format!(
            "CASE WHEN {} AND {} THEN {} ELSE 0 END",
            present_sql(&reason),
            present_sql(&hours),
            numeric_extract(&hours)
        ),
        minutes_column(slot),
    )
}

/// Processed table projection: base scalars, 18 code/minutes pairs, extras
pub fn processed_select_sql(clean_table: &str) -> String {
    let mut columns: Vec<ColumnExpr> = PROCESSED_BASE_COLUMNS
        .iter()
        .map(|c| ColumnExpr::passthrough(c))
        .collect();
    for slot in 1..=STOPPAGE_SLOTS {
        columns.push(code_expression(slot));
        columns.push(minutes_expression(slot));
    }
    columns.extend(EXTRA_FIELDS.iter().map(|c| ColumnExpr::passthrough(c)));
    select_from(&columns, clean_table)
}

/// Column 0: total rows; 1..=18: occurrences per slot; 19..=36: minutes per slot
pub fn statistics_sql(table: &str) -> String {
    let mut columns = vec![ColumnExpr::new("COUNT(*)", "total_registros")];
    for slot in 1..=STOPPAGE_SLOTS {
        columns.push(ColumnExpr::new(
            format!(
                "COALESCE(SUM(CASE WHEN {} IS NOT NULL THEN 1 ELSE 0 END), 0)",
                quote_ident(&code_column(slot))
            ),
            format!("paros_{slot}"),
        ));
    }
    for slot in 1..=STOPPAGE_SLOTS {
        columns.push(ColumnExpr::new(
            format!("COALESCE(SUM({}), 0)", quote_ident(&minutes_column(slot))),
            format!("total_minutos_{slot}"),
        ));
    }
    select_from(&columns, table)
}

pub fn samples_sql(table: &str) -> String {
    let mut columns = Vec::new();
    let mut any_code = Vec::new();
    for slot in 1..=SAMPLE_SLOTS {
        columns.push(ColumnExpr::passthrough(&code_column(slot)));
        columns.push(ColumnExpr::passthrough(&minutes_column(slot)));
        any_code.push(format!("{} IS NOT NULL", quote_ident(&code_column(slot))));
    }
    format!(
        "{}\nWHERE {}\nLIMIT {}",
        select_from(&columns, table),
        any_code.join(" OR "),
        SAMPLE_LIMIT
    )
}

/// One slot of one row after processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppageRecord {
    pub slot: usize,
    pub code: Option<String>,
    pub minutes: Decimal,
}

impl StoppageRecord {
    /// In-memory counterpart of [`code_expression`] and [`minutes_expression`]
    pub fn evaluate(slot: usize, reason: Option<&str>, hours: Option<&str>) -> Self {
        if !is_present(reason) {
            return Self {
                slot,
                code: None,
                minutes: Decimal::ZERO,
            };
        }
        let minutes = if is_present(hours) {
            numeric_value(hours)
        } else {
            Decimal::ZERO
        };
        Self {
            slot,
            code: Some(slot.to_string()),
            minutes,
        }
    }
}

/// All 18 slots of one clean row
pub fn records_for(record: &CleanRecord) -> Vec<StoppageRecord> {
    (1..=STOPPAGE_SLOTS)
        .map(|slot| {
            StoppageRecord::evaluate(
                slot,
                record.text(&reason_field(slot)),
                record.text(&hours_field(slot)),
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStats {
    pub slot: usize,
    pub occurrences: i64,
    pub minutes: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppageSummary {
    pub total_rows: i64,
    pub slots: Vec<SlotStats>,
    pub total_minutes: Decimal,
}

impl Default for StoppageSummary {
    fn default() -> Self {
        Self {
            total_rows: 0,
            slots: (1..=STOPPAGE_SLOTS)
                .map(|slot| SlotStats {
                    slot,
                    occurrences: 0,
                    minutes: Decimal::ZERO,
                })
                .collect(),
            total_minutes: Decimal::ZERO,
        }
    }
}

impl StoppageSummary {
    /// Fold one processed row into the totals
    pub fn accumulate(&mut self, records: &[StoppageRecord]) {
        self.total_rows += 1;
        for record in records {
            let Some(stats) = self.slots.iter_mut().find(|s| s.slot == record.slot) else {
                continue;
            };
            if record.code.is_some() {
                stats.occurrences += 1;
            }
            stats.minutes += record.minutes;
            self.total_minutes += record.minutes;
        }
    }

    pub fn log(&self) {
        info!("Stoppage statistics (1-{}):", STOPPAGE_SLOTS);
        info!("  Total records: {}", self.total_rows);
        for stats in self.slots.iter().filter(|s| s.occurrences > 0) {
            info!(
                "  Code {}: {} records (total minutes: {})",
                stats.slot, stats.occurrences, stats.minutes
            );
        }
        info!("  TOTAL STOPPAGE MINUTES: {}", self.total_minutes);
    }
}

/// In-memory counterpart of [`samples_sql`]: the first rows with a code in
/// one of the sample slots, cut to those slots
pub fn select_samples(rows: &[Vec<StoppageRecord>]) -> Vec<Vec<StoppageRecord>> {
    rows.iter()
        .filter(|slots| slots.iter().take(SAMPLE_SLOTS).any(|s| s.code.is_some()))
        .take(SAMPLE_LIMIT)
        .map(|slots| slots.iter().take(SAMPLE_SLOTS).cloned().collect())
        .collect()
}

pub fn log_samples(samples: &[Vec<StoppageRecord>]) {
    if samples.is_empty() {
        return;
    }
    info!("Processed samples:");
    for (i, sample) in samples.iter().enumerate() {
        info!("  Sample {}:", i + 1);
        for record in sample {
            if let Some(code) = &record.code {
                info!("    - Code {}: {} minutes", code, record.minutes);
            }
        }
    }
}

async fn fetch_summary(conn: &mut PgConnection, table: &str) -> EtlResult<StoppageSummary> {
    let row = sqlx::query(&statistics_sql(table))
        .fetch_one(&mut *conn)
        .await
        .map_err(db(Stage::Stoppage))?;

    let mut summary = StoppageSummary {
        total_rows: row.try_get::<i64, _>(0).map_err(db(Stage::Stoppage))?,
        ..StoppageSummary::default()
    };
    for stats in summary.slots.iter_mut() {
        stats.occurrences = row
            .try_get::<i64, _>(stats.slot)
            .map_err(db(Stage::Stoppage))?;
        stats.minutes = row
            .try_get::<Decimal, _>(STOPPAGE_SLOTS + stats.slot)
            .map_err(db(Stage::Stoppage))?;
    }
    summary.total_minutes = summary.slots.iter().map(|s| s.minutes).sum();
    Ok(summary)
}

async fn fetch_samples(conn: &mut PgConnection, table: &str) -> EtlResult<Vec<Vec<StoppageRecord>>> {
    let rows = sqlx::query(&samples_sql(table))
        .fetch_all(&mut *conn)
        .await
        .map_err(db(Stage::Stoppage))?;

    let mut samples = Vec::with_capacity(rows.len());
    for row in rows {
        let mut sample = Vec::with_capacity(SAMPLE_SLOTS);
        for slot in 1..=SAMPLE_SLOTS {
            let idx = (slot - 1) * 2;
            sample.push(StoppageRecord {
                slot,
                code: row.try_get(idx).map_err(db(Stage::Stoppage))?,
                minutes: row.try_get(idx + 1).map_err(db(Stage::Stoppage))?,
            });
        }
        samples.push(sample);
    }
    Ok(samples)
}

/// Replace the processed table from the clean table and report statistics
pub async fn process_stoppages(conn: &mut PgConnection, clean_table: &str) -> EtlResult<StoppageSummary> {
    info!("Processing stoppage codes...");
    replace_table_as(conn, PROCESSED_TABLE, &processed_select_sql(clean_table))
        .await
        .map_err(db(Stage::Stoppage))?;
    let rows = count_rows(conn, PROCESSED_TABLE)
        .await
        .map_err(db(Stage::Stoppage))?;
    info!("Table '{}' created with {} records", PROCESSED_TABLE, rows);

    let summary = fetch_summary(conn, PROCESSED_TABLE).await?;
    summary.log();
    log_samples(&fetch_samples(conn, PROCESSED_TABLE).await?);

    Ok(summary)
}
