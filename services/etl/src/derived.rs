//! Business tables built from the clean and processed tables.
//!
//! Responsibilities:
//! - `produccion_maquina` and `produccion_operario`: projections of the clean
//!   table with numeric fields defaulted to 0
//! - `analisis_paros`: the processed table's code/minutes pairs plus
//!   `total_minutos_paro`, the sum of the 18 minute columns
//! - Structure-only placeholder tables (`WHERE 1=0`)
//! - Final row-count summary of every output table
//!
//! Each table is attempted on its own; a failure is logged and recorded,
//! never propagated.

use crate::db::{count_rows, replace_table_as};
use crate::schema::{
    code_column, minutes_column, ANALYSIS_TABLE, CLEAN_PLACEHOLDERS, MACHINE_TABLE, OPERATOR_TABLE,
    PROCESSED_PLACEHOLDERS, PROCESSED_TABLE, SHIFT_END, SHIFT_START, STOPPAGE_SLOTS,
    TOTAL_MINUTES_COLUMN,
};
use crate::sql::{quote_ident, select_from, ColumnExpr};
use serde::Serialize;
use sqlx::PgConnection;
use tracing::{error, info, warn};

/// One output table and the SELECT it is created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub select_sql: String,
    pub placeholder: bool,
}

impl TableSpec {
    fn business(name: &str, select_sql: String) -> Self {
        Self {
            name: name.to_string(),
            select_sql,
            placeholder: false,
        }
    }

    fn placeholder(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            select_sql: format!("SELECT * FROM {} WHERE 1=0", quote_ident(source)),
            placeholder: true,
        }
    }
}

fn defaulted(column: &str) -> ColumnExpr {
    ColumnExpr::new(format!("COALESCE({}, 0)", quote_ident(column)), column)
}

fn passthrough(columns: &[&str]) -> Vec<ColumnExpr> {
    columns.iter().map(|c| ColumnExpr::passthrough(c)).collect()
}

pub fn machine_select_sql(clean_table: &str) -> String {
    let mut columns = passthrough(&["fecha", "mes", "maquina"]);
    columns.extend(
        ["pacas_producidas", "horas_trabajadas", "tiempo_de_paro"]
            .iter()
            .map(|c| defaulted(c)),
    );
    columns.extend(passthrough(&[SHIFT_START, SHIFT_END]));
    select_from(&columns, clean_table)
}

pub fn operator_select_sql(clean_table: &str) -> String {
    let mut columns = passthrough(&["fecha", "mes", "maquina", "operario", "referencia"]);
    columns.extend(["pacas_producidas", "horas_trabajadas"].iter().map(|c| defaulted(c)));
    columns.extend(passthrough(&[SHIFT_START, SHIFT_END]));
    select_from(&columns, clean_table)
}

/// `COALESCE(minutos_paro_1, 0) + ... + COALESCE(minutos_paro_18, 0)`
pub fn total_minutes_sql() -> String {
    (1..=STOPPAGE_SLOTS)
        .map(|slot| format!("COALESCE({}, 0)", quote_ident(&minutes_column(slot))))
        .collect::<Vec<_>>()
        .join(" + ")
}

pub fn analysis_select_sql(processed_table: &str) -> String {
    let mut columns = passthrough(&["fecha", "mes", "maquina", "operario"]);
    for slot in 1..=STOPPAGE_SLOTS {
        columns.push(ColumnExpr::passthrough(&code_column(slot)));
        columns.push(ColumnExpr::passthrough(&minutes_column(slot)));
    }
    columns.push(ColumnExpr::new(
        format!("({})", total_minutes_sql()),
        TOTAL_MINUTES_COLUMN,
    ));
    select_from(&columns, processed_table)
}

/// Every derived table in creation order: three business tables, then placeholders
pub fn derived_tables(clean_table: &str) -> Vec<TableSpec> {
    let mut specs = vec![
        TableSpec::business(MACHINE_TABLE, machine_select_sql(clean_table)),
        TableSpec::business(OPERATOR_TABLE, operator_select_sql(clean_table)),
        TableSpec::business(ANALYSIS_TABLE, analysis_select_sql(PROCESSED_TABLE)),
    ];
    specs.extend(
        CLEAN_PLACEHOLDERS
            .iter()
            .map(|name| TableSpec::placeholder(name, clean_table)),
    );
    specs.extend(
        PROCESSED_PLACEHOLDERS
            .iter()
            .map(|name| TableSpec::placeholder(name, PROCESSED_TABLE)),
    );
    specs
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DerivedOutcome {
    pub built: Vec<String>,
    pub failures: Vec<TableFailure>,
}

/// Build every derived table independently
pub async fn build_derived_tables(conn: &mut PgConnection, clean_table: &str) -> DerivedOutcome {
    info!("Creating business tables...");
    let mut outcome = DerivedOutcome::default();

    for spec in derived_tables(clean_table) {
        match replace_table_as(conn, &spec.name, &spec.select_sql).await {
            Ok(()) => {
                if spec.placeholder {
                    info!("Table '{}' created (structure only)", spec.name);
                } else {
                    info!("Table '{}' created", spec.name);
                }
                outcome.built.push(spec.name);
            }
            Err(e) => {
                error!("Could not create '{}': {}", spec.name, e);
                outcome.failures.push(TableFailure {
                    table: spec.name,
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Row count of every table; a table that cannot be counted is reported, not fatal
pub async fn table_summary(conn: &mut PgConnection, tables: &[String]) -> Vec<TableCount> {
    info!("Tables summary:");
    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        match count_rows(conn, table).await {
            Ok(rows) => {
                info!("  {}: {} records", table, rows);
                counts.push(TableCount {
                    table: table.clone(),
                    rows: Some(rows),
                    error: None,
                });
            }
            Err(e) => {
                warn!("  {}: could not count - {}", table, e);
                counts.push(TableCount {
                    table: table.clone(),
                    rows: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: &str = "datos_limpios_temperas_vinilos";

    #[test]
    fn test_derived_table_order() {
        let names: Vec<String> = derived_tables(CLEAN).into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "produccion_maquina",
                "produccion_operario",
                "analisis_paros",
                "produccion_01",
                "produccion_03",
                "produccion_05",
                "porcentaje_codigo_paro",
            ]
        );
    }

    #[test]
    fn test_machine_table_defaults_numeric() {
        let sql = machine_select_sql(CLEAN);
        assert!(sql.contains("COALESCE(\"pacas_producidas\", 0) AS \"pacas_producidas\""));
        assert!(sql.contains("COALESCE(\"tiempo_de_paro\", 0) AS \"tiempo_de_paro\""));
        assert!(sql.contains("\"turno_final\" AS \"turno_final\""));
        assert!(!sql.contains("operario"));
        assert!(sql.ends_with("FROM \"datos_limpios_temperas_vinilos\""));
    }

    #[test]
    fn test_operator_table_columns() {
        let sql = operator_select_sql(CLEAN);
        assert!(sql.contains("\"operario\" AS \"operario\""));
        assert!(sql.contains("\"referencia\" AS \"referencia\""));
        assert!(!sql.contains("tiempo_de_paro"));
    }

    #[test]
    fn test_total_minutes_sums_all_slots() {
        let total = total_minutes_sql();
        assert!(total.starts_with("COALESCE(\"minutos_paro_1\", 0) + "));
        assert!(total.ends_with("COALESCE(\"minutos_paro_18\", 0)"));
        assert_eq!(total.matches(" + ").count(), STOPPAGE_SLOTS - 1);
    }

    #[test]
    fn test_analysis_table_reads_processed() {
        let sql = analysis_select_sql(PROCESSED_TABLE);
        assert!(sql.contains("\"codigo_paro_18\" AS \"codigo_paro_18\""));
        assert!(sql.contains(") AS \"total_minutos_paro\""));
        assert!(sql.ends_with("FROM \"datos_paros_procesados\""));
    }

    #[test]
    fn test_placeholders_are_structure_only() {
        let specs = derived_tables(CLEAN);
        let placeholders: Vec<&TableSpec> = specs.iter().filter(|t| t.placeholder).collect();
        assert_eq!(placeholders.len(), 4);
        assert_eq!(
            placeholders[0].select_sql,
            "SELECT * FROM \"datos_limpios_temperas_vinilos\" WHERE 1=0"
        );
        assert_eq!(
            placeholders[3].select_sql,
            "SELECT * FROM \"datos_paros_procesados\" WHERE 1=0"
        );
    }
}
