//! Pipeline orchestration.
//!
//! Responsibilities:
//! - Run the stages in order: discovery, connect, extract, load, clean,
//!   stoppage, derived, summary
//! - Hold the per-run state in one [`RunContext`] passed between stages
//! - Acquire the database connection per stage and release it at the end of
//!   the stage
//! - Dry run: evaluate the clean and stoppage projections in memory
//!
//! Fatal failures propagate as [`EtlError`]; derived-table failures are
//! recorded in the report and the run continues.

use crate::clean::{build_clean_table, project_row, raw_columns, CleanRecord};
use crate::config::Config;
use crate::db::connect;
use crate::derived::{build_derived_tables, table_summary};
use crate::discovery::{find_workbook, WORKBOOK_PATTERNS};
use crate::error::{db, EtlError, EtlResult, Stage};
use crate::extract::{build_raw_sheet, read_sheet_grid, RawSheet};
use crate::header::{locate_header_row, HeaderSearch, HEADER_SCAN_ROWS, MIN_KEYWORD_MATCHES};
use crate::load::load_raw_table;
use crate::mapping::ColumnMapping;
use crate::report::{file_hash, RunReport, WorkbookInfo};
use crate::schema::LogicalSchema;
use crate::stoppage::{
    log_samples, process_stoppages, records_for, select_samples, StoppageRecord, StoppageSummary,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Decides whether the row 0 fallback may be used when no header row qualified
pub type HeaderConfirm<'a> = &'a mut dyn FnMut(&HeaderSearch) -> bool;

/// Per-run state shared by the stages
pub struct RunContext {
    pub config: Config,
    pub schema: LogicalSchema,
    pub report: RunReport,
}

/// Result of evaluating the projections in memory
#[derive(Debug, Clone)]
pub struct DryRunOutcome {
    pub clean: Vec<CleanRecord>,
    pub stoppages: Vec<Vec<StoppageRecord>>,
    pub summary: StoppageSummary,
}

impl DryRunOutcome {
    pub fn log(&self) {
        let bales: Decimal = self.clean.iter().map(|r| r.numeric("pacas_producidas")).sum();
        info!(
            "Dry run: {} rows evaluated ({} bales produced), nothing written",
            self.clean.len(),
            bales
        );
        self.summary.log();
        log_samples(&select_samples(&self.stoppages));
    }
}

impl RunContext {
    pub fn new(config: Config, run_id: Uuid) -> Self {
        let report = RunReport::new(run_id, config.dry_run);
        Self {
            config,
            schema: LogicalSchema::temperas_vinilos(),
            report,
        }
    }

    // =========================================================================
    // Discovery / extract
    // =========================================================================

    pub fn discover(&mut self) -> EtlResult<PathBuf> {
        info!("Searching for workbook...");
        let path = find_workbook(
            self.config.excel_file.as_deref(),
            &self.config.search_root,
            &WORKBOOK_PATTERNS,
        )?;
        self.report.workbook = Some(WorkbookInfo {
            path: path.clone(),
            content_hash: String::new(),
            sheet: None,
        });
        Ok(path)
    }

    pub fn extract(&mut self, workbook: &Path, confirm: HeaderConfirm<'_>) -> EtlResult<RawSheet> {
        let content_hash = file_hash(workbook)?;
        info!("Workbook hash: {}", content_hash);

        let grid = read_sheet_grid(workbook)?;
        if let Some(info) = self.report.workbook.as_mut() {
            info.content_hash = content_hash;
            info.sheet = Some(grid.sheet_name.clone());
        }

        let scan = grid.rows.len().min(HEADER_SCAN_ROWS);
        let header = locate_header_row(&grid.rows[..scan]);
        self.report.header = Some(header);
        if header.found {
            info!(
                "Header found at row {} ({} keyword matches)",
                header.row, header.matches
            );
        } else {
            warn!(
                "No row among the first {} has {} header keywords; falling back to row 0",
                header.scanned, MIN_KEYWORD_MATCHES
            );
            if !confirm(&header) {
                return Err(EtlError::HeaderNotConfirmed {
                    scanned: header.scanned,
                });
            }
            warn!("Row 0 fallback confirmed");
        }

        let sheet = build_raw_sheet(grid, header)?;
        self.report.rows_read = sheet.rows.len();
        self.report.dropped_columns = sheet.dropped_columns.clone();
        Ok(sheet)
    }

    fn record_mapping(&mut self, mapping: &ColumnMapping) {
        mapping.log_summary();
        self.report.mapping = mapping.entries().to_vec();
        self.report.missing_fields = mapping.missing().into_iter().map(str::to_string).collect();
    }

    // =========================================================================
    // Live run
    // =========================================================================

    pub async fn load_and_transform(&mut self, pool: &PgPool, sheet: &RawSheet) -> EtlResult<()> {
        let tables = self.config.tables.clone();

        info!(
            "Loading {} rows below header row {} into '{}'...",
            sheet.rows.len(),
            sheet.header.row,
            tables.raw
        );
        {
            let mut conn = pool.acquire().await.map_err(db(Stage::Load))?;
            load_raw_table(&mut conn, &tables.raw, sheet).await?;
        }

        {
            let mut conn = pool.acquire().await.map_err(db(Stage::Clean))?;
            let actual = raw_columns(&mut conn, &tables.raw).await?;
            let mapping = ColumnMapping::build(&self.schema, &actual);
            self.record_mapping(&mapping);
            build_clean_table(&mut conn, &self.schema, &mapping, &tables.raw, &tables.clean).await?;
        }

        {
            let mut conn = pool.acquire().await.map_err(db(Stage::Stoppage))?;
            let summary = process_stoppages(&mut conn, &tables.clean).await?;
            self.report.stoppage = Some(summary);
        }

        {
            let mut conn = pool.acquire().await.map_err(db(Stage::Derived))?;
            let derived = build_derived_tables(&mut conn, &tables.clean).await;
            info!(
                "{} derived tables created, {} failed",
                derived.built.len(),
                derived.failures.len()
            );
            self.report.failures.extend(derived.failures);
            self.report.tables = table_summary(&mut conn, &tables.all_outputs()).await;
        }

        Ok(())
    }

    // =========================================================================
    // Dry run
    // =========================================================================

    pub fn dry_run(&mut self, sheet: &RawSheet) -> DryRunOutcome {
        let mapping = ColumnMapping::build(&self.schema, &sheet.columns);
        self.record_mapping(&mapping);

        let mut summary = StoppageSummary::default();
        let mut clean = Vec::with_capacity(sheet.rows.len());
        let mut stoppages = Vec::with_capacity(sheet.rows.len());
        for row in &sheet.rows {
            let record = project_row(&self.schema, &mapping, sheet, row);
            let slots = records_for(&record);
            summary.accumulate(&slots);
            clean.push(record);
            stoppages.push(slots);
        }

        self.report.stoppage = Some(summary.clone());
        DryRunOutcome {
            clean,
            stoppages,
            summary,
        }
    }
}

/// Run every stage. `options` is `None` in dry-run mode.
pub async fn run(
    ctx: &mut RunContext,
    options: Option<PgConnectOptions>,
    confirm: HeaderConfirm<'_>,
) -> EtlResult<()> {
    let workbook = ctx.discover()?;

    let pool = match options {
        Some(options) => Some(connect(options).await?),
        None => None,
    };

    let sheet = ctx.extract(&workbook, confirm)?;

    match pool {
        Some(pool) => {
            let result = ctx.load_and_transform(&pool, &sheet).await;
            pool.close().await;
            result
        }
        None => {
            ctx.dry_run(&sheet).log();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use clap::Parser;
    use crate::mapping::MatchKind;
    use crate::schema::PROCESSED_TABLE;
    use crate::sql::quote_ident;
    use rust_xlsxwriter::Workbook;
    use std::str::FromStr;

    fn dry_config(excel: &Path, root: &Path) -> Config {
        let args = Args::try_parse_from([
            "temperas-etl",
            "--dry-run",
            "--excel-file",
            excel.to_str().unwrap(),
            "--search-root",
            root.to_str().unwrap(),
        ])
        .unwrap();
        Config::resolve(args, |_, _| unreachable!()).unwrap()
    }

    fn write_production_log(path: &Path) {
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("Base De Datos").unwrap();
        ws.write_string(0, 0, "SEGUIMIENTO TEMPERAS Y VINILOS").unwrap();
        let header = [
            "Fecha",
            "Mes",
            "Maquina",
            "Operario",
            "Pacas",
            "Horas",
            "Turno (8-16)",
            "Codigo_de_paro_1",
            "Codigo_1_en_horas",
        ];
        for (col, label) in header.iter().enumerate() {
            ws.write_string(2, col as u16, *label).unwrap();
        }
        let row = [
            "2024-01-02", "Enero", "M1", "Ana", "40", "8", "8-16", "falla", "15 min",
        ];
        for (col, value) in row.iter().enumerate() {
            ws.write_string(3, col as u16, *value).unwrap();
        }
        ws.write_string(4, 0, "2024-01-03").unwrap();
        ws.write_string(4, 6, "16-24").unwrap();
        ws.write_string(4, 8, "30 min").unwrap();
        ws.write_string(5, 0, "2024-01-04").unwrap();
        ws.write_string(5, 6, "\t22 -\n6").unwrap();
        ws.write_string(5, 7, "\t").unwrap();
        ws.write_string(5, 8, "10").unwrap();
        wb.save(path).unwrap();
    }

    #[test]
    fn test_dry_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SEGUIMIENTO TEMPERAS Y VINILOS Actividad.xlsx");
        write_production_log(&path);

        let mut ctx = RunContext::new(dry_config(&path, dir.path()), Uuid::new_v4());
        let workbook = ctx.discover().unwrap();
        let sheet = ctx.extract(&workbook, &mut |_| false).unwrap();
        assert_eq!(sheet.header.row, 2);
        assert!(sheet.header.found);

        let outcome = ctx.dry_run(&sheet);
        assert_eq!(outcome.clean.len(), 3);

        let first = &outcome.clean[0];
        assert_eq!(first.text("turno_inicio"), Some("8"));
        assert_eq!(first.text("turno_final"), Some("16"));

        let slot1 = &outcome.stoppages[0][0];
        assert_eq!(slot1.code.as_deref(), Some("1"));
        assert_eq!(slot1.minutes, Decimal::from_str("15.00").unwrap());

        // second row has hours but no reason
        let slot1 = &outcome.stoppages[1][0];
        assert_eq!(slot1.code, None);
        assert_eq!(slot1.minutes, Decimal::ZERO);

        // tab-only reason is blank; shift parts lose tabs and newlines
        let slot1 = &outcome.stoppages[2][0];
        assert_eq!(slot1.code, None);
        assert_eq!(slot1.minutes, Decimal::ZERO);
        assert_eq!(outcome.clean[2].text("turno_inicio"), Some("22"));
        assert_eq!(outcome.clean[2].text("turno_final"), Some("6"));

        assert_eq!(outcome.summary.total_rows, 3);
        assert_eq!(outcome.summary.slots[0].occurrences, 1);
        assert_eq!(outcome.summary.total_minutes, Decimal::from_str("15").unwrap());

        let info = ctx.report.workbook.as_ref().unwrap();
        assert!(info.content_hash.starts_with("sha256:"));
        assert_eq!(info.sheet.as_deref(), Some("Base De Datos"));
        assert!(ctx.report.missing_fields.contains(&"pacas_producidas".to_string()));

        let shift = ctx
            .report
            .mapping
            .iter()
            .find(|e| e.logical == "turno")
            .and_then(|e| e.actual.as_ref())
            .unwrap();
        assert_eq!(shift.column, "turno_8_16");
        assert_eq!(shift.kind, MatchKind::Substring);
    }

    #[test]
    fn test_dry_run_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SEGUIMIENTO TEMPERAS Y VINILOS Actividad.xlsx");
        write_production_log(&path);

        let evaluate = || {
            let mut ctx = RunContext::new(dry_config(&path, dir.path()), Uuid::new_v4());
            let sheet = ctx.extract(&path, &mut |_| false).unwrap();
            ctx.dry_run(&sheet)
        };
        let a = evaluate();
        let b = evaluate();
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.clean, b.clean);
    }

    #[test]
    fn test_fallback_header_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otro.xlsx");
        let mut wb = Workbook::new();
        let ws = wb.add_worksheet();
        ws.write_string(0, 0, "columna a").unwrap();
        ws.write_string(0, 1, "columna b").unwrap();
        ws.write_string(1, 0, "x").unwrap();
        ws.write_string(1, 1, "y").unwrap();
        wb.save(&path).unwrap();

        let mut ctx = RunContext::new(dry_config(&path, dir.path()), Uuid::new_v4());
        let err = ctx.extract(&path, &mut |_| false).unwrap_err();
        assert!(matches!(err, EtlError::HeaderNotConfirmed { scanned: 2 }));
        assert_eq!(err.stage(), Stage::Extract);

        let mut asked = 0;
        let sheet = ctx
            .extract(&path, &mut |search| {
                asked += 1;
                search.row == 0 && !search.found
            })
            .unwrap();
        assert_eq!(asked, 1);
        assert_eq!(sheet.columns, vec!["columna_a", "columna_b"]);
    }

    #[tokio::test]
    async fn test_dry_run_through_run_records_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SEGUIMIENTO TEMPERAS Y VINILOS Actividad.xlsx");
        write_production_log(&path);

        let mut ctx = RunContext::new(dry_config(&path, dir.path()), Uuid::new_v4());
        run(&mut ctx, None, &mut |_| false).await.unwrap();
        assert_eq!(ctx.report.rows_read, 3);
        assert_eq!(ctx.report.header.map(|h| h.row), Some(2));
        let summary = ctx.report.stoppage.as_ref().unwrap();
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.total_minutes, Decimal::from_str("15").unwrap());
    }

    #[tokio::test]
    async fn test_run_without_workbook_fails_in_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-existe.xlsx");
        let mut ctx = RunContext::new(dry_config(&missing, dir.path()), Uuid::new_v4());
        let err = run(&mut ctx, None, &mut |_| true).await.unwrap_err();
        assert!(matches!(err, EtlError::WorkbookNotFound { .. }));
        assert_eq!(err.stage().exit_code(), 2);
    }

    type ShiftRow = (Option<String>, Option<String>);
    type SlotRow = (Option<String>, Decimal);

    async fn fetch_live_rows(pool: &PgPool, clean_table: &str) -> (Vec<ShiftRow>, Vec<SlotRow>) {
        let mut conn = pool.acquire().await.unwrap();
        let shifts = sqlx::query_as(&format!(
            "SELECT turno_inicio, turno_final FROM {} ORDER BY fecha",
            quote_ident(clean_table)
        ))
        .fetch_all(&mut *conn)
        .await
        .unwrap();
        let slots = sqlx::query_as(&format!(
            "SELECT codigo_paro_1, minutos_paro_1 FROM {} ORDER BY fecha",
            quote_ident(PROCESSED_TABLE)
        ))
        .fetch_all(&mut *conn)
        .await
        .unwrap();
        (shifts, slots)
    }

    /// Needs a scratch PostgreSQL database in `DATABASE_URL`; returns early
    /// when it is unset. Replaces the fixed-name output tables there.
    #[tokio::test]
    async fn test_live_run_matches_dry_run_and_is_idempotent() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping live run");
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SEGUIMIENTO TEMPERAS Y VINILOS Actividad.xlsx");
        write_production_log(&path);

        let args = Args::try_parse_from([
            "temperas-etl",
            "--db-url",
            url.as_str(),
            "--excel-file",
            path.to_str().unwrap(),
            "--table-suffix",
            "prueba_integracion",
        ])
        .unwrap();
        let config = Config::resolve(args, |_, _| unreachable!()).unwrap();
        let options = config.database.as_ref().unwrap().connect_options().unwrap();
        let pool = connect(options).await.unwrap();

        let mut ctx = RunContext::new(config, Uuid::new_v4());
        let sheet = ctx.extract(&path, &mut |_| false).unwrap();
        let expected = RunContext::new(ctx.config.clone(), Uuid::new_v4()).dry_run(&sheet);
        let clean_table = ctx.config.tables.clean.clone();

        ctx.load_and_transform(&pool, &sheet).await.unwrap();
        let first_counts = ctx.report.tables.clone();
        let first = fetch_live_rows(&pool, &clean_table).await;

        ctx.load_and_transform(&pool, &sheet).await.unwrap();
        let second = fetch_live_rows(&pool, &clean_table).await;
        pool.close().await;

        assert!(ctx.report.failures.is_empty());
        assert_eq!(ctx.report.tables, first_counts);
        assert!(first_counts.iter().all(|t| t.error.is_none()));
        assert_eq!(first, second);

        let (shifts, slots) = first;
        assert_eq!(shifts[0], (Some("8".to_string()), Some("16".to_string())));
        assert_eq!(slots[0], (Some("1".to_string()), Decimal::from_str("15.00").unwrap()));

        let expected_shifts: Vec<ShiftRow> = expected
            .clean
            .iter()
            .map(|r| {
                (
                    r.text("turno_inicio").map(str::to_string),
                    r.text("turno_final").map(str::to_string),
                )
            })
            .collect();
        let expected_slots: Vec<SlotRow> = expected
            .stoppages
            .iter()
            .map(|slots| (slots[0].code.clone(), slots[0].minutes))
            .collect();
        assert_eq!(shifts, expected_shifts);
        assert_eq!(slots, expected_slots);

        let summary = ctx.report.stoppage.as_ref().unwrap();
        assert_eq!(summary.total_rows, expected.summary.total_rows);
        assert_eq!(summary.total_minutes, expected.summary.total_minutes);
    }
}
