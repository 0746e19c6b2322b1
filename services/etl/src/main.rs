//! Temperas y Vinilos ETL - production log workbook to PostgreSQL
//!
//! Responsibilities:
//! - Find the production workbook and its "Base De Datos" sheet
//! - Locate the header row, normalize and map columns onto the fixed schema
//! - Load the raw sheet, then build the clean, stoppage and business tables
//! - Report per-stage failures through distinct exit codes
//!
//! Every output table is replaced on each run, so re-running against the
//! same workbook yields the same tables.

mod clean;
mod config;
mod db;
mod derived;
mod discovery;
mod error;
mod extract;
mod header;
mod load;
mod logging;
mod mapping;
mod normalize;
mod pipeline;
mod report;
mod schema;
mod sql;
mod stoppage;

use anyhow::Result;
use clap::Parser;
use config::{is_affirmative, terminal_prompt, Args, Config};
use header::HeaderSearch;
use pipeline::RunContext;
use std::process::ExitCode;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Exit code for bad usage or configuration
const EXIT_USAGE: u8 = 1;

fn confirm_fallback_header(search: &HeaderSearch) -> bool {
    let label = format!(
        "No header row found in the first {} rows. Use row 0 as header? [s/N]: ",
        search.scanned
    );
    terminal_prompt(&label, false)
        .map(|answer| is_affirmative(&answer))
        .unwrap_or(false)
}

async fn run_cli(args: Args) -> Result<ExitCode> {
    let config = Config::resolve(args, terminal_prompt)?;
    logging::init(config.log_file.as_deref())?;

    let options = match &config.database {
        Some(target) => Some(target.connect_options()?),
        None => None,
    };

    let run_id = Uuid::new_v4();
    println!("=== Temperas y Vinilos ETL ===");
    println!("Run ID: {}", run_id);
    println!("Mode: {}", if config.dry_run { "dry-run" } else { "live" });
    if let Some(target) = &config.database {
        println!("Database: {}", target.describe());
    }
    println!("Tables: {}, {}", config.tables.raw, config.tables.clean);

    let accept_fallback = config.accept_fallback_header;
    let report_path = config.report.clone();
    let mut ctx = RunContext::new(config, run_id);
    let mut confirm = |search: &HeaderSearch| accept_fallback || confirm_fallback_header(search);

    let mut result = pipeline::run(&mut ctx, options, &mut confirm)
        .instrument(info_span!("etl_run", %run_id))
        .await;

    match &result {
        Ok(()) => ctx.report.succeed(),
        Err(e) => ctx.report.fail(e),
    }

    if let Some(path) = report_path {
        match ctx.report.write(&path) {
            Ok(()) => info!("Run report written to {}", path.display()),
            Err(e) if result.is_ok() => result = Err(e),
            Err(e) => error!("{}", e),
        }
    }

    match result {
        Ok(()) => {
            if !ctx.report.failures.is_empty() {
                for failure in &ctx.report.failures {
                    error!("Table '{}' was not created: {}", failure.table, failure.error);
                }
            }
            println!("\n=== ETL Complete ===");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let stage = e.stage();
            error!("{}", e);
            println!("\n=== ETL FAILED (stage: {}) ===", stage);
            Ok(ExitCode::from(stage.exit_code()))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    match run_cli(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}
