//! Error taxonomy for the ETL run.
//!
//! Every fatal failure belongs to exactly one pipeline [`Stage`], and each
//! stage has its own process exit code so that callers can tell where a run
//! stopped without parsing log output.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Connect,
    Extract,
    Load,
    Clean,
    Stoppage,
    Derived,
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Connect => "connect",
            Stage::Extract => "extract",
            Stage::Load => "load",
            Stage::Clean => "clean",
            Stage::Stoppage => "stoppage",
            Stage::Derived => "derived",
            Stage::Report => "report",
        }
    }

    /// Process exit code used when the run aborts in this stage (0 is success, 1 is bad usage)
    pub fn exit_code(self) -> u8 {
        match self {
            Stage::Discovery => 2,
            Stage::Connect => 3,
            Stage::Extract => 4,
            Stage::Load => 5,
            Stage::Clean => 6,
            Stage::Stoppage => 7,
            Stage::Derived => 8,
            Stage::Report => 9,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type EtlResult<T> = Result<T, EtlError>;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("no Excel workbook found under {root}")]
    WorkbookNotFound { root: PathBuf },

    #[error("workbook {path} has no sheets")]
    NoSheets { path: PathBuf },

    #[error("failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("no header row matched in the first {scanned} rows and the row 0 fallback was not confirmed")]
    HeaderNotConfirmed { scanned: usize },

    #[error("sheet '{sheet}' has no data rows below the header")]
    EmptySheet { sheet: String },

    #[error("raw table '{table}' does not exist or has no columns")]
    RawTableMissing { table: String },

    #[error("database error during {stage}: {source}")]
    Database {
        stage: Stage,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot serialize run report: {0}")]
    ReportSerialize(#[from] serde_json::Error),

    #[error("cannot write run report to {path}: {source}")]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EtlError {
    pub fn stage(&self) -> Stage {
        match self {
            EtlError::WorkbookNotFound { .. } | EtlError::NoSheets { .. } => Stage::Discovery,
            EtlError::Workbook(_)
            | EtlError::Io(_)
            | EtlError::HeaderNotConfirmed { .. }
            | EtlError::EmptySheet { .. } => Stage::Extract,
            EtlError::Connect(_) => Stage::Connect,
            EtlError::RawTableMissing { .. } => Stage::Clean,
            EtlError::Database { stage, .. } => *stage,
            EtlError::ReportSerialize(_) | EtlError::ReportWrite { .. } => Stage::Report,
        }
    }
}

/// Adapter for `map_err` on sqlx calls made inside a stage
pub fn db(stage: Stage) -> impl FnOnce(sqlx::Error) -> EtlError {
    move |source| EtlError::Database { stage, source }
}
