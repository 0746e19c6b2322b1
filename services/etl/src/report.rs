//! JSON run report.
//!
//! One document per run: where the data came from, how it was mapped, what
//! was built, and how the run ended.

use crate::derived::{TableCount, TableFailure};
use crate::error::{EtlError, EtlResult, Stage};
use crate::header::HeaderSearch;
use crate::mapping::MappingEntry;
use crate::stoppage::StoppageSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkbookInfo {
    pub path: PathBuf,
    pub content_hash: String,
    pub sheet: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: &'static str,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub workbook: Option<WorkbookInfo>,
    pub header: Option<HeaderSearch>,
    pub rows_read: usize,
    pub dropped_columns: Vec<String>,
    pub mapping: Vec<MappingEntry>,
    pub missing_fields: Vec<String>,
    pub stoppage: Option<StoppageSummary>,
    pub tables: Vec<TableCount>,
    pub failures: Vec<TableFailure>,
    pub status: RunStatus,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(run_id: Uuid, dry_run: bool) -> Self {
        Self {
            run_id,
            mode: if dry_run { "dry-run" } else { "live" },
            started_at: Utc::now(),
            finished_at: None,
            workbook: None,
            header: None,
            rows_read: 0,
            dropped_columns: Vec::new(),
            mapping: Vec::new(),
            missing_fields: Vec::new(),
            stoppage: None,
            tables: Vec::new(),
            failures: Vec::new(),
            status: RunStatus::Running,
            failed_stage: None,
            error: None,
        }
    }

    pub fn succeed(&mut self) {
        self.status = RunStatus::Success;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, err: &EtlError) {
        self.status = RunStatus::Failed;
        self.failed_stage = Some(err.stage());
        self.error = Some(err.to_string());
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> EtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write(&self, path: &Path) -> EtlResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| EtlError::ReportWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `sha256:<hex>` of the file contents
pub fn file_hash(path: &Path) -> EtlResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}
