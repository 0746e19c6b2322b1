//! Workbook and sheet discovery.

use crate::error::{EtlError, EtlResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Search patterns for the production workbook, most specific first
pub const WORKBOOK_PATTERNS: [&str; 5] = [
    "**/SEGUIMIENTO TEMPERAS Y VINILOS Actividad.xlsm",
    "**/SEGUIMIENTO TEMPERAS Y VINILOS Actividad.xlsx",
    "**/SEGUIMIENTO TEMPERAS*.xls*",
    "**/*TEMPERAS*.xls*",
    "**/*VINILOS*.xls*",
];

/// Marker (lower-case) of the sheet holding the production rows
pub const TARGET_SHEET_MARKER: &str = "base de datos";

/// Resolve the workbook to read.
///
/// An explicit path that exists is used as-is. Otherwise each pattern is
/// globbed under `root` in order and the first match (sorted) is returned.
pub fn find_workbook(explicit: Option<&Path>, root: &Path, patterns: &[&str]) -> EtlResult<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            info!("Using workbook: {}", path.display());
            return Ok(path.to_path_buf());
        }
        warn!("Workbook {} not found, searching under {}", path.display(), root.display());
    }

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    for pattern in patterns {
        let full = format!("{}/{}", escaped_root.trim_end_matches('/'), pattern);
        let entries = match glob::glob(&full) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping invalid search pattern '{}': {}", pattern, e);
                continue;
            }
        };

        let mut matches: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter(|p| !is_lock_file(p))
            .collect();
        matches.sort();

        if let Some(found) = matches.into_iter().next() {
            info!("Workbook found: {}", found.display());
            return Ok(found);
        }
    }

    Err(EtlError::WorkbookNotFound {
        root: root.to_path_buf(),
    })
}

/// Office leaves `~$name.xlsx` lock files next to open workbooks
fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with("~$"))
        .unwrap_or(false)
}

/// Pick the sheet whose name contains "base de datos", else the first one
pub fn select_sheet(names: &[String]) -> Option<&str> {
    if let Some(name) = names
        .iter()
        .find(|n| n.to_lowercase().contains(TARGET_SHEET_MARKER))
    {
        info!("Sheet found: {}", name);
        return Some(name.as_str());
    }

    let first = names.first()?;
    warn!("No '{}' sheet, using first sheet: {}", TARGET_SHEET_MARKER, first);
    Some(first.as_str())
}
