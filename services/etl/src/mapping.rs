//! Logical-to-actual column mapping.
//!
//! Each logical field is resolved against the actual (normalized,
//! deduplicated) column names: an exact name match wins, otherwise the first
//! actual column, in sheet order, that contains the logical name. A field that
//! resolves to nothing is absent and later projected as a default.

use crate::normalize::normalize_column_name;
use crate::schema::LogicalSchema;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Substring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMatch {
    pub column: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub logical: String,
    pub actual: Option<ColumnMatch>,
}

/// One entry per logical field, in schema order. Built once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    entries: Vec<MappingEntry>,
}

/// Resolve one logical name against the actual columns.
///
/// Exact match first; otherwise the first column whose lower-cased name
/// contains the lower-cased logical name. The substring fallback can still
/// pick e.g. `codigo_de_paro_10` for `codigo_de_paro_1` when the exact column
/// is missing from the sheet.
pub fn find_column(logical: &str, actual: &[String]) -> Option<ColumnMatch> {
    let wanted = normalize_column_name(Some(logical)).to_lowercase();

    if let Some(col) = actual.iter().find(|c| c.to_lowercase() == wanted) {
        return Some(ColumnMatch {
            column: col.clone(),
            kind: MatchKind::Exact,
        });
    }

    actual
        .iter()
        .find(|c| c.to_lowercase().contains(&wanted))
        .map(|col| ColumnMatch {
            column: col.clone(),
            kind: MatchKind::Substring,
        })
}

impl ColumnMapping {
    pub fn build(schema: &LogicalSchema, actual: &[String]) -> Self {
        let entries = schema
            .fields()
            .iter()
            .map(|field| MappingEntry {
                logical: field.name.clone(),
                actual: find_column(&field.name, actual),
            })
            .collect();
        Self { entries }
    }

    /// Actual column for a logical field, or `None` when absent
    pub fn resolve(&self, logical: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.logical == logical)
            .and_then(|e| e.actual.as_ref())
            .map(|m| m.column.as_str())
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn found_count(&self) -> usize {
        self.entries.iter().filter(|e| e.actual.is_some()).count()
    }

    pub fn missing(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.actual.is_none())
            .map(|e| e.logical.as_str())
            .collect()
    }

    pub fn log_summary(&self) {
        info!("Column mapping:");
        for entry in &self.entries {
            match &entry.actual {
                Some(m) if m.kind == MatchKind::Exact => {
                    info!("  {:<34} -> {}", entry.logical, m.column)
                }
                Some(m) => info!("  {:<34} -> {} (substring)", entry.logical, m.column),
                None => warn!("  {:<34} -> not found, using default", entry.logical),
            }
        }
        info!(
            "Mapping summary: {}/{} columns found",
            self.found_count(),
            self.entries.len()
        );
    }
}
