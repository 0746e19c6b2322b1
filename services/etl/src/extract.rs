//! Workbook extraction.
//!
//! Responsibilities:
//! - Open the workbook (calamine auto-detects xls, xlsx, xlsm, ods)
//! - Select the production sheet and read it as an untyped text grid
//! - Cut the grid at the detected header row into named columns and rows
//!
//! Cells are rendered to text exactly once, here; everything downstream
//! (raw table load, dry run) works on `Option<String>` cells.

use crate::discovery::select_sheet;
use crate::error::{EtlError, EtlResult};
use crate::header::HeaderSearch;
use crate::normalize::{dedup_first_occurrence, normalize_header};
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use tracing::{debug, info, warn};

pub type RawRow = Vec<Option<String>>;

/// Untyped contents of the selected sheet, row 0 being the sheet's first row
#[derive(Debug, Clone)]
pub struct SheetGrid {
    pub sheet_name: String,
    pub rows: Vec<RawRow>,
}

/// The sheet cut at its header row: normalized, deduplicated column names
/// and the data rows projected onto them
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub sheet_name: String,
    pub header: HeaderSearch,
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Normalized names dropped as later duplicates
    pub dropped_columns: Vec<String>,
}

impl RawSheet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Render one cell as text; `None` for empty and error cells
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(format_float(*f)),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => {
            if dt.is_duration() || dt.as_f64() < 1.0 {
                // time-of-day or duration cell: keep only the clock part
                dt.as_datetime().map(|d| d.format("%H:%M:%S").to_string())
            } else {
                dt.as_datetime().map(|d| {
                    if d.time() == chrono::NaiveTime::MIN {
                        d.format("%Y-%m-%d").to_string()
                    } else {
                        d.format("%Y-%m-%d %H:%M:%S").to_string()
                    }
                })
            }
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        (f as i64).to_string()
    } else {
        f.to_string()
    }
}

/// Open the workbook and read the production sheet as a text grid.
///
/// Leading blank rows outside the sheet's used range are kept as empty rows
/// so that row indexes match the sheet's own numbering.
pub fn read_sheet_grid(path: &Path) -> EtlResult<SheetGrid> {
    info!("Reading workbook: {}", path.display());
    let mut workbook = open_workbook_auto(path)?;

    let sheet_names = workbook.sheet_names().to_vec();
    info!("Available sheets:");
    for (i, name) in sheet_names.iter().enumerate() {
        info!("  {}. {}", i + 1, name);
    }

    let sheet_name = select_sheet(&sheet_names)
        .ok_or_else(|| EtlError::NoSheets {
            path: path.to_path_buf(),
        })?
        .to_string();

    let range = workbook.worksheet_range(&sheet_name)?;
    let offset = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    let (height, width) = range.get_size();
    debug!("Sheet '{}' used range: {} rows x {} columns from row {}", sheet_name, height, width, offset);

    let mut rows: Vec<RawRow> = vec![Vec::new(); offset];
    rows.extend(range.rows().map(|row| row.iter().map(cell_text).collect::<RawRow>()));

    Ok(SheetGrid { sheet_name, rows })
}

/// Cut the grid at `header.row`, normalize and dedup the labels, and project
/// every non-blank data row onto the kept columns
pub fn build_raw_sheet(grid: SheetGrid, header: HeaderSearch) -> EtlResult<RawSheet> {
    let SheetGrid { sheet_name, rows } = grid;
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut labels: RawRow = rows.get(header.row).cloned().unwrap_or_default();
    labels.resize(width, None);

    let normalized = normalize_header(&labels);
    let kept = dedup_first_occurrence(&normalized);

    let dropped_columns: Vec<String> = normalized
        .iter()
        .enumerate()
        .filter(|(idx, _)| !kept.iter().any(|(k, _)| k == idx))
        .map(|(_, name)| name.clone())
        .collect();
    if !dropped_columns.is_empty() {
        warn!("Dropping {} duplicate columns: {:?}", dropped_columns.len(), dropped_columns);
    }

    let data_rows: Vec<RawRow> = rows
        .into_iter()
        .skip(header.row + 1)
        .map(|row| {
            kept.iter()
                .map(|(idx, _)| row.get(*idx).cloned().flatten())
                .collect::<RawRow>()
        })
        .filter(|row| row.iter().any(Option::is_some))
        .collect();

    if data_rows.is_empty() || kept.is_empty() {
        return Err(EtlError::EmptySheet { sheet: sheet_name });
    }

    let columns: Vec<String> = kept.into_iter().map(|(_, name)| name).collect();
    info!("Rows read: {} rows x {} columns", data_rows.len(), columns.len());
    info!("Detected columns:");
    for (i, col) in columns.iter().enumerate() {
        info!("  {:2}. {}", i + 1, col);
    }

    Ok(RawSheet {
        sheet_name,
        header,
        columns,
        rows: data_rows,
        dropped_columns,
    })
}
