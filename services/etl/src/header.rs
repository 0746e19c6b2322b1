//! Header row detection.
//!
//! The production log carries title rows and notes above the real column
//! headers, at no fixed offset. The header is the first row whose joined text
//! contains at least three of the known keywords.

use serde::Serialize;

/// Substrings that identify a header row of the production log
pub const HEADER_KEYWORDS: [&str; 12] = [
    "fecha",
    "mes",
    "año",
    "maquina",
    "operario",
    "referencia",
    "unidad",
    "display",
    "paca",
    "horas",
    "turno",
    "paro",
];

pub const MIN_KEYWORD_MATCHES: usize = 3;

/// Rows read from the top of the sheet when looking for the header
pub const HEADER_SCAN_ROWS: usize = 10;

/// Outcome of a header search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderSearch {
    /// 0-based row index of the header (0 when nothing qualified)
    pub row: usize,
    /// Keyword matches of the chosen row
    pub matches: usize,
    /// False when no row qualified and `row` is the fail-open fallback
    pub found: bool,
    /// Number of rows examined
    pub scanned: usize,
}

/// Count how many header keywords appear in the row's joined, lower-cased text
pub fn keyword_matches(cells: &[Option<String>]) -> usize {
    let joined = cells
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    HEADER_KEYWORDS
        .iter()
        .filter(|keyword| joined.contains(*keyword))
        .count()
}

/// Find the header row among `rows`, scanning top-down.
///
/// The first row with at least [`MIN_KEYWORD_MATCHES`] wins, even if a later
/// row scores higher. Falls back to row 0 when no row qualifies.
pub fn locate_header_row(rows: &[Vec<Option<String>>]) -> HeaderSearch {
    let scanned = rows.len();
    for (idx, row) in rows.iter().enumerate() {
        let matches = keyword_matches(row);
        if matches >= MIN_KEYWORD_MATCHES {
            return HeaderSearch {
                row: idx,
                matches,
                found: true,
                scanned,
            };
        }
    }

    HeaderSearch {
        row: 0,
        matches: rows.first().map(|r| keyword_matches(r)).unwrap_or(0),
        found: false,
        scanned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<Option<String>> {
        cells
            .iter()
            .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
            .collect()
    }

    #[test]
    fn test_keyword_matches_counts_distinct_keywords() {
        assert_eq!(keyword_matches(&row(&["Fecha", "Mes", "Maquina"])), 3);
        assert_eq!(keyword_matches(&row(&["SEGUIMIENTO TEMPERAS Y VINILOS"])), 0);
        // "Horas" also contains no other keyword; "Codigo de paro" adds "paro"
        assert_eq!(keyword_matches(&row(&["Horas", "", "Codigo de paro 1"])), 2);
    }

    #[test]
    fn test_keyword_matches_ignores_empty_cells() {
        assert_eq!(keyword_matches(&row(&["", "", ""])), 0);
        assert_eq!(keyword_matches(&[]), 0);
    }

    #[test]
    fn test_locate_header_row_found() {
        let rows = vec![
            row(&["SEGUIMIENTO TEMPERAS Y VINILOS"]),
            row(&["", "", ""]),
            row(&["Fecha", "Mes", "Maquina", "Operario", "Pacas"]),
            row(&["2024-01-02", "Enero", "M1", "Ana", "40"]),
        ];
        let search = locate_header_row(&rows);
        assert_eq!(search.row, 2);
        assert!(search.found);
        assert_eq!(search.matches, 5);
        assert_eq!(search.scanned, 4);
    }

    #[test]
    fn test_locate_header_row_first_qualifying_wins() {
        let rows = vec![
            row(&["Fecha", "Mes", "Turno"]),
            row(&["Fecha", "Mes", "Año", "Maquina", "Operario", "Referencia", "Turno"]),
        ];
        let search = locate_header_row(&rows);
        assert_eq!(search.row, 0);
        assert_eq!(search.matches, 3);
    }

    #[test]
    fn test_locate_header_row_fallback_is_zero() {
        let rows = vec![
            row(&["Reporte"]),
            row(&["Fecha", "Mes"]),
            row(&["1", "2", "3"]),
        ];
        let search = locate_header_row(&rows);
        assert_eq!(search.row, 0);
        assert!(!search.found);

        let empty: Vec<Vec<Option<String>>> = Vec::new();
        let search = locate_header_row(&empty);
        assert_eq!(search.row, 0);
        assert!(!search.found);
        assert_eq!(search.matches, 0);
    }

    #[test]
    fn test_two_matches_do_not_qualify() {
        let rows = vec![row(&["Fecha", "Maquina"]), row(&["x", "y"])];
        assert!(!locate_header_row(&rows).found);
    }
}
