//! SQL text generation shared by the table builders.
//!
//! Identifiers are always double-quoted. Literals embedded in generated DDL
//! are compile-time constants of this module (patterns, separators, slot
//! numbers); cell data only ever reaches the database as bound parameters.
//!
//! The numeric extraction rule lives here twice: once as SQL
//! ([`numeric_extract`]) and once in Rust ([`numeric_value`]) for the
//! in-memory dry run. Both must agree. The same holds for blank trimming
//! ([`trim_blank_sql`] and [`trim_blank`]).

use crate::mapping::ColumnMapping;
use crate::schema::FieldKind;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use std::sync::LazyLock;

/// Shape a stripped numeric remainder must have to be cast.
///
/// At most 8 integer digits so the value fits `NUMERIC(10,2)`.
pub const DECIMAL_PATTERN: &str = r"^([0-9]{1,8}(\.[0-9]*)?|\.[0-9]+)$";

/// Values at or above this bound round past `NUMERIC(10,2)` and default to 0
const DECIMAL_CEILING: &str = "99999999.995";

static DECIMAL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DECIMAL_PATTERN).expect("valid regex"));

/// Padding stripped from text cells before they are compared or split
pub const BLANK_CHARS: [char; 4] = [' ', '\t', '\r', '\n'];

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `btrim` over [`BLANK_CHARS`]; a bare `btrim(x)` only strips spaces
pub fn trim_blank_sql(text_sql: &str) -> String {
    format!("btrim({text_sql}, E' \\t\\r\\n')")
}

/// In-memory counterpart of [`trim_blank_sql`]
pub fn trim_blank(text: &str) -> &str {
    text.trim_matches(&BLANK_CHARS[..])
}

/// Strip every character outside `[0-9.]` from `column_sql` and cast to
/// `NUMERIC(10,2)`; anything that cannot be cast yields 0, never an error.
pub fn numeric_extract(column_sql: &str) -> String {
    let stripped = format!("regexp_replace(CAST({column_sql} AS TEXT), '[^0-9.]', '', 'g')");
    format!(
        "CASE WHEN {stripped} ~ '{DECIMAL_PATTERN}' THEN \
         CASE WHEN CAST({stripped} AS NUMERIC) < {DECIMAL_CEILING} \
         THEN CAST({stripped} AS NUMERIC(10,2)) ELSE 0 END \
         ELSE 0 END"
    )
}

/// In-memory counterpart of [`numeric_extract`]
pub fn numeric_value(text: Option<&str>) -> Decimal {
    let Some(text) = text else {
        return Decimal::ZERO;
    };

    let stripped: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if !DECIMAL_SHAPE.is_match(&stripped) {
        return Decimal::ZERO;
    }

    let canonical = match (stripped.starts_with('.'), stripped.ends_with('.')) {
        (true, _) => format!("0{stripped}"),
        (false, true) => stripped.trim_end_matches('.').to_string(),
        (false, false) => stripped,
    };

    let Ok(value) = Decimal::from_str(&canonical) else {
        return Decimal::ZERO;
    };
    let ceiling = Decimal::from_str(DECIMAL_CEILING).unwrap_or(Decimal::MAX);
    if value >= ceiling {
        return Decimal::ZERO;
    }
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One projected column of a generated SELECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpr {
    pub sql: String,
    pub alias: String,
}

impl ColumnExpr {
    pub fn new(sql: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            alias: alias.into(),
        }
    }

    /// Plain reference to an existing column under the same name
    pub fn passthrough(column: &str) -> Self {
        Self::new(quote_ident(column), column)
    }

    pub fn render(&self) -> String {
        format!("{} AS {}", self.sql, quote_ident(&self.alias))
    }
}

/// Expression projecting one logical field out of the raw table.
///
/// - mapped + numeric: numeric extraction of the actual column
/// - mapped + text: direct reference
/// - absent + numeric: `0`
/// - absent + text: `NULL`
pub fn column_expression(logical: &str, mapping: &ColumnMapping, kind: FieldKind) -> ColumnExpr {
    let sql = match (mapping.resolve(logical), kind) {
        (Some(actual), FieldKind::Numeric) => numeric_extract(&quote_ident(actual)),
        (Some(actual), FieldKind::Text) => quote_ident(actual),
        (None, FieldKind::Numeric) => "0".to_string(),
        (None, FieldKind::Text) => "NULL".to_string(),
    };
    ColumnExpr::new(sql, logical)
}

pub fn select_list(columns: &[ColumnExpr]) -> String {
    columns
        .iter()
        .map(ColumnExpr::render)
        .collect::<Vec<_>>()
        .join(",\n    ")
}

pub fn select_from(columns: &[ColumnExpr], table: &str) -> String {
    format!("SELECT\n    {}\nFROM {}", select_list(columns), quote_ident(table))
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn create_table_as_sql(table: &str, select_sql: &str) -> String {
    format!("CREATE TABLE {} AS\n{}", quote_ident(table), select_sql)
}

pub fn count_rows_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogicalSchema;

    fn mapping_for(actual: &[&str]) -> ColumnMapping {
        let actual: Vec<String> = actual.iter().map(|s| s.to_string()).collect();
        ColumnMapping::build(&LogicalSchema::temperas_vinilos(), &actual)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_trim_blank_charset() {
        assert_eq!(trim_blank(" \t8\r\n"), "8");
        assert_eq!(trim_blank("\t\n"), "");
        assert_eq!(trim_blank("\u{a0}x\u{a0}"), "\u{a0}x\u{a0}");
        assert_eq!(trim_blank_sql("\"c\""), "btrim(\"c\", E' \\t\\r\\n')");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("año"), "\"año\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_absent_numeric_is_zero() {
        let mapping = mapping_for(&["fecha"]);
        let expr = column_expression("pacas_producidas", &mapping, FieldKind::Numeric);
        assert_eq!(expr.sql, "0");
        assert_eq!(expr.alias, "pacas_producidas");
    }

    #[test]
    fn test_absent_text_is_null() {
        let mapping = mapping_for(&["fecha"]);
        let expr = column_expression("observaciones", &mapping, FieldKind::Text);
        assert_eq!(expr.sql, "NULL");
    }

    #[test]
    fn test_mapped_text_is_direct_reference() {
        let mapping = mapping_for(&["fecha", "nombre_maquina"]);
        let expr = column_expression("maquina", &mapping, FieldKind::Text);
        assert_eq!(expr.sql, "\"nombre_maquina\"");
        assert_eq!(expr.render(), "\"nombre_maquina\" AS \"maquina\"");
    }

    #[test]
    fn test_mapped_numeric_strips_and_casts() {
        let mapping = mapping_for(&["pacas"]);
        // "pacas" does not contain "pacas_producidas": absent
        assert_eq!(column_expression("pacas_producidas", &mapping, FieldKind::Numeric).sql, "0");

        let mapping = mapping_for(&["pacas_producidas"]);
        let expr = column_expression("pacas_producidas", &mapping, FieldKind::Numeric);
        assert!(expr.sql.contains("regexp_replace(CAST(\"pacas_producidas\" AS TEXT), '[^0-9.]', '', 'g')"));
        assert!(expr.sql.contains("AS NUMERIC(10,2)"));
        assert!(expr.sql.ends_with("ELSE 0 END"));
    }

    #[test]
    fn test_numeric_value_extracts_digits() {
        assert_eq!(numeric_value(Some("20 mnts")), dec("20.00"));
        assert_eq!(numeric_value(Some("15 min")), dec("15"));
        assert_eq!(numeric_value(Some("1.5 h")), dec("1.5"));
        assert_eq!(numeric_value(Some("Total: 1.256")), dec("1.26"));
        assert_eq!(numeric_value(Some("1.255")), dec("1.26"));
    }

    #[test]
    fn test_numeric_value_defaults_to_zero() {
        assert_eq!(numeric_value(None), Decimal::ZERO);
        assert_eq!(numeric_value(Some("")), Decimal::ZERO);
        assert_eq!(numeric_value(Some("sin dato")), Decimal::ZERO);
        assert_eq!(numeric_value(Some(".")), Decimal::ZERO);
        assert_eq!(numeric_value(Some("1.2.3")), Decimal::ZERO);
        assert_eq!(numeric_value(Some("123456789")), Decimal::ZERO);
        assert_eq!(numeric_value(Some("99999999.999")), Decimal::ZERO);
    }

    #[test]
    fn test_numeric_value_edge_shapes() {
        assert_eq!(numeric_value(Some(".5")), dec("0.5"));
        assert_eq!(numeric_value(Some("20.")), dec("20"));
        assert_eq!(numeric_value(Some("99999999.99")), dec("99999999.99"));
    }

    #[test]
    fn test_table_statements() {
        assert_eq!(drop_table_sql("produccion_01"), "DROP TABLE IF EXISTS \"produccion_01\"");
        assert_eq!(
            create_table_as_sql("t", "SELECT 1"),
            "CREATE TABLE \"t\" AS\nSELECT 1"
        );
        assert_eq!(count_rows_sql("t"), "SELECT COUNT(*) FROM \"t\"");
    }

    #[test]
    fn test_select_from() {
        let cols = vec![ColumnExpr::passthrough("fecha"), ColumnExpr::new("0", "pacas")];
        assert_eq!(
            select_from(&cols, "datos"),
            "SELECT\n    \"fecha\" AS \"fecha\",\n    0 AS \"pacas\"\nFROM \"datos\""
        );
    }
}
