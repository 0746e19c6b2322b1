//! Fixed logical schema of the production log and the output table names.
//!
//! The schema is closed: eleven scalar fields, 18 stoppage-code slots with a
//! duration column and a reason column each, and six free-text extras. Field
//! names never change at runtime.

/// Number of numbered stoppage-code slots per production row
pub const STOPPAGE_SLOTS: usize = 18;

pub const SHIFT_FIELD: &str = "turno";
pub const SHIFT_START: &str = "turno_inicio";
pub const SHIFT_END: &str = "turno_final";

pub const PROCESSED_TABLE: &str = "datos_paros_procesados";
pub const MACHINE_TABLE: &str = "produccion_maquina";
pub const OPERATOR_TABLE: &str = "produccion_operario";
pub const ANALYSIS_TABLE: &str = "analisis_paros";
pub const TOTAL_MINUTES_COLUMN: &str = "total_minutos_paro";

/// Placeholder tables replicated from the clean table structure
pub const CLEAN_PLACEHOLDERS: [&str; 3] = ["produccion_01", "produccion_03", "produccion_05"];
/// Placeholder tables replicated from the processed table structure
pub const PROCESSED_PLACEHOLDERS: [&str; 1] = ["porcentaje_codigo_paro"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Scalar,
    /// Raw duration text of a stoppage slot (`codigo_<n>_en_horas`)
    StoppageHours(usize),
    /// Raw reason marker of a stoppage slot (`codigo_de_paro_<n>`)
    StoppageReason(usize),
    Extra,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalField {
    pub name: String,
    pub kind: FieldKind,
    pub role: FieldRole,
}

const SCALAR_FIELDS: [(&str, FieldKind); 11] = [
    ("fecha", FieldKind::Text),
    ("mes", FieldKind::Text),
    ("año", FieldKind::Text),
    ("maquina", FieldKind::Text),
    ("operario", FieldKind::Text),
    ("referencia", FieldKind::Text),
    ("pacas_producidas", FieldKind::Numeric),
    ("horas_trabajadas", FieldKind::Numeric),
    ("horas_no_trabajadas", FieldKind::Numeric),
    ("tiempo_de_paro", FieldKind::Numeric),
    (SHIFT_FIELD, FieldKind::Text),
];

pub const EXTRA_FIELDS: [&str; 6] = [
    "sub_codigo_de_paro_1",
    "subcodigo_3",
    "subcodigo_5",
    "area_involucrada_en_subcodigo_5",
    "personal_involucrado",
    "observaciones",
];

/// Scalar columns carried from the clean table into the processed table
pub const PROCESSED_BASE_COLUMNS: [&str; 12] = [
    "fecha",
    "mes",
    "año",
    "maquina",
    "operario",
    "referencia",
    "pacas_producidas",
    "horas_trabajadas",
    "horas_no_trabajadas",
    "tiempo_de_paro",
    SHIFT_START,
    SHIFT_END,
];

pub fn hours_field(slot: usize) -> String {
    format!("codigo_{slot}_en_horas")
}

pub fn reason_field(slot: usize) -> String {
    format!("codigo_de_paro_{slot}")
}

/// Derived code indicator column (`'n'` when slot n occurred, else NULL)
pub fn code_column(slot: usize) -> String {
    format!("codigo_paro_{slot}")
}

/// Derived stoppage minutes column
pub fn minutes_column(slot: usize) -> String {
    format!("minutos_paro_{slot}")
}

/// Ordered logical field list the business tables are defined against
#[derive(Debug, Clone)]
pub struct LogicalSchema {
    fields: Vec<LogicalField>,
}

impl LogicalSchema {
    /// The "Temperas y Vinilos" production log layout
    pub fn temperas_vinilos() -> Self {
        let mut fields = Vec::with_capacity(SCALAR_FIELDS.len() + 2 * STOPPAGE_SLOTS + EXTRA_FIELDS.len());

        for (name, kind) in SCALAR_FIELDS {
            fields.push(LogicalField {
                name: name.to_string(),
                kind,
                role: FieldRole::Scalar,
            });
        }

        for slot in 1..=STOPPAGE_SLOTS {
            fields.push(LogicalField {
                name: hours_field(slot),
                kind: FieldKind::Text,
                role: FieldRole::StoppageHours(slot),
            });
            fields.push(LogicalField {
                name: reason_field(slot),
                kind: FieldKind::Text,
                role: FieldRole::StoppageReason(slot),
            });
        }

        for name in EXTRA_FIELDS {
            fields.push(LogicalField {
                name: name.to_string(),
                kind: FieldKind::Text,
                role: FieldRole::Extra,
            });
        }

        Self { fields }
    }

    pub fn fields(&self) -> &[LogicalField] {
        &self.fields
    }

    pub fn scalars(&self) -> impl Iterator<Item = &LogicalField> {
        self.fields.iter().filter(|f| f.role == FieldRole::Scalar)
    }

    pub fn extras(&self) -> impl Iterator<Item = &LogicalField> {
        self.fields.iter().filter(|f| f.role == FieldRole::Extra)
    }
}

/// Names of the per-run raw and clean tables (`datos_crudos_<suffix>`, `datos_limpios_<suffix>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub raw: String,
    pub clean: String,
}

impl TableNames {
    pub fn with_suffix(suffix: &str) -> Self {
        Self {
            raw: format!("datos_crudos_{suffix}"),
            clean: format!("datos_limpios_{suffix}"),
        }
    }

    /// Every table a full run leaves behind, in creation order
    pub fn all_outputs(&self) -> Vec<String> {
        let mut tables = vec![
            self.raw.clone(),
            self.clean.clone(),
            PROCESSED_TABLE.to_string(),
            MACHINE_TABLE.to_string(),
            OPERATOR_TABLE.to_string(),
            ANALYSIS_TABLE.to_string(),
        ];
        tables.extend(CLEAN_PLACEHOLDERS.iter().map(|t| t.to_string()));
        tables.extend(PROCESSED_PLACEHOLDERS.iter().map(|t| t.to_string()));
        tables
    }
}
