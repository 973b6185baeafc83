//! Display-name → storage-column mapping and type coercion for fact rows.
//!
//! Each fact table has a fixed layout: the storage columns in canonical order,
//! their types, whether they belong to the composite business key, and the
//! display headers uploads may use for them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::error::RejectionReason;
use crate::schema::{BatchRow, CellValue, FactKind, Record, ReferenceKind, UploadBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Date,
}

impl ColumnType {
    fn expected(self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Float => "number",
            Self::Text => "text",
            Self::Date => "date (YYYY-MM-DD)",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    /// Set for foreign keys filled by name resolution.
    pub reference: Option<ReferenceKind>,
    /// Part of the composite business key.
    pub key: bool,
    pub required: bool,
    /// Display headers accepted for this column besides `name` itself.
    pub aliases: &'static [&'static str],
}

pub(crate) const fn reference(
    name: &'static str,
    kind: ReferenceKind,
    key: bool,
    required: bool,
    aliases: &'static [&'static str],
) -> ColumnSpec {
    ColumnSpec {
        name,
        ty: ColumnType::Int,
        reference: Some(kind),
        key,
        required,
        aliases,
    }
}

pub(crate) const fn field(
    name: &'static str,
    ty: ColumnType,
    key: bool,
    required: bool,
    aliases: &'static [&'static str],
) -> ColumnSpec {
    ColumnSpec {
        name,
        ty,
        reference: None,
        key,
        required,
        aliases,
    }
}

const fn value(name: &'static str, aliases: &'static [&'static str]) -> ColumnSpec {
    field(name, ColumnType::Float, false, false, aliases)
}

const PO: ColumnSpec = reference("po_id", ReferenceKind::Po, true, true, &["PO", "po"]);
const DEPARTMENT: ColumnSpec = reference(
    "department_id",
    ReferenceKind::Department,
    true,
    true,
    &["Department", "department"],
);
// Optional: when absent it is taken from the project's own category.
const PROJECT_CATEGORY: ColumnSpec = reference(
    "project_category_id",
    ReferenceKind::ProjectCategory,
    true,
    false,
    &["Project Category", "category"],
);
const PROJECT: ColumnSpec = reference(
    "project_id",
    ReferenceKind::Project,
    true,
    true,
    &[
        "Project Name",
        "Project name",
        "Project",
        "project_name",
        "For Project",
        "for_project",
    ],
);
const FORECAST_IO: ColumnSpec =
    reference("io_id", ReferenceKind::Io, false, false, &["IO", "Order(IO)"]);
const FISCAL_YEAR: ColumnSpec =
    field("fiscal_year", ColumnType::Int, true, true, &["Fiscal Year"]);
const CAP_YEAR: ColumnSpec = field(
    "cap_year",
    ColumnType::Int,
    true,
    true,
    &["CapYear", "fiscal_year", "Fiscal Year"],
);
const CAPEX_DESCRIPTION: ColumnSpec = field(
    "capex_description",
    ColumnType::Text,
    true,
    false,
    &["CapEx Description", "Capex Description"],
);

const NON_PERSONNEL_FORECAST: &[ColumnSpec] = &[
    PO,
    FORECAST_IO,
    DEPARTMENT,
    PROJECT_CATEGORY,
    PROJECT,
    FISCAL_YEAR,
    value(
        "non_personnel_expense",
        &["Non-personnel cost", "Non-personnel Expense"],
    ),
];

const PERSONNEL_FORECAST: &[ColumnSpec] = &[
    PO,
    FORECAST_IO,
    DEPARTMENT,
    PROJECT_CATEGORY,
    PROJECT,
    FISCAL_YEAR,
    reference(
        "human_resource_category_id",
        ReferenceKind::HrCategory,
        true,
        true,
        &["Human resource category"],
    ),
    value("human_resource_fte", &["Human resource FTE"]),
    value("personnel_expense", &["Personnel cost", "Personnel Expense"]),
];

const BUDGET: &[ColumnSpec] = &[
    PO,
    DEPARTMENT,
    FISCAL_YEAR,
    value(
        "human_resource_expense",
        &["Human Resources Budget", "Personnel Budget"],
    ),
    value(
        "non_personnel_expense",
        &["Non-Human Resources Budget", "Non-personnel Budget"],
    ),
];

const FUNDING: &[ColumnSpec] = &[
    PO,
    DEPARTMENT,
    FISCAL_YEAR,
    value("funding", &["Funding"]),
    field("funding_from", ColumnType::Text, true, false, &["Funding From"]),
    field("funding_for", ColumnType::Text, true, false, &["Funding For"]),
];

const EXPENSE: &[ColumnSpec] = &[
    DEPARTMENT,
    FISCAL_YEAR,
    field("from_period", ColumnType::Int, true, false, &["From Period"]),
    reference("io_id", ReferenceKind::Io, true, false, &["Order", "Order(IO)", "IO"]),
    field(
        "cost_element",
        ColumnType::Int,
        true,
        false,
        &["Cost element", "Cost Element"],
    ),
    field(
        "co_element_name",
        ColumnType::Text,
        false,
        false,
        &["Cost element name", "Cost Element Name"],
    ),
    value("expense_value", &["Val.in rep.cur", "Val.in rep.cur."]),
    field("name", ColumnType::Text, true, false, &["Name"]),
];

const CAPEX_FORECAST: &[ColumnSpec] = &[
    PO,
    DEPARTMENT,
    CAP_YEAR,
    PROJECT,
    CAPEX_DESCRIPTION,
    value("capex_forecast", &["Forecast", "CapEx Forecast"]),
    field("cost_center", ColumnType::Text, true, false, &["Cost Center"]),
];

const CAPEX_BUDGET: &[ColumnSpec] = &[
    PO,
    DEPARTMENT,
    CAP_YEAR,
    PROJECT,
    CAPEX_DESCRIPTION,
    value("budget", &["Approved Budget (k CNY)"]),
];

const CAPEX_EXPENSE: &[ColumnSpec] = &[
    PO,
    DEPARTMENT,
    CAP_YEAR,
    PROJECT,
    CAPEX_DESCRIPTION,
    field("project_number", ColumnType::Text, true, false, &["Project number"]),
    value("expense", &["Expense", "Actual (k CNY)"]),
    field("expense_date", ColumnType::Date, true, false, &["Date"]),
];

#[derive(Debug, Clone, Copy)]
pub struct FactLayout {
    pub kind: FactKind,
    pub columns: &'static [ColumnSpec],
}

impl FactKind {
    pub fn layout(self) -> FactLayout {
        let columns = match self {
            Self::ForecastNonPersonnel => NON_PERSONNEL_FORECAST,
            Self::ForecastPersonnel => PERSONNEL_FORECAST,
            Self::Budget => BUDGET,
            Self::Funding => FUNDING,
            Self::Expense => EXPENSE,
            Self::CapexForecast => CAPEX_FORECAST,
            Self::CapexBudget => CAPEX_BUDGET,
            Self::CapexExpense => CAPEX_EXPENSE,
        };
        FactLayout {
            kind: self,
            columns,
        }
    }
}

impl FactLayout {
    /// Storage columns in the order the appender writes them.
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn key_columns(&self) -> Vec<&'static str> {
        self.columns.iter().filter(|c| c.key).map(|c| c.name).collect()
    }

    pub fn value_columns(&self) -> Vec<&'static str> {
        self.columns.iter().filter(|c| !c.key).map(|c| c.name).collect()
    }

    pub fn reference_kinds(&self) -> BTreeSet<ReferenceKind> {
        self.columns.iter().filter_map(|c| c.reference).collect()
    }

    /// `fiscal_year` or `cap_year`.
    pub fn year_column(&self) -> Option<&'static str> {
        self.columns
            .iter()
            .map(|c| c.name)
            .find(|name| *name == "fiscal_year" || *name == "cap_year")
    }

    /// Batch headers that map to no column of this layout.
    pub fn unknown_columns(&self, batch: &UploadBatch) -> BTreeSet<String> {
        unknown_headers(self.columns, &batch.rows)
    }
}

pub(crate) fn unknown_headers(columns: &[ColumnSpec], rows: &[BatchRow]) -> BTreeSet<String> {
    rows.iter()
        .flat_map(|row| row.keys())
        .filter(|header| {
            !columns
                .iter()
                .any(|c| c.name == header.as_str() || c.aliases.contains(&header.as_str()))
        })
        .cloned()
        .collect()
}

/// A reference cell as found in a batch row.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReference {
    Missing,
    /// Display name or IO code.
    Name(String),
    /// Already an id, given under the storage column name.
    Id(i64),
}

/// A batch row after renaming and coercion, before foreign keys are attached.
#[derive(Debug, Clone)]
pub struct ExtractedRow {
    pub values: Record,
    pub references: BTreeMap<&'static str, RawReference>,
}

fn lookup<'r>(row: &'r BatchRow, spec: &ColumnSpec) -> Option<(&'r str, &'r CellValue)> {
    std::iter::once(spec.name)
        .chain(spec.aliases.iter().copied())
        .find_map(|header| row.get_key_value(header))
        .map(|(header, value)| (header.as_str(), value))
        .filter(|(_, value)| !value.is_blank())
}

/// Coerce a non-blank cell to a storage type. `None` means it does not fit.
pub fn coerce(value: &CellValue, ty: ColumnType) -> Option<CellValue> {
    match ty {
        ColumnType::Int => value.as_i64().map(CellValue::Int),
        ColumnType::Float => value.as_f64().map(CellValue::Float),
        ColumnType::Text => value.as_text().map(CellValue::Text),
        ColumnType::Date => {
            let text = value.as_text()?;
            let date = NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(&text, "%Y/%m/%d"))
                .ok()?;
            Some(CellValue::Text(date.format("%Y-%m-%d").to_string()))
        }
    }
}

/// Rename a batch row to storage columns and coerce its scalar fields.
///
/// Every problem in the row is collected; a row with any problem is returned as
/// the list of reasons instead of a partial row.
pub fn extract(
    layout: &FactLayout,
    row: &BatchRow,
) -> std::result::Result<ExtractedRow, Vec<RejectionReason>> {
    extract_columns(layout.columns, row)
}

/// [`extract`] over an arbitrary column list.
pub fn extract_columns(
    columns: &[ColumnSpec],
    row: &BatchRow,
) -> std::result::Result<ExtractedRow, Vec<RejectionReason>> {
    let mut values = Record::new();
    let mut references = BTreeMap::new();
    let mut problems = Vec::new();

    for spec in columns {
        let found = lookup(row, spec);

        if let Some(kind) = spec.reference {
            let raw = match found {
                None => RawReference::Missing,
                Some((header, cell)) if header == spec.name => match cell.as_i64() {
                    Some(id) => RawReference::Id(id),
                    None => {
                        problems.push(invalid(spec.name, cell, "id"));
                        continue;
                    }
                },
                Some((_, cell)) => match cell.as_text() {
                    Some(name) => RawReference::Name(name),
                    None => RawReference::Missing,
                },
            };
            if raw == RawReference::Missing && spec.required {
                problems.push(RejectionReason::MissingField {
                    column: kind.display_name().to_string(),
                });
                continue;
            }
            references.insert(spec.name, raw);
            continue;
        }

        match found {
            None if spec.required => problems.push(RejectionReason::MissingField {
                column: spec.name.to_string(),
            }),
            None => {
                values.insert(spec.name.to_string(), CellValue::Null);
            }
            Some((_, cell)) => match coerce(cell, spec.ty) {
                Some(coerced) => {
                    values.insert(spec.name.to_string(), coerced);
                }
                None => problems.push(invalid(spec.name, cell, spec.ty.expected())),
            },
        }
    }

    if problems.is_empty() {
        Ok(ExtractedRow { values, references })
    } else {
        Err(problems)
    }
}

fn invalid(column: &str, cell: &CellValue, expected: &str) -> RejectionReason {
    RejectionReason::InvalidValue {
        column: column.to_string(),
        value: cell.to_string(),
        expected: expected.to_string(),
    }
}

/// Exactly the layout's columns; anything unset becomes null. Write order comes
/// from `FactLayout::column_names`.
pub fn finish(layout: &FactLayout, mut record: Record) -> Record {
    layout
        .columns
        .iter()
        .map(|spec| {
            let value = record.remove(spec.name).unwrap_or_default();
            (spec.name.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(&str, CellValue)]) -> BatchRow {
        cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_display_names_map_to_storage_columns() {
        let layout = FactKind::Budget.layout();
        let batch_row = row(&[
            ("PO", "PO1".into()),
            ("Department", "Dept1".into()),
            ("fiscal_year", "2024".into()),
            ("Human Resources Budget", "1200.5".into()),
            ("Non-Human Resources Budget", CellValue::Int(300)),
        ]);

        let extracted = extract(&layout, &batch_row).unwrap();
        assert_eq!(extracted.values["fiscal_year"], CellValue::Int(2024));
        assert_eq!(
            extracted.values["human_resource_expense"],
            CellValue::Float(1200.5)
        );
        assert_eq!(
            extracted.values["non_personnel_expense"],
            CellValue::Float(300.0)
        );
        assert_eq!(
            extracted.references["po_id"],
            RawReference::Name("PO1".to_string())
        );
        assert_eq!(
            extracted.references["department_id"],
            RawReference::Name("Dept1".to_string())
        );
    }

    #[test]
    fn test_coercion_failures_are_collected_per_row() {
        let layout = FactKind::ForecastNonPersonnel.layout();
        let batch_row = row(&[
            ("PO", "PO1".into()),
            ("Department", "Dept1".into()),
            ("Project Name", "ProjA".into()),
            ("fiscal_year", "next year".into()),
            ("Non-personnel cost", "lots".into()),
        ]);

        let problems = extract(&layout, &batch_row).unwrap_err();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].to_string(), "invalid fiscal_year");
        assert_eq!(problems[1].to_string(), "invalid non_personnel_expense");
    }

    #[test]
    fn test_missing_required_fields() {
        let layout = FactKind::ForecastNonPersonnel.layout();
        let batch_row = row(&[("PO", "PO1".into()), ("Department", "  ".into())]);

        let problems = extract(&layout, &batch_row).unwrap_err();
        let messages: Vec<String> = problems.iter().map(|p| p.to_string()).collect();
        assert!(messages.contains(&"missing Department".to_string()));
        assert!(messages.contains(&"missing Project Name".to_string()));
        assert!(messages.contains(&"missing fiscal_year".to_string()));
    }

    #[test]
    fn test_storage_column_takes_an_id() {
        let layout = FactKind::Budget.layout();
        let batch_row = row(&[
            ("po_id", CellValue::Int(7)),
            ("Department", "Dept1".into()),
            ("fiscal_year", CellValue::Int(2024)),
        ]);
        let extracted = extract(&layout, &batch_row).unwrap();
        assert_eq!(extracted.references["po_id"], RawReference::Id(7));
        assert_eq!(extracted.values["human_resource_expense"], CellValue::Null);
    }

    #[test]
    fn test_capex_year_and_date() {
        let layout = FactKind::CapexExpense.layout();
        let batch_row = row(&[
            ("PO", "PO1".into()),
            ("Department", "Dept1".into()),
            ("fiscal_year", CellValue::Float(2025.0)),
            ("Project Name", "ProjA".into()),
            ("Date", "2025/03/31".into()),
        ]);
        let extracted = extract(&layout, &batch_row).unwrap();
        assert_eq!(extracted.values["cap_year"], CellValue::Int(2025));
        assert_eq!(
            extracted.values["expense_date"],
            CellValue::text("2025-03-31")
        );
        assert_eq!(layout.year_column(), Some("cap_year"));
    }

    #[test]
    fn test_finish_orders_and_fills_columns() {
        let layout = FactKind::Budget.layout();
        let mut record = Record::new();
        record.insert("fiscal_year".to_string(), CellValue::Int(2024));
        record.insert("stray".to_string(), CellValue::Int(1));
        let finished = finish(&layout, record);
        let columns: Vec<&str> = finished.keys().map(String::as_str).collect();
        let mut expected = layout.column_names();
        expected.sort_unstable();
        assert_eq!(columns, expected);
        assert_eq!(finished["po_id"], CellValue::Null);
    }

    #[test]
    fn test_key_and_value_split() {
        let layout = FactKind::ForecastNonPersonnel.layout();
        assert_eq!(
            layout.key_columns(),
            vec![
                "po_id",
                "department_id",
                "project_category_id",
                "project_id",
                "fiscal_year"
            ]
        );
        assert_eq!(layout.value_columns(), vec!["io_id", "non_personnel_expense"]);

        let batch = UploadBatch::new(vec![row(&[("PO", "PO1".into()), ("Colour", "red".into())])]);
        let unknown = layout.unknown_columns(&batch);
        assert_eq!(unknown.into_iter().collect::<Vec<_>>(), vec!["Colour".to_string()]);
    }
}
