use crate::error::{PlanningError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single field as it arrives from a form, a CSV upload or the database.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Null, or text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Float(f) => f.is_nan(),
            Self::Int(_) => false,
        }
    }

    /// Canonical textual form used for name and code lookups.
    ///
    /// Whole floats print without a fractional part so that an IO code read as
    /// `100.0` from a spreadsheet matches the stored `100`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) if f.is_nan() => None,
            Self::Float(f) => Some(match whole_float(*f) {
                Some(i) => i.to_string(),
                None => f.to_string(),
            }),
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => whole_float(*f),
            Self::Text(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().and_then(whole_float))
            }
            Self::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
            Self::Null => None,
        };
        value.filter(|f| f.is_finite())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

pub(crate) fn whole_float(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

/// A row keyed by column name. Batch rows use display names, stored rows use
/// storage column names.
pub type Record = BTreeMap<String, CellValue>;

pub type BatchRow = Record;

/// Full contents of a table as read by `SELECT *`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An in-memory upload, still keyed by display names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct UploadBatch {
    #[schemars(
        description = "Rows keyed by display column names such as 'PO', 'Department', 'Project Name' or 'fiscal_year'."
    )]
    pub rows: Vec<BatchRow>,
}

impl UploadBatch {
    pub fn new(rows: Vec<BatchRow>) -> Self {
        Self { rows }
    }

    pub fn push(&mut self, row: BatchRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(UploadBatch)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Po,
    ProjectCategory,
    Department,
    Project,
    Io,
    HrCategory,
}

impl ReferenceKind {
    /// Parents come before children: a department needs its PO, a project its
    /// category and department, an IO its project.
    pub const DEPENDENCY_ORDER: [ReferenceKind; 6] = [
        ReferenceKind::Po,
        ReferenceKind::ProjectCategory,
        ReferenceKind::Department,
        ReferenceKind::Project,
        ReferenceKind::Io,
        ReferenceKind::HrCategory,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::Po => "pos",
            Self::ProjectCategory => "project_categories",
            Self::Department => "departments",
            Self::Project => "projects",
            Self::Io => "ios",
            Self::HrCategory => "human_resource_categories",
        }
    }

    /// Column holding the display name (or numeric code for IOs).
    pub fn name_column(self) -> &'static str {
        match self {
            Self::ProjectCategory => "category",
            Self::Io => "IO_num",
            _ => "name",
        }
    }

    /// Columns written when a new reference row is created.
    pub fn insert_columns(self) -> &'static [&'static str] {
        match self {
            Self::Po => &["name"],
            Self::ProjectCategory => &["category"],
            Self::Department => &["name", "po_id"],
            Self::Project => &["name", "category_id", "department_id", "fiscal_year"],
            Self::Io => &["IO_num", "project_id"],
            Self::HrCategory => &["name", "po_id"],
        }
    }

    /// Header used when showing a resolved id back to a user.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Po => "PO",
            Self::ProjectCategory => "Project Category",
            Self::Department => "Department",
            Self::Project => "Project Name",
            Self::Io => "IO",
            Self::HrCategory => "Human resource category",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Po => "po",
            Self::ProjectCategory => "project category",
            Self::Department => "department",
            Self::Project => "project",
            Self::Io => "io",
            Self::HrCategory => "hr category",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    ForecastNonPersonnel,
    ForecastPersonnel,
    Budget,
    Funding,
    Expense,
    CapexForecast,
    CapexBudget,
    CapexExpense,
}

impl FactKind {
    pub const ALL: [FactKind; 8] = [
        FactKind::ForecastNonPersonnel,
        FactKind::ForecastPersonnel,
        FactKind::Budget,
        FactKind::Funding,
        FactKind::Expense,
        FactKind::CapexForecast,
        FactKind::CapexBudget,
        FactKind::CapexExpense,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Self::ForecastNonPersonnel => "project_forecasts_nonpc",
            Self::ForecastPersonnel => "project_forecasts_pc",
            Self::Budget => "budgets",
            Self::Funding => "fundings",
            Self::Expense => "expenses",
            Self::CapexForecast => "capex_forecasts",
            Self::CapexBudget => "capex_budgets",
            Self::CapexExpense => "capex_expenses",
        }
    }

    pub fn from_table(table: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.table().eq_ignore_ascii_case(table))
            .ok_or_else(|| PlanningError::UnknownTable(table.to_string()))
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::ForecastNonPersonnel => "Project Forecasts (non-personnel)",
            Self::ForecastPersonnel => "Project Forecasts (personnel)",
            Self::Budget => "Budget List By Year and Department",
            Self::Funding => "Fundings",
            Self::Expense => "Expenses (actuals)",
            Self::CapexForecast => "CapEx Forecasts",
            Self::CapexBudget => "CapEx Budgets",
            Self::CapexExpense => "CapEx Expenses",
        }
    }
}

/// Every table the store is allowed to scan.
pub fn is_known_table(table: &str) -> bool {
    table == "human_resource_cost"
        || ReferenceKind::DEPENDENCY_ORDER
            .iter()
            .any(|kind| kind.table() == table)
        || FactKind::ALL.iter().any(|kind| kind.table() == table)
}
