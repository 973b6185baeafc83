//! Fact tables as users see them: ids replaced by names, filtered by a
//! [`Selection`].

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::normalize::ColumnSpec;
use crate::resolver::{unit_cost_by_ids, ReferenceResolver, ReferenceSet};
use crate::schema::{CellValue, FactKind, Record, ReferenceKind, Table};
use crate::store::Store;

/// What the user is currently looking at. Unset fields do not filter.
///
/// A filter on a column the table does not have (expenses carry no PO) is
/// ignored for that table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Selection {
    pub po: Option<String>,
    pub department: Option<String>,
    pub project: Option<String>,
    pub fiscal_year: Option<i64>,
}

impl Selection {
    fn name_filter(&self, kind: ReferenceKind) -> Option<&str> {
        let name = match kind {
            ReferenceKind::Po => self.po.as_deref(),
            ReferenceKind::Department => self.department.as_deref(),
            ReferenceKind::Project => self.project.as_deref(),
            _ => None,
        };
        name.map(str::trim)
    }
}

/// Header shown for a storage column.
pub fn display_header(spec: &ColumnSpec) -> &'static str {
    match spec.reference {
        Some(kind) => kind.display_name(),
        None => spec.aliases.first().copied().unwrap_or(spec.name),
    }
}

fn shown_value(spec: &ColumnSpec, stored: CellValue, references: &ReferenceSet) -> CellValue {
    let Some(kind) = spec.reference else {
        return stored;
    };
    stored
        .as_i64()
        .and_then(|id| references.get(kind).and_then(|map| map.name_of(id)))
        .map(CellValue::Text)
        .unwrap_or_default()
}

const PERSONNEL_COST: &str = "Personnel cost";

/// FTE times the category's unit cost for the row's year, PO and department.
/// `None` when no unit cost applies, leaving the stored figure in place.
fn personnel_cost(store: &Store, row: &Record) -> Result<Option<f64>> {
    let id = |column: &str| row.get(column).and_then(CellValue::as_i64);
    let (Some(category), Some(year)) = (id("human_resource_category_id"), id("fiscal_year")) else {
        return Ok(None);
    };
    let Some(fte) = row.get("human_resource_fte").and_then(CellValue::as_f64) else {
        return Ok(None);
    };
    let unit = unit_cost_by_ids(store, category, year, id("po_id"), id("department_id"))?;
    Ok(unit.map(|cost| cost * fte))
}

/// Read `kind`'s table with reference ids mapped to display names.
///
/// Columns are `id` followed by the layout columns under their display headers.
/// Personnel forecasts show their cost as FTE times the HR unit cost when one is
/// on record.
pub fn view_facts(store: &Store, kind: FactKind, selection: &Selection) -> Result<Table> {
    let layout = kind.layout();
    let stored = store.select_all(kind.table())?;
    let references = ReferenceResolver::new(store).resolve_all(layout.reference_kinds());
    let year_column = layout.year_column();

    let mut columns = vec!["id".to_string()];
    columns.extend(layout.columns.iter().map(|c| display_header(c).to_string()));

    let mut rows = Vec::new();
    'rows: for row in stored.rows {
        let mut shown = Record::new();
        shown.insert("id".to_string(), row.get("id").cloned().unwrap_or_default());

        for spec in layout.columns {
            let cell = row.get(spec.name).cloned().unwrap_or_default();
            if Some(spec.name) == year_column {
                if let Some(year) = selection.fiscal_year {
                    if cell.as_i64() != Some(year) {
                        continue 'rows;
                    }
                }
            }

            let value = shown_value(spec, cell, &references);
            if let Some(wanted) = spec.reference.and_then(|k| selection.name_filter(k)) {
                if value.as_text().as_deref() != Some(wanted) {
                    continue 'rows;
                }
            }
            shown.insert(display_header(spec).to_string(), value);
        }
        if kind == FactKind::ForecastPersonnel {
            if let Some(cost) = personnel_cost(store, &row)? {
                shown.insert(PERSONNEL_COST.to_string(), CellValue::Float(cost));
            }
        }
        rows.push(shown);
    }

    debug!(
        "{}: showing {} rows for {:?}",
        kind.table(),
        rows.len(),
        selection
    );
    Ok(Table { columns, rows })
}
