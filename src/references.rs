//! Adding rows to the reference tables from display-named input.
//!
//! Parents are named, not numbered: a project row names its category and
//! department, an IO names its project, a department or HR category names its PO.
//! Parents must already exist. New rows are deduplicated against the table with
//! the same anti-join the fact pipeline uses.

use std::collections::BTreeMap;

use log::info;

use crate::appender;
use crate::dedup::{anti_join, reference_key};
use crate::error::{RejectionReason, Result, RowRejection};
use crate::normalize::{
    extract_columns, field, reference, unknown_headers, ColumnSpec, ColumnType, RawReference,
};
use crate::resolver::{ReferenceResolver, ReferenceSet};
use crate::schema::{BatchRow, CellValue, Record, ReferenceKind};
use crate::store::Store;
use crate::upsert::UpsertReport;

const PO_ENTRY: &[ColumnSpec] = &[field("name", ColumnType::Text, true, true, &["PO", "po"])];

const CATEGORY_ENTRY: &[ColumnSpec] = &[field(
    "category",
    ColumnType::Text,
    true,
    true,
    &["Project Category", "project_category"],
)];

const DEPARTMENT_ENTRY: &[ColumnSpec] = &[
    field("name", ColumnType::Text, true, true, &["Department", "department"]),
    reference("po_id", ReferenceKind::Po, false, false, &["PO", "po"]),
];

const PROJECT_ENTRY: &[ColumnSpec] = &[
    field(
        "name",
        ColumnType::Text,
        true,
        true,
        &["Project Name", "Project name", "Project", "project_name"],
    ),
    reference(
        "category_id",
        ReferenceKind::ProjectCategory,
        true,
        false,
        &["Project Category", "category"],
    ),
    reference(
        "department_id",
        ReferenceKind::Department,
        true,
        false,
        &["Department", "department"],
    ),
    field("fiscal_year", ColumnType::Int, true, false, &["Fiscal Year"]),
];

const IO_ENTRY: &[ColumnSpec] = &[
    field("IO_num", ColumnType::Int, true, true, &["IO", "Order(IO)", "io"]),
    reference(
        "project_id",
        ReferenceKind::Project,
        true,
        false,
        &["Project Name", "Project", "project_name"],
    ),
];

const HR_CATEGORY_ENTRY: &[ColumnSpec] = &[
    field(
        "name",
        ColumnType::Text,
        true,
        true,
        &["Human resource category", "human_resource_category"],
    ),
    reference("po_id", ReferenceKind::Po, false, false, &["PO", "po"]),
];

/// Input columns accepted for one reference kind.
pub fn entry_columns(kind: ReferenceKind) -> &'static [ColumnSpec] {
    match kind {
        ReferenceKind::Po => PO_ENTRY,
        ReferenceKind::ProjectCategory => CATEGORY_ENTRY,
        ReferenceKind::Department => DEPARTMENT_ENTRY,
        ReferenceKind::Project => PROJECT_ENTRY,
        ReferenceKind::Io => IO_ENTRY,
        ReferenceKind::HrCategory => HR_CATEGORY_ENTRY,
    }
}

/// Insert the reference rows of `kind` that are not present yet.
///
/// A department counts as present when its name exists under any PO. Rows
/// naming a parent that does not exist are rejected.
pub fn add_reference_entries(
    store: &Store,
    kind: ReferenceKind,
    rows: &[BatchRow],
    within_batch: bool,
) -> Result<UpsertReport> {
    let columns = entry_columns(kind);
    let report = store.with_transaction(|store| {
        let mut report = UpsertReport::new(kind.table(), rows.len());
        for header in unknown_headers(columns, rows) {
            report
                .warnings
                .push(format!("ignored column '{}' not used by {}", header, kind.table()));
        }

        let parents = ReferenceResolver::new(store)
            .resolve_all(columns.iter().filter_map(|c| c.reference));
        report.warnings.extend(parents.warnings());

        let mut accepted = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let linked = extract_columns(columns, row).and_then(|extracted| {
                link_parents(columns, &parents, extracted.values, &extracted.references)
            });
            match linked {
                Ok(record) => accepted.push((idx, record)),
                Err(problems) => report
                    .rejected
                    .extend(problems.into_iter().map(|p| RowRejection::new(idx, p))),
            }
        }

        let existing = store.select_all(kind.table())?;
        let outcome = anti_join(accepted, &existing, reference_key(kind), within_batch);
        report.already_present = outcome.already_present;
        report.repeated_in_batch = outcome.repeated_in_batch;
        report.inserted =
            appender::append(store, kind.table(), kind.insert_columns(), &outcome.rows())?;
        Ok(report)
    })?;

    info!(
        "Added {} {} entries ({} already present, {} rejected)",
        report.inserted,
        kind.label(),
        report.already_present,
        report.rejected_rows().len()
    );
    Ok(report)
}

fn link_parents(
    columns: &[ColumnSpec],
    parents: &ReferenceSet,
    mut values: Record,
    references: &BTreeMap<&'static str, RawReference>,
) -> std::result::Result<Record, Vec<RejectionReason>> {
    let mut problems = Vec::new();
    for spec in columns {
        let Some(kind) = spec.reference else { continue };
        let map = parents.get(kind);
        let id = match references.get(spec.name) {
            None | Some(RawReference::Missing) => None,
            Some(RawReference::Id(id)) if map.is_some_and(|m| m.contains_id(*id)) => Some(*id),
            Some(RawReference::Id(id)) => {
                problems.push(RejectionReason::Unresolved {
                    kind,
                    name: id.to_string(),
                });
                None
            }
            Some(RawReference::Name(name)) => match map.and_then(|m| m.id_of(name)) {
                Some(id) => Some(id),
                None => {
                    problems.push(RejectionReason::Unresolved {
                        kind,
                        name: name.clone(),
                    });
                    None
                }
            },
        };
        values.insert(spec.name.to_string(), CellValue::from(id));
    }

    if problems.is_empty() {
        Ok(values)
    } else {
        Err(problems)
    }
}
