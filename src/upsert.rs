//! The merge-upsert pipeline: resolve → normalize → dedup → append.
//!
//! One call is one write transaction. Rows that cannot be resolved or coerced are
//! reported, the rest go through; if the append itself fails nothing is written.

use std::collections::BTreeSet;

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::appender;
use crate::config::{PlanningConfig, ReferenceMode, UploadMode};
use crate::dedup;
use crate::error::{PlanningError, RejectionReason, Result, RowRejection};
use crate::normalize::{self, ExtractedRow, FactLayout, RawReference};
use crate::resolver::{ReferenceResolver, ReferenceSet};
use crate::schema::{CellValue, FactKind, Record, ReferenceKind, UploadBatch};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CreatedReference {
    pub kind: ReferenceKind,
    pub name: String,
    pub id: i64,
}

/// Outcome of one merge-upsert call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct UpsertReport {
    pub table: String,
    pub received: usize,
    pub inserted: usize,
    /// Rows whose key already exists in the table.
    pub already_present: usize,
    /// Rows repeating a key seen earlier in the same batch.
    pub repeated_in_batch: usize,
    pub rejected: Vec<RowRejection>,
    pub created_references: Vec<CreatedReference>,
    /// Facts removed first in replace-years mode.
    pub replaced: usize,
    pub warnings: Vec<String>,
}

impl UpsertReport {
    pub(crate) fn new(table: &str, received: usize) -> Self {
        Self {
            table: table.to_string(),
            received,
            ..Self::default()
        }
    }

    /// Distinct batch rows that were rejected.
    pub fn rejected_rows(&self) -> BTreeSet<usize> {
        self.rejected.iter().map(|r| r.row).collect()
    }

    pub fn status_message(&self) -> String {
        let mut message = if self.inserted > 0 {
            format!("{} inserted into {}", rows_phrase(self.inserted), self.table)
        } else if self.already_present + self.repeated_in_batch > 0 {
            "Value already exists".to_string()
        } else {
            format!("No rows inserted into {}", self.table)
        };
        if !self.rejected.is_empty() {
            let details: Vec<String> = self.rejected.iter().map(RowRejection::describe).collect();
            message.push_str(&format!(
                "; {} rejected ({})",
                rows_phrase(self.rejected_rows().len()),
                details.join("; ")
            ));
        }
        message
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn rows_phrase(count: usize) -> String {
    if count == 1 {
        "1 row".to_string()
    } else {
        format!("{} rows", count)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertOptions {
    pub reference_mode: ReferenceMode,
    pub upload_mode: UploadMode,
    pub dedup_within_batch: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self::from(&PlanningConfig::default())
    }
}

impl From<&PlanningConfig> for UpsertOptions {
    fn from(config: &PlanningConfig) -> Self {
        Self {
            reference_mode: config.reference_mode,
            upload_mode: config.upload_mode,
            dedup_within_batch: config.dedup_within_batch,
        }
    }
}

pub struct MergeUpsert<'a> {
    store: &'a Store,
    options: UpsertOptions,
}

impl<'a> MergeUpsert<'a> {
    pub fn new(store: &'a Store, options: UpsertOptions) -> Self {
        Self { store, options }
    }

    /// Upsert using the layout's own key: every key column, values excluded.
    pub fn run_default(&self, kind: FactKind, batch: &UploadBatch) -> Result<UpsertReport> {
        let layout = kind.layout();
        self.run(kind, batch, &layout.key_columns(), &[])
    }

    /// Upsert `batch` into `kind`'s table.
    ///
    /// Rows are compared on `key_columns` (all layout columns when empty) minus
    /// `excluded_value_columns`.
    pub fn run(
        &self,
        kind: FactKind,
        batch: &UploadBatch,
        key_columns: &[&str],
        excluded_value_columns: &[&str],
    ) -> Result<UpsertReport> {
        let layout = kind.layout();
        let key = effective_key(&layout, key_columns, excluded_value_columns)?;
        info!(
            "Merge-upsert of {} rows into {} on key {:?}",
            batch.len(),
            kind.table(),
            key
        );

        let report = self
            .store
            .with_transaction(|store| self.run_in_transaction(store, &layout, batch, &key))?;

        info!(
            "{}: {} inserted, {} already present, {} rejected",
            report.table,
            report.inserted,
            report.already_present,
            report.rejected_rows().len()
        );
        Ok(report)
    }

    fn run_in_transaction(
        &self,
        store: &Store,
        layout: &FactLayout,
        batch: &UploadBatch,
        key: &[&str],
    ) -> Result<UpsertReport> {
        let table = layout.kind.table();
        let mut report = UpsertReport::new(table, batch.len());

        for column in layout.unknown_columns(batch) {
            report
                .warnings
                .push(format!("ignored column '{}' not used by {}", column, table));
        }

        let mut references =
            ReferenceResolver::new(store).resolve_all(layout.reference_kinds());
        report.warnings.extend(references.warnings());

        let mut extracted = Vec::new();
        for (idx, row) in batch.rows.iter().enumerate() {
            match normalize::extract(layout, row) {
                Ok(row) => extracted.push((idx, row)),
                Err(problems) => report
                    .rejected
                    .extend(problems.into_iter().map(|p| RowRejection::new(idx, p))),
            }
        }
        debug!(
            "{}: {} rows passed coercion, {} rejected",
            table,
            extracted.len(),
            report.rejected_rows().len()
        );

        let mut linker = RowLinker {
            store,
            mode: self.options.reference_mode,
            references: &mut references,
            created: Vec::new(),
        };
        let mut resolved = Vec::new();
        for (idx, row) in extracted {
            match linker.link(layout, row)? {
                Ok(record) => resolved.push((idx, normalize::finish(layout, record))),
                Err(problems) => report
                    .rejected
                    .extend(problems.into_iter().map(|p| RowRejection::new(idx, p))),
            }
        }
        report.created_references = linker.created;
        report.rejected.sort_by_key(|r| r.row);

        if self.options.upload_mode == UploadMode::ReplaceYears {
            report.replaced = replace_years(store, layout, &resolved)?;
        }

        let existing = store.select_all(table)?;
        let outcome = dedup::anti_join(resolved, &existing, key, self.options.dedup_within_batch);
        report.already_present = outcome.already_present;
        report.repeated_in_batch = outcome.repeated_in_batch;

        report.inserted = appender::append(store, table, &layout.column_names(), &outcome.rows())?;
        Ok(report)
    }
}

/// Merge `batch` into `target_table` with default options.
///
/// `key_columns` empty means every column of the table's layout; the excluded
/// value columns are taken out of the key so they may differ between rows that
/// still count as the same record.
pub fn merge_upsert(
    store: &Store,
    batch: &UploadBatch,
    target_table: &str,
    key_columns: &[&str],
    excluded_value_columns: &[&str],
) -> Result<UpsertReport> {
    let kind = FactKind::from_table(target_table)?;
    MergeUpsert::new(store, UpsertOptions::default()).run(
        kind,
        batch,
        key_columns,
        excluded_value_columns,
    )
}

/// Upsert on the layout's business key with the configured modes.
pub fn upsert_facts(
    store: &Store,
    config: &PlanningConfig,
    kind: FactKind,
    batch: &UploadBatch,
) -> Result<UpsertReport> {
    MergeUpsert::new(store, UpsertOptions::from(config)).run_default(kind, batch)
}

/// Key columns after exclusions, validated against the layout.
fn effective_key<'k>(
    layout: &FactLayout,
    key_columns: &[&'k str],
    excluded: &[&str],
) -> Result<Vec<&'k str>> {
    let base: Vec<&'k str> = if key_columns.is_empty() {
        layout.column_names()
    } else {
        key_columns.to_vec()
    };

    let unknown = base
        .iter()
        .map(|c| *c as &str)
        .chain(excluded.iter().copied())
        .find(|column| layout.column(column).is_none());
    if let Some(column) = unknown {
        return Err(PlanningError::UnknownColumn {
            table: layout.kind.table().to_string(),
            column: column.to_string(),
        });
    }

    let key: Vec<&'k str> = base
        .into_iter()
        .filter(|column| !excluded.iter().any(|e| e == column))
        .collect();
    if key.is_empty() {
        return Err(PlanningError::EmptyKey(layout.kind.table().to_string()));
    }
    Ok(key)
}

fn replace_years(store: &Store, layout: &FactLayout, rows: &[(usize, Record)]) -> Result<usize> {
    let Some(year_column) = layout.year_column() else {
        return Ok(0);
    };
    let years: BTreeSet<i64> = rows
        .iter()
        .filter_map(|(_, row)| row.get(year_column).and_then(CellValue::as_i64))
        .collect();

    let mut deleted = 0;
    for year in years {
        deleted += store.delete_year(layout.kind, year_column, year)?;
    }
    debug!(
        "Replaced {} rows of {} for the batch's years",
        deleted,
        layout.kind.table()
    );
    Ok(deleted)
}

/// Attaches foreign-key ids to extracted rows, creating missing references
/// when the mode allows.
struct RowLinker<'s, 'r> {
    store: &'s Store,
    mode: ReferenceMode,
    references: &'r mut ReferenceSet,
    created: Vec<CreatedReference>,
}

impl RowLinker<'_, '_> {
    /// Outer error: the database failed. Inner error: this row is rejected.
    fn link(
        &mut self,
        layout: &FactLayout,
        row: ExtractedRow,
    ) -> Result<std::result::Result<Record, Vec<RejectionReason>>> {
        let ExtractedRow {
            mut values,
            references,
        } = row;
        let mut problems = Vec::new();
        let mut pending = Vec::new();

        // Resolve everything first; nothing is created for a row that is rejected.
        for kind in ReferenceKind::DEPENDENCY_ORDER {
            for spec in layout.columns.iter().filter(|c| c.reference == Some(kind)) {
                let map = self.references.get_mut(kind);
                let id = match references.get(spec.name) {
                    None | Some(RawReference::Missing) => None,
                    Some(RawReference::Id(id)) if map.contains_id(*id) => Some(*id),
                    Some(RawReference::Id(id)) => {
                        problems.push(RejectionReason::Unresolved {
                            kind,
                            name: id.to_string(),
                        });
                        None
                    }
                    Some(RawReference::Name(name)) => match map.id_of(name) {
                        Some(id) => Some(id),
                        None if self.mode == ReferenceMode::Create => {
                            pending.push((spec.name, kind, name.clone()));
                            None
                        }
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
        }

        if !problems.is_empty() {
            return Ok(Err(problems));
        }

        // Parents precede children in `pending`, so each creation sees its parents' ids.
        for (column, kind, name) in pending {
            let id = match self.references.get_mut(kind).id_of(&name) {
                Some(id) => id,
                None => self.create(kind, &name, &values)?,
            };
            values.insert(column.to_string(), CellValue::Int(id));
        }

        // A project carries its category; use it when the row names none.
        if layout.column("project_category_id").is_some() {
            let missing = values
                .get("project_category_id")
                .map_or(true, CellValue::is_blank);
            if missing {
                let projects = self.references.get(ReferenceKind::Project);
                let project_category = values
                    .get("project_id")
                    .and_then(CellValue::as_i64)
                    .and_then(|id| projects.and_then(|map| map.entry_by_id(id)))
                    .and_then(|entry| entry.attribute_id("category_id"));
                values.insert(
                    "project_category_id".to_string(),
                    CellValue::from(project_category),
                );
            }
        }

        Ok(Ok(values))
    }

    fn create(&mut self, kind: ReferenceKind, name: &str, values: &Record) -> Result<i64> {
        let record = creation_record(kind, name, values);
        appender::append(self.store, kind.table(), kind.insert_columns(), &[record.clone()])?;
        let id = self.store.conn().last_insert_rowid();

        let mut stored = record;
        stored.insert("id".to_string(), CellValue::Int(id));
        self.references.get_mut(kind).insert(name, id, stored);
        info!("Created {} '{}' with id {}", kind.label(), name, id);
        self.created.push(CreatedReference {
            kind,
            name: name.to_string(),
            id,
        });
        Ok(id)
    }
}

/// Columns of a new reference row, with parents taken from ids already
/// attached to the fact row.
fn creation_record(kind: ReferenceKind, name: &str, values: &Record) -> Record {
    let parent = |column: &str| values.get(column).cloned().unwrap_or_default();
    let mut record = Record::new();
    match kind {
        ReferenceKind::Po => {
            record.insert("name".into(), CellValue::text(name));
        }
        ReferenceKind::ProjectCategory => {
            record.insert("category".into(), CellValue::text(name));
        }
        ReferenceKind::Department | ReferenceKind::HrCategory => {
            record.insert("name".into(), CellValue::text(name));
            record.insert("po_id".into(), parent("po_id"));
        }
        ReferenceKind::Project => {
            let year = values
                .get("fiscal_year")
                .or_else(|| values.get("cap_year"))
                .cloned()
                .unwrap_or_default();
            record.insert("name".into(), CellValue::text(name));
            record.insert("category_id".into(), parent("project_category_id"));
            record.insert("department_id".into(), parent("department_id"));
            record.insert("fiscal_year".into(), year);
        }
        ReferenceKind::Io => {
            let code = name
                .parse::<i64>()
                .map(CellValue::Int)
                .unwrap_or_else(|_| CellValue::text(name));
            record.insert("IO_num".into(), code);
            record.insert("project_id".into(), parent("project_id"));
        }
    }
    record
}
