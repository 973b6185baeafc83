//! Anti-join of an incoming batch against a table's current rows.
//!
//! Rows are compared on key columns only. Value columns left out of the key can
//! change without producing a second row for the same key.

use std::collections::HashSet;

use crate::schema::{whole_float, CellValue, Record, ReferenceKind, Table};

/// Hashable form of a cell. Whole floats compare equal to integers and null
/// compares equal to null, as in a dataframe merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
}

impl From<&CellValue> for KeyPart {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Null => KeyPart::Null,
            CellValue::Int(i) => KeyPart::Int(*i),
            CellValue::Float(f) if f.is_nan() => KeyPart::Null,
            CellValue::Float(f) => match whole_float(*f) {
                Some(i) => KeyPart::Int(i),
                None => KeyPart::Float(f.to_bits()),
            },
            CellValue::Text(s) => KeyPart::Text(s.clone()),
        }
    }
}

fn key_of(record: &Record, key_columns: &[&str]) -> Vec<KeyPart> {
    key_columns
        .iter()
        .map(|column| record.get(*column).map(KeyPart::from).unwrap_or(KeyPart::Null))
        .collect()
}

/// Key columns used when deduplicating new reference rows.
///
/// Departments compare on name alone: a department already present under another
/// PO is still the same department. Every other kind compares on all the columns
/// it is inserted with.
pub fn reference_key(kind: ReferenceKind) -> &'static [&'static str] {
    match kind {
        ReferenceKind::Department => &["name"],
        other => other.insert_columns(),
    }
}

/// Where a batch row ended up.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// `(batch row index, row)` pairs with no match, in batch order.
    pub fresh: Vec<(usize, Record)>,
    pub already_present: usize,
    pub repeated_in_batch: usize,
}

impl DedupOutcome {
    pub fn rows(&self) -> Vec<Record> {
        self.fresh.iter().map(|(_, row)| row.clone()).collect()
    }
}

/// Keep the incoming rows whose key matches no existing row.
///
/// An existing table lacking one of the key columns is treated as holding null
/// there. With `within_batch`, a key seen earlier in the same batch also counts
/// as present and only the first occurrence is kept.
pub fn anti_join(
    incoming: Vec<(usize, Record)>,
    existing: &Table,
    key_columns: &[&str],
    within_batch: bool,
) -> DedupOutcome {
    let existing_keys: HashSet<Vec<KeyPart>> = existing
        .rows
        .iter()
        .map(|row| key_of(row, key_columns))
        .collect();

    let mut seen = HashSet::new();
    let mut outcome = DedupOutcome::default();
    for (idx, row) in incoming {
        let key = key_of(&row, key_columns);
        if existing_keys.contains(&key) {
            outcome.already_present += 1;
            continue;
        }
        if within_batch && !seen.insert(key) {
            outcome.repeated_in_batch += 1;
            continue;
        }
        outcome.fresh.push((idx, row));
    }
    outcome
}
