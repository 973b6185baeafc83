use log::debug;
use rusqlite::params_from_iter;

use crate::error::{PlanningError, Result};
use crate::schema::{is_known_table, CellValue, Record};
use crate::store::Store;

/// Insert `rows` into `table` in append mode, writing `columns` in order.
///
/// Columns a row lacks are written as null. Zero rows is a no-op. Any failed
/// insert stops the append with `WriteFailed`; run this inside
/// `Store::with_transaction` so the rows already written are rolled back.
pub fn append(store: &Store, table: &str, columns: &[&str], rows: &[Record]) -> Result<usize> {
    if !is_known_table(table) {
        return Err(PlanningError::UnknownTable(table.to_string()));
    }
    if rows.is_empty() {
        debug!("Nothing to append to {}", table);
        return Ok(0);
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );

    let write_failed = |source| PlanningError::WriteFailed {
        table: table.to_string(),
        source,
    };

    let mut stmt = store.conn().prepare_cached(&sql).map_err(write_failed)?;
    let null = CellValue::Null;
    for row in rows {
        let values = columns.iter().map(|c| row.get(*c).unwrap_or(&null));
        stmt.execute(params_from_iter(values)).map_err(write_failed)?;
    }

    debug!("Appended {} rows to {}", rows.len(), table);
    Ok(rows.len())
}
