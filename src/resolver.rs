//! Name → id resolution against the reference tables.
//!
//! Every call scans the table again; nothing is cached between requests, so a
//! reference inserted by one upload is visible to the next resolve.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use rusqlite::params;

use crate::error::Result;
use crate::schema::{CellValue, Record, ReferenceKind, Table};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub id: i64,
    pub record: Record,
}

impl ReferenceEntry {
    /// Integer attribute of the reference row, e.g. a project's `category_id`.
    pub fn attribute_id(&self, column: &str) -> Option<i64> {
        self.record.get(column).and_then(CellValue::as_i64)
    }
}

/// Lookup tables for one reference kind.
#[derive(Debug, Clone)]
pub struct ReferenceMap {
    kind: ReferenceKind,
    by_name: HashMap<String, i64>,
    by_id: BTreeMap<i64, ReferenceEntry>,
    warnings: Vec<String>,
}

impl ReferenceMap {
    pub fn empty(kind: ReferenceKind) -> Self {
        Self {
            kind,
            by_name: HashMap::new(),
            by_id: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Build the map from a full table scan.
    ///
    /// A table without `id` or without the kind's name column gives an empty map.
    /// When a name occurs more than once the lowest id wins and a warning is kept.
    pub fn from_table(kind: ReferenceKind, table: &Table) -> Self {
        let mut map = Self::empty(kind);
        let name_column = kind.name_column();
        if !table.has_column("id") || !table.has_column(name_column) {
            debug!(
                "{} has no id/{} columns, resolving nothing",
                kind.table(),
                name_column
            );
            return map;
        }

        let mut seen: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for row in &table.rows {
            let Some(id) = row.get("id").and_then(CellValue::as_i64) else {
                continue;
            };
            map.by_id.insert(
                id,
                ReferenceEntry {
                    id,
                    record: row.clone(),
                },
            );
            if let Some(name) = row.get(name_column).and_then(CellValue::as_text) {
                seen.entry(name).or_default().push(id);
            }
        }

        for (name, mut ids) in seen {
            ids.sort_unstable();
            if ids.len() > 1 {
                let message = format!(
                    "{} '{}' matches ids {:?}; using {}",
                    kind.label(),
                    name,
                    ids,
                    ids[0]
                );
                warn!("Ambiguous reference: {}", message);
                map.warnings.push(message);
            }
            map.by_name.insert(name, ids[0]);
        }

        map
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub fn id_of(&self, name: &str) -> Option<i64> {
        self.by_name.get(name.trim()).copied()
    }

    pub fn entry_by_id(&self, id: i64) -> Option<&ReferenceEntry> {
        self.by_id.get(&id)
    }

    pub fn entry(&self, name: &str) -> Option<&ReferenceEntry> {
        self.id_of(name).and_then(|id| self.by_id.get(&id))
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn name_of(&self, id: i64) -> Option<String> {
        self.by_id
            .get(&id)
            .and_then(|entry| entry.record.get(self.kind.name_column()))
            .and_then(CellValue::as_text)
    }

    /// Record a row the caller just inserted so later rows of the same batch
    /// resolve to it.
    pub fn insert(&mut self, name: &str, id: i64, record: Record) {
        self.by_name.entry(name.trim().to_string()).or_insert(id);
        self.by_id.insert(id, ReferenceEntry { id, record });
    }

    /// Duplicate-name warnings found while building the map.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Maps for every reference kind a pipeline run touches.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    maps: BTreeMap<ReferenceKind, ReferenceMap>,
}

impl ReferenceSet {
    pub fn get(&self, kind: ReferenceKind) -> Option<&ReferenceMap> {
        self.maps.get(&kind)
    }

    pub fn get_mut(&mut self, kind: ReferenceKind) -> &mut ReferenceMap {
        self.maps
            .entry(kind)
            .or_insert_with(|| ReferenceMap::empty(kind))
    }

    pub fn warnings(&self) -> Vec<String> {
        self.maps
            .values()
            .flat_map(|map| map.warnings().iter().cloned())
            .collect()
    }
}

pub struct ReferenceResolver<'a> {
    store: &'a Store,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Scan the kind's table. A failed read is logged and yields an empty map;
    /// callers turn the resulting missing ids into per-row rejections.
    pub fn resolve(&self, kind: ReferenceKind) -> ReferenceMap {
        match self.store.select_all(kind.table()) {
            Ok(table) => ReferenceMap::from_table(kind, &table),
            Err(e) => {
                warn!("Could not read {}: {}", kind.table(), e);
                ReferenceMap::empty(kind)
            }
        }
    }

    pub fn resolve_all(&self, kinds: impl IntoIterator<Item = ReferenceKind>) -> ReferenceSet {
        let mut set = ReferenceSet::default();
        for kind in kinds {
            set.maps.insert(kind, self.resolve(kind));
        }
        set
    }

    /// Resolve a list of names in one go. Missing names map to `None`.
    pub fn resolve_names(
        &self,
        kind: ReferenceKind,
        names: &[String],
    ) -> BTreeMap<String, Option<i64>> {
        let map = self.resolve(kind);
        names
            .iter()
            .map(|name| (name.clone(), map.id_of(name)))
            .collect()
    }
}

/// Unit cost of an HR category for a year.
///
/// The most specific row wins: PO and department both matching, then PO with no
/// department, then a row with neither. Without a PO filter any row for the
/// category and year is accepted. A PO or department filter naming nothing known
/// matches nothing.
pub fn hr_unit_cost(
    store: &Store,
    category: &str,
    year: i64,
    po: Option<&str>,
    department: Option<&str>,
) -> Result<Option<f64>> {
    let resolver = ReferenceResolver::new(store);
    let Some(category_id) = resolver.resolve(ReferenceKind::HrCategory).id_of(category) else {
        return Ok(None);
    };
    let po_id = match po {
        Some(name) => match resolver.resolve(ReferenceKind::Po).id_of(name) {
            Some(id) => Some(id),
            None => return Ok(None),
        },
        None => None,
    };
    let department_id = match department {
        Some(name) => match resolver.resolve(ReferenceKind::Department).id_of(name) {
            Some(id) => Some(id),
            None => return Ok(None),
        },
        None => None,
    };
    unit_cost_by_ids(store, category_id, year, po_id, department_id)
}

/// [`hr_unit_cost`] with every filter already resolved to an id.
pub fn unit_cost_by_ids(
    store: &Store,
    category_id: i64,
    year: i64,
    po_id: Option<i64>,
    department_id: Option<i64>,
) -> Result<Option<f64>> {
    let mut stmt = store.conn().prepare_cached(
        "SELECT cost, po_id, department_id FROM human_resource_cost
         WHERE category_id = ?1 AND year = ?2 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![category_id, year], |row| {
        Ok((
            row.get::<_, Option<f64>>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, Option<i64>>(2)?,
        ))
    })?;

    let mut best: Option<(u8, f64)> = None;
    for row in rows {
        let (cost, row_po, row_department) = row?;
        let Some(cost) = cost else { continue };
        let score = match (po_id, row_po, row_department) {
            (Some(p), Some(rp), Some(rd)) if p == rp && department_id == Some(rd) => 3,
            (Some(p), Some(rp), None) if p == rp => 2,
            (_, None, None) => 1,
            (None, _, _) => 0,
            _ => continue,
        };
        if best.map_or(true, |(current, _)| score > current) {
            best = Some((score, cost));
        }
    }

    Ok(best.map(|(_, cost)| cost))
}
