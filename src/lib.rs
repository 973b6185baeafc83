//! # Planning Ledger
//!
//! Merge-upsert of spreadsheet-style uploads into a financial planning database
//! (forecasts, budgets, fundings, expenses and their CapEx counterparts).
//!
//! ## Core Concepts
//!
//! - **Upload Batch**: rows keyed by display headers ("PO", "Department", "Project Name")
//! - **Reference tables**: POs, departments, project categories, projects, IOs and HR
//!   categories, referred to by name in uploads and by id in storage
//! - **Composite key**: the columns that identify a fact; value columns outside the key
//!   may change without producing a second row
//! - **Anti-join**: only batch rows whose key is absent from the table are appended
//!
//! ## Example
//!
//! ```rust,ignore
//! use planning_ledger::*;
//!
//! let ledger = PlanningLedger::open(PlanningConfig::with_database("planning.db"))?;
//! let batch = UploadBatch::from_json_str(
//!     r#"[{"PO": "PO1", "Department": "Dept1", "Project Name": "ProjA",
//!          "fiscal_year": 2024, "non_personnel_expense": 500}]"#,
//! )?;
//! let report = ledger.upsert(FactKind::ForecastNonPersonnel, &batch)?;
//! println!("{}", report.status_message());
//! ```

pub mod appender;
pub mod config;
pub mod dedup;
pub mod display;
pub mod error;
pub mod normalize;
pub mod references;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod upsert;

pub use config::{PlanningConfig, ReferenceMode, UploadMode};
pub use display::{view_facts, Selection};
pub use error::{PlanningError, RejectionReason, Result, RowRejection};
pub use normalize::{ColumnSpec, ColumnType, FactLayout};
pub use references::add_reference_entries;
pub use resolver::{hr_unit_cost, ReferenceMap, ReferenceResolver};
pub use schema::*;
pub use store::Store;
pub use upsert::{
    merge_upsert, upsert_facts, CreatedReference, MergeUpsert, UpsertOptions, UpsertReport,
};

use log::{debug, info};

/// A planning database plus the settings uploads run with.
pub struct PlanningLedger {
    store: Store,
    config: PlanningConfig,
}

impl PlanningLedger {
    pub fn open(config: PlanningConfig) -> Result<Self> {
        let store = Store::open(&config)?;
        info!(
            "Planning ledger ready at {} ({:?} references, {:?} uploads)",
            config.database_path.display(),
            config.reference_mode,
            config.upload_mode
        );
        Ok(Self { store, config })
    }

    /// Wrap an already opened store, e.g. an in-memory one.
    pub fn with_store(store: Store, config: PlanningConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &PlanningConfig {
        &self.config
    }

    /// Upsert on the fact table's business key.
    pub fn upsert(&self, kind: FactKind, batch: &UploadBatch) -> Result<UpsertReport> {
        debug!("Upload of {} rows for '{}'", batch.len(), kind.title());
        upsert_facts(&self.store, &self.config, kind, batch)
    }

    /// Upsert into a table named by the caller, with an explicit key.
    pub fn merge_upsert(
        &self,
        target_table: &str,
        batch: &UploadBatch,
        key_columns: &[&str],
        excluded_value_columns: &[&str],
    ) -> Result<UpsertReport> {
        let kind = FactKind::from_table(target_table)?;
        MergeUpsert::new(&self.store, UpsertOptions::from(&self.config)).run(
            kind,
            batch,
            key_columns,
            excluded_value_columns,
        )
    }

    pub fn add_references(&self, kind: ReferenceKind, rows: &[BatchRow]) -> Result<UpsertReport> {
        add_reference_entries(&self.store, kind, rows, self.config.dedup_within_batch)
    }

    pub fn view(&self, kind: FactKind, selection: &Selection) -> Result<Table> {
        view_facts(&self.store, kind, selection)
    }

    pub fn hr_unit_cost(
        &self,
        category: &str,
        year: i64,
        po: Option<&str>,
        department: Option<&str>,
    ) -> Result<Option<f64>> {
        hr_unit_cost(&self.store, category, year, po, department)
    }
}
