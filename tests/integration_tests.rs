use planning_ledger::*;
use std::path::Path;
use tempfile::TempDir;

fn load_csv(path: &Path) -> anyhow::Result<UploadBatch> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut batch = UploadBatch::default();
    for record in reader.records() {
        let record = record?;
        let row: BatchRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| {
                let cell = if value.trim().is_empty() {
                    CellValue::Null
                } else {
                    CellValue::text(value)
                };
                (header.to_string(), cell)
            })
            .collect();
        batch.push(row);
    }
    Ok(batch)
}

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn open_ledger(dir: &TempDir, mode: ReferenceMode) -> PlanningLedger {
    let config = PlanningConfig {
        reference_mode: mode,
        ..PlanningConfig::with_database(dir.path().join("planning.db"))
    };
    PlanningLedger::open(config).unwrap()
}

fn names(header: &str, values: &[&str]) -> Vec<BatchRow> {
    values
        .iter()
        .map(|value| {
            let mut row = BatchRow::new();
            row.insert(header.to_string(), CellValue::text(*value));
            row
        })
        .collect()
}

fn with_cells(mut row: BatchRow, cells: &[(&str, CellValue)]) -> BatchRow {
    for (header, value) in cells {
        row.insert(header.to_string(), value.clone());
    }
    row
}

/// PO1 → Dept1, category CatA, project ProjA (2024).
fn seed_references(ledger: &PlanningLedger) {
    ledger
        .add_references(ReferenceKind::Po, &names("PO", &["PO1"]))
        .unwrap();
    let department = with_cells(
        names("Department", &["Dept1"]).remove(0),
        &[("PO", CellValue::text("PO1"))],
    );
    ledger
        .add_references(ReferenceKind::Department, &[department])
        .unwrap();
    ledger
        .add_references(
            ReferenceKind::ProjectCategory,
            &names("Project Category", &["CatA"]),
        )
        .unwrap();
    let project = with_cells(
        names("Project Name", &["ProjA"]).remove(0),
        &[
            ("Project Category", CellValue::text("CatA")),
            ("Department", CellValue::text("Dept1")),
            ("Fiscal Year", CellValue::Int(2024)),
        ],
    );
    ledger
        .add_references(ReferenceKind::Project, &[project])
        .unwrap();
}

fn forecast_batch(department: &str, value: f64) -> UploadBatch {
    UploadBatch::from_json_str(&format!(
        r#"[{{"PO": "PO1", "Department": "{}", "Project": "ProjA",
              "fiscal_year": 2024, "non_personnel_expense": {}}}]"#,
        department, value
    ))
    .unwrap()
}

#[test]
fn test_forecast_upload_scenario() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(&dir, ReferenceMode::Reject);
    seed_references(&ledger);

    let first = ledger
        .upsert(FactKind::ForecastNonPersonnel, &forecast_batch("Dept1", 500.0))
        .unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(
        first.status_message(),
        "1 row inserted into project_forecasts_nonpc"
    );

    let stored = ledger.store().select_all("project_forecasts_nonpc").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored.rows[0]["po_id"], CellValue::Int(1));
    assert_eq!(stored.rows[0]["department_id"], CellValue::Int(1));
    assert_eq!(stored.rows[0]["project_id"], CellValue::Int(1));

    let changed = ledger
        .upsert(FactKind::ForecastNonPersonnel, &forecast_batch("Dept1", 700.0))
        .unwrap();
    assert_eq!(changed.inserted, 0);
    assert_eq!(changed.status_message(), "Value already exists");

    let unknown = ledger
        .upsert(FactKind::ForecastNonPersonnel, &forecast_batch("Unknown", 500.0))
        .unwrap();
    assert_eq!(unknown.inserted, 0);
    assert_eq!(unknown.rejected.len(), 1);
    assert_eq!(unknown.rejected[0].reason.to_string(), "unresolved department");
    assert!(unknown
        .status_message()
        .contains("row 0: unresolved department 'Unknown'"));

    assert_eq!(
        ledger.store().row_count("project_forecasts_nonpc").unwrap(),
        1
    );
    assert_eq!(ledger.store().row_count("departments").unwrap(), 1);
}

#[test]
fn test_csv_upload_creates_references() {
    let dir = TempDir::new().unwrap();
    let config = PlanningConfig {
        reference_mode: ReferenceMode::Create,
        ..PlanningConfig::with_database(dir.path().join("nested").join("planning.db"))
    };
    let ledger = PlanningLedger::open(config).unwrap();
    let batch = load_csv(&fixture("nonpc_forecasts.csv")).unwrap();
    assert_eq!(batch.len(), 4);

    let report = ledger.upsert(FactKind::ForecastNonPersonnel, &batch).unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.repeated_in_batch, 1);
    assert!(report.rejected.is_empty());
    assert_eq!(report.created_references.len(), 8);
    assert!(report
        .created_references
        .iter()
        .any(|c| c.kind == ReferenceKind::Io && c.name == "4711"));

    let projects = ledger.store().select_all("projects").unwrap();
    let proj_b = projects
        .rows
        .iter()
        .find(|row| row["name"] == CellValue::text("ProjB"))
        .unwrap();
    assert_eq!(proj_b["category_id"], CellValue::Int(2));
    assert_eq!(proj_b["department_id"], CellValue::Int(2));

    let again = ledger.upsert(FactKind::ForecastNonPersonnel, &batch).unwrap();
    assert_eq!(again.inserted, 0);
    assert!(again.created_references.is_empty());
    assert!(dir.path().join("nested").join("planning.db").exists());
}

#[test]
fn test_second_connection_sees_new_references() {
    let dir = TempDir::new().unwrap();
    let writer = open_ledger(&dir, ReferenceMode::Create);
    let reader = open_ledger(&dir, ReferenceMode::Reject);

    let report = writer
        .upsert(FactKind::ForecastNonPersonnel, &forecast_batch("Dept1", 500.0))
        .unwrap();
    assert_eq!(report.inserted, 1);

    // Same key from the other handle: references resolve, the row is a duplicate.
    let report = reader
        .upsert(FactKind::ForecastNonPersonnel, &forecast_batch("Dept1", 500.0))
        .unwrap();
    assert!(report.rejected.is_empty());
    assert_eq!(report.already_present, 1);

    let resolved = ReferenceResolver::new(reader.store())
        .resolve_names(ReferenceKind::Department, &["Dept1".to_string()]);
    assert_eq!(resolved["Dept1"], Some(1));
}

#[test]
fn test_department_name_is_unique_across_pos() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(&dir, ReferenceMode::Reject);
    ledger
        .add_references(ReferenceKind::Po, &names("PO", &["PO1", "PO2"]))
        .unwrap();

    let rows = vec![
        with_cells(
            names("Department", &["Dept1"]).remove(0),
            &[("PO", CellValue::text("PO1"))],
        ),
        with_cells(
            names("Department", &["Dept1"]).remove(0),
            &[("PO", CellValue::text("PO2"))],
        ),
    ];
    let report = ledger
        .add_references(ReferenceKind::Department, &rows)
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.repeated_in_batch, 1);
    assert_eq!(ledger.store().row_count("departments").unwrap(), 1);
}

#[test]
fn test_replace_years_from_config_file() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("planning.db");
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "database_path": db_path,
            "reference_mode": "create",
            "upload_mode": "replace_years"
        })
        .to_string(),
    )
    .unwrap();

    let config = PlanningConfig::from_path(&config_path).unwrap();
    assert_eq!(config.upload_mode, UploadMode::ReplaceYears);
    let ledger = PlanningLedger::open(config).unwrap();

    let budgets = |hr: f64| {
        UploadBatch::from_json_str(&format!(
            r#"[{{"PO": "PO1", "Department": "Dept1", "fiscal_year": 2025,
                  "Human Resources Budget": {}}},
                {{"PO": "PO1", "Department": "Dept2", "fiscal_year": 2025,
                  "Human Resources Budget": 10}}]"#,
            hr
        ))
        .unwrap()
    };

    ledger.upsert(FactKind::Budget, &budgets(100.0)).unwrap();
    let report = ledger.upsert(FactKind::Budget, &budgets(250.0)).unwrap();
    assert_eq!(report.replaced, 2);
    assert_eq!(report.inserted, 2);

    let view = ledger
        .view(
            FactKind::Budget,
            &Selection {
                department: Some("Dept1".to_string()),
                ..Selection::default()
            },
        )
        .unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(
        view.rows[0]["Human Resources Budget"],
        CellValue::Float(250.0)
    );
}

#[test]
fn test_personnel_forecast_and_unit_cost() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(&dir, ReferenceMode::Reject);
    seed_references(&ledger);
    let category = with_cells(
        names("Human resource category", &["Engineer"]).remove(0),
        &[("PO", CellValue::text("PO1"))],
    );
    ledger
        .add_references(ReferenceKind::HrCategory, &[category])
        .unwrap();
    ledger
        .store()
        .conn()
        .execute(
            "INSERT INTO human_resource_cost (category_id, year, po_id, department_id, cost)
             VALUES (1, 2024, 1, NULL, 42.5)",
            [],
        )
        .unwrap();

    let batch = UploadBatch::from_json_str(
        r#"[{"PO": "PO1", "Department": "Dept1", "Project Name": "ProjA",
             "fiscal_year": 2024, "Human resource category": "Engineer",
             "Human resource FTE": 2, "Personnel cost": 85},
            {"PO": "PO1", "Department": "Dept1", "Project Name": "ProjA",
             "fiscal_year": 2024, "Human resource category": "Designer",
             "Human resource FTE": 1, "Personnel cost": 40}]"#,
    )
    .unwrap();
    let report = ledger.upsert(FactKind::ForecastPersonnel, &batch).unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.rejected[0].row, 1);
    assert_eq!(
        report.rejected[0].reason.to_string(),
        "unresolved hr category"
    );

    let cost = ledger
        .hr_unit_cost("Engineer", 2024, Some("PO1"), Some("Dept1"))
        .unwrap();
    assert_eq!(cost, Some(42.5));

    let view = ledger
        .view(FactKind::ForecastPersonnel, &Selection::default())
        .unwrap();
    assert_eq!(view.rows[0]["Personnel cost"], CellValue::Float(85.0));
}

#[test]
fn test_capex_expense_dates_and_rejections() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(&dir, ReferenceMode::Reject);
    seed_references(&ledger);

    let batch = UploadBatch::from_json_str(
        r#"[{"PO": "PO1", "Department": "Dept1", "CapYear": 2024, "Project Name": "ProjA",
             "CapEx Description": "Servers", "Expense": 12.5, "Date": "2024/06/30"},
            {"PO": "PO1", "Department": "Dept1", "CapYear": 2024, "Project Name": "ProjA",
             "CapEx Description": "Laptops", "Expense": 3, "Date": "end of June"}]"#,
    )
    .unwrap();
    let report = ledger.upsert(FactKind::CapexExpense, &batch).unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(
        report.rejected[0].describe(),
        "row 1: invalid expense_date 'end of June' (expected date (YYYY-MM-DD))"
    );

    let stored = ledger.store().select_all("capex_expenses").unwrap();
    assert_eq!(stored.rows[0]["expense_date"], CellValue::text("2024-06-30"));
    assert_eq!(stored.rows[0]["cap_year"], CellValue::Int(2024));
}

#[test]
fn test_report_serialization() {
    let dir = TempDir::new().unwrap();
    let ledger = open_ledger(&dir, ReferenceMode::Reject);
    let report = ledger
        .upsert(FactKind::ForecastNonPersonnel, &forecast_batch("Dept1", 1.0))
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["table"], "project_forecasts_nonpc");
    assert_eq!(json["inserted"], 0);
    let reasons: Vec<&str> = json["rejected"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["reason"].as_str().unwrap())
        .collect();
    assert!(reasons.iter().all(|r| *r == "unresolved"));
    assert_eq!(reasons.len(), 3);
}

#[test]
fn test_schema_generation() {
    let schema = UploadBatch::schema_as_json().unwrap();
    assert!(schema.contains("\"type\": \"array\""));

    let config = PlanningConfig::from_json_str(r#"{"database_path": "", "busy_timeout_ms": 10}"#);
    assert!(matches!(config, Err(PlanningError::InvalidConfig(_))));
}
