//! Integration tests for srcalc CLI commands.
//!
//! Uses tempfile for the catalog database and value files.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use srcalc::cli::{
    CliError, cmd_calculate, cmd_init, cmd_patient, cmd_specialties, cmd_variables, open_store,
};
use srcalc::config::AppConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn demos() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

/// Create a temporary directory for tests.
fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Create and populate a database from the demo catalog.
fn init_db(dir: &TempDir) -> PathBuf {
    let db_path = dir.path().join("srcalc.redb");
    cmd_init(&db_path, &demos().join("catalog.json"), false).unwrap();
    db_path
}

fn write_values(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("values.json");
    std::fs::write(&path, content).unwrap();
    path
}

fn fixture_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.vista.fixture = Some(demos().join("vista-fixture.json"));
    config
}

// =============================================================================
// INIT COMMAND TESTS
// =============================================================================

#[test]
fn test_init_imports_catalog() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    assert!(db_path.exists());
    let catalog = open_store(&db_path).unwrap().load_catalog().unwrap();
    assert_eq!(catalog.specialties.len(), 2);
    assert_eq!(catalog.models.len(), 2);
    assert_eq!(catalog.variables.len(), 7);
}

#[test]
fn test_init_fails_if_exists_without_force() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let result = cmd_init(&db_path, &demos().join("catalog.json"), false);
    assert!(matches!(result, Err(CliError::AlreadyExists(_))));
}

#[test]
fn test_init_succeeds_with_force() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let result = cmd_init(&db_path, &demos().join("catalog.json"), true);
    assert!(result.is_ok());
}

#[test]
fn test_init_rejects_invalid_catalog() {
    let temp = create_temp_dir();
    let catalog_path = temp.path().join("catalog.json");
    std::fs::write(
        &catalog_path,
        r#"{
            "groups": [{ "id": 1, "name": "Clinical Conditions", "display_order": 0 }],
            "variables": [
                { "key": "bad key", "display_name": "Bad", "help_text": null,
                  "group_id": 1, "retrieval": null, "kind": "Boolean" }
            ],
            "models": [],
            "specialties": []
        }"#,
    )
    .unwrap();
    let db_path = temp.path().join("srcalc.redb");

    let result = cmd_init(&db_path, &catalog_path, false);
    assert!(matches!(result, Err(CliError::Storage(_))));
    assert!(!db_path.exists());
}

#[test]
fn test_commands_require_init() {
    let temp = create_temp_dir();
    let db_path = temp.path().join("missing.redb");

    assert!(matches!(
        cmd_specialties(&db_path),
        Err(CliError::NotInitialized(_))
    ));
}

// =============================================================================
// CATALOG COMMAND TESTS
// =============================================================================

#[test]
fn test_specialties_lists_all() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let output = cmd_specialties(&db_path).unwrap();
    assert!(output.contains("Thoracic"));
    assert!(output.contains("General Surgery"));
}

#[test]
fn test_variables_grouped_in_display_order() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let output = cmd_variables(&db_path, 1).unwrap();
    let position = |s: &str| output.find(s).unwrap();
    assert!(position("Planned Procedure") < position("Demographics"));
    assert!(position("Demographics") < position("Clinical Conditions"));
    assert!(position("Clinical Conditions") < position("Laboratory Values"));
    assert!(output.contains("Esophagectomy"));
}

#[test]
fn test_variables_of_specialty_with_one_model() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let output = cmd_variables(&db_path, 2).unwrap();
    assert!(output.contains("dnr"));
    // Only the morbidity model: no procedure or white blood count.
    assert!(!output.contains("procedure"));
    assert!(!output.contains("wbc"));
}

#[test]
fn test_variables_unknown_specialty() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    assert!(matches!(
        cmd_variables(&db_path, 99),
        Err(CliError::Calculation(_))
    ));
}

// =============================================================================
// CALCULATE COMMAND TESTS
// =============================================================================

#[test]
fn test_calculate_complete_values() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let output = cmd_calculate(
        &AppConfig::default(),
        &db_path,
        1,
        &demos().join("values.json"),
        None,
        false,
    )
    .unwrap();

    assert!(output.contains("Thoracic 30-Day Mortality"));
    assert!(output.contains("34.1%"));
    assert!(output.contains("3.2%"));
}

#[test]
fn test_calculate_json_output() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);

    let output = cmd_calculate(
        &AppConfig::default(),
        &db_path,
        1,
        &demos().join("values.json"),
        None,
        true,
    )
    .unwrap();

    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["specialty"], "Thoracic");
    assert_eq!(json["values"][0]["key"], "procedure");
    assert_eq!(json["outcomes"].as_object().unwrap().len(), 2);
}

#[test]
fn test_calculate_reports_every_problem() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);
    let values = write_values(&temp, r#"{ "age": 1000, "gender": "Other", "copd": true }"#);

    let result = cmd_calculate(&AppConfig::default(), &db_path, 1, &values, None, false);
    let Err(CliError::Rejected(rejection)) = result else {
        panic!("expected a rejection");
    };

    let invalid: Vec<&str> = rejection.invalid.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(invalid, vec!["age", "gender"]);
    let missing: Vec<&str> = rejection.missing.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(missing, vec!["albumin", "dnr", "procedure", "wbc"]);
}

#[test]
fn test_calculate_prefills_from_patient() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);
    let values = write_values(
        &temp,
        r#"{ "procedure": "Lung resection", "copd": false, "dnr": false }"#,
    );

    let output = cmd_calculate(&fixture_config(), &db_path, 1, &values, Some(500), true).unwrap();

    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["patient_dfn"], 500);
    let age = json["values"]
        .as_array()
        .unwrap()
        .iter()
        .find(|v| v["key"] == "age")
        .unwrap();
    assert_eq!(age["display"], "68");
}

#[test]
fn test_calculate_entered_values_override_prefill() {
    let temp = create_temp_dir();
    let db_path = init_db(&temp);
    let values = write_values(
        &temp,
        r#"{ "procedure": "Lung resection", "age": 80, "copd": false, "dnr": false }"#,
    );

    let output = cmd_calculate(&fixture_config(), &db_path, 1, &values, Some(500), false).unwrap();
    assert!(output.contains("80"));
}

// =============================================================================
// PATIENT COMMAND TESTS
// =============================================================================

#[test]
fn test_patient_from_fixture() {
    let output = cmd_patient(&fixture_config(), 500).unwrap();

    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["name"], "TESTPATIENT");
    assert_eq!(json["age"], 68);
    assert_eq!(json["health_factors"].as_array().unwrap().len(), 1);
    assert_eq!(json["active_medications"][0], "METOPROLOL TARTRATE 50MG TAB");
}

#[test]
fn test_patient_permission_denied() {
    let result = cmd_patient(&fixture_config(), 13);
    assert!(matches!(result, Err(CliError::DataAccess(_))));
}

#[test]
fn test_patient_without_fixture_fails() {
    let result = cmd_patient(&AppConfig::default(), 500);
    assert!(result.is_err());
}
