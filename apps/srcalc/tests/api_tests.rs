//! Integration tests for the srcalc HTTP API.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};
use srcalc::api::{AppState, create_router};
use srcalc::config::ServerConfig;
use srcalc::fixture::load_fixture;
use srcalc_core::vista::RpcPatientDao;
use srcalc_core::{Catalog, CatalogStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn demos() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos")
}

fn server_with(config: ServerConfig) -> (TestServer, TempDir) {
    let temp = tempfile::tempdir().unwrap();
    let store = CatalogStore::create(temp.path().join("srcalc.redb")).unwrap();
    let catalog: Catalog =
        serde_json::from_str(&std::fs::read_to_string(demos().join("catalog.json")).unwrap())
            .unwrap();
    store.import_catalog(&catalog).unwrap();

    let caller = load_fixture(demos().join("vista-fixture.json")).unwrap();
    let patients = Arc::new(
        RpcPatientDao::new(caller, "11716").with_health_factors(["CURRENT SMOKER"]),
    );

    let state = AppState::new(store, patients, &config);
    (TestServer::new(create_router(state)).unwrap(), temp)
}

fn server() -> (TestServer, TempDir) {
    server_with(ServerConfig::default())
}

fn complete_values() -> Value {
    json!({
        "procedure": "Esophagectomy",
        "age": 68,
        "gender": "Male",
        "albumin": 3.1,
        "wbc": 12.5,
        "copd": true,
        "dnr": false
    })
}

// =============================================================================
// CATALOG ROUTES
// =============================================================================

#[tokio::test]
async fn test_health() {
    let (server, _temp) = server();

    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_list_specialties() {
    let (server, _temp) = server();

    let body = server.get("/specialties").await.json::<Value>();
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Thoracic", "General Surgery"]);
}

#[tokio::test]
async fn test_specialty_variables_grouped() {
    let (server, _temp) = server();

    let body = server.get("/specialties/1/variables").await.json::<Value>();
    let groups = body["groups"].as_array().unwrap();
    assert_eq!(groups[0]["group"]["name"], "Planned Procedure");
    assert_eq!(groups.len(), 4);
}

#[tokio::test]
async fn test_unknown_specialty_is_not_found() {
    let (server, _temp) = server();

    let response = server.get("/specialties/99/variables").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["code"], "NOT_FOUND");
}

// =============================================================================
// PATIENT ROUTES
// =============================================================================

#[tokio::test]
async fn test_get_patient() {
    let (server, _temp) = server();

    let response = server.get("/patients/500").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["name"], "TESTPATIENT");
    assert_eq!(body["gender"], "Male");
    assert_eq!(body["labs"]["Albumin"]["value"], 3.0);
}

#[tokio::test]
async fn test_get_patient_permission_denied() {
    let (server, _temp) = server();

    server
        .get("/patients/13")
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_patient_is_not_found() {
    let (server, _temp) = server();

    server
        .get("/patients/42")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// CALCULATION ROUTES
// =============================================================================

#[tokio::test]
async fn test_calculation_succeeds() {
    let (server, _temp) = server();

    let response = server
        .post("/calculations")
        .json(&json!({ "specialty_id": 1, "values": complete_values() }))
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    let mortality = body["outcomes"]["Thoracic 30-Day Mortality"].as_f64().unwrap();
    assert!((mortality - 34.07).abs() < 0.01);
}

#[tokio::test]
async fn test_calculation_lists_missing_and_invalid_values() {
    let (server, _temp) = server();

    let response = server
        .post("/calculations")
        .json(&json!({ "specialty_id": 1, "values": { "albumin": -1, "copd": "maybe" } }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body = response.json::<Value>();
    assert_eq!(body["code"], "INVALID_VALUES");
    assert_eq!(body["invalid"].as_array().unwrap().len(), 2);
    let missing: Vec<&str> = body["missing"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["key"].as_str().unwrap())
        .collect();
    assert_eq!(missing, vec!["age", "dnr", "gender", "procedure", "wbc"]);
}

#[tokio::test]
async fn test_calculation_prefilled_from_patient() {
    let (server, _temp) = server();

    let response = server
        .post("/calculations")
        .json(&json!({
            "specialty_id": 1,
            "dfn": 500,
            "values": { "procedure": "Lung resection", "copd": false, "dnr": false }
        }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["patient_dfn"], 500);
}

// =============================================================================
// NOTE ROUTES
// =============================================================================

#[tokio::test]
async fn test_save_note() {
    let (server, _temp) = server();

    let response = server
        .post("/notes")
        .json(&json!({
            "dfn": 500,
            "signature": "signme",
            "specialty_id": 1,
            "values": complete_values()
        }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["result"], "Success");
}

#[tokio::test]
async fn test_save_note_requires_signature() {
    let (server, _temp) = server();

    server
        .post("/notes")
        .json(&json!({
            "dfn": 500,
            "signature": " ",
            "specialty_id": 1,
            "values": complete_values()
        }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let (server, _temp) = server_with(ServerConfig {
        api_key: Some("secret".to_string()),
        ..ServerConfig::default()
    });

    server.get("/health").await.assert_status_ok();
    server
        .get("/specialties")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/specialties")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("wrong"),
        )
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/specialties")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("secret"),
        )
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_rate_limit() {
    let (server, _temp) = server_with(ServerConfig {
        rate_limit_per_second: 1,
        ..ServerConfig::default()
    });

    server.get("/specialties").await.assert_status_ok();
    server
        .get("/specialties")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}
