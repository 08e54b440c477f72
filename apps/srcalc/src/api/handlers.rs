//! Route handlers.
//!
//! VistA calls are blocking and run on the blocking pool.

use super::AppState;
use super::types::{
    ApiError, CalculationRequest, HealthResponse, NoteRequest, NoteResponse, VariablesResponse,
};
use crate::cli::calculate;
use axum::Json;
use axum::extract::{Path, State};
use srcalc_core::{
    Calculation, CalculationResult, Gender, Patient, RawInput, Specialty, specialty_display_groups,
};
use std::collections::BTreeMap;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn list_specialties(
    State(state): State<AppState>,
) -> Result<Json<Vec<Specialty>>, ApiError> {
    Ok(Json(state.store.specialties()?))
}

pub async fn specialty_variables(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<VariablesResponse>, ApiError> {
    let catalog = state.store.load_catalog()?;
    let groups = specialty_display_groups(&catalog, id)?;
    Ok(Json(VariablesResponse {
        specialty_id: id,
        groups,
    }))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(dfn): Path<u32>,
) -> Result<Json<Patient>, ApiError> {
    Ok(Json(load_patient(&state, dfn).await?))
}

pub async fn run_calculation(
    State(state): State<AppState>,
    Json(request): Json<CalculationRequest>,
) -> Result<Json<CalculationResult>, ApiError> {
    let result = evaluate(&state, request.specialty_id, request.dfn, request.values).await?;
    Ok(Json(result))
}

pub async fn save_note(
    State(state): State<AppState>,
    Json(request): Json<NoteRequest>,
) -> Result<Json<NoteResponse>, ApiError> {
    if request.signature.trim().is_empty() {
        return Err(ApiError::BadRequest("signature is required".to_string()));
    }

    let result = evaluate(
        &state,
        request.specialty_id,
        Some(request.dfn),
        request.values,
    )
    .await?;
    let body = result.build_note_body();

    let patients = state.patients.clone();
    let code = tokio::task::spawn_blocking(move || {
        patients.save_risk_calculation_note(request.dfn, &request.signature, &body)
    })
    .await??;

    Ok(Json(NoteResponse { result: code }))
}

// =============================================================================
// HELPERS
// =============================================================================

async fn load_patient(state: &AppState, dfn: u32) -> Result<Patient, ApiError> {
    let patients = state.patients.clone();
    let patient = tokio::task::spawn_blocking(move || patients.get_patient(dfn)).await??;
    Ok(patient)
}

async fn evaluate(
    state: &AppState,
    specialty_id: u32,
    dfn: Option<u32>,
    values: BTreeMap<String, RawInput>,
) -> Result<CalculationResult, ApiError> {
    let catalog = state.store.load_catalog()?;
    let patient = match dfn {
        Some(dfn) => load_patient(state, dfn).await?,
        None => Patient::new(0, "", Gender::Unknown, 0),
    };
    let calculation = Calculation::start(&catalog, specialty_id, patient)?;
    Ok(calculate(&calculation, &values, dfn.is_some())?)
}
