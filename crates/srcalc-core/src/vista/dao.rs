//! Patient data access over remote procedure calls.

use super::notes::parse_reference_notes;
use super::parse::{
    BMI_LINE, HEIGHT_LINE, WEIGHT_LINE, parse_bmi, parse_demographics, parse_health_factor,
    parse_height, parse_lab, parse_medication, parse_operation_result, parse_weight,
    parse_weight_history, weight_history_arg, wrap_note,
};
use super::procedure::{ProcedureCaller, RemoteProcedure, RpcArg, RpcError};
use crate::patient::{Patient, ReferenceNote, VistaLab};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Title of the nursing notes holding the ADL status.
pub const ADL_NOTE_TITLE: &str = "NURSING ADMISSION EVALUATION NOTE";

/// Title substring of DNR notes.
pub const DNR_NOTE_SUBSTRING: &str = "DNR";

/// Outcome of saving a progress note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveNoteCode {
    Success,
    InvalidSignature,
}

/// Failures of a patient data operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataAccessError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Retrying will not help (bad patient, unexpected response).
    #[error("{0}")]
    NonTransient(String),

    /// The operation may succeed if retried.
    #[error("temporary failure: {0}")]
    Recoverable(String),
}

/// Source of patient data, and sink for progress notes.
pub trait PatientSource: Send + Sync {
    /// Load a patient. Only the demographics are required; every other
    /// category is loaded on a best-effort basis.
    fn get_patient(&self, dfn: u32) -> Result<Patient, DataAccessError>;

    /// Sign and save a risk calculation note for the patient.
    fn save_risk_calculation_note(
        &self,
        dfn: u32,
        signature: &str,
        body: &str,
    ) -> Result<SaveNoteCode, DataAccessError>;
}

/// [`PatientSource`] backed by VistA remote procedures, acting as one user.
#[derive(Debug)]
pub struct RpcPatientDao<C> {
    caller: C,
    duz: String,
    health_factors: BTreeSet<String>,
}

impl<C: ProcedureCaller> RpcPatientDao<C> {
    #[must_use]
    pub fn new(caller: C, duz: impl Into<String>) -> Self {
        Self {
            caller,
            duz: duz.into(),
            health_factors: BTreeSet::new(),
        }
    }

    /// Only health factors with these names are kept.
    #[must_use]
    pub fn with_health_factors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.health_factors = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn caller(&self) -> &C {
        &self.caller
    }

    #[must_use]
    pub fn duz(&self) -> &str {
        &self.duz
    }

    fn call(&self, procedure: RemoteProcedure, args: &[RpcArg]) -> Result<Vec<String>, RpcError> {
        tracing::debug!(procedure = %procedure, duz = %self.duz, "calling remote procedure");
        self.caller.call(&self.duz, procedure, args)
    }

    // =========================================================================
    // BEST-EFFORT CATEGORIES
    // =========================================================================

    fn load_vitals(&self, patient: &mut Patient, dfn: &RpcArg) {
        let lines = match self.call(RemoteProcedure::GetRecentVitals, std::slice::from_ref(dfn)) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(error = %e, "unable to retrieve recent vitals");
                return;
            }
        };
        // A single line is VistA's "no vitals" message.
        if lines.len() <= 1 {
            return;
        }

        patient.height = best_effort("height", line(&lines, HEIGHT_LINE).and_then(|l| {
            parse_height(l).map_err(|e| e.to_string())
        }));
        patient.weight = best_effort("weight", line(&lines, WEIGHT_LINE).and_then(|l| {
            parse_weight(l).map_err(|e| e.to_string())
        }));
        if let Some(weight) = &patient.weight {
            let measured_at = weight.measured_at;
            patient.bmi = best_effort("bmi", line(&lines, BMI_LINE).and_then(|l| {
                parse_bmi(l, measured_at).map_err(|e| e.to_string())
            }));
        }
    }

    fn load_weight_6_months_ago(&self, patient: &mut Patient) {
        let Some(weight) = &patient.weight else {
            return;
        };
        let arg = RpcArg::literal(weight_history_arg(patient.dfn, weight.measured_at));
        let result = self
            .call(RemoteProcedure::GetVital, &[arg])
            .map_err(|e| e.to_string())
            .and_then(|lines| parse_weight_history(&lines).map_err(|e| e.to_string()));
        patient.weight_6_months_ago = best_effort("weight 6 months ago", result).flatten();
    }

    fn load_labs(&self, patient: &mut Patient, dfn: &RpcArg) {
        for lab in VistaLab::ALL {
            let args = [dfn.clone(), RpcArg::list(lab.possible_names().iter().copied())];
            let result = self
                .call(RemoteProcedure::GetLabs, &args)
                .map_err(|e| e.to_string())
                .and_then(|lines| match lines.first() {
                    Some(first) if !first.is_empty() => {
                        parse_lab(first).map(Some).map_err(|e| e.to_string())
                    }
                    _ => Ok(None),
                });
            match result {
                Ok(Some(value)) => {
                    patient.labs.insert(lab, value);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(lab = ?lab, error = %e, "unable to retrieve lab"),
            }
        }
    }

    fn load_health_factors(&self, patient: &mut Patient, dfn: &RpcArg) {
        let lines = match self.call(RemoteProcedure::GetHealthFactors, std::slice::from_ref(dfn)) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(error = %e, "unable to retrieve health factors");
                return;
            }
        };
        for line in &lines {
            match parse_health_factor(line) {
                Ok(factor) if self.health_factors.contains(&factor.name) => {
                    patient.health_factors.push(factor);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping health factor"),
            }
        }
    }

    fn load_medications(&self, patient: &mut Patient, dfn: &RpcArg) {
        let lines = match self.call(RemoteProcedure::GetActiveMedications, std::slice::from_ref(dfn)) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!(error = %e, "unable to retrieve active medications");
                return;
            }
        };
        for line in &lines {
            match parse_medication(line) {
                Ok(name) => patient.active_medications.push(name),
                Err(e) => tracing::warn!(error = %e, "skipping medication"),
            }
        }
    }

    fn load_notes(&self, procedure: RemoteProcedure, dfn: &RpcArg, title: &str) -> Vec<ReferenceNote> {
        let result = self
            .call(procedure, &[dfn.clone(), RpcArg::literal(title)])
            .map_err(|e| e.to_string())
            .and_then(|lines| {
                if lines.is_empty() {
                    Ok(Vec::new())
                } else {
                    parse_reference_notes(&lines).map_err(|e| e.to_string())
                }
            });
        best_effort(title, result).unwrap_or_default()
    }
}

fn line(lines: &[String], index: usize) -> Result<&str, String> {
    lines
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("no line {} in vitals", index))
}

fn best_effort<T, E: fmt::Display>(category: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(category, error = %e, "unable to retrieve patient data");
            None
        }
    }
}

impl<C: ProcedureCaller> PatientSource for RpcPatientDao<C> {
    fn get_patient(&self, dfn: u32) -> Result<Patient, DataAccessError> {
        let dfn_arg = RpcArg::literal(dfn.to_string());

        let lines = self
            .call(RemoteProcedure::GetPatient, std::slice::from_ref(&dfn_arg))
            .map_err(|e| match e {
                RpcError::Security(_) => DataAccessError::PermissionDenied(e.to_string()),
                _ => DataAccessError::NonTransient(e.to_string()),
            })?;
        let demographics = parse_demographics(&lines)
            .map_err(|e| DataAccessError::NonTransient(format!("patient {}: {}", dfn, e)))?;
        let mut patient = Patient::new(dfn, demographics.name, demographics.gender, demographics.age);

        self.load_vitals(&mut patient, &dfn_arg);
        self.load_weight_6_months_ago(&mut patient);
        self.load_labs(&mut patient, &dfn_arg);
        self.load_health_factors(&mut patient, &dfn_arg);
        self.load_medications(&mut patient, &dfn_arg);
        patient.adl_notes = self.load_notes(RemoteProcedure::GetAdlStatus, &dfn_arg, ADL_NOTE_TITLE);
        patient.dnr_notes = self.load_notes(
            RemoteProcedure::GetNotesWithSubstring,
            &dfn_arg,
            DNR_NOTE_SUBSTRING,
        );

        tracing::debug!(
            dfn,
            labs = patient.labs.len(),
            health_factors = patient.health_factors.len(),
            medications = patient.active_medications.len(),
            "patient loaded"
        );
        Ok(patient)
    }

    fn save_risk_calculation_note(
        &self,
        dfn: u32,
        signature: &str,
        body: &str,
    ) -> Result<SaveNoteCode, DataAccessError> {
        let args = [
            RpcArg::literal(signature),
            RpcArg::literal(dfn.to_string()),
            RpcArg::List(wrap_note(body)),
        ];
        let lines = self
            .call(RemoteProcedure::SaveProgressNote, &args)
            .map_err(|e| DataAccessError::Recoverable(e.to_string()))?;
        let first = lines
            .first()
            .ok_or_else(|| DataAccessError::Recoverable("empty response to note save".to_string()))?;

        let (code, message) = parse_operation_result(first);
        if code == "1" {
            tracing::info!(dfn, "risk calculation note saved");
            Ok(SaveNoteCode::Success)
        } else {
            tracing::info!(dfn, code, message, "risk calculation note rejected");
            Ok(SaveNoteCode::InvalidSignature)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
