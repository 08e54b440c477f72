//! # Calculation Module
//!
//! A calculation ties a patient to a surgical specialty. The specialty
//! selects the risk models; the models determine which variables the
//! clinician has to fill in.
//!
//! Flow:
//! 1. [`Calculation::start`] collects models and variables from the catalog.
//! 2. [`Calculation::prefill`] offers values already known from VistA.
//! 3. [`Calculation::run`] evaluates every model, or reports every missing
//!    value across all of them.

use crate::catalog::Catalog;
use crate::model::RiskModel;
use crate::patient::{Gender, Patient, RetrievedValue};
use crate::value::{RawInput, Value, ValueSet};
use crate::variable::{RetrievalKey, Variable, VariableGroup, compare_display_names};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// SPECIALTY
// =============================================================================

/// A surgical specialty and the risk models calculated for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialty {
    pub id: u32,
    /// Identifier of the specialty in VistA.
    pub vista_id: u32,
    pub name: String,
    pub model_ids: Vec<u32>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// A required variable that has no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingValue {
    pub key: String,
    pub display_name: String,
}

impl fmt::Display for MissingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No value entered for {}.", self.display_name)
    }
}

/// Errors from starting or running a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("{} required value(s) missing", .0.len())]
    MissingValues(Vec<MissingValue>),

    #[error("unknown specialty: {0}")]
    UnknownSpecialty(u32),

    #[error("risk model {0} does not exist")]
    UnknownModel(u32),

    #[error("variable {0} does not exist")]
    UnknownVariable(String),
}

// =============================================================================
// CALCULATION
// =============================================================================

/// A value offered to the clinician from patient data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefilledValue {
    pub value: Value,
    /// The measurement the value came from, if it was measured.
    pub retrieved: Option<RetrievedValue>,
}

/// Variables of one group, for the entry form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayGroup {
    pub group: VariableGroup,
    pub variables: Vec<Variable>,
}

/// An in-progress calculation for one patient and specialty.
#[derive(Debug, Clone)]
pub struct Calculation {
    patient: Patient,
    specialty: Specialty,
    models: Vec<RiskModel>,
    variables: Vec<Variable>,
    groups: BTreeMap<u32, VariableGroup>,
    started_at: DateTime<Utc>,
}

impl Calculation {
    /// Start a calculation for `specialty_id`.
    pub fn start(
        catalog: &Catalog,
        specialty_id: u32,
        patient: Patient,
    ) -> Result<Self, CalculationError> {
        let specialty = catalog
            .specialty(specialty_id)
            .cloned()
            .ok_or(CalculationError::UnknownSpecialty(specialty_id))?;

        let models = specialty
            .model_ids
            .iter()
            .map(|id| {
                catalog
                    .model(*id)
                    .cloned()
                    .ok_or(CalculationError::UnknownModel(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let variables = variables_for_models(catalog, &models)?;

        let groups = catalog.groups.iter().map(|g| (g.id, g.clone())).collect();

        tracing::debug!(
            specialty = %specialty.name,
            dfn = patient.dfn,
            models = models.len(),
            variables = variables.len(),
            "calculation started"
        );

        Ok(Self {
            patient,
            specialty,
            models,
            variables,
            groups,
            started_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn patient(&self) -> &Patient {
        &self.patient
    }

    #[must_use]
    pub fn specialty(&self) -> &Specialty {
        &self.specialty
    }

    #[must_use]
    pub fn models(&self) -> &[RiskModel] {
        &self.models
    }

    /// Variables to fill in, sorted by display name.
    #[must_use]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Values that can be pre-filled from the patient's retrieved data.
    ///
    /// Retrieved data that is out of range for its variable is left out;
    /// the clinician enters it manually.
    #[must_use]
    pub fn prefill(&self) -> BTreeMap<String, PrefilledValue> {
        let mut prefilled = BTreeMap::new();

        for variable in &self.variables {
            let Some(retrieval) = variable.retrieval else {
                continue;
            };
            let Some((input, retrieved)) = self.retrieved_input(retrieval) else {
                continue;
            };
            match Value::from_input(variable, &input) {
                Ok(value) => {
                    prefilled.insert(variable.key.clone(), PrefilledValue { value, retrieved });
                }
                Err(e) => {
                    tracing::debug!(key = %variable.key, error = %e, "retrieved value not usable");
                }
            }
        }

        prefilled
    }

    fn retrieved_input(&self, key: RetrievalKey) -> Option<(RawInput, Option<RetrievedValue>)> {
        let measured = |v: &Option<RetrievedValue>| {
            v.as_ref()
                .map(|r| (RawInput::Number(r.value), Some(r.clone())))
        };
        match key {
            RetrievalKey::Age => Some((RawInput::Number(f64::from(self.patient.age)), None)),
            RetrievalKey::Gender => match self.patient.gender {
                Gender::Unknown => None,
                g => Some((RawInput::Text(g.to_string()), None)),
            },
            RetrievalKey::Height => measured(&self.patient.height),
            RetrievalKey::Weight => measured(&self.patient.weight),
            RetrievalKey::Weight6MonthsAgo => measured(&self.patient.weight_6_months_ago),
            RetrievalKey::Bmi => measured(&self.patient.bmi),
            RetrievalKey::Lab(lab) => self
                .patient
                .labs
                .get(&lab)
                .map(|r| (RawInput::Number(r.value), Some(r.clone()))),
        }
    }

    /// Variables bucketed by group, groups in natural order.
    #[must_use]
    pub fn display_groups(&self) -> Vec<DisplayGroup> {
        group_variables(&self.variables, &self.groups)
    }

    fn group_of(&self, variable: &Variable) -> VariableGroup {
        group_of(&self.groups, variable)
    }

    /// Evaluate every model of the specialty.
    ///
    /// Missing values are collected across all models and reported once per
    /// variable, in display order.
    pub fn run(&self, values: &ValueSet) -> Result<CalculationResult, CalculationError> {
        let mut outcomes = BTreeMap::new();
        let mut missing = BTreeSet::new();

        for model in &self.models {
            match model.evaluate(values) {
                Ok(outcome) => {
                    outcomes.insert(model.display_name.clone(), outcome.percent());
                }
                Err(m) => missing.extend(m.0),
            }
        }

        if !missing.is_empty() {
            let missing_values: Vec<MissingValue> = self
                .variables
                .iter()
                .filter(|v| missing.contains(&v.key))
                .map(|v| MissingValue {
                    key: v.key.clone(),
                    display_name: v.display_name.clone(),
                })
                .collect();
            tracing::debug!(count = missing_values.len(), "calculation has missing values");
            return Err(CalculationError::MissingValues(missing_values));
        }

        let mut result_values: Vec<ResultValue> = self
            .variables
            .iter()
            .filter_map(|v| {
                values.get(&v.key).map(|value| ResultValue {
                    key: v.key.clone(),
                    display_name: v.display_name.clone(),
                    procedure: self.group_of(v).is_procedure_group(),
                    display: value.display_string(),
                    value: value.clone(),
                })
            })
            .collect();
        result_values.sort_by(ResultValue::display_order);

        tracing::info!(
            specialty = %self.specialty.name,
            dfn = self.patient.dfn,
            models = outcomes.len(),
            "calculation completed"
        );

        Ok(CalculationResult {
            specialty: self.specialty.name.clone(),
            patient_dfn: self.patient.dfn,
            values: result_values,
            outcomes,
            started_at: self.started_at,
            completed_at: Utc::now(),
        })
    }
}

/// The variables a specialty's models read, sorted by display name.
pub fn specialty_variables(
    catalog: &Catalog,
    specialty_id: u32,
) -> Result<Vec<Variable>, CalculationError> {
    let specialty = catalog
        .specialty(specialty_id)
        .ok_or(CalculationError::UnknownSpecialty(specialty_id))?;
    let models = specialty
        .model_ids
        .iter()
        .map(|id| catalog.model(*id).cloned().ok_or(CalculationError::UnknownModel(*id)))
        .collect::<Result<Vec<_>, _>>()?;
    variables_for_models(catalog, &models)
}

/// Entry form layout for a specialty.
pub fn specialty_display_groups(
    catalog: &Catalog,
    specialty_id: u32,
) -> Result<Vec<DisplayGroup>, CalculationError> {
    let variables = specialty_variables(catalog, specialty_id)?;
    let groups = catalog.groups.iter().map(|g| (g.id, g.clone())).collect();
    Ok(group_variables(&variables, &groups))
}

fn variables_for_models(
    catalog: &Catalog,
    models: &[RiskModel],
) -> Result<Vec<Variable>, CalculationError> {
    let keys: BTreeSet<&str> = models
        .iter()
        .flat_map(RiskModel::referenced_variables)
        .collect();
    let mut variables = keys
        .into_iter()
        .map(|key| {
            catalog
                .variable(key)
                .cloned()
                .ok_or_else(|| CalculationError::UnknownVariable(key.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    variables.sort_by(compare_display_names);
    Ok(variables)
}

/// Bucket variables by group. Groups come out in natural order; variables
/// keep their relative order.
#[must_use]
pub fn group_variables(
    variables: &[Variable],
    groups: &BTreeMap<u32, VariableGroup>,
) -> Vec<DisplayGroup> {
    let mut buckets: BTreeMap<VariableGroup, Vec<Variable>> = BTreeMap::new();
    for variable in variables {
        buckets
            .entry(group_of(groups, variable))
            .or_default()
            .push(variable.clone());
    }
    buckets
        .into_iter()
        .map(|(group, variables)| DisplayGroup { group, variables })
        .collect()
}

fn group_of(groups: &BTreeMap<u32, VariableGroup>, variable: &Variable) -> VariableGroup {
    groups
        .get(&variable.group_id)
        .cloned()
        .unwrap_or_else(|| VariableGroup::new(variable.group_id, "Other", u32::MAX))
}

// =============================================================================
// RESULT
// =============================================================================

/// One input value as shown on the results page and in the note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultValue {
    pub key: String,
    pub display_name: String,
    /// Whether the variable is in the planned procedure group.
    pub procedure: bool,
    pub display: String,
    pub value: Value,
}

impl ResultValue {
    /// Procedure first, then by display name.
    fn display_order(a: &Self, b: &Self) -> Ordering {
        b.procedure.cmp(&a.procedure).then_with(|| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        })
    }
}

/// The outcome of a completed calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub specialty: String,
    pub patient_dfn: u32,
    pub values: Vec<ResultValue>,
    /// Model display name -> risk percentage.
    pub outcomes: BTreeMap<String, f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl CalculationResult {
    /// Plain text body of the progress note saved to VistA.
    #[must_use]
    pub fn build_note_body(&self) -> String {
        let mut body = format!("Specialty = {}\n\nCalculation Inputs\n", self.specialty);
        for value in &self.values {
            body.push_str(&format!("{} = {}\n", value.display_name, value.display));
        }
        body.push_str("\nResults\n");
        for (model, percent) in &self.outcomes {
            body.push_str(&format!("{} = {:.1}%\n", model, percent));
        }
        body
    }
}

// =============================================================================
// TESTS
// =============================================================================
