//! # Patient Module
//!
//! Clinical data retrieved for one patient. Every measured field carries the
//! date it was measured so the entry form can show how current it is.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Patient gender as recorded in VistA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    /// Translate the VistA gender code (`M`/`F`).
    #[must_use]
    pub fn from_vista(code: &str) -> Self {
        match code {
            "M" => Self::Male,
            "F" => Self::Female,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Unknown => "Unknown",
        })
    }
}

/// A measurement pulled from VistA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedValue {
    pub value: f64,
    pub measured_at: NaiveDateTime,
    pub units: String,
}

impl RetrievedValue {
    #[must_use]
    pub fn new(value: f64, measured_at: NaiveDateTime, units: impl Into<String>) -> Self {
        Self {
            value,
            measured_at,
            units: units.into(),
        }
    }
}

/// A health factor recorded for the patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthFactor {
    pub date: NaiveDate,
    pub name: String,
}

/// A progress note shown to the clinician as reference material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceNote {
    pub local_title: String,
    pub sign_date: String,
    pub body: String,
}

// =============================================================================
// LABS
// =============================================================================

/// Labs retrieved for every patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VistaLab {
    Albumin,
    Creatinine,
    Bun,
    Wbc,
    Platelets,
    Hematocrit,
    Sodium,
    Sgot,
    AlkalinePhosphatase,
    Bilirubin,
    Inr,
}

impl VistaLab {
    /// Every lab, in retrieval order.
    pub const ALL: [Self; 11] = [
        Self::Albumin,
        Self::Creatinine,
        Self::Bun,
        Self::Wbc,
        Self::Platelets,
        Self::Hematocrit,
        Self::Sodium,
        Self::Sgot,
        Self::AlkalinePhosphatase,
        Self::Bilirubin,
        Self::Inr,
    ];

    /// The lab test names this lab may be filed under at a VistA site.
    #[must_use]
    pub fn possible_names(self) -> &'static [&'static str] {
        match self {
            Self::Albumin => &["ALBUMIN"],
            Self::Creatinine => &["CREATININE"],
            Self::Bun => &["UREA NITROGEN", "BUN"],
            Self::Wbc => &["WBC"],
            Self::Platelets => &["PLATELET COUNT", "PLT"],
            Self::Hematocrit => &["HCT", "HEMATOCRIT"],
            Self::Sodium => &["SODIUM", "NA"],
            Self::Sgot => &["SGOT", "AST"],
            Self::AlkalinePhosphatase => &["ALKALINE PHOSPHATASE", "ALK PHOS"],
            Self::Bilirubin => &["TOT. BILIRUBIN", "TOTAL BILIRUBIN"],
            Self::Inr => &["INR"],
        }
    }
}

// =============================================================================
// PATIENT
// =============================================================================

/// A patient with whatever data could be retrieved.
///
/// Only the demographics are guaranteed; every other field is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub dfn: u32,
    pub name: String,
    pub gender: Gender,
    pub age: u32,
    pub height: Option<RetrievedValue>,
    pub weight: Option<RetrievedValue>,
    pub weight_6_months_ago: Option<RetrievedValue>,
    pub bmi: Option<RetrievedValue>,
    pub labs: BTreeMap<VistaLab, RetrievedValue>,
    pub health_factors: Vec<HealthFactor>,
    pub active_medications: Vec<String>,
    pub adl_notes: Vec<ReferenceNote>,
    pub dnr_notes: Vec<ReferenceNote>,
}

impl Patient {
    /// A patient with demographics only.
    #[must_use]
    pub fn new(dfn: u32, name: impl Into<String>, gender: Gender, age: u32) -> Self {
        Self {
            dfn,
            name: name.into(),
            gender,
            age,
            height: None,
            weight: None,
            weight_6_months_ago: None,
            bmi: None,
            labs: BTreeMap::new(),
            health_factors: Vec::new(),
            active_medications: Vec::new(),
            adl_notes: Vec::new(),
            dnr_notes: Vec::new(),
        }
    }
}
