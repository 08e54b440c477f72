//! # Catalog Module
//!
//! The complete configuration of the calculator: variable groups,
//! variables, risk models and the specialties that use them.
//!
//! A catalog is loaded from JSON and validated as a whole before it is
//! stored. Validation never stops at the first problem; every field error
//! is collected so an administrator can fix them in one pass.

use crate::calculation::Specialty;
use crate::model::{Condition, ModelTerm, RiskModel, Summand};
use crate::variable::{
    DISPLAY_NAME_MAX, HELP_TEXT_MAX, KEY_MAX, MAX_OPTIONS, NumericalBounds, Variable,
    VariableGroup, VariableKind,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// FIELD ERRORS
// =============================================================================

/// Machine-readable reason a field was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldErrorCode {
    Empty,
    TooLong,
    InvalidContents,
    InvalidOption,
}

impl fmt::Display for FieldErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::TooLong => "tooLong",
            Self::InvalidContents => "invalidContents",
            Self::InvalidOption => "invalidOption",
        })
    }
}

/// A rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path of the field, e.g. `variables[age].key`.
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.field, self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog has {} invalid field(s)", .0.len())]
    Invalid(Vec<FieldError>),
}

// =============================================================================
// VARIABLE VALIDATION
// =============================================================================

/// Validate a single variable definition against the known groups.
#[must_use]
pub fn validate_variable(variable: &Variable, groups: &[VariableGroup]) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let path = |field: &str| format!("variables[{}].{}", variable.key, field);

    if variable.key.is_empty() {
        errors.push(FieldError::new(path("key"), FieldErrorCode::Empty, "key is required"));
    } else if variable.key.chars().count() > KEY_MAX {
        errors.push(FieldError::new(
            path("key"),
            FieldErrorCode::TooLong,
            format!("key must be at most {} characters", KEY_MAX),
        ));
    } else if !variable
        .key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push(FieldError::new(
            path("key"),
            FieldErrorCode::InvalidContents,
            "key may only contain letters, digits and underscores",
        ));
    }

    if variable.display_name.trim().is_empty() {
        errors.push(FieldError::new(
            path("display_name"),
            FieldErrorCode::Empty,
            "display name is required",
        ));
    } else if variable.display_name.chars().count() > DISPLAY_NAME_MAX {
        errors.push(FieldError::new(
            path("display_name"),
            FieldErrorCode::TooLong,
            format!("display name must be at most {} characters", DISPLAY_NAME_MAX),
        ));
    } else if variable.display_name.chars().any(char::is_control) {
        errors.push(FieldError::new(
            path("display_name"),
            FieldErrorCode::InvalidContents,
            "display name contains control characters",
        ));
    }

    if let Some(help) = &variable.help_text
        && help.chars().count() > HELP_TEXT_MAX
    {
        errors.push(FieldError::new(
            path("help_text"),
            FieldErrorCode::TooLong,
            format!("help text must be at most {} characters", HELP_TEXT_MAX),
        ));
    }

    if !groups.iter().any(|g| g.id == variable.group_id) {
        errors.push(FieldError::new(
            path("group_id"),
            FieldErrorCode::InvalidOption,
            format!("group {} does not exist", variable.group_id),
        ));
    }

    match &variable.kind {
        VariableKind::Numerical { bounds, .. } => {
            check_bounds(bounds, &path("bounds"), &mut errors);
        }
        VariableKind::Boolean => {}
        VariableKind::MultiSelect { options, .. } => {
            let names: Vec<&str> = options.iter().map(|o| o.value()).collect();
            check_options(&names, &path("options"), &mut errors);
        }
        VariableKind::DiscreteNumerical {
            bounds, categories, ..
        } => {
            check_bounds(bounds, &path("bounds"), &mut errors);
            let names: Vec<&str> = categories.iter().map(|c| c.option.value()).collect();
            check_options(&names, &path("categories"), &mut errors);
            if !variable.categories_in_order() {
                errors.push(FieldError::new(
                    path("categories"),
                    FieldErrorCode::InvalidContents,
                    "category upper bounds must be strictly increasing",
                ));
            }
        }
    }

    errors
}

fn check_bounds(bounds: &NumericalBounds, field: &str, errors: &mut Vec<FieldError>) {
    if bounds.min.is_nan() || bounds.max.is_nan() || bounds.min > bounds.max {
        errors.push(FieldError::new(
            field,
            FieldErrorCode::InvalidContents,
            "minimum must not exceed maximum",
        ));
    }
}

fn check_options(names: &[&str], field: &str, errors: &mut Vec<FieldError>) {
    if names.is_empty() {
        errors.push(FieldError::new(field, FieldErrorCode::Empty, "at least one option is required"));
        return;
    }
    if names.len() > MAX_OPTIONS {
        errors.push(FieldError::new(
            field,
            FieldErrorCode::TooLong,
            format!("at most {} options are allowed", MAX_OPTIONS),
        ));
    }
    if names.iter().any(|n| n.trim().is_empty()) {
        errors.push(FieldError::new(field, FieldErrorCode::Empty, "options must not be blank"));
    }
    let unique: BTreeSet<&str> = names.iter().copied().collect();
    if unique.len() != names.len() {
        errors.push(FieldError::new(
            field,
            FieldErrorCode::InvalidContents,
            "options must be unique",
        ));
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Everything needed to run calculations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub groups: Vec<VariableGroup>,
    pub variables: Vec<Variable>,
    pub models: Vec<RiskModel>,
    pub specialties: Vec<Specialty>,
}

impl Catalog {
    #[must_use]
    pub fn variable(&self, key: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.key == key)
    }

    #[must_use]
    pub fn group(&self, id: u32) -> Option<&VariableGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    #[must_use]
    pub fn model(&self, id: u32) -> Option<&RiskModel> {
        self.models.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn specialty(&self, id: u32) -> Option<&Specialty> {
        self.specialties.iter().find(|s| s.id == id)
    }

    /// Check the catalog as a whole.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut errors = Vec::new();

        check_unique(self.groups.iter().map(|g| g.id), "groups", &mut errors);
        check_unique(self.models.iter().map(|m| m.id), "models", &mut errors);
        check_unique(self.specialties.iter().map(|s| s.id), "specialties", &mut errors);

        let mut seen = BTreeSet::new();
        for variable in &self.variables {
            if !seen.insert(variable.key.as_str()) {
                errors.push(FieldError::new(
                    format!("variables[{}].key", variable.key),
                    FieldErrorCode::InvalidContents,
                    "duplicate variable key",
                ));
            }
            errors.extend(validate_variable(variable, &self.groups));
        }

        let variables: BTreeMap<&str, &Variable> =
            self.variables.iter().map(|v| (v.key.as_str(), v)).collect();
        for model in &self.models {
            for (index, term) in model.terms.iter().enumerate() {
                let field = format!("models[{}].terms[{}]", model.id, index);
                check_term(term, &variables, &field, &mut errors);
            }
        }

        for specialty in &self.specialties {
            for id in &specialty.model_ids {
                if self.model(*id).is_none() {
                    errors.push(FieldError::new(
                        format!("specialties[{}].models", specialty.id),
                        FieldErrorCode::InvalidOption,
                        format!("risk model {} does not exist", id),
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(count = errors.len(), "catalog validation failed");
            Err(CatalogError::Invalid(errors))
        }
    }
}

fn check_unique(ids: impl Iterator<Item = u32>, field: &str, errors: &mut Vec<FieldError>) {
    let mut seen = BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            errors.push(FieldError::new(
                format!("{}[{}].id", field, id),
                FieldErrorCode::InvalidContents,
                "duplicate id",
            ));
        }
    }
}

fn check_term(
    term: &ModelTerm,
    variables: &BTreeMap<&str, &Variable>,
    field: &str,
    errors: &mut Vec<FieldError>,
) {
    let mut lookup = |key: &str| {
        let found = variables.get(key).copied();
        if found.is_none() {
            errors.push(FieldError::new(
                field,
                FieldErrorCode::InvalidOption,
                format!("variable {} does not exist", key),
            ));
        }
        found
    };

    let problem = match term {
        ModelTerm::Boolean { key, .. } => lookup(key).and_then(|v| {
            (!matches!(v.kind, VariableKind::Boolean)).then(|| wrong_kind(v, "Boolean"))
        }),
        ModelTerm::Numerical { key, .. } => lookup(key).and_then(|v| {
            (!matches!(v.kind, VariableKind::Numerical { .. })).then(|| wrong_kind(v, "Numerical"))
        }),
        ModelTerm::MultiSelect { key, option, .. } => lookup(key).and_then(|v| {
            if !matches!(v.kind, VariableKind::MultiSelect { .. }) {
                Some(wrong_kind(v, "Multi-Select"))
            } else {
                (!v.has_option(option)).then(|| unknown_option(v, option))
            }
        }),
        ModelTerm::DiscreteNumerical { key, category, .. } => lookup(key).and_then(|v| {
            if !matches!(v.kind, VariableKind::DiscreteNumerical { .. }) {
                Some(wrong_kind(v, "Discrete Numerical"))
            } else {
                (!v.has_option(category)).then(|| unknown_option(v, category))
            }
        }),
        ModelTerm::Derived(rule) => {
            let mut found = None;
            for matcher in &rule.matchers {
                let Some(v) = lookup(&matcher.key) else {
                    continue;
                };
                if let Condition::Equals(option) = &matcher.condition
                    && !v.has_option(option)
                {
                    found = Some(unknown_option(v, option));
                }
            }
            if let Summand::CoefficientTimes { key, .. } = &rule.summand
                && let Some(v) = lookup(key)
                && !matches!(
                    v.kind,
                    VariableKind::Numerical { .. } | VariableKind::DiscreteNumerical { .. }
                )
            {
                found = Some(wrong_kind(v, "numeric"));
            }
            found
        }
    };

    if let Some(message) = problem {
        errors.push(FieldError::new(field, FieldErrorCode::InvalidOption, message));
    }
}

fn wrong_kind(variable: &Variable, expected: &str) -> String {
    format!(
        "variable {} is {}, expected {}",
        variable.key,
        variable.kind_name(),
        expected
    )
}

fn unknown_option(variable: &Variable, option: &str) -> String {
    format!("variable {} has no option '{}'", variable.key, option)
}

// =============================================================================
// SAMPLE
// =============================================================================

/// A small, valid catalog shared by unit tests.
#[cfg(test)]
pub(crate) fn sample_catalog() -> Catalog {
    use crate::model::{Rule, ValueMatcher};
    use crate::patient::VistaLab;
    use crate::variable::{Category, PROCEDURE_GROUP, RetrievalKey};

    let groups = vec![
        VariableGroup::new(1, PROCEDURE_GROUP, 0),
        VariableGroup::new(2, "Demographics", 1),
        VariableGroup::new(3, "Laboratory Values", 3),
        VariableGroup::new(4, "Clinical Conditions", 2),
    ];
    let variables = vec![
        Variable::multi_select("procedure", "Procedure", 1, ["Lung resection", "Esophagectomy"]),
        Variable::numerical("age", "Age", 2, NumericalBounds::new(0.0, 999.0), "years")
            .with_retrieval(RetrievalKey::Age),
        Variable::multi_select("gender", "Gender", 2, ["Male", "Female"])
            .with_retrieval(RetrievalKey::Gender),
        Variable::numerical("albumin", "Albumin", 3, NumericalBounds::new(0.0, 10.0), "g/dl")
            .with_retrieval(RetrievalKey::Lab(VistaLab::Albumin)),
        Variable::discrete_numerical(
            "wbc",
            "White Blood Count",
            3,
            NumericalBounds::new(0.0, 50.0).with_max_inclusive(false),
            "x1000/mm^3",
            vec![
                Category::new("WNL", 11.0, true),
                Category::new(">11.0", 50.0, false),
            ],
        )
        .with_retrieval(RetrievalKey::Lab(VistaLab::Wbc)),
        Variable::boolean("copd", "COPD", 4).with_help_text("History of severe COPD"),
        Variable::boolean("dnr", "DNR", 4),
    ];
    let mortality = RiskModel::new(1, "Thoracic 30-Day Mortality", -5.0)
        .with_term(ModelTerm::Numerical {
            key: "age".into(),
            coefficient: 0.03,
        })
        .with_term(ModelTerm::MultiSelect {
            key: "procedure".into(),
            option: "Esophagectomy".into(),
            coefficient: 0.8,
        })
        .with_term(ModelTerm::Boolean {
            key: "copd".into(),
            coefficient: 0.5,
        })
        .with_term(ModelTerm::DiscreteNumerical {
            key: "wbc".into(),
            category: ">11.0".into(),
            coefficient: 0.4,
        })
        .with_term(ModelTerm::Derived(Rule {
            display_name: "Low albumin".into(),
            matchers: vec![ValueMatcher::new("albumin", Condition::LessThan(3.5))],
            summand: Summand::Coefficient(0.6),
            required: true,
        }));
    let morbidity = RiskModel::new(2, "Thoracic 30-Day Morbidity", -3.0)
        .with_term(ModelTerm::MultiSelect {
            key: "gender".into(),
            option: "Male".into(),
            coefficient: 0.2,
        })
        .with_term(ModelTerm::Boolean {
            key: "dnr".into(),
            coefficient: 0.9,
        })
        .with_term(ModelTerm::Numerical {
            key: "albumin".into(),
            coefficient: -0.2,
        })
        .with_term(ModelTerm::Derived(Rule {
            display_name: "Elderly COPD".into(),
            matchers: vec![
                ValueMatcher::new("age", Condition::AtLeast(75.0)),
                ValueMatcher::new("copd", Condition::IsTrue),
            ],
            summand: Summand::Coefficient(0.3),
            required: false,
        }));

    Catalog {
        groups,
        variables,
        models: vec![mortality, morbidity],
        specialties: vec![
            Specialty {
                id: 1,
                vista_id: 50,
                name: "Thoracic".into(),
                model_ids: vec![1, 2],
            },
            Specialty {
                id: 2,
                vista_id: 48,
                name: "General Surgery".into(),
                model_ids: vec![2],
            },
        ],
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn invalid(catalog: &Catalog) -> Vec<FieldError> {
        match catalog.validate() {
            Err(CatalogError::Invalid(errors)) => errors,
            Ok(()) => panic!("expected validation errors"),
        }
    }

    #[test]
    fn sample_catalog_is_valid() {
        assert_eq!(sample_catalog().validate(), Ok(()));
    }

    #[test]
    fn key_rules() {
        let groups = sample_catalog().groups;
        let codes = |key: &str| -> Vec<FieldErrorCode> {
            validate_variable(&Variable::boolean(key, "Name", 1), &groups)
                .into_iter()
                .map(|e| e.code)
                .collect()
        };
        assert_eq!(codes(""), vec![FieldErrorCode::Empty]);
        assert_eq!(codes(&"k".repeat(KEY_MAX + 1)), vec![FieldErrorCode::TooLong]);
        assert_eq!(codes("bad key!"), vec![FieldErrorCode::InvalidContents]);
        assert!(codes("good_key_1").is_empty());
    }

    #[test]
    fn display_name_rejects_control_characters() {
        let groups = sample_catalog().groups;
        let errors = validate_variable(&Variable::boolean("k", "has\ttab", 1), &groups);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, FieldErrorCode::InvalidContents);
        assert_eq!(errors[0].field, "variables[k].display_name");
    }

    #[test]
    fn unknown_group_is_invalid_option() {
        let groups = sample_catalog().groups;
        let errors = validate_variable(&Variable::boolean("k", "Name", 99), &groups);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, FieldErrorCode::InvalidOption);
    }

    #[test]
    fn options_are_checked() {
        let groups = sample_catalog().groups;
        let none: [&str; 0] = [];
        let empty = validate_variable(&Variable::multi_select("k", "Name", 1, none), &groups);
        assert_eq!(empty[0].code, FieldErrorCode::Empty);

        let many: Vec<String> = (0..=MAX_OPTIONS).map(|i| format!("o{}", i)).collect();
        let too_many = validate_variable(&Variable::multi_select("k", "Name", 1, many), &groups);
        assert_eq!(too_many[0].code, FieldErrorCode::TooLong);

        let dup = validate_variable(&Variable::multi_select("k", "Name", 1, ["a", "a"]), &groups);
        assert_eq!(dup[0].code, FieldErrorCode::InvalidContents);
    }

    #[test]
    fn duplicate_keys_are_reported() {
        let mut catalog = sample_catalog();
        catalog.variables.push(Variable::boolean("copd", "COPD again", 4));
        let errors = invalid(&catalog);
        assert!(errors.iter().any(|e| e.message == "duplicate variable key"));
    }

    #[test]
    fn terms_must_match_variable_kind() {
        let mut catalog = sample_catalog();
        catalog.models[0].terms.push(ModelTerm::Boolean {
            key: "age".into(),
            coefficient: 1.0,
        });
        catalog.models[0].terms.push(ModelTerm::Numerical {
            key: "missing".into(),
            coefficient: 1.0,
        });
        let errors = invalid(&catalog);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.code == FieldErrorCode::InvalidOption));
    }

    #[test]
    fn specialties_must_reference_models() {
        let mut catalog = sample_catalog();
        catalog.specialties[1].model_ids.push(42);
        let errors = invalid(&catalog);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "specialties[2].models");
    }

    #[test]
    fn field_error_code_uses_camel_case() {
        assert_eq!(FieldErrorCode::TooLong.to_string(), "tooLong");
        assert_eq!(
            serde_json::to_string(&FieldErrorCode::InvalidContents).ok(),
            Some("\"invalidContents\"".to_string())
        );
    }
}
