//! # Model Module
//!
//! Risk models: a constant plus a list of weighted terms, passed through the
//! logistic function.
//!
//! ```text
//! sum         = constant + Σ term.contribution(values)
//! probability = 1 / (1 + e^(-sum))
//! ```
//!
//! Evaluation never stops at the first missing value. All missing variables
//! of all terms are collected so the caller can flag every unfilled field
//! at once.

use crate::value::{Value, ValueSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Keys of the variables a model needed but did not get.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing values for: {}", .0.iter().cloned().collect::<Vec<_>>().join(", "))]
pub struct MissingVariables(pub BTreeSet<String>);

// =============================================================================
// DERIVED TERMS
// =============================================================================

/// A predicate on a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    IsTrue,
    IsFalse,
    /// The selected option or category equals the given name.
    Equals(String),
    GreaterThan(f64),
    AtLeast(f64),
    LessThan(f64),
    AtMost(f64),
}

impl Condition {
    #[must_use]
    pub fn holds(&self, value: &Value) -> bool {
        match self {
            Self::IsTrue => value.as_bool() == Some(true),
            Self::IsFalse => value.as_bool() == Some(false),
            Self::Equals(option) => value.selected_option() == Some(option.as_str()),
            Self::GreaterThan(t) => value.as_number().is_some_and(|x| x > *t),
            Self::AtLeast(t) => value.as_number().is_some_and(|x| x >= *t),
            Self::LessThan(t) => value.as_number().is_some_and(|x| x < *t),
            Self::AtMost(t) => value.as_number().is_some_and(|x| x <= *t),
        }
    }

    /// Whether the condition compares a number.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::GreaterThan(_) | Self::AtLeast(_) | Self::LessThan(_) | Self::AtMost(_)
        )
    }
}

/// A condition bound to a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMatcher {
    pub key: String,
    pub condition: Condition,
}

impl ValueMatcher {
    #[must_use]
    pub fn new(key: impl Into<String>, condition: Condition) -> Self {
        Self {
            key: key.into(),
            condition,
        }
    }
}

/// What a matching rule adds to the sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Summand {
    Coefficient(f64),
    /// `coefficient * value of key`.
    CoefficientTimes { coefficient: f64, key: String },
}

/// A derived term: adds its summand when every matcher holds.
///
/// A rule that is not `required` is skipped when any of its variables has
/// no value, instead of failing the calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub display_name: String,
    pub matchers: Vec<ValueMatcher>,
    pub summand: Summand,
    pub required: bool,
}

impl Rule {
    /// Every variable the rule reads.
    pub fn variable_keys(&self) -> impl Iterator<Item = &str> {
        let summand_key = match &self.summand {
            Summand::Coefficient(_) => None,
            Summand::CoefficientTimes { key, .. } => Some(key.as_str()),
        };
        self.matchers
            .iter()
            .map(|m| m.key.as_str())
            .chain(summand_key)
    }

    fn contribution(&self, values: &ValueSet) -> Result<f64, BTreeSet<String>> {
        let missing: BTreeSet<String> = self
            .variable_keys()
            .filter(|k| !values.contains(k))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return if self.required { Err(missing) } else { Ok(0.0) };
        }

        // A category picked without a number cannot be compared or multiplied.
        let summand_key = match &self.summand {
            Summand::Coefficient(_) => None,
            Summand::CoefficientTimes { key, .. } => Some(key.as_str()),
        };
        let unreadable: BTreeSet<String> = self
            .matchers
            .iter()
            .filter(|m| m.condition.is_numeric())
            .map(|m| m.key.as_str())
            .chain(summand_key)
            .filter(|k| values.get(k).and_then(Value::as_number).is_none())
            .map(str::to_string)
            .collect();
        if !unreadable.is_empty() {
            return Err(unreadable);
        }

        let matched = self.matchers.iter().all(|m| {
            values
                .get(&m.key)
                .is_some_and(|value| m.condition.holds(value))
        });
        if !matched {
            return Ok(0.0);
        }

        match &self.summand {
            Summand::Coefficient(c) => Ok(*c),
            Summand::CoefficientTimes { coefficient, key } => values
                .get(key)
                .and_then(Value::as_number)
                .map(|x| coefficient * x)
                .ok_or_else(|| BTreeSet::from([key.clone()])),
        }
    }
}

// =============================================================================
// MODEL TERMS
// =============================================================================

/// One weighted term of a risk model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelTerm {
    /// Adds `coefficient` when the boolean is true.
    Boolean { key: String, coefficient: f64 },
    /// Adds `coefficient * value`.
    Numerical { key: String, coefficient: f64 },
    /// Adds `coefficient` when `option` is selected.
    MultiSelect {
        key: String,
        option: String,
        coefficient: f64,
    },
    /// Adds `coefficient` when the value falls into `category`.
    DiscreteNumerical {
        key: String,
        category: String,
        coefficient: f64,
    },
    Derived(Rule),
}

impl ModelTerm {
    /// Variables this term reads.
    #[must_use]
    pub fn variable_keys(&self) -> Vec<&str> {
        match self {
            Self::Boolean { key, .. }
            | Self::Numerical { key, .. }
            | Self::MultiSelect { key, .. }
            | Self::DiscreteNumerical { key, .. } => vec![key.as_str()],
            Self::Derived(rule) => rule.variable_keys().collect(),
        }
    }

    /// Variables that must have a value for the term to be evaluated.
    #[must_use]
    pub fn required_keys(&self) -> Vec<&str> {
        match self {
            Self::Derived(rule) if !rule.required => Vec::new(),
            _ => self.variable_keys(),
        }
    }

    /// Evaluate this term, returning the keys of any missing values.
    pub fn contribution(&self, values: &ValueSet) -> Result<f64, BTreeSet<String>> {
        let single = |key: &str| values.get(key).ok_or_else(|| BTreeSet::from([key.to_string()]));
        match self {
            Self::Boolean { key, coefficient } => {
                let value = single(key)?;
                Ok(if value.as_bool() == Some(true) { *coefficient } else { 0.0 })
            }
            Self::Numerical { key, coefficient } => {
                let value = single(key)?;
                let x = value
                    .as_number()
                    .ok_or_else(|| BTreeSet::from([key.clone()]))?;
                Ok(coefficient * x)
            }
            Self::MultiSelect {
                key,
                option,
                coefficient,
            }
            | Self::DiscreteNumerical {
                key,
                category: option,
                coefficient,
            } => {
                let value = single(key)?;
                Ok(if value.selected_option() == Some(option.as_str()) {
                    *coefficient
                } else {
                    0.0
                })
            }
            Self::Derived(rule) => rule.contribution(values),
        }
    }
}

// =============================================================================
// RISK MODEL
// =============================================================================

/// Result of evaluating one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOutcome {
    /// The linear predictor before the logistic transform.
    pub sum: f64,
    /// Probability in `[0, 1]`.
    pub probability: f64,
}

impl ModelOutcome {
    /// Probability as a percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        self.probability * 100.0
    }
}

/// A weighted linear predictor over clinical variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
    pub id: u32,
    pub display_name: String,
    pub constant: f64,
    pub terms: Vec<ModelTerm>,
}

impl RiskModel {
    #[must_use]
    pub fn new(id: u32, display_name: impl Into<String>, constant: f64) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            constant,
            terms: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_term(mut self, term: ModelTerm) -> Self {
        self.terms.push(term);
        self
    }

    /// Keys of every variable that must have a value.
    #[must_use]
    pub fn required_variables(&self) -> BTreeSet<&str> {
        self.terms.iter().flat_map(ModelTerm::required_keys).collect()
    }

    /// Keys of every variable the model reads, required or not.
    #[must_use]
    pub fn referenced_variables(&self) -> BTreeSet<&str> {
        self.terms.iter().flat_map(ModelTerm::variable_keys).collect()
    }

    /// Evaluate the model against a set of values.
    ///
    /// Terms are summed in model order, so the outcome depends only on the
    /// values themselves, never on the order they were entered.
    pub fn evaluate(&self, values: &ValueSet) -> Result<ModelOutcome, MissingVariables> {
        let mut sum = self.constant;
        let mut missing = BTreeSet::new();

        for term in &self.terms {
            match term.contribution(values) {
                Ok(x) => sum += x,
                Err(keys) => missing.extend(keys),
            }
        }

        if !missing.is_empty() {
            return Err(MissingVariables(missing));
        }

        Ok(ModelOutcome {
            sum,
            probability: logistic(sum),
        })
    }
}

/// The logistic function, `e^x / (1 + e^x)`.
#[must_use]
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::value::DiscreteValue;
    use crate::variable::MultiSelectOption;
    use proptest::prelude::*;

    fn sample_model() -> RiskModel {
        RiskModel::new(1, "Thoracic 30-Day Mortality Risk", -3.0)
            .with_term(ModelTerm::Numerical {
                key: "age".into(),
                coefficient: 0.02,
            })
            .with_term(ModelTerm::Boolean {
                key: "dnr".into(),
                coefficient: 1.5,
            })
            .with_term(ModelTerm::MultiSelect {
                key: "gender".into(),
                option: "Female".into(),
                coefficient: -0.3,
            })
            .with_term(ModelTerm::DiscreteNumerical {
                key: "wbc".into(),
                category: ">11.0".into(),
                coefficient: 0.4,
            })
    }

    fn sample_values() -> ValueSet {
        let mut values = ValueSet::new();
        values.insert("age", Value::Numerical(50.0));
        values.insert("dnr", Value::Boolean(true));
        values.insert("gender", Value::MultiSelect(MultiSelectOption::new("Male")));
        values.insert(
            "wbc",
            Value::DiscreteNumerical(DiscreteValue::Numerical {
                value: 12.0,
                category: MultiSelectOption::new(">11.0"),
            }),
        );
        values
    }

    #[test]
    fn evaluate_sums_terms() {
        let outcome = sample_model().evaluate(&sample_values()).unwrap();
        // -3.0 + 50*0.02 + 1.5 + 0 + 0.4
        assert!((outcome.sum - (-0.1)).abs() < 1e-9);
        assert!((outcome.probability - logistic(-0.1)).abs() < 1e-12);
    }

    #[test]
    fn evaluate_reports_every_missing_value() {
        let mut values = ValueSet::new();
        values.insert("dnr", Value::Boolean(false));

        let err = sample_model().evaluate(&values).unwrap_err();
        let keys: Vec<_> = err.0.iter().map(String::as_str).collect();
        assert_eq!(keys, vec!["age", "gender", "wbc"]);
    }

    #[test]
    fn logistic_is_stable_at_extremes() {
        assert_eq!(logistic(0.0), 0.5);
        assert!(logistic(1000.0) <= 1.0);
        assert!(logistic(-1000.0) >= 0.0);
        assert!(!logistic(1000.0).is_nan());
    }

    #[test]
    fn derived_rule_applies_when_all_matchers_hold() {
        let rule = Rule {
            display_name: "Elderly DNR".into(),
            matchers: vec![
                ValueMatcher::new("age", Condition::AtLeast(65.0)),
                ValueMatcher::new("dnr", Condition::IsTrue),
            ],
            summand: Summand::CoefficientTimes {
                coefficient: 0.01,
                key: "age".into(),
            },
            required: true,
        };
        let model = RiskModel::new(2, "Derived", 0.0).with_term(ModelTerm::Derived(rule));

        let mut values = ValueSet::new();
        values.insert("age", Value::Numerical(70.0));
        values.insert("dnr", Value::Boolean(true));
        assert!((model.evaluate(&values).unwrap().sum - 0.7).abs() < 1e-9);

        values.insert("dnr", Value::Boolean(false));
        assert_eq!(model.evaluate(&values).unwrap().sum, 0.0);
    }

    #[test]
    fn optional_rule_is_skipped_when_values_missing() {
        let rule = Rule {
            display_name: "Weight loss".into(),
            matchers: vec![ValueMatcher::new("weightLoss", Condition::GreaterThan(10.0))],
            summand: Summand::Coefficient(0.8),
            required: false,
        };
        let model = RiskModel::new(3, "Optional", 0.25).with_term(ModelTerm::Derived(rule));

        assert!(model.required_variables().is_empty());
        assert_eq!(model.referenced_variables().len(), 1);
        assert_eq!(model.evaluate(&ValueSet::new()).unwrap().sum, 0.25);
    }

    #[test]
    fn category_without_number_fails_numeric_rule() {
        let times = Rule {
            display_name: "WBC weighted".into(),
            matchers: Vec::new(),
            summand: Summand::CoefficientTimes {
                coefficient: 2.0,
                key: "wbc".into(),
            },
            required: true,
        };
        let compared = Rule {
            display_name: "High WBC".into(),
            matchers: vec![ValueMatcher::new("wbc", Condition::AtLeast(11.0))],
            summand: Summand::Coefficient(0.4),
            required: false,
        };
        let category = Value::DiscreteNumerical(DiscreteValue::Category(MultiSelectOption::new(
            ">11.0",
        )));
        let mut values = ValueSet::new();
        values.insert("wbc", category);

        for rule in [times, compared] {
            let model = RiskModel::new(4, "Discrete", 0.0).with_term(ModelTerm::Derived(rule));
            let missing = model.evaluate(&values).unwrap_err();
            assert_eq!(missing.0, BTreeSet::from(["wbc".to_string()]));
        }

        let numbered = Value::DiscreteNumerical(DiscreteValue::Numerical {
            value: 12.5,
            category: MultiSelectOption::new(">11.0"),
        });
        values.insert("wbc", numbered);
        let model = RiskModel::new(4, "Discrete", 0.0).with_term(ModelTerm::Derived(Rule {
            display_name: "WBC weighted".into(),
            matchers: Vec::new(),
            summand: Summand::CoefficientTimes {
                coefficient: 2.0,
                key: "wbc".into(),
            },
            required: true,
        }));
        assert!((model.evaluate(&values).unwrap().sum - 25.0).abs() < 1e-9);
    }

    #[test]
    fn required_variables_are_deduplicated() {
        let model = sample_model().with_term(ModelTerm::MultiSelect {
            key: "gender".into(),
            option: "Male".into(),
            coefficient: 0.1,
        });
        let keys: Vec<_> = model.required_variables().into_iter().collect();
        assert_eq!(keys, vec!["age", "dnr", "gender", "wbc"]);
    }

    proptest! {
        #[test]
        fn scoring_is_independent_of_entry_order(
            age in 0.0f64..120.0,
            dnr in any::<bool>(),
            female in any::<bool>(),
            reverse in any::<bool>(),
        ) {
            let gender = if female { "Female" } else { "Male" };
            let mut entries = vec![
                ("age".to_string(), Value::Numerical(age)),
                ("dnr".to_string(), Value::Boolean(dnr)),
                ("gender".to_string(), Value::MultiSelect(MultiSelectOption::new(gender))),
                ("wbc".to_string(), Value::DiscreteNumerical(DiscreteValue::Category(
                    MultiSelectOption::new("WNL"),
                ))),
            ];
            let forward: ValueSet = entries.clone().into_iter().collect();
            if reverse {
                entries.reverse();
            } else {
                entries.rotate_left(2);
            }
            let shuffled: ValueSet = entries.into_iter().collect();

            let model = sample_model();
            let a = model.evaluate(&forward).unwrap();
            let b = model.evaluate(&shuffled).unwrap();
            prop_assert_eq!(a.sum.to_bits(), b.sum.to_bits());
            prop_assert!(a.probability > 0.0 && a.probability < 1.0);
        }
    }
}
