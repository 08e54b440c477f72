//! # Value Module
//!
//! Typed values for clinical variables.
//!
//! Values are always constructed against their [`Variable`] so that range
//! and option checks happen once, at the boundary. Everything downstream
//! (model terms, result display) can assume a value is valid for its
//! variable.

use crate::variable::{MultiSelectOption, Variable, VariableKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors from constructing a value for a variable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("{value} is below the minimum of {min}")]
    TooLow { value: f64, min: f64, inclusive: bool },

    #[error("{value} is above the maximum of {max}")]
    TooHigh { value: f64, max: f64, inclusive: bool },

    #[error("value is not a number")]
    NotANumber,

    #[error("no category covers {value}")]
    NoCategory { value: f64 },

    #[error("'{option}' is not a valid option for {key}")]
    UnknownOption { key: String, option: String },

    #[error("variable {key} is not {expected}")]
    WrongKind { key: String, expected: &'static str },

    #[error("'{input}' cannot be read as a value for {key}")]
    Unparseable { key: String, input: String },
}

// =============================================================================
// VALUE
// =============================================================================

/// The value of a discrete numerical variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiscreteValue {
    /// The user picked the category directly.
    Category(MultiSelectOption),
    /// The user entered a number, which was placed in `category`.
    Numerical { value: f64, category: MultiSelectOption },
}

/// A validated value for one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Numerical(f64),
    Boolean(bool),
    MultiSelect(MultiSelectOption),
    DiscreteNumerical(DiscreteValue),
}

impl Value {
    /// Numerical value, range checked.
    pub fn numerical(variable: &Variable, value: f64) -> Result<Self, ValueError> {
        match &variable.kind {
            VariableKind::Numerical { bounds, .. } => {
                bounds.check(value)?;
                Ok(Self::Numerical(value))
            }
            _ => Err(wrong_kind(variable, "Numerical")),
        }
    }

    pub fn boolean(variable: &Variable, value: bool) -> Result<Self, ValueError> {
        match variable.kind {
            VariableKind::Boolean => Ok(Self::Boolean(value)),
            _ => Err(wrong_kind(variable, "Boolean")),
        }
    }

    /// Selected option of a multi-select variable.
    pub fn multi_select(variable: &Variable, option: &str) -> Result<Self, ValueError> {
        match &variable.kind {
            VariableKind::MultiSelect { options, .. } => options
                .iter()
                .find(|o| o.value() == option)
                .map(|o| Self::MultiSelect(o.clone()))
                .ok_or_else(|| unknown_option(variable, option)),
            _ => Err(wrong_kind(variable, "Multi-Select")),
        }
    }

    /// Directly selected category of a discrete numerical variable.
    pub fn discrete_category(variable: &Variable, option: &str) -> Result<Self, ValueError> {
        match &variable.kind {
            VariableKind::DiscreteNumerical { categories, .. } => categories
                .iter()
                .find(|c| c.option.value() == option)
                .map(|c| Self::DiscreteNumerical(DiscreteValue::Category(c.option.clone())))
                .ok_or_else(|| unknown_option(variable, option)),
            _ => Err(wrong_kind(variable, "Discrete Numerical")),
        }
    }

    /// Number entered for a discrete numerical variable, placed in its category.
    pub fn discrete_numerical(variable: &Variable, value: f64) -> Result<Self, ValueError> {
        let category = variable.categorize(value)?;
        Ok(Self::DiscreteNumerical(DiscreteValue::Numerical {
            value,
            category: category.option.clone(),
        }))
    }

    /// Build a value from loosely typed input (JSON, CLI).
    ///
    /// Numbers and numeric strings are accepted for numerical kinds; for
    /// discrete variables a string naming a category selects it directly.
    pub fn from_input(variable: &Variable, input: &RawInput) -> Result<Self, ValueError> {
        match (&variable.kind, input) {
            (VariableKind::Numerical { .. }, RawInput::Number(x)) => Self::numerical(variable, *x),
            (VariableKind::Numerical { .. }, RawInput::Text(s)) => {
                Self::numerical(variable, parse_number(variable, s)?)
            }
            (VariableKind::Boolean, RawInput::Bool(b)) => Self::boolean(variable, *b),
            (VariableKind::Boolean, RawInput::Text(s)) => match s.trim() {
                "true" | "Yes" | "yes" => Self::boolean(variable, true),
                "false" | "No" | "no" => Self::boolean(variable, false),
                other => Err(unparseable(variable, other)),
            },
            (VariableKind::MultiSelect { .. }, RawInput::Text(s)) => {
                Self::multi_select(variable, s)
            }
            (VariableKind::DiscreteNumerical { .. }, RawInput::Number(x)) => {
                Self::discrete_numerical(variable, *x)
            }
            (VariableKind::DiscreteNumerical { .. }, RawInput::Text(s)) => {
                if variable.has_option(s) {
                    Self::discrete_category(variable, s)
                } else {
                    Self::discrete_numerical(variable, parse_number(variable, s)?)
                }
            }
            (_, other) => Err(unparseable(variable, &other.to_string())),
        }
    }

    /// The numeric part of the value, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numerical(x) | Self::DiscreteNumerical(DiscreteValue::Numerical { value: x, .. }) => {
                Some(*x)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The selected option or category name.
    #[must_use]
    pub fn selected_option(&self) -> Option<&str> {
        match self {
            Self::MultiSelect(o)
            | Self::DiscreteNumerical(
                DiscreteValue::Category(o) | DiscreteValue::Numerical { category: o, .. },
            ) => Some(o.value()),
            _ => None,
        }
    }

    /// Short, user-facing representation ("1.2", "Yes", "Male", "12.5 (>11.0)").
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Numerical(x) => format_number(*x),
            Self::Boolean(true) => "Yes".to_string(),
            Self::Boolean(false) => "No".to_string(),
            Self::MultiSelect(o) | Self::DiscreteNumerical(DiscreteValue::Category(o)) => {
                o.value().to_string()
            }
            Self::DiscreteNumerical(DiscreteValue::Numerical { value, category }) => {
                format!("{} ({})", format_number(*value), category.value())
            }
        }
    }
}

/// Format a number without trailing zeros (`1.2`, `50`).
#[must_use]
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

fn wrong_kind(variable: &Variable, expected: &'static str) -> ValueError {
    ValueError::WrongKind {
        key: variable.key.clone(),
        expected,
    }
}

fn unknown_option(variable: &Variable, option: &str) -> ValueError {
    ValueError::UnknownOption {
        key: variable.key.clone(),
        option: option.to_string(),
    }
}

fn unparseable(variable: &Variable, input: &str) -> ValueError {
    ValueError::Unparseable {
        key: variable.key.clone(),
        input: input.to_string(),
    }
}

fn parse_number(variable: &Variable, input: &str) -> Result<f64, ValueError> {
    input
        .trim()
        .parse::<f64>()
        .map_err(|_| unparseable(variable, input))
}

// =============================================================================
// RAW INPUT
// =============================================================================

/// Loosely typed user input before it is bound to a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInput {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl std::fmt::Display for RawInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// =============================================================================
// VALUE SET
// =============================================================================

/// The values entered for one calculation, keyed by variable key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSet(BTreeMap<String, Value>);

impl ValueSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value for `key`, replacing any earlier one.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for ValueSet {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A value that could not be bound to its variable.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidInput {
    pub key: String,
    pub error: ValueError,
}

/// Bind raw inputs to the given variables.
///
/// Inputs for unknown keys are ignored. Every invalid input is collected
/// rather than stopping at the first, so a form can flag all of them.
pub fn bind_inputs<'a, I>(
    variables: I,
    inputs: &BTreeMap<String, RawInput>,
) -> (ValueSet, Vec<InvalidInput>)
where
    I: IntoIterator<Item = &'a Variable>,
{
    let mut values = ValueSet::new();
    let mut invalid = Vec::new();

    for variable in variables {
        let Some(input) = inputs.get(&variable.key) else {
            continue;
        };
        match Value::from_input(variable, input) {
            Ok(value) => {
                values.insert(variable.key.clone(), value);
            }
            Err(error) => invalid.push(InvalidInput {
                key: variable.key.clone(),
                error,
            }),
        }
    }

    (values, invalid)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::variable::{Category, NumericalBounds};

    fn age() -> Variable {
        Variable::numerical("age", "Age", 1, NumericalBounds::new(0.0, 999.0), "years")
    }

    fn gender() -> Variable {
        Variable::multi_select("gender", "Gender", 1, ["Male", "Female"])
    }

    fn wbc() -> Variable {
        Variable::discrete_numerical(
            "wbc",
            "WBC",
            3,
            NumericalBounds::new(0.0, 50.0).with_max_inclusive(false),
            "x1000/mm^3",
            vec![
                Category::new("WNL", 11.0, true),
                Category::new(">11.0", 50.0, true),
            ],
        )
    }

    #[test]
    fn numerical_basic() {
        let value = Value::numerical(&age(), 1.2).unwrap();
        assert_eq!(value.display_string(), "1.2");
        assert_eq!(value.as_number(), Some(1.2));
    }

    #[test]
    fn numerical_too_high() {
        assert!(matches!(
            Value::numerical(&age(), 1000.0),
            Err(ValueError::TooHigh { .. })
        ));
    }

    #[test]
    fn numerical_too_low() {
        assert!(matches!(
            Value::numerical(&age(), -1.0),
            Err(ValueError::TooLow { .. })
        ));
    }

    #[test]
    fn discrete_upper_bound_exclusive_fails() {
        assert!(matches!(
            Value::discrete_numerical(&wbc(), 50.0),
            Err(ValueError::TooHigh { .. })
        ));
    }

    #[test]
    fn discrete_numerical_picks_category() {
        let value = Value::discrete_numerical(&wbc(), 12.5).unwrap();
        assert_eq!(value.selected_option(), Some(">11.0"));
        assert_eq!(value.display_string(), "12.5 (>11.0)");
    }

    #[test]
    fn multi_select_rejects_unknown_option() {
        assert!(Value::multi_select(&gender(), "Male").is_ok());
        assert!(matches!(
            Value::multi_select(&gender(), "Other"),
            Err(ValueError::UnknownOption { .. })
        ));
    }

    #[test]
    fn wrong_kind_is_reported() {
        assert!(matches!(
            Value::boolean(&age(), true),
            Err(ValueError::WrongKind { .. })
        ));
    }

    #[test]
    fn from_input_handles_text_forms() {
        let wbc = wbc();
        let by_category = Value::from_input(&wbc, &RawInput::Text("WNL".into())).unwrap();
        assert_eq!(
            by_category,
            Value::DiscreteNumerical(DiscreteValue::Category(MultiSelectOption::new("WNL")))
        );

        let by_number = Value::from_input(&wbc, &RawInput::Text("8".into())).unwrap();
        assert_eq!(by_number.selected_option(), Some("WNL"));

        let flag = Variable::boolean("dnr", "DNR", 1);
        assert_eq!(
            Value::from_input(&flag, &RawInput::Text("yes".into())),
            Ok(Value::Boolean(true))
        );
        assert!(Value::from_input(&age(), &RawInput::Text("abc".into())).is_err());
    }

    #[test]
    fn bind_inputs_collects_every_error() {
        let vars = vec![age(), gender(), wbc()];
        let mut inputs = BTreeMap::new();
        inputs.insert("age".to_string(), RawInput::Number(2000.0));
        inputs.insert("gender".to_string(), RawInput::Text("Female".into()));
        inputs.insert("wbc".to_string(), RawInput::Bool(true));
        inputs.insert("unknown".to_string(), RawInput::Number(1.0));

        let (values, invalid) = bind_inputs(&vars, &inputs);

        assert_eq!(values.len(), 1);
        assert!(values.contains("gender"));
        let keys: Vec<_> = invalid.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["age", "wbc"]);
    }
}
