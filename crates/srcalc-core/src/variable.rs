//! # Variable Module
//!
//! Definitions of the clinical variables risk models are built from.
//!
//! A variable is identified by its `key`, which is unique across the
//! catalog. Four kinds exist:
//!
//! - **Numerical**: a bounded number with units (age, albumin).
//! - **Boolean**: a checkbox (preop pneumonia).
//! - **Multi-Select**: exactly one option out of a fixed list (gender).
//! - **Discrete Numerical**: a number that is bucketed into ordered
//!   categories (WBC "<= 11.0", "> 11.0"). The user may enter either the
//!   number or pick the category directly.

use crate::patient::VistaLab;
use crate::value::ValueError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum length of a variable key.
pub const KEY_MAX: usize = 40;

/// Maximum length of a variable display name.
pub const DISPLAY_NAME_MAX: usize = 80;

/// Maximum length of a variable's help text.
pub const HELP_TEXT_MAX: usize = 4000;

/// Maximum number of options on a multi-select variable.
pub const MAX_OPTIONS: usize = 20;

/// Name of the group holding the planned procedure. Values in this group are
/// always displayed first.
pub const PROCEDURE_GROUP: &str = "Planned Procedure";

// =============================================================================
// VARIABLE GROUP
// =============================================================================

/// A named bucket of variables shown together on the entry form.
///
/// Groups sort by `display_order`, then by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableGroup {
    pub id: u32,
    pub name: String,
    pub display_order: u32,
}

impl VariableGroup {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, display_order: u32) -> Self {
        Self {
            id,
            name: name.into(),
            display_order,
        }
    }

    /// True for the "Planned Procedure" group.
    #[must_use]
    pub fn is_procedure_group(&self) -> bool {
        self.name == PROCEDURE_GROUP
    }
}

impl Ord for VariableGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.display_order, &self.name, self.id).cmp(&(
            other.display_order,
            &other.name,
            other.id,
        ))
    }
}

impl PartialOrd for VariableGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// =============================================================================
// OPTIONS AND CATEGORIES
// =============================================================================

/// One selectable option of a multi-select variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiSelectOption(pub String);

impl MultiSelectOption {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

/// How a multi-select variable is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayType {
    #[default]
    Radio,
    Dropdown,
}

/// A category of a discrete numerical variable.
///
/// The category covers every value from the previous category's bound up to
/// `upper_bound` (inclusive or not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub option: MultiSelectOption,
    pub upper_bound: f64,
    pub upper_inclusive: bool,
}

impl Category {
    #[must_use]
    pub fn new(option: impl Into<String>, upper_bound: f64, upper_inclusive: bool) -> Self {
        Self {
            option: MultiSelectOption::new(option),
            upper_bound,
            upper_inclusive,
        }
    }

    /// Check whether `value` does not exceed this category's upper bound.
    #[must_use]
    pub fn admits(&self, value: f64) -> bool {
        value < self.upper_bound || (self.upper_inclusive && value == self.upper_bound)
    }
}

// =============================================================================
// NUMERICAL BOUNDS
// =============================================================================

/// Valid range of a numerical value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericalBounds {
    pub min: f64,
    pub max: f64,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
}

impl Default for NumericalBounds {
    /// `[0, 1000]`.
    fn default() -> Self {
        Self::new(0.0, 1000.0)
    }
}

impl NumericalBounds {
    /// Inclusive range `[min, max]`.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    #[must_use]
    pub fn with_min_inclusive(mut self, inclusive: bool) -> Self {
        self.min_inclusive = inclusive;
        self
    }

    #[must_use]
    pub fn with_max_inclusive(mut self, inclusive: bool) -> Self {
        self.max_inclusive = inclusive;
        self
    }

    /// Check that `value` lies inside the range.
    pub fn check(&self, value: f64) -> Result<(), ValueError> {
        if value.is_nan() {
            return Err(ValueError::NotANumber);
        }
        if value < self.min || (value == self.min && !self.min_inclusive) {
            return Err(ValueError::TooLow {
                value,
                min: self.min,
                inclusive: self.min_inclusive,
            });
        }
        if value > self.max || (value == self.max && !self.max_inclusive) {
            return Err(ValueError::TooHigh {
                value,
                max: self.max,
                inclusive: self.max_inclusive,
            });
        }
        Ok(())
    }
}

// =============================================================================
// RETRIEVAL
// =============================================================================

/// The patient datum used to pre-fill a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RetrievalKey {
    Age,
    Gender,
    Height,
    Weight,
    Weight6MonthsAgo,
    Bmi,
    Lab(VistaLab),
}

// =============================================================================
// VARIABLE
// =============================================================================

/// Kind-specific part of a variable definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariableKind {
    Numerical {
        #[serde(default)]
        bounds: NumericalBounds,
        units: String,
    },
    Boolean,
    MultiSelect {
        display_type: DisplayType,
        options: Vec<MultiSelectOption>,
    },
    DiscreteNumerical {
        #[serde(default)]
        bounds: NumericalBounds,
        units: String,
        categories: Vec<Category>,
    },
}

/// A clinical variable definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Unique identifier, referenced by model terms and value files.
    pub key: String,
    pub display_name: String,
    pub help_text: Option<String>,
    pub group_id: u32,
    pub retrieval: Option<RetrievalKey>,
    pub kind: VariableKind,
}

impl Variable {
    /// Create a variable with no help text and no retrieval.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        group_id: u32,
        kind: VariableKind,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            help_text: None,
            group_id,
            retrieval: None,
            kind,
        }
    }

    /// Convenience constructor for a numerical variable.
    #[must_use]
    pub fn numerical(
        key: impl Into<String>,
        display_name: impl Into<String>,
        group_id: u32,
        bounds: NumericalBounds,
        units: impl Into<String>,
    ) -> Self {
        Self::new(
            key,
            display_name,
            group_id,
            VariableKind::Numerical {
                bounds,
                units: units.into(),
            },
        )
    }

    /// Convenience constructor for a boolean variable.
    #[must_use]
    pub fn boolean(key: impl Into<String>, display_name: impl Into<String>, group_id: u32) -> Self {
        Self::new(key, display_name, group_id, VariableKind::Boolean)
    }

    /// Convenience constructor for a radio-button multi-select variable.
    #[must_use]
    pub fn multi_select<I, S>(
        key: impl Into<String>,
        display_name: impl Into<String>,
        group_id: u32,
        options: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            key,
            display_name,
            group_id,
            VariableKind::MultiSelect {
                display_type: DisplayType::Radio,
                options: options.into_iter().map(MultiSelectOption::new).collect(),
            },
        )
    }

    /// Convenience constructor for a discrete numerical variable.
    #[must_use]
    pub fn discrete_numerical(
        key: impl Into<String>,
        display_name: impl Into<String>,
        group_id: u32,
        bounds: NumericalBounds,
        units: impl Into<String>,
        categories: Vec<Category>,
    ) -> Self {
        Self::new(
            key,
            display_name,
            group_id,
            VariableKind::DiscreteNumerical {
                bounds,
                units: units.into(),
                categories,
            },
        )
    }

    #[must_use]
    pub fn with_help_text(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = Some(help_text.into());
        self
    }

    #[must_use]
    pub fn with_retrieval(mut self, retrieval: RetrievalKey) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// User-facing name of the variable kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            VariableKind::Numerical { .. } => "Numerical",
            VariableKind::Boolean => "Boolean",
            VariableKind::MultiSelect { .. } => "Multi-Select",
            VariableKind::DiscreteNumerical { .. } => "Discrete Numerical",
        }
    }

    /// Units of a numerical or discrete numerical variable.
    #[must_use]
    pub fn units(&self) -> Option<&str> {
        match &self.kind {
            VariableKind::Numerical { units, .. }
            | VariableKind::DiscreteNumerical { units, .. } => Some(units.as_str()),
            _ => None,
        }
    }

    /// Options of a multi-select variable, or categories of a discrete one.
    pub fn option_names(&self) -> Vec<&str> {
        match &self.kind {
            VariableKind::MultiSelect { options, .. } => {
                options.iter().map(MultiSelectOption::value).collect()
            }
            VariableKind::DiscreteNumerical { categories, .. } => {
                categories.iter().map(|c| c.option.value()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Check whether `option` is one of the options or categories.
    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.option_names().contains(&option)
    }

    /// Find the category a number belongs to.
    ///
    /// The number is first checked against the bounds. Returns
    /// `ValueError::WrongKind` for non-discrete variables.
    pub fn categorize(&self, value: f64) -> Result<&Category, ValueError> {
        let VariableKind::DiscreteNumerical {
            bounds, categories, ..
        } = &self.kind
        else {
            return Err(ValueError::WrongKind {
                key: self.key.clone(),
                expected: "Discrete Numerical",
            });
        };
        bounds.check(value)?;
        categories
            .iter()
            .find(|c| c.admits(value))
            .ok_or(ValueError::NoCategory { value })
    }

    /// True when discrete categories have strictly increasing upper bounds.
    ///
    /// Always true for other kinds.
    #[must_use]
    pub fn categories_in_order(&self) -> bool {
        match &self.kind {
            VariableKind::DiscreteNumerical { categories, .. } => categories
                .windows(2)
                .all(|pair| pair[0].upper_bound < pair[1].upper_bound),
            _ => true,
        }
    }
}

/// Order variables by display name, ignoring case first.
pub fn compare_display_names(a: &Variable, b: &Variable) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.display_name.cmp(&b.display_name))
        .then_with(|| a.key.cmp(&b.key))
}

// =============================================================================
// TESTS
// =============================================================================
