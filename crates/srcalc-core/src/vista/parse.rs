//! Parsers for RPC responses.
//!
//! Every parser works on a single response (or a single line of one) and
//! has no side effects, so a malformed answer can be rejected without
//! touching anything else that was retrieved.

use crate::patient::{Gender, HealthFactor, RetrievedValue};
use chrono::{Months, NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Returned by the vital history RPC when there is nothing in the range.
pub const NO_WEIGHT: &str = "0^NO WEIGHT ENTERED WITHIN THIS PERIOD";

pub const HEIGHT_UNITS: &str = "inches";
pub const WEIGHT_UNITS: &str = "lbs.";

/// Maximum width of a progress note line.
pub const MAX_LINE_LENGTH: usize = 80;

/// Indent of a wrapped continuation line.
pub const CONTINUATION_INDENT: &str = "    ";

const VITALS_DATE: &str = "(%m/%d/%y@%H:%M)";
const VITAL_HISTORY_DATE: &str = "%m/%d/%y@%H:%M";
const LAB_DATE: &str = "%m/%d/%Y@%H:%M:%S";
const HEALTH_FACTOR_DATE: &str = "%m/%d/%y";

/// A response that does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected at least {expected} lines, got {actual}")]
    TooFewLines { expected: usize, actual: usize },

    #[error("no {field} in '{line}'")]
    MissingField { field: &'static str, line: String },

    #[error("invalid {field}: '{value}'")]
    Invalid { field: &'static str, value: String },
}

/// Split on runs of separator characters. Leading or trailing separators
/// yield empty tokens, so token positions are stable.
fn split_runs(line: &str, is_separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_separator = false;
    for (i, c) in line.char_indices() {
        if is_separator(c) {
            if !in_separator {
                tokens.push(&line[start..i]);
                in_separator = true;
            }
        } else if in_separator {
            start = i;
            in_separator = false;
        }
    }
    tokens.push(if in_separator { "" } else { &line[start..] });
    tokens
}

fn field<'a>(tokens: &[&'a str], index: usize, name: &'static str, line: &str) -> Result<&'a str, ParseError> {
    tokens.get(index).copied().ok_or_else(|| ParseError::MissingField {
        field: name,
        line: line.to_string(),
    })
}

fn number(value: &str, name: &'static str) -> Result<f64, ParseError> {
    value.trim().parse().map_err(|_| ParseError::Invalid {
        field: name,
        value: value.to_string(),
    })
}

fn date_time(value: &str, format: &str, name: &'static str) -> Result<NaiveDateTime, ParseError> {
    NaiveDateTime::parse_from_str(value, format).map_err(|_| ParseError::Invalid {
        field: name,
        value: value.to_string(),
    })
}

// =============================================================================
// DEMOGRAPHICS
// =============================================================================

/// Name, age and gender of a patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demographics {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
}

/// Parse `NAME^AGE^GENDER`.
pub fn parse_demographics(lines: &[String]) -> Result<Demographics, ParseError> {
    let line = lines.first().ok_or(ParseError::TooFewLines {
        expected: 1,
        actual: 0,
    })?;
    let tokens: Vec<&str> = line.split('^').collect();
    let name = field(&tokens, 0, "name", line)?;
    let age = field(&tokens, 1, "age", line)?;
    let gender = field(&tokens, 2, "gender", line)?;

    Ok(Demographics {
        name: name.to_string(),
        age: age.trim().parse().map_err(|_| ParseError::Invalid {
            field: "age",
            value: age.to_string(),
        })?,
        gender: Gender::from_vista(gender),
    })
}

// =============================================================================
// VITALS
// =============================================================================

/// Line of the vitals summary holding the height.
pub const HEIGHT_LINE: usize = 5;
/// Line of the vitals summary holding the weight.
pub const WEIGHT_LINE: usize = 6;
/// Line of the vitals summary holding the BMI.
pub const BMI_LINE: usize = 7;

/// Parse the height line: `Ht:  (MM/dd/yy@HH:mm)  5 ft 9 in (175.26 cm)`.
pub fn parse_height(line: &str) -> Result<RetrievedValue, ParseError> {
    let tokens = split_runs(line, char::is_whitespace);
    let measured_at = date_time(field(&tokens, 1, "height date", line)?, VITALS_DATE, "height date")?;
    let feet = number(field(&tokens, 2, "feet", line)?, "feet")?;
    let inches = number(field(&tokens, 4, "inches", line)?, "inches")?;
    Ok(RetrievedValue::new(feet * 12.0 + inches, measured_at, HEIGHT_UNITS))
}

/// Parse the weight line: `Wt:  (MM/dd/yy@HH:mm)  190.00 lb (86.36 kg)`.
pub fn parse_weight(line: &str) -> Result<RetrievedValue, ParseError> {
    let tokens = split_runs(line, char::is_whitespace);
    let measured_at = date_time(field(&tokens, 1, "weight date", line)?, VITALS_DATE, "weight date")?;
    let weight = number(field(&tokens, 2, "weight", line)?, "weight")?;
    Ok(RetrievedValue::new(weight, measured_at, WEIGHT_UNITS))
}

/// Parse the BMI line. The value is the second to last token; BMI is
/// computed from the weight, so it carries the weight's date.
pub fn parse_bmi(line: &str, weight_measured_at: NaiveDateTime) -> Result<RetrievedValue, ParseError> {
    let tokens = split_runs(line, char::is_whitespace);
    let index = tokens.len().checked_sub(2).ok_or_else(|| ParseError::MissingField {
        field: "bmi",
        line: line.to_string(),
    })?;
    let bmi = number(tokens[index], "bmi")?;
    Ok(RetrievedValue::new(bmi, weight_measured_at, ""))
}

// =============================================================================
// WEIGHT HISTORY
// =============================================================================

/// Format a date the FileMan way: `YYYMMDD`, with the year counted from 1700.
#[must_use]
pub fn fileman_date(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!("{:03}{:02}{:02}", date.year() - 1700, date.month(), date.day())
}

/// Argument for the weight history RPC: 3 to 12 months before the most
/// recent weight, as `DFN^END^WT^START`.
#[must_use]
pub fn weight_history_arg(dfn: u32, weight_measured_at: NaiveDateTime) -> String {
    let date = weight_measured_at.date();
    let end = date.checked_sub_months(Months::new(6)).unwrap_or(date);
    let start = date.checked_sub_months(Months::new(12)).unwrap_or(date);
    format!("{}^{}^WT^{}", dfn, fileman_date(end), fileman_date(start))
}

/// Parse the weight history.
///
/// Each measurement takes two lines; the most recent comes last, so its
/// weight line is the second to last line:
///
/// ```text
/// 22296^08/24/09@14:00 Wt: 190.00 lb (86.36 kg) _NURSE,ONE
///        @14:00 Body Mass Index: 26.56
/// ```
pub fn parse_weight_history(lines: &[String]) -> Result<Option<RetrievedValue>, ParseError> {
    if lines.first().is_none_or(|first| first == NO_WEIGHT) {
        return Ok(None);
    }
    let index = lines.len().checked_sub(2).ok_or(ParseError::TooFewLines {
        expected: 2,
        actual: lines.len(),
    })?;
    let line = &lines[index];
    let tokens = split_runs(line, |c| c.is_whitespace() || c == '^');
    let measured_at = date_time(
        field(&tokens, 1, "weight date", line)?,
        VITAL_HISTORY_DATE,
        "weight date",
    )?;
    let weight = number(field(&tokens, 3, "weight", line)?, "weight")?;
    Ok(Some(RetrievedValue::new(weight, measured_at, WEIGHT_UNITS)))
}

// =============================================================================
// LABS, HEALTH FACTORS, MEDICATIONS
// =============================================================================

/// Parse a lab result: `NAME^VALUE^MM/dd/yyyy@HH:mm:ss^UNITS`. Units may be
/// empty.
pub fn parse_lab(line: &str) -> Result<RetrievedValue, ParseError> {
    let tokens: Vec<&str> = line.split('^').collect();
    let value = number(field(&tokens, 1, "lab value", line)?, "lab value")?;
    let measured_at = date_time(field(&tokens, 2, "lab date", line)?, LAB_DATE, "lab date")?;
    let units = field(&tokens, 3, "lab units", line)?;
    Ok(RetrievedValue::new(value, measured_at, units))
}

/// Parse a health factor: `MM/dd/yy^NAME`.
pub fn parse_health_factor(line: &str) -> Result<HealthFactor, ParseError> {
    let tokens: Vec<&str> = line.split('^').collect();
    let date = field(&tokens, 0, "health factor date", line)?;
    let name = field(&tokens, 1, "health factor name", line)?;
    let date = NaiveDate::parse_from_str(date, HEALTH_FACTOR_DATE).map_err(|_| ParseError::Invalid {
        field: "health factor date",
        value: date.to_string(),
    })?;
    Ok(HealthFactor {
        date,
        name: name.to_string(),
    })
}

/// Parse an active medication: `ID^NAME^DATE^^^DOSE`, keeping the name.
pub fn parse_medication(line: &str) -> Result<String, ParseError> {
    let tokens: Vec<&str> = line.split('^').collect();
    Ok(field(&tokens, 1, "medication name", line)?.to_string())
}

// =============================================================================
// NOTES
// =============================================================================

/// Wrap a note body to [`MAX_LINE_LENGTH`] columns.
///
/// Lines break at the last space that fits. Words longer than a line are
/// left intact. Continuation lines are indented.
#[must_use]
pub fn wrap_note(body: &str) -> Vec<String> {
    body.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .flat_map(|line| wrap_line(line, MAX_LINE_LENGTH))
        .collect()
}

fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let text = |from: usize, to: usize| chars[from..to].iter().collect::<String>();
    let mut segments = Vec::new();
    let mut offset = 0;

    while chars.len() - offset > width {
        if chars[offset] == ' ' {
            offset += 1;
            continue;
        }
        let window_end = (offset + width).min(chars.len() - 1);
        let before = (offset..=window_end).rev().find(|&i| chars[i] == ' ');
        let split = before.or_else(|| (offset + width..chars.len()).find(|&i| chars[i] == ' '));
        match split {
            Some(at) => {
                segments.push(text(offset, at));
                offset = at + 1;
            }
            None => {
                segments.push(text(offset, chars.len()));
                offset = chars.len();
            }
        }
    }
    if offset < chars.len() || segments.is_empty() {
        segments.push(text(offset, chars.len()));
    }

    segments
        .into_iter()
        .enumerate()
        .map(|(i, s)| if i == 0 { s } else { format!("{}{}", CONTINUATION_INDENT, s) })
        .collect()
}

/// Split an operation result `CODE^MESSAGE`.
#[must_use]
pub fn parse_operation_result(line: &str) -> (&str, &str) {
    line.split_once('^').unwrap_or((line, ""))
}

// =============================================================================
// TESTS
// =============================================================================
