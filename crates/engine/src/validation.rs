//! Input validation for the editable constraint columns.
//!
//! Only two columns accept edits:
//!
//! - **VIEW**: mandatory, a finite number strictly greater than zero.
//! - **SHORTLIMIT**: optional, a finite number strictly less than zero;
//!   blank input clears the field.
//!
//! Every other column passes through unchanged. Whether a column may be
//! edited at all is decided by the data manager, not here.
//!
//! Column names are matched case-insensitively.

use serde::{Deserialize, Serialize};

use crate::cell::CellValue;

pub const VIEW: &str = "VIEW";
pub const SHORTLIMIT: &str = "SHORTLIMIT";

const VIEW_RULE: &str = "VIEW must be a positive number greater than 0";
const SHORTLIMIT_RULE: &str = "SHORTLIMIT must be negative or empty";
const SHORTLIMIT_ZERO: &str = "SHORTLIMIT cannot be zero - must be negative or empty";

/// Outcome of a single validation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
    /// Value to store when valid. Numeric for VIEW/SHORTLIMIT, `Empty` for a
    /// cleared SHORTLIMIT, the raw input for pass-through columns.
    pub sanitized_value: CellValue,
}

impl ValidationResult {
    fn valid(value: CellValue) -> Self {
        Self { is_valid: true, error_message: None, sanitized_value: value }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message.into()),
            sanitized_value: CellValue::Empty,
        }
    }
}

/// Static description of a column's rule, for inline hints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_min: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_max: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_none: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_any: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Stateless validator for VIEW and SHORTLIMIT input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataValidator;

impl DataValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `value` for `column`. Never panics.
    pub fn validate_cell(&self, column: &str, value: &CellValue) -> ValidationResult {
        if column.eq_ignore_ascii_case(VIEW) {
            self.validate_view(value)
        } else if column.eq_ignore_ascii_case(SHORTLIMIT) {
            self.validate_shortlimit(value)
        } else {
            ValidationResult::valid(value.clone())
        }
    }

    pub fn validate_view(&self, value: &CellValue) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::invalid(VIEW_RULE);
        }
        let Some(n) = self.sanitize_numeric_input(value) else {
            return ValidationResult::invalid(unconvertible(VIEW, value));
        };
        if n <= 0.0 {
            return ValidationResult::invalid(VIEW_RULE);
        }
        ValidationResult::valid(CellValue::Number(n))
    }

    pub fn validate_shortlimit(&self, value: &CellValue) -> ValidationResult {
        if value.is_empty() {
            return ValidationResult::valid(CellValue::Empty);
        }
        let Some(n) = self.sanitize_numeric_input(value) else {
            return ValidationResult::invalid(unconvertible(SHORTLIMIT, value));
        };
        if n == 0.0 {
            return ValidationResult::invalid(SHORTLIMIT_ZERO);
        }
        if n > 0.0 {
            return ValidationResult::invalid(SHORTLIMIT_RULE);
        }
        ValidationResult::valid(CellValue::Number(n))
    }

    /// Convert input to a finite number. Numbers pass through; text is
    /// trimmed and parsed (decimal or scientific notation). Blank text,
    /// unparsable text and non-finite results all yield `None`.
    pub fn sanitize_numeric_input(&self, value: &CellValue) -> Option<f64> {
        match value {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(*n).filter(|n| n.is_finite()),
            CellValue::Text(s) => {
                let cleaned = s.trim();
                if cleaned.is_empty() {
                    return None;
                }
                cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
    }

    pub fn column_rules(&self, column: &str) -> ColumnRules {
        if column.eq_ignore_ascii_case(VIEW) {
            ColumnRules {
                min_value: Some(0.0),
                exclusive_min: Some(true),
                allow_none: Some(false),
                description: Some(VIEW_RULE.to_string()),
                ..Default::default()
            }
        } else if column.eq_ignore_ascii_case(SHORTLIMIT) {
            ColumnRules {
                max_value: Some(0.0),
                exclusive_max: Some(true),
                allow_none: Some(true),
                description: Some(SHORTLIMIT_RULE.to_string()),
                ..Default::default()
            }
        } else {
            ColumnRules {
                allow_any: Some(true),
                ..Default::default()
            }
        }
    }
}

fn unconvertible(column: &str, value: &CellValue) -> String {
    format!("{}: unable to convert '{}' to a number", column, value.display())
}
