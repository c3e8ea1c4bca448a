use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::models::{Metric, StudentFields};

/// Upper bounds on submitted values. These are sanity checks, separate from
/// the tier thresholds.
pub const CEILINGS: [(Metric, f64, &str); 4] = [
    (
        Metric::PreviousSemPercent,
        10.0,
        "Previous Sem GPA value must be less than or equal to 10",
    ),
    (
        Metric::ExtraActivitiesScore,
        10.0,
        "Extra Activities value must be less than or equal to 10",
    ),
    (
        Metric::ProjectCount,
        10.0,
        "Projects value must be less than or equal to 10",
    ),
    (
        Metric::Backlogs,
        15.0,
        "Backlogs value must be less than or equal to 15",
    ),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<(Metric, String)>,
}

impl ValidationErrors {
    pub fn push(&mut self, metric: Metric, message: impl Into<String>) {
        self.errors.push((metric, message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Field name to message, for annotating a form.
    pub fn by_field(&self) -> BTreeMap<String, String> {
        self.errors
            .iter()
            .map(|(metric, message)| (metric.as_str().to_string(), message.clone()))
            .collect()
    }

    /// Messages in check order, for API responses.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|(_, message)| message.clone()).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Reads a value for ceiling checks. Unparseable input is not a validation
/// failure; it is coerced to zero when categorized.
fn parsed(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn validate_ceilings(fields: &StudentFields) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    for (metric, ceiling, message) in CEILINGS {
        if let Some(value) = parsed(fields.metric(metric)) {
            if value > ceiling {
                errors.push(metric, message);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
