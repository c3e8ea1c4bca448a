use std::collections::HashMap;

pub const MAX_SUBJECTS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectMark {
    pub name: String,
    pub obtained: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalculatorError {
    #[error("Number of subjects must be a whole number, got `{0}`")]
    SubjectCount(String),
    #[error("At most 50 subjects are supported")]
    TooManySubjects,
    #[error("{field} must be a number, got `{value}`")]
    NotANumber { field: String, value: String },
}

fn mark_value(form: &HashMap<String, String>, field: String) -> Result<f64, CalculatorError> {
    let raw = form.get(&field).map(|value| value.trim()).unwrap_or("");
    if raw.is_empty() {
        return Ok(0.0);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CalculatorError::NotANumber {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Reads `num_subjects` and the `subject_name_{i}`, `mark_{i}`,
/// `max_mark_{i}` fields. Blank marks count as zero.
pub fn parse_form(form: &HashMap<String, String>) -> Result<Vec<SubjectMark>, CalculatorError> {
    let count = match form.get("num_subjects").map(|value| value.trim()) {
        None | Some("") => 0,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| CalculatorError::SubjectCount(raw.to_string()))?,
    };
    if count > MAX_SUBJECTS {
        return Err(CalculatorError::TooManySubjects);
    }

    (0..count)
        .map(|i| {
            Ok(SubjectMark {
                name: form
                    .get(&format!("subject_name_{i}"))
                    .cloned()
                    .unwrap_or_default(),
                obtained: mark_value(form, format!("mark_{i}"))?,
                max: mark_value(form, format!("max_mark_{i}"))?,
            })
        })
        .collect()
}

pub fn totals(subjects: &[SubjectMark]) -> (f64, f64) {
    subjects
        .iter()
        .fold((0.0, 0.0), |(obtained, max), subject| {
            (obtained + subject.obtained, max + subject.max)
        })
}

/// Overall percentage; zero when there are no maximum marks.
pub fn percentage(subjects: &[SubjectMark]) -> f64 {
    let (obtained, max) = totals(subjects);
    if max > 0.0 {
        obtained * 100.0 / max
    } else {
        0.0
    }
}
