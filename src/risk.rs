use serde_json::Value;

use crate::models::{Categorization, Metric, StudentFields, Tier};

/// How a single metric is judged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// Red below `red`, average below `average`, good otherwise.
    Bands { red: f64, average: f64 },
    /// Any positive value is red.
    RedIfPositive,
    /// Zero is average. An earlier ruleset flagged zero as red; the current
    /// ruleset keeps these fields out of the red list.
    AverageIfZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Red,
    Average,
    Good,
}

pub fn rule_for(metric: Metric) -> Rule {
    match metric {
        Metric::WeekendExam | Metric::MidMarks | Metric::CrtScore => Rule::Bands {
            red: 60.0,
            average: 80.0,
        },
        Metric::AttendancePercent | Metric::GdAttendance => Rule::Bands {
            red: 70.0,
            average: 80.0,
        },
        Metric::PreviousSemPercent => Rule::Bands {
            red: 7.0,
            average: 8.0,
        },
        Metric::Backlogs => Rule::RedIfPositive,
        Metric::ExtraActivitiesScore | Metric::ProjectCount => Rule::AverageIfZero,
    }
}

/// Lenient numeric read: numbers pass through, strings are trimmed and parsed,
/// and anything else (missing, null, non-numeric text, NaN, infinities) is 0.
pub fn numeric_or_zero(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite()).unwrap_or(0.0)
}

pub fn judge(rule: Rule, value: f64) -> Verdict {
    match rule {
        Rule::Bands { red, average } => {
            if value < red {
                Verdict::Red
            } else if value < average {
                Verdict::Average
            } else {
                Verdict::Good
            }
        }
        Rule::RedIfPositive if value > 0.0 => Verdict::Red,
        Rule::AverageIfZero if value == 0.0 => Verdict::Average,
        _ => Verdict::Good,
    }
}

pub fn categorize(fields: &StudentFields) -> Categorization {
    let mut red_zone_fields = Vec::new();
    let mut average_fields = Vec::new();

    for metric in Metric::ALL {
        let value = numeric_or_zero(fields.metric(metric));
        match judge(rule_for(metric), value) {
            Verdict::Red => red_zone_fields.push(metric),
            Verdict::Average => average_fields.push(metric),
            Verdict::Good => {}
        }
    }

    if !red_zone_fields.is_empty() {
        Categorization {
            zone: Tier::RedZone,
            red_zone_fields,
            average_fields,
        }
    } else if !average_fields.is_empty() {
        Categorization {
            zone: Tier::Average,
            red_zone_fields,
            average_fields,
        }
    } else {
        Categorization {
            zone: Tier::Good,
            red_zone_fields,
            average_fields,
        }
    }
}
