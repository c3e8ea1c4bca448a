use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::groups::GroupKey;
use crate::models::{Metric, StudentView, Tier, ZoneCounts};

fn field_list(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(|metric| metric.label())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_name(student: &StudentView) -> &str {
    match student.name() {
        "" => "(unnamed)",
        name => name,
    }
}

pub fn build_report(group: &GroupKey, generated_at: DateTime<Utc>, students: &[StudentView]) -> String {
    let counts = ZoneCounts::tally(students);
    let mut output = String::new();

    let _ = writeln!(output, "# Student Zone Report");
    let _ = writeln!(
        output,
        "Generated for {} on {}",
        group,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Zone Mix");

    if students.is_empty() {
        let _ = writeln!(output, "No students recorded in this group.");
        return output;
    }

    for tier in Tier::ALL {
        let count = counts.get(tier);
        let share = count as f64 * 100.0 / counts.total() as f64;
        let _ = writeln!(output, "- {}: {} students ({:.0}%)", tier, count, share);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Red Zone Students");
    let red: Vec<&StudentView> = students
        .iter()
        .filter(|student| student.zone() == Tier::RedZone)
        .collect();
    if red.is_empty() {
        let _ = writeln!(output, "No students in the red zone.");
    } else {
        for student in red {
            let _ = writeln!(
                output,
                "- {}: {}",
                display_name(student),
                field_list(&student.categorization.red_zone_fields)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Average Students");
    let average: Vec<&StudentView> = students
        .iter()
        .filter(|student| student.zone() == Tier::Average)
        .collect();
    if average.is_empty() {
        let _ = writeln!(output, "No students in the average zone.");
    } else {
        for student in average {
            let _ = writeln!(
                output,
                "- {}: {}",
                display_name(student),
                field_list(&student.categorization.average_fields)
            );
        }
    }

    output
}
