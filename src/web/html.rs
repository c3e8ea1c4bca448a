//! Server-rendered pages.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use crate::calculator::{SubjectMark, MAX_SUBJECTS};
use crate::groups::GroupKey;
use crate::models::{Metric, StudentFields, StudentView, Tier, NAME_FIELD};

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Percent-encodes a query or path component.
pub fn encode_component(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

pub fn group_query(group: &GroupKey) -> String {
    match group.name() {
        Some(name) => format!("?group={}", encode_component(name)),
        None => String::new(),
    }
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 1100px; margin: 2rem auto; padding: 0 1rem; color: #222; }
nav a { margin-right: 1rem; }
table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
th, td { border: 1px solid #ddd; padding: 0.4rem 0.6rem; text-align: left; }
td.red { background: #fdd; }
td.average { background: #ffd; }
.zone-red-zone { color: #b00; font-weight: bold; }
.zone-average { color: #a60; }
.zone-good { color: #070; }
.error { color: #b00; }
.success { color: #070; }
label { display: block; margin-top: 0.6rem; }
"#;

fn layout(title: &str, username: Option<&str>, body: &str) -> String {
    let nav = match username {
        Some(username) => format!(
            r#"<nav><a href="/">Students</a><a href="/add">Add student</a><a href="/zone/Red%20Zone">Red Zone</a><a href="/zone/Average">Average</a><a href="/zone/Good">Good</a><a href="/calculator">Calculator</a><a href="/change_credentials">Account</a><a href="/logout">Log out ({})</a></nav>"#,
            escape(username)
        ),
        None => r#"<nav><a href="/login">Log in</a><a href="/calculator">Calculator</a></nav>"#
            .to_string(),
    };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{nav}\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn zone_class(tier: Tier) -> &'static str {
    match tier {
        Tier::RedZone => "zone-red-zone",
        Tier::Average => "zone-average",
        Tier::Good => "zone-good",
    }
}

fn students_table(students: &[StudentView]) -> String {
    if students.is_empty() {
        return "<p>No students found.</p>".to_string();
    }

    let mut table = String::from("<table>\n<tr><th>Name</th>");
    for metric in Metric::ALL {
        let _ = write!(table, "<th>{}</th>", escape(metric.label()));
    }
    table.push_str("<th>Zone</th></tr>\n");

    for student in students {
        let _ = write!(table, "<tr><td>{}</td>", escape(student.name()));
        for metric in Metric::ALL {
            let class = if student.categorization.red_zone_fields.contains(&metric) {
                " class=\"red\""
            } else if student.categorization.average_fields.contains(&metric) {
                " class=\"average\""
            } else {
                ""
            };
            let _ = write!(
                table,
                "<td{class}>{}</td>",
                escape(&student.fields.display_value(metric.as_str()))
            );
        }
        let _ = writeln!(
            table,
            "<td class=\"{}\">{}</td></tr>",
            zone_class(student.zone()),
            student.zone()
        );
    }
    table.push_str("</table>");
    table
}

pub fn index_page(
    username: &str,
    group: &GroupKey,
    groups: &[String],
    students: &[StudentView],
) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<p>Showing the {}.</p>", escape(&group.to_string()));

    body.push_str("<p>Groups: <a href=\"/?group=\">default</a>");
    for name in groups {
        let _ = write!(
            body,
            " | <a href=\"/?group={}\">{}</a>",
            encode_component(name),
            escape(name)
        );
    }
    body.push_str("</p>\n");

    let _ = writeln!(
        body,
        "<p><a href=\"/add{}\">Add a student to this group</a></p>",
        group_query(group)
    );
    body.push_str(&students_table(students));
    layout("Students", Some(username), &body)
}

pub fn zone_page(username: &str, tier: Tier, students: &[StudentView]) -> String {
    let body = format!(
        "<p>Default group students in the {} zone.</p>\n{}",
        tier,
        students_table(students)
    );
    layout(&format!("{tier} Students"), Some(username), &body)
}

pub fn add_student_page(
    username: &str,
    group: &GroupKey,
    errors: &BTreeMap<String, String>,
    form: &StudentFields,
) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<p>Adding to the {}.</p>\n<form method=\"post\" action=\"/add{}\">",
        escape(&group.to_string()),
        group_query(group)
    );

    let inputs = std::iter::once((NAME_FIELD, "Name"))
        .chain(Metric::ALL.iter().map(|metric| (metric.as_str(), metric.label())));
    for (field, label) in inputs {
        let _ = write!(
            body,
            "<label>{} <input name=\"{}\" value=\"{}\"></label>",
            escape(label),
            field,
            escape(&form.display_value(field))
        );
        if let Some(message) = errors.get(field) {
            let _ = write!(body, "<span class=\"error\">{}</span>", escape(message));
        }
        body.push('\n');
    }
    body.push_str("<p><button type=\"submit\">Add student</button></p>\n</form>");
    layout("Add Student", Some(username), &body)
}

pub fn login_page(error: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(error) = error {
        let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(error));
    }
    body.push_str(
        r#"<form method="post" action="/login">
<label>Username <input name="username" autocomplete="username"></label>
<label>Password <input name="password" type="password" autocomplete="current-password"></label>
<label><input name="remember" type="checkbox" value="on"> Remember me</label>
<p><button type="submit">Log in</button></p>
</form>"#,
    );
    layout("Log in", None, &body)
}

pub fn change_credentials_page(username: &str, error: Option<&str>, success: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(error) = error {
        let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(error));
    }
    if let Some(success) = success {
        let _ = writeln!(body, "<p class=\"success\">{}</p>", escape(success));
    }
    body.push_str(
        r#"<form method="post" action="/change_credentials">
<label>Current password <input name="current_password" type="password"></label>
<label>New username <input name="new_username"></label>
<label>New password <input name="new_password" type="password"></label>
<label>Confirm new password <input name="confirm_password" type="password"></label>
<p><button type="submit">Update</button></p>
</form>"#,
    );
    layout("Change Credentials", Some(username), &body)
}

pub enum CalculatorOutcome<'a> {
    Empty,
    Result {
        subjects: &'a [SubjectMark],
        percentage: f64,
    },
    Error(&'a str),
}

/// Number of subject rows to render: the submitted `num_subjects`, within
/// 1..=MAX_SUBJECTS.
fn subject_rows(form: &HashMap<String, String>) -> usize {
    form.get("num_subjects")
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_SUBJECTS)
}

fn form_value<'a>(form: &'a HashMap<String, String>, field: &str) -> &'a str {
    form.get(field).map(String::as_str).unwrap_or("")
}

/// `form` holds the submitted fields; rows are rendered for its
/// `num_subjects` and refilled from it.
pub fn calculator_page(form: &HashMap<String, String>, outcome: CalculatorOutcome<'_>) -> String {
    let mut body = String::new();
    match outcome {
        CalculatorOutcome::Empty => {}
        CalculatorOutcome::Error(error) => {
            let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(error));
        }
        CalculatorOutcome::Result {
            subjects,
            percentage,
        } => {
            body.push_str("<table>\n<tr><th>Subject</th><th>Marks</th><th>Max</th></tr>\n");
            for subject in subjects {
                let _ = writeln!(
                    body,
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape(&subject.name),
                    subject.obtained,
                    subject.max
                );
            }
            body.push_str("</table>\n");
            let _ = writeln!(body, "<p><strong>Percentage: {percentage:.2}%</strong></p>");
        }
    }
    let rows = subject_rows(form);
    let _ = writeln!(
        body,
        "<form method=\"get\" action=\"/calculator\">\n<label>Number of subjects <input name=\"num_subjects\" value=\"{rows}\"></label>\n<button type=\"submit\">Set rows</button>\n</form>"
    );
    let _ = writeln!(
        body,
        "<form method=\"post\" action=\"/calculator\">\n<input type=\"hidden\" name=\"num_subjects\" value=\"{rows}\">"
    );
    for i in 0..rows {
        let _ = writeln!(
            body,
            "<p><label>Subject <input name=\"subject_name_{i}\" value=\"{}\"></label><label>Marks <input name=\"mark_{i}\" value=\"{}\"></label><label>Max marks <input name=\"max_mark_{i}\" value=\"{}\"></label></p>",
            escape(form_value(form, &format!("subject_name_{i}"))),
            escape(form_value(form, &format!("mark_{i}"))),
            escape(form_value(form, &format!("max_mark_{i}"))),
        );
    }
    body.push_str("<p><button type=\"submit\">Calculate</button></p>\n</form>");
    layout("Grade Calculator", None, &body)
}
