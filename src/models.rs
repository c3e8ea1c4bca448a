use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const NAME_FIELD: &str = "name";

/// The nine numeric metrics recorded for every student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    WeekendExam,
    MidMarks,
    CrtScore,
    AttendancePercent,
    GdAttendance,
    PreviousSemPercent,
    ExtraActivitiesScore,
    ProjectCount,
    Backlogs,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::WeekendExam,
        Metric::MidMarks,
        Metric::CrtScore,
        Metric::AttendancePercent,
        Metric::GdAttendance,
        Metric::PreviousSemPercent,
        Metric::ExtraActivitiesScore,
        Metric::ProjectCount,
        Metric::Backlogs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::WeekendExam => "weekend_exam",
            Metric::MidMarks => "mid_marks",
            Metric::CrtScore => "crt_score",
            Metric::AttendancePercent => "attendance_percent",
            Metric::GdAttendance => "gd_attendance",
            Metric::PreviousSemPercent => "previous_sem_percent",
            Metric::ExtraActivitiesScore => "extra_activities_score",
            Metric::ProjectCount => "project_count",
            Metric::Backlogs => "backlogs",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::WeekendExam => "Weekend Exam",
            Metric::MidMarks => "Mid Marks",
            Metric::CrtScore => "CRT Score",
            Metric::AttendancePercent => "Attendance %",
            Metric::GdAttendance => "GD Attendance %",
            Metric::PreviousSemPercent => "Previous Sem GPA",
            Metric::ExtraActivitiesScore => "Extra Activities",
            Metric::ProjectCount => "Projects",
            Metric::Backlogs => "Backlogs",
        }
    }

    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|metric| metric.as_str() == name)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall risk classification of a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "Red Zone")]
    RedZone,
    Average,
    Good,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Good, Tier::Average, Tier::RedZone];

    pub fn label(self) -> &'static str {
        match self {
            Tier::RedZone => "Red Zone",
            Tier::Average => "Average",
            Tier::Good => "Good",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown zone `{0}`")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "red zone" | "red-zone" | "red_zone" | "red" => Ok(Tier::RedZone),
            "average" => Ok(Tier::Average),
            "good" => Ok(Tier::Good),
            _ => Err(UnknownTier(value.to_string())),
        }
    }
}

/// Raw submitted values for one student: the name plus the nine metrics,
/// kept exactly as received. Keys outside that fixed list are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentFields(BTreeMap<String, Value>);

fn is_known_field(key: &str) -> bool {
    key == NAME_FIELD || Metric::from_name(key).is_some()
}

impl StudentFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_form(form: &HashMap<String, String>) -> Self {
        let mut fields = Self::new();
        for (key, value) in form {
            fields.set(key, Value::String(value.clone()));
        }
        fields
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    /// Returns false when `key` is not one of the student fields.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if !is_known_field(key) {
            return false;
        }
        self.0.insert(key.to_string(), value);
        true
    }

    pub fn metric(&self, metric: Metric) -> Option<&Value> {
        self.0.get(metric.as_str())
    }

    pub fn name(&self) -> &str {
        match self.0.get(NAME_FIELD) {
            Some(Value::String(name)) => name,
            _ => "",
        }
    }

    /// Text form of a stored value, as shown in tables and re-filled forms.
    pub fn display_value(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn merge(&mut self, other: &StudentFields) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorization {
    pub zone: Tier,
    pub red_zone_fields: Vec<Metric>,
    pub average_fields: Vec<Metric>,
}

/// A stored student. `cached` is whatever tier was written alongside the raw
/// fields; it is display data only and may be stale.
#[derive(Debug, Clone)]
pub struct StudentDocument {
    pub id: Uuid,
    pub fields: StudentFields,
    pub cached: Option<Categorization>,
    pub created_at: DateTime<Utc>,
}

/// A student as returned to callers, with the tier recomputed from the raw fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentView {
    pub id: Uuid,
    #[serde(flatten)]
    pub fields: StudentFields,
    #[serde(flatten)]
    pub categorization: Categorization,
}

impl StudentView {
    pub fn fresh(document: StudentDocument) -> Self {
        let categorization = crate::risk::categorize(&document.fields);
        Self {
            id: document.id,
            fields: document.fields,
            categorization,
        }
    }

    pub fn name(&self) -> &str {
        self.fields.name()
    }

    pub fn zone(&self) -> Tier {
        self.categorization.zone
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoneCounts {
    #[serde(rename = "Good")]
    pub good: usize,
    #[serde(rename = "Average")]
    pub average: usize,
    #[serde(rename = "Red Zone")]
    pub red_zone: usize,
}

impl ZoneCounts {
    pub fn tally(students: &[StudentView]) -> Self {
        let mut counts = Self::default();
        for student in students {
            counts.add(student.zone());
        }
        counts
    }

    pub fn add(&mut self, tier: Tier) {
        match tier {
            Tier::Good => self.good += 1,
            Tier::Average => self.average += 1,
            Tier::RedZone => self.red_zone += 1,
        }
    }

    pub fn get(&self, tier: Tier) -> usize {
        match tier {
            Tier::Good => self.good,
            Tier::Average => self.average,
            Tier::RedZone => self.red_zone,
        }
    }

    pub fn total(&self) -> usize {
        self.good + self.average + self.red_zone
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredential {
    pub username: String,
    pub password_hash: String,
    pub salt: String,
    pub remember_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parses_labels_and_slugs() {
        assert_eq!("Red Zone".parse::<Tier>().unwrap(), Tier::RedZone);
        assert_eq!("red".parse::<Tier>().unwrap(), Tier::RedZone);
        assert_eq!("AVERAGE".parse::<Tier>().unwrap(), Tier::Average);
        assert_eq!(" good ".parse::<Tier>().unwrap(), Tier::Good);
        assert!("excellent".parse::<Tier>().is_err());
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let mut form = HashMap::new();
        form.insert("name".to_string(), "Asha".to_string());
        form.insert("weekend_exam".to_string(), "72".to_string());
        form.insert("zone".to_string(), "Good".to_string());
        form.insert("_id".to_string(), "abc".to_string());

        let fields = StudentFields::from_form(&form);
        assert_eq!(fields.name(), "Asha");
        assert_eq!(fields.display_value("weekend_exam"), "72");
        assert_eq!(fields, StudentFields::new().with("name", "Asha").with("weekend_exam", "72"));
    }

    #[test]
    fn merge_overwrites_only_supplied_fields() {
        let mut stored = StudentFields::new()
            .with("name", "Ravi")
            .with("mid_marks", "70")
            .with("backlogs", "0");
        let partial = StudentFields::new().with("mid_marks", "88");

        stored.merge(&partial);
        assert_eq!(stored.display_value("mid_marks"), "88");
        assert_eq!(stored.display_value("backlogs"), "0");
        assert_eq!(stored.name(), "Ravi");
    }

    #[test]
    fn view_serializes_flat_with_labels() {
        let view = StudentView {
            id: Uuid::nil(),
            fields: StudentFields::new().with("name", "Meera").with("backlogs", 2),
            categorization: Categorization {
                zone: Tier::RedZone,
                red_zone_fields: vec![Metric::Backlogs],
                average_fields: vec![],
            },
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["name"], "Meera");
        assert_eq!(json["backlogs"], 2);
        assert_eq!(json["zone"], "Red Zone");
        assert_eq!(json["red_zone_fields"][0], "backlogs");
    }
}
