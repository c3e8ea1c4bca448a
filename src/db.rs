use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, StoreError};
use crate::groups::{Collection, GroupKey};
use crate::models::{Categorization, Metric, StudentDocument, StudentFields, Tier, UserCredential};
use crate::students;

/// Document storage for students, groups and login credentials.
///
/// Implementations only need per-operation atomicity; concurrent writers to
/// the same record race and the last write wins.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_all(&self, group: &GroupKey) -> Result<Vec<StudentDocument>, StoreError>;

    async fn get(&self, group: &GroupKey, id: Uuid)
        -> Result<Option<StudentDocument>, StoreError>;

    async fn insert(
        &self,
        group: &GroupKey,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<Uuid, StoreError>;

    /// Merges `fields` into the record and overwrites its cached tier.
    /// Does nothing when the id is unknown.
    async fn update(
        &self,
        group: &GroupKey,
        id: Uuid,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<(), StoreError>;

    async fn delete(&self, group: &GroupKey, id: Uuid) -> Result<(), StoreError>;

    async fn list_group_names(&self) -> Result<Vec<String>, StoreError>;

    async fn create_group(&self, name: &str) -> Result<(), StoreError>;

    async fn drop_group(&self, name: &str) -> Result<(), StoreError>;

    async fn find_user(&self, username: &str) -> Result<Option<UserCredential>, StoreError>;

    async fn find_user_by_token(&self, token: &str)
        -> Result<Option<UserCredential>, StoreError>;

    async fn insert_user(&self, user: &UserCredential) -> Result<(), StoreError>;

    async fn update_user(
        &self,
        previous_username: &str,
        user: &UserCredential,
    ) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_document(row: PgRow) -> Result<StudentDocument, StoreError> {
    let fields: Json<StudentFields> = row.try_get("fields")?;
    let zone: String = row.try_get("zone")?;
    let red: Json<Vec<String>> = row.try_get("red_zone_fields")?;
    let average: Json<Vec<String>> = row.try_get("average_fields")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let to_metrics = |names: Vec<String>| -> Vec<Metric> {
        names.iter().filter_map(|name| Metric::from_name(name)).collect()
    };
    let cached = zone.parse::<Tier>().ok().map(|zone| Categorization {
        zone,
        red_zone_fields: to_metrics(red.0),
        average_fields: to_metrics(average.0),
    });

    Ok(StudentDocument {
        id: row.try_get("id")?,
        fields: fields.0,
        cached,
        created_at,
    })
}

fn row_to_user(row: PgRow) -> Result<UserCredential, StoreError> {
    Ok(UserCredential {
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        salt: row.try_get("salt")?,
        remember_token: row.try_get("remember_token")?,
    })
}

fn metric_names(metrics: &[Metric]) -> Json<Vec<&'static str>> {
    Json(metrics.iter().map(|metric| metric.as_str()).collect())
}

const STUDENT_COLUMNS: &str =
    "id, fields, zone, red_zone_fields, average_fields, created_at";

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn list_all(&self, group: &GroupKey) -> Result<Vec<StudentDocument>, StoreError> {
        let query = format!(
            "SELECT {STUDENT_COLUMNS} FROM zone_tracker.students \
             WHERE group_name IS NOT DISTINCT FROM $1 \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&query)
            .bind(group.name())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_document).collect()
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        group: &GroupKey,
        id: Uuid,
    ) -> Result<Option<StudentDocument>, StoreError> {
        let query = format!(
            "SELECT {STUDENT_COLUMNS} FROM zone_tracker.students \
             WHERE id = $1 AND group_name IS NOT DISTINCT FROM $2"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(group.name())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    #[instrument(skip(self, fields, derived))]
    async fn insert(
        &self,
        group: &GroupKey,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        if let Some(name) = group.name() {
            sqlx::query(
                "INSERT INTO zone_tracker.groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
            )
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO zone_tracker.students
            (id, group_name, fields, zone, red_zone_fields, average_fields)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(group.name())
        .bind(Json(fields))
        .bind(derived.zone.label())
        .bind(metric_names(&derived.red_zone_fields))
        .bind(metric_names(&derived.average_fields))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    #[instrument(skip(self, fields, derived))]
    async fn update(
        &self,
        group: &GroupKey,
        id: Uuid,
        fields: &StudentFields,
        derived: &Categorization,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE zone_tracker.students
            SET fields = fields || $3,
                zone = $4,
                red_zone_fields = $5,
                average_fields = $6
            WHERE id = $1 AND group_name IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id)
        .bind(group.name())
        .bind(Json(fields))
        .bind(derived.zone.label())
        .bind(metric_names(&derived.red_zone_fields))
        .bind(metric_names(&derived.average_fields))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, group: &GroupKey, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM zone_tracker.students WHERE id = $1 AND group_name IS NOT DISTINCT FROM $2",
        )
        .bind(id)
        .bind(group.name())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_group_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT name FROM zone_tracker.groups ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn create_group(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO zone_tracker.groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_group(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM zone_tracker.groups WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Group not found".to_string()));
        }
        Ok(())
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserCredential>, StoreError> {
        let row = sqlx::query(
            "SELECT username, password_hash, salt, remember_token \
             FROM zone_tracker.users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_user).transpose()
    }

    async fn find_user_by_token(
        &self,
        token: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let row = sqlx::query(
            "SELECT username, password_hash, salt, remember_token \
             FROM zone_tracker.users WHERE remember_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_user).transpose()
    }

    async fn insert_user(&self, user: &UserCredential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO zone_tracker.users (username, password_hash, salt, remember_token)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .bind(&user.remember_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_user(
        &self,
        previous_username: &str,
        user: &UserCredential,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE zone_tracker.users
            SET username = $2, password_hash = $3, salt = $4, remember_token = $5,
                updated_at = now()
            WHERE username = $1
            "#,
        )
        .bind(previous_username)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.salt)
        .bind(&user.remember_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub async fn seed(collection: &Collection) -> anyhow::Result<usize> {
    let students = vec![
        [
            ("name", "Avery Lee"),
            ("weekend_exam", "88"),
            ("mid_marks", "91"),
            ("crt_score", "84"),
            ("attendance_percent", "96"),
            ("gd_attendance", "90"),
            ("previous_sem_percent", "8.9"),
            ("extra_activities_score", "6"),
            ("project_count", "3"),
            ("backlogs", "0"),
        ],
        [
            ("name", "Jules Moreno"),
            ("weekend_exam", "72"),
            ("mid_marks", "78"),
            ("crt_score", "81"),
            ("attendance_percent", "83"),
            ("gd_attendance", "76"),
            ("previous_sem_percent", "7.6"),
            ("extra_activities_score", "0"),
            ("project_count", "1"),
            ("backlogs", "0"),
        ],
        [
            ("name", "Kiara Patel"),
            ("weekend_exam", "54"),
            ("mid_marks", "61"),
            ("crt_score", "58"),
            ("attendance_percent", "66"),
            ("gd_attendance", "72"),
            ("previous_sem_percent", "6.4"),
            ("extra_activities_score", "2"),
            ("project_count", "0"),
            ("backlogs", "2"),
        ],
    ];

    let mut inserted = 0usize;
    for student in students {
        let fields = student
            .into_iter()
            .fold(StudentFields::new(), |fields, (key, value)| fields.with(key, value));
        students::create_student(collection, fields)
            .await
            .context("failed to insert seed student")?;
        inserted += 1;
    }

    Ok(inserted)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub skipped: usize,
}

/// Imports students from a CSV file whose header row names the student
/// fields. Rows that fail ceiling validation are skipped.
pub async fn import_csv(collection: &Collection, csv_path: &Path) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<HashMap<String, String>>().enumerate() {
        let row = result.with_context(|| format!("malformed CSV row {}", index + 1))?;
        let fields = StudentFields::from_form(&row);

        match students::create_student(collection, fields).await {
            Ok(_) => summary.inserted += 1,
            Err(AppError::Validation(errors)) => {
                warn!(row = index + 1, %errors, "skipping CSV row");
                summary.skipped += 1;
            }
            Err(err) => return Err(err).context("failed to insert imported student"),
        }
    }

    info!(
        inserted = summary.inserted,
        skipped = summary.skipped,
        group = %collection.key(),
        "CSV import finished"
    );
    Ok(summary)
}
