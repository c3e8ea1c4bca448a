//! JSON API under `/api`.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::AppState;
use crate::error::AppError;
use crate::groups::{self, resolve_collection};
use crate::models::{StudentFields, StudentView, ZoneCounts};
use crate::students;

#[derive(Debug, Default, Deserialize)]
pub struct GroupQuery {
    pub group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StudentsResponse {
    pub students: Vec<StudentView>,
}

#[derive(Debug, Serialize)]
pub struct GroupsResponse {
    pub groups: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ZonesResponse {
    pub group: Option<String>,
    pub counts: ZoneCounts,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateGroupForm {
    #[serde(default)]
    pub group_name: String,
}

/// GET /api/students
pub async fn list_students(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Result<Json<StudentsResponse>, AppError> {
    let collection = resolve_collection(&state.store, query.group.as_deref());
    let students = students::list_students(&collection).await?;
    Ok(Json(StudentsResponse { students }))
}

/// POST /api/students
pub async fn create_student(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let collection = resolve_collection(&state.store, query.group.as_deref());
    let created = students::create_student(&collection, StudentFields::from_form(&form)).await?;
    Ok(Json(json!({ "success": true, "student": created })))
}

/// PUT /api/students/{id}
pub async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GroupQuery>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    let collection = resolve_collection(&state.store, query.group.as_deref());
    let updated =
        students::update_student(&collection, &id, StudentFields::from_form(&form)).await?;
    Ok(Json(json!({ "success": true, "student": updated })))
}

/// DELETE /api/students/{id}
pub async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GroupQuery>,
) -> Result<Json<Value>, AppError> {
    let collection = resolve_collection(&state.store, query.group.as_deref());
    students::delete_student(&collection, &id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/groups
pub async fn list_groups(State(state): State<AppState>) -> Result<Json<GroupsResponse>, AppError> {
    let groups = groups::list_group_names(state.store.as_ref()).await?;
    Ok(Json(GroupsResponse { groups }))
}

/// POST /api/groups
pub async fn create_group(
    State(state): State<AppState>,
    Form(form): Form<CreateGroupForm>,
) -> Result<Json<Value>, AppError> {
    let group = groups::create_group(state.store.as_ref(), &form.group_name).await?;
    Ok(Json(json!({ "success": true, "group": group })))
}

/// DELETE /api/groups/{name}
pub async fn delete_group(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    groups::drop_group(state.store.as_ref(), &name).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/zones
pub async fn zone_counts(
    State(state): State<AppState>,
    Query(query): Query<GroupQuery>,
) -> Result<Json<ZonesResponse>, AppError> {
    let collection = resolve_collection(&state.store, query.group.as_deref());
    let counts = students::zone_counts(&collection).await?;
    Ok(Json(ZonesResponse {
        group: collection.key().name().map(str::to_string),
        counts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use crate::web::test_state;

    fn query(group: Option<&str>) -> Query<GroupQuery> {
        Query(GroupQuery {
            group: group.map(str::to_string),
        })
    }

    fn form(pairs: &[(&str, &str)]) -> Form<HashMap<String, String>> {
        Form(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn scenario_form(weekend_exam: &str) -> Form<HashMap<String, String>> {
        form(&[
            ("name", "Asha"),
            ("weekend_exam", weekend_exam),
            ("mid_marks", "85"),
            ("crt_score", "90"),
            ("attendance_percent", "95"),
            ("gd_attendance", "95"),
            ("previous_sem_percent", "9"),
            ("extra_activities_score", "3"),
            ("project_count", "2"),
            ("backlogs", "0"),
        ])
    }

    #[tokio::test]
    async fn create_then_list_with_fresh_zone() {
        let state = test_state();
        let Json(created) = create_student(
            State(state.clone()),
            query(Some("CS101")),
            scenario_form("55"),
        )
        .await
        .unwrap();
        assert_eq!(created["success"], true);
        assert_eq!(created["student"]["zone"], "Red Zone");

        let Json(listed) = list_students(State(state.clone()), query(Some("CS101")))
            .await
            .unwrap();
        assert_eq!(listed.students.len(), 1);
        assert_eq!(listed.students[0].zone(), Tier::RedZone);

        let Json(default) = list_students(State(state), query(None)).await.unwrap();
        assert!(default.students.is_empty());
    }

    #[tokio::test]
    async fn create_reports_ceiling_errors_as_list() {
        let state = test_state();
        let err = create_student(
            State(state),
            query(None),
            form(&[("previous_sem_percent", "11"), ("backlogs", "99")]),
        )
        .await
        .unwrap_err();
        match err {
            AppError::Validation(errors) => assert_eq!(
                errors.messages(),
                vec![
                    "Previous Sem GPA value must be less than or equal to 10".to_string(),
                    "Backlogs value must be less than or equal to 15".to_string(),
                ]
            ),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_returns_recomputed_student_or_null() {
        let state = test_state();
        let Json(created) = create_student(State(state.clone()), query(None), scenario_form("55"))
            .await
            .unwrap();
        let id = created["student"]["id"].as_str().unwrap().to_string();

        let Json(updated) = update_student(
            State(state.clone()),
            Path(id),
            query(None),
            form(&[("weekend_exam", "65")]),
        )
        .await
        .unwrap();
        assert_eq!(updated["student"]["zone"], "Average");
        assert_eq!(updated["student"]["average_fields"][0], "weekend_exam");
        assert_eq!(updated["student"]["name"], "Asha");

        let Json(missing) = update_student(
            State(state),
            Path(uuid::Uuid::new_v4().to_string()),
            query(None),
            form(&[("weekend_exam", "65")]),
        )
        .await
        .unwrap();
        assert_eq!(missing["success"], true);
        assert!(missing["student"].is_null());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let state = test_state();
        let Json(created) = create_student(State(state.clone()), query(None), scenario_form("90"))
            .await
            .unwrap();
        let id = created["student"]["id"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let Json(body) = delete_student(State(state.clone()), Path(id.clone()), query(None))
                .await
                .unwrap();
            assert_eq!(body["success"], true);
        }
        let Json(listed) = list_students(State(state), query(None)).await.unwrap();
        assert!(listed.students.is_empty());
    }

    #[tokio::test]
    async fn group_lifecycle() {
        let state = test_state();
        let Json(created) = create_group(
            State(state.clone()),
            Form(CreateGroupForm {
                group_name: "CS101".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(created["group"], "CS101");

        let Json(listed) = list_groups(State(state.clone())).await.unwrap();
        assert_eq!(listed.groups, vec!["CS101".to_string()]);

        let Json(deleted) = delete_group(State(state.clone()), Path("CS101".to_string()))
            .await
            .unwrap();
        assert_eq!(deleted["success"], true);
        let err = delete_group(State(state.clone()), Path("CS101".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "Group not found"));

        let err = create_group(State(state), Form(CreateGroupForm::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "Group name is required"));
    }

    #[tokio::test]
    async fn zone_counts_for_group() {
        let state = test_state();
        for weekend_exam in ["55", "65", "90", "95"] {
            let Json(created) = create_student(
                State(state.clone()),
                query(Some("CS102")),
                scenario_form(weekend_exam),
            )
            .await
            .unwrap();
            assert_eq!(created["success"], true);
        }
        let Json(zones) = zone_counts(State(state), query(Some("CS102"))).await.unwrap();
        assert_eq!(zones.group.as_deref(), Some("CS102"));
        assert_eq!(
            zones.counts,
            ZoneCounts {
                good: 2,
                average: 1,
                red_zone: 1
            }
        );
    }
}
