//! Browser-facing handlers.

use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Extension, Form,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::api::GroupQuery;
use super::html::{self, CalculatorOutcome};
use super::session::{
    clear_cookie, cookie_value, set_cookie, CurrentUser, REMEMBER_COOKIE, REMEMBER_MAX_AGE_SECS,
    SESSION_COOKIE,
};
use super::AppState;
use crate::auth::{self, CredentialChange, CredentialError};
use crate::calculator;
use crate::error::AppError;
use crate::groups::{self, resolve_collection, GroupKey};
use crate::models::{StudentFields, Tier};
use crate::students;

/// GET /. `?group=` selects the group and remembers it in the session;
/// an empty value goes back to the default group.
pub async fn index(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<GroupQuery>,
) -> Result<Html<String>, AppError> {
    let selected = match query.group {
        Some(group) => {
            let key = GroupKey::resolve(Some(&group));
            state.sessions.set_group(&user.session_id, key.name());
            key
        }
        None => GroupKey::resolve(user.current_group.as_deref()),
    };

    let collection = resolve_collection(&state.store, selected.name());
    let students = students::list_students(&collection).await?;
    let group_names = groups::list_group_names(state.store.as_ref()).await?;
    Ok(Html(html::index_page(
        &user.username,
        collection.key(),
        &group_names,
        &students,
    )))
}

fn add_target(user: &CurrentUser, query: GroupQuery) -> GroupKey {
    match query.group {
        Some(group) => GroupKey::resolve(Some(&group)),
        None => GroupKey::resolve(user.current_group.as_deref()),
    }
}

/// GET /add
pub async fn add_form(
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<GroupQuery>,
) -> Html<String> {
    let group = add_target(&user, query);
    Html(html::add_student_page(
        &user.username,
        &group,
        &BTreeMap::new(),
        &StudentFields::new(),
    ))
}

/// POST /add
pub async fn add_submit(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<GroupQuery>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let group = add_target(&user, query);
    state.sessions.set_group(&user.session_id, group.name());
    let collection = resolve_collection(&state.store, group.name());
    let fields = StudentFields::from_form(&form);

    match students::create_student(&collection, fields.clone()).await {
        Ok(_) => Ok(Redirect::to(&format!("/{}", html::group_query(&group))).into_response()),
        Err(AppError::Validation(errors)) => Ok((
            StatusCode::BAD_REQUEST,
            Html(html::add_student_page(
                &user.username,
                &group,
                &errors.by_field(),
                &fields,
            )),
        )
            .into_response()),
        Err(err) => Err(err),
    }
}

/// GET /zone/{zone}
pub async fn zone(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(zone): Path<String>,
) -> Result<Html<String>, AppError> {
    let tier: Tier = zone
        .parse()
        .map_err(|err: crate::models::UnknownTier| AppError::NotFound(err.to_string()))?;
    let students = students::students_in_tier(&state.store, tier).await?;
    Ok(Html(html::zone_page(&user.username, tier, &students)))
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub remember: Option<String>,
}

/// GET /login
pub async fn login_form() -> Html<String> {
    Html(html::login_page(None))
}

/// POST /login
pub async fn login_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let store = state.store.as_ref();
    let Some(user) = auth::login(store, &state.identity, &form.username, &form.password).await?
    else {
        warn!(username = %form.username, "failed login");
        return Ok(Html(html::login_page(Some("Invalid username or password"))).into_response());
    };

    let session_id = state
        .sessions
        .log_in(cookie_value(&headers, SESSION_COOKIE), &user.username);
    let mut response = Redirect::to("/").into_response();
    let cookies = response.headers_mut();
    cookies.append(header::SET_COOKIE, set_cookie(SESSION_COOKIE, &session_id, None));

    if form.remember.is_some() {
        let token = auth::issue_remember_token(store, &user).await?;
        cookies.append(
            header::SET_COOKIE,
            set_cookie(REMEMBER_COOKIE, &token, Some(REMEMBER_MAX_AGE_SECS)),
        );
    } else {
        cookies.append(header::SET_COOKIE, clear_cookie(REMEMBER_COOKIE));
    }

    info!(username = %user.username, remember = form.remember.is_some(), "logged in");
    Ok(response)
}

/// GET /logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, AppError> {
    state.sessions.log_out(&user.session_id);
    auth::revoke_remember_token(state.store.as_ref(), &user.username).await?;
    info!(username = %user.username, "logged out");

    let mut response = Redirect::to("/login").into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, clear_cookie(REMEMBER_COOKIE));
    Ok(response)
}

/// GET /change_credentials
pub async fn change_credentials_form(Extension(user): Extension<CurrentUser>) -> Html<String> {
    Html(html::change_credentials_page(&user.username, None, None))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsForm {
    pub current_password: String,
    pub new_username: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// POST /change_credentials
pub async fn change_credentials_submit(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Form(form): Form<CredentialsForm>,
) -> Result<Html<String>, AppError> {
    let change = CredentialChange {
        current_password: form.current_password,
        new_username: form.new_username,
        new_password: form.new_password,
        confirm_password: form.confirm_password,
    };

    match auth::change_credentials(state.store.as_ref(), &user.username, &change).await {
        Ok(updated) => {
            state.sessions.rename(&user.session_id, &updated.username);
            Ok(Html(html::change_credentials_page(
                &updated.username,
                None,
                Some("Credentials updated successfully"),
            )))
        }
        Err(CredentialError::Store(err)) => Err(err.into()),
        Err(err) => Ok(Html(html::change_credentials_page(
            &user.username,
            Some(&err.to_string()),
            None,
        ))),
    }
}

/// GET /calculator. `?num_subjects=` sets how many rows the form shows.
pub async fn calculator_form(Query(query): Query<HashMap<String, String>>) -> Html<String> {
    Html(html::calculator_page(&query, CalculatorOutcome::Empty))
}

/// POST /calculator
pub async fn calculator_submit(Form(form): Form<HashMap<String, String>>) -> Html<String> {
    match calculator::parse_form(&form) {
        Ok(subjects) => Html(html::calculator_page(
            &form,
            CalculatorOutcome::Result {
                percentage: calculator::percentage(&subjects),
                subjects: &subjects,
            },
        )),
        Err(err) => {
            let message = err.to_string();
            Html(html::calculator_page(&form, CalculatorOutcome::Error(&message)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_state;

    fn current_user(state: &AppState, group: Option<&str>) -> CurrentUser {
        let session_id = state.sessions.log_in(None, "admin");
        state.sessions.set_group(&session_id, group);
        CurrentUser {
            session_id,
            username: "admin".to_string(),
            current_group: group.map(str::to_string),
        }
    }

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn add_redirects_to_group_listing() {
        let state = test_state();
        let user = current_user(&state, None);
        let response = add_submit(
            State(state.clone()),
            Extension(user.clone()),
            Query(GroupQuery {
                group: Some("CS 101".to_string()),
            }),
            Form(form(&[("name", "Asha"), ("weekend_exam", "90")])),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[header::LOCATION].to_str().unwrap(),
            "/?group=CS%20101"
        );
        let session = state.sessions.get(&user.session_id).unwrap();
        assert_eq!(session.current_group.as_deref(), Some("CS 101"));
    }

    #[tokio::test]
    async fn add_with_errors_rerenders_form() {
        let state = test_state();
        let user = current_user(&state, Some("CS101"));
        let response = add_submit(
            State(state.clone()),
            Extension(user),
            Query(GroupQuery::default()),
            Form(form(&[("name", "Ravi"), ("project_count", "12")])),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let collection = resolve_collection(&state.store, Some("CS101"));
        assert!(collection.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_selects_and_remembers_group() {
        let state = test_state();
        let user = current_user(&state, None);
        let collection = resolve_collection(&state.store, Some("CS101"));
        students::create_student(&collection, StudentFields::new().with("name", "Kiara"))
            .await
            .unwrap();

        let Html(page) = index(
            State(state.clone()),
            Extension(user.clone()),
            Query(GroupQuery {
                group: Some("CS101".to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(page.contains("Kiara"));
        assert_eq!(
            state.sessions.get(&user.session_id).unwrap().current_group.as_deref(),
            Some("CS101")
        );

        let Html(page) = index(
            State(state.clone()),
            Extension(user.clone()),
            Query(GroupQuery {
                group: Some(String::new()),
            }),
        )
        .await
        .unwrap();
        assert!(!page.contains("Kiara"));
        assert!(state.sessions.get(&user.session_id).unwrap().current_group.is_none());
    }

    #[tokio::test]
    async fn zone_page_rejects_unknown_tier() {
        let state = test_state();
        let user = current_user(&state, None);
        let err = zone(State(state), Extension(user), Path("Excellent".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn login_with_remember_sets_both_cookies() {
        let state = test_state();
        let response = login_submit(
            State(state.clone()),
            HeaderMap::new(),
            Form(LoginForm {
                username: "admin".to_string(),
                password: "admin123".to_string(),
                remember: Some("on".to_string()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookies = set_cookies(&response);
        assert!(cookies.iter().any(|c| c.starts_with("zone_session=")));
        let remember = cookies
            .iter()
            .find(|c| c.starts_with("remember_token="))
            .unwrap();
        assert!(remember.contains("Max-Age=2592000"));

        let user = state.store.find_user("admin").await.unwrap().unwrap();
        let token = user.remember_token.unwrap();
        assert!(remember.starts_with(&format!("remember_token={token};")));
    }

    #[tokio::test]
    async fn login_replaces_presented_session_id() {
        let state = test_state();
        let planted = state.sessions.log_in(None, "admin");
        state.sessions.set_group(&planted, Some("CS101"));
        state.sessions.log_out(&planted);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("zone_session={planted}").parse().unwrap(),
        );
        let response = login_submit(
            State(state.clone()),
            headers,
            Form(LoginForm {
                username: "admin".to_string(),
                password: "admin123".to_string(),
                remember: None,
            }),
        )
        .await
        .unwrap();

        let cookies = set_cookies(&response);
        let issued = cookies
            .iter()
            .find_map(|c| c.strip_prefix("zone_session="))
            .and_then(|rest| rest.split(';').next())
            .unwrap();
        assert_ne!(issued, planted);
        assert!(state.sessions.get(&planted).is_none());
        let session = state.sessions.get(issued).unwrap();
        assert_eq!(session.username.as_deref(), Some("admin"));
        assert_eq!(session.current_group.as_deref(), Some("CS101"));
    }

    #[tokio::test]
    async fn failed_login_rerenders_with_error() {
        let state = test_state();
        let response = login_submit(
            State(state),
            HeaderMap::new(),
            Form(LoginForm {
                username: "admin".to_string(),
                password: "wrong".to_string(),
                remember: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response).is_empty());
    }

    #[tokio::test]
    async fn logout_clears_login_and_token() {
        let state = test_state();
        let user = auth::login(state.store.as_ref(), &state.identity, "admin", "admin123")
            .await
            .unwrap()
            .unwrap();
        auth::issue_remember_token(state.store.as_ref(), &user)
            .await
            .unwrap();
        let current = current_user(&state, Some("CS101"));

        let response = logout(State(state.clone()), Extension(current.clone()))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::LOCATION].to_str().unwrap(),
            "/login"
        );
        let session = state.sessions.get(&current.session_id).unwrap();
        assert!(session.username.is_none());
        assert_eq!(session.current_group.as_deref(), Some("CS101"));
        let stored = state.store.find_user("admin").await.unwrap().unwrap();
        assert!(stored.remember_token.is_none());
    }

    #[tokio::test]
    async fn credential_change_renames_session() {
        let state = test_state();
        auth::login(state.store.as_ref(), &state.identity, "admin", "admin123")
            .await
            .unwrap();
        let current = current_user(&state, None);

        let Html(page) = change_credentials_submit(
            State(state.clone()),
            Extension(current.clone()),
            Form(CredentialsForm {
                current_password: "admin123".to_string(),
                new_username: "principal".to_string(),
                ..CredentialsForm::default()
            }),
        )
        .await
        .unwrap();
        assert!(page.contains("Credentials updated successfully"));
        assert_eq!(
            state.sessions.get(&current.session_id).unwrap().username.as_deref(),
            Some("principal")
        );

        let Html(page) = change_credentials_submit(
            State(state),
            Extension(current),
            Form(CredentialsForm {
                current_password: "wrong".to_string(),
                ..CredentialsForm::default()
            }),
        )
        .await
        .unwrap();
        assert!(page.contains("Current password is incorrect"));
    }

    #[tokio::test]
    async fn calculator_shows_percentage_or_error() {
        let Html(page) = calculator_submit(Form(form(&[
            ("num_subjects", "1"),
            ("subject_name_0", "Maths"),
            ("mark_0", "45"),
            ("max_mark_0", "60"),
        ])))
        .await;
        assert!(page.contains("Percentage: 75.00%"));
        assert!(page.contains("name=\"subject_name_0\" value=\"Maths\""));

        let Html(page) = calculator_submit(Form(form(&[("num_subjects", "x")]))).await;
        assert!(page.contains("Number of subjects must be a whole number"));
    }

    #[tokio::test]
    async fn calculator_form_shows_requested_rows() {
        let Html(page) = calculator_form(Query(form(&[("num_subjects", "4")]))).await;
        assert!(page.contains("name=\"mark_3\""));
        assert!(!page.contains("name=\"mark_4\""));
    }
}
