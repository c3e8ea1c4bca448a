//! Login sessions and the cookies that carry them.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::AppState;
use crate::auth;
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "zone_session";
pub const REMEMBER_COOKIE: &str = "remember_token";
pub const REMEMBER_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// How long an unused session is kept.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);
/// Upper bound on live sessions; the least recently used are evicted first.
pub const MAX_SESSIONS: usize = 10_000;

/// Server-side session state. Logged in iff `username` is set; the selected
/// group survives logout.
#[derive(Debug, Clone)]
pub struct Session {
    pub username: Option<String>,
    pub current_group: Option<String>,
    last_seen: Instant,
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_limits(SESSION_IDLE_TIMEOUT, MAX_SESSIONS)
    }

    pub fn with_limits(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Returns the session and marks it as used. Expired sessions are dropped.
    pub fn get(&self, id: &str) -> Option<Session> {
        {
            let mut session = self.sessions.get_mut(id)?;
            if session.last_seen.elapsed() < self.idle_timeout {
                session.last_seen = Instant::now();
                return Some(session.clone());
            }
        }
        self.sessions.remove(id);
        None
    }

    /// Starts a logged-in session under a fresh id and returns it. The
    /// selected group is carried over from `previous`, which is discarded.
    pub fn log_in(&self, previous: Option<&str>, username: &str) -> String {
        let current_group = previous
            .and_then(|id| self.sessions.remove(id))
            .and_then(|(_, session)| session.current_group);

        self.evict();
        let id = Uuid::new_v4().simple().to_string();
        self.sessions.insert(
            id.clone(),
            Session {
                username: Some(username.to_string()),
                current_group,
                last_seen: Instant::now(),
            },
        );
        debug!(sessions = self.len(), "session started");
        id
    }

    pub fn log_out(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.username = None;
        }
    }

    pub fn set_group(&self, id: &str, group: Option<&str>) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.current_group = group.map(str::to_string);
        }
    }

    pub fn rename(&self, id: &str, username: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.username = Some(username.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drops idle sessions, then the least recently used ones until there is
    /// room for one more.
    fn evict(&self) {
        let idle_timeout = self.idle_timeout;
        self.sessions
            .retain(|_, session| session.last_seen.elapsed() < idle_timeout);

        let excess = (self.sessions.len() + 1).saturating_sub(self.max_sessions);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(Instant, String)> = self
            .sessions
            .iter()
            .map(|entry| (entry.last_seen, entry.key().clone()))
            .collect();
        by_age.sort();
        for (_, id) in by_age.into_iter().take(excess) {
            self.sessions.remove(&id);
        }
        debug!(evicted = excess, "session table full");
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The logged-in user, attached to requests that passed [`require_login`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session_id: String,
    pub username: String,
    pub current_group: Option<String>,
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

pub fn set_cookie(name: &str, value: &str, max_age: Option<i64>) -> HeaderValue {
    let mut cookie = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(max_age) = max_age {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear_cookie(name: &str) -> HeaderValue {
    set_cookie(name, "", Some(0))
}

fn reject(path: &str) -> Response {
    if path.starts_with("/api/") {
        AppError::Unauthorized.into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

/// Lets the request through when it carries a logged-in session or a valid
/// remember-me token; otherwise pages redirect to `/login` and API calls get 401.
pub async fn require_login(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let headers = request.headers();
    let session_id = cookie_value(headers, SESSION_COOKIE).map(str::to_string);
    let token = cookie_value(headers, REMEMBER_COOKIE).map(str::to_string);

    if let Some(id) = &session_id {
        if let Some(Session {
            username: Some(username),
            current_group,
            ..
        }) = state.sessions.get(id)
        {
            request.extensions_mut().insert(CurrentUser {
                session_id: id.clone(),
                username,
                current_group,
            });
            return next.run(request).await;
        }
    }

    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return reject(request.uri().path());
    };
    let user = match auth::user_for_remember_token(state.store.as_ref(), &token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!("unknown remember token");
            return reject(request.uri().path());
        }
        Err(err) => {
            warn!(error = %err, "remember token lookup failed");
            return AppError::from(err).into_response();
        }
    };

    let id = state.sessions.log_in(session_id.as_deref(), &user.username);
    let current_group = state.sessions.get(&id).and_then(|session| session.current_group);
    debug!(username = %user.username, "session restored from remember token");
    request.extensions_mut().insert(CurrentUser {
        session_id: id.clone(),
        username: user.username,
        current_group,
    });

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .append(header::SET_COOKIE, set_cookie(SESSION_COOKIE, &id, None));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; zone_session=abc123; remember_token=tok"),
        );
        assert_eq!(cookie_value(&headers, SESSION_COOKIE), Some("abc123"));
        assert_eq!(cookie_value(&headers, REMEMBER_COOKIE), Some("tok"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn cookie_headers() {
        let cookie = set_cookie(REMEMBER_COOKIE, "tok", Some(REMEMBER_MAX_AGE_SECS));
        assert_eq!(
            cookie.to_str().unwrap(),
            "remember_token=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=2592000"
        );
        assert!(clear_cookie(REMEMBER_COOKIE)
            .to_str()
            .unwrap()
            .ends_with("Max-Age=0"));
    }

    #[test]
    fn logout_keeps_selected_group() {
        let sessions = SessionStore::new();
        let id = sessions.log_in(None, "admin");
        sessions.set_group(&id, Some("CS101"));
        sessions.log_out(&id);

        let session = sessions.get(&id).unwrap();
        assert!(session.username.is_none());
        assert_eq!(session.current_group.as_deref(), Some("CS101"));

        let again = sessions.log_in(Some(&id), "admin");
        assert_eq!(sessions.get(&again).unwrap().current_group.as_deref(), Some("CS101"));
    }

    #[test]
    fn login_always_issues_a_new_id() {
        let sessions = SessionStore::new();
        let planted = sessions.log_in(None, "admin");
        sessions.log_out(&planted);

        let id = sessions.log_in(Some(&planted), "admin");
        assert_ne!(id, planted);
        assert!(sessions.get(&planted).is_none());
        assert_eq!(sessions.len(), 1);

        let fresh = sessions.log_in(Some("unknown"), "admin");
        assert_ne!(fresh, "unknown");
        assert_eq!(sessions.get(&fresh).unwrap().username.as_deref(), Some("admin"));
    }

    #[test]
    fn idle_sessions_expire() {
        let sessions = SessionStore::with_limits(Duration::ZERO, 10);
        let id = sessions.log_in(None, "admin");
        assert!(sessions.get(&id).is_none());
        assert_eq!(sessions.len(), 0);
    }

    #[test]
    fn table_is_bounded_and_evicts_least_recently_used() {
        let sessions = SessionStore::with_limits(SESSION_IDLE_TIMEOUT, 3);
        let first = sessions.log_in(None, "a");
        std::thread::sleep(Duration::from_millis(2));
        let second = sessions.log_in(None, "b");
        std::thread::sleep(Duration::from_millis(2));
        let _third = sessions.log_in(None, "c");
        std::thread::sleep(Duration::from_millis(2));
        sessions.get(&first);

        let fourth = sessions.log_in(None, "d");
        assert_eq!(sessions.len(), 3);
        assert!(sessions.get(&second).is_none());
        assert!(sessions.get(&first).is_some());
        assert!(sessions.get(&fourth).is_some());

        for _ in 0..100 {
            sessions.log_in(None, "e");
        }
        assert_eq!(sessions.len(), 3);
    }
}
