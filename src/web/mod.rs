//! HTTP surface: browser pages, the JSON API and login handling.

pub mod api;
pub mod html;
pub mod pages;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    http::{header, HeaderValue},
    middleware,
    response::IntoResponse,
    routing::{delete, get, put},
    Json, Router,
};
use serde_json::json;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;

use crate::auth::DefaultIdentity;
use crate::db::Store;
use session::SessionStore;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionStore>,
    pub identity: Arc<DefaultIdentity>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, identity: DefaultIdentity) -> Self {
        Self {
            store,
            sessions: Arc::new(SessionStore::new()),
            identity: Arc::new(identity),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/", get(pages::index))
        .route("/add", get(pages::add_form).post(pages::add_submit))
        .route("/zone/{zone}", get(pages::zone))
        .route("/logout", get(pages::logout))
        .route(
            "/change_credentials",
            get(pages::change_credentials_form).post(pages::change_credentials_submit),
        )
        .route(
            "/api/students",
            get(api::list_students).post(api::create_student),
        )
        .route(
            "/api/students/{id}",
            put(api::update_student).delete(api::delete_student),
        )
        .route("/api/groups", get(api::list_groups).post(api::create_group))
        .route("/api/groups/{name}", delete(api::delete_group))
        .route("/api/zones", get(api::zone_counts))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_login,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/login", get(pages::login_form).post(pages::login_submit))
        .route(
            "/calculator",
            get(pages::calculator_form).post(pages::calculator_submit),
        );

    protected
        .merge(public)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate, private, max-age=0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::EXPIRES,
            HeaderValue::from_static("0"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Serves until ctrl-c.
pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    AppState::new(
        Arc::new(crate::memory::MemoryStore::new()),
        DefaultIdentity {
            username: "admin".to_string(),
            password: "admin123".to_string(),
        },
    )
}
