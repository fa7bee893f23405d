use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Form, FromRequestParts, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderName, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use musterpoint_core::plan::PlanSubmission;
use musterpoint_core::{MemberId, PlanService, ServiceError};

use crate::config::WebConfig;
use crate::pages;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = if err.is_transient() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        tracing::error!(error = %err, status = status.as_u16(), "plan request failed");
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State and identity
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    service: PlanService,
    identity_header: HeaderName,
    web: Arc<WebConfig>,
}

impl AppState {
    pub fn new(service: PlanService, web: WebConfig) -> Result<Self> {
        let identity_header = HeaderName::from_bytes(web.identity_header.as_bytes())
            .with_context(|| format!("invalid identity header name {:?}", web.identity_header))?;
        Ok(Self {
            service,
            identity_header,
            web: Arc::new(web),
        })
    }
}

/// The signed-in member, taken from the trusted identity header.
///
/// Requests without it are sent to the login page.
pub struct CurrentUser(pub MemberId);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Response> {
        let raw = parts
            .headers
            .get(&state.identity_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();

        if raw.is_empty() {
            tracing::debug!(header = %state.identity_header, "no identity, redirecting to login");
            return Err(Redirect::to(&state.web.login_url).into_response());
        }

        MemberId::parse(raw).map(CurrentUser).map_err(|err| {
            AppError::bad_request(format!("invalid identity {raw:?}: {err}")).into_response()
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/saveplan", post(save_plan))
        .route("/fetchplan", get(fetch_plan))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {bind}:{port}"))?;
    tracing::info!("musterpoint serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("musterpoint serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let view = state.service.load_plan_view(&user).await?;
    Ok(Html(pages::plan_page(&view, &state.web.logout_url)).into_response())
}

async fn save_plan(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let submission =
        PlanSubmission::from_form(&form).map_err(|err| AppError::bad_request(err.to_string()))?;

    let conflicts = state
        .service
        .save_plan(&user, &submission.fields, &submission.members)
        .await?;

    if conflicts.is_empty() {
        Ok(Redirect::to("/").into_response())
    } else {
        Ok((StatusCode::CONFLICT, Html(pages::conflict_page(&conflicts))).into_response())
    }
}

async fn fetch_plan(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, AppError> {
    let view = state.service.load_plan_view(&user).await?;
    let xml = view.to_xml().map_err(AppError::internal)?;
    Ok(([(CONTENT_TYPE, "text/xml; charset=utf-8")], xml).into_response())
}

async fn healthz() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
