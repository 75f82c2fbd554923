//! API route handlers.

use axum::Json;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use turnover_core::TurnoverError;
use turnover_scheduler::{CallbackOutcome, CleanerResponse};

use crate::server::AppState;

/// Handler error: maps the taxonomy onto HTTP status codes.
pub struct ApiError(TurnoverError);

impl From<TurnoverError> for ApiError {
    fn from(e: TurnoverError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TurnoverError::UnknownToken(_) => StatusCode::NOT_FOUND,
            TurnoverError::InvalidResponse(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("❌ Callback failed: {}", self.0);
        } else {
            tracing::warn!("⚠️ Rejected callback: {}", self.0);
        }
        (
            status,
            Json(serde_json::json!({"ok": false, "error": self.0.to_string()})),
        )
            .into_response()
    }
}

/// Callback parameters, from the link query or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct RespondParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "turnover-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// GET /api/v1/respond?token=..&response=yes|no: the links in cleaner emails.
///
/// Read-only: renders a page whose button POSTs the answer, so mail scanners
/// and link prefetchers that follow the URL change nothing.
pub async fn respond_page(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RespondParams>,
) -> Result<Html<String>, ApiError> {
    let (token, response) = validate(params)?;
    let record = state
        .workflow
        .token(&token)?
        .ok_or_else(|| TurnoverError::UnknownToken(token.clone()))?;
    if record.consumed_at.is_some() {
        return Ok(page("Already answered", "<p>This request was already answered. Thank you!</p>"));
    }

    let what = state
        .workflow
        .get(&record.execution_id)?
        .map(|e| {
            format!(
                "{} on {}",
                e.property.display_name(),
                e.cleaning_at.format("%a %b %-d %Y, %H:%M UTC")
            )
        })
        .unwrap_or_else(|| "this cleaning".into());
    let (title, value, button) = match response {
        CleanerResponse::Yes => ("Accept this cleaning?", "yes", "Yes, I'll clean"),
        CleanerResponse::No => ("Decline this cleaning?", "no", "No, I can't make it"),
    };
    Ok(page(
        title,
        &format!(
            r#"<p>{}</p>
<form method="post" action="/api/v1/respond/confirm">
<input type="hidden" name="token" value="{}">
<input type="hidden" name="response" value="{value}">
<button type="submit">{button}</button>
</form>"#,
            escape(&what),
            escape(&token)
        ),
    ))
}

/// POST /api/v1/respond/confirm: the confirmation page's form.
pub async fn respond_form(
    State(state): State<Arc<AppState>>,
    Form(params): Form<RespondParams>,
) -> Result<Html<String>, ApiError> {
    let message = match apply(&state, params).await? {
        CallbackOutcome::Confirmed => "Thanks, you're booked. A calendar invite is on its way.",
        CallbackOutcome::Advanced | CallbackOutcome::Exhausted => "Thanks for letting us know.",
        CallbackOutcome::AlreadyHandled => "This request was already answered. Thank you!",
    };
    Ok(page("Turnover", &format!("<p>{message}</p>")))
}

/// POST /api/v1/respond with `{"token": .., "response": ..}`.
pub async fn respond_json(
    State(state): State<Arc<AppState>>,
    Json(params): Json<RespondParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = apply(&state, params).await?;
    Ok(Json(serde_json::json!({"ok": true, "status": outcome.as_str()})))
}

fn validate(params: RespondParams) -> Result<(String, CleanerResponse), TurnoverError> {
    let token = params
        .token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| TurnoverError::InvalidResponse("missing token".into()))?;
    let response = params.response.as_deref().unwrap_or_default().parse()?;
    Ok((token, response))
}

async fn apply(state: &AppState, params: RespondParams) -> Result<CallbackOutcome, ApiError> {
    let (token, response) = validate(params)?;
    Ok(state.workflow.respond(&token, response).await?)
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head>\n<body><h2>{title}</h2>\n{body}\n</body></html>"
    ))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// GET /api/v1/executions: open coordination runs.
pub async fn list_open(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let executions: Vec<serde_json::Value> = state
        .workflow
        .open_executions()?
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "booking": e.booking_key,
                "property": e.property.id,
                "status": e.status.as_str(),
                "waiting_on": e.active_cleaner().map(|c| c.name),
                "attempts": e.attempt_count,
                "cleaning_at": e.cleaning_at,
                "deadline": e.deadline,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({"executions": executions})))
}
