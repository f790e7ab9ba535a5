//! REST endpoints over the engagement service.
//!
//! Thin adapter: every handler parses input, calls one `Engagement`
//! operation, and renders JSON. Listing endpoints are read-only projections.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::engagement::Engagement;
use crate::error::{DispatchError, ScheduleError, ValidationError};
use crate::outreach::{CancelOutcome, SendHandle};
use crate::types::ContactId;

type Reply = (StatusCode, Json<Value>);

/// Build the Axum router for the engagement API.
pub fn routes(engagement: Arc<Engagement>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/inbound", post(receive_inbound))
        .route("/api/inbox", get(list_inbox))
        .route("/api/outbound", post(send_outbound))
        .route("/api/leads", get(list_leads).post(upload_leads))
        .route("/api/leads/{contact}", get(get_lead).post(update_lead))
        .route("/api/conversations/{contact}", get(get_conversation))
        .route("/api/schedule", post(schedule_send))
        .route("/api/scheduled", get(list_scheduled))
        .route("/api/scheduled/{handle}/cancel", post(cancel_scheduled))
        .route("/api/drip/run", post(run_drip))
        .route("/api/dnc/check", post(check_dnc))
        .layer(CorsLayer::permissive())
        .with_state(engagement)
}

fn bad_request(message: impl std::fmt::Display) -> Reply {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.to_string()})),
    )
}

fn parse_contact(raw: &str) -> Result<ContactId, Reply> {
    ContactId::parse(raw).map_err(bad_request)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "leadflow"
    }))
}

// ── Inbound ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InboundRequest {
    from: Option<String>,
    body: Option<String>,
    /// RFC 3339 or `YYYY-MM-DD HH:MM:SS`; defaults to now.
    received_at: Option<String>,
}

async fn receive_inbound(
    State(svc): State<Arc<Engagement>>,
    Json(req): Json<InboundRequest>,
) -> Reply {
    let contact = match parse_contact(req.from.as_deref().unwrap_or_default()) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let body = req.body.unwrap_or_default();

    let receipt = match req.received_at {
        Some(raw) => svc.receive_inbound_raw(&contact, &body, &raw).await,
        None => svc.receive_inbound(&contact, &body, Utc::now()).await,
    };
    info!(contact = %contact, opted_out = receipt.opted_out, "Inbound message received");
    (StatusCode::OK, Json(json!(receipt)))
}

async fn list_inbox(State(svc): State<Arc<Engagement>>) -> impl IntoResponse {
    Json(svc.store().all_inbound().await)
}

// ── Outbound ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OutboundRequest {
    to: Option<String>,
    body: Option<String>,
}

async fn send_outbound(
    State(svc): State<Arc<Engagement>>,
    Json(req): Json<OutboundRequest>,
) -> Reply {
    let contact = match parse_contact(req.to.as_deref().unwrap_or_default()) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let body = req.body.unwrap_or_default();

    match svc.send_now(&contact, &body).await {
        Ok(message) => (StatusCode::OK, Json(json!(message))),
        Err(DispatchError::Invalid(e)) => bad_request(e),
        Err(e @ DispatchError::DoNotContact { .. }) => {
            (StatusCode::CONFLICT, Json(json!({"error": e.to_string()})))
        }
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({"error": e.to_string()}))),
    }
}

// ── Leads ───────────────────────────────────────────────────────────────

async fn list_leads(State(svc): State<Arc<Engagement>>) -> impl IntoResponse {
    Json(svc.leads().list().await)
}

async fn upload_leads(State(svc): State<Arc<Engagement>>, Json(body): Json<Value>) -> Reply {
    let Value::Array(records) = body else {
        return bad_request("Invalid format: expected a list of leads");
    };
    let summary = svc.leads().import(records).await;
    (StatusCode::OK, Json(json!(summary)))
}

async fn get_lead(State(svc): State<Arc<Engagement>>, Path(contact): Path<String>) -> Reply {
    let contact = match parse_contact(&contact) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    (StatusCode::OK, Json(json!(svc.leads().get(&contact).await)))
}

async fn update_lead(
    State(svc): State<Arc<Engagement>>,
    Path(contact): Path<String>,
    Json(body): Json<Value>,
) -> Reply {
    let contact = match parse_contact(&contact) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let partial = match body {
        Value::Object(map) if !map.is_empty() => map,
        _ => return bad_request(ValidationError::MissingField("lead attributes".into())),
    };
    let lead = svc.leads().update(&contact, partial).await;
    (
        StatusCode::OK,
        Json(json!({"message": "Lead updated", "lead": lead})),
    )
}

// ── Conversations ───────────────────────────────────────────────────────

async fn get_conversation(
    State(svc): State<Arc<Engagement>>,
    Path(contact): Path<String>,
) -> Reply {
    let contact = match parse_contact(&contact) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    (StatusCode::OK, Json(json!(svc.conversation(&contact).await)))
}

// ── Scheduling ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ScheduleRequest {
    to: Option<String>,
    message: Option<String>,
    send_at: Option<String>,
}

async fn schedule_send(
    State(svc): State<Arc<Engagement>>,
    Json(req): Json<ScheduleRequest>,
) -> Reply {
    let (Some(to), Some(message), Some(send_at)) = (req.to, req.message, req.send_at) else {
        return bad_request("Missing required fields: to, message, send_at");
    };
    let contact = match parse_contact(&to) {
        Ok(c) => c,
        Err(reply) => return reply,
    };
    let fire_at = match DateTime::parse_from_rfc3339(send_at.trim()) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            return bad_request(ValidationError::InvalidField {
                field: "send_at".into(),
                reason: e.to_string(),
            });
        }
    };

    match svc.schedule(&contact, &message, fire_at).await {
        Ok(handle) => (
            StatusCode::OK,
            Json(json!({"message": "Message scheduled", "handle": handle})),
        ),
        Err(ScheduleError::ShutDown) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": ScheduleError::ShutDown.to_string()})),
        ),
        Err(e) => bad_request(e),
    }
}

async fn list_scheduled(State(svc): State<Arc<Engagement>>) -> impl IntoResponse {
    Json(svc.scheduler().list().await)
}

async fn cancel_scheduled(
    State(svc): State<Arc<Engagement>>,
    Path(handle): Path<String>,
) -> Reply {
    let Ok(handle) = handle.parse::<u64>().map(SendHandle) else {
        return bad_request("Invalid handle");
    };

    let outcome = svc.cancel(handle).await;
    debug!(handle = %handle, outcome = ?outcome, "Cancel requested");
    let status = match outcome {
        CancelOutcome::Cancelled => StatusCode::OK,
        CancelOutcome::NotFound => StatusCode::NOT_FOUND,
        CancelOutcome::AlreadyFired | CancelOutcome::AlreadyFinished { .. } => StatusCode::CONFLICT,
    };
    (status, Json(json!(outcome)))
}

// ── Rule passes ─────────────────────────────────────────────────────────

async fn run_drip(State(svc): State<Arc<Engagement>>) -> impl IntoResponse {
    let scheduled = svc.run_drip().await;
    Json(json!({"scheduled_drips": scheduled}))
}

async fn check_dnc(State(svc): State<Arc<Engagement>>) -> impl IntoResponse {
    let flagged = svc.check_dnc().await;
    Json(json!({"flagged_dnc": flagged}))
}
