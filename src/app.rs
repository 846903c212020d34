use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::store;
use crate::types::{AppState, HuntTemplateBody, SendTextBody};
use crate::whatsapp;

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": store::now_iso() }))
}

async fn webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").cloned().unwrap_or_default();
    let token = params.get("hub.verify_token").cloned().unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe"
        && !state.config.verify_token.is_empty()
        && token == state.config.verify_token
    {
        println!("[webhook] verification succeeded");
        return (StatusCode::OK, challenge).into_response();
    }

    eprintln!("[webhook] verification failed (mode: {mode})");
    StatusCode::FORBIDDEN.into_response()
}

async fn webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !whatsapp::verify_webhook_signature(&state.config.app_secret, signature_header, &body) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        )
            .into_response();
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));

    // Acknowledge before processing; the platform never sees a processing
    // failure, so it never redelivers. Failures surface in the log only.
    tokio::spawn(async move {
        process_webhook_event(state, payload).await;
    });

    StatusCode::OK.into_response()
}

pub(crate) async fn process_webhook_event(state: Arc<AppState>, payload: Value) {
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if entries.is_empty() {
        println!("[webhook] non-message event received, ignoring");
        return;
    }

    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for change in changes {
            let value = change.get("value").cloned().unwrap_or_else(|| json!({}));
            let profile_names = whatsapp::contact_profile_names(&value);
            let messages = value
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for message in messages {
                let from = message
                    .get("from")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                if from.is_empty() {
                    continue;
                }
                let wa_message_id = message
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let name = profile_names
                    .get(&from)
                    .cloned()
                    .unwrap_or_else(|| "Customer".to_string());
                let (message_type, content) = whatsapp::classify_inbound(&message);

                println!(
                    "[webhook] message from {name} ({from}) type {message_type}: {content}"
                );

                if let Err(err) =
                    store::upsert_lead(&state.db, &from, &name, "responded").await
                {
                    eprintln!("[webhook] lead upsert failed for {from}: {err}");
                    continue;
                }
                if let Err(err) = store::insert_message(
                    &state.db,
                    &from,
                    wa_message_id.as_deref(),
                    "inbound",
                    &message_type,
                    &content,
                )
                .await
                {
                    eprintln!("[webhook] message insert failed for {from}: {err}");
                }
            }
        }
    }
}

async fn get_leads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match store::list_leads(&state.db).await {
        Ok(leads) => Json(json!({ "leads": leads })).into_response(),
        Err(err) => {
            eprintln!("[leads] list failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn mark_lead_read(
    Path(phone): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match store::mark_lead_read(&state.db, &phone).await {
        Ok(_) => Json(json!({ "success": true, "message": "Marked as read." })).into_response(),
        Err(err) => {
            eprintln!("[leads] mark_read failed for {phone}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn get_lead_messages(
    Path(phone): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match store::messages_for_lead(&state.db, &phone).await {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => {
            eprintln!("[leads] message history failed for {phone}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn get_media(
    Path(media_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match whatsapp::fetch_media(&state, &media_id).await {
        Ok((bytes, content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(err) => {
            eprintln!("[media] fetch failed for {media_id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to fetch media" })),
            )
                .into_response()
        }
    }
}

async fn send_text(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendTextBody>,
) -> impl IntoResponse {
    let phone = body.phone.as_deref().map(str::trim).unwrap_or("");
    let message = body.message.as_deref().map(str::trim).unwrap_or("");
    if phone.is_empty() || message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "phone and message are required" })),
        )
            .into_response();
    }

    // Manual text sends do not touch the lead row; only template outreach
    // marks a lead as contacted.
    let payload = whatsapp::text_send_payload(phone, message);
    match whatsapp::send_message(&state, &payload).await {
        Ok(_) => {
            Json(json!({ "success": true, "message": "Text message dispatched." }))
                .into_response()
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": "send failed (see server log)" })),
        )
            .into_response(),
    }
}

async fn hunt_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HuntTemplateBody>,
) -> impl IntoResponse {
    let phone = body.phone.as_deref().map(str::trim).unwrap_or("");
    let template_name = body.template_name.as_deref().map(str::trim).unwrap_or("");
    if phone.is_empty() || template_name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "phone and templateName are required" })),
        )
            .into_response();
    }
    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("Cold lead");

    if let Err(err) = store::upsert_lead(&state.db, phone, name, "contacted").await {
        eprintln!("[hunt] lead upsert failed for {phone}: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": "database error" })),
        )
            .into_response();
    }

    println!("[hunt] sending template '{template_name}' to {phone}");
    let payload = whatsapp::template_send_payload(phone, template_name);
    match whatsapp::send_message(&state, &payload).await {
        Ok(_) => Json(json!({
            "success": true,
            "message": format!("Hunt started for {phone}.")
        }))
        .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": "send failed (see server log)" })),
        )
            .into_response(),
    }
}

pub(crate) struct BatchFilterReport {
    pub clean: Vec<String>,
    pub total_input: usize,
    pub total_unique: usize,
}

/// Dedupes the candidate list (first-seen order preserved) and drops every
/// number already tracked as a lead.
pub(crate) fn filter_candidates(
    phones: &[String],
    existing: &HashSet<String>,
) -> BatchFilterReport {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for phone in phones {
        if seen.insert(phone.clone()) {
            unique.push(phone.clone());
        }
    }
    let clean = unique
        .iter()
        .filter(|phone| !existing.contains(*phone))
        .cloned()
        .collect::<Vec<_>>();
    BatchFilterReport {
        total_input: phones.len(),
        total_unique: unique.len(),
        clean,
    }
}

async fn batch_filter(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let Some(raw) = body.get("phones").and_then(Value::as_array) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "request body must carry a 'phones' array" })),
        )
            .into_response();
    };
    let phones = raw
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .unwrap_or_else(|| v.to_string())
        })
        .collect::<Vec<_>>();

    let existing = match store::existing_phones(&state.db).await {
        Ok(set) => set,
        Err(err) => {
            eprintln!("[hunt] batch filter query failed: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error in batch filter" })),
            )
                .into_response();
        }
    };

    let report = filter_candidates(&phones, &existing);
    Json(json!({
        "cleanList": report.clean,
        "totalEntrada": report.total_input,
        "totalUnicos": report.total_unique,
        "totalFiltrados": report.clean.len(),
        "totalRejeitados": report.total_unique - report.clean.len(),
    }))
    .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(webhook_verify).post(webhook_event))
        .route("/api/leads", get(get_leads))
        .route("/api/leads/{phone}/mark_read", post(mark_lead_read))
        .route("/api/leads/{phone}/messages", get(get_lead_messages))
        .route("/api/media/{media_id}", get(get_media))
        .route("/api/send/text", post(send_text))
        .route("/api/hunt/template", post(hunt_template))
        .route("/api/hunt/batch_filter", post(batch_filter))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
