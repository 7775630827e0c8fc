use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use ws_api_types::{ContactRequest, ContactResponse};

use crate::{ApiResult, AppState, bad_gateway, bad_request, unavailable};

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    name: &'a str,
    email: &'a str,
    message: &'a str,
}

/// Forwards the contact form to the configured third-party form relay.
pub(crate) async fn submit_contact(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ContactRequest>,
) -> ApiResult<ContactResponse> {
    if request.name.trim().is_empty() {
        return Err(bad_request("name is required"));
    }
    if request.email.trim().is_empty() || !request.email.contains('@') {
        return Err(bad_request("a valid email is required"));
    }
    if request.message.trim().is_empty() {
        return Err(bad_request("message is required"));
    }

    let Some(relay_url) = state.contact_relay_url.as_deref() else {
        return Err(unavailable("contact relay not configured"));
    };

    let response = state
        .http
        .post(relay_url)
        .json(&RelayPayload {
            name: request.name.trim(),
            email: request.email.trim(),
            message: request.message.trim(),
        })
        .send()
        .await
        .map_err(|err| bad_gateway(&format!("contact relay transport: {err}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(bad_gateway(&format!("contact relay answered {status}")));
    }

    info!(email = %request.email.trim(), "contact message relayed");
    Ok(Json(ContactResponse { delivered: true }))
}
