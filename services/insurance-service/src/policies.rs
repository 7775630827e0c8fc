use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use ws_api_types::{
    ClaimResponse, ImportLegacyResponse, InsureRequest, InsureResponse, PoliciesResponse,
};
use ws_chain_client::GatewayError;
use ws_chain_evm::EvmInsuranceGateway;
use ws_policy_core::{PolicyError, PolicyService, derive_views};
use ws_store::PolicyStore;

use crate::{
    ApiResult, AppState, ErrorResponse, bad_gateway, bad_request, conflict, internal_error,
    not_found, unavailable,
};

type Policies = Arc<PolicyService<EvmInsuranceGateway, dyn PolicyStore>>;

fn policies(state: &AppState) -> Result<&Policies, (StatusCode, Json<ErrorResponse>)> {
    state
        .policies
        .as_ref()
        .ok_or_else(|| unavailable("wallet provider unavailable: chain settings not configured"))
}

/// List works even without a gateway; claim eligibility is derived from the
/// store alone.
pub(crate) async fn list_policies(
    State(state): State<Arc<AppState>>,
) -> ApiResult<PoliciesResponse> {
    let records = state.store.load().await.map_err(internal_error)?;
    Ok(Json(PoliciesResponse {
        policies: derive_views(&records),
    }))
}

pub(crate) async fn insure(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InsureRequest>,
) -> ApiResult<InsureResponse> {
    if request.flight_number.trim().is_empty() {
        return Err(bad_request("flightNumber is required"));
    }
    if request.insurance_amount.trim().is_empty() {
        return Err(bad_request("insuranceAmount is required"));
    }
    if request.beneficiary.trim().is_empty() {
        return Err(bad_request("beneficiary is required"));
    }

    let flight = state
        .catalog
        .find(&request.flight_number)
        .ok_or_else(|| not_found("flight not found in catalog"))?
        .clone();

    let service = policies(&state)?;
    let (record, confirmation) = service
        .insure(&flight, &request.insurance_amount, &request.beneficiary)
        .await
        .map_err(policy_error)?;

    Ok(Json(InsureResponse {
        policy_id: record.policy_id.to_string(),
        insurance_id: confirmation.insurance_id,
        tx_hash: confirmation.tx_hash,
    }))
}

pub(crate) async fn claim(
    State(state): State<Arc<AppState>>,
    Path(policy_id): Path<String>,
) -> ApiResult<ClaimResponse> {
    let policy_id =
        Uuid::parse_str(policy_id.trim()).map_err(|_| bad_request("invalid policy id"))?;

    let service = policies(&state)?;
    let outcome = service.claim(policy_id).await.map_err(policy_error)?;

    Ok(Json(ClaimResponse {
        policy_id: policy_id.to_string(),
        tx_hash: outcome.confirmation.tx_hash,
        settlement: outcome.settlement.as_str().to_owned(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportLegacyRequest {
    /// Raw `insuredFlights` array as it sat in browser storage.
    insured_flights: serde_json::Value,
    /// Raw `claimedFlights` array; optional because many installs never
    /// claimed anything.
    claimed_flights: Option<serde_json::Value>,
}

/// One-way migration of the old two-array browser storage format.
pub(crate) async fn import_legacy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportLegacyRequest>,
) -> ApiResult<ImportLegacyResponse> {
    let insured = request.insured_flights.to_string();
    let claimed = request
        .claimed_flights
        .map(|value| value.to_string())
        .unwrap_or_else(|| "[]".to_owned());

    let summary = ws_store::import_legacy(&*state.store, &insured, &claimed)
        .await
        .map_err(internal_error)?;

    Ok(Json(ImportLegacyResponse {
        imported: summary.imported,
        dropped: summary.dropped,
        claimed_unreadable: summary.claimed_unreadable,
    }))
}

pub(crate) fn policy_error(err: PolicyError) -> (StatusCode, Json<ErrorResponse>) {
    match &err {
        PolicyError::UnknownPolicy(_) => not_found(&err.to_string()),
        PolicyError::NotClaimable(_) => bad_request(&err.to_string()),
        PolicyError::AlreadyClaimed(_) | PolicyError::SubmissionInProgress(_) => {
            conflict(&err.to_string())
        }
        PolicyError::Gateway(gateway_err) => match gateway_err {
            GatewayError::TransactionRejected | GatewayError::InvalidAmount(_) => {
                bad_request(&err.to_string())
            }
            GatewayError::WalletUnavailable(_) => unavailable(&err.to_string()),
            GatewayError::TransactionFailed(_)
            | GatewayError::EventNotFound(_)
            | GatewayError::MissingInsuranceId
            | GatewayError::Rpc(_) => bad_gateway(&err.to_string()),
        },
        PolicyError::Store(_) => internal_error(err),
    }
}
