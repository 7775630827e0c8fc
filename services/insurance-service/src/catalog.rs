use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use std::sync::Arc;
use ws_api_types::{CitiesResponse, FlightsResponse};

use crate::{ApiResult, AppState, bad_request};

#[derive(Debug, Deserialize)]
pub(crate) struct FlightsQuery {
    city: String,
}

pub(crate) async fn list_cities(State(state): State<Arc<AppState>>) -> Json<CitiesResponse> {
    Json(CitiesResponse {
        cities: state.catalog.cities(),
    })
}

/// Flights departing from one city. An unknown city is an empty list, not an
/// error.
pub(crate) async fn list_flights(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlightsQuery>,
) -> ApiResult<FlightsResponse> {
    if query.city.trim().is_empty() {
        return Err(bad_request("city is required"));
    }

    Ok(Json(FlightsResponse {
        flights: state.catalog.flights_from(&query.city),
    }))
}
