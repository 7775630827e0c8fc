use axum::{Json, extract::State};
use std::sync::Arc;
use ws_api_types::{NativeCurrencyInfo, NetworkConfigResponse};

use crate::AppState;

/// Returns the chain metadata clients need to point their wallet at the
/// right network before signing anything.
pub(crate) async fn network_config(
    State(state): State<Arc<AppState>>,
) -> Json<NetworkConfigResponse> {
    Json(state.network.clone())
}

pub(crate) fn polygon_mumbai() -> NetworkConfigResponse {
    NetworkConfigResponse {
        chain_id: 80001,
        chain_name: "Polygon Mumbai".to_owned(),
        native_currency: NativeCurrencyInfo {
            name: "MATIC".to_owned(),
            symbol: "MATIC".to_owned(),
            decimals: 18,
        },
        rpc_urls: vec!["https://rpc-mumbai.maticvigil.com".to_owned()],
        block_explorer_urls: vec!["https://mumbai.polygonscan.com".to_owned()],
    }
}
