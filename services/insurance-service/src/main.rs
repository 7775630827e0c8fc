use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use ws_api_types::NetworkConfigResponse;
use ws_catalog::FlightCatalog;
use ws_chain_client::InsuranceGateway;
use ws_chain_evm::EvmInsuranceGateway;
use ws_policy_core::PolicyService;
use ws_store::{InMemoryPolicyStore, PolicyStore, RocksDbPolicyStore};

mod catalog;
mod config;
mod contact;
mod network;
mod policies;
mod staking;

use config::ServiceConfig;

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

pub(crate) type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub(crate) struct AppState {
    pub(crate) catalog: FlightCatalog,
    /// None when the chain trio is unconfigured; policy endpoints then
    /// answer 503.
    pub(crate) policies: Option<Arc<PolicyService<EvmInsuranceGateway, dyn PolicyStore>>>,
    pub(crate) store: Arc<dyn PolicyStore>,
    pub(crate) network: NetworkConfigResponse,
    pub(crate) staking: staking::StakingBook,
    pub(crate) contact_relay_url: Option<String>,
    pub(crate) http: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::from_env()?;

    let catalog = match &config.flights_file {
        Some(path) => FlightCatalog::from_file(std::path::Path::new(path))?,
        None => FlightCatalog::builtin(),
    };
    info!(flights = catalog.len(), "flight catalog loaded");

    let store: Arc<dyn PolicyStore> = match &config.data_dir {
        Some(dir) => Arc::new(RocksDbPolicyStore::open_default(dir)?),
        None => {
            warn!("WS_DATA_DIR unset, policy records are in-memory only");
            Arc::new(InMemoryPolicyStore::default())
        }
    };

    let policies = match config.chain_settings()? {
        Some((rpc_url, signer_key, contract_address)) => {
            let gateway = Arc::new(
                EvmInsuranceGateway::connect(
                    &config.network,
                    &rpc_url,
                    &signer_key,
                    &contract_address,
                )
                .await?,
            );

            let subscription = gateway.subscribe_insurance_created().await?;
            let service = Arc::new(PolicyService::new(
                gateway,
                store.clone(),
                config.claim_settlement,
            ));
            tokio::spawn(service.clone().run_reconciler(subscription));

            Some(service)
        }
        None => {
            warn!("chain settings unset, policy endpoints will answer 503");
            None
        }
    };

    let state = Arc::new(AppState {
        catalog,
        policies,
        store,
        network: network::polygon_mumbai(),
        staking: staking::StakingBook::default(),
        contact_relay_url: config.contact_relay_url.clone(),
        http: reqwest::Client::new(),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/network/config", get(network::network_config))
        .route("/catalog/cities", get(catalog::list_cities))
        .route("/catalog/flights", get(catalog::list_flights))
        .route("/policies", get(policies::list_policies))
        .route("/policies/insure", post(policies::insure))
        .route("/policies/{policy_id}/claim", post(policies::claim))
        .route("/policies/import-legacy", post(policies::import_legacy))
        .route("/contact", post(contact::submit_contact))
        .route("/staking/overview", get(staking::overview))
        .route("/staking/estimate", post(staking::estimate))
        .route("/staking/stake", post(staking::stake))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("insurance-service listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "insurance-service",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "insurance-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn not_found(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn conflict(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn unavailable(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn bad_gateway(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_GATEWAY,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

pub(crate) fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
