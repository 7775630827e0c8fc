use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use ws_api_types::Flight;

pub const NATIVE_DECIMALS: u32 = 18;
const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No signing provider reachable. Not recoverable without one.
    #[error("wallet provider unavailable: {0}")]
    WalletUnavailable(String),
    /// The user declined to sign. Recoverable; nothing was sent.
    #[error("transaction rejected by user")]
    TransactionRejected,
    /// The receipt came back with a failure status.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    #[error("{0} event not found in transaction receipt")]
    EventNotFound(&'static str),
    #[error("insurance id missing from creation event")]
    MissingInsuranceId,
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Parameters of a `createInsurance` call, flattened the way the contract
/// takes them.
#[derive(Debug, Clone)]
pub struct SubmitInsuranceRequest {
    pub beneficiary: String,
    /// Decimal native-currency amount, e.g. "0.05".
    pub amount: String,
    pub flight_number: String,
    pub airline_code: String,
    pub airline_name: String,
    pub departure_airport_code: String,
    pub departure_airport_name: String,
    pub departure_time: String,
    pub arrival_airport_code: String,
    pub arrival_airport_name: String,
    pub arrival_time: String,
}

impl SubmitInsuranceRequest {
    pub fn from_flight(flight: &Flight, amount: &str, beneficiary: &str) -> Self {
        Self {
            beneficiary: beneficiary.to_owned(),
            amount: amount.to_owned(),
            flight_number: flight.flight_number.clone(),
            airline_code: flight.airline.code.clone(),
            airline_name: flight.airline.name.clone(),
            departure_airport_code: flight.departure.airport.code.clone(),
            departure_airport_name: flight.departure.airport.name.clone(),
            departure_time: flight.departure.time.clone(),
            arrival_airport_code: flight.arrival.airport.code.clone(),
            arrival_airport_name: flight.arrival.airport.name.clone(),
            arrival_time: flight.arrival.time.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsuranceConfirmation {
    pub insurance_id: String,
    pub tx_hash: String,
    pub confirmed_at_block: u64,
}

#[derive(Debug, Clone)]
pub struct ClaimConfirmation {
    pub tx_hash: String,
    pub confirmed_at_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsuranceCreatedEvent {
    pub owner: String,
    pub insurance_id: String,
}

/// Owns the background task feeding an event subscription. Dropping the
/// guard stops the task, so a subscription can never outlive its consumer.
pub struct SubscriptionGuard {
    handle: Option<JoinHandle<()>>,
}

impl SubscriptionGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Guard with no task behind it, for in-process gateways.
    pub fn detached() -> Self {
        Self { handle: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub struct EventSubscription {
    pub events: mpsc::Receiver<InsuranceCreatedEvent>,
    pub guard: SubscriptionGuard,
}

#[async_trait]
pub trait InsuranceGateway: Send + Sync {
    /// Slug of the network this gateway talks to, e.g. "polygon-mumbai".
    fn network(&self) -> &str;

    /// Submit a `createInsurance` transaction, wait for one confirmation and
    /// return the insurance id extracted from the emitted creation event.
    async fn submit_insurance(
        &self,
        req: SubmitInsuranceRequest,
    ) -> Result<InsuranceConfirmation, GatewayError>;

    /// Submit an `initiateClaimRequest` transaction and wait for one
    /// confirmation.
    async fn submit_claim(&self, insurance_id: &str) -> Result<ClaimConfirmation, GatewayError>;

    /// Stream of on-chain `InsuranceCreated` events.
    async fn subscribe_insurance_created(&self) -> Result<EventSubscription, GatewayError>;
}

/// Gateways keyed by network slug. The source application hard-coded one
/// contract per build; here the network is a lookup.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn InsuranceGateway>>,
}

impl GatewayRegistry {
    pub fn register(&mut self, gateway: Arc<dyn InsuranceGateway>) {
        self.gateways.insert(gateway.network().to_owned(), gateway);
    }

    pub fn gateway(&self, network: &str) -> Option<Arc<dyn InsuranceGateway>> {
        self.gateways.get(network).cloned()
    }
}

/// Parse a decimal native-currency amount ("0.05") into wei.
pub fn parse_ether(amount: &str) -> Result<u128, GatewayError> {
    let invalid = || GatewayError::InvalidAmount(amount.to_owned());

    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (trimmed, ""),
    };

    if frac.len() as u32 > NATIVE_DECIMALS {
        return Err(invalid());
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| invalid())?
            .checked_mul(WEI_PER_ETHER)
            .ok_or_else(invalid)?
    };

    let frac_wei = if frac.is_empty() {
        0
    } else {
        let scale = 10_u128.pow(NATIVE_DECIMALS - frac.len() as u32);
        frac.parse::<u128>().map_err(|_| invalid())? * scale
    };

    whole_wei.checked_add(frac_wei).ok_or_else(invalid)
}

/// Render wei as a decimal native-currency string, trailing zeros trimmed.
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETHER;
    let frac = wei % WEI_PER_ETHER;
    if frac == 0 {
        return whole.to_string();
    }

    let frac = format!("{frac:018}");
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}
