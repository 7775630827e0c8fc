use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Airline {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Airport {
    pub code: String,
    pub name: String,
    pub city: String,
    pub country: String,
}

/// One end of a flight: the airport plus the scheduled local time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlightLeg {
    pub airport: Airport,
    pub time: String,
}

/// Catalog flight. Field names stay camelCase on the wire to match the
/// upstream flight dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    pub flight_number: String,
    pub airline: Airline,
    pub departure: FlightLeg,
    pub arrival: FlightLeg,
    pub status: String,
    pub delay: String,
}

/// Lifecycle of a policy record. `Uninsured` is the absence of a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    /// Creation transaction confirmed but the insurance id has not been
    /// reconciled yet.
    Insuring,
    Insured,
    ClaimPending,
    Claimed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsureRequest {
    pub flight_number: String,
    /// Decimal native-currency amount, e.g. "0.05".
    pub insurance_amount: String,
    pub beneficiary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsureResponse {
    pub policy_id: String,
    pub insurance_id: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub policy_id: String,
    pub tx_hash: String,
    /// "retired" or "claimed", depending on the configured settlement.
    pub settlement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyView {
    pub policy_id: String,
    pub flight: Flight,
    pub insurance_amount: String,
    pub insurance_id: Option<String>,
    pub status: PolicyStatus,
    pub claimable: bool,
    pub created_at_epoch_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesResponse {
    pub policies: Vec<PolicyView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitiesResponse {
    pub cities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightsResponse {
    pub flights: Vec<Flight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLegacyResponse {
    pub imported: usize,
    pub dropped: usize,
    /// The claimed-flights array could not be read; claim state was not
    /// applied.
    pub claimed_unreadable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactResponse {
    pub delivered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeEstimateRequest {
    /// Decimal native-currency amount to stake.
    pub amount: String,
    /// Projection window; defaults to 30 days.
    pub period_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeEstimateResponse {
    pub amount: String,
    pub period_days: u32,
    pub projected_reward: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRequest {
    /// Decimal native-currency amount to add to the stake.
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingOverviewResponse {
    pub total_staked: String,
    pub reward_rate_per_month: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrencyInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Chain metadata handed to clients so wallet prompts target the right
/// network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigResponse {
    pub chain_id: u64,
    pub chain_name: String,
    pub native_currency: NativeCurrencyInfo,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}
