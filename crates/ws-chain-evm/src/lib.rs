//! EVM gateway for the flight-insurance contract.
//!
//! Submits `createInsurance` / `initiateClaimRequest` transactions, waits for
//! one confirmation, and extracts the assigned insurance id from the
//! `InsuranceCreated` event in the receipt. Event subscription is a polling
//! `eth_getLogs` loop owned by a guard.

use alloy::{
    network::EthereumWallet,
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolEvent,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use ws_chain_client::{
    ClaimConfirmation, EventSubscription, GatewayError, InsuranceConfirmation,
    InsuranceCreatedEvent, InsuranceGateway, SubmitInsuranceRequest, SubscriptionGuard,
    parse_ether,
};

/// Gas hint the source application passed for `createInsurance`.
const CREATE_GAS_LIMIT: u64 = 1_000_000;

/// Gas hint for `initiateClaimRequest`.
const CLAIM_GAS_LIMIT: u64 = 500_000;

/// Event poll cadence.
const POLL_INTERVAL_MS: u64 = 2_000;

sol! {
    #[sol(rpc)]
    interface IFlightInsurance {
        function createInsurance(
            address user,
            uint256 amount,
            string calldata flightNumber,
            string calldata airlineCode,
            string calldata airlineName,
            string calldata departureAirportCode,
            string calldata departureAirportName,
            string calldata departureDateAndTime,
            string calldata arrivalAirportCode,
            string calldata arrivalAirportName,
            string calldata arrivalDateAndTime
        ) external returns (uint256);

        function initiateClaimRequest(uint256 insuranceId) external;

        event InsuranceCreated(address indexed user, uint256 insuranceId);
    }
}

pub struct EvmInsuranceGateway {
    network: String,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    wallet: EthereumWallet,
    contract_address: Address,
}

impl EvmInsuranceGateway {
    /// Connect and verify the RPC endpoint is reachable. An unreachable
    /// provider is the `WalletUnavailable` case of the error taxonomy.
    pub async fn connect(
        network: &str,
        rpc_url: &str,
        signer_key: &str,
        contract_address: &str,
    ) -> Result<Self, GatewayError> {
        let signer: PrivateKeySigner = signer_key
            .parse()
            .map_err(|err| GatewayError::WalletUnavailable(format!("invalid signer key: {err}")))?;
        let wallet = EthereumWallet::from(signer);

        let contract_address = Address::from_str(contract_address)
            .map_err(|err| GatewayError::Rpc(format!("invalid contract address: {err}")))?;

        let provider = ProviderBuilder::new().on_http(
            rpc_url
                .parse()
                .map_err(|err| GatewayError::Rpc(format!("invalid rpc url: {err}")))?,
        );

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|err| GatewayError::WalletUnavailable(err.to_string()))?;

        info!(
            network = %network,
            chain_id = chain_id,
            contract = %contract_address,
            "insurance gateway connected"
        );

        Ok(Self {
            network: network.to_owned(),
            rpc_url: rpc_url.to_owned(),
            provider,
            wallet,
            contract_address,
        })
    }

    fn signing_provider(&self) -> Result<impl Provider<Http<Client>>, GatewayError> {
        Ok(ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(
                self.rpc_url
                    .parse()
                    .map_err(|err| GatewayError::Rpc(format!("invalid rpc url: {err}")))?,
            ))
    }
}

#[async_trait]
impl InsuranceGateway for EvmInsuranceGateway {
    fn network(&self) -> &str {
        &self.network
    }

    async fn submit_insurance(
        &self,
        req: SubmitInsuranceRequest,
    ) -> Result<InsuranceConfirmation, GatewayError> {
        let amount_wei = U256::from(parse_ether(&req.amount)?);
        let beneficiary = Address::from_str(&req.beneficiary)
            .map_err(|err| GatewayError::Rpc(format!("invalid beneficiary address: {err}")))?;

        info!(
            flight = %req.flight_number,
            amount = %req.amount,
            "submitting createInsurance"
        );

        let provider = self.signing_provider()?;
        let contract = IFlightInsurance::new(self.contract_address, &provider);

        let pending = contract
            .createInsurance(
                beneficiary,
                amount_wei,
                req.flight_number.clone(),
                req.airline_code,
                req.airline_name,
                req.departure_airport_code,
                req.departure_airport_name,
                req.departure_time,
                req.arrival_airport_code,
                req.arrival_airport_name,
                req.arrival_time,
            )
            .gas(CREATE_GAS_LIMIT)
            .send()
            .await
            .map_err(|err| classify_send_error(&err.to_string()))?;

        let tx_hash = format!("{:?}", pending.tx_hash());
        debug!(tx_hash = %tx_hash, "createInsurance sent, awaiting confirmation");

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|err| GatewayError::Rpc(format!("receipt: {err}")))?;

        if !receipt.status() {
            return Err(GatewayError::TransactionFailed(format!(
                "createInsurance reverted in tx {tx_hash}"
            )));
        }

        let logs: Vec<alloy::primitives::Log> =
            receipt.inner.logs().iter().map(|log| log.inner.clone()).collect();
        let insurance_id = extract_insurance_id(self.contract_address, &logs)?;

        info!(
            flight = %req.flight_number,
            insurance_id = %insurance_id,
            tx_hash = %tx_hash,
            "insurance created"
        );

        Ok(InsuranceConfirmation {
            insurance_id,
            tx_hash,
            confirmed_at_block: receipt.block_number.unwrap_or(0),
        })
    }

    async fn submit_claim(&self, insurance_id: &str) -> Result<ClaimConfirmation, GatewayError> {
        let id: U256 = insurance_id
            .parse()
            .map_err(|_| GatewayError::MissingInsuranceId)?;

        info!(insurance_id = %insurance_id, "submitting initiateClaimRequest");

        let provider = self.signing_provider()?;
        let contract = IFlightInsurance::new(self.contract_address, &provider);

        let pending = contract
            .initiateClaimRequest(id)
            .gas(CLAIM_GAS_LIMIT)
            .send()
            .await
            .map_err(|err| classify_send_error(&err.to_string()))?;

        let tx_hash = format!("{:?}", pending.tx_hash());

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|err| GatewayError::Rpc(format!("receipt: {err}")))?;

        if !receipt.status() {
            return Err(GatewayError::TransactionFailed(format!(
                "initiateClaimRequest reverted in tx {tx_hash}"
            )));
        }

        Ok(ClaimConfirmation {
            tx_hash,
            confirmed_at_block: receipt.block_number.unwrap_or(0),
        })
    }

    async fn subscribe_insurance_created(&self) -> Result<EventSubscription, GatewayError> {
        let start_block = self
            .provider
            .get_block_number()
            .await
            .map_err(|err| GatewayError::WalletUnavailable(err.to_string()))?;

        let provider = self.provider.clone();
        let contract_address = self.contract_address;
        let (tx, rx) = mpsc::channel(64);

        let handle = tokio::spawn(async move {
            let mut last_seen = start_block;
            let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);

            loop {
                tokio::time::sleep(poll_interval).await;

                let current = match provider.get_block_number().await {
                    Ok(block) => block,
                    Err(err) => {
                        warn!("event poll: failed to get block number: {err}");
                        continue;
                    }
                };
                if current <= last_seen {
                    continue;
                }

                let filter = alloy::rpc::types::Filter::new()
                    .address(contract_address)
                    .from_block(last_seen + 1)
                    .to_block(current);

                let logs = match provider.get_logs(&filter).await {
                    Ok(logs) => logs,
                    Err(err) => {
                        warn!("event poll: failed to get logs: {err}");
                        continue;
                    }
                };

                for log in logs {
                    let Ok(decoded) =
                        IFlightInsurance::InsuranceCreated::decode_log(&log.inner, true)
                    else {
                        continue;
                    };

                    let event = InsuranceCreatedEvent {
                        owner: format!("{:?}", decoded.data.user),
                        insurance_id: decoded.data.insuranceId.to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        // Consumer gone; stop polling.
                        return;
                    }
                }

                last_seen = current;
            }
        });

        Ok(EventSubscription {
            events: rx,
            guard: SubscriptionGuard::new(handle),
        })
    }
}

/// Pull the insurance id out of a confirmed receipt's logs. Only logs
/// emitted by the insurance contract count; a sub-call to another contract
/// may emit an identically-shaped event in the same transaction.
fn extract_insurance_id(
    contract: Address,
    logs: &[alloy::primitives::Log],
) -> Result<String, GatewayError> {
    for log in logs {
        if log.address != contract {
            continue;
        }
        let Some(topic0) = log.data.topics().first() else {
            continue;
        };
        if *topic0 != IFlightInsurance::InsuranceCreated::SIGNATURE_HASH {
            continue;
        }

        let decoded = IFlightInsurance::InsuranceCreated::decode_log(log, true)
            .map_err(|err| GatewayError::Rpc(format!("decode InsuranceCreated: {err}")))?;

        // Zero is the contract's uninitialised id value.
        if decoded.data.insuranceId == U256::ZERO {
            return Err(GatewayError::MissingInsuranceId);
        }
        return Ok(decoded.data.insuranceId.to_string());
    }

    Err(GatewayError::EventNotFound("InsuranceCreated"))
}

/// Map a send-stage provider error onto the taxonomy. JSON-RPC code 4001 is
/// the wallet's "user declined to sign" response.
fn classify_send_error(message: &str) -> GatewayError {
    let lowered = message.to_lowercase();
    if lowered.contains("4001") || lowered.contains("rejected") || lowered.contains("denied") {
        return GatewayError::TransactionRejected;
    }
    if lowered.contains("insufficient funds") {
        return GatewayError::TransactionFailed(message.to_owned());
    }
    GatewayError::Rpc(message.to_owned())
}
