use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;
use ws_policy_core::ClaimSettlement;

/// Everything read from the environment at startup. Chain settings are
/// optional: without them the service still serves the catalog, staking and
/// contact endpoints and reports the gateway as unavailable.
#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// RocksDB directory; unset means an in-memory store.
    pub data_dir: Option<String>,
    /// Optional dataset override; unset uses the bundled catalog.
    pub flights_file: Option<String>,
    pub network: String,
    pub rpc_url: Option<String>,
    pub signer_key: Option<String>,
    pub contract_address: Option<String>,
    pub claim_settlement: ClaimSettlement,
    pub contact_relay_url: Option<String>,
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

impl ServiceConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let bind_addr = optional("WS_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_owned())
            .parse::<SocketAddr>()
            .context("WS_BIND_ADDR is not a valid socket address")?;

        let claim_settlement = match optional("WS_CLAIM_SETTLEMENT") {
            Some(value) => ClaimSettlement::from_str(&value)
                .map_err(|err| anyhow::anyhow!("WS_CLAIM_SETTLEMENT: {err}"))?,
            None => ClaimSettlement::default(),
        };

        Ok(Self {
            bind_addr,
            data_dir: optional("WS_DATA_DIR"),
            flights_file: optional("WS_FLIGHTS_FILE"),
            network: optional("WS_NETWORK").unwrap_or_else(|| "polygon-mumbai".to_owned()),
            rpc_url: optional("WS_RPC_URL"),
            signer_key: optional("WS_SIGNER_KEY"),
            contract_address: optional("WS_CONTRACT_ADDRESS"),
            claim_settlement,
            contact_relay_url: optional("WS_CONTACT_RELAY_URL"),
        })
    }

    /// Chain settings come as a trio; a partial set is a configuration
    /// mistake worth flagging rather than silently running degraded.
    pub(crate) fn chain_settings(&self) -> Result<Option<(String, String, String)>> {
        match (&self.rpc_url, &self.signer_key, &self.contract_address) {
            (Some(rpc), Some(key), Some(contract)) => {
                Ok(Some((rpc.clone(), key.clone(), contract.clone())))
            }
            (None, None, None) => Ok(None),
            _ => anyhow::bail!(
                "WS_RPC_URL, WS_SIGNER_KEY and WS_CONTRACT_ADDRESS must be set together"
            ),
        }
    }
}
