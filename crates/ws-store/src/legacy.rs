//! One-way import of the legacy browser-storage format: two independent JSON
//! arrays (`insuredFlights`, `claimedFlights`) that were allowed to drift
//! apart. Importing merges them into the single policy aggregate.

use crate::{PolicyRecord, PolicyStore};
use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;
use ws_api_types::{Flight, PolicyStatus};

/// Legacy records stored the catalog entry as-is, so the flight may be
/// wrapped in one more `flight` object than ours.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyFlight {
    Wrapped { flight: Flight },
    Plain(Flight),
}

impl LegacyFlight {
    fn into_flight(self) -> Flight {
        match self {
            LegacyFlight::Wrapped { flight } => flight,
            LegacyFlight::Plain(flight) => flight,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyStoredFlight {
    flight: LegacyFlight,
    insurance_amount: String,
    timestamp: u128,
    insurance_id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub dropped: usize,
    /// The claimed-flights array was unreadable, so no record could be
    /// marked `Claimed`. The caller should not treat the import as complete.
    pub claimed_unreadable: bool,
}

/// Parse the two legacy arrays and append the merged records. Malformed
/// input, malformed entries, and entries that never received an insurance id
/// are dropped; a flight number present in the claimed array marks the
/// record `Claimed`.
pub async fn import_legacy<S: PolicyStore + ?Sized>(
    store: &S,
    insured_json: &str,
    claimed_json: &str,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    let claimed: Vec<String> = match serde_json::from_str(claimed_json) {
        Ok(claimed) => claimed,
        Err(err) => {
            warn!("legacy claimed-flights array unreadable, records import as insured: {err}");
            summary.claimed_unreadable = true;
            Vec::new()
        }
    };

    let entries: Vec<Value> = serde_json::from_str(insured_json).unwrap_or_else(|err| {
        warn!("legacy insured-flights array unreadable, importing nothing: {err}");
        Vec::new()
    });

    for entry in entries {
        let parsed = match serde_json::from_value::<LegacyStoredFlight>(entry) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("dropping malformed legacy record: {err}");
                summary.dropped += 1;
                continue;
            }
        };

        let insurance_id = match parsed.insurance_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                summary.dropped += 1;
                continue;
            }
        };

        let flight = parsed.flight.into_flight();
        let status = if claimed.iter().any(|number| *number == flight.flight_number) {
            PolicyStatus::Claimed
        } else {
            PolicyStatus::Insured
        };

        let record = PolicyRecord {
            policy_id: Uuid::new_v4(),
            flight,
            insurance_amount: parsed.insurance_amount,
            insurance_id: Some(insurance_id),
            status,
            created_at_epoch_ms: parsed.timestamp,
            updated_at_epoch_ms: parsed.timestamp,
        };

        store.append(&record).await?;
        summary.imported += 1;
    }

    Ok(summary)
}
