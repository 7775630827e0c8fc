//! Policy lifecycle and reconciliation.
//!
//! Per-record state machine: absent → `Insuring` → `Insured` →
//! `ClaimPending` → `Claimed`. Creation confirms before anything is
//! persisted; a claim that fails or is rejected rolls the record back to
//! `Insured`.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use ws_api_types::{Flight, PolicyStatus, PolicyView};
use ws_chain_client::{
    ClaimConfirmation, EventSubscription, GatewayError, InsuranceConfirmation,
    InsuranceCreatedEvent, InsuranceGateway, SubmitInsuranceRequest, parse_ether,
};
use ws_store::{PolicyRecord, PolicyStore};

/// What happens to a record once its claim confirms. The source application
/// shipped both behaviours; which one applies is configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimSettlement {
    /// Remove the record from the store.
    RetireRecord,
    /// Keep the record, marked `Claimed`.
    #[default]
    MarkClaimed,
}

impl ClaimSettlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimSettlement::RetireRecord => "retired",
            ClaimSettlement::MarkClaimed => "claimed",
        }
    }
}

impl FromStr for ClaimSettlement {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "retire" | "retire_record" | "remove" => Ok(ClaimSettlement::RetireRecord),
            "mark" | "mark_claimed" | "keep" => Ok(ClaimSettlement::MarkClaimed),
            other => Err(format!("unknown claim settlement: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown policy {0}")]
    UnknownPolicy(Uuid),
    #[error("policy {0} is not claimable")]
    NotClaimable(Uuid),
    #[error("flight {0} has already been claimed")]
    AlreadyClaimed(String),
    #[error("a transaction for flight {0} is already in progress")]
    SubmissionInProgress(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct ClaimOutcome {
    pub record: PolicyRecord,
    pub confirmation: ClaimConfirmation,
    pub settlement: ClaimSettlement,
}

/// Orchestrates the gateway and the store. Generic over both seams, like the
/// rest of the crate boundaries here.
pub struct PolicyService<G, S: ?Sized> {
    gateway: Arc<G>,
    store: Arc<S>,
    settlement: ClaimSettlement,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a flight number as having a transaction in progress; cleared on
/// drop so an error path can never wedge the flight.
struct InFlightSlot<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    flight_number: String,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.in_flight.lock() {
            guard.remove(&self.flight_number);
        }
    }
}

impl<G, S> PolicyService<G, S>
where
    G: InsuranceGateway + 'static,
    S: PolicyStore + ?Sized + 'static,
{
    pub fn new(gateway: Arc<G>, store: Arc<S>, settlement: ClaimSettlement) -> Self {
        Self {
            gateway,
            store,
            settlement,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn settlement(&self) -> ClaimSettlement {
        self.settlement
    }

    fn begin(&self, flight_number: &str) -> Result<InFlightSlot<'_>, PolicyError> {
        let mut guard = self
            .in_flight
            .lock()
            .map_err(|_| PolicyError::Store(anyhow::anyhow!("in-flight lock poisoned")))?;
        if !guard.insert(flight_number.to_owned()) {
            return Err(PolicyError::SubmissionInProgress(flight_number.to_owned()));
        }
        Ok(InFlightSlot {
            in_flight: &self.in_flight,
            flight_number: flight_number.to_owned(),
        })
    }

    /// Ordered policy list with derived claim eligibility.
    pub async fn list(&self) -> Result<Vec<PolicyView>, PolicyError> {
        let records = self.store.load().await?;
        Ok(derive_views(&records))
    }

    /// Insure one flight. On success exactly one record is appended; on any
    /// gateway error nothing is persisted.
    pub async fn insure(
        &self,
        flight: &Flight,
        amount: &str,
        beneficiary: &str,
    ) -> Result<(PolicyRecord, InsuranceConfirmation), PolicyError> {
        // Reject bad amounts before bothering the wallet.
        parse_ether(amount)?;

        let _slot = self.begin(&flight.flight_number)?;

        let request = SubmitInsuranceRequest::from_flight(flight, amount, beneficiary);
        let confirmation = self.gateway.submit_insurance(request).await?;

        let now = epoch_ms();
        let record = PolicyRecord {
            policy_id: Uuid::new_v4(),
            flight: flight.clone(),
            insurance_amount: amount.to_owned(),
            insurance_id: Some(confirmation.insurance_id.clone()),
            status: PolicyStatus::Insured,
            created_at_epoch_ms: now,
            updated_at_epoch_ms: now,
        };
        self.store.append(&record).await?;

        info!(
            policy_id = %record.policy_id,
            flight = %flight.flight_number,
            insurance_id = %confirmation.insurance_id,
            "policy recorded"
        );

        Ok((record, confirmation))
    }

    /// Initiate a claim. The second attempt for the same flight number is
    /// rejected locally, before any transaction is sent.
    pub async fn claim(&self, policy_id: Uuid) -> Result<ClaimOutcome, PolicyError> {
        let flight_number = self
            .store
            .get(policy_id)
            .await?
            .ok_or(PolicyError::UnknownPolicy(policy_id))?
            .flight
            .flight_number;

        // The slot must be held before the record is validated: a snapshot
        // read beside a concurrent claim goes stale the moment that claim
        // settles, and acting on it would send a second transaction.
        let _slot = self.begin(&flight_number)?;

        let mut record = self
            .store
            .get(policy_id)
            .await?
            .ok_or(PolicyError::UnknownPolicy(policy_id))?;

        match record.status {
            PolicyStatus::Insured => {}
            PolicyStatus::Claimed | PolicyStatus::ClaimPending => {
                return Err(PolicyError::AlreadyClaimed(
                    record.flight.flight_number.clone(),
                ));
            }
            PolicyStatus::Insuring => return Err(PolicyError::NotClaimable(policy_id)),
        }

        let insurance_id = record
            .insurance_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or(PolicyError::NotClaimable(policy_id))?;

        // A different record for the same flight may already be claimed.
        let already_claimed = self.store.load().await?.iter().any(|other| {
            other.policy_id != policy_id
                && other.flight.flight_number == flight_number
                && matches!(
                    other.status,
                    PolicyStatus::Claimed | PolicyStatus::ClaimPending
                )
        });
        if already_claimed {
            return Err(PolicyError::AlreadyClaimed(flight_number));
        }

        record.status = PolicyStatus::ClaimPending;
        record.updated_at_epoch_ms = epoch_ms();
        self.store.update(&record).await?;

        let confirmation = match self.gateway.submit_claim(&insurance_id).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                // Roll back so the user can retry.
                record.status = PolicyStatus::Insured;
                record.updated_at_epoch_ms = epoch_ms();
                if let Err(store_err) = self.store.update(&record).await {
                    warn!(
                        policy_id = %policy_id,
                        "failed to roll back claim-pending record: {store_err}"
                    );
                }
                return Err(err.into());
            }
        };

        match self.settlement {
            ClaimSettlement::MarkClaimed => {
                record.status = PolicyStatus::Claimed;
                record.updated_at_epoch_ms = epoch_ms();
                self.store.update(&record).await?;
            }
            ClaimSettlement::RetireRecord => {
                self.store.remove(policy_id).await?;
            }
        }

        info!(
            policy_id = %policy_id,
            flight = %flight_number,
            settlement = self.settlement.as_str(),
            "claim confirmed"
        );

        Ok(ClaimOutcome {
            record,
            confirmation,
            settlement: self.settlement,
        })
    }

    /// Backfill an insurance id from an on-chain creation event into the
    /// oldest record still waiting for one. Covers `Insuring` records and
    /// `Insured` records whose id is absent: a store written by an earlier
    /// deployment, or a crash between confirmation and id extraction, leaves
    /// that shape behind.
    pub async fn apply_insurance_created(
        &self,
        event: &InsuranceCreatedEvent,
    ) -> Result<bool, PolicyError> {
        let records = self.store.load().await?;
        let waiting = records.into_iter().find(|record| {
            matches!(
                record.status,
                PolicyStatus::Insuring | PolicyStatus::Insured
            ) && record
                .insurance_id
                .as_deref()
                .is_none_or(|id| id.trim().is_empty())
        });

        let Some(mut record) = waiting else {
            debug!(
                insurance_id = %event.insurance_id,
                "creation event matches no local record, ignoring"
            );
            return Ok(false);
        };

        record.insurance_id = Some(event.insurance_id.clone());
        record.status = PolicyStatus::Insured;
        record.updated_at_epoch_ms = epoch_ms();
        self.store.update(&record).await?;

        info!(
            policy_id = %record.policy_id,
            insurance_id = %event.insurance_id,
            "reconciled creation event"
        );
        Ok(true)
    }

    /// Consume a gateway subscription until it closes. The subscription's
    /// guard travels with it, so dropping the returned task's handle is not
    /// required for teardown — closing the channel or dropping the
    /// subscription stops the loop.
    pub async fn run_reconciler(self: Arc<Self>, mut subscription: EventSubscription) {
        while let Some(event) = subscription.events.recv().await {
            if let Err(err) = self.apply_insurance_created(&event).await {
                warn!("failed to reconcile creation event: {err}");
            }
        }
        debug!("event subscription closed, reconciler stopping");
    }
}

/// Views over a record list. A record is claimable when it is `Insured`,
/// carries an insurance id, and no other record for the same flight number is
/// already pending or settled.
pub fn derive_views(records: &[PolicyRecord]) -> Vec<PolicyView> {
    let claimed: HashSet<&str> = records
        .iter()
        .filter(|record| {
            matches!(
                record.status,
                PolicyStatus::Claimed | PolicyStatus::ClaimPending
            )
        })
        .map(|record| record.flight.flight_number.as_str())
        .collect();

    records
        .iter()
        .map(|record| {
            let has_id = record
                .insurance_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty());
            let claimable = record.status == PolicyStatus::Insured
                && has_id
                && !claimed.contains(record.flight.flight_number.as_str());
            view_of(record, claimable)
        })
        .collect()
}

fn view_of(record: &PolicyRecord, claimable: bool) -> PolicyView {
    PolicyView {
        policy_id: record.policy_id.to_string(),
        flight: record.flight.clone(),
        insurance_amount: record.insurance_amount.clone(),
        insurance_id: record.insurance_id.clone(),
        status: record.status,
        claimable,
        created_at_epoch_ms: record.created_at_epoch_ms,
    }
}

fn epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use ws_api_types::{Airline, Airport, FlightLeg};
    use ws_store::InMemoryPolicyStore;

    fn sample_flight(flight_number: &str) -> Flight {
        Flight {
            flight_number: flight_number.to_owned(),
            airline: Airline {
                code: "AI".to_owned(),
                name: "Air India".to_owned(),
            },
            departure: FlightLeg {
                airport: Airport {
                    code: "DEL".to_owned(),
                    name: "Indira Gandhi International".to_owned(),
                    city: "Delhi".to_owned(),
                    country: "India".to_owned(),
                },
                time: "2024-03-01T09:30:00".to_owned(),
            },
            arrival: FlightLeg {
                airport: Airport {
                    code: "BOM".to_owned(),
                    name: "Chhatrapati Shivaji Maharaj International".to_owned(),
                    city: "Mumbai".to_owned(),
                    country: "India".to_owned(),
                },
                time: "2024-03-01T11:45:00".to_owned(),
            },
            status: "On Time".to_owned(),
            delay: "0".to_owned(),
        }
    }

    #[derive(Default)]
    struct MockGateway {
        next_id: AtomicU64,
        submissions: AtomicUsize,
        claims: AtomicUsize,
        fail_next: Mutex<Option<GatewayError>>,
        submit_delay: Option<Duration>,
        claim_delay: Option<Duration>,
    }

    impl MockGateway {
        fn failing_with(err: GatewayError) -> Self {
            Self {
                fail_next: Mutex::new(Some(err)),
                ..Self::default()
            }
        }

        fn take_failure(&self) -> Option<GatewayError> {
            self.fail_next.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl InsuranceGateway for MockGateway {
        fn network(&self) -> &str {
            "mock"
        }

        async fn submit_insurance(
            &self,
            _req: SubmitInsuranceRequest,
        ) -> Result<InsuranceConfirmation, GatewayError> {
            if let Some(delay) = self.submit_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(InsuranceConfirmation {
                insurance_id: id.to_string(),
                tx_hash: format!("0x{id:064x}"),
                confirmed_at_block: id,
            })
        }

        async fn submit_claim(
            &self,
            _insurance_id: &str,
        ) -> Result<ClaimConfirmation, GatewayError> {
            if let Some(delay) = self.claim_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            let n = self.claims.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            Ok(ClaimConfirmation {
                tx_hash: format!("0x{n:064x}"),
                confirmed_at_block: n,
            })
        }

        async fn subscribe_insurance_created(
            &self,
        ) -> Result<EventSubscription, GatewayError> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(EventSubscription {
                events: rx,
                guard: ws_chain_client::SubscriptionGuard::detached(),
            })
        }
    }

    fn service(
        gateway: MockGateway,
        settlement: ClaimSettlement,
    ) -> PolicyService<MockGateway, InMemoryPolicyStore> {
        PolicyService::new(
            Arc::new(gateway),
            Arc::new(InMemoryPolicyStore::default()),
            settlement,
        )
    }

    const BENEFICIARY: &str = "0xdc57a3c6c72ad565a2a97f467c42b7a5ebef042d";

    #[tokio::test]
    async fn insure_appends_exactly_one_record() {
        let svc = service(MockGateway::default(), ClaimSettlement::default());

        let (record, confirmation) = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap();

        assert_eq!(record.insurance_id.as_deref(), Some("1"));
        assert_eq!(record.status, PolicyStatus::Insured);
        assert_eq!(confirmation.insurance_id, "1");

        let views = svc.list().await.unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].claimable);
    }

    #[tokio::test]
    async fn rejected_signature_persists_nothing() {
        let svc = service(
            MockGateway::failing_with(GatewayError::TransactionRejected),
            ClaimSettlement::default(),
        );

        let err = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PolicyError::Gateway(GatewayError::TransactionRejected)
        ));
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_amount_rejected_before_gateway() {
        let svc = service(MockGateway::default(), ClaimSettlement::default());

        let err = svc
            .insure(&sample_flight("AI101"), "not-a-number", BENEFICIARY)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PolicyError::Gateway(GatewayError::InvalidAmount(_))
        ));
        assert_eq!(svc.gateway.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_submission_while_pending_is_rejected_locally() {
        let gateway = MockGateway {
            submit_delay: Some(Duration::from_millis(100)),
            ..MockGateway::default()
        };
        let svc = Arc::new(service(gateway, ClaimSettlement::default()));

        let first = {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.insure(&sample_flight("AI101"), "0.05", BENEFICIARY).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::SubmissionInProgress(_)));

        first.await.unwrap().unwrap();
        assert_eq!(svc.gateway.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(svc.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_claims_submit_one_transaction() {
        let gateway = MockGateway {
            claim_delay: Some(Duration::from_millis(100)),
            ..MockGateway::default()
        };
        let svc = Arc::new(service(gateway, ClaimSettlement::MarkClaimed));
        let (record, _) = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap();
        let policy_id = record.policy_id;

        let first = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.claim(policy_id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // While the first claim holds the flight's slot the second is
        // rejected before it can even read the record.
        let err = svc.claim(policy_id).await.unwrap_err();
        assert!(matches!(err, PolicyError::SubmissionInProgress(_)));

        first.await.unwrap().unwrap();

        // And once the slot is free the settled record stops a retry.
        let err = svc.claim(policy_id).await.unwrap_err();
        assert!(matches!(err, PolicyError::AlreadyClaimed(_)));
        assert_eq!(svc.gateway.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn claim_marks_record_in_place_by_default() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);
        let (record, _) = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap();

        let outcome = svc.claim(record.policy_id).await.unwrap();
        assert_eq!(outcome.settlement, ClaimSettlement::MarkClaimed);

        let views = svc.list().await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, PolicyStatus::Claimed);
        assert!(!views[0].claimable);
    }

    #[tokio::test]
    async fn claim_can_retire_the_record_instead() {
        let svc = service(MockGateway::default(), ClaimSettlement::RetireRecord);
        let (record, _) = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap();

        svc.claim(record.policy_id).await.unwrap();
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_claim_for_same_flight_never_reaches_the_gateway() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);
        let (record, _) = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap();

        svc.claim(record.policy_id).await.unwrap();
        let err = svc.claim(record.policy_id).await.unwrap_err();

        assert!(matches!(err, PolicyError::AlreadyClaimed(flight) if flight == "AI101"));
        assert_eq!(svc.gateway.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_claim_rolls_back_to_insured() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);
        let (record, _) = svc
            .insure(&sample_flight("AI101"), "0.05", BENEFICIARY)
            .await
            .unwrap();

        *svc.gateway.fail_next.lock().unwrap() = Some(GatewayError::TransactionFailed(
            "reverted".to_owned(),
        ));

        let err = svc.claim(record.policy_id).await.unwrap_err();
        assert!(matches!(
            err,
            PolicyError::Gateway(GatewayError::TransactionFailed(_))
        ));

        let views = svc.list().await.unwrap();
        assert_eq!(views[0].status, PolicyStatus::Insured);
        assert!(views[0].claimable);

        // Retry succeeds.
        svc.claim(record.policy_id).await.unwrap();
    }

    #[tokio::test]
    async fn record_without_insurance_id_is_not_claimable() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);

        let record = PolicyRecord {
            policy_id: Uuid::new_v4(),
            flight: sample_flight("AI101"),
            insurance_amount: "0.05".to_owned(),
            insurance_id: None,
            status: PolicyStatus::Insuring,
            created_at_epoch_ms: 1,
            updated_at_epoch_ms: 1,
        };
        svc.store.append(&record).await.unwrap();

        let err = svc.claim(record.policy_id).await.unwrap_err();
        assert!(matches!(err, PolicyError::NotClaimable(_)));

        let views = svc.list().await.unwrap();
        assert!(!views[0].claimable);
    }

    #[tokio::test]
    async fn reconciler_backfills_insurance_id() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);

        let record = PolicyRecord {
            policy_id: Uuid::new_v4(),
            flight: sample_flight("AI101"),
            insurance_amount: "0.05".to_owned(),
            insurance_id: None,
            status: PolicyStatus::Insuring,
            created_at_epoch_ms: 1,
            updated_at_epoch_ms: 1,
        };
        svc.store.append(&record).await.unwrap();

        let applied = svc
            .apply_insurance_created(&InsuranceCreatedEvent {
                owner: BENEFICIARY.to_owned(),
                insurance_id: "42".to_owned(),
            })
            .await
            .unwrap();
        assert!(applied);

        let views = svc.list().await.unwrap();
        assert_eq!(views[0].insurance_id.as_deref(), Some("42"));
        assert_eq!(views[0].status, PolicyStatus::Insured);
        assert!(views[0].claimable);
    }

    #[tokio::test]
    async fn reconciler_backfills_insured_record_missing_id() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);

        let record = PolicyRecord {
            policy_id: Uuid::new_v4(),
            flight: sample_flight("AI101"),
            insurance_amount: "0.05".to_owned(),
            insurance_id: None,
            status: PolicyStatus::Insured,
            created_at_epoch_ms: 1,
            updated_at_epoch_ms: 1,
        };
        svc.store.append(&record).await.unwrap();

        let applied = svc
            .apply_insurance_created(&InsuranceCreatedEvent {
                owner: BENEFICIARY.to_owned(),
                insurance_id: "42".to_owned(),
            })
            .await
            .unwrap();
        assert!(applied);

        let views = svc.list().await.unwrap();
        assert_eq!(views[0].insurance_id.as_deref(), Some("42"));
        assert!(views[0].claimable);
    }

    #[tokio::test]
    async fn unmatched_event_is_ignored() {
        let svc = service(MockGateway::default(), ClaimSettlement::MarkClaimed);

        let applied = svc
            .apply_insurance_created(&InsuranceCreatedEvent {
                owner: BENEFICIARY.to_owned(),
                insurance_id: "42".to_owned(),
            })
            .await
            .unwrap();

        assert!(!applied);
        assert!(svc.list().await.unwrap().is_empty());
    }
}
