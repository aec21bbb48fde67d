use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::super::domain::{
    AdmissionDecision, CandidateId, DecisionOutcome, MunicipalityId, MunicipalityQuota, SeatState,
};
use super::{ActivePolicy, AllocationError, CapacityLedger};

type DecisionSlot = Arc<Mutex<Option<AdmissionDecision>>>;

/// Decision plus whether it was served from the idempotency cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionReceipt {
    #[serde(flatten)]
    pub decision: AdmissionDecision,
    pub replayed: bool,
}

/// Confirms, waitlists, or rejects candidates against the ledger under the active policy.
///
/// Each candidate owns a slot mutex so retried requests for the same candidate are
/// serialized and never reserve twice; different candidates decide in parallel.
/// Slots exist only for candidates holding a seat or with a decision in flight.
pub struct AdmissionDecider {
    ledger: Arc<CapacityLedger>,
    policy: Arc<ActivePolicy>,
    // Read by every operation; written when a new cycle swaps the ledger and drops the cache.
    cycle: RwLock<()>,
    slots: Mutex<HashMap<CandidateId, DecisionSlot>>,
}

impl AdmissionDecider {
    pub fn new(ledger: Arc<CapacityLedger>, policy: Arc<ActivePolicy>) -> Self {
        Self {
            ledger,
            policy,
            cycle: RwLock::new(()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn decide(
        &self,
        candidate_id: &CandidateId,
        municipality_id: &MunicipalityId,
        at: DateTime<Utc>,
    ) -> Result<DecisionReceipt, AllocationError> {
        let _cycle = self.cycle.read().expect("cycle lock poisoned");
        let slot = self.slot(candidate_id);
        let mut cached = slot.lock().expect("decision slot poisoned");

        if let Some(decision) = cached.as_ref() {
            debug!(candidate = %candidate_id, "replaying cached admission decision");
            return Ok(DecisionReceipt {
                decision: decision.clone(),
                replayed: true,
            });
        }

        let policy = self.policy.hold();
        let reserved = self.ledger.reserve(municipality_id, &policy);
        drop(policy);

        let (outcome, reason) = match reserved {
            Ok(seat) => (DecisionOutcome::from(seat), None),
            Err(error @ AllocationError::CapacityExceeded { .. }) => {
                (DecisionOutcome::Rejected, Some(error.to_string()))
            }
            Err(other) => {
                self.discard_if_idle(candidate_id, &slot);
                return Err(other);
            }
        };

        let decision = AdmissionDecision {
            candidate_id: candidate_id.clone(),
            municipality_id: municipality_id.clone(),
            outcome,
            reason,
            decided_at: at,
        };

        if decision.seat().is_some() {
            *cached = Some(decision.clone());
        } else {
            self.discard_if_idle(candidate_id, &slot);
        }

        info!(
            candidate = %candidate_id,
            municipality = %municipality_id,
            outcome = ?decision.outcome,
            "admission decided"
        );

        Ok(DecisionReceipt {
            decision,
            replayed: false,
        })
    }

    /// Release the seat held by a candidate and forget the cached decision.
    pub fn withdraw(&self, candidate_id: &CandidateId) -> Result<AdmissionDecision, AllocationError> {
        let _cycle = self.cycle.read().expect("cycle lock poisoned");
        let slot = self
            .existing_slot(candidate_id)
            .ok_or_else(|| AllocationError::NotAdmitted(candidate_id.clone()))?;
        let mut cached = slot.lock().expect("decision slot poisoned");

        let decision = cached
            .clone()
            .ok_or_else(|| AllocationError::NotAdmitted(candidate_id.clone()))?;
        let seat = decision
            .seat()
            .ok_or_else(|| AllocationError::NotAdmitted(candidate_id.clone()))?;

        self.ledger.release(&decision.municipality_id, seat)?;
        *cached = None;
        self.discard_if_idle(candidate_id, &slot);

        info!(
            candidate = %candidate_id,
            municipality = %decision.municipality_id,
            seat = seat.label(),
            "admission withdrawn"
        );
        Ok(decision)
    }

    /// Try to move a waitlisted candidate onto a confirmed seat.
    pub fn promote(
        &self,
        candidate_id: &CandidateId,
        at: DateTime<Utc>,
    ) -> Result<DecisionReceipt, AllocationError> {
        let _cycle = self.cycle.read().expect("cycle lock poisoned");
        let slot = self
            .existing_slot(candidate_id)
            .ok_or_else(|| AllocationError::NotAdmitted(candidate_id.clone()))?;
        let mut cached = slot.lock().expect("decision slot poisoned");

        let decision = cached
            .clone()
            .ok_or_else(|| AllocationError::NotAdmitted(candidate_id.clone()))?;
        if decision.seat() != Some(SeatState::Waitlisted) {
            return Ok(DecisionReceipt {
                decision,
                replayed: true,
            });
        }

        let policy = self.policy.hold();
        let promoted = self.ledger.promote(&decision.municipality_id, &policy)?;
        drop(policy);

        if !promoted {
            return Ok(DecisionReceipt {
                decision,
                replayed: true,
            });
        }

        let decision = AdmissionDecision {
            outcome: DecisionOutcome::Confirmed,
            reason: None,
            decided_at: at,
            ..decision
        };
        *cached = Some(decision.clone());

        info!(
            candidate = %candidate_id,
            municipality = %decision.municipality_id,
            "waitlisted candidate promoted"
        );
        Ok(DecisionReceipt {
            decision,
            replayed: false,
        })
    }

    pub fn decision(&self, candidate_id: &CandidateId) -> Option<AdmissionDecision> {
        let slot = self.existing_slot(candidate_id)?;
        let cached = slot.lock().expect("decision slot poisoned");
        cached.clone()
    }

    pub fn decisions(&self) -> Vec<AdmissionDecision> {
        let slots: Vec<DecisionSlot> = self
            .slots
            .lock()
            .expect("decision map poisoned")
            .values()
            .cloned()
            .collect();
        let mut decisions: Vec<AdmissionDecision> = slots
            .iter()
            .filter_map(|slot| slot.lock().expect("decision slot poisoned").clone())
            .collect();
        decisions.sort_by(|left, right| left.candidate_id.cmp(&right.candidate_id));
        decisions
    }

    /// Install a new cycle's quota rows and drop every cached decision in one step.
    ///
    /// Waits for in-flight decisions, so none of them can reserve on the new ledger and then
    /// lose its cached decision.
    pub fn start_cycle(&self, quotas: Vec<MunicipalityQuota>) {
        let _cycle = self.cycle.write().expect("cycle lock poisoned");
        self.ledger.replace(quotas);
        self.slots.lock().expect("decision map poisoned").clear();
    }

    /// Number of candidates currently tracked by the idempotency cache.
    pub fn tracked_candidates(&self) -> usize {
        self.slots.lock().expect("decision map poisoned").len()
    }

    fn slot(&self, candidate_id: &CandidateId) -> DecisionSlot {
        self.slots
            .lock()
            .expect("decision map poisoned")
            .entry(candidate_id.clone())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, candidate_id: &CandidateId) -> Option<DecisionSlot> {
        self.slots
            .lock()
            .expect("decision map poisoned")
            .get(candidate_id)
            .cloned()
    }

    /// Remove an empty slot unless another request for the same candidate is waiting on it.
    /// Called with the slot's own mutex held.
    fn discard_if_idle(&self, candidate_id: &CandidateId, slot: &DecisionSlot) {
        let mut slots = self.slots.lock().expect("decision map poisoned");
        let idle = slots
            .get(candidate_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(candidate_id);
        }
    }
}
