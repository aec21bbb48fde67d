use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::audit::{AuditEvent, AuditPublisher};
use super::domain::{
    AdmissionDecision, Candidate, CandidateId, Criterion, CriterionId, CycleId, MunicipalityId,
    MunicipalityQuota, QuotaMode, QuotaPolicy, ScoreKey,
};
use super::lottery::{
    LotteryError, LotteryHistoryEntry, LotteryRecord, SeedSource, Supersession, TieBreakLottery,
};
use super::quota::{
    ActivePolicy, AdmissionDecider, AllocationError, CapacityLedger, DecisionReceipt,
    MunicipalitySnapshot, QuotaSnapshot, SubregionSnapshot,
};
use super::scoring::{Ranking, RankingResolver, ScoringEngine, ScoringError};

/// Service composing the ledger, decider, scoring engine, lottery, and audit hook.
pub struct AdmissionService<A> {
    policy: Arc<ActivePolicy>,
    ledger: Arc<CapacityLedger>,
    decider: AdmissionDecider,
    scoring: ScoringEngine,
    lottery: TieBreakLottery,
    audit: Arc<A>,
    // Score writes share this gate; draws take it exclusively so a cohort cannot change
    // membership between the ranking snapshot and the recorded draw.
    score_gate: RwLock<()>,
}

/// Read-only projection of every quota level for dashboards and exports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStateView {
    pub policy: QuotaPolicy,
    pub global: QuotaSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_capacity_available: Option<u64>,
    pub subregions: Vec<SubregionSnapshot>,
    pub municipalities: Vec<MunicipalitySnapshot>,
}

/// Result of recording one criterion score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreUpdate {
    pub candidate_id: CandidateId,
    pub criterion_id: CriterionId,
    pub points: f64,
    pub total: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<Supersession>,
}

impl<A> AdmissionService<A>
where
    A: AuditPublisher + 'static,
{
    pub fn new(policy: QuotaPolicy, audit: Arc<A>) -> Self {
        Self::with_configuration(policy, Vec::new(), Vec::new(), audit)
    }

    pub fn with_configuration(
        policy: QuotaPolicy,
        quotas: Vec<MunicipalityQuota>,
        criteria: Vec<Criterion>,
        audit: Arc<A>,
    ) -> Self {
        let policy = Arc::new(ActivePolicy::new(policy));
        let ledger = Arc::new(CapacityLedger::new(quotas));
        let decider = AdmissionDecider::new(ledger.clone(), policy.clone());

        Self {
            policy,
            ledger,
            decider,
            scoring: ScoringEngine::new(criteria),
            lottery: TieBreakLottery::new(),
            audit,
            score_gate: RwLock::new(()),
        }
    }

    pub fn policy(&self) -> Arc<QuotaPolicy> {
        self.policy.current()
    }

    pub fn quota_state(&self) -> QuotaStateView {
        let policy = self.policy.current();
        let global = self.ledger.global_snapshot();
        let global_capacity_available = policy
            .global_capacity_max
            .map(|cap| (cap as u64).saturating_sub(self.ledger.confirmed_total()));

        QuotaStateView {
            policy: (*policy).clone(),
            global,
            global_capacity_available,
            subregions: self.ledger.subregion_snapshots(),
            municipalities: self.ledger.municipality_snapshots(),
        }
    }

    pub fn replace_policy(&self, policy: QuotaPolicy) -> Arc<QuotaPolicy> {
        self.policy.replace(policy);
        self.policy_changed()
    }

    pub fn set_mode(&self, mode: QuotaMode) -> Arc<QuotaPolicy> {
        self.policy.set_mode(mode);
        self.policy_changed()
    }

    pub fn set_global_cap(&self, global_capacity_max: Option<u32>) -> Arc<QuotaPolicy> {
        self.policy.set_global_cap(global_capacity_max);
        self.policy_changed()
    }

    pub fn set_cycle(&self, cycle_id: CycleId) -> Arc<QuotaPolicy> {
        self.policy.set_cycle(cycle_id);
        self.policy_changed()
    }

    pub fn set_capacity(
        &self,
        municipality_id: &MunicipalityId,
        capacity_max: u32,
    ) -> Result<QuotaSnapshot, AdmissionServiceError> {
        let snapshot = self.ledger.set_capacity(municipality_id, capacity_max)?;
        info!(municipality = %municipality_id, capacity_max, "municipality cap updated");
        Ok(snapshot)
    }

    /// Install a new cycle's quota rows and forget decisions made against the old ones.
    pub fn import_quotas(&self, quotas: Vec<MunicipalityQuota>) {
        let count = quotas.len();
        self.decider.start_cycle(quotas);
        info!(municipalities = count, "quota configuration imported");
    }

    /// Replace the rubric; refused while any stored score exceeds a new maximum.
    pub fn import_criteria(
        &self,
        criteria: Vec<Criterion>,
    ) -> Result<Vec<Supersession>, AdmissionServiceError> {
        let _gate = self.score_gate.read().expect("score gate poisoned");
        self.scoring.replace_criteria(criteria)?;
        Ok(self.invalidate_stale_draws())
    }

    pub fn register_candidate(
        &self,
        candidate_id: CandidateId,
        municipality_id: MunicipalityId,
    ) -> Result<Candidate, AdmissionServiceError> {
        if !self.ledger.contains(&municipality_id) {
            return Err(AllocationError::UnknownMunicipality(municipality_id).into());
        }
        self.scoring
            .register(Candidate::new(candidate_id.clone(), municipality_id))?;
        self.scoring
            .candidate(&candidate_id)
            .ok_or_else(|| ScoringError::UnknownCandidate(candidate_id).into())
    }

    pub fn decide(
        &self,
        candidate_id: &CandidateId,
        municipality_id: &MunicipalityId,
    ) -> Result<DecisionReceipt, AdmissionServiceError> {
        let receipt = self.decider.decide(candidate_id, municipality_id, Utc::now())?;
        if !receipt.replayed {
            self.publish(AuditEvent::Decision(receipt.decision.clone()));
        }
        Ok(receipt)
    }

    pub fn withdraw(
        &self,
        candidate_id: &CandidateId,
    ) -> Result<AdmissionDecision, AdmissionServiceError> {
        let released = self.decider.withdraw(candidate_id)?;
        self.publish(AuditEvent::Withdrawal(released.clone()));
        Ok(released)
    }

    pub fn promote(
        &self,
        candidate_id: &CandidateId,
    ) -> Result<DecisionReceipt, AdmissionServiceError> {
        let receipt = self.decider.promote(candidate_id, Utc::now())?;
        if !receipt.replayed {
            self.publish(AuditEvent::Decision(receipt.decision.clone()));
        }
        Ok(receipt)
    }

    pub fn decision(&self, candidate_id: &CandidateId) -> Option<AdmissionDecision> {
        self.decider.decision(candidate_id)
    }

    pub fn decisions(&self) -> Vec<AdmissionDecision> {
        self.decider.decisions()
    }

    /// Record a criterion score and supersede any draw whose cohort it reshuffled.
    pub fn set_criterion_score(
        &self,
        candidate_id: &CandidateId,
        criterion_id: &CriterionId,
        points: f64,
    ) -> Result<ScoreUpdate, AdmissionServiceError> {
        let _gate = self.score_gate.read().expect("score gate poisoned");
        let total = self
            .scoring
            .set_criterion_score(candidate_id, criterion_id, points)?;
        let superseded = self.invalidate_stale_draws();

        Ok(ScoreUpdate {
            candidate_id: candidate_id.clone(),
            criterion_id: criterion_id.clone(),
            points,
            total,
            superseded,
        })
    }

    pub fn total_score(&self, candidate_id: &CandidateId) -> Result<f64, AdmissionServiceError> {
        Ok(self.scoring.total_score(candidate_id)?)
    }

    pub fn validate_weights(&self) -> Result<(), AdmissionServiceError> {
        Ok(self.scoring.validate_weights()?)
    }

    /// Full re-rank over a consistent score snapshot, applying active lottery orders.
    pub fn ranking(&self) -> Result<Ranking, AdmissionServiceError> {
        let (criteria, scored) = self.scoring.snapshot();
        let resolutions = self.lottery.active_resolutions();
        Ok(RankingResolver::rank(&criteria, &scored, &resolutions)?)
    }

    pub fn draw(
        &self,
        key: ScoreKey,
        seed: SeedSource,
    ) -> Result<LotteryRecord, AdmissionServiceError> {
        let _gate = self.score_gate.write().expect("score gate poisoned");
        let ranking = self.ranking()?;

        let Some(cohort) = ranking.unresolved_cohort(key) else {
            if let Some(active) = self
                .lottery
                .history(key)
                .into_iter()
                .find(LotteryHistoryEntry::is_active)
            {
                return Err(LotteryError::AlreadyResolved {
                    key,
                    lottery_id: active.record.lottery_id,
                }
                .into());
            }
            return Err(LotteryError::UnknownCohort(key).into());
        };

        let cycle_id = self.policy.current().cycle_id.clone();
        let record = self.lottery.draw(cohort, &seed, &cycle_id, Utc::now())?;
        self.publish(AuditEvent::LotteryDrawn(record.clone()));
        Ok(record)
    }

    pub fn supersede(
        &self,
        key: ScoreKey,
        reason: &str,
    ) -> Result<Supersession, AdmissionServiceError> {
        let supersession = self.lottery.supersede(key, reason, Utc::now())?;
        self.publish(AuditEvent::LotterySuperseded(supersession.clone()));
        Ok(supersession)
    }

    pub fn lottery_history(&self, key: ScoreKey) -> Vec<LotteryHistoryEntry> {
        self.lottery.history(key)
    }

    pub fn lottery_records(&self) -> Vec<LotteryHistoryEntry> {
        self.lottery.records()
    }

    /// Decide every ranked candidate, best first, into their registered municipality.
    pub fn allocate_by_ranking(&self) -> Result<Vec<DecisionReceipt>, AdmissionServiceError> {
        let ranking = self.ranking()?;
        if !ranking.is_fully_resolved() {
            let keys = ranking.tie_cohorts.iter().map(|cohort| cohort.key).collect();
            return Err(AdmissionServiceError::UnresolvedTies(keys));
        }

        // Every placement is checked before the first seat is reserved.
        let mut placements = Vec::new();
        for candidate_id in ranking.ordered_candidates() {
            let candidate = self
                .scoring
                .candidate(&candidate_id)
                .ok_or_else(|| ScoringError::UnknownCandidate(candidate_id.clone()))?;
            if !self.ledger.contains(&candidate.municipality_id) {
                return Err(AllocationError::UnknownMunicipality(candidate.municipality_id).into());
            }
            placements.push((candidate_id, candidate.municipality_id));
        }

        let mut receipts = Vec::with_capacity(placements.len());
        for (candidate_id, municipality_id) in placements {
            receipts.push(self.decide(&candidate_id, &municipality_id)?);
        }

        info!(candidates = receipts.len(), "allocation by ranking completed");
        Ok(receipts)
    }

    fn invalidate_stale_draws(&self) -> Vec<Supersession> {
        let ranking = match self.ranking() {
            Ok(ranking) => ranking,
            Err(_) => return Vec::new(),
        };

        let superseded = self.lottery.invalidate_stale(&ranking, Utc::now());
        for supersession in &superseded {
            self.publish(AuditEvent::LotterySuperseded(supersession.clone()));
        }
        superseded
    }

    fn policy_changed(&self) -> Arc<QuotaPolicy> {
        let current = self.policy.current();
        self.publish(AuditEvent::PolicyReplaced((*current).clone()));
        current
    }

    fn publish(&self, event: AuditEvent) {
        let kind = event.kind();
        if let Err(error) = self.audit.publish(event) {
            warn!(%error, event = kind, "audit delivery failed; engine state kept");
        }
    }
}

/// Error raised by the admission service.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionServiceError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Lottery(#[from] LotteryError),
    #[error("ranking has unresolved tie cohorts at {}", join_keys(.0))]
    UnresolvedTies(Vec<ScoreKey>),
}

fn join_keys(keys: &[ScoreKey]) -> String {
    keys.iter()
        .map(ScoreKey::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
