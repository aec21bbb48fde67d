//! Admission control and ranking resolution for program intake cycles.
//!
//! Seats are allocated against a municipality → subregion → program hierarchy, candidates
//! are ranked by a weighted rubric, and score ties are settled by a reproducible lottery.
//! [`AdmissionService`] composes the pieces; [`admission_router`] exposes them over HTTP.

pub mod audit;
pub mod domain;
pub mod lottery;
pub mod quota;
pub mod router;
pub mod scoring;
pub mod service;

#[cfg(test)]
mod tests;

pub use audit::{AuditError, AuditEvent, AuditPublisher};
pub use domain::{
    AdmissionDecision, Candidate, CandidateId, Criterion, CriterionId, CycleId, DecisionOutcome,
    LotteryId, MunicipalityId, MunicipalityQuota, QuotaMode, QuotaPolicy, ScoreKey, SeatState,
    SubregionId,
};
pub use lottery::{
    LotteryError, LotteryHistoryEntry, LotteryRecord, SeedSource, Supersession, TieBreakLottery,
};
pub use quota::{
    ActivePolicy, AdmissionDecider, AllocationError, CapacityLedger, DecisionReceipt,
    MunicipalitySnapshot, QuotaSnapshot, SubregionSnapshot,
};
pub use router::admission_router;
pub use scoring::{
    CriterionSet, Placement, Ranking, RankingEntry, RankingResolver, ScoredCandidate,
    ScoringEngine, ScoringError, TieCohort,
};
pub use service::{AdmissionService, AdmissionServiceError, QuotaStateView, ScoreUpdate};
