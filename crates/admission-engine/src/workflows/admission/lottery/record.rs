use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{CandidateId, CycleId, LotteryId, ScoreKey};

/// Immutable audit record of one tie-break draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryRecord {
    pub lottery_id: LotteryId,
    pub cycle_id: CycleId,
    pub cohort_key: ScoreKey,
    /// Participants in the canonical order fed to the shuffle.
    pub cohort_candidate_ids: Vec<CandidateId>,
    pub seed: String,
    pub algorithm: String,
    pub executed_at: DateTime<Utc>,
    pub result_order: Vec<CandidateId>,
    pub seed_digest: String,
    pub record_digest: String,
}

impl LotteryRecord {
    pub fn involves(&self, candidate: &CandidateId) -> bool {
        self.cohort_candidate_ids.contains(candidate)
    }
}

/// Appended when a record stops governing its cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supersession {
    pub lottery_id: LotteryId,
    pub superseded_at: DateTime<Utc>,
    pub reason: String,
}

/// A record joined with its supersession, if one has been appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotteryHistoryEntry {
    pub record: LotteryRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<Supersession>,
}

impl LotteryHistoryEntry {
    pub fn is_active(&self) -> bool {
        self.superseded.is_none()
    }
}
