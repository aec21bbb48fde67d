//! Seeded, reproducible tie-break draws with an append-only audit trail.
//!
//! A cohort moves `Unresolved -> Resolved` through [`TieBreakLottery::draw`] and back to
//! `Unresolved` only through [`TieBreakLottery::supersede`]. The same cohort and seed always
//! produce the same order, so any draw can be replayed from its record.

mod draw;
mod record;

pub use draw::ALGORITHM;
pub use record::{LotteryHistoryEntry, LotteryRecord, Supersession};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{CandidateId, CycleId, LotteryId, ScoreKey};
use super::scoring::{Ranking, TieCohort, TieResolution};

/// Errors raised by the lottery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LotteryError {
    #[error("cohort {key} is already resolved by lottery '{lottery_id}'; supersede it first")]
    AlreadyResolved { key: ScoreKey, lottery_id: LotteryId },
    #[error("cohort {0} needs at least two participants")]
    EmptyCohort(ScoreKey),
    #[error("no unresolved tie cohort at score {0}")]
    UnknownCohort(ScoreKey),
    #[error("no active lottery record for cohort {0}")]
    NotFound(ScoreKey),
    #[error("invalid cohort key '{0}'")]
    InvalidCohortKey(String),
}

/// External entropy for a draw: an administrator-supplied value and the announced time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSource {
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

impl SeedSource {
    pub fn effective_seed(&self) -> String {
        format!(
            "{}|{}",
            self.value,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[derive(Debug, Default)]
pub struct TieBreakLottery {
    sequence: AtomicU64,
    cohort_locks: Mutex<HashMap<ScoreKey, Arc<Mutex<()>>>>,
    log: RwLock<LotteryLog>,
}

/// Draws and supersessions, each appended to its own list and never edited.
#[derive(Debug, Default)]
struct LotteryLog {
    records: Vec<LotteryRecord>,
    supersessions: Vec<Supersession>,
}

impl LotteryLog {
    fn supersession_of(&self, lottery_id: &LotteryId) -> Option<&Supersession> {
        self.supersessions
            .iter()
            .find(|supersession| &supersession.lottery_id == lottery_id)
    }

    fn active(&self) -> impl Iterator<Item = &LotteryRecord> {
        self.records
            .iter()
            .filter(|record| self.supersession_of(&record.lottery_id).is_none())
    }

    fn entry(&self, record: &LotteryRecord) -> LotteryHistoryEntry {
        LotteryHistoryEntry {
            record: record.clone(),
            superseded: self.supersession_of(&record.lottery_id).cloned(),
        }
    }

    fn overlapping_active(
        &self,
        key: ScoreKey,
        members: &BTreeSet<CandidateId>,
    ) -> Option<&LotteryRecord> {
        self.active().find(|record| {
            record.cohort_key == key || members.iter().any(|candidate| record.involves(candidate))
        })
    }
}

impl TieBreakLottery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a permutation for `cohort` while holding that cohort's lock.
    pub fn draw(
        &self,
        cohort: &TieCohort,
        seed: &SeedSource,
        cycle_id: &CycleId,
        executed_at: DateTime<Utc>,
    ) -> Result<LotteryRecord, LotteryError> {
        if cohort.candidate_ids.len() < 2 {
            return Err(LotteryError::EmptyCohort(cohort.key));
        }

        let lock = self.cohort_lock(cohort.key);
        let _held = lock.lock().expect("cohort lock poisoned");

        let participants: Vec<CandidateId> = cohort.candidate_ids.iter().cloned().collect();
        let effective_seed = seed.effective_seed();
        let digest = draw::seed_digest(&effective_seed, &participants);
        let result_order = draw::permute(&participants, digest);

        let mut log = self.log.write().expect("lottery log poisoned");
        if let Some(active) = log.overlapping_active(cohort.key, &cohort.candidate_ids) {
            return Err(LotteryError::AlreadyResolved {
                key: cohort.key,
                lottery_id: active.lottery_id.clone(),
            });
        }

        let mut record = LotteryRecord {
            lottery_id: self.next_lottery_id(),
            cycle_id: cycle_id.clone(),
            cohort_key: cohort.key,
            cohort_candidate_ids: participants,
            seed: effective_seed,
            algorithm: ALGORITHM.to_string(),
            executed_at,
            result_order,
            seed_digest: draw::to_hex(&digest),
            record_digest: String::new(),
        };
        record.record_digest = draw::record_digest(&record);
        log.records.push(record.clone());

        info!(
            lottery = %record.lottery_id,
            cohort = %record.cohort_key,
            participants = record.cohort_candidate_ids.len(),
            digest = %record.record_digest,
            "tie-break lottery drawn"
        );
        Ok(record)
    }

    /// Append a supersession for the active record at `key` so the cohort can be drawn again.
    pub fn supersede(
        &self,
        key: ScoreKey,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Supersession, LotteryError> {
        let lock = self.cohort_lock(key);
        let _held = lock.lock().expect("cohort lock poisoned");

        let mut log = self.log.write().expect("lottery log poisoned");
        let lottery_id = log
            .active()
            .find(|record| record.cohort_key == key)
            .map(|record| record.lottery_id.clone())
            .ok_or(LotteryError::NotFound(key))?;

        let supersession = Supersession {
            lottery_id,
            superseded_at: at,
            reason: reason.to_string(),
        };
        log.supersessions.push(supersession.clone());

        warn!(
            lottery = %supersession.lottery_id,
            cohort = %key,
            reason,
            "lottery record superseded"
        );
        Ok(supersession)
    }

    /// Supersede every active record whose cohort no longer has the same members.
    pub fn invalidate_stale(&self, ranking: &Ranking, at: DateTime<Utc>) -> Vec<Supersession> {
        let stale: Vec<ScoreKey> = self
            .log
            .read()
            .expect("lottery log poisoned")
            .active()
            .filter(|record| {
                let drawn: BTreeSet<CandidateId> =
                    record.cohort_candidate_ids.iter().cloned().collect();
                ranking.members_at(record.cohort_key) != drawn
            })
            .map(|record| record.cohort_key)
            .collect();

        stale
            .into_iter()
            .filter_map(|key| {
                self.supersede(key, "cohort membership changed after a score update", at)
                    .ok()
            })
            .collect()
    }

    /// Fixed orders from every active record, keyed by score, for the ranking resolver.
    pub fn active_resolutions(&self) -> HashMap<ScoreKey, TieResolution> {
        self.log
            .read()
            .expect("lottery log poisoned")
            .active()
            .map(|record| {
                (
                    record.cohort_key,
                    TieResolution {
                        lottery_id: record.lottery_id.clone(),
                        order: record.result_order.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn history(&self, key: ScoreKey) -> Vec<LotteryHistoryEntry> {
        let log = self.log.read().expect("lottery log poisoned");
        log.records
            .iter()
            .filter(|record| record.cohort_key == key)
            .map(|record| log.entry(record))
            .collect()
    }

    pub fn records(&self) -> Vec<LotteryHistoryEntry> {
        let log = self.log.read().expect("lottery log poisoned");
        log.records.iter().map(|record| log.entry(record)).collect()
    }

    /// Supersessions in the order they were appended.
    pub fn supersessions(&self) -> Vec<Supersession> {
        self.log
            .read()
            .expect("lottery log poisoned")
            .supersessions
            .clone()
    }

    /// Replay the draw and recompute the fingerprint; false means the record was altered.
    pub fn verify(record: &LotteryRecord) -> bool {
        if record.algorithm != ALGORITHM {
            return false;
        }
        let digest = draw::seed_digest(&record.seed, &record.cohort_candidate_ids);
        draw::to_hex(&digest) == record.seed_digest
            && draw::permute(&record.cohort_candidate_ids, digest) == record.result_order
            && draw::record_digest(record) == record.record_digest
    }

    fn cohort_lock(&self, key: ScoreKey) -> Arc<Mutex<()>> {
        self.cohort_locks
            .lock()
            .expect("cohort lock map poisoned")
            .entry(key)
            .or_default()
            .clone()
    }

    fn next_lottery_id(&self) -> LotteryId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        LotteryId(format!("lot-{id:06}"))
    }
}
