//! Weighted multi-criteria scoring and the ranking built on top of it.

pub mod ranking;

pub use ranking::{Placement, Ranking, RankingEntry, RankingResolver, TieCohort, TieResolution};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use super::domain::{Candidate, CandidateId, Criterion, CriterionId, MunicipalityId};

/// Allowed drift between the criterion weight sum and 100.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Errors raised while scoring candidates or validating the rubric.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("unknown candidate '{0}'")]
    UnknownCandidate(CandidateId),
    #[error("unknown or inactive criterion '{0}'")]
    UnknownCriterion(CriterionId),
    #[error("score {points} for criterion '{criterion}' is outside [0, {max_points}]")]
    OutOfRange {
        criterion: CriterionId,
        points: f64,
        max_points: f64,
    },
    #[error("active criterion weights sum to {actual:.2}%, expected 100%")]
    WeightMismatch { actual: f64 },
    #[error(
        "candidate '{candidate}' holds {points} points for '{criterion}', above the new maximum {max_points}"
    )]
    StoredScoreOutOfRange {
        candidate: CandidateId,
        criterion: CriterionId,
        points: f64,
        max_points: f64,
    },
    #[error("candidate '{candidate}' is already registered for municipality '{registered}'")]
    CandidateConflict {
        candidate: CandidateId,
        registered: MunicipalityId,
    },
}

/// Immutable rubric for a cycle, ordered by display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CriterionSet {
    criteria: Vec<Criterion>,
}

impl CriterionSet {
    pub fn new(mut criteria: Vec<Criterion>) -> Self {
        criteria.sort_by(|left, right| {
            left.order
                .cmp(&right.order)
                .then_with(|| left.criterion_id.cmp(&right.criterion_id))
        });
        Self { criteria }
    }

    pub fn all(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn active(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter().filter(|criterion| criterion.active)
    }

    pub fn active_criterion(&self, id: &CriterionId) -> Option<&Criterion> {
        self.active().find(|criterion| &criterion.criterion_id == id)
    }

    pub fn weight_sum(&self) -> f64 {
        self.active().map(|criterion| criterion.weight_percent).sum()
    }

    pub fn validate_weights(&self) -> Result<(), ScoringError> {
        let actual = self.weight_sum();
        if (actual - 100.0).abs() <= WEIGHT_TOLERANCE {
            Ok(())
        } else {
            Err(ScoringError::WeightMismatch { actual })
        }
    }

    /// `Σ points / max_points × weight` over active criteria; missing scores count as zero.
    pub fn total_for(&self, scores: &BTreeMap<CriterionId, f64>) -> f64 {
        self.active()
            .map(|criterion| {
                let points = scores.get(&criterion.criterion_id).copied().unwrap_or(0.0);
                points / criterion.max_points * criterion.weight_percent
            })
            .sum()
    }
}

/// Candidate total as observed in one consistent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate_id: CandidateId,
    pub municipality_id: MunicipalityId,
    pub total: f64,
}

/// Score book for all registered candidates.
///
/// Writes lock the outer map for reading plus the candidate's own mutex, so edits to
/// different candidates run in parallel. [`ScoringEngine::snapshot`] takes the outer map
/// for writing, which waits out in-flight edits and yields an untorn view.
#[derive(Debug, Default)]
pub struct ScoringEngine {
    criteria: RwLock<Arc<CriterionSet>>,
    candidates: RwLock<HashMap<CandidateId, Mutex<Candidate>>>,
}

impl ScoringEngine {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self {
            criteria: RwLock::new(Arc::new(CriterionSet::new(criteria))),
            candidates: RwLock::new(HashMap::new()),
        }
    }

    pub fn criteria(&self) -> Arc<CriterionSet> {
        self.criteria.read().expect("criteria lock poisoned").clone()
    }

    /// Swap in a new rubric unless a stored score would fall outside its range.
    ///
    /// The score book stays write-locked across the check and the swap, so no score can be
    /// recorded against the old maximums in between.
    pub fn replace_criteria(&self, criteria: Vec<Criterion>) -> Result<(), ScoringError> {
        let set = Arc::new(CriterionSet::new(criteria));
        let mut guard = self.candidates.write().expect("score book poisoned");

        for candidate in guard.values_mut() {
            let candidate = candidate.get_mut().expect("candidate mutex poisoned");
            for criterion in set.all() {
                match candidate.criterion_scores.get(&criterion.criterion_id) {
                    Some(&points) if points > criterion.max_points => {
                        return Err(ScoringError::StoredScoreOutOfRange {
                            candidate: candidate.candidate_id.clone(),
                            criterion: criterion.criterion_id.clone(),
                            points,
                            max_points: criterion.max_points,
                        });
                    }
                    _ => {}
                }
            }
        }

        info!(
            criteria = set.all().len(),
            weight_sum = set.weight_sum(),
            "criterion set replaced"
        );
        *self.criteria.write().expect("criteria lock poisoned") = set;
        Ok(())
    }

    pub fn validate_weights(&self) -> Result<(), ScoringError> {
        self.criteria().validate_weights()
    }

    /// Register a candidate handed over by the registration store.
    pub fn register(&self, candidate: Candidate) -> Result<(), ScoringError> {
        let mut guard = self.candidates.write().expect("score book poisoned");
        if let Some(existing) = guard.get(&candidate.candidate_id) {
            let existing = existing.lock().expect("candidate mutex poisoned");
            if existing.municipality_id == candidate.municipality_id {
                return Ok(());
            }
            return Err(ScoringError::CandidateConflict {
                candidate: candidate.candidate_id.clone(),
                registered: existing.municipality_id.clone(),
            });
        }

        debug!(candidate = %candidate.candidate_id, "candidate registered for scoring");
        guard.insert(candidate.candidate_id.clone(), Mutex::new(candidate));
        Ok(())
    }

    pub fn candidate(&self, candidate_id: &CandidateId) -> Option<Candidate> {
        let guard = self.candidates.read().expect("score book poisoned");
        guard
            .get(candidate_id)
            .map(|candidate| candidate.lock().expect("candidate mutex poisoned").clone())
    }

    /// Record points for one criterion and return the candidate's recomputed total.
    ///
    /// Out-of-range points are rejected, never clamped, and leave earlier scores untouched.
    pub fn set_criterion_score(
        &self,
        candidate_id: &CandidateId,
        criterion_id: &CriterionId,
        points: f64,
    ) -> Result<f64, ScoringError> {
        let guard = self.candidates.read().expect("score book poisoned");
        let criteria = self.criteria();
        let criterion = criteria
            .active_criterion(criterion_id)
            .ok_or_else(|| ScoringError::UnknownCriterion(criterion_id.clone()))?;

        if !points.is_finite() || points < 0.0 || points > criterion.max_points {
            return Err(ScoringError::OutOfRange {
                criterion: criterion_id.clone(),
                points,
                max_points: criterion.max_points,
            });
        }

        let mut candidate = guard
            .get(candidate_id)
            .ok_or_else(|| ScoringError::UnknownCandidate(candidate_id.clone()))?
            .lock()
            .expect("candidate mutex poisoned");

        candidate
            .criterion_scores
            .insert(criterion_id.clone(), points);
        let total = criteria.total_for(&candidate.criterion_scores);

        debug!(
            candidate = %candidate_id,
            criterion = %criterion_id,
            points,
            total,
            "criterion score recorded"
        );
        Ok(total)
    }

    pub fn total_score(&self, candidate_id: &CandidateId) -> Result<f64, ScoringError> {
        let guard = self.candidates.read().expect("score book poisoned");
        let criteria = self.criteria();
        let candidate = guard
            .get(candidate_id)
            .ok_or_else(|| ScoringError::UnknownCandidate(candidate_id.clone()))?
            .lock()
            .expect("candidate mutex poisoned");
        Ok(criteria.total_for(&candidate.criterion_scores))
    }

    /// Totals for every candidate taken under one exclusive pass over the score book.
    pub fn snapshot(&self) -> (Arc<CriterionSet>, Vec<ScoredCandidate>) {
        let mut guard = self.candidates.write().expect("score book poisoned");
        let criteria = self.criteria();
        let scored = guard
            .values_mut()
            .map(|candidate| {
                let candidate = candidate.get_mut().expect("candidate mutex poisoned");
                ScoredCandidate {
                    candidate_id: candidate.candidate_id.clone(),
                    municipality_id: candidate.municipality_id.clone(),
                    total: criteria.total_for(&candidate.criterion_scores),
                }
            })
            .collect();
        (criteria, scored)
    }
}
