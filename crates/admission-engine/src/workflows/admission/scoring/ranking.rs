use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::super::domain::{CandidateId, LotteryId, ScoreKey};
use super::{CriterionSet, ScoredCandidate, ScoringError};

/// Fixed order for one score value, produced by a lottery draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieResolution {
    pub lottery_id: LotteryId,
    pub order: Vec<CandidateId>,
}

/// How a ranking entry obtained its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    Unique,
    /// Members share one rank; their listing order carries no meaning.
    Tied,
    ResolvedByLottery { lottery_id: LotteryId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub score: ScoreKey,
    pub candidate_ids: Vec<CandidateId>,
    pub placement: Placement,
}

/// Candidates whose totals are equal to two decimals and still await a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TieCohort {
    pub key: ScoreKey,
    pub candidate_ids: BTreeSet<CandidateId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ranking {
    pub entries: Vec<RankingEntry>,
    pub tie_cohorts: Vec<TieCohort>,
}

impl Ranking {
    pub fn is_fully_resolved(&self) -> bool {
        self.tie_cohorts.is_empty()
    }

    /// Flat candidate order. Members of an unresolved cohort appear together at their shared
    /// rank, so callers must check [`Ranking::is_fully_resolved`] before relying on it.
    pub fn ordered_candidates(&self) -> Vec<CandidateId> {
        self.entries
            .iter()
            .flat_map(|entry| entry.candidate_ids.iter().cloned())
            .collect()
    }

    pub fn unresolved_cohort(&self, key: ScoreKey) -> Option<&TieCohort> {
        self.tie_cohorts.iter().find(|cohort| cohort.key == key)
    }

    /// Everyone currently holding `key`, resolved or not.
    pub fn members_at(&self, key: ScoreKey) -> BTreeSet<CandidateId> {
        self.entries
            .iter()
            .filter(|entry| entry.score == key)
            .flat_map(|entry| entry.candidate_ids.iter().cloned())
            .collect()
    }
}

/// Orders scored candidates by total descending and groups equal totals into cohorts.
pub struct RankingResolver;

impl RankingResolver {
    /// Build a ranking from scratch. Refuses to run against a rubric whose weights are off.
    pub fn rank(
        criteria: &CriterionSet,
        scored: &[ScoredCandidate],
        resolutions: &HashMap<ScoreKey, TieResolution>,
    ) -> Result<Ranking, ScoringError> {
        criteria.validate_weights()?;

        let mut groups: BTreeMap<Reverse<ScoreKey>, BTreeSet<CandidateId>> = BTreeMap::new();
        for candidate in scored {
            groups
                .entry(Reverse(ScoreKey::from_total(candidate.total)))
                .or_default()
                .insert(candidate.candidate_id.clone());
        }

        let mut ranking = Ranking::default();
        let mut next_rank = 1;

        for (Reverse(score), members) in groups {
            let size = members.len();

            if size == 1 {
                ranking.entries.push(RankingEntry {
                    rank: next_rank,
                    score,
                    candidate_ids: members.into_iter().collect(),
                    placement: Placement::Unique,
                });
            } else if let Some(resolution) = resolutions
                .get(&score)
                .filter(|resolution| same_members(&resolution.order, &members))
            {
                for (offset, candidate_id) in resolution.order.iter().enumerate() {
                    ranking.entries.push(RankingEntry {
                        rank: next_rank + offset,
                        score,
                        candidate_ids: vec![candidate_id.clone()],
                        placement: Placement::ResolvedByLottery {
                            lottery_id: resolution.lottery_id.clone(),
                        },
                    });
                }
            } else {
                ranking.entries.push(RankingEntry {
                    rank: next_rank,
                    score,
                    candidate_ids: members.iter().cloned().collect(),
                    placement: Placement::Tied,
                });
                ranking.tie_cohorts.push(TieCohort {
                    key: score,
                    candidate_ids: members,
                });
            }

            next_rank += size;
        }

        Ok(ranking)
    }
}

fn same_members(order: &[CandidateId], members: &BTreeSet<CandidateId>) -> bool {
    order.len() == members.len() && order.iter().all(|candidate| members.contains(candidate))
}
