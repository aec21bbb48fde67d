use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Municipality code as published in the quota configuration.
    MunicipalityId
);
string_id!(
    /// Subregion grouping several municipalities.
    SubregionId
);
string_id!(
    /// Applicant identity supplied by the registration store.
    CandidateId
);
string_id!(
    /// Evaluation criterion code.
    CriterionId
);
string_id!(
    /// Intake cycle (convocatoria) identifier.
    CycleId
);
string_id!(LotteryId);

/// Whether caps are enforced or informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaMode {
    Open,
    Blocking,
}

impl QuotaMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" | "abierto" => Some(Self::Open),
            "blocking" | "bloqueante" => Some(Self::Blocking),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Blocking => "blocking",
        }
    }
}

/// Process-wide quota policy for the active cycle. Replaced wholesale, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    pub cycle_id: CycleId,
    pub mode: QuotaMode,
    #[serde(default)]
    pub global_capacity_max: Option<u32>,
}

/// Configured quota row for a single municipality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MunicipalityQuota {
    pub municipality_id: MunicipalityId,
    pub subregion_id: SubregionId,
    pub capacity_max: u32,
    #[serde(default)]
    pub confirmed_count: u32,
    #[serde(default)]
    pub waitlist_count: u32,
}

impl MunicipalityQuota {
    pub fn new(municipality_id: MunicipalityId, subregion_id: SubregionId, capacity_max: u32) -> Self {
        Self {
            municipality_id,
            subregion_id,
            capacity_max,
            confirmed_count: 0,
            waitlist_count: 0,
        }
    }
}

/// Seat held by an admitted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatState {
    Confirmed,
    Waitlisted,
}

impl SeatState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
        }
    }
}

/// Outcome handed back to the caller of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Confirmed,
    Waitlisted,
    Rejected,
}

impl From<SeatState> for DecisionOutcome {
    fn from(value: SeatState) -> Self {
        match value {
            SeatState::Confirmed => Self::Confirmed,
            SeatState::Waitlisted => Self::Waitlisted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub candidate_id: CandidateId,
    pub municipality_id: MunicipalityId,
    pub outcome: DecisionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl AdmissionDecision {
    pub fn seat(&self) -> Option<SeatState> {
        match self.outcome {
            DecisionOutcome::Confirmed => Some(SeatState::Confirmed),
            DecisionOutcome::Waitlisted => Some(SeatState::Waitlisted),
            DecisionOutcome::Rejected => None,
        }
    }
}

/// Applicant as seen by the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: CandidateId,
    pub municipality_id: MunicipalityId,
    #[serde(default)]
    pub criterion_scores: BTreeMap<CriterionId, f64>,
}

impl Candidate {
    pub fn new(candidate_id: CandidateId, municipality_id: MunicipalityId) -> Self {
        Self {
            candidate_id,
            municipality_id,
            criterion_scores: BTreeMap::new(),
        }
    }
}

/// Weighted evaluation criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub criterion_id: CriterionId,
    pub weight_percent: f64,
    pub max_points: f64,
    pub order: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Total score rounded to hundredths. Equal keys mean the candidates are tied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScoreKey(pub i64);

impl ScoreKey {
    pub fn from_total(total: f64) -> Self {
        Self((total * 100.0).round() as i64)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let value: f64 = trimmed.parse().ok()?;
        value.is_finite().then(|| Self::from_total(value))
    }

    pub fn as_total(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for ScoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for ScoreKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScoreKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid score key '{raw}'")))
    }
}
