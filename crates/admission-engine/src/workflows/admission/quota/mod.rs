//! Hierarchical seat allocation: municipality counters, the active quota policy, and the
//! admission decider that ties them together.

mod decider;
mod ledger;
mod policy;

pub use decider::{AdmissionDecider, DecisionReceipt};
pub use ledger::{CapacityLedger, MunicipalitySnapshot, QuotaSnapshot, SubregionSnapshot};
pub use policy::ActivePolicy;

use super::domain::{CandidateId, MunicipalityId, SeatState};

/// Failures raised while reserving, releasing, or deciding seats.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("unknown municipality '{0}'")]
    UnknownMunicipality(MunicipalityId),
    #[error("global capacity exhausted ({confirmed} of {capacity} seats confirmed)")]
    CapacityExceeded { confirmed: u64, capacity: u32 },
    #[error("no {} seat to release in municipality '{municipality}'", .state.label())]
    NotFound {
        municipality: MunicipalityId,
        state: SeatState,
    },
    #[error("candidate '{0}' holds no seat")]
    NotAdmitted(CandidateId),
}
