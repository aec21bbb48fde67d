use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::workflows::admission::audit::{AuditError, AuditEvent, AuditPublisher};
use crate::workflows::admission::domain::{
    CandidateId, Criterion, CriterionId, CycleId, MunicipalityId, MunicipalityQuota, QuotaMode,
    QuotaPolicy, SubregionId,
};
use crate::workflows::admission::scoring::ScoredCandidate;
use crate::workflows::admission::service::AdmissionService;

pub(super) fn policy(mode: QuotaMode, global_capacity_max: Option<u32>) -> QuotaPolicy {
    QuotaPolicy {
        cycle_id: CycleId::from("2025-I"),
        mode,
        global_capacity_max,
    }
}

pub(super) fn quota(municipality: &str, subregion: &str, capacity_max: u32) -> MunicipalityQuota {
    MunicipalityQuota::new(
        MunicipalityId::from(municipality),
        SubregionId::from(subregion),
        capacity_max,
    )
}

pub(super) fn quotas() -> Vec<MunicipalityQuota> {
    vec![
        quota("MED", "Valle de Aburra", 5),
        quota("ENV", "Valle de Aburra", 3),
        quota("RIO", "Oriente", 2),
    ]
}

pub(super) fn criterion(code: &str, weight_percent: f64, max_points: f64, order: u32) -> Criterion {
    Criterion {
        criterion_id: CriterionId::from(code),
        weight_percent,
        max_points,
        order,
        active: true,
    }
}

/// Two equally weighted criteria scored out of 100, so a total equals the mean of the points.
pub(super) fn criteria() -> Vec<Criterion> {
    vec![
        criterion("INNOV", 50.0, 100.0, 1),
        criterion("MARKET", 50.0, 100.0, 2),
    ]
}

pub(super) fn id(raw: &str) -> CandidateId {
    CandidateId::from(raw)
}

pub(super) fn municipality(raw: &str) -> MunicipalityId {
    MunicipalityId::from(raw)
}

pub(super) fn scored(candidate: &str, total: f64) -> ScoredCandidate {
    ScoredCandidate {
        candidate_id: id(candidate),
        municipality_id: municipality("MED"),
        total,
    }
}

pub(super) fn build_service(
    mode: QuotaMode,
    global_capacity_max: Option<u32>,
) -> (Arc<AdmissionService<MemoryAudit>>, Arc<MemoryAudit>) {
    let audit = Arc::new(MemoryAudit::default());
    let service = AdmissionService::with_configuration(
        policy(mode, global_capacity_max),
        quotas(),
        criteria(),
        audit.clone(),
    );
    (Arc::new(service), audit)
}

/// Registers `candidate` in MED and gives both criteria the same points.
pub(super) fn scored_candidate<A: AuditPublisher + 'static>(
    service: &AdmissionService<A>,
    candidate: &str,
    points: f64,
) {
    service
        .register_candidate(id(candidate), municipality("MED"))
        .expect("registration succeeds");
    for code in ["INNOV", "MARKET"] {
        service
            .set_criterion_score(&id(candidate), &CriterionId::from(code), points)
            .expect("score accepted");
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAudit {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAudit {
    pub(super) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit mutex poisoned").clone()
    }

    pub(super) fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(AuditEvent::kind).collect()
    }
}

impl AuditPublisher for MemoryAudit {
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .expect("audit mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct OfflineAudit;

impl AuditPublisher for OfflineAudit {
    fn publish(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Transport("notification relay offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
