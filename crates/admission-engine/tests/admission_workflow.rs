//! Integration scenarios for a full intake cycle: CSV configuration, scoring, ranking,
//! tie-break draws, and ranked allocation, driven through the public service and router.

mod common {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use admission_engine::workflows::admission::{
        AdmissionService, AuditError, AuditEvent, AuditPublisher, CandidateId, CriterionId,
        CycleId, MunicipalityId, QuotaMode, QuotaPolicy,
    };
    use admission_engine::workflows::intake::{CriteriaImporter, QuotaImporter};

    pub(super) const QUOTAS: &str = "municipio,subregion,cupo\n\
        MED,Valle de Aburra,2\n\
        ENV,Valle de Aburra,1\n\
        RIO,Oriente,1\n";

    pub(super) const CRITERIA: &str = "code,weight,max_points,order,active\n\
        INNOV,40,10,1,\n\
        MARKET,35,20,2,\n\
        TEAM,25,5,3,\n\
        LEGACY,10,10,4,no\n";

    #[derive(Default)]
    pub(super) struct RecordingAudit {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingAudit {
        pub(super) fn kinds(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .expect("audit mutex poisoned")
                .iter()
                .map(AuditEvent::kind)
                .collect()
        }
    }

    impl AuditPublisher for RecordingAudit {
        fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
            self.events
                .lock()
                .expect("audit mutex poisoned")
                .push(event);
            Ok(())
        }
    }

    pub(super) fn service() -> (Arc<AdmissionService<RecordingAudit>>, Arc<RecordingAudit>) {
        let quotas = QuotaImporter::from_reader(Cursor::new(QUOTAS)).expect("quota import");
        let criteria = CriteriaImporter::from_reader(Cursor::new(CRITERIA)).expect("criteria import");
        let audit = Arc::new(RecordingAudit::default());
        let service = AdmissionService::with_configuration(
            QuotaPolicy {
                cycle_id: CycleId::from("2025-I"),
                mode: QuotaMode::Blocking,
                global_capacity_max: Some(3),
            },
            quotas,
            criteria,
            audit.clone(),
        );
        (Arc::new(service), audit)
    }

    /// Registers a candidate and records `[INNOV, MARKET, TEAM]` points.
    pub(super) fn enroll(
        service: &AdmissionService<RecordingAudit>,
        candidate: &str,
        municipality: &str,
        points: [f64; 3],
    ) {
        service
            .register_candidate(CandidateId::from(candidate), MunicipalityId::from(municipality))
            .expect("registration");
        for (code, value) in ["INNOV", "MARKET", "TEAM"].into_iter().zip(points) {
            service
                .set_criterion_score(&CandidateId::from(candidate), &CriterionId::from(code), value)
                .expect("score accepted");
        }
    }
}

use admission_engine::workflows::admission::{
    admission_router, CandidateId, DecisionOutcome, Placement, ScoreKey, SeedSource,
    TieBreakLottery,
};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{TimeZone, Utc};
use common::*;
use tower::ServiceExt;

fn announced_seed() -> SeedSource {
    SeedSource {
        value: "acta-2025-07".to_string(),
        timestamp: Utc
            .with_ymd_and_hms(2025, 3, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp"),
    }
}

#[test]
fn full_cycle_allocates_in_ranked_order() {
    let (service, audit) = service();
    service.validate_weights().expect("active weights sum to 100");

    // 40 + 35 + 25 = 100
    enroll(&service, "ANA", "MED", [10.0, 20.0, 5.0]);
    // 20 + 17.5 + 20 = 57.5
    enroll(&service, "BEA", "MED", [5.0, 10.0, 4.0]);
    // 28 + 17.5 + 12 = 57.5
    enroll(&service, "CAR", "ENV", [7.0, 10.0, 2.4]);
    // 8 + 7 + 5 = 20
    enroll(&service, "DAN", "RIO", [2.0, 4.0, 1.0]);

    let ranking = service.ranking().expect("ranking");
    assert_eq!(ranking.entries[0].candidate_ids, vec![CandidateId::from("ANA")]);
    assert_eq!(ranking.tie_cohorts.len(), 1);
    let tie = ScoreKey::parse("57.50").expect("key");
    assert_eq!(ranking.tie_cohorts[0].key, tie);

    let record = service.draw(tie, announced_seed()).expect("draw");
    assert!(TieBreakLottery::verify(&record));

    let resolved = service.ranking().expect("ranking");
    assert!(resolved.is_fully_resolved());
    assert_eq!(resolved.entries[1].rank, 2);
    assert_eq!(resolved.entries[2].rank, 3);
    assert_eq!(resolved.entries[3].placement, Placement::Unique);
    assert_eq!(resolved.entries[3].rank, 4);

    let receipts = service.allocate_by_ranking().expect("allocation");
    let outcomes: Vec<(CandidateId, DecisionOutcome)> = receipts
        .iter()
        .map(|receipt| (receipt.decision.candidate_id.clone(), receipt.decision.outcome))
        .collect();

    assert_eq!(outcomes[0], (CandidateId::from("ANA"), DecisionOutcome::Confirmed));
    assert_eq!(outcomes[1].1, DecisionOutcome::Confirmed);
    assert_eq!(outcomes[2].1, DecisionOutcome::Confirmed);
    // the global cap of three is spent before the last candidate is reached
    assert_eq!(outcomes[3], (CandidateId::from("DAN"), DecisionOutcome::Rejected));

    let state = service.quota_state();
    assert_eq!(state.global.confirmed, 3);
    assert_eq!(state.global_capacity_available, Some(0));

    let kinds = audit.kinds();
    assert!(kinds.contains(&"lottery_drawn"));
    assert_eq!(kinds.iter().filter(|kind| **kind == "decision").count(), 4);
}

#[test]
fn identical_inputs_reproduce_identical_draws() {
    let orders: Vec<Vec<CandidateId>> = (0..2)
        .map(|_| {
            let (service, _) = service();
            enroll(&service, "BEA", "MED", [5.0, 10.0, 4.0]);
            enroll(&service, "CAR", "ENV", [7.0, 10.0, 2.4]);
            enroll(&service, "EVA", "RIO", [6.0, 12.0, 2.5]);
            let key = service.ranking().expect("ranking").tie_cohorts[0].key;
            service
                .draw(key, announced_seed())
                .expect("draw")
                .result_order
        })
        .collect();

    assert_eq!(orders[0], orders[1]);
    assert_eq!(orders[0].len(), 3);
}

#[tokio::test]
async fn router_exposes_the_cycle_over_http() {
    let (service, _) = service();
    enroll(&service, "BEA", "MED", [5.0, 10.0, 4.0]);
    enroll(&service, "CAR", "ENV", [7.0, 10.0, 2.4]);
    let router = admission_router(service);

    let response = router
        .clone()
        .oneshot(
            Request::post("/api/v1/lottery/57.50/draw")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"seed":"acta-2025-07","timestamp":"2025-03-01T10:00:00Z"}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .oneshot(
            Request::get("/api/v1/ranking")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    let ranking: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(ranking["tie_cohorts"].as_array().map(Vec::len), Some(0));
    assert_eq!(ranking["entries"][0]["placement"]["kind"], "resolved_by_lottery");
}
