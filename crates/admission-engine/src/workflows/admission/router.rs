use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::audit::AuditPublisher;
use super::domain::{CandidateId, CriterionId, MunicipalityId, QuotaPolicy, ScoreKey};
use super::lottery::{LotteryError, SeedSource};
use super::quota::AllocationError;
use super::scoring::ScoringError;
use super::service::{AdmissionService, AdmissionServiceError};

type SharedService<A> = Arc<AdmissionService<A>>;

/// Router builder exposing quota, scoring, ranking, and lottery endpoints.
pub fn admission_router<A>(service: SharedService<A>) -> Router
where
    A: AuditPublisher + 'static,
{
    Router::new()
        .route("/api/v1/quota/state", get(quota_state_handler::<A>))
        .route("/api/v1/quota/policy", put(policy_handler::<A>))
        .route(
            "/api/v1/municipality/:municipality_id/cap",
            put(capacity_handler::<A>),
        )
        .route("/api/v1/candidates", post(register_handler::<A>))
        .route("/api/v1/admission/decide", post(decide_handler::<A>))
        .route("/api/v1/admission/withdraw", post(withdraw_handler::<A>))
        .route("/api/v1/admission/promote", post(promote_handler::<A>))
        .route("/api/v1/admission/allocate", post(allocate_handler::<A>))
        .route(
            "/api/v1/candidate/:candidate_id/score/:criterion_id",
            put(score_handler::<A>),
        )
        .route(
            "/api/v1/candidate/:candidate_id/score",
            get(total_score_handler::<A>),
        )
        .route("/api/v1/ranking", get(ranking_handler::<A>))
        .route("/api/v1/lottery/:cohort_key", get(lottery_history_handler::<A>))
        .route("/api/v1/lottery/:cohort_key/draw", post(draw_handler::<A>))
        .route(
            "/api/v1/lottery/:cohort_key/supersede",
            post(supersede_handler::<A>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct CapacityRequest {
    pub(crate) capacity_max: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterRequest {
    pub(crate) candidate_id: CandidateId,
    pub(crate) municipality_id: MunicipalityId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DecideRequest {
    pub(crate) candidate_id: CandidateId,
    pub(crate) municipality_id: MunicipalityId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateRequest {
    pub(crate) candidate_id: CandidateId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScoreRequest {
    pub(crate) points: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DrawRequest {
    pub(crate) seed: String,
    #[serde(default)]
    pub(crate) timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SupersedeRequest {
    pub(crate) reason: String,
}

pub(crate) async fn quota_state_handler<A>(State(service): State<SharedService<A>>) -> Response
where
    A: AuditPublisher + 'static,
{
    (StatusCode::OK, Json(service.quota_state())).into_response()
}

pub(crate) async fn policy_handler<A>(
    State(service): State<SharedService<A>>,
    Json(policy): Json<QuotaPolicy>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    let current = service.replace_policy(policy);
    (StatusCode::OK, Json(current.as_ref().clone())).into_response()
}

pub(crate) async fn capacity_handler<A>(
    State(service): State<SharedService<A>>,
    Path(municipality_id): Path<String>,
    Json(request): Json<CapacityRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    let municipality_id = MunicipalityId(municipality_id);
    match service.set_capacity(&municipality_id, request.capacity_max) {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({
                "municipality_id": municipality_id,
                "quota": snapshot,
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn register_handler<A>(
    State(service): State<SharedService<A>>,
    Json(request): Json<RegisterRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    match service.register_candidate(request.candidate_id, request.municipality_id) {
        Ok(candidate) => (StatusCode::CREATED, Json(candidate)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn decide_handler<A>(
    State(service): State<SharedService<A>>,
    Json(request): Json<DecideRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    match service.decide(&request.candidate_id, &request.municipality_id) {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn withdraw_handler<A>(
    State(service): State<SharedService<A>>,
    Json(request): Json<CandidateRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    match service.withdraw(&request.candidate_id) {
        Ok(released) => (StatusCode::OK, Json(released)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn promote_handler<A>(
    State(service): State<SharedService<A>>,
    Json(request): Json<CandidateRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    match service.promote(&request.candidate_id) {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn allocate_handler<A>(State(service): State<SharedService<A>>) -> Response
where
    A: AuditPublisher + 'static,
{
    match service.allocate_by_ranking() {
        Ok(receipts) => (StatusCode::OK, Json(receipts)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn score_handler<A>(
    State(service): State<SharedService<A>>,
    Path((candidate_id, criterion_id)): Path<(String, String)>,
    Json(request): Json<ScoreRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    let candidate_id = CandidateId(candidate_id);
    let criterion_id = CriterionId(criterion_id);
    match service.set_criterion_score(&candidate_id, &criterion_id, request.points) {
        Ok(update) => (StatusCode::OK, Json(update)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn total_score_handler<A>(
    State(service): State<SharedService<A>>,
    Path(candidate_id): Path<String>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    let candidate_id = CandidateId(candidate_id);
    match service.total_score(&candidate_id) {
        Ok(total) => (
            StatusCode::OK,
            Json(json!({
                "candidate_id": candidate_id,
                "total": total,
                "score_key": ScoreKey::from_total(total),
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn ranking_handler<A>(State(service): State<SharedService<A>>) -> Response
where
    A: AuditPublisher + 'static,
{
    match service.ranking() {
        Ok(ranking) => (StatusCode::OK, Json(ranking)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn draw_handler<A>(
    State(service): State<SharedService<A>>,
    Path(cohort_key): Path<String>,
    Json(request): Json<DrawRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    let key = match parse_cohort_key(&cohort_key) {
        Ok(key) => key,
        Err(error) => return error_response(error),
    };
    let seed = SeedSource {
        value: request.seed,
        timestamp: request.timestamp.unwrap_or_else(Utc::now),
    };

    match service.draw(key, seed) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn supersede_handler<A>(
    State(service): State<SharedService<A>>,
    Path(cohort_key): Path<String>,
    Json(request): Json<SupersedeRequest>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    let key = match parse_cohort_key(&cohort_key) {
        Ok(key) => key,
        Err(error) => return error_response(error),
    };

    match service.supersede(key, &request.reason) {
        Ok(supersession) => (StatusCode::OK, Json(supersession)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn lottery_history_handler<A>(
    State(service): State<SharedService<A>>,
    Path(cohort_key): Path<String>,
) -> Response
where
    A: AuditPublisher + 'static,
{
    match parse_cohort_key(&cohort_key) {
        Ok(key) => (
            StatusCode::OK,
            Json(json!({
                "cohort_key": key,
                "records": service.lottery_history(key),
            })),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

fn parse_cohort_key(raw: &str) -> Result<ScoreKey, AdmissionServiceError> {
    ScoreKey::parse(raw).ok_or_else(|| LotteryError::InvalidCohortKey(raw.to_string()).into())
}

pub(crate) fn status_for(error: &AdmissionServiceError) -> StatusCode {
    match error {
        AdmissionServiceError::Allocation(AllocationError::UnknownMunicipality(_))
        | AdmissionServiceError::Allocation(AllocationError::NotAdmitted(_))
        | AdmissionServiceError::Scoring(ScoringError::UnknownCandidate(_))
        | AdmissionServiceError::Lottery(LotteryError::UnknownCohort(_))
        | AdmissionServiceError::Lottery(LotteryError::NotFound(_)) => StatusCode::NOT_FOUND,
        AdmissionServiceError::Scoring(ScoringError::UnknownCriterion(_))
        | AdmissionServiceError::Scoring(ScoringError::OutOfRange { .. })
        | AdmissionServiceError::Lottery(LotteryError::InvalidCohortKey(_))
        | AdmissionServiceError::Lottery(LotteryError::EmptyCohort(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AdmissionServiceError::Scoring(ScoringError::WeightMismatch { .. })
        | AdmissionServiceError::Scoring(ScoringError::CandidateConflict { .. })
        | AdmissionServiceError::Scoring(ScoringError::StoredScoreOutOfRange { .. })
        | AdmissionServiceError::Lottery(LotteryError::AlreadyResolved { .. })
        | AdmissionServiceError::Allocation(AllocationError::CapacityExceeded { .. })
        | AdmissionServiceError::UnresolvedTies(_) => StatusCode::CONFLICT,
        AdmissionServiceError::Allocation(AllocationError::NotFound { .. }) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn error_response(error: AdmissionServiceError) -> Response {
    let status = status_for(&error);
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}
