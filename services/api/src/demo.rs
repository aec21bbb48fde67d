use crate::infra::{parse_timestamp, InMemoryAuditLog};
use admission_engine::error::AppError;
use admission_engine::workflows::admission::{
    AdmissionService, CandidateId, CycleId, DecisionReceipt, Placement, QuotaMode, QuotaPolicy,
    QuotaStateView, Ranking, SeedSource, TieBreakLottery,
};
use admission_engine::workflows::intake::{
    CriteriaImporter, QuotaImporter, ScoreEntry, ScoreImporter,
};
use chrono::{DateTime, Utc};
use clap::Args;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_QUOTAS: &str = "municipality,subregion,capacity
Medellin,Valle de Aburra,2
Envigado,Valle de Aburra,1
Rionegro,Oriente,1
";

const DEMO_CRITERIA: &str = "code,weight,max_points,order
INNOVATION,40,10,1
MARKET,35,20,2
TEAM,25,5,3
";

const DEMO_SCORES: &str = "candidate_id,municipality_id,criterion,points
ANA-01,Medellin,INNOVATION,9
ANA-01,Medellin,MARKET,18
ANA-01,Medellin,TEAM,4
BEA-02,Medellin,INNOVATION,5
BEA-02,Medellin,MARKET,10
BEA-02,Medellin,TEAM,4
CAR-03,Envigado,INNOVATION,7
CAR-03,Envigado,MARKET,10
CAR-03,Envigado,TEAM,2.4
DAN-04,Rionegro,INNOVATION,6
DAN-04,Rionegro,MARKET,12
DAN-04,Rionegro,TEAM,3
EVA-05,Medellin,INNOVATION,4
EVA-05,Medellin,MARKET,8
EVA-05,Medellin,TEAM,2
";

#[derive(Args, Debug)]
pub(crate) struct RankingReportArgs {
    /// Quota CSV (municipality,subregion,capacity)
    #[arg(long)]
    pub(crate) quotas: PathBuf,
    /// Criteria CSV (code,weight,max_points,order[,active])
    #[arg(long)]
    pub(crate) criteria: PathBuf,
    /// Score sheet CSV (candidate_id,municipality_id,criterion,points)
    #[arg(long)]
    pub(crate) scores: PathBuf,
    /// Draw every open tie cohort with this seed value
    #[arg(long)]
    pub(crate) seed: Option<String>,
    /// Announced draw time (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_timestamp)]
    pub(crate) seed_timestamp: Option<DateTime<Utc>>,
    /// Enforcement mode used when allocating (open|blocking)
    #[arg(long, value_parser = parse_mode, default_value = "blocking")]
    pub(crate) mode: QuotaMode,
    /// Optional program-wide cap on confirmed seats
    #[arg(long)]
    pub(crate) global_cap: Option<u32>,
    /// Decide every ranked candidate once ties are resolved
    #[arg(long)]
    pub(crate) allocate: bool,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Seed value announced for the tie-break draw
    #[arg(long, default_value = "demo-acta-001")]
    pub(crate) seed: String,
    /// Enforcement mode for the scripted cycle (open|blocking)
    #[arg(long, value_parser = parse_mode, default_value = "blocking")]
    pub(crate) mode: QuotaMode,
    /// Optional program-wide cap on confirmed seats
    #[arg(long)]
    pub(crate) global_cap: Option<u32>,
}

pub(crate) fn run_ranking_report(args: RankingReportArgs) -> Result<(), AppError> {
    let RankingReportArgs {
        quotas,
        criteria,
        scores,
        seed,
        seed_timestamp,
        mode,
        global_cap,
        allocate,
    } = args;

    let service = AdmissionService::with_configuration(
        policy("offline", mode, global_cap),
        QuotaImporter::from_path(quotas)?,
        CriteriaImporter::from_path(criteria)?,
        Arc::new(InMemoryAuditLog::default()),
    );
    apply_scores(&service, ScoreImporter::from_path(scores)?)?;
    service.validate_weights()?;

    if let Some(value) = seed {
        let seed = SeedSource {
            value,
            timestamp: seed_timestamp.unwrap_or_else(Utc::now),
        };
        draw_open_cohorts(&service, &seed)?;
    }

    let ranking = service.ranking()?;
    render_ranking(&ranking);

    if allocate {
        let receipts = service.allocate_by_ranking()?;
        render_decisions(&receipts);
        render_quota_state(&service.quota_state());
    }

    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        seed,
        mode,
        global_cap,
    } = args;

    let audit = Arc::new(InMemoryAuditLog::default());
    let service = AdmissionService::with_configuration(
        policy("demo", mode, global_cap),
        QuotaImporter::from_reader(Cursor::new(DEMO_QUOTAS))?,
        CriteriaImporter::from_reader(Cursor::new(DEMO_CRITERIA))?,
        audit.clone(),
    );

    println!("Admission engine demo");
    println!(
        "- cycle '{}' | mode {} | global cap {}",
        service.policy().cycle_id,
        mode.label(),
        global_cap.map_or_else(|| "none".to_string(), |cap| cap.to_string())
    );

    apply_scores(&service, ScoreImporter::from_reader(Cursor::new(DEMO_SCORES))?)?;

    println!("\nRanking before tie-break");
    let before = service.ranking()?;
    render_ranking(&before);

    let seed = SeedSource {
        value: seed,
        timestamp: Utc::now(),
    };
    draw_open_cohorts(&service, &seed)?;

    println!("\nRanking after tie-break");
    render_ranking(&service.ranking()?);

    println!("\nAllocation by ranking");
    let receipts = service.allocate_by_ranking()?;
    render_decisions(&receipts);
    render_quota_state(&service.quota_state());

    println!("\n{} audit events recorded", audit.events().len());
    Ok(())
}

fn policy(cycle: &str, mode: QuotaMode, global_capacity_max: Option<u32>) -> QuotaPolicy {
    QuotaPolicy {
        cycle_id: CycleId::from(cycle),
        mode,
        global_capacity_max,
    }
}

fn parse_mode(raw: &str) -> Result<QuotaMode, String> {
    QuotaMode::parse(raw).ok_or_else(|| format!("unknown quota mode '{raw}' (open|blocking)"))
}

fn apply_scores(
    service: &AdmissionService<InMemoryAuditLog>,
    entries: Vec<ScoreEntry>,
) -> Result<(), AppError> {
    for entry in entries {
        service.register_candidate(entry.candidate_id.clone(), entry.municipality_id)?;
        service.set_criterion_score(&entry.candidate_id, &entry.criterion_id, entry.points)?;
    }
    Ok(())
}

fn draw_open_cohorts(
    service: &AdmissionService<InMemoryAuditLog>,
    seed: &SeedSource,
) -> Result<(), AppError> {
    let ranking = service.ranking()?;
    for cohort in &ranking.tie_cohorts {
        let record = service.draw(cohort.key, seed.clone())?;
        println!(
            "Lottery {} at {}: {} (seed '{}', verified: {})",
            record.lottery_id,
            record.cohort_key,
            join_ids(&record.result_order),
            record.seed,
            TieBreakLottery::verify(&record)
        );
        println!("  record digest {}", record.record_digest);
    }
    Ok(())
}

fn render_ranking(ranking: &Ranking) {
    for entry in &ranking.entries {
        let note = match &entry.placement {
            Placement::Unique => String::new(),
            Placement::Tied => " (tied, awaiting lottery)".to_string(),
            Placement::ResolvedByLottery { lottery_id } => format!(" (lottery {lottery_id})"),
        };
        println!(
            "  #{:<3} {:>6}  {}{}",
            entry.rank,
            entry.score.to_string(),
            join_ids(&entry.candidate_ids),
            note
        );
    }
    if !ranking.is_fully_resolved() {
        println!("  {} tie cohort(s) unresolved", ranking.tie_cohorts.len());
    }
}

fn render_decisions(receipts: &[DecisionReceipt]) {
    for receipt in receipts {
        let decision = &receipt.decision;
        println!(
            "  {} -> {} ({:?}){}",
            decision.candidate_id,
            decision.municipality_id,
            decision.outcome,
            decision
                .reason
                .as_deref()
                .map(|reason| format!(": {reason}"))
                .unwrap_or_default()
        );
    }
}

fn render_quota_state(state: &QuotaStateView) {
    println!(
        "Program: {} confirmed / {} seats | {} waitlisted | {:.2}% occupied",
        state.global.confirmed,
        state.global.max,
        state.global.waitlisted,
        state.global.occupancy_percent
    );
    for subregion in &state.subregions {
        println!(
            "  {}: {} / {} ({:.2}%)",
            subregion.subregion_id,
            subregion.quota.confirmed,
            subregion.quota.max,
            subregion.quota.occupancy_percent
        );
    }
    for municipality in &state.municipalities {
        println!(
            "    {}: {} confirmed, {} waitlisted, {} available",
            municipality.municipality_id,
            municipality.quota.confirmed,
            municipality.quota.waitlisted,
            municipality.quota.available
        );
    }
}

fn join_ids(ids: &[CandidateId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
