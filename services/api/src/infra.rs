use admission_engine::config::AdmissionConfig;
use admission_engine::error::AppError;
use admission_engine::workflows::admission::{
    AdmissionService, AuditError, AuditEvent, AuditPublisher,
};
use admission_engine::workflows::intake::{CriteriaImporter, QuotaImporter};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local audit trail until a notification relay is wired in.
#[derive(Default, Clone)]
pub(crate) struct InMemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl AuditPublisher for InMemoryAuditLog {
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
        debug!(event = event.kind(), "audit event recorded");
        let mut guard = self.events.lock().expect("audit mutex poisoned");
        guard.push(event);
        Ok(())
    }
}

impl InMemoryAuditLog {
    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit mutex poisoned").clone()
    }
}

/// Build the engine from the configured policy, importing boot-time CSV files when set.
pub(crate) fn build_service<A>(
    config: &AdmissionConfig,
    audit: Arc<A>,
) -> Result<AdmissionService<A>, AppError>
where
    A: AuditPublisher + 'static,
{
    let quotas = match &config.quotas_csv {
        Some(path) => {
            let quotas = QuotaImporter::from_path(path)?;
            info!(path = %path.display(), municipalities = quotas.len(), "quota file loaded");
            quotas
        }
        None => Vec::new(),
    };

    let criteria = match &config.criteria_csv {
        Some(path) => {
            let criteria = CriteriaImporter::from_path(path)?;
            info!(path = %path.display(), criteria = criteria.len(), "criteria file loaded");
            criteria
        }
        None => Vec::new(),
    };

    Ok(AdmissionService::with_configuration(
        config.policy(),
        quotas,
        criteria,
        audit,
    ))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_engine::workflows::admission::{CycleId, QuotaMode, QuotaPolicy};

    #[test]
    fn audit_log_keeps_events_in_order() {
        let log = InMemoryAuditLog::default();
        let policy = QuotaPolicy {
            cycle_id: CycleId::from("2025-I"),
            mode: QuotaMode::Open,
            global_capacity_max: None,
        };
        log.publish(AuditEvent::PolicyReplaced(policy.clone()))
            .expect("publish");
        log.publish(AuditEvent::PolicyReplaced(policy)).expect("publish");

        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn build_service_without_files_starts_empty() {
        let service = build_service(
            &AdmissionConfig::default(),
            Arc::new(InMemoryAuditLog::default()),
        )
        .expect("service builds");

        let state = service.quota_state();
        assert!(state.municipalities.is_empty());
        assert_eq!(state.policy.mode, QuotaMode::Blocking);
    }

    #[test]
    fn missing_quota_file_is_an_import_error() {
        let config = AdmissionConfig {
            quotas_csv: Some("./missing-quotas.csv".into()),
            ..AdmissionConfig::default()
        };
        let result = build_service(&config, Arc::new(InMemoryAuditLog::default()));
        assert!(matches!(result, Err(AppError::Import(_))));
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        let parsed = parse_timestamp("2025-03-01T05:00:00-05:00").expect("valid");
        assert_eq!(parsed.to_rfc3339(), "2025-03-01T10:00:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
