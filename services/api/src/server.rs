use crate::cli::ServeArgs;
use crate::infra::{build_service, AppState, InMemoryAuditLog};
use crate::routes::with_admission_routes;
use admission_engine::config::AppConfig;
use admission_engine::error::AppError;
use admission_engine::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let audit = Arc::new(InMemoryAuditLog::default());
    let admission_service = Arc::new(build_service(&config.admission, audit)?);
    if let Err(error) = admission_service.validate_weights() {
        warn!(%error, "criterion weights need attention before ranking is available");
    }

    let app = with_admission_routes(admission_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        cycle = %config.admission.cycle_id,
        mode = config.admission.mode.label(),
        "admission engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
