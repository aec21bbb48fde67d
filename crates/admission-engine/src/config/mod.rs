use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::workflows::admission::{CycleId, QuotaMode, QuotaPolicy};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub admission: AdmissionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            admission: AdmissionConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Initial quota policy and optional configuration files imported at boot.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub cycle_id: String,
    pub mode: QuotaMode,
    pub global_capacity_max: Option<u32>,
    pub quotas_csv: Option<PathBuf>,
    pub criteria_csv: Option<PathBuf>,
}

impl AdmissionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let cycle_id = env::var("ADMISSION_CYCLE").unwrap_or_else(|_| "default".to_string());

        let raw_mode = env::var("ADMISSION_MODE").unwrap_or_else(|_| "blocking".to_string());
        let mode = QuotaMode::parse(&raw_mode).ok_or(ConfigError::InvalidMode(raw_mode))?;

        let global_capacity_max = match env::var("ADMISSION_GLOBAL_CAP") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| ConfigError::InvalidGlobalCap)?,
            ),
            _ => None,
        };

        Ok(Self {
            cycle_id,
            mode,
            global_capacity_max,
            quotas_csv: optional_path("ADMISSION_QUOTAS_CSV"),
            criteria_csv: optional_path("ADMISSION_CRITERIA_CSV"),
        })
    }

    pub fn policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            cycle_id: CycleId(self.cycle_id.clone()),
            mode: self.mode,
            global_capacity_max: self.global_capacity_max,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cycle_id: "default".to_string(),
            mode: QuotaMode::Blocking,
            global_capacity_max: None,
            quotas_csv: None,
            criteria_csv: None,
        }
    }
}

fn optional_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidMode(String),
    InvalidGlobalCap,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidMode(value) => {
                write!(f, "ADMISSION_MODE must be 'open' or 'blocking' (found '{value}')")
            }
            ConfigError::InvalidGlobalCap => {
                write!(f, "ADMISSION_GLOBAL_CAP must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidMode(_)
            | ConfigError::InvalidGlobalCap => None,
        }
    }
}
