//! Typed configuration, loaded with the `config` crate the way the
//! teacher's `main.rs` expects (`mod config; use config::AppConfig;`,
//! `AppConfig::new()`, and a `Default` impl mutated field-by-field in
//! tests). The teacher's own `config.rs` was not present in the retrieved
//! sources, so the nested-table shape (`app`, plus one table per external
//! collaborator) is reconstructed from `main.rs`'s field accesses
//! (`config.app.log_level`, `config.kafka.brokers`, `config.fhir`) and
//! carried over with the transport tables SPEC_FULL §6 needs instead.

use serde_derive::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct App {
    pub log_level: String,
    pub app_name: String,
    pub graceful_shutdown_timeout_seconds: u64,
    /// MSH-4/PID-3.4 authority name this gateway generates outbound messages
    /// under when it, rather than the originating sender, is the identifier
    /// assigning authority (C7's generated CX fields).
    pub namespace_authority: String,
    pub namespace_oid: String,
}

impl Default for App {
    fn default() -> Self {
        App {
            log_level: "info".to_string(),
            app_name: "pam-fr-gateway".to_string(),
            graceful_shutdown_timeout_seconds: 10,
            namespace_authority: "PAMFR".to_string(),
            namespace_oid: "1.2.250.1.999.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MllpListener {
    pub bind_address: String,
}

impl Default for MllpListener {
    fn default() -> Self {
        MllpListener {
            bind_address: "0.0.0.0:2575".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEndpoint {
    pub name: String,
    pub inbox_dir: String,
    pub processing_dir: String,
    pub archive_dir: String,
    pub error_dir: String,
    #[serde(default = "default_file_extensions")]
    pub extensions: Vec<String>,
}

fn default_file_extensions() -> Vec<String> {
    vec!["hl7".to_string(), "txt".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pam {
    /// spec.md §6 `strict_pam_fr`: globally disables A08.
    pub strict_pam_fr: bool,
    pub allow_implicit_namespaces: bool,
    pub emission_concurrency: usize,
    pub ack_timeout_seconds: u64,
    pub socket_idle_timeout_seconds: u64,
    pub sequence_cache_size: u64,
    pub circuit_breaker_error_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
    pub max_frame_bytes: usize,
    pub poll_interval_seconds: u64,
    pub mllp_listeners: Vec<MllpListener>,
    pub file_endpoints: Vec<FileEndpoint>,
}

impl Default for Pam {
    fn default() -> Self {
        Pam {
            strict_pam_fr: false,
            allow_implicit_namespaces: true,
            emission_concurrency: 5,
            ack_timeout_seconds: 30,
            socket_idle_timeout_seconds: 60,
            sequence_cache_size: 100,
            circuit_breaker_error_threshold: 20,
            circuit_breaker_cooldown_seconds: 60,
            max_frame_bytes: 1024 * 1024,
            poll_interval_seconds: 5,
            mllp_listeners: vec![MllpListener::default()],
            file_endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: App,
    pub pam: Pam,
}

impl AppConfig {
    /// Merges `config/default.toml` (if present) with `PAMFR_`-prefixed
    /// environment overrides, mirroring the layering `diz-unimr`'s
    /// `AppConfig::new()` performs over its Kafka/Fhir tables.
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("PAMFR").separator("__"));
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = AppConfig::default();
        assert!(!cfg.pam.strict_pam_fr);
        assert_eq!(cfg.pam.emission_concurrency, 5);
        assert_eq!(cfg.pam.ack_timeout_seconds, 30);
        assert_eq!(cfg.pam.socket_idle_timeout_seconds, 60);
        assert_eq!(cfg.pam.sequence_cache_size, 100);
        assert_eq!(cfg.app.log_level, "info");
    }
}
