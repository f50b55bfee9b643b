//! Typed configuration option groups (spec.md §6 "Configuration").
//!
//! These structs are `Deserialize` so an external (out-of-scope) loader can
//! source them from files/env/CLI flags; this crate only provides defaults
//! and the small number of env var overrides the rest of the workspace
//! already reads directly (`CODEWEAVER_*`).

use std::net::IpAddr;

use codeweaver_chunker::{ChunkerConcurrencyConfig, ChunkerConfig, ChunkerPerformanceConfig};
use codeweaver_indexer::{IndexerConfig, ScanOptions};
use codeweaver_protocol::Setting;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub management_host: String,
    pub management_port: u16,
    pub transport: Transport,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7800,
            management_host: "127.0.0.1".to_string(),
            management_port: 7801,
            transport: Transport::Stdio,
        }
    }
}

impl ServerConfig {
    pub fn management_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let ip: IpAddr = self.management_host.parse()?;
        Ok(std::net::SocketAddr::new(ip, self.management_port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: Setting<String>,
    pub endpoint: Setting<String>,
    pub api_key_ref: Setting<String>,
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "onnx".to_string(),
            model: Setting::Absent,
            endpoint: Setting::Absent,
            api_key_ref: Setting::Absent,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderGroupConfig {
    pub embedding: ProviderConfig,
    pub sparse: ProviderConfig,
    pub reranker: ProviderConfig,
    pub vector_store: ProviderConfig,
}

impl Default for ProviderGroupConfig {
    fn default() -> Self {
        Self {
            embedding: ProviderConfig { provider: "onnx".to_string(), ..ProviderConfig::default() },
            sparse: ProviderConfig { provider: "hashing".to_string(), ..ProviderConfig::default() },
            reranker: ProviderConfig { provider: "lexical-overlap".to_string(), enabled: false, ..ProviderConfig::default() },
            vector_store: ProviderConfig { provider: "local-json".to_string(), ..ProviderConfig::default() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub enabled: bool,
    pub backup_profile: String,
    pub sync_back_batch_log_interval: usize,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backup_profile: "ephemeral".to_string(),
            sync_back_batch_log_interval: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerLifecycleConfig {
    pub auto_index_on_startup: bool,
    pub file_watching_enabled: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for IndexerLifecycleConfig {
    fn default() -> Self {
        Self {
            auto_index_on_startup: true,
            file_watching_enabled: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// All recognized option groups, combined (spec.md §6's configuration table).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub indexer: IndexerLifecycleConfig,
    pub chunker: ChunkerConfig,
    pub chunker_performance: ChunkerPerformanceConfig,
    pub chunker_concurrency: ChunkerConcurrencyConfig,
    pub providers: ProviderGroupConfig,
    pub failover: FailoverConfig,
}

impl AppConfig {
    /// Builds the `codeweaver-indexer` config for the project root this
    /// server is watching, folding in the indexer/chunker option groups.
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            scan: ScanOptions {
                include_patterns: self.indexer.include_patterns.clone(),
                exclude_patterns: self.indexer.exclude_patterns.clone(),
                ..ScanOptions::default()
            },
            chunker: self.chunker.clone(),
            ..IndexerConfig::default()
        }
    }
}

/// Redacts secret-shaped fields before a config snapshot is exposed over
/// `GET /settings` (spec.md §6).
pub fn redact_settings(config: &AppConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    if let Some(providers) = value.get_mut("providers") {
        for group in ["embedding", "sparse", "reranker", "vector_store"] {
            if let Some(api_key_ref) = providers.pointer_mut(&format!("/{group}/api_key_ref")) {
                if !api_key_ref.is_null() {
                    *api_key_ref = serde_json::json!("REDACTED");
                }
            }
        }
    }
    value
}
