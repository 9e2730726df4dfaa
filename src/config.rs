//! Bootstrap configuration: ports, data directory, timeouts, logging.
//!
//! This is deliberately narrow — operator-visible state (providers,
//! models, credentials, settings) lives in the database (§3, §4.5) and
//! is reached through the control plane, not this file. `Config` only
//! holds what a process needs before it can open that database.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// A value that is either given literally or sourced from an
/// environment variable at load time. Lets a config file be committed
/// without embedding a live secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretRef {
    Literal(String),
    FromEnv { #[serde(rename = "fromEnv")] from_env: String },
}

impl SecretRef {
    pub fn resolve(&self) -> anyhow::Result<String> {
        match self {
            SecretRef::Literal(v) => Ok(v.clone()),
            SecretRef::FromEnv { from_env } => std::env::var(from_env)
                .with_context(|| format!("secret env var `{from_env}` is not set")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub port: u16,
    pub bridge_port: u16,
    pub control_plane_port: u16,
    pub host: String,
    pub timeout_ms: u64,
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            bridge_port: 8082,
            control_plane_port: 8080,
            host: "127.0.0.1".to_string(),
            timeout_ms: 120_000,
            cors_origin: "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionConfig {
    pub timeout_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30 * 60 * 1000,
            cleanup_interval_ms: 10 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// A provider to seed into the database on first boot (§10.2). Config
/// values that are secrets (API keys) are given as a [`SecretRef`] so the
/// file itself can be committed without embedding a live credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBootstrap {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, SecretRef>,
    /// Model ids this provider should be linked to at boot.
    #[serde(default)]
    pub models: Vec<String>,
}

/// A model to seed into the database on first boot, alongside
/// [`ProviderBootstrap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBootstrap {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub database_path: Option<String>,
    pub bootstrap_providers: Vec<ProviderBootstrap>,
    pub bootstrap_models: Vec<ModelBootstrap>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            database_path: None,
            bootstrap_providers: Vec::new(),
            bootstrap_models: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to a freshly written default file
    /// when none exists, then apply env-var overrides (§6.5).
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read config: {}", path.display()))?;
            serde_yaml_ng::from_str(&raw).with_context(|| format!("parse config: {}", path.display()))?
        } else {
            let config = Config::default();
            config.save(path).await?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(p) = std::env::var("PORT").or_else(|_| std::env::var("API_PORT")) {
            if let Ok(p) = p.parse() {
                self.server.port = p;
            }
        }
        if let Ok(origin) = std::env::var("CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.database_path = Some(path);
        }
        if let Ok(ms) = std::env::var("SESSION_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()) {
            self.session.timeout_ms = ms;
        }
        if let Ok(ms) = std::env::var("SESSION_CLEANUP_INTERVAL_MS").ok().and_then(|v| v.parse().ok()) {
            self.session.cleanup_interval_ms = ms;
        }
        if let Ok(ms) = std::env::var("REQUEST_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()) {
            self.server.timeout_ms = ms;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate every field, collecting every violation rather than
    /// bailing on the first (§10.2).
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be 1-65535".to_string());
        }
        if !(1000..=600_000).contains(&self.server.timeout_ms) {
            errors.push("server.timeout must be 1000-600000 ms".to_string());
        }
        if !matches!(self.logging.level.as_str(), "debug" | "info" | "warn" | "error") {
            errors.push(format!(
                "logging.level must be one of debug|info|warn|error, got `{}`",
                self.logging.level
            ));
        }
        if !is_valid_host(&self.server.host) {
            errors.push(format!("server.host `{}` is not a valid IPv4 address or hostname", self.server.host));
        }

        let mut seen_provider_ids = HashSet::new();
        for p in &self.bootstrap_providers {
            if !seen_provider_ids.insert(p.id.as_str()) {
                errors.push(format!("duplicate provider id `{}` in bootstrap_providers", p.id));
            }
        }
        let mut seen_model_ids = HashSet::new();
        for m in &self.bootstrap_models {
            if !seen_model_ids.insert(m.id.as_str()) {
                errors.push(format!("duplicate model id `{}` in bootstrap_models", m.id));
            }
        }
        let known_model_ids: HashSet<&str> = self.bootstrap_models.iter().map(|m| m.id.as_str()).collect();
        for p in &self.bootstrap_providers {
            for model_id in &p.models {
                if !known_model_ids.contains(model_id.as_str()) {
                    errors.push(format!("provider `{}` links dangling model id `{model_id}` (not in bootstrap_models)", p.id));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("config validation failed:\n  - {}", errors.join("\n  - "))
        }
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create config dir: {}", parent.display()))?;
        }
        let yaml = serde_yaml_ng::to_string(self).context("serialize config")?;
        tokio::fs::write(path, yaml)
            .await
            .with_context(|| format!("write config: {}", path.display()))
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) => PathBuf::from(p),
            None => data_dir.join("gateway.sqlite3"),
        }
    }
}

/// Seed `bootstrap_providers`/`bootstrap_models` into the database on
/// first boot (§10.2). Rows that already exist (matched by id) are left
/// alone — once an operator has started editing through the control
/// plane, the database is the source of truth, not this file.
pub fn apply_bootstrap(config: &Config, db: &crate::db::Db) -> anyhow::Result<()> {
    use crate::db::{models as models_repo, providers as providers_repo};

    for m in &config.bootstrap_models {
        let exists = db.with_conn(|c| models_repo::get(c, &m.id))?.is_some();
        if !exists {
            db.with_conn(|c| models_repo::create(c, &m.id, &m.name, m.description.as_deref(), &m.capabilities))?;
        }
    }

    for p in &config.bootstrap_providers {
        let exists = db.with_conn(|c| providers_repo::get(c, &p.id))?.is_some();
        if !exists {
            db.with_conn(|c| providers_repo::create(c, &p.id, &p.name, &p.kind, p.priority, p.description.as_deref()))?;
        }
        for (key, secret) in &p.config {
            let value = secret.resolve().with_context(|| format!("resolve config key `{key}` for bootstrap provider `{}`", p.id))?;
            let is_sensitive = key == "apiKey";
            db.with_conn(|c| providers_repo::set_config(c, &p.id, key, &value, is_sensitive))?;
        }
        for model_id in &p.models {
            db.with_conn(|c| models_repo::link(c, &p.id, model_id, false))?;
        }
    }

    Ok(())
}

pub fn is_valid_host(host: &str) -> bool {
    if host.split('.').count() == 4 {
        return host.split('.').all(|octet| octet.parse::<u16>().map(|n| n <= 255).unwrap_or(false));
    }
    !host.is_empty() && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}

/// Default data directory: `GATEWAY_HOME` env var, else `$HOME/.llm-gateway`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(p) = std::env::var("GATEWAY_HOME") {
        PathBuf::from(p)
    } else {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".llm-gateway")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_writes_default_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        let config = Config::load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.server.port, 8081);
    }

    #[test]
    fn validate_rejects_bad_port() {
        let mut c = Config::default();
        c.server.port = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_log_level() {
        let mut c = Config::default();
        c.logging.level = "verbose".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut c = Config::default();
        c.server.port = 0;
        c.logging.level = "verbose".to_string();
        let err = c.validate().unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("server.port"));
        assert!(msg.contains("logging.level"));
    }

    #[test]
    fn secret_ref_resolves_env() {
        std::env::set_var("LLM_GATEWAY_TEST_SECRET", "sk-test");
        let s = SecretRef::FromEnv { from_env: "LLM_GATEWAY_TEST_SECRET".to_string() };
        assert_eq!(s.resolve().unwrap(), "sk-test");
    }

    fn bootstrap_provider(id: &str, models: &[&str]) -> ProviderBootstrap {
        ProviderBootstrap {
            id: id.to_string(),
            name: id.to_string(),
            kind: "local-openai-compatible".to_string(),
            priority: 0,
            description: None,
            config: HashMap::new(),
            models: models.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn validate_rejects_duplicate_bootstrap_provider_ids() {
        let mut c = Config::default();
        c.bootstrap_providers = vec![bootstrap_provider("p1", &[]), bootstrap_provider("p1", &[])];
        let err = format!("{}", c.validate().unwrap_err());
        assert!(err.contains("duplicate provider id `p1`"));
    }

    #[test]
    fn validate_rejects_dangling_provider_model_link() {
        let mut c = Config::default();
        c.bootstrap_providers = vec![bootstrap_provider("p1", &["ghost-model"])];
        let err = format!("{}", c.validate().unwrap_err());
        assert!(err.contains("dangling model id `ghost-model`"));
    }

    #[test]
    fn validate_accepts_provider_linked_to_declared_model() {
        let mut c = Config::default();
        c.bootstrap_models = vec![ModelBootstrap { id: "m1".to_string(), name: "M1".to_string(), description: None, capabilities: vec![] }];
        c.bootstrap_providers = vec![bootstrap_provider("p1", &["m1"])];
        assert!(c.validate().is_ok());
    }

    #[tokio::test]
    async fn apply_bootstrap_seeds_providers_models_and_resolved_secrets() {
        let tmp = tempfile::tempdir().unwrap();
        let db = crate::db::Db::open(&tmp.path().join("t.sqlite3")).unwrap();

        std::env::set_var("LLM_GATEWAY_BOOTSTRAP_KEY", "sk-bootstrap");
        let mut provider = bootstrap_provider("p1", &["m1"]);
        provider.config.insert("baseURL".to_string(), SecretRef::Literal("http://127.0.0.1:9999/v1".to_string()));
        provider.config.insert("apiKey".to_string(), SecretRef::FromEnv { from_env: "LLM_GATEWAY_BOOTSTRAP_KEY".to_string() });

        let mut c = Config::default();
        c.bootstrap_models = vec![ModelBootstrap { id: "m1".to_string(), name: "M1".to_string(), description: None, capabilities: vec![] }];
        c.bootstrap_providers = vec![provider];

        apply_bootstrap(&c, &db).unwrap();

        let cfg = db.with_conn(|conn| crate::db::providers::get_config(conn, "p1")).unwrap();
        let api_key = cfg.iter().find(|e| e.key == "apiKey").unwrap();
        assert_eq!(api_key.value, "sk-bootstrap");
        assert!(api_key.is_sensitive);

        let models = db.with_conn(|conn| crate::db::models::list(conn, None, Some("p1"))).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "m1");

        // Re-applying is idempotent: it does not fail on the already-present rows.
        apply_bootstrap(&c, &db).unwrap();
    }
}
