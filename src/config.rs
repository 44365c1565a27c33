use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level gateway configuration, built once at startup and passed down to
/// every component by reference. No module reads the environment after load.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub chain: ChainConfig,
    pub canister: CanisterConfig,
    pub llm: LlmConfig,
    pub rate_limits: RateLimitsConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Empty string means open admission (no API key required).
    pub api_key: String,
    /// Exact origins for the CORS allow-list. `*` is only legal when
    /// `api_key` is unset.
    pub allowed_origins: Vec<String>,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub signer_key: String,
    pub contract_address: String,
    pub confirmations: u64,
    pub submit_timeout_secs: u64,
    pub receipt_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CanisterConfig {
    pub canister_id: String,
    pub ic_url: String,
    /// Embedding service base URL; the vector client posts to
    /// `{embedding_api}/late-chunking`.
    pub embedding_api: String,
    /// PEM-encoded identity key (SEC1 or PKCS#8).
    pub identity_pem: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub context_token_budget: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub insert_per_minute: u32,
    pub search_per_minute: u32,
    pub chat_per_minute: u32,
    pub refresh_per_minute: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub refresh_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            api_key: String::new(),
            allowed_origins: Vec::new(),
            log_level: "info".into(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://testnet-rpc.monad.xyz".into(),
            signer_key: String::new(),
            contract_address: String::new(),
            confirmations: 1,
            submit_timeout_secs: 15,
            receipt_timeout_secs: 20,
        }
    }
}

impl Default for CanisterConfig {
    fn default() -> Self {
        Self {
            canister_id: String::new(),
            ic_url: "https://ic0.app".into(),
            embedding_api: "https://api.kinic.io".into(),
            identity_pem: String::new(),
            timeout_secs: 8,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-3-haiku-20240307".into(),
            max_tokens: 1024,
            context_token_budget: 4000,
            timeout_secs: 20,
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            insert_per_minute: 20,
            search_per_minute: 30,
            chat_per_minute: 10,
            refresh_per_minute: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Returns the configured API key, or `None` for open admission.
    pub fn api_key(&self) -> Option<&str> {
        if self.api_key.is_empty() {
            None
        } else {
            Some(&self.api_key)
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file (if it exists) then apply env var overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment overrides for secrets and deploy-time settings, applied
    /// after the file so an operator never has to write keys to disk.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MEMGATE_API_KEY") {
            self.server.api_key = val;
        }
        if let Ok(val) = std::env::var("MEMGATE_LOG") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MONAD_RPC_URL") {
            self.chain.rpc_url = val;
        }
        if let Ok(val) = std::env::var("MONAD_SIGNER_KEY") {
            self.chain.signer_key = val;
        }
        if let Ok(val) = std::env::var("MONAD_CONTRACT_ADDRESS") {
            self.chain.contract_address = val;
        }
        if let Ok(val) = std::env::var("KINIC_CANISTER_ID") {
            self.canister.canister_id = val;
        }
        if let Ok(val) = std::env::var("IC_IDENTITY_PEM") {
            self.canister.identity_pem = val;
        }
        if let Ok(val) = std::env::var("ANTHROPIC_API_KEY") {
            self.llm.api_key = val;
        }
    }

    /// Structural validation, independent of whether backends are reachable.
    pub fn validate(&self) -> Result<()> {
        if self.server.api_key().is_some()
            && self.server.allowed_origins.iter().any(|o| o == "*")
        {
            anyhow::bail!("allowed_origins may not contain '*' when an API key is configured");
        }
        let limits = &self.rate_limits;
        for (name, value) in [
            ("insert_per_minute", limits.insert_per_minute),
            ("search_per_minute", limits.search_per_minute),
            ("chat_per_minute", limits.chat_per_minute),
            ("refresh_per_minute", limits.refresh_per_minute),
        ] {
            if value == 0 {
                anyhow::bail!("rate_limits.{} must be >= 1", name);
            }
        }
        if self.cache.refresh_interval_secs == 0 {
            anyhow::bail!("cache.refresh_interval_secs must be >= 1");
        }
        Ok(())
    }

    /// Validation for `serve`: every backend must be configured.
    pub fn validate_for_serve(&self) -> Result<()> {
        self.validate()?;
        if self.chain.signer_key.is_empty() {
            anyhow::bail!("chain.signer_key is required (or set MONAD_SIGNER_KEY)");
        }
        if self.chain.contract_address.is_empty() {
            anyhow::bail!("chain.contract_address is required (or set MONAD_CONTRACT_ADDRESS)");
        }
        if self.canister.canister_id.is_empty() {
            anyhow::bail!("canister.canister_id is required (or set KINIC_CANISTER_ID)");
        }
        if self.canister.identity_pem.is_empty() {
            anyhow::bail!("canister.identity_pem is required (or set IC_IDENTITY_PEM)");
        }
        if self.llm.api_key.is_empty() {
            anyhow::bail!("llm.api_key is required (or set ANTHROPIC_API_KEY)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.api_key(), None);
        assert_eq!(config.rate_limits.insert_per_minute, 20);
        assert_eq!(config.rate_limits.chat_per_minute, 10);
        assert_eq!(config.cache.refresh_interval_secs, 30);
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:9000"
api_key = "secret"
allowed_origins = ["https://memory.example.com"]

[chain]
rpc_url = "https://rpc.example.com"
confirmations = 2

[rate_limits]
chat_per_minute = 4
"#;
        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.api_key(), Some("secret"));
        assert_eq!(config.chain.confirmations, 2);
        assert_eq!(config.rate_limits.chat_per_minute, 4);
        // defaults still apply for unset fields
        assert_eq!(config.rate_limits.search_per_minute, 30);
        assert_eq!(config.llm.model, "claude-3-haiku-20240307");
    }

    #[test]
    fn wildcard_origin_forbidden_with_api_key() {
        let mut config = GatewayConfig::default();
        config.server.allowed_origins = vec!["*".into()];
        config.validate().unwrap();

        config.server.api_key = "secret".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rate_limit_rejected() {
        let mut config = GatewayConfig::default();
        config.rate_limits.search_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_backends_rejected_for_serve() {
        let config = GatewayConfig::default();
        assert!(config.validate_for_serve().is_err());
    }
}
