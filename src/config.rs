//! Configuration for the swarm treasury core.
//!
//! A `clap::Parser` CLI surface points at a JSON config file, and a
//! `LiteralOrEnv<T>` wrapper lets individual fields (the HD seed, provider
//! API keys) be a literal value or a `$VAR`/`${VAR}` environment variable
//! reference resolved at deserialize time. Nothing here is read at
//! static-init time: `Config::load()` is the single, explicit entry point,
//! and the chain registry is constructed from its own environment reads
//! immediately after, not before.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI arguments shared by every subcommand in `main.rs`.
#[derive(Parser, Debug)]
#[command(name = "swarm-core")]
#[command(about = "Multi-chain agent swarm treasury, bridge, identity and request-signing core")]
pub struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Derive the N main agent wallets from the configured seed.
    DeriveWallets {
        #[arg(long, default_value_t = 24)]
        count: u32,
        #[arg(long, default_value = "wallets.json")]
        out: PathBuf,
    },
    /// Derive relay wallets (index + 100) for every wallet in a manifest.
    DeriveRelays {
        #[arg(long, default_value = "wallets.json")]
        wallets: PathBuf,
        #[arg(long, default_value = "relay-wallets.json")]
        out: PathBuf,
    },
    /// Compute (but do not execute) an allocation plan.
    Plan {
        #[arg(long, default_value = "wallets.json")]
        wallets: PathBuf,
        #[arg(long, default_value = "allocation.json")]
        out: PathBuf,
        /// Source chain the distribution bridges out from.
        #[arg(long)]
        source_chain: String,
        /// JSON file mapping chain short-name to a USD budget string, e.g.
        /// `{"base": "28.00", "polygon": "10.00"}`.
        #[arg(long)]
        budgets: PathBuf,
        /// Native-gas amount to seed per agent per chain.
        #[arg(long, default_value = "0.001")]
        gas_per_agent: String,
        #[arg(long)]
        seed: Option<u32>,
    },
    /// Execute a previously computed allocation plan.
    Distribute {
        #[arg(long, default_value = "allocation.json")]
        plan: PathBuf,
    },
    /// Sweep all agent wallets back to a recovery address.
    Sweep {
        #[arg(long, default_value = "wallets.json")]
        wallets: PathBuf,
        #[arg(long)]
        recovery_address: String,
    },
    /// Bridge funds between two chains.
    Bridge {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        token: String,
        #[arg(long)]
        amount: String,
    },
    /// Register every agent with the identity service.
    Register {
        #[arg(long, default_value = "wallets.json")]
        wallets: PathBuf,
        #[arg(long, default_value = "identities.json")]
        journal: PathBuf,
        /// Networks (chain short-names) to register on-chain identities for.
        #[arg(long, value_delimiter = ',')]
        networks: Vec<String>,
        #[arg(long, default_value = "reports")]
        report_dir: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Run the ERC-8128 verifier as an HTTP service.
    ServeVerifier,
}

/// A transparent wrapper that resolves environment variables during
/// deserialization. Supports literal values and `$VAR` / `${VAR}` references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if s.starts_with("${") && s.ends_with('}') {
            Some(s[2..s.len() - 1].to_string())
        } else if s.starts_with('$') && s.len() > 1 {
            let var_name = &s[1..];
            if var_name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                Some(var_name.to_string())
            } else {
                None
            }
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{}' not found (referenced as '{}')",
                    var_name, s
                ))
            })?
        } else {
            s
        };
        let parsed = value
            .parse::<T>()
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {}", e)))?;
        Ok(LiteralOrEnv(parsed))
    }
}

impl<T> Serialize for LiteralOrEnv<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// A bare string, usable as the target type of `LiteralOrEnv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringValue(pub String);

impl FromStr for StringValue {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StringValue(s.to_string()))
    }
}

impl Deref for StringValue {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Identity service connection details.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityServiceConfig {
    pub base_url: String,
    #[serde(default = "identity_defaults::default_throttle_ms")]
    pub throttle_ms: u64,
}

mod identity_defaults {
    pub fn default_throttle_ms() -> u64 {
        2000
    }
}

/// Bridge provider connection details (deBridge, Squid).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BridgeProvidersConfig {
    #[serde(default)]
    pub debridge_base_url: Option<String>,
    #[serde(default)]
    pub debridge_api_key: Option<LiteralOrEnv<StringValue>>,
    #[serde(default)]
    pub squid_base_url: Option<String>,
    #[serde(default)]
    pub squid_integrator_id: Option<LiteralOrEnv<StringValue>>,
    #[serde(default = "bridge_defaults::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "bridge_defaults::default_timeout_secs")]
    pub timeout_secs: u64,
}

mod bridge_defaults {
    pub fn default_poll_interval_secs() -> u64 {
        7
    }
    pub fn default_timeout_secs() -> u64 {
        300
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// BIP-39 mnemonic the HD Wallet Ledger derives every agent key from.
    /// Typically `$SEED_MNEMONIC` so the literal phrase never lands in
    /// `config.json` on disk.
    pub hd_seed_mnemonic: LiteralOrEnv<StringValue>,
    #[serde(default = "config_defaults::default_port")]
    pub verifier_port: u16,
    #[serde(default)]
    pub identity_service: Option<IdentityServiceConfig>,
    #[serde(default)]
    pub bridge_providers: BridgeProvidersConfig,
    #[serde(default = "config_defaults::default_min_per_agent")]
    pub min_per_agent_usd: String,
    #[serde(default = "config_defaults::default_multiplier_range")]
    pub multiplier_range: (f64, f64),
}

mod config_defaults {
    pub fn default_port() -> u16 {
        8443
    }
    pub fn default_min_per_agent() -> String {
        "0.10".to_string()
    }
    pub fn default_multiplier_range() -> (f64, f64) {
        (0.3, 1.7)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    /// Loads configuration from CLI arguments and the referenced JSON file.
    pub fn load() -> Result<(Self, CliArgs), ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config.clone(), e))?;
        let config = Self::load_from_path(config_path)?;
        Ok((config, cli_args))
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
