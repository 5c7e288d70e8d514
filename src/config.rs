//! Command line arguments and layered configuration.
//!
//! Settings are merged in this order, later sources winning:
//!
//! 1. built-in defaults
//! 2. YAML file (`--config`, `SAPLIY_CONFIG`, or `$HOME/.sapliy.yaml`; a missing file is skipped)
//! 3. `SAPLIY_*` environment variables (`SAPLIY_API_KEY`, `SAPLIY_API_URL`, `SAPLIY_ORG_ID`,
//!    `SAPLIY_ZONE`, `SAPLIY_WEBHOOK_SECRET`)
//!
//! The merged [`Config`] is built once in `main` and turned into the explicit
//! [`ListenerSettings`] / [`PollerSettings`] values each entry point takes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use figment::{
    providers::{Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{Error, Result};
use crate::pattern::EventPattern;

pub const DEFAULT_LISTEN_PORT: u16 = 3000;
pub const DEFAULT_API_URL: &str = "https://api.sapliy.io";
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const PAGE_LIMIT: u32 = 10;

const CONFIG_FILE_NAME: &str = ".sapliy.yaml";

/// Environment variables and the config keys they override. Values are taken
/// verbatim, so a secret like `12345` or `1e10` stays a string.
const ENV_KEYS: [(&str, &str); 5] = [
    ("SAPLIY_API_KEY", "api_key"),
    ("SAPLIY_API_URL", "api_url"),
    ("SAPLIY_ORG_ID", "org_id"),
    ("SAPLIY_ZONE", "current_zone"),
    ("SAPLIY_WEBHOOK_SECRET", "webhook_secret"),
];

#[derive(Parser, Debug)]
#[command(name = "sapliy", author, version, about = "Sapliy Fintech Ecosystem CLI")]
pub struct Args {
    /// Config file (default is $HOME/.sapliy.yaml)
    #[arg(long, global = true, env = "SAPLIY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start local webhook listener for debugging
    ///
    /// Examples:
    ///   sapliy listen                 # all events
    ///   sapliy listen 'payment.*'     # payment events only
    ///   sapliy listen --port 3001     # custom port
    Listen(ListenArgs),

    /// Debug and inspect flows in real-time
    Debug {
        #[command(subcommand)]
        command: DebugCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum DebugCommand {
    /// Listen to the real-time event stream via HTTP polling
    Listen(DebugListenArgs),
}

#[derive(clap::Args, Debug)]
pub struct ListenArgs {
    /// Event type filter: `*`, `prefix.*`, or an exact type
    #[arg(default_value = "*")]
    pub pattern: EventPattern,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,
}

#[derive(clap::Args, Debug)]
pub struct DebugListenArgs {
    /// Zone ID to filter events (overrides the configured zone)
    #[arg(short, long)]
    pub zone: Option<String>,

    /// Show full event payloads
    #[arg(short, long)]
    pub verbose: bool,

    /// Only show events whose type matches: `*`, `prefix.*`, or an exact type
    #[arg(short, long)]
    pub filter: Option<EventPattern>,
}

/// Values read from the config file and environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "scalar_string")]
    pub api_key: Option<String>,
    #[serde(deserialize_with = "scalar_string_or_empty")]
    pub api_url: String,
    #[serde(deserialize_with = "scalar_string")]
    pub org_id: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub current_zone: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub webhook_secret: Option<String>,
}

/// Accept any YAML scalar where a string is expected; an unquoted
/// `api_key: 123456` still means the string "123456".
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        String(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::String(s) => s,
        Scalar::Unsigned(n) => n.to_string(),
        Scalar::Signed(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

fn scalar_string_or_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_string(deserializer).map(Option::unwrap_or_default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            org_id: None,
            current_zone: None,
            webhook_secret: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from `$HOME/.sapliy.yaml` when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let config: Config = Self::figment(&path)
            .extract()
            .map_err(|e| Error::Config(Box::new(e)))?;
        tracing::debug!(path = %path.display(), api_url = %config.api_url, "configuration loaded");
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path));

        ENV_KEYS.iter().fold(figment, |figment, (var, key)| match std::env::var(var) {
            Ok(value) => figment.merge(Serialized::default(key, value)),
            Err(_) => figment,
        })
    }
}

fn default_config_path() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
        .ok_or(Error::HomeDirUnavailable)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Everything the webhook listener needs.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub port: u16,
    pub pattern: EventPattern,
    /// Empty when verification is disabled.
    pub secret: String,
}

impl ListenerSettings {
    pub fn new(config: &Config, args: &ListenArgs) -> Self {
        Self {
            port: args.port,
            pattern: args.pattern.clone(),
            secret: config.webhook_secret.clone().unwrap_or_default(),
        }
    }

    pub fn verification_enabled(&self) -> bool {
        !self.secret.is_empty()
    }
}

/// Everything the event poller needs.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub api_url: String,
    pub api_key: String,
    pub zone: Option<String>,
    pub filter: Option<EventPattern>,
    pub verbose: bool,
    pub interval: Duration,
    pub timeout: Duration,
    pub limit: u32,
}

impl PollerSettings {
    pub fn new(config: &Config, args: &DebugListenArgs) -> Result<Self> {
        let api_key = non_empty(config.api_key.as_ref()).ok_or(Error::MissingApiKey)?;
        let api_url = if config.api_url.is_empty() {
            DEFAULT_API_URL.to_string()
        } else {
            config.api_url.clone()
        };

        Ok(Self {
            api_url,
            api_key,
            zone: non_empty(args.zone.as_ref()).or_else(|| non_empty(config.current_zone.as_ref())),
            filter: args.filter.clone(),
            verbose: args.verbose,
            interval: POLL_INTERVAL,
            timeout: REQUEST_TIMEOUT,
            limit: PAGE_LIMIT,
        })
    }
}
