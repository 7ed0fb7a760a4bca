/// This module is used to parse and read from configuration files for the
/// server.
use config::{Config, ConfigError, Environment, File};
use crate::auth::DEFAULT_SESSION_TTL;
use serde::Deserialize;

/// This configuration object contains the database config.
#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    /// Database url.
    pub url: String,
    /// Maximum number of connections to the database.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Where the HTTP server listens.
#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    /// Interface to bind, e.g. `127.0.0.1`.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for Server {
    fn default() -> Self {
        Server {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where session records are kept.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// The `sessions` table, survives restarts.
    #[default]
    Postgres,
    /// Process memory.
    Memory,
}

/// This configuration object contains the session config.
#[derive(Debug, Deserialize, Clone)]
pub struct Session {
    /// Name of the cookie carrying the session id.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Only send the cookie over https.
    #[serde(default)]
    pub secure: bool,
    /// Cookie lifetime. Without it the cookie lives as long as the browser
    /// session.
    pub max_age_secs: Option<u64>,
    /// Storage of the session records.
    #[serde(default)]
    pub backend: SessionBackend,
    /// Records expire this long after their last save.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// How often expired records are removed.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_cookie_name() -> String {
    "auth-demo.sid".to_string()
}

impl Default for Session {
    fn default() -> Self {
        Session {
            cookie_name: default_cookie_name(),
            secure: false,
            max_age_secs: None,
            backend: SessionBackend::default(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// The app wide settings
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BaseSettings {
    /// The rust log parameter. Describes how much logging is wanted.
    pub rust_log: Option<String>,
}

/// This structure contains all the config parameters of the app.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Settings related to the database.
    pub database: Database,
    /// Listening address.
    #[serde(default)]
    pub server: Server,
    /// Session cookie config.
    #[serde(default)]
    pub session: Session,
    /// The app-wide config.
    #[serde(default)]
    pub base: BaseSettings,
}

impl Settings {
    /// Creates a new configuration form config files and environment variables.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(".env").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("auth_demo")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        s.try_deserialize()
    }
}
