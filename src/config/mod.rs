//! Process configuration.
//!
//! Non-secret settings come from an optional TOML file (`CALGATE_CONFIG`) and
//! can be overridden by environment variables. Secrets only come from the
//! environment and are startup-fatal when missing or malformed.

use crate::credentials::{validate_key, EncryptionKey};
use crate::oauth::{ProviderConfig, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL};
use crate::session::SigningKey;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// Non-secret settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalgateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite database path
    #[serde(default = "default_database")]
    pub database: String,
    /// Front-end origin allowed by CORS
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_port() -> u16 {
    8080
}

fn default_database() -> String {
    "calgate.db".to_string()
}

fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            database: default_database(),
            cors_origin: default_cors_origin(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,
    /// `postmessage` for popup-based consent
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_userinfo_url() -> String {
    GOOGLE_USERINFO_URL.to_string()
}

fn default_redirect_uri() -> String {
    "postmessage".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            userinfo_url: default_userinfo_url(),
            redirect_uri: default_redirect_uri(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Folder creation endpoint of the storage service
    #[serde(default = "default_workspace_url")]
    pub url: String,
}

fn default_workspace_url() -> String {
    "http://localhost:8081/storage/folder".to_string()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            url: default_workspace_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Upper bound on one provider refresh call (seconds)
    #[serde(default = "default_refresh_timeout_secs")]
    pub timeout_secs: u64,
    /// Serialize concurrent refreshes of the same identity
    #[serde(default)]
    pub dedupe: bool,
}

/// Timeout of outbound calls that have no dedicated setting
pub const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 10;

fn default_refresh_timeout_secs() -> u64 {
    DEFAULT_OUTBOUND_TIMEOUT_SECS
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_refresh_timeout_secs(),
            dedupe: false,
        }
    }
}

/// Process-wide secrets, loaded once and passed explicitly to constructors.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub encryption_key: EncryptionKey,
    pub signing_key: SigningKey,
}

/// Everything `main` needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings: CalgateConfig,
    pub secrets: Secrets,
    pub provider: ProviderConfig,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match lookup("CALGATE_CONFIG") {
            Some(path) => load_config(&path)?,
            None => CalgateConfig::default(),
        };
        apply_env_overrides(&mut settings, &lookup)?;

        check_http_url("token URL", &settings.provider.token_url)?;
        check_http_url("user info URL", &settings.provider.userinfo_url)?;
        check_http_url("workspace URL", &settings.workspace.url)?;

        if settings.refresh.timeout_secs == 0 {
            bail!("CALGATE_REFRESH_TIMEOUT_SECS must be greater than zero");
        }

        let encryption_key = validate_key(&require(&lookup, "CALGATE_ENCRYPTION_KEY")?)
            .context("CALGATE_ENCRYPTION_KEY must be a base64-encoded 32-byte key")?;
        let signing_key = SigningKey::new(require(&lookup, "CALGATE_JWT_SECRET")?)
            .context("CALGATE_JWT_SECRET is invalid")?;

        let provider = ProviderConfig {
            token_url: settings.provider.token_url.clone(),
            userinfo_url: settings.provider.userinfo_url.clone(),
            redirect_uri: settings.provider.redirect_uri.clone(),
            client_id: require(&lookup, "CALGATE_GOOGLE_CLIENT_ID")?,
            client_secret: require(&lookup, "CALGATE_GOOGLE_CLIENT_SECRET")?,
        };

        Ok(Self {
            settings,
            secrets: Secrets {
                encryption_key,
                signing_key,
            },
            provider,
        })
    }

    pub fn refresh_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.settings.refresh.timeout_secs)
    }

    /// Per-request timeout of the provider HTTP client.
    ///
    /// Never shorter than the refresh timeout, otherwise the client would cut a
    /// refresh off before the manager's own bound is reached.
    pub fn provider_timeout(&self) -> std::time::Duration {
        self.refresh_timeout().max(std::time::Duration::from_secs(DEFAULT_OUTBOUND_TIMEOUT_SECS))
    }
}

/// Load non-secret settings from a TOML file
pub fn load_config(path: &str) -> Result<CalgateConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    toml::from_str(&contents).with_context(|| format!("Failed to parse config file '{}'", path))
}

fn apply_env_overrides<F>(settings: &mut CalgateConfig, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("CALGATE_PORT") {
        settings.server.port = port
            .parse()
            .context("CALGATE_PORT must be a valid port number")?;
    }
    if let Some(database) = lookup("CALGATE_DATABASE") {
        settings.server.database = database;
    }
    if let Some(origin) = lookup("CALGATE_CORS_ORIGIN") {
        settings.server.cors_origin = origin;
    }
    if let Some(url) = lookup("CALGATE_TOKEN_URL") {
        settings.provider.token_url = url;
    }
    if let Some(url) = lookup("CALGATE_USERINFO_URL") {
        settings.provider.userinfo_url = url;
    }
    if let Some(uri) = lookup("CALGATE_REDIRECT_URI") {
        settings.provider.redirect_uri = uri;
    }
    if let Some(url) = lookup("CALGATE_WORKSPACE_URL") {
        settings.workspace.url = url;
    }
    if let Some(secs) = lookup("CALGATE_REFRESH_TIMEOUT_SECS") {
        settings.refresh.timeout_secs = secs
            .parse()
            .context("CALGATE_REFRESH_TIMEOUT_SECS must be a whole number of seconds")?;
    }
    if let Some(flag) = lookup("CALGATE_DEDUPE_REFRESH") {
        settings.refresh.dedupe = parse_flag(&flag)
            .ok_or_else(|| anyhow!("CALGATE_DEDUPE_REFRESH must be true or false, got '{}'", flag))?;
    }
    Ok(())
}

fn require<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| anyhow!("{} is required", name))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn check_http_url(what: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value).with_context(|| format!("Invalid {} '{}'", what, value))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{} must use http or https, got '{}'", what, other),
    }
}
