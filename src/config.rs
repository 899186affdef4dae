use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

/// Minimum signing-secret length accepted outside demo mode.
pub const MIN_TOKEN_SECRET_LEN: usize = 32;

/// Which persistence adapter backs stories and users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sheets,
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Sheets => "sheets",
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

/// Which Pesapal host payments are sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PesapalEnvironment {
    #[default]
    Demo,
    Production,
}

impl PesapalEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            PesapalEnvironment::Demo => "https://demo.pesapal.com",
            PesapalEnvironment::Production => "https://www.pesapal.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PesapalEnvironment::Demo => "demo",
            PesapalEnvironment::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetsSettings {
    pub spreadsheet_id: String,
    /// Service-account JSON. When unset, `gcp_auth` falls back to its
    /// default provider chain (`GOOGLE_APPLICATION_CREDENTIALS`, metadata server).
    pub credentials_path: Option<String>,
    pub stories_sheet: String,
    pub users_sheet: String,
}

impl Default for SheetsSettings {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            credentials_path: None,
            stories_sheet: "Stories".into(),
            users_sheet: "Users".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub token_secret: String,
    pub token_ttl_secs: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_ttl_secs: 8 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PesapalSettings {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub environment: PesapalEnvironment,
    pub callback_url: String,
}

/// Service configuration.
///
/// Layered lowest to highest: built-in defaults, the optional TOML file,
/// then `HEARTH__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub environment: String,
    pub demo_mode: bool,
    pub storage: StorageSettings,
    pub sheets: SheetsSettings,
    pub postgres: PostgresSettings,
    pub auth: AuthSettings,
    pub pesapal: PesapalSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            environment: "development".into(),
            demo_mode: false,
            storage: StorageSettings::default(),
            sheets: SheetsSettings::default(),
            postgres: PostgresSettings::default(),
            auth: AuthSettings::default(),
            pesapal: PesapalSettings::default(),
        }
    }
}

impl Settings {
    /// Load from `path` (if it exists) and the environment, then validate.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("HEARTH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.storage.backend {
            StorageBackend::Sheets if self.sheets.spreadsheet_id.trim().is_empty() => {
                bail!("sheets.spreadsheet_id is required for the sheets backend")
            }
            StorageBackend::Postgres if self.postgres.url.trim().is_empty() => {
                bail!("postgres.url is required for the postgres backend")
            }
            _ => {}
        }

        if !self.demo_mode && self.auth.token_secret.len() < MIN_TOKEN_SECRET_LEN {
            bail!(
                "auth.token_secret must be at least {} bytes",
                MIN_TOKEN_SECRET_LEN
            );
        }

        if self.auth.token_ttl_secs <= 0 {
            bail!("auth.token_ttl_secs must be positive");
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auth.token_ttl_secs)
    }
}
