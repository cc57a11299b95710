//! Top-level resolved settings (spec.md §6 "Environment inputs").
//!
//! Resolution order, highest precedence last: built-in [`Default`],
//! an optional TOML file, then environment variables. This mirrors
//! the teacher's layered defaults → file → env config pipeline
//! (`astrid-config`'s loader).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::deadlines::OperationDeadlines;
use crate::error::{ConfigError, ConfigResult};
use crate::quota::QuotaTable;

/// Which backing store the user record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStoreKind {
    /// A real Postgres-backed store, via `DATABASE_URL`.
    Postgres,
    /// An in-process store, for `DB_TYPE=memory` and tests.
    Memory,
}

/// Fully resolved relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// HTTP bind port. Env `PORT`, default 3010.
    pub port: u16,

    /// Coordination store connection string. Env `REDIS_URL`. When
    /// absent, the relay runs single-instance against `LocalStore`.
    pub redis_url: Option<String>,

    /// Persistent user-store connection string. Env `DATABASE_URL`.
    pub database_url: Option<String>,

    /// Which user store backend to use. Derived from `DB_TYPE`;
    /// `memory` when set to that literal or when `database_url` is
    /// absent, `postgres` otherwise.
    pub db_type: UserStoreKind,

    /// This replica's identity. Env `FLY_ALLOC_ID`, default `"local"`.
    pub replica_id: String,

    /// Path to the browser binary driven by the headless session
    /// controller. Env `PUPPETEER_EXECUTABLE_PATH`.
    pub browser_executable_path: Option<String>,

    /// The free tier's monthly request ceiling, seeding
    /// [`QuotaTable`]. Env `FREE_API_REQUESTS_LIMIT`, default 100.
    pub free_api_requests_limit: u64,

    /// `NODE_ENV`-equivalent deployment environment tag, kept for
    /// parity with the source's env surface; only used to decide
    /// whether pretty or JSON log formatting applies.
    pub environment: String,

    /// Per-operation reply deadlines (spec.md §4.F).
    pub deadlines: OperationDeadlines,

    /// Per-tier daily/monthly quota limits (spec.md §9 Open Question).
    pub quotas: QuotaTable,
}

/// A partial, file/env-overridable settings document. Every field is
/// optional so a TOML file only needs to name what it overrides.
#[derive(Debug, Default, Deserialize)]
struct PartialSettings {
    port: Option<u16>,
    redis_url: Option<String>,
    database_url: Option<String>,
    db_type: Option<String>,
    replica_id: Option<String>,
    browser_executable_path: Option<String>,
    free_api_requests_limit: Option<u64>,
    environment: Option<String>,
    deadlines: Option<OperationDeadlines>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            port: 3010,
            redis_url: None,
            database_url: None,
            db_type: UserStoreKind::Memory,
            replica_id: "local".to_string(),
            browser_executable_path: None,
            free_api_requests_limit: 100,
            environment: "development".to_string(),
            deadlines: OperationDeadlines::default(),
            quotas: QuotaTable::from_free_monthly_limit(100),
        }
    }
}

impl RelaySettings {
    /// Resolve settings: defaults, then an optional TOML file, then
    /// environment variables (highest precedence).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if
    /// `config_path` is given but unreadable or malformed, and
    /// [`ConfigError::InvalidEnvVar`] if an environment variable
    /// can't be parsed into its expected type.
    pub fn resolve(config_path: Option<&Path>) -> ConfigResult<Self> {
        let mut settings = Self::default();

        if let Some(path) = config_path {
            let partial = load_file(path)?;
            settings.apply_partial(partial);
        }

        settings.apply_env()?;
        settings.quotas = QuotaTable::from_free_monthly_limit(settings.free_api_requests_limit);
        Ok(settings)
    }

    fn apply_partial(&mut self, partial: PartialSettings) {
        if let Some(v) = partial.port {
            self.port = v;
        }
        if let Some(v) = partial.redis_url {
            self.redis_url = Some(v);
        }
        if let Some(v) = partial.database_url {
            self.database_url = Some(v);
        }
        if let Some(v) = partial.db_type {
            self.db_type = parse_db_type(&v);
        }
        if let Some(v) = partial.replica_id {
            self.replica_id = v;
        }
        if let Some(v) = partial.browser_executable_path {
            self.browser_executable_path = Some(v);
        }
        if let Some(v) = partial.free_api_requests_limit {
            self.free_api_requests_limit = v;
        }
        if let Some(v) = partial.environment {
            self.environment = v;
        }
        if let Some(v) = partial.deadlines {
            self.deadlines = v;
        }
    }

    fn apply_env(&mut self) -> ConfigResult<()> {
        if let Ok(v) = std::env::var("PORT") {
            self.port = v.parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: "PORT".to_string(),
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Ok(v) = std::env::var("DB_TYPE") {
            self.db_type = parse_db_type(&v);
        } else if self.database_url.is_none() {
            self.db_type = UserStoreKind::Memory;
        }
        if let Ok(v) = std::env::var("FLY_ALLOC_ID") {
            self.replica_id = v;
        }
        if let Ok(v) = std::env::var("PUPPETEER_EXECUTABLE_PATH") {
            self.browser_executable_path = Some(v);
        }
        if let Ok(v) = std::env::var("FREE_API_REQUESTS_LIMIT") {
            self.free_api_requests_limit = v.parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: "FREE_API_REQUESTS_LIMIT".to_string(),
                value: v,
            })?;
        }
        if let Ok(v) = std::env::var("NODE_ENV") {
            self.environment = v;
        }
        Ok(())
    }
}

fn parse_db_type(v: &str) -> UserStoreKind {
    if v.eq_ignore_ascii_case("memory") {
        UserStoreKind::Memory
    } else {
        UserStoreKind::Postgres
    }
}

fn load_file(path: &Path) -> ConfigResult<PartialSettings> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn defaults_are_single_instance_and_free_tier() {
        let settings = RelaySettings::default();
        assert_eq!(settings.port, 3010);
        assert!(settings.redis_url.is_none());
        assert_eq!(settings.db_type, UserStoreKind::Memory);
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"port = 4000"#).unwrap();
        writeln!(file, r#"redis_url = "redis://file-host:6379""#).unwrap();

        std::env::set_var("PORT", "5000");
        let settings = RelaySettings::resolve(Some(file.path())).unwrap();
        std::env::remove_var("PORT");

        assert_eq!(settings.port, 5000, "env var PORT must win over file");
        assert_eq!(settings.redis_url.as_deref(), Some("redis://file-host:6379"));
    }

    #[test]
    fn db_type_defaults_to_postgres_when_database_url_present_without_override() {
        let mut settings = RelaySettings { database_url: Some("postgres://x".into()), ..Default::default() };
        settings.db_type = UserStoreKind::Postgres;
        assert_eq!(settings.db_type, UserStoreKind::Postgres);
    }
}
