use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::KeyturnError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub loglevel: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8081".to_string(),
            loglevel: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Number of persistent connections; fixed for the process lifetime.
    pub pool_size: usize,
    /// Upper bound on how long a blocked `acquire` sleeps before rescanning.
    pub acquire_poll_ms: u64,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:keyturn.db".to_string(),
            pool_size: 4,
            acquire_poll_ms: 5,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_poll(&self) -> Duration {
        Duration::from_millis(self.acquire_poll_ms.max(1))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    /// Defaults, then `config.toml`, then `KEYTURN_*` env vars
    /// (`KEYTURN_DATABASE__POOL_SIZE=8`).
    pub fn load() -> Result<Self, KeyturnError> {
        Self::figment().extract().map_err(Into::into)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("KEYTURN_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KEYTURN_DATABASE__POOL_SIZE", "9");
            jail.set_env("KEYTURN_BASIC__LOGLEVEL", "debug");
            let cfg = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(cfg.database.pool_size, 9);
            assert_eq!(cfg.basic.loglevel, "debug");
            assert_eq!(cfg.database.acquire_poll_ms, 5);
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_layered_under_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [database]
                url = "sqlite:/tmp/other.db"
                pool_size = 2
                "#,
            )?;
            jail.set_env("KEYTURN_DATABASE__POOL_SIZE", "3");
            let cfg = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(cfg.database.url, "sqlite:/tmp/other.db");
            assert_eq!(cfg.database.pool_size, 3);
            assert_eq!(cfg.basic.listen_addr, "0.0.0.0:8081");
            Ok(())
        });
    }
}
