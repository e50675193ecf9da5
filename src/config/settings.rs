//! Application settings read from environment variables (and `.env` via `dotenvy`).

use crate::{
    config::database::DEFAULT_DATABASE_URL,
    errors::{Error, Result},
};
use std::{net::SocketAddr, time::Duration};

/// Deployment environment, from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// `APP_ENV=production`; unsigned webhooks are refused
    Production,
    /// Anything else
    Development,
}

impl Environment {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("production") || v.eq_ignore_ascii_case("prod") => {
                Self::Production
            }
            _ => Self::Development,
        }
    }
}

/// Lemon Squeezy credentials.
#[derive(Clone)]
pub struct LemonSqueezySettings {
    /// API key
    pub api_key: String,
    /// Store the checkouts and orders belong to
    pub store_id: String,
    /// API root override, mostly for tests against a local stub
    pub api_url: Option<String>,
}

impl std::fmt::Debug for LemonSqueezySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LemonSqueezySettings")
            .field("api_key", &"<redacted>")
            .field("store_id", &self.store_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Everything the service reads from its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Deployment environment
    pub environment: Environment,
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// SeaORM connection string
    pub database_url: String,
    /// Path of the package catalog TOML
    pub packages_path: String,
    /// Credits granted to a new account
    pub default_free_credits: i64,
    /// Provider credentials; `None` when neither key nor store id is set
    pub lemon_squeezy: Option<LemonSqueezySettings>,
    /// Webhook signing secret
    pub webhook_secret: Option<String>,
    /// Delay between poller checks
    pub poll_interval: Duration,
    /// How long after a checkout the poller keeps checking
    pub poll_window: Duration,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    /// [`Error::Configuration`] for unparsable values, a half-configured provider, or
    /// (in production) a missing provider or webhook secret.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = Environment::parse(get("APP_ENV").as_deref());

        let bind_addr = parse_or(
            get("BIND_ADDR"),
            "BIND_ADDR",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;
        let default_free_credits: i64 =
            parse_or(get("DEFAULT_FREE_CREDITS"), "DEFAULT_FREE_CREDITS", 5)?;
        if default_free_credits < 0 {
            return Err(config_error("DEFAULT_FREE_CREDITS cannot be negative"));
        }

        let poll_interval_secs: u64 = parse_or(
            get("CHECKOUT_POLL_INTERVAL_SECS"),
            "CHECKOUT_POLL_INTERVAL_SECS",
            30,
        )?;
        let poll_window_mins: u64 = parse_or(
            get("CHECKOUT_POLL_WINDOW_MINS"),
            "CHECKOUT_POLL_WINDOW_MINS",
            30,
        )?;
        if poll_interval_secs == 0 {
            return Err(config_error("CHECKOUT_POLL_INTERVAL_SECS must be positive"));
        }

        let lemon_squeezy = match (get("LEMON_SQUEEZY_API_KEY"), get("LEMON_SQUEEZY_STORE_ID")) {
            (Some(api_key), Some(store_id)) => Some(LemonSqueezySettings {
                api_key,
                store_id,
                api_url: get("LEMON_SQUEEZY_API_URL"),
            }),
            (None, None) => None,
            _ => {
                return Err(config_error(
                    "LEMON_SQUEEZY_API_KEY and LEMON_SQUEEZY_STORE_ID must be set together",
                ));
            }
        };

        let settings = Self {
            environment,
            bind_addr,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            packages_path: get("PACKAGES_PATH").unwrap_or_else(|| "packages.toml".to_string()),
            default_free_credits,
            lemon_squeezy,
            webhook_secret: get("LEMON_SQUEEZY_WEBHOOK_SECRET"),
            poll_interval: Duration::from_secs(poll_interval_secs),
            poll_window: Duration::from_secs(poll_window_mins * 60),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Production refuses to start without a provider and a webhook secret.
    fn validate(&self) -> Result<()> {
        if self.environment != Environment::Production {
            return Ok(());
        }
        if self.lemon_squeezy.is_none() {
            return Err(config_error(
                "LEMON_SQUEEZY_API_KEY and LEMON_SQUEEZY_STORE_ID are required in production",
            ));
        }
        if self.webhook_secret.is_none() {
            return Err(config_error(
                "LEMON_SQUEEZY_WEBHOOK_SECRET is required in production",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> Error {
    Error::Configuration {
        message: message.to_string(),
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |raw| {
        raw.trim().parse().map_err(|e| Error::Configuration {
            message: format!("Invalid {key} '{raw}': {e}"),
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.environment, Environment::Development);
        assert_eq!(s.bind_addr.port(), 3000);
        assert_eq!(s.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(s.packages_path, "packages.toml");
        assert_eq!(s.default_free_credits, 5);
        assert!(s.lemon_squeezy.is_none());
        assert!(s.webhook_secret.is_none());
        assert_eq!(s.poll_interval, Duration::from_secs(30));
        assert_eq!(s.poll_window, Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("DEFAULT_FREE_CREDITS", "0"),
            ("CHECKOUT_POLL_INTERVAL_SECS", "10"),
            ("CHECKOUT_POLL_WINDOW_MINS", "5"),
            ("LEMON_SQUEEZY_API_KEY", "key"),
            ("LEMON_SQUEEZY_STORE_ID", "123"),
            ("LEMON_SQUEEZY_WEBHOOK_SECRET", "whsec"),
        ])
        .unwrap();
        assert_eq!(s.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(s.default_free_credits, 0);
        assert_eq!(s.poll_interval, Duration::from_secs(10));
        assert_eq!(s.poll_window, Duration::from_secs(300));
        assert_eq!(s.lemon_squeezy.unwrap().store_id, "123");
        assert_eq!(s.webhook_secret.as_deref(), Some("whsec"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            settings(&[("BIND_ADDR", "nowhere")]),
            Err(Error::Configuration { .. })
        ));
        assert!(settings(&[("DEFAULT_FREE_CREDITS", "-1")]).is_err());
        assert!(settings(&[("CHECKOUT_POLL_INTERVAL_SECS", "0")]).is_err());
        assert!(settings(&[("LEMON_SQUEEZY_API_KEY", "key")]).is_err());
    }

    #[test]
    fn test_production_requires_secrets() {
        assert!(settings(&[("APP_ENV", "production")]).is_err());
        assert!(
            settings(&[
                ("APP_ENV", "production"),
                ("LEMON_SQUEEZY_API_KEY", "key"),
                ("LEMON_SQUEEZY_STORE_ID", "123"),
            ])
            .is_err()
        );
        let s = settings(&[
            ("APP_ENV", "Production"),
            ("LEMON_SQUEEZY_API_KEY", "key"),
            ("LEMON_SQUEEZY_STORE_ID", "123"),
            ("LEMON_SQUEEZY_WEBHOOK_SECRET", "whsec"),
        ])
        .unwrap();
        assert_eq!(s.environment, Environment::Production);
    }
}
