//! Startup configuration, read from `ROLLCALL_*` environment variables.
//!
//! A `.env` file in the working directory is honoured outside of tests.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{Duration, FixedOffset};

/// Secrets that ship in sample files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub display_offset: FixedOffset,
    /// Username and password for the first admin, if both are set.
    pub admin: Option<(String, String)>,
    pub seed_demo: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so tests never touch the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("ROLLCALL_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or("ROLLCALL_PORT", lookup("ROLLCALL_PORT"), 8000)?;
        let bind_address = format!("{}:{}", host, port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("ROLLCALL_HOST", e.to_string()))?;

        let db_path = lookup("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("rollcall.db"));

        let jwt_secret = lookup("ROLLCALL_JWT_SECRET")
            .ok_or(ConfigError::MissingVar("ROLLCALL_JWT_SECRET"))?;
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::InvalidValue(
                "ROLLCALL_JWT_SECRET",
                "placeholder secrets are not accepted".to_string(),
            ));
        }

        let ttl_hours: i64 = parse_or("ROLLCALL_TOKEN_TTL_HOURS", lookup("ROLLCALL_TOKEN_TTL_HOURS"), 24)?;
        if ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue(
                "ROLLCALL_TOKEN_TTL_HOURS",
                "must be positive".to_string(),
            ));
        }

        let offset_minutes: i32 = parse_or(
            "ROLLCALL_UTC_OFFSET_MINUTES",
            lookup("ROLLCALL_UTC_OFFSET_MINUTES"),
            0,
        )?;
        let display_offset = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            ConfigError::InvalidValue(
                "ROLLCALL_UTC_OFFSET_MINUTES",
                format!("{} is out of range", offset_minutes),
            )
        })?;

        let admin = match (lookup("ROLLCALL_ADMIN_USERNAME"), lookup("ROLLCALL_ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        };

        let seed_demo = match lookup("ROLLCALL_SEED_DEMO").as_deref() {
            None | Some("") | Some("0") | Some("false") | Some("no") => false,
            Some("1") | Some("true") | Some("yes") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "ROLLCALL_SEED_DEMO",
                    format!("'{}' is not a boolean", other),
                ));
            }
        };

        Ok(Self {
            bind_address,
            db_path,
            jwt_secret,
            token_ttl: Duration::hours(ttl_hours),
            display_offset,
            admin,
            seed_demo,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = load(&[("ROLLCALL_JWT_SECRET", "s3cr3t-for-tests")]).unwrap();
        assert_eq!(cfg.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(cfg.db_path, PathBuf::from("rollcall.db"));
        assert_eq!(cfg.token_ttl, Duration::hours(24));
        assert_eq!(cfg.display_offset.local_minus_utc(), 0);
        assert!(cfg.admin.is_none());
        assert!(!cfg.seed_demo);
    }

    #[test]
    fn secret_is_required_and_placeholders_refused() {
        assert!(matches!(
            load(&[]),
            Err(ConfigError::MissingVar("ROLLCALL_JWT_SECRET"))
        ));
        for bad in ["dev-secret-change-me", "   "] {
            assert!(matches!(
                load(&[("ROLLCALL_JWT_SECRET", bad)]),
                Err(ConfigError::InvalidValue("ROLLCALL_JWT_SECRET", _))
            ));
        }
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("ROLLCALL_JWT_SECRET", "s3cr3t-for-tests"),
            ("ROLLCALL_HOST", "127.0.0.1"),
            ("ROLLCALL_PORT", "9100"),
            ("ROLLCALL_TOKEN_TTL_HOURS", "2"),
            ("ROLLCALL_UTC_OFFSET_MINUTES", "300"),
            ("ROLLCALL_ADMIN_USERNAME", "root"),
            ("ROLLCALL_ADMIN_PASSWORD", "hunter22"),
            ("ROLLCALL_SEED_DEMO", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_address.to_string(), "127.0.0.1:9100");
        assert_eq!(cfg.token_ttl, Duration::hours(2));
        assert_eq!(cfg.display_offset.local_minus_utc(), 300 * 60);
        assert_eq!(cfg.admin, Some(("root".to_string(), "hunter22".to_string())));
        assert!(cfg.seed_demo);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let base = ("ROLLCALL_JWT_SECRET", "s3cr3t-for-tests");
        assert!(matches!(
            load(&[base, ("ROLLCALL_PORT", "eighty")]),
            Err(ConfigError::InvalidValue("ROLLCALL_PORT", _))
        ));
        assert!(matches!(
            load(&[base, ("ROLLCALL_TOKEN_TTL_HOURS", "0")]),
            Err(ConfigError::InvalidValue("ROLLCALL_TOKEN_TTL_HOURS", _))
        ));
        assert!(matches!(
            load(&[base, ("ROLLCALL_UTC_OFFSET_MINUTES", "100000")]),
            Err(ConfigError::InvalidValue("ROLLCALL_UTC_OFFSET_MINUTES", _))
        ));
        assert!(matches!(
            load(&[base, ("ROLLCALL_SEED_DEMO", "maybe")]),
            Err(ConfigError::InvalidValue("ROLLCALL_SEED_DEMO", _))
        ));
    }

    #[test]
    fn admin_needs_both_halves() {
        let cfg = load(&[
            ("ROLLCALL_JWT_SECRET", "s3cr3t-for-tests"),
            ("ROLLCALL_ADMIN_USERNAME", "root"),
        ])
        .unwrap();
        assert!(cfg.admin.is_none());
    }
}
