use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use mundap_crypto::keys::parse_hex_key;
use mundap_notify::ScheduleConfig;

const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";
const DEV_ENCRYPTION_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

const MAX_ACCESS_TTL_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub enum DatabaseConfig {
    Postgres(String),
    Sqlite(PathBuf),
}

/// Application configuration loaded from environment variables.
/// Production refuses to start on missing or placeholder secrets.
#[derive(Debug, Clone)]
pub struct Config {
    pub env: Environment,
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub encryption_key: [u8; 32],
    pub redis_url: Option<String>,
    /// Empty means permissive CORS.
    pub cors_origins: Vec<String>,
    pub admin_api_key: Option<String>,
    pub schedule: ScheduleConfig,
    pub auth_rate_limit_per_minute: u32,
    pub static_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse = |key: &str, default: &str| -> Result<i64> {
            get(key)
                .unwrap_or_else(|| default.to_string())
                .parse::<i64>()
                .with_context(|| format!("{key} must be an integer"))
        };

        let env = match get("MUNDAP_ENV").as_deref() {
            None | Some("development") | Some("dev") | Some("test") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => bail!("MUNDAP_ENV must be development or production, got '{other}'"),
        };
        let production = env == Environment::Production;
        let required = |key: &str, dev_default: &str| -> Result<String> {
            match get(key) {
                Some(v) => Ok(v),
                None if production => bail!("Required environment variable '{key}' is not set"),
                None => Ok(dev_default.to_string()),
            }
        };

        let database = if get("USE_POSTGRES").is_some_and(|v| v == "true" || v == "1") {
            DatabaseConfig::Postgres(
                get("DATABASE_URL").context("DATABASE_URL is required when USE_POSTGRES=true")?,
            )
        } else {
            DatabaseConfig::Sqlite(PathBuf::from(
                get("SQLITE_PATH").unwrap_or_else(|| "mundapdari.db".to_string()),
            ))
        };

        let jwt_secret = required("JWT_SECRET", DEV_ACCESS_SECRET)?;
        let jwt_refresh_secret = required("JWT_REFRESH_SECRET", DEV_REFRESH_SECRET)?;
        let encryption_key = parse_hex_key(&required("ENCRYPTION_KEY", DEV_ENCRYPTION_KEY)?)
            .context("ENCRYPTION_KEY must be exactly 64 hex characters")?;

        let cors_origins: Vec<String> = get("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if production {
            if is_placeholder(&jwt_secret) || is_placeholder(&jwt_refresh_secret) {
                bail!("JWT_SECRET and JWT_REFRESH_SECRET must not be placeholder values in production");
            }
            if jwt_secret == jwt_refresh_secret {
                bail!("JWT_SECRET and JWT_REFRESH_SECRET must differ");
            }
            if encryption_key == parse_hex_key(DEV_ENCRYPTION_KEY)? {
                bail!("ENCRYPTION_KEY must not be the development key in production");
            }
            if cors_origins.is_empty() {
                bail!("Required environment variable 'CORS_ORIGINS' is not set");
            }
        }

        let utc_offset_hours = parse("UTC_OFFSET_HOURS", "9")?;
        if !(-12..=14).contains(&utc_offset_hours) {
            bail!("UTC_OFFSET_HOURS must be between -12 and 14");
        }
        let hour = |key: &str, default: &str| -> Result<u32> {
            let h = parse(key, default)?;
            if !(0..24).contains(&h) {
                bail!("{key} must be an hour between 0 and 23");
            }
            Ok(h as u32)
        };
        let access_ttl_minutes = parse("JWT_ACCESS_TTL_MINUTES", "60")?;
        if !(1..=MAX_ACCESS_TTL_MINUTES).contains(&access_ttl_minutes) {
            bail!("JWT_ACCESS_TTL_MINUTES must be between 1 and {MAX_ACCESS_TTL_MINUTES}");
        }
        let refresh_ttl_days = parse("JWT_REFRESH_TTL_DAYS", "30")?;
        if !(1..=MAX_REFRESH_TTL_DAYS).contains(&refresh_ttl_days) {
            bail!("JWT_REFRESH_TTL_DAYS must be between 1 and {MAX_REFRESH_TTL_DAYS}");
        }

        let schedule = ScheduleConfig {
            utc_offset_hours: utc_offset_hours as i32,
            daily_question_hour: hour("DAILY_NOTIFICATION_HOUR", "9")?,
            reminder_hour: hour("REMINDER_HOUR", "20")?,
            weekly_summary_hour: hour("WEEKLY_SUMMARY_HOUR", "19")?,
            cleanup_hour: hour("CLEANUP_HOUR", "3")?,
        };

        Ok(Config {
            env,
            host: get("MUNDAP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("MUNDAP_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse::<u16>()
                .context("MUNDAP_PORT must be a valid port number")?,
            database,
            jwt_secret,
            jwt_refresh_secret,
            access_ttl_minutes,
            refresh_ttl_days,
            encryption_key,
            redis_url: get("REDIS_URL"),
            cors_origins,
            admin_api_key: get("ADMIN_API_KEY"),
            schedule,
            auth_rate_limit_per_minute: parse("AUTH_RATE_LIMIT_PER_MINUTE", "30")?
                .clamp(1, u32::MAX as i64) as u32,
            static_dir: get("STATIC_DIR").map(PathBuf::from),
        })
    }
}

fn is_placeholder(secret: &str) -> bool {
    let lower = secret.to_ascii_lowercase();
    lower.contains("change-me") || lower.contains("changeme") || lower == "secret" || secret.len() < 16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    fn production() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MUNDAP_ENV", "production"),
            ("JWT_SECRET", "a-long-random-access-secret-value"),
            ("JWT_REFRESH_SECRET", "a-long-random-refresh-secret-value"),
            ("ENCRYPTION_KEY", "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100"),
            ("CORS_ORIGINS", "https://mundapdari.example, https://admin.mundapdari.example"),
        ]
    }

    #[test]
    fn development_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.env, Environment::Development);
        assert_eq!(c.port, 3000);
        assert!(matches!(c.database, DatabaseConfig::Sqlite(_)));
        assert_eq!(c.schedule.utc_offset_hours, 9);
        assert_eq!(c.schedule.reminder_hour, 20);
        assert!(c.cors_origins.is_empty());
        assert!(c.redis_url.is_none());
    }

    #[test]
    fn production_accepts_real_secrets() {
        let c = config(&production()).unwrap();
        assert_eq!(c.env, Environment::Production);
        assert_eq!(c.cors_origins.len(), 2);
    }

    #[test]
    fn production_refuses_placeholders() {
        let mut vars = production();
        vars[1] = ("JWT_SECRET", DEV_ACCESS_SECRET);
        assert!(config(&vars).is_err());

        let mut vars = production();
        vars[4] = ("CORS_ORIGINS", "");
        assert!(config(&vars).is_err());

        let vars: Vec<_> = production().into_iter().filter(|(k, _)| *k != "ENCRYPTION_KEY").collect();
        assert!(config(&vars).is_err());
    }

    #[test]
    fn postgres_needs_a_url() {
        assert!(config(&[("USE_POSTGRES", "true")]).is_err());
        let c = config(&[("USE_POSTGRES", "true"), ("DATABASE_URL", "postgres://localhost/mundap")]).unwrap();
        assert!(matches!(c.database, DatabaseConfig::Postgres(_)));
    }

    #[test]
    fn bad_key_and_hour_are_rejected() {
        assert!(config(&[("ENCRYPTION_KEY", "abcd")]).is_err());
        assert!(config(&[("REMINDER_HOUR", "24")]).is_err());
    }

    #[test]
    fn token_lifetimes_are_bounded() {
        assert!(config(&[("JWT_ACCESS_TTL_MINUTES", "0")]).is_err());
        assert!(config(&[("JWT_ACCESS_TTL_MINUTES", "-5")]).is_err());
        assert!(config(&[("JWT_ACCESS_TTL_MINUTES", "9223372036854775807")]).is_err());
        assert!(config(&[("JWT_REFRESH_TTL_DAYS", "0")]).is_err());
        assert!(config(&[("JWT_REFRESH_TTL_DAYS", "366")]).is_err());

        let c = config(&[("JWT_ACCESS_TTL_MINUTES", "1440"), ("JWT_REFRESH_TTL_DAYS", "365")]).unwrap();
        assert_eq!(c.access_ttl_minutes, 1440);
        assert_eq!(c.refresh_ttl_days, 365);
    }
}
