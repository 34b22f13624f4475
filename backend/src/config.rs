use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub notifications: NotificationConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// When unset, rate limits are tracked in-process.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub admin_channel_id: String,
    pub moderation_channel_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub rust_log: String,
    /// Dashboard origin allowed by CORS; any origin when unset.
    pub cors_origin: Option<String>,
}

/// What happens when a challenge participant runs out of lives.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LivesExhaustedPolicy {
    /// Reset wins and lives to the challenge defaults and count another attempt.
    ResetProgress,
    /// Fail the participant.
    Fail,
}

impl FromStr for LivesExhaustedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" | "reset_progress" => Ok(LivesExhaustedPolicy::ResetProgress),
            "fail" => Ok(LivesExhaustedPolicy::Fail),
            other => Err(anyhow::anyhow!("unknown lives policy '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub report_timeout_minutes: i64,
    pub challenge_compensation_rep: i64,
    pub season_utc_offset_hours: i32,
    pub season_tickets: u32,
    pub lives_exhausted_policy: LivesExhaustedPolicy,
    pub abuse_ratio_threshold: f64,
    pub abuse_min_matches: u32,
    pub admin_channel_id: String,
    pub moderation_channel_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            report_timeout_minutes: 90,
            challenge_compensation_rep: 50,
            season_utc_offset_hours: 0,
            season_tickets: 7,
            lives_exhausted_policy: LivesExhaustedPolicy::ResetProgress,
            abuse_ratio_threshold: 0.25,
            abuse_min_matches: 10,
            admin_channel_id: "admin".to_string(),
            moderation_channel_id: "moderation".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;
        let max_connections: u32 = env_or("DATABASE_MAX_CONNECTIONS", 5)?;
        let redis_url = env::var("REDIS_URL").ok();
        let webhook_url = env::var("NOTIFY_WEBHOOK_URL").ok();
        let admin_channel_id = env::var("ADMIN_CHANNEL_ID").unwrap_or_else(|_| "admin".to_string());
        let moderation_channel_id =
            env::var("MODERATION_CHANNEL_ID").unwrap_or_else(|_| "moderation".to_string());
        let port: u16 = env_or("PORT", 8080)?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let cors_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            report_timeout_minutes: env_or("REPORT_TIMEOUT_MINUTES", defaults.report_timeout_minutes)?,
            challenge_compensation_rep: env_or(
                "CHALLENGE_COMPENSATION_REP",
                defaults.challenge_compensation_rep,
            )?,
            season_utc_offset_hours: env_or("SEASON_UTC_OFFSET_HOURS", defaults.season_utc_offset_hours)?,
            season_tickets: env_or("SEASON_TICKETS", defaults.season_tickets)?,
            lives_exhausted_policy: env_or("LIVES_EXHAUSTED_POLICY", defaults.lives_exhausted_policy)?,
            abuse_ratio_threshold: env_or("ABUSE_RATIO_THRESHOLD", defaults.abuse_ratio_threshold)?,
            abuse_min_matches: env_or("ABUSE_MIN_MATCHES", defaults.abuse_min_matches)?,
            admin_channel_id: admin_channel_id.clone(),
            moderation_channel_id: moderation_channel_id.clone(),
        };

        if !(-12..=14).contains(&engine.season_utc_offset_hours) {
            anyhow::bail!("SEASON_UTC_OFFSET_HOURS must be between -12 and 14");
        }

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            redis: RedisConfig { url: redis_url },
            notifications: NotificationConfig {
                webhook_url,
                admin_channel_id,
                moderation_channel_id,
            },
            server: ServerConfig {
                port,
                host,
                rust_log,
                cors_origin,
            },
            engine,
        })
    }
}
