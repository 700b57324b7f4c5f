//! # Configuration Management
//!
//! Configuration comes from the environment (12-factor style), with a `.env`
//! file picked up for local development.
//!
//! ## Environment Variables
//! - `HOST` / `PORT`: where the broker listens (default 127.0.0.1:5001)
//! - `DATABASE_URL`: SQLite connection string for the record store and session snapshot
//! - `RP_ID` / `RP_ORIGIN` / `RP_NAME`: relying party identity used in ceremonies
//! - `FRONTEND_URL`: base of the pairing URL encoded in the QR code
//! - `JWT_SECRET`: signing key for auth tokens (required in production)
//! - `APP_ENV`: `production` (default) or `development`
//! - `LENIENT_SESSIONS`: auto-create missing pairing sessions on ceremony endpoints
//! - `SESSION_TTL_SECS`, `SWEEP_INTERVAL_SECS`, `STORE_TIMEOUT_MS`: lifecycle tuning
//! - `CHALLENGE_TTL_SECS`: how long an issued ceremony challenge stays usable

use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Deployment environment.
///
/// Development relaxes a few checks: origin mismatches are logged instead of
/// rejected, unregistered devices may approve logins, and missing pairing
/// sessions are recreated on ceremony endpoints. Challenge and counter checks
/// are never relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!("unknown APP_ENV '{}'", other),
        }
    }
}

/// Application configuration
///
/// ## WebAuthn Terminology
/// - **RP ID**: the domain the ceremony is scoped to (e.g. "example.com")
/// - **RP Origin**: full URL the responder page is served from; compared
///   against the origin the authenticator reports in its client data
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub rp_id: String,
    pub rp_origin: String,
    pub rp_name: String,

    /// Base URL of the responder page; the pairing URL is
    /// `{frontend_url}/mobile-auth/{session_id}?username=...`
    pub frontend_url: String,

    pub jwt_secret: String,
    pub environment: Environment,

    /// Whether ceremony endpoints recreate a pairing session they cannot find
    /// instead of failing with `SessionNotFound`.
    pub lenient_sessions: bool,

    /// Pairing sessions older than this are swept. Default: 15 minutes
    pub session_ttl: Duration,

    /// How often the sweeper runs. Default: 5 minutes
    pub sweep_interval: Duration,

    /// Challenges older than this are refused. Default: 5 minutes
    pub challenge_ttl: Duration,

    /// Upper bound on any single record-store or verifier call
    pub store_timeout: Duration,
}

const DEV_JWT_SECRET: &str = "fastkey-development-secret";

impl Config {
    /// Load configuration from environment variables
    ///
    /// Production is the default environment, so every development
    /// convenience must be opted into with `APP_ENV=development`.
    ///
    /// ## Example .env file
    /// ```text
    /// APP_ENV=development
    /// PORT=5001
    /// DATABASE_URL=sqlite:fastkey.db?mode=rwc
    /// RP_ID=localhost
    /// RP_ORIGIN=http://localhost:3000
    /// FRONTEND_URL=http://localhost:3000
    /// ```
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment: Environment = env::var("APP_ENV")
            .unwrap_or_else(|_| "production".to_string())
            .parse()?;

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ if environment == Environment::Development => DEV_JWT_SECRET.to_string(),
            _ => bail!("JWT_SECRET must be set when APP_ENV=production"),
        };

        let lenient_sessions = match env::var("LENIENT_SESSIONS") {
            Ok(v) => parse_bool(&v)?,
            Err(_) => environment == Environment::Development,
        };

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "5001".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:fastkey.db?mode=rwc".to_string()),
            rp_id: env::var("RP_ID").unwrap_or_else(|_| "localhost".to_string()),
            rp_origin: env::var("RP_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            rp_name: env::var("RP_NAME").unwrap_or_else(|_| "FastKey".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            jwt_secret,
            environment,
            lenient_sessions,
            session_ttl: Duration::from_secs(env_u64("SESSION_TTL_SECS", 15 * 60)?),
            sweep_interval: Duration::from_secs(env_u64("SWEEP_INTERVAL_SECS", 5 * 60)?),
            challenge_ttl: Duration::from_secs(env_u64("CHALLENGE_TTL_SECS", 5 * 60)?),
            store_timeout: Duration::from_millis(env_u64("STORE_TIMEOUT_MS", 5_000)?),
        })
    }

    /// Combines host and port for `tokio::net::TcpListener::bind()`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// URL the initiator renders as a QR code for the responder to open.
    pub fn pairing_url(&self, session_id: &str, username: &str, registration: bool) -> String {
        let mut url = format!(
            "{}/mobile-auth/{}?username={}",
            self.frontend_url.trim_end_matches('/'),
            session_id,
            urlencoding::encode(username)
        );
        if registration {
            url.push_str("&register=true");
        }
        url
    }

    /// Configuration used by unit tests: in-memory database, production checks.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            rp_id: "localhost".to_string(),
            rp_origin: "http://localhost:3000".to_string(),
            rp_name: "FastKey".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            jwt_secret: "test-secret".to_string(),
            environment: Environment::Production,
            lenient_sessions: false,
            session_ttl: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            challenge_ttl: Duration::from_secs(5 * 60),
            store_timeout: Duration::from_millis(500),
        }
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => Ok(v.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_url_encodes_username_and_marks_registration() {
        let config = Config::for_tests();
        let url = config.pairing_url("abc", "alice smith", true);
        assert_eq!(
            url,
            "http://localhost:3000/mobile-auth/abc?username=alice%20smith&register=true"
        );
        assert!(!config.pairing_url("abc", "bob", false).contains("register"));
    }

    #[test]
    fn environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("Production".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool("on").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
