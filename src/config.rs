//! Configuration loading from environment variables.
//!
//! Values are validated early so startup fails fast with actionable errors.
//! The server and the client read disjoint sets of variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_TOKEN_EXPIRE_MINUTES: usize = 30;
pub const MAX_TOKEN_EXPIRE_MINUTES: usize = 24 * 60;
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_MAX_TEXT_CHARS: usize = 5000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: usize = 30;

const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const DEFAULT_CORS_ORIGINS: &str =
    "http://localhost:3000,http://localhost:5173,http://localhost:5174";

/// Runtime configuration for the HTTP server.
#[derive(Clone)]
pub struct AppConfig {
    /// Host interface to bind, for example `127.0.0.1`.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// HS256 key used to sign and verify issued bearer tokens.
    pub secret_key: String,
    /// Lifetime of an issued bearer token.
    pub token_ttl: Duration,
    /// Firebase project whose ID tokens are accepted by the exchange endpoint.
    pub firebase_project_id: String,
    /// JWK set used to verify Firebase ID token signatures.
    pub firebase_jwks_url: String,
    /// Base URL of the external translation model service.
    pub translator_url: String,
    /// Browser origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// Maximum number of history entries retained per user.
    pub history_limit: usize,
    /// Longest accepted translation input, in characters.
    pub max_text_chars: usize,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret_key", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("firebase_project_id", &self.firebase_project_id)
            .field("firebase_jwks_url", &self.firebase_jwks_url)
            .field("translator_url", &self.translator_url)
            .field("cors_origins", &self.cors_origins)
            .field("history_limit", &self.history_limit)
            .field("max_text_chars", &self.max_text_chars)
            .finish()
    }
}

impl AppConfig {
    /// Builds server configuration from environment variables.
    ///
    /// Variables:
    /// - `HOST` (default `127.0.0.1`)
    /// - `PORT` (default `8000`)
    /// - `SECRET_KEY` (required)
    /// - `ACCESS_TOKEN_EXPIRE_MINUTES` (default `30`, min `1`, max `1440`)
    /// - `FIREBASE_PROJECT_ID` (required)
    /// - `FIREBASE_JWKS_URL` (default Google secure-token key set)
    /// - `TRANSLATOR_URL` (default `http://127.0.0.1:8001`)
    /// - `CORS_ORIGINS` (comma separated, default local dev servers)
    /// - `HISTORY_LIMIT` (default `100`, min `1`, max `10000`)
    /// - `MAX_TEXT_CHARS` (default `5000`, min `1`, max `100000`)
    pub fn from_env() -> Result<Self, AppError> {
        let host = env_str("HOST", "127.0.0.1");
        let port = env_u16("PORT", 8000)?;
        let secret_key = env_required("SECRET_KEY")?;
        let expire_minutes = env_usize_bounded(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            DEFAULT_TOKEN_EXPIRE_MINUTES,
            1,
            MAX_TOKEN_EXPIRE_MINUTES,
        )?;
        let firebase_project_id = env_required("FIREBASE_PROJECT_ID")?;
        let firebase_jwks_url = env_str("FIREBASE_JWKS_URL", DEFAULT_JWKS_URL);
        let translator_url = trim_base_url(&env_str("TRANSLATOR_URL", "http://127.0.0.1:8001"));
        let cors_origins = parse_origins(&env_str("CORS_ORIGINS", DEFAULT_CORS_ORIGINS));
        let history_limit =
            env_usize_bounded("HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT, 1, 10_000)?;
        let max_text_chars =
            env_usize_bounded("MAX_TEXT_CHARS", DEFAULT_MAX_TEXT_CHARS, 1, 100_000)?;

        Ok(Self {
            host,
            port,
            secret_key,
            token_ttl: Duration::from_secs(expire_minutes as u64 * 60),
            firebase_project_id,
            firebase_jwks_url,
            translator_url,
            cors_origins,
            history_limit,
            max_text_chars,
        })
    }

    /// Issuer claim carried by Firebase ID tokens for the configured project.
    pub fn firebase_issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.firebase_project_id)
    }
}

/// Runtime configuration for client commands.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the EchoPath API, without a trailing slash.
    pub api_url: String,
    /// Firebase Web API key; needed to sign in and to refresh assertions.
    pub firebase_api_key: Option<String>,
    /// File holding the persisted session (bearer token and identity).
    pub session_file: PathBuf,
    /// Per-request timeout for every outbound call.
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Builds client configuration from environment variables.
    ///
    /// Variables:
    /// - `ECHOPATH_API_URL` (default `http://127.0.0.1:8000`)
    /// - `FIREBASE_API_KEY` (optional until a sign-in or refresh is needed)
    /// - `ECHOPATH_SESSION_FILE` (default `$HOME/.config/echopath/session.json`)
    /// - `ECHOPATH_HTTP_TIMEOUT_SECS` (default `30`, min `1`, max `600`)
    pub fn from_env() -> Result<Self, AppError> {
        let api_url = trim_base_url(&env_str("ECHOPATH_API_URL", "http://127.0.0.1:8000"));
        let session_file = env_opt("ECHOPATH_SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(default_session_file);
        let timeout_secs = env_usize_bounded(
            "ECHOPATH_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
            1,
            600,
        )?;

        Ok(Self {
            api_url,
            firebase_api_key: env_opt("FIREBASE_API_KEY"),
            session_file,
            http_timeout: Duration::from_secs(timeout_secs as u64),
        })
    }
}

fn default_session_file() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("echopath")
        .join("session.json")
}

fn trim_base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn env_required(name: &str) -> Result<String, AppError> {
    env_opt(name).ok_or_else(|| AppError::internal(format!("missing required {name}")))
}

fn env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<u16>().map_err(|_| {
        AppError::internal(format!("invalid {name}={raw:?}; expected integer 1-65535"))
    })?;
    if parsed == 0 {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected > 0"
        )));
    }
    Ok(parsed)
}

fn env_usize_bounded(
    name: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    parse_usize_bounded(name, &raw, min, max)
}

fn parse_usize_bounded(name: &str, raw: &str, min: usize, max: usize) -> Result<usize, AppError> {
    let trimmed = raw.trim();
    let parsed = trimmed.parse::<usize>().map_err(|_| {
        AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        ))
    })?;
    if parsed < min || parsed > max {
        return Err(AppError::internal(format!(
            "invalid {name}={raw:?}; expected integer in range [{min}, {max}]"
        )));
    }
    Ok(parsed)
}
