//! Server-side authentication: identity assertion verification and the
//! application bearer tokens issued in exchange.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::AppError;

/// Identity key sets are refetched after this long.
const JWKS_TTL: Duration = Duration::from_secs(60 * 60);
/// An unknown key id triggers a refetch at most this often.
const JWKS_MIN_REFETCH: Duration = Duration::from_secs(60);

/// Principal extracted from a verified identity assertion.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub email_verified: bool,
    pub sign_in_provider: String,
}

/// Verifies identity assertions presented to the token exchange endpoint.
#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify(&self, assertion: &str) -> Result<VerifiedIdentity, AppError>;
}

/// Claims carried by issued bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Caller of a protected endpoint, as proven by its bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub uid: String,
    pub email: Option<String>,
}

/// Signs and verifies HS256 bearer tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issues a bearer token for account `uid`, valid for the configured TTL.
    pub fn issue(&self, uid: &str, email: Option<&str>) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: uid.to_string(),
            email: email.map(str::to_string),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::internal(format!("failed to sign access token: {err}")))
    }

    /// Checks signature and expiry of a bearer token.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AppError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<AccessClaims>(token, &self.decoding, &validation).map_err(|err| {
            debug!(error = %err, "rejected bearer token");
            AppError::unauthorized("could not validate credentials")
        })?;
        if data.claims.sub.is_empty() {
            return Err(AppError::unauthorized("could not validate credentials"));
        }
        Ok(data.claims)
    }

    /// Resolves the caller of a protected endpoint from its headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
        let token = bearer_token(headers)?;
        let claims = self.verify(token)?;
        Ok(AuthenticatedUser {
            uid: claims.sub,
            email: claims.email,
        })
    }
}

/// Hashes `password` into an Argon2 PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|err| AppError::internal(format!("failed to generate salt: {err}")))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|err| AppError::internal(format!("failed to encode salt: {err}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))
}

/// Checks `password` against a PHC string from [`hash_password`].
pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Err(AppError::unauthorized("not authenticated"));
    };

    let value = raw
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid authorization header"))?;

    let mut parts = value.split_whitespace();
    let scheme = parts
        .next()
        .ok_or_else(|| AppError::unauthorized("not authenticated"))?;
    let token = parts
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("not authenticated"))?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized("not authenticated"));
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    firebase: FirebaseInfo,
}

#[derive(Debug, Default, Deserialize)]
struct FirebaseInfo {
    #[serde(default)]
    sign_in_provider: Option<String>,
}

/// Verifies Firebase ID tokens: RS256 signature against the published key
/// set, issuer and audience of the configured project, and expiry.
pub struct FirebaseVerifier {
    http: reqwest::Client,
    project_id: String,
    issuer: String,
    jwks_url: String,
    keys: Cache<(), Arc<JwkSet>>,
    /// Present while a fetch happened within `JWKS_MIN_REFETCH`.
    recent_fetch: Cache<(), ()>,
}

impl FirebaseVerifier {
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            http,
            project_id: cfg.firebase_project_id.clone(),
            issuer: cfg.firebase_issuer(),
            jwks_url: cfg.firebase_jwks_url.clone(),
            keys: Cache::builder()
                .time_to_live(JWKS_TTL)
                .max_capacity(1)
                .build(),
            recent_fetch: Cache::builder()
                .time_to_live(JWKS_MIN_REFETCH)
                .max_capacity(1)
                .build(),
        })
    }

    /// Returns a key set expected to contain `kid`. An unknown `kid` may mean
    /// the provider rotated its keys, so the set is refetched unless that
    /// already happened within `JWKS_MIN_REFETCH`.
    async fn key_set(&self, kid: &str) -> Result<Arc<JwkSet>, AppError> {
        let keys = self.cached_keys().await?;
        if keys.find(kid).is_some() {
            return Ok(keys);
        }

        let gate = self.recent_fetch.entry(()).or_insert(()).await;
        if !gate.is_fresh() {
            debug!(kid = %kid, "unknown key id; key set fetched recently");
            return Ok(keys);
        }
        self.keys.invalidate(&()).await;
        self.cached_keys().await
    }

    async fn cached_keys(&self) -> Result<Arc<JwkSet>, AppError> {
        self.keys
            .try_get_with((), self.fetch_keys())
            .await
            .map_err(|err: Arc<AppError>| AppError::backend(err.to_string()))
    }

    async fn fetch_keys(&self) -> Result<Arc<JwkSet>, AppError> {
        debug!(url = %self.jwks_url, "fetching identity provider keys");
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| {
                AppError::backend(format!("failed to fetch identity provider keys: {err}"))
            })?;
        let keys: JwkSet = response.json().await.map_err(|err| {
            AppError::backend(format!("invalid identity provider key set: {err}"))
        })?;
        self.recent_fetch.insert((), ()).await;
        Ok(Arc::new(keys))
    }
}

#[async_trait]
impl AssertionVerifier for FirebaseVerifier {
    async fn verify(&self, assertion: &str) -> Result<VerifiedIdentity, AppError> {
        let header = decode_header(assertion)
            .map_err(|err| AppError::unauthorized(format!("malformed identity token: {err}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::unauthorized(format!(
                "identity token uses unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AppError::unauthorized("identity token has no key id"))?;

        let keys = self.key_set(&kid).await?;
        let jwk = keys.find(&kid).ok_or_else(|| {
            warn!(kid = %kid, "identity token signed with unknown key");
            AppError::unauthorized("identity token signed with unknown key")
        })?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|err| AppError::internal(format!("unusable identity provider key: {err}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.project_id.as_str()]);

        let claims = decode::<FirebaseClaims>(assertion, &key, &validation)
            .map_err(|err| AppError::unauthorized(format!("invalid identity token: {err}")))?
            .claims;
        if claims.sub.is_empty() {
            return Err(AppError::unauthorized("identity token has an empty subject"));
        }

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
            name: claims.name,
            email_verified: claims.email_verified,
            sign_in_provider: claims
                .firebase
                .sign_in_provider
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
