//! Identity provider seam and the Firebase Auth REST adapter.
//!
//! The session bridge only needs three things from an identity provider: who
//! is signed in, a fresh identity assertion for that principal, and a stream
//! of sign-in/sign-out changes.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::token_store::TokenStore;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";
/// Cached assertions this close to expiry are refreshed even when not forced.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

const UID_KEY: &str = "firebase_uid";
const EMAIL_KEY: &str = "firebase_email";
const REFRESH_TOKEN_KEY: &str = "firebase_refresh_token";

/// Secure-token errors meaning the refresh token can no longer mint
/// assertions; only a new sign-in helps.
const REVOKED_SESSION_ERRORS: [&str; 4] = [
    "TOKEN_EXPIRED",
    "INVALID_REFRESH_TOKEN",
    "USER_DISABLED",
    "USER_NOT_FOUND",
];

/// Short-lived credential proving the identity of the signed-in principal.
#[derive(Clone, Eq, PartialEq)]
pub struct IdentityAssertion(String);

impl IdentityAssertion {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdentityAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityAssertion(<redacted>)")
    }
}

/// The signed-in user as seen by the identity provider.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: Option<String>,
}

/// Source of identity assertions for the current principal.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the signed-in principal, if any.
    async fn current_principal(&self) -> Option<Principal>;

    /// Returns an assertion for the current principal. With `force_refresh`
    /// the provider must mint a new one instead of reusing a cached value.
    async fn id_token(&self, force_refresh: bool) -> Result<IdentityAssertion, ClientError>;

    /// Subscribes to sign-in (`Some`) and sign-out (`None`) transitions.
    fn subscribe(&self) -> watch::Receiver<Option<Principal>>;
}

struct CachedAssertion {
    assertion: IdentityAssertion,
    expires_at: Instant,
}

struct FirebaseSession {
    principal: Principal,
    refresh_token: String,
    id_token: Option<CachedAssertion>,
}

/// Firebase Auth over its REST API.
///
/// The principal and its refresh token are persisted in the session store,
/// so a later process starts out signed in and can mint assertions without
/// asking for the password again.
pub struct FirebaseIdentity {
    http: reqwest::Client,
    api_key: Option<String>,
    identity_url: String,
    secure_token_url: String,
    store: Arc<dyn TokenStore>,
    session: Mutex<Option<FirebaseSession>>,
    changes: watch::Sender<Option<Principal>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordSignIn<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Deserialize)]
struct FirebaseErrorPayload {
    error: FirebaseErrorBody,
}

#[derive(Deserialize)]
struct FirebaseErrorBody {
    message: String,
}

impl FirebaseIdentity {
    /// Creates the adapter and restores a persisted principal from `store`.
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let session = restore_session(store.as_ref());
        let (changes, _) = watch::channel(session.as_ref().map(|s| s.principal.clone()));
        Self {
            http,
            api_key,
            identity_url: IDENTITY_TOOLKIT_URL.to_string(),
            secure_token_url: SECURE_TOKEN_URL.to_string(),
            store,
            session: Mutex::new(session),
            changes,
        }
    }

    #[cfg(test)]
    pub fn with_endpoints(
        mut self,
        identity_url: impl Into<String>,
        secure_token_url: impl Into<String>,
    ) -> Self {
        self.identity_url = identity_url.into();
        self.secure_token_url = secure_token_url.into();
        self
    }

    /// Signs in with email and password and persists the new principal.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ClientError> {
        let api_key = self.api_key()?;
        let url = format!("{}/accounts:signInWithPassword", self.identity_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&PasswordSignIn {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(ClientError::Network)?;

        let body: SignInResponse = read_firebase_json(response).await?;
        let principal = Principal {
            uid: body.local_id,
            email: body.email.or_else(|| Some(email.to_string())),
        };
        let session = FirebaseSession {
            principal: principal.clone(),
            refresh_token: body.refresh_token,
            id_token: Some(CachedAssertion {
                assertion: IdentityAssertion::new(body.id_token),
                expires_at: expiry_from(&body.expires_in)?,
            }),
        };

        persist_session(self.store.as_ref(), &session)?;
        *self.session.lock().await = Some(session);
        self.changes.send_replace(Some(principal.clone()));

        info!(uid = %principal.uid, "signed in with identity provider");
        Ok(principal)
    }

    /// Forgets the principal and notifies subscribers.
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        let previous = self.session.lock().await.take();
        self.forget()?;

        if let Some(session) = previous {
            info!(uid = %session.principal.uid, "signed out of identity provider");
        }
        Ok(())
    }

    fn forget(&self) -> Result<(), ClientError> {
        for key in [UID_KEY, EMAIL_KEY, REFRESH_TOKEN_KEY] {
            self.store.remove(key)?;
        }
        self.changes.send_replace(None);
        Ok(())
    }

    fn api_key(&self) -> Result<&str, ClientError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ClientError::identity("FIREBASE_API_KEY is not set"))
    }

    async fn refresh(&self, session: &mut FirebaseSession) -> Result<IdentityAssertion, ClientError> {
        let api_key = self.api_key()?;
        let url = format!("{}/token", self.secure_token_url);
        debug!(uid = %session.principal.uid, "refreshing identity assertion");

        let response = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(ClientError::Network)?;

        let body: RefreshResponse = read_firebase_json(response)
            .await
            .map_err(revoked_as_unauthenticated)?;
        let assertion = IdentityAssertion::new(body.id_token);

        if body.refresh_token != session.refresh_token {
            session.refresh_token = body.refresh_token;
            self.store
                .set(REFRESH_TOKEN_KEY, &session.refresh_token)?;
        }
        session.id_token = Some(CachedAssertion {
            assertion: assertion.clone(),
            expires_at: expiry_from(&body.expires_in)?,
        });

        Ok(assertion)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn current_principal(&self) -> Option<Principal> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.principal.clone())
    }

    async fn id_token(&self, force_refresh: bool) -> Result<IdentityAssertion, ClientError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(ClientError::Unauthenticated)?;

        if !force_refresh {
            if let Some(cached) = &session.id_token {
                if cached.expires_at > Instant::now() + REFRESH_MARGIN {
                    return Ok(cached.assertion.clone());
                }
            }
        }

        let refreshed = self.refresh(session).await;
        if matches!(refreshed, Err(ClientError::Unauthenticated)) {
            if let Some(stale) = guard.take() {
                warn!(uid = %stale.principal.uid, "identity session revoked; signing out");
            }
            self.forget()?;
        }
        refreshed
    }

    fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        self.changes.subscribe()
    }
}

fn restore_session(store: &dyn TokenStore) -> Option<FirebaseSession> {
    let uid = store.get(UID_KEY)?;
    let refresh_token = store.get(REFRESH_TOKEN_KEY)?;
    Some(FirebaseSession {
        principal: Principal {
            uid,
            email: store.get(EMAIL_KEY),
        },
        refresh_token,
        id_token: None,
    })
}

fn persist_session(store: &dyn TokenStore, session: &FirebaseSession) -> Result<(), ClientError> {
    store.set(UID_KEY, &session.principal.uid)?;
    match &session.principal.email {
        Some(email) => store.set(EMAIL_KEY, email)?,
        None => store.remove(EMAIL_KEY)?,
    }
    store.set(REFRESH_TOKEN_KEY, &session.refresh_token)
}

fn revoked_as_unauthenticated(err: ClientError) -> ClientError {
    match err {
        ClientError::Identity(message)
            if REVOKED_SESSION_ERRORS
                .iter()
                .any(|code| message.starts_with(code)) =>
        {
            ClientError::Unauthenticated
        }
        other => other,
    }
}

fn expiry_from(expires_in: &str) -> Result<Instant, ClientError> {
    let secs = expires_in.trim().parse::<u64>().map_err(|_| {
        ClientError::decode(format!("invalid expires_in={expires_in:?}; expected seconds"))
    })?;
    Ok(Instant::now() + Duration::from_secs(secs))
}

async fn read_firebase_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(ClientError::Network)?;

    if !status.is_success() {
        let message = serde_json::from_slice::<FirebaseErrorPayload>(&bytes)
            .map(|payload| payload.error.message)
            .unwrap_or_else(|_| format!("HTTP {status}"));
        warn!(status = status.as_u16(), message = %message, "identity provider rejected request");
        return Err(ClientError::identity(message));
    }

    serde_json::from_slice(&bytes)
        .map_err(|err| ClientError::decode(format!("invalid identity provider response: {err}")))
}
