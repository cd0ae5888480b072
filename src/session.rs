//! Session bridge between the identity provider and the EchoPath API.
//!
//! The bridge turns an identity assertion into an application bearer token,
//! keeps that token in durable storage, attaches it to resource calls, and on
//! a 401 refreshes it once and retries the call once. It never loops.
//!
//! Per call the flow is strictly sequential: attach token, send, maybe
//! refresh, maybe retry, return. Independent calls run concurrently; their
//! refreshes are coalesced so one rejected token costs one exchange.

use std::fmt;
use std::sync::{Arc, Weak};

use http::{Method, StatusCode};
use reqwest::multipart::{Form, Part};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::identity::{IdentityAssertion, IdentityProvider};
use crate::models::{TokenExchangeRequest, TokenResponse};
use crate::token_store::{TokenStore, API_TOKEN_KEY};

/// Path of the endpoint that trades an identity assertion for a bearer token.
pub const TOKEN_EXCHANGE_PATH: &str = "/api/auth/firebase";

/// Application-issued credential required by resource endpoints.
#[derive(Clone, Eq, PartialEq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// One field of a multipart resource request.
#[derive(Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl fmt::Debug for FormPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { name, value } => f
                .debug_struct("Text")
                .field("name", name)
                .field("value", value)
                .finish(),
            Self::File {
                name,
                file_name,
                mime,
                bytes,
            } => f
                .debug_struct("File")
                .field("name", name)
                .field("file_name", file_name)
                .field("mime", mime)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Request body, kept in a form that can be rebuilt for the retry.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormPart>),
}

/// A resource endpoint call described independently of authorization.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    /// Path relative to the API base URL, starting with `/`.
    pub path: String,
    pub body: RequestBody,
}

impl ResourceRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, RequestBody::Empty)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, RequestBody::Empty)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path, RequestBody::Empty)
    }

    pub fn post_json(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path, RequestBody::Json(body))
    }

    pub fn post_multipart(path: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self::new(Method::POST, path, RequestBody::Multipart(parts))
    }

    fn new(method: Method, path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

/// Owns the current bearer token for one application instance.
///
/// Construct one per process and share it behind an `Arc`.
pub struct SessionBridge {
    http: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn TokenStore>,
    /// Token attached to outgoing calls; mirrors `API_TOKEN_KEY` in `store`.
    default_token: RwLock<Option<BearerToken>>,
    refresh_gate: Mutex<()>,
}

impl SessionBridge {
    /// Creates a bridge, picking up a token left in `store` by an earlier
    /// session.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let cached = store.get(API_TOKEN_KEY).map(BearerToken::new);
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            identity,
            store,
            default_token: RwLock::new(cached),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Returns the cached bearer token, exchanging a fresh identity
    /// assertion for one when nothing is cached.
    ///
    /// Returns `None` when nobody is signed in or the exchange fails; the
    /// caller then proceeds unauthenticated and lets the endpoint decide.
    pub async fn ensure_token(&self) -> Option<BearerToken> {
        if let Some(token) = self.current_token().await {
            return Some(token);
        }

        let Some(principal) = self.identity.current_principal().await else {
            debug!("no signed-in principal; continuing without bearer token");
            return None;
        };

        let obtained = async {
            let assertion = self.identity.id_token(false).await?;
            self.exchange(&assertion).await
        }
        .await;

        match obtained {
            Ok(token) => {
                self.install(token.clone()).await;
                info!(uid = %principal.uid, "obtained bearer token");
                Some(token)
            }
            Err(err) => {
                warn!(uid = %principal.uid, error = %err, "could not obtain bearer token");
                None
            }
        }
    }

    /// Sends `request` with the current bearer token attached.
    ///
    /// Any response other than 401 is returned unchanged. A 401 triggers one
    /// forced refresh and one retry; a second 401 yields
    /// [`ClientError::Unauthorized`]. Refresh failures are returned as-is and
    /// transport failures as [`ClientError::Network`].
    pub async fn call_resource(
        &self,
        request: &ResourceRequest,
    ) -> Result<reqwest::Response, ClientError> {
        let token = self.current_token().await;
        let response = self.send(request, token.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!(
            method = %request.method,
            path = %request.path,
            had_token = token.is_some(),
            "resource rejected authorization; refreshing bearer token"
        );
        let fresh = self.refresh(token.as_ref()).await?;

        let retried = self.send(request, Some(&fresh)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(
                method = %request.method,
                path = %request.path,
                "resource rejected refreshed bearer token"
            );
            return Err(ClientError::Unauthorized);
        }
        Ok(retried)
    }

    /// Forgets the bearer token in memory and in durable storage.
    pub async fn clear_session(&self) -> Result<(), ClientError> {
        self.default_token.write().await.take();
        self.store.remove(API_TOKEN_KEY)?;
        debug!("session cleared");
        Ok(())
    }

    /// Clears the session whenever the identity provider reports sign-out.
    ///
    /// The task ends once the bridge is dropped or the provider goes away.
    pub fn spawn_sign_out_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let bridge: Weak<Self> = Arc::downgrade(self);
        let mut changes = self.identity.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let signed_out = changes.borrow_and_update().is_none();
                if !signed_out {
                    continue;
                }
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                info!("principal signed out; clearing session");
                if let Err(err) = bridge.clear_session().await {
                    warn!(error = %err, "failed to clear session after sign-out");
                }
            }
        })
    }

    async fn current_token(&self) -> Option<BearerToken> {
        if let Some(token) = self.default_token.read().await.clone() {
            return Some(token);
        }
        let stored = self.store.get(API_TOKEN_KEY).map(BearerToken::new)?;
        *self.default_token.write().await = Some(stored.clone());
        Some(stored)
    }

    async fn install(&self, token: BearerToken) {
        if let Err(err) = self.store.set(API_TOKEN_KEY, token.as_str()) {
            warn!(error = %err, "failed to persist bearer token; keeping it in memory");
        }
        *self.default_token.write().await = Some(token);
    }

    /// Replaces the token that `rejected` was, unless a concurrent call has
    /// already done so.
    async fn refresh(&self, rejected: Option<&BearerToken>) -> Result<BearerToken, ClientError> {
        let _gate = self.refresh_gate.lock().await;

        if let Some(current) = self.current_token().await {
            if rejected != Some(&current) {
                debug!("bearer token already refreshed by a concurrent call");
                return Ok(current);
            }
        }

        self.default_token.write().await.take();
        if let Err(err) = self.store.remove(API_TOKEN_KEY) {
            warn!(error = %err, "failed to discard stale bearer token");
        }

        if self.identity.current_principal().await.is_none() {
            return Err(ClientError::Unauthenticated);
        }
        let assertion = self.identity.id_token(true).await?;
        let token = self.exchange(&assertion).await?;
        self.install(token.clone()).await;

        info!("bearer token refreshed");
        Ok(token)
    }

    async fn exchange(&self, assertion: &IdentityAssertion) -> Result<BearerToken, ClientError> {
        let url = format!("{}{}", self.base_url, TOKEN_EXCHANGE_PATH);
        let response = self
            .http
            .post(&url)
            .json(&TokenExchangeRequest {
                firebase_token: assertion.as_str().to_string(),
            })
            .send()
            .await
            .map_err(ClientError::Network)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(ClientError::Network)?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "token exchange rejected");
            return Err(ClientError::ExchangeFailed(format!(
                "HTTP {status}: {}",
                error_message(&bytes)
            )));
        }

        let body: TokenResponse = serde_json::from_slice(&bytes).map_err(|err| {
            ClientError::ExchangeFailed(format!("invalid exchange response: {err}"))
        })?;
        if !body.token_type.eq_ignore_ascii_case("bearer") {
            return Err(ClientError::ExchangeFailed(format!(
                "unsupported token_type={:?}",
                body.token_type
            )));
        }
        if body.access_token.is_empty() {
            return Err(ClientError::ExchangeFailed(
                "empty access_token".to_string(),
            ));
        }

        Ok(BearerToken::new(body.access_token))
    }

    async fn send(
        &self,
        request: &ResourceRequest,
        token: Option<&BearerToken>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        debug!(method = %request.method, path = %request.path, "sending resource request");
        builder.send().await.map_err(ClientError::Network)
    }
}

fn build_form(parts: &[FormPart]) -> Result<Form, ClientError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let file = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|err| {
                        ClientError::invalid_request(format!("invalid mime type {mime:?}: {err}"))
                    })?;
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Extracts a readable message from an API error body.
pub(crate) fn error_message(bytes: &[u8]) -> String {
    let parsed = serde_json::from_slice::<serde_json::Value>(bytes).ok();
    let message = parsed.as_ref().and_then(|value| {
        value["error"]["message"]
            .as_str()
            .or_else(|| value["detail"].as_str())
            .map(ToOwned::to_owned)
    });
    message.unwrap_or_else(|| String::from_utf8_lossy(bytes).trim().to_string())
}
