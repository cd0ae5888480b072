//! HTTP API surface of the EchoPath backend.
//!
//! This module owns request parsing, authentication, input validation, and
//! response formatting while delegating translation to a backend
//! implementation and assertion checks to an [`AssertionVerifier`].

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::auth::{
    hash_password, verify_password, AssertionVerifier, AuthenticatedUser, TokenIssuer,
};
use crate::backend::{TranslateRequest, Translator};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::history::HistoryStore;
use crate::languages::{Language, SourceLanguage};
use crate::models::{
    ClearedHistory, EchoRequest, EchoResponse, HistoryEntry, HistoryPage, PasswordLoginRequest,
    RegisterRequest, TextTranslation, TextTranslationRequest, TokenExchangeRequest, TokenResponse,
    TranslationKind, UserProfile,
};

/// Human-readable service name returned by status endpoints.
pub const APP_NAME: &str = "EchoPath API";
/// Service version string returned by status endpoints.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Shortest password accepted by `POST /api/auth/register`.
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    /// Active translation backend.
    pub translator: Arc<dyn Translator>,
    /// Checks identity assertions presented for exchange.
    pub verifier: Arc<dyn AssertionVerifier>,
    pub issuer: TokenIssuer,
    pub accounts: AccountStore,
    pub history: HistoryStore,
}

impl AppState {
    pub fn new(
        cfg: AppConfig,
        translator: Arc<dyn Translator>,
        verifier: Arc<dyn AssertionVerifier>,
    ) -> Self {
        let issuer = TokenIssuer::new(&cfg.secret_key, cfg.token_ttl);
        let history = HistoryStore::new(cfg.history_limit);
        Self {
            cfg,
            translator,
            verifier,
            issuer,
            accounts: AccountStore::new(),
            history,
        }
    }

    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
        self.issuer.authenticate(headers)
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cfg.cors_origins);
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/info", get(info_endpoint))
        .route("/api/auth/firebase", post(exchange_token))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/echo", post(echo))
        .route("/api/translate/text", post(translate_text))
        .route("/api/translation/history", get(list_history))
        .route("/api/translation/history/clear", post(clear_history))
        .route("/api/translation/history/:id", delete(delete_history))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Root endpoint (`GET /`).
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({"message": "Welcome to EchoPath API"}))
}

/// Liveness endpoint (`GET /api/health`).
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "message": "EchoPath API is running"}))
}

/// Service description (`GET /api/info`).
pub async fn info_endpoint() -> Json<serde_json::Value> {
    Json(json!({
        "server": APP_NAME,
        "version": APP_VERSION,
        "authentication": "JWT Bearer Token",
        "languages": Language::ALL.iter().map(|lang| lang.code()).collect::<Vec<_>>(),
        "endpoints": [
            "/api/auth/firebase",
            "/api/auth/register",
            "/api/auth/login",
            "/api/auth/me",
            "/api/echo",
            "/api/translate/text",
            "/api/translation/history",
        ],
    }))
}

/// Exchanges an identity assertion for a bearer token (`POST /api/auth/firebase`).
pub async fn exchange_token(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TokenExchangeRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(req) = payload.map_err(json_rejection)?;
    let assertion = req.firebase_token.trim();
    if assertion.is_empty() {
        return Err(AppError::invalid_request(
            "firebase_token must not be empty",
            Some("firebase_token"),
            None,
        ));
    }

    let identity = state.verifier.verify(assertion).await.map_err(|err| {
        info!(error = %err, "rejected identity assertion");
        err
    })?;
    let profile = state.accounts.record_login(&identity).await;
    let access_token = state
        .issuer
        .issue(&identity.uid, identity.email.as_deref())?;
    info!(uid = %profile.uid, provider = %profile.auth_provider, "issued access token");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// Creates a password account (`POST /api/auth/register`).
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<UserProfile>, AppError> {
    let Json(req) = payload.map_err(json_rejection)?;
    let email = req.email.trim();
    if !email.contains('@') {
        return Err(AppError::invalid_request(
            "email must be an email address",
            Some("email"),
            Some("invalid_email"),
        ));
    }
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::invalid_request(
            format!("password must be at least {MIN_PASSWORD_CHARS} characters"),
            Some("password"),
            Some("password_too_short"),
        ));
    }

    let password = req.password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| AppError::internal(format!("password hashing task failed: {err}")))??;
    let display_name = req.full_name.filter(|name| !name.trim().is_empty());
    let profile = state
        .accounts
        .register_password(email, display_name, hash)
        .await?;
    Ok(Json(profile))
}

/// Exchanges email and password for a bearer token (`POST /api/auth/login`).
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PasswordLoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(req) = payload.map_err(json_rejection)?;
    let rejected = || AppError::unauthorized("incorrect email or password");

    let Some((uid, hash)) = state.accounts.password_credentials(&req.email).await else {
        info!("rejected password login for unknown email");
        return Err(rejected());
    };
    let password = req.password;
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|err| AppError::internal(format!("password check task failed: {err}")))?;
    if !matches {
        info!(uid = %uid, "rejected password login");
        return Err(rejected());
    }

    let profile = state.accounts.touch_login(&uid).await.ok_or_else(rejected)?;
    let access_token = state.issuer.issue(&profile.uid, profile.email.as_deref())?;
    info!(uid = %profile.uid, provider = %profile.auth_provider, "issued access token");

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// Profile of the caller (`GET /api/auth/me`).
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, AppError> {
    let user = state.authenticate(&headers)?;
    // Accounts live in memory; a token that outlived a restart must be re-exchanged.
    let profile = state
        .accounts
        .get(&user.uid)
        .await
        .ok_or_else(|| AppError::unauthorized("account not found"))?;
    Ok(Json(profile))
}

/// Authenticated echo (`POST /api/echo`).
pub async fn echo(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<EchoRequest>, JsonRejection>,
) -> Result<Json<EchoResponse>, AppError> {
    let user = state.authenticate(&headers)?;
    let Json(req) = payload.map_err(json_rejection)?;
    Ok(Json(EchoResponse {
        echo: format!("Echo: {}", req.message),
        original_message: req.message,
        status: "success".to_string(),
        user_email: user.email,
    }))
}

/// Text translation (`POST /api/translate/text`).
pub async fn translate_text(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<TextTranslationRequest>, JsonRejection>,
) -> Result<Json<TextTranslation>, AppError> {
    let user = state.authenticate(&headers)?;
    let Json(req) = payload.map_err(json_rejection)?;

    let source = SourceLanguage::parse(&req.source_lang).ok_or_else(|| {
        AppError::invalid_request(
            format!(
                "unsupported source_lang={:?}; expected auto or one of {}",
                req.source_lang,
                Language::supported_codes()
            ),
            Some("source_lang"),
            Some("unsupported_language"),
        )
    })?;
    let target = Language::parse(&req.target_lang).ok_or_else(|| {
        AppError::invalid_request(
            format!(
                "unsupported target_lang={:?}; expected one of {}",
                req.target_lang,
                Language::supported_codes()
            ),
            Some("target_lang"),
            Some("unsupported_language"),
        )
    })?;

    let chars = req.text.chars().count();
    if chars > state.cfg.max_text_chars {
        return Err(AppError::invalid_request(
            format!(
                "text is {chars} characters; the limit is {}",
                state.cfg.max_text_chars
            ),
            Some("text"),
            Some("text_too_long"),
        ));
    }

    let text = req.text.trim();
    if text.is_empty() {
        return Ok(Json(TextTranslation {
            translated_text: String::new(),
            source_lang: source.code().to_string(),
            target_lang: target.code().to_string(),
            detected_lang: None,
        }));
    }

    let resolved = source.resolve(text);
    let detected_lang = matches!(source, SourceLanguage::Auto).then(|| resolved.code().to_string());

    let translated_text = if resolved == target {
        text.to_string()
    } else {
        state
            .translator
            .translate(TranslateRequest {
                text: text.to_string(),
                source: resolved,
                target,
            })
            .await?
    };

    state
        .history
        .record(
            &user.uid,
            HistoryEntry {
                id: Uuid::new_v4(),
                kind: TranslationKind::Text,
                source_text: text.to_string(),
                translated_text: translated_text.clone(),
                source_lang: resolved.code().to_string(),
                target_lang: target.code().to_string(),
                created_at: Utc::now(),
            },
        )
        .await;
    info!(uid = %user.uid, source = %resolved, target = %target, chars, "translated text");

    Ok(Json(TextTranslation {
        translated_text,
        source_lang: resolved.code().to_string(),
        target_lang: target.code().to_string(),
        detected_lang,
    }))
}

/// Caller's history, newest first (`GET /api/translation/history`).
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<HistoryPage>, AppError> {
    let user = state.authenticate(&headers)?;
    Ok(Json(HistoryPage {
        history: state.history.list(&user.uid).await,
    }))
}

/// Deletes one history entry (`DELETE /api/translation/history/:id`).
pub async fn delete_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let user = state.authenticate(&headers)?;
    if !state.history.delete(&user.uid, id).await {
        return Err(AppError::not_found(format!("history entry {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Clears the caller's history (`POST /api/translation/history/clear`).
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ClearedHistory>, AppError> {
    let user = state.authenticate(&headers)?;
    let cleared = state.history.clear(&user.uid).await;
    info!(uid = %user.uid, cleared, "cleared history");
    Ok(Json(ClearedHistory { cleared }))
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::invalid_request(rejection.body_text(), None, Some("invalid_json"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::{AssertionVerifier, VerifiedIdentity};
    use crate::backend::{TranslateRequest, Translator};
    use crate::config::AppConfig;
    use crate::error::AppError;

    use super::{build_router, AppState};

    #[derive(Default)]
    struct MockTranslator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(&self, req: TranslateRequest) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if req.text == "FAIL" {
                return Err(AppError::backend("translation service unavailable"));
            }
            Ok(format!("[{}->{}] {}", req.source.code(), req.target.code(), req.text))
        }
    }

    /// Accepts assertions of the form `valid:<uid>`.
    struct MockVerifier;

    #[async_trait]
    impl AssertionVerifier for MockVerifier {
        async fn verify(&self, assertion: &str) -> Result<VerifiedIdentity, AppError> {
            let uid = assertion
                .strip_prefix("valid:")
                .ok_or_else(|| AppError::unauthorized("invalid identity token"))?;
            Ok(VerifiedIdentity {
                uid: uid.to_string(),
                email: Some(format!("{uid}@example.com")),
                name: None,
                email_verified: true,
                sign_in_provider: "password".to_string(),
            })
        }
    }

    fn test_cfg() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            secret_key: "test-secret".to_string(),
            token_ttl: Duration::from_secs(1800),
            firebase_project_id: "echopath-test".to_string(),
            firebase_jwks_url: "http://127.0.0.1:1/jwks".to_string(),
            translator_url: "http://127.0.0.1:1".to_string(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            history_limit: 10,
            max_text_chars: 20,
        }
    }

    fn app_with(translator: Arc<MockTranslator>) -> axum::Router {
        let state = Arc::new(AppState::new(test_cfg(), translator, Arc::new(MockVerifier)));
        build_router(state)
    }

    fn app() -> axum::Router {
        app_with(Arc::new(MockTranslator::default()))
    }

    async fn parse_json_response(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), 1024 * 1024)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .uri(uri)
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri).method("GET");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn sign_in(app: &axum::Router, uid: &str) -> String {
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/firebase",
                None,
                json!({"firebase_token": format!("valid:{uid}")}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["token_type"], "bearer");
        payload["access_token"].as_str().expect("token").to_string()
    }

    #[tokio::test]
    async fn public_endpoints_need_no_token() {
        let app = app();
        for uri in ["/", "/api/health", "/api/info"] {
            let res = app.clone().oneshot(get(uri, None)).await.expect("response");
            assert_eq!(res.status(), StatusCode::OK, "{uri}");
        }

        let res = app.oneshot(get("/api/health", None)).await.expect("response");
        let payload = parse_json_response(res).await;
        assert_eq!(payload["status"], "healthy");
    }

    #[tokio::test]
    async fn exchanged_token_opens_protected_routes() {
        let app = app();
        let token = sign_in(&app, "asha").await;

        let res = app
            .clone()
            .oneshot(get("/api/auth/me", Some(&token)))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["uid"], "asha");
        assert_eq!(payload["email"], "asha@example.com");
        assert_eq!(payload["auth_provider"], "password");

        let res = app
            .oneshot(post_json("/api/echo", Some(&token), json!({"message": "hi"})))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["echo"], "Echo: hi");
        assert_eq!(payload["original_message"], "hi");
        assert_eq!(payload["status"], "success");
        assert_eq!(payload["user_email"], "asha@example.com");
    }

    #[tokio::test]
    async fn invalid_assertion_is_unauthorized() {
        let res = app()
            .oneshot(post_json(
                "/api/auth/firebase",
                None,
                json!({"firebase_token": "forged"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[tokio::test]
    async fn empty_assertion_is_bad_request() {
        let res = app()
            .oneshot(post_json("/api/auth/firebase", None, json!({"firebase_token": " "})))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["param"], "firebase_token");
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_or_bad_tokens() {
        let app = app();

        let res = app.clone().oneshot(get("/api/translation/history", None)).await.expect("response");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["type"], "authentication_error");

        let res = app
            .oneshot(get("/api/translation/history", Some("not-a-jwt")))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lowercase_bearer_scheme_is_accepted() {
        let app = app();
        let token = sign_in(&app, "asha").await;

        let req = axum::http::Request::builder()
            .uri("/api/auth/me")
            .method("GET")
            .header("Authorization", format!("bearer {token}"))
            .body(Body::empty())
            .expect("request");
        let res = app.oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn auto_source_is_detected_and_recorded() {
        let translator = Arc::new(MockTranslator::default());
        let app = app_with(translator.clone());
        let token = sign_in(&app, "asha").await;

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/translate/text",
                Some(&token),
                json!({"text": " नमस्ते ", "source_lang": "auto", "target_lang": "en"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["translated_text"], "[hi->en] नमस्ते");
        assert_eq!(payload["source_lang"], "hi");
        assert_eq!(payload["detected_lang"], "hi");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);

        let res = app
            .oneshot(get("/api/translation/history", Some(&token)))
            .await
            .expect("response");
        let payload = parse_json_response(res).await;
        let history = payload["history"].as_array().expect("array");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["kind"], "text");
        assert_eq!(history[0]["source_text"], "नमस्ते");
    }

    #[tokio::test]
    async fn same_language_and_empty_text_skip_the_backend() {
        let translator = Arc::new(MockTranslator::default());
        let app = app_with(translator.clone());
        let token = sign_in(&app, "asha").await;

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/translate/text",
                Some(&token),
                json!({"text": "hello", "source_lang": "en", "target_lang": "en"}),
            ))
            .await
            .expect("response");
        let payload = parse_json_response(res).await;
        assert_eq!(payload["translated_text"], "hello");
        assert!(payload.get("detected_lang").is_none());

        let res = app
            .oneshot(post_json(
                "/api/translate/text",
                Some(&token),
                json!({"text": "   ", "source_lang": "en", "target_lang": "hi"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["translated_text"], "");

        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn translation_input_is_validated() {
        let app = app();
        let token = sign_in(&app, "asha").await;

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/translate/text",
                Some(&token),
                json!({"text": "hello", "source_lang": "en", "target_lang": "fr"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["code"], "unsupported_language");
        assert_eq!(payload["error"]["param"], "target_lang");

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/translate/text",
                Some(&token),
                json!({"text": "a".repeat(21), "source_lang": "en", "target_lang": "hi"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["code"], "text_too_long");

        let res = app
            .oneshot(post_json("/api/translate/text", Some(&token), json!({"text": "hi"})))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["code"], "invalid_json");
    }

    #[tokio::test]
    async fn backend_failure_is_bad_gateway_and_not_recorded() {
        let app = app();
        let token = sign_in(&app, "asha").await;

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/translate/text",
                Some(&token),
                json!({"text": "FAIL", "source_lang": "en", "target_lang": "hi"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["code"], "translation_failed");

        let res = app
            .oneshot(get("/api/translation/history", Some(&token)))
            .await
            .expect("response");
        let payload = parse_json_response(res).await;
        assert!(payload["history"].as_array().expect("array").is_empty());
    }

    #[tokio::test]
    async fn history_delete_and_clear_are_scoped_to_caller() {
        let app = app();
        let asha = sign_in(&app, "asha").await;
        let ravi = sign_in(&app, "ravi").await;

        for text in ["one", "two"] {
            let res = app
                .clone()
                .oneshot(post_json(
                    "/api/translate/text",
                    Some(&asha),
                    json!({"text": text, "source_lang": "en", "target_lang": "hi"}),
                ))
                .await
                .expect("response");
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app
            .clone()
            .oneshot(get("/api/translation/history", Some(&asha)))
            .await
            .expect("response");
        let payload = parse_json_response(res).await;
        let history = payload["history"].as_array().expect("array");
        assert_eq!(history[0]["source_text"], "two");
        assert_eq!(history[1]["source_text"], "one");
        let id = history[1]["id"].as_str().expect("id").to_string();

        let delete = |token: &str| {
            Request::builder()
                .uri(format!("/api/translation/history/{id}"))
                .method("DELETE")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request")
        };

        let res = app.clone().oneshot(delete(ravi.as_str())).await.expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app.clone().oneshot(delete(asha.as_str())).await.expect("response");
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = app.clone().oneshot(delete(asha.as_str())).await.expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .oneshot(post_json("/api/translation/history/clear", Some(&asha), json!({})))
            .await
            .expect("response");
        let payload = parse_json_response(res).await;
        assert_eq!(payload["cleared"], 1);
    }

    #[tokio::test]
    async fn registered_account_logs_in_with_password() {
        let app = app();

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/register",
                None,
                json!({"email": "Meera@Example.com", "password": "correct horse", "full_name": "Meera"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let registered = parse_json_response(res).await;
        assert_eq!(registered["email"], "meera@example.com");
        assert_eq!(registered["auth_provider"], "email");
        assert_eq!(registered["display_name"], "Meera");

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                None,
                json!({"username": "meera@example.com", "password": "correct horse"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["token_type"], "bearer");
        let token = payload["access_token"].as_str().expect("token").to_string();

        let res = app
            .oneshot(get("/api/auth/me", Some(&token)))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["uid"], registered["uid"]);
        assert_eq!(payload["auth_provider"], "email");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_unauthorized() {
        let app = app();
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/register",
                None,
                json!({"email": "meera@example.com", "password": "correct horse"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        for body in [
            json!({"email": "meera@example.com", "password": "battery staple"}),
            json!({"email": "nobody@example.com", "password": "correct horse"}),
        ] {
            let res = app
                .clone()
                .oneshot(post_json("/api/auth/login", None, body))
                .await
                .expect("response");
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
            let payload = parse_json_response(res).await;
            assert_eq!(payload["error"]["message"], "incorrect email or password");
        }
    }

    #[tokio::test]
    async fn registration_is_validated() {
        let app = app();
        let body = json!({"email": "meera@example.com", "password": "correct horse"});
        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", None, body.clone()))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", None, body))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["code"], "email_taken");

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/register",
                None,
                json!({"email": "ravi@example.com", "password": "short"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["code"], "password_too_short");

        let res = app
            .oneshot(post_json(
                "/api/auth/register",
                None,
                json!({"email": "ravi", "password": "correct horse"}),
            ))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"]["param"], "email");
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() {
        let req = Request::builder()
            .uri("/api/translate/text")
            .method("OPTIONS")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .expect("request");
        let res = app().oneshot(req).await.expect("response");
        assert_eq!(
            res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }
}
