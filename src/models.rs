//! JSON payloads exchanged between the client and the API server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /api/auth/firebase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchangeRequest {
    pub firebase_token: String,
}

/// Bearer token issued by `POST /api/auth/firebase`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Body of `POST /api/auth/register`.
#[derive(Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Body of `POST /api/auth/login`. `username` is accepted for `email`.
#[derive(Clone, Deserialize)]
pub struct PasswordLoginRequest {
    #[serde(alias = "username")]
    pub email: String,
    pub password: String,
}

/// Body of `POST /api/translate/text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextTranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

/// Result of a text translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextTranslation {
    pub translated_text: String,
    /// Source language actually used, after `auto` detection.
    pub source_lang: String,
    pub target_lang: String,
    /// Set when the client asked for `auto`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_lang: Option<String>,
}

/// Which page of the product produced a history entry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationKind {
    Text,
    Voice,
    Photo,
}

/// One past translation of the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub kind: TranslationKind,
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `GET /api/translation/history`, newest entry first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub history: Vec<HistoryEntry>,
}

/// Body of `POST /api/translation/history/clear`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedHistory {
    pub cleared: usize,
}

/// Account as returned by `GET /api/auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub auth_provider: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// Body of `POST /api/echo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoResponse {
    pub echo: String,
    pub original_message: String,
    pub status: String,
    pub user_email: Option<String>,
}
