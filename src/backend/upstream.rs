//! Translation backend that forwards to an external model service.
//!
//! The service hosts the IndicTrans2 checkpoints and exposes
//! `POST /translate` taking script-qualified language tags.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{TranslateRequest, Translator};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::session::error_message;

/// Model inference can take a while on first load of a checkpoint.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    text: &'a str,
    src_lang: &'a str,
    tgt_lang: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct UpstreamResponse {
    #[serde(alias = "translation")]
    translated_text: String,
}

pub struct UpstreamTranslator {
    http: reqwest::Client,
    endpoint: String,
}

impl UpstreamTranslator {
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|err| AppError::internal(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/translate", cfg.translator_url),
        })
    }
}

#[async_trait]
impl Translator for UpstreamTranslator {
    async fn translate(&self, req: TranslateRequest) -> Result<String, AppError> {
        let checkpoint = req.checkpoint();
        let body = UpstreamRequest {
            text: &req.text,
            src_lang: req.source.tag(),
            tgt_lang: req.target.tag(),
            model: checkpoint.model_id(),
        };
        debug!(
            src = req.source.tag(),
            tgt = req.target.tag(),
            model = checkpoint.model_id(),
            "forwarding translation"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "translator unreachable");
                AppError::backend(format!("translation service unavailable: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            let message = error_message(&bytes);
            warn!(status = status.as_u16(), message = %message, "translator rejected request");
            return Err(AppError::backend(format!(
                "translation service returned {status}: {message}"
            )));
        }

        let parsed: UpstreamResponse = response.json().await.map_err(|err| {
            AppError::backend(format!("invalid translation service response: {err}"))
        })?;
        Ok(parsed.translated_text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::UpstreamTranslator;
    use crate::backend::{TranslateRequest, Translator};
    use crate::config::AppConfig;
    use crate::error::AppError;
    use crate::languages::Language;

    fn cfg(url: String) -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            secret_key: "secret".to_string(),
            token_ttl: Duration::from_secs(1800),
            firebase_project_id: "echopath-test".to_string(),
            firebase_jwks_url: "http://127.0.0.1:1/jwks".to_string(),
            translator_url: url,
            cors_origins: Vec::new(),
            history_limit: 10,
            max_text_chars: 100,
        }
    }

    #[tokio::test]
    async fn sends_tags_and_checkpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/translate")
            .match_body(Matcher::Json(json!({
                "text": "नमस्ते",
                "src_lang": "hin_Deva",
                "tgt_lang": "tam_Taml",
                "model": "ai4bharat/indictrans2-indic-indic-dist-320M",
            })))
            .with_status(200)
            .with_body(r#"{"translated_text":"வணக்கம்"}"#)
            .expect(1)
            .create_async()
            .await;

        let translator = UpstreamTranslator::new(&cfg(server.url())).unwrap();
        let out = translator
            .translate(TranslateRequest {
                text: "नमस्ते".to_string(),
                source: Language::Hindi,
                target: Language::Tamil,
            })
            .await
            .unwrap();

        assert_eq!(out, "வணக்கம்");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upstream_failure_is_backend_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/translate")
            .with_status(500)
            .with_body(r#"{"detail":"model not loaded"}"#)
            .create_async()
            .await;

        let translator = UpstreamTranslator::new(&cfg(server.url())).unwrap();
        let err = translator
            .translate(TranslateRequest {
                text: "hello".to_string(),
                source: Language::English,
                target: Language::Hindi,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Backend(ref m) if m.contains("model not loaded")));
    }
}
