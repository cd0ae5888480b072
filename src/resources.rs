//! Typed client for the EchoPath resource endpoints.
//!
//! Every call goes through the [`SessionBridge`], so callers never touch
//! tokens. Inputs are validated before anything is sent.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ClientError;
use crate::languages::{Language, SourceLanguage};
use crate::models::{
    ClearedHistory, HistoryEntry, HistoryPage, TextTranslation, UserProfile,
};
use crate::session::{error_message, FormPart, ResourceRequest, SessionBridge};

/// A file to upload, with its name and content type.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Reads `path` from disk and guesses the content type from its extension.
    pub async fn read(path: &Path) -> Result<Self, ClientError> {
        let owned = path.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(owned))
            .await
            .map_err(|err| ClientError::invalid_request(format!("file read task failed: {err}")))?
            .map_err(|err| {
                ClientError::invalid_request(format!("failed to read {:?}: {err}", path))
            })?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self {
            mime: mime_for(&file_name).to_string(),
            file_name,
            bytes,
        })
    }

    fn into_part(self, field: &str) -> Result<FormPart, ClientError> {
        if self.bytes.is_empty() {
            return Err(ClientError::invalid_request(format!(
                "{} is empty",
                self.file_name
            )));
        }
        Ok(FormPart::File {
            name: field.to_string(),
            file_name: self.file_name,
            mime: self.mime,
            bytes: self.bytes,
        })
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Speech recognized from an upload and its translation.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceTranslation {
    #[serde(alias = "transcription", alias = "original_text")]
    pub transcript: String,
    pub translated_text: String,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
}

/// Text read from a photo and its translation.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoTranslation {
    #[serde(alias = "original_text")]
    pub extracted_text: String,
    pub translated_text: String,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
}

/// Text read from an image.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedText {
    #[serde(alias = "extracted_text")]
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Deserialize)]
struct SynthesisResponse {
    audio: String,
    format: String,
}

/// Decoded speech audio.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    /// Container format reported by the server, for example `mp3`.
    pub format: String,
}

/// Client for translation, OCR, speech, and history endpoints.
#[derive(Clone)]
pub struct EchoPathClient {
    bridge: Arc<SessionBridge>,
}

impl EchoPathClient {
    pub fn new(bridge: Arc<SessionBridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<SessionBridge> {
        &self.bridge
    }

    /// `POST /api/translate/text`
    pub async fn translate_text(
        &self,
        text: &str,
        source: SourceLanguage,
        target: Language,
    ) -> Result<TextTranslation, ClientError> {
        let text = non_empty(text, "text")?;
        let request = ResourceRequest::post_json(
            "/api/translate/text",
            json!({
                "text": text,
                "source_lang": source.code(),
                "target_lang": target.code(),
            }),
        );
        self.execute(request).await
    }

    /// `POST /api/translate/voice` with a recorded audio clip.
    pub async fn translate_voice(
        &self,
        audio: Upload,
        source: SourceLanguage,
        target: Language,
    ) -> Result<VoiceTranslation, ClientError> {
        let parts = vec![
            audio.into_part("audio")?,
            text_part("source_lang", source.code()),
            text_part("target_lang", target.code()),
        ];
        self.execute(ResourceRequest::post_multipart("/api/translate/voice", parts))
            .await
    }

    /// `POST /api/translate/photo` with a photographed page.
    pub async fn translate_photo(
        &self,
        image: Upload,
        source: SourceLanguage,
        target: Language,
    ) -> Result<PhotoTranslation, ClientError> {
        let parts = vec![
            image.into_part("image")?,
            text_part("source_lang", source.code()),
            text_part("target_lang", target.code()),
        ];
        self.execute(ResourceRequest::post_multipart("/api/translate/photo", parts))
            .await
    }

    /// `POST /api/ocr/extract`; `hints` narrows the scripts to look for.
    pub async fn extract_text(
        &self,
        image: Upload,
        hints: &[Language],
    ) -> Result<ExtractedText, ClientError> {
        let mut parts = vec![image.into_part("image")?];
        parts.extend(hints.iter().map(|lang| text_part("lang", lang.code())));
        self.execute(ResourceRequest::post_multipart("/api/ocr/extract", parts))
            .await
    }

    /// `POST /api/tts/synthesize`
    pub async fn synthesize(&self, text: &str, lang: Language) -> Result<SpeechAudio, ClientError> {
        let text = non_empty(text, "text")?;
        let request = ResourceRequest::post_json(
            "/api/tts/synthesize",
            json!({"text": text, "lang": lang.code()}),
        );
        let body: SynthesisResponse = self.execute(request).await?;
        let bytes = STANDARD
            .decode(body.audio.trim())
            .map_err(|err| ClientError::decode(format!("audio is not valid base64: {err}")))?;
        Ok(SpeechAudio {
            bytes,
            format: body.format,
        })
    }

    /// `GET /api/translation/history`, newest first.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ClientError> {
        let page: HistoryPage = self
            .execute(ResourceRequest::get("/api/translation/history"))
            .await?;
        Ok(page.history)
    }

    /// `DELETE /api/translation/history/{id}`
    pub async fn delete_history(&self, id: Uuid) -> Result<(), ClientError> {
        let request = ResourceRequest::delete(format!("/api/translation/history/{id}"));
        self.send_checked(&request).await?;
        Ok(())
    }

    /// `POST /api/translation/history/clear`; returns how many entries went.
    pub async fn clear_history(&self) -> Result<usize, ClientError> {
        let cleared: ClearedHistory = self
            .execute(ResourceRequest::post("/api/translation/history/clear"))
            .await?;
        Ok(cleared.cleared)
    }

    /// `GET /api/auth/me`
    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        self.execute(ResourceRequest::get("/api/auth/me")).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: ResourceRequest) -> Result<T, ClientError> {
        let bytes = self.send_checked(&request).await?;
        serde_json::from_slice(&bytes)
            .map_err(|err| ClientError::decode(format!("invalid response body: {err}")))
    }

    /// Sends `request` through the bridge and returns the body of a 2xx
    /// response. Other statuses become [`ClientError::Status`].
    async fn send_checked(&self, request: &ResourceRequest) -> Result<Vec<u8>, ClientError> {
        self.bridge.ensure_token().await;
        let response = self.bridge.call_resource(request).await?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ClientError::Network)?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status,
                message: error_message(&bytes),
            });
        }
        Ok(bytes.to_vec())
    }
}

fn non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, ClientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ClientError::invalid_request(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

fn text_part(name: &str, value: &str) -> FormPart {
    FormPart::Text {
        name: name.to_string(),
        value: value.to_string(),
    }
}
