//! Backend abstraction for text translation engines.
//!
//! The HTTP layer depends on the [`Translator`] trait instead of a concrete
//! implementation, which keeps request handling decoupled from model hosting.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::languages::{Checkpoint, Language};

pub mod upstream;

/// Input payload consumed by a translation backend.
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    /// Non-empty, trimmed input text.
    pub text: String,
    /// Resolved source language; never equal to `target`.
    pub source: Language,
    pub target: Language,
}

impl TranslateRequest {
    /// Model checkpoint serving this direction.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::for_pair(self.source, self.target)
    }
}

/// Backend contract implemented by translation engines.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `req.text` and returns the translated text.
    async fn translate(&self, req: TranslateRequest) -> Result<String, AppError>;
}

/// Builds the configured backend implementation.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn Translator>, AppError> {
    Ok(Arc::new(upstream::UpstreamTranslator::new(cfg)?))
}
