//! Language codes shared by the client and the translation endpoint.
//!
//! Clients speak short codes (`hi`, `ta`, ...). The model service expects
//! IndicTrans2 tags and one of three checkpoints picked by direction.

use std::fmt;

/// A language the translation pipeline supports.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Language {
    English,
    Hindi,
    Kannada,
    Tamil,
    Telugu,
    Malayalam,
    Bengali,
}

/// Source language as sent by a client: a fixed language or `auto`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SourceLanguage {
    Auto,
    Fixed(Language),
}

/// Model checkpoint used for a translation direction.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Checkpoint {
    EnglishToIndic,
    IndicToEnglish,
    IndicToIndic,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::English,
        Language::Hindi,
        Language::Kannada,
        Language::Tamil,
        Language::Telugu,
        Language::Malayalam,
        Language::Bengali,
    ];

    /// Parses a client short code.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::English),
            "hi" => Some(Self::Hindi),
            "ka" => Some(Self::Kannada),
            "ta" => Some(Self::Tamil),
            "te" => Some(Self::Telugu),
            "ma" => Some(Self::Malayalam),
            "be" => Some(Self::Bengali),
            _ => None,
        }
    }

    /// Short code used on the wire between client and server.
    pub fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hindi => "hi",
            Self::Kannada => "ka",
            Self::Tamil => "ta",
            Self::Telugu => "te",
            Self::Malayalam => "ma",
            Self::Bengali => "be",
        }
    }

    /// IndicTrans2 language tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::English => "eng_Latn",
            Self::Hindi => "hin_Deva",
            Self::Kannada => "kan_Knda",
            Self::Tamil => "tam_Taml",
            Self::Telugu => "tel_Telu",
            Self::Malayalam => "mal_Mlym",
            Self::Bengali => "ben_Beng",
        }
    }

    /// Comma separated list of accepted codes, for error messages.
    pub fn supported_codes() -> String {
        Self::ALL
            .iter()
            .map(|lang| lang.code())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Guesses the language of `text` from the script of its letters.
    ///
    /// The first letter in a known Indic block wins; text without one is
    /// treated as English.
    pub fn detect(text: &str) -> Self {
        text.chars()
            .filter(|c| c.is_alphabetic())
            .find_map(script_language)
            .unwrap_or(Self::English)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn script_language(c: char) -> Option<Language> {
    match c as u32 {
        0x0900..=0x097F => Some(Language::Hindi),
        0x0980..=0x09FF => Some(Language::Bengali),
        0x0B80..=0x0BFF => Some(Language::Tamil),
        0x0C00..=0x0C7F => Some(Language::Telugu),
        0x0C80..=0x0CFF => Some(Language::Kannada),
        0x0D00..=0x0D7F => Some(Language::Malayalam),
        _ => None,
    }
}

impl SourceLanguage {
    /// Parses a source code; `auto` requests detection.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().eq_ignore_ascii_case("auto") {
            return Some(Self::Auto);
        }
        Language::parse(raw).map(Self::Fixed)
    }

    /// Resolves `auto` against the text to translate.
    pub fn resolve(self, text: &str) -> Language {
        match self {
            Self::Auto => Language::detect(text),
            Self::Fixed(lang) => lang,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Fixed(lang) => lang.code(),
        }
    }
}

impl Checkpoint {
    /// Picks the checkpoint for a direction. Pairs without English use the
    /// Indic-to-Indic model.
    pub fn for_pair(source: Language, target: Language) -> Self {
        match (source == Language::English, target == Language::English) {
            (true, false) => Self::EnglishToIndic,
            (false, true) => Self::IndicToEnglish,
            _ => Self::IndicToIndic,
        }
    }

    /// Hugging Face model identifier.
    pub fn model_id(self) -> &'static str {
        match self {
            Self::EnglishToIndic => "ai4bharat/indictrans2-en-indic-dist-200M",
            Self::IndicToEnglish => "ai4bharat/indictrans2-indic-en-dist-200M",
            Self::IndicToIndic => "ai4bharat/indictrans2-indic-indic-dist-320M",
        }
    }
}
