//! Command-line interface: the `serve` command plus client commands that
//! talk to a running server through the session bridge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::identity::FirebaseIdentity;
use crate::languages::{Language, SourceLanguage};
use crate::resources::{EchoPathClient, Upload};
use crate::session::SessionBridge;
use crate::token_store::{FileStore, TokenStore};

#[derive(Debug, Parser)]
#[command(name = "echopath", version, about = "EchoPath translation API server and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the API server, configured from the environment.
    Serve,
    /// Sign in with email and password and obtain a session token.
    Login {
        #[arg(long, env = "ECHOPATH_EMAIL")]
        email: String,
        #[arg(long, env = "ECHOPATH_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and forget the session token.
    Logout,
    /// Show the signed-in account.
    Whoami,
    /// Translate text.
    Translate {
        text: String,
        #[arg(long, default_value = "auto", value_parser = parse_source)]
        from: SourceLanguage,
        #[arg(long, value_parser = parse_language)]
        to: Language,
    },
    /// Translate speech from an audio file.
    Voice {
        file: PathBuf,
        #[arg(long, default_value = "auto", value_parser = parse_source)]
        from: SourceLanguage,
        #[arg(long, value_parser = parse_language)]
        to: Language,
    },
    /// Translate the text in an image.
    Photo {
        file: PathBuf,
        #[arg(long, default_value = "auto", value_parser = parse_source)]
        from: SourceLanguage,
        #[arg(long, value_parser = parse_language)]
        to: Language,
    },
    /// Extract text from an image.
    Ocr {
        file: PathBuf,
        /// Language hint; may be repeated.
        #[arg(long = "lang", value_parser = parse_language)]
        langs: Vec<Language>,
    },
    /// Synthesize speech and write it to a file.
    Speak {
        text: String,
        #[arg(long, value_parser = parse_language)]
        lang: Language,
        /// Output path; defaults to `speech.<format>`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show or edit translation history.
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
}

#[derive(Debug, Subcommand)]
pub enum HistoryAction {
    List,
    Delete { id: Uuid },
    Clear,
}

fn parse_language(raw: &str) -> Result<Language, String> {
    Language::parse(raw)
        .ok_or_else(|| format!("expected one of {}", Language::supported_codes()))
}

fn parse_source(raw: &str) -> Result<SourceLanguage, String> {
    SourceLanguage::parse(raw)
        .ok_or_else(|| format!("expected auto or one of {}", Language::supported_codes()))
}

struct Client {
    identity: Arc<FirebaseIdentity>,
    api: EchoPathClient,
}

fn connect(cfg: &ClientConfig) -> Result<Client, ClientError> {
    let http = reqwest::Client::builder()
        .timeout(cfg.http_timeout)
        .build()
        .map_err(ClientError::Network)?;
    let file_store = FileStore::open(cfg.session_file.clone())?;
    debug!(path = %file_store.path().display(), "opened session store");
    let store: Arc<dyn TokenStore> = Arc::new(file_store);
    let identity = Arc::new(FirebaseIdentity::new(
        http.clone(),
        cfg.firebase_api_key.clone(),
        store.clone(),
    ));
    let bridge = Arc::new(SessionBridge::new(
        http,
        cfg.api_url.clone(),
        identity.clone(),
        store,
    ));
    bridge.spawn_sign_out_watcher();
    Ok(Client {
        identity,
        api: EchoPathClient::new(bridge),
    })
}

/// Runs a client command. `Serve` is handled by the caller.
pub async fn run(command: Command, cfg: ClientConfig) -> Result<(), ClientError> {
    let client = connect(&cfg)?;
    let api = &client.api;

    match command {
        Command::Serve => {}
        Command::Login { email, password } => {
            let principal = client.identity.sign_in_with_password(&email, &password).await?;
            // A token left over from a previous account must not be reused.
            api.bridge().clear_session().await?;
            match api.bridge().ensure_token().await {
                Some(_) => println!(
                    "signed in as {} ({})",
                    principal.email.as_deref().unwrap_or("-"),
                    principal.uid
                ),
                None => {
                    return Err(ClientError::ExchangeFailed(format!(
                        "signed in, but {} did not issue a session token",
                        api.bridge().base_url()
                    )))
                }
            }
        }
        Command::Logout => {
            client.identity.sign_out().await?;
            api.bridge().clear_session().await?;
            println!("signed out");
        }
        Command::Whoami => {
            if api.bridge().identity().current_principal().await.is_none() {
                return Err(ClientError::Unauthenticated);
            }
            let profile = api.me().await?;
            println!("uid:        {}", profile.uid);
            println!("email:      {}", profile.email.as_deref().unwrap_or("-"));
            if let Some(name) = profile.display_name.as_deref() {
                println!("name:       {name}");
            }
            println!("provider:   {}", profile.auth_provider);
            println!("last login: {}", profile.last_login_at.to_rfc3339());
            println!("server:     {}", api.bridge().base_url());
        }
        Command::Translate { text, from, to } => {
            let result = api.translate_text(&text, from, to).await?;
            if let Some(detected) = result.detected_lang.as_deref() {
                eprintln!("detected language: {detected}");
            }
            println!("{}", result.translated_text);
        }
        Command::Voice { file, from, to } => {
            let audio = Upload::read(&file).await?;
            let result = api.translate_voice(audio, from, to).await?;
            print_pair(
                &result.transcript,
                result.source_lang.as_deref(),
                &result.translated_text,
                result.target_lang.as_deref(),
            );
        }
        Command::Photo { file, from, to } => {
            let image = Upload::read(&file).await?;
            let result = api.translate_photo(image, from, to).await?;
            print_pair(
                &result.extracted_text,
                result.source_lang.as_deref(),
                &result.translated_text,
                result.target_lang.as_deref(),
            );
        }
        Command::Ocr { file, langs } => {
            let image = Upload::read(&file).await?;
            let result = api.extract_text(image, &langs).await?;
            if let Some(confidence) = result.confidence {
                eprintln!("confidence: {confidence:.2}");
            }
            println!("{}", result.text);
        }
        Command::Speak { text, lang, out } => {
            let speech = api.synthesize(&text, lang).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("speech.{}", speech.format)));
            write_file(&out, speech.bytes).await?;
            println!("wrote {}", out.display());
        }
        Command::History { action } => match action.unwrap_or(HistoryAction::List) {
            HistoryAction::List => {
                for entry in api.history().await? {
                    println!(
                        "{}  {}  {:?}  {}->{}  {} => {}",
                        entry.id,
                        entry.created_at.format("%Y-%m-%d %H:%M"),
                        entry.kind,
                        entry.source_lang,
                        entry.target_lang,
                        entry.source_text,
                        entry.translated_text
                    );
                }
            }
            HistoryAction::Delete { id } => {
                api.delete_history(id).await?;
                println!("deleted {id}");
            }
            HistoryAction::Clear => {
                let cleared = api.clear_history().await?;
                println!("cleared {cleared} entries");
            }
        },
    }
    Ok(())
}

fn print_pair(original: &str, source: Option<&str>, translated: &str, target: Option<&str>) {
    println!("[{}] {original}", source.unwrap_or("?"));
    println!("[{}] {translated}", target.unwrap_or("?"));
}

async fn write_file(path: &Path, bytes: Vec<u8>) -> Result<(), ClientError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || std::fs::write(owned, bytes))
        .await
        .map_err(|err| ClientError::storage(format!("file write task failed: {err}")))?
        .map_err(|err| ClientError::storage(format!("failed to write {}: {err}", path.display())))
}
