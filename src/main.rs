mod accounts;
mod api;
mod auth;
mod backend;
mod cli;
mod config;
mod error;
mod history;
mod identity;
mod languages;
mod models;
mod resources;
mod session;
mod token_store;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::api::{build_router, AppState};
use crate::auth::FirebaseVerifier;
use crate::backend::build_backend;
use crate::cli::{Cli, Command};
use crate::config::{AppConfig, ClientConfig};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "echopath=info,tower_http=info".into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    if let Command::Serve = cli.command {
        serve().await?;
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = ClientConfig::from_env()?;
    match cli::run(cli.command, cfg).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("error: {err}");
            if err.requires_sign_in() {
                eprintln!("hint: run `echopath login` to sign in");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = AppConfig::from_env()?;
    let translator = build_backend(&cfg)?;
    let verifier = Arc::new(FirebaseVerifier::new(&cfg)?);
    let state = Arc::new(AppState::new(cfg.clone(), translator, verifier));

    let app = build_router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        project = %cfg.firebase_project_id,
        translator = %cfg.translator_url,
        token_ttl_secs = cfg.token_ttl.as_secs(),
        "starting echopath api"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("echopath api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
