use std::env::VarError;
use std::net::SocketAddr;
use std::sync::Arc;

use rootcause::prelude::ResultExt;
use rootcause::{bail, report};
use tokio::select;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::{Instrument, Span, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    provider::{
        ProjectId,
        cloud_dns::{AccessToken, CloudDnsProvider},
    },
    types::AppState,
};

mod dyndns;
mod provider;
mod reconcile;
mod types;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = run_server().await {
        error!(err = %e, "Application error");
        std::process::exit(1);
    }
}

async fn run_server() -> Result<(), rootcause::Report> {
    info!("Starting server");

    ensure_env_vars(&["KEY", "PROJECT_ID"])?;

    let interface = std::env::var("INTERFACE").unwrap_or("0.0.0.0".to_string());
    let port: String = std::env::var("PORT").unwrap_or("8080".to_string());
    let shared_key = std::env::var("KEY").context("KEY environment variable not set")?;
    let project_id =
        std::env::var("PROJECT_ID").context("PROJECT_ID environment variable not set")?;

    if shared_key.is_empty() {
        bail!("KEY must not be empty");
    }

    let token = match std::env::var("GOOGLE_ACCESS_TOKEN") {
        Ok(token) if !token.is_empty() => {
            info!("Using access token from GOOGLE_ACCESS_TOKEN");
            AccessToken::Static(token)
        }
        _ => {
            info!("Fetching access tokens from the metadata server");
            AccessToken::MetadataServer
        }
    };

    let state = AppState {
        dns_provider: Arc::new(CloudDnsProvider::new(token)),
        project_id: ProjectId(project_id),
        shared_key,
    };
    info!(project = %state.project_id, "Configured Cloud DNS project");

    let app = dyndns::router(state);

    let listen_addr = format!("{}:{}", interface, port);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .context("Failed to bind to listen address")
        .attach(format!("address: '{listen_addr}'"))?;

    info!(
        "Listening on {}",
        listener.local_addr().context("Getting local address")?
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async { graceful_shutdown().await }.instrument(Span::current()))
    .await
    .context("Server error")?;

    Ok(())
}

fn ensure_env_vars(vars: &[&str]) -> Result<(), rootcause::Report> {
    let mut error = report!("Missing required environment variable");
    let mut is_error = false;
    for var in vars {
        match std::env::var(var) {
            Ok(_) => continue,
            Err(VarError::NotPresent) => {
                error = error.attach(format!("'{}' is not set", var));
                is_error = true;
            }
            Err(VarError::NotUnicode(e)) => {
                error = error.attach(format!("'{}' is not valid unicode: '{}'", var, e.display()));
                is_error = true;
            }
        }
    }
    if is_error { Err(error) } else { Ok(()) }
}

async fn graceful_shutdown() {
    let interrupt = tokio::signal::ctrl_c();
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(err = %e, "Could not listen for SIGTERM, only handling SIGINT");
            let _ = interrupt.await;
            warn!("Received SIGINT");
            return;
        }
    };
    select! {
        _ = sigterm.recv() => warn!("Received SIGTERM"),
        _ = interrupt => warn!("Received SIGINT")
    }
}
