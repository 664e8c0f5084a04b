//! Process entry point: loads configuration, initializes logging, wires the
//! concrete `HttpRpcFacade` and its adapter dispatch table, runs startup
//! recovery, and serves the HTTP command surface until shutdown.

mod adapters;
mod config;
mod http;
mod logging;

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use replay_engine::{CommandSurface, HttpRpcFacade};
use replay_types::ReplayError;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::parse();
    config.logging.init();

    if let Err(err) = config.validate() {
        tracing::error!(%err, "invalid configuration");
        return Err(err.into());
    }
    tracing::info!(config = %config.redacted_summary(), "starting replay-node");

    let dispatch_table = adapters::build_dispatch_table(config.target_admin_rpc_url.clone());
    let facade = Arc::new(HttpRpcFacade::new(
        config.source_rpc_url.clone(),
        config.target_rpc_url.clone(),
        config.target_admin_rpc_url.clone(),
        dispatch_table,
    ));
    let resume = Arc::new(replay_engine::ResumeRecordStore::new(config.state_file_path.clone()));
    let command_surface = Arc::new(CommandSurface::new(facade.clone(), resume.clone()));

    match replay_engine::recover_startup(facade.as_ref(), resume.as_ref(), config.clean_slate).await {
        Ok(Some(directive)) => {
            tracing::info!(
                sync_from = directive.sync_from,
                ?directive.sync_to,
                is_continuous = directive.is_continuous,
                "resuming sync from prior run"
            );
            command_surface
                .resume_from_startup(directive.sync_from, directive.sync_to, directive.is_continuous)
                .await;
        }
        Ok(None) => tracing::info!("no sync to resume, parking for a start command"),
        Err(err) => {
            tracing::error!(%err, "startup recovery failed, refusing to start");
            return Err(err.into());
        }
    }

    let bind_url = format!("http://0.0.0.0:{}", config.port).parse().map_err(|e| {
        ReplayError::Config(format!("could not construct bind URL for port {}: {e}", config.port))
    })?;
    let started_at = Instant::now();

    let serve_result = tokio::select! {
        result = http::serve(bind_url, command_surface.clone(), started_at) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            Ok(())
        }
    };

    command_surface.shutdown().await;
    serve_result
}
