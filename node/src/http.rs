//! HTTP command surface: a thin REST layer over
//! [`replay_engine::CommandSurface`]. Holds no state of its own beyond the
//! shared handle.
//!
//! A `toml`-defined [`Api`] registered into an [`App`], handlers reading the
//! request body with `body_auto` and returning `tide_disco::error::ServerError`
//! on failure. The engine-side state is fully synchronized by
//! `CommandSurface` itself, so the `App`'s own state is the unit type and
//! each closure captures an `Arc<CommandSurface>` directly.

use std::{sync::Arc, time::Instant};

use futures::FutureExt;
use replay_engine::CommandSurface;
use replay_types::{EngineState, ReplayError, SyncTarget};
use serde::{Deserialize, Serialize};
use tide_disco::{api::ApiError, error::ServerError, App, Error as _, StatusCode};
use url::Url;
use vbs::version::{StaticVersion, StaticVersionType};

/// This binary speaks one API version; bumping it is a deliberate,
/// spec-driven decision, not something left open-ended.
pub type ApiVer = StaticVersion<0, 1>;

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct SyncRequest {
    end_block: SyncTarget,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct CancelRequest {
    #[serde(default)]
    complete_current_block: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    engine_running: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StartResponse {
    process_id: String,
    sync_from: replay_types::BlockNumber,
    sync_to: SyncTarget,
    is_continuous: bool,
}

fn into_server_error(err: ReplayError) -> ServerError {
    let status = match err {
        ReplayError::SyncInProgress => StatusCode::CONFLICT,
        ReplayError::InvalidBlock(_) | ReplayError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ServerError::catch_all(status, err.to_string())
}

/// tide-disco's declarative `Api::post`/`get` always answers `Ok(T)` with
/// 200; a sync start is accepted work, not a completed one, so its 202 rides
/// the same status-carrying channel `into_server_error` uses for failures,
/// with the body re-attached as the message so the client can recover it.
fn accepted<T: Serialize>(body: &T) -> ServerError {
    let message = serde_json::to_string(body).expect("response DTOs are always serializable");
    ServerError::catch_all(StatusCode::ACCEPTED, message)
}

fn define_api() -> Result<tide_disco::Api<(), ServerError, ApiVer>, ApiError> {
    let toml: toml::Value = toml::from_str(include_str!("../api/command_surface.toml"))
        .map_err(|err| ApiError::CannotReadToml { reason: err.to_string() })?;
    tide_disco::Api::<(), ServerError, ApiVer>::new(toml)
}

/// Builds and serves the command surface at `url`, returning once the
/// listener is bound and the server future completes (normally, only on
/// shutdown or a fatal server error).
pub async fn serve(url: Url, command_surface: Arc<CommandSurface>, started_at: Instant) -> anyhow::Result<()> {
    let mut api = define_api()?;

    api.get("health", move |_req, _state| {
        let command_surface = command_surface.clone();
        async move {
            Ok(HealthResponse {
                status: "ok".to_string(),
                uptime_seconds: started_at.elapsed().as_secs(),
                engine_running: command_surface.is_running().await,
            })
        }
        .boxed()
    })?;

    {
        let command_surface = command_surface.clone();
        api.post("sync", move |mut req, _state| {
            let command_surface = command_surface.clone();
            async move {
                let body = req.body_auto::<SyncRequest, ApiVer>(ApiVer::instance()).map_err(ServerError::from_request_error)?;
                let snapshot = command_surface.start(body.end_block).await.map_err(into_server_error)?;
                let response = StartResponse {
                    process_id: snapshot.id,
                    sync_from: snapshot.sync_from,
                    sync_to: snapshot.sync_to,
                    is_continuous: snapshot.is_continuous,
                };
                Err::<StartResponse, _>(accepted(&response))
            }
            .boxed()
        })?;
    }

    {
        let command_surface = command_surface.clone();
        api.post("sync_cancel", move |mut req, _state| {
            let command_surface = command_surface.clone();
            async move {
                let body = req.body_auto::<CancelRequest, ApiVer>(ApiVer::instance()).map_err(ServerError::from_request_error)?;
                match command_surface.cancel(body.complete_current_block).await {
                    Some(state) => Ok(state),
                    None => Err(ServerError::catch_all(StatusCode::NOT_FOUND, "no sync is running".to_string())),
                }
            }
            .boxed()
        })?;
    }

    {
        let command_surface = command_surface.clone();
        api.get("sync_status", move |_req, _state| {
            let command_surface = command_surface.clone();
            async move {
                command_surface
                    .status()
                    .await
                    .ok_or_else(|| ServerError::catch_all(StatusCode::NOT_FOUND, "no sync has run yet".to_string()))
            }
            .boxed()
        })?;
    }

    let mut app = App::<(), ServerError>::with_state(());
    app.register_module("api", api)?;

    tracing::info!(%url, "command surface listening");
    app.serve(url, ApiVer::instance()).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use replay_engine::{rpc::testing::{gas_prices_fixture_block, FakeRpcFacade}, ResumeRecordStore};
    use serde_json::json;
    use surf_disco::Client;

    use super::*;

    async fn spawn_server() -> (Url, Arc<CommandSurface>) {
        let fake = Arc::new(FakeRpcFacade::new());
        fake.seed_source_block(gas_prices_fixture_block(1));
        let dir = tempfile::tempdir().unwrap();
        let resume = Arc::new(ResumeRecordStore::new(dir.path().join("resume.json")));
        let command_surface = Arc::new(CommandSurface::new(fake, resume));

        let port = portpicker::pick_unused_port().expect("no ports available");
        let url: Url = format!("http://localhost:{port}").parse().unwrap();
        let serve_url = url.clone();
        let surface_for_server = command_surface.clone();
        tokio::spawn(async move {
            serve(serve_url, surface_for_server, std::time::Instant::now()).await.unwrap();
        });

        let client: Client<ServerError, ApiVer> = Client::new(url.clone());
        client.connect(None).await;
        (url, command_surface)
    }

    #[tokio::test]
    async fn health_reports_no_engine_running_before_any_sync() {
        let (url, _surface) = spawn_server().await;
        let client: Client<ServerError, ApiVer> = Client::new(url);
        let health: HealthResponse = client.get("api/health").send().await.unwrap();
        assert_eq!(health.status, "ok");
        assert!(!health.engine_running);
    }

    async fn start_sync(client: &Client<ServerError, ApiVer>, end_block: u64) -> Result<StartResponse, ServerError> {
        let accepted = client
            .post::<StartResponse>("api/sync")
            .body_json(&json!({ "end_block": end_block }))
            .unwrap()
            .send()
            .await
            .expect_err("a fresh sync is accepted, not completed, and answers through the status-carrying channel");
        if accepted.status() != StatusCode::ACCEPTED {
            return Err(accepted);
        }
        Ok(serde_json::from_str(&accepted.to_string()).expect("202 body is always a StartResponse"))
    }

    #[tokio::test]
    async fn sync_then_status_round_trips_over_http() {
        let (url, _surface) = spawn_server().await;
        let client: Client<ServerError, ApiVer> = Client::new(url);

        let started = start_sync(&client, 1).await.unwrap();
        assert_eq!(started.sync_from, 1);

        let status: EngineState = client.get("api/sync_status").send().await.unwrap();
        assert_eq!(status.id, started.process_id);
    }

    #[tokio::test]
    async fn second_concurrent_sync_is_rejected_with_409() {
        let (url, _surface) = spawn_server().await;
        let client: Client<ServerError, ApiVer> = Client::new(url);

        let _first = start_sync(&client, 1).await.unwrap();
        let second = start_sync(&client, 1).await;
        let err = second.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn cancel_with_nothing_running_returns_404() {
        let (url, _surface) = spawn_server().await;
        let client: Client<ServerError, ApiVer> = Client::new(url);
        let result = client
            .post::<EngineState>("api/sync_cancel")
            .body_json(&json!({ "complete_current_block": false }))
            .unwrap()
            .send()
            .await;
        assert!(result.is_err());
    }
}
