//! Source selection and plugin command handlers.

use actix_web::{get, post, web, HttpResponse, Responder};
use source_hub_types::{CommandResponse, HostRequest, PluginStatus};

use crate::models::{ActiveSourceResponse, SourcesResponse};
use crate::plugin::registry::RegistryError;
use crate::plugin::PluginCommand;
use crate::state::AppState;

/// List every registered source and the active one.
#[utoipa::path(
    get,
    path = "/sources",
    responses(
        (status = 200, description = "Registered sources", body = SourcesResponse)
    )
)]
#[get("/sources")]
pub async fn sources_list(state: web::Data<AppState>) -> impl Responder {
    let sources = state.sources.list().await;
    let active = state.sources.active_source().await;
    HttpResponse::Ok().json(SourcesResponse { active, sources })
}

/// Stop the active source, leaving none active.
#[utoipa::path(
    post,
    path = "/sources/deactivate",
    responses(
        (status = 200, description = "Active source stopped", body = ActiveSourceResponse)
    )
)]
#[post("/sources/deactivate")]
pub async fn sources_deactivate(state: web::Data<AppState>) -> impl Responder {
    state.sources.deactivate().await;
    HttpResponse::Ok().json(ActiveSourceResponse { active: None })
}

/// Make a source active, stopping the previous one first.
#[utoipa::path(
    post,
    path = "/sources/{name}/activate",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 200, description = "Source active", body = ActiveSourceResponse),
        (status = 404, description = "Unknown source"),
        (status = 500, description = "Source failed to start"),
        (status = 503, description = "Source unavailable")
    )
)]
#[post("/sources/{name}/activate")]
pub async fn source_activate(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    match state.sources.activate(name.as_str()).await {
        Ok(()) => HttpResponse::Ok().json(ActiveSourceResponse {
            active: Some(name.into_inner()),
        }),
        Err(err) => err.into_response(),
    }
}

/// Current status for one source.
#[utoipa::path(
    get,
    path = "/sources/{name}/status",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 200, description = "Source status", body = PluginStatus),
        (status = 404, description = "Unknown source"),
        (status = 503, description = "Source unavailable")
    )
)]
#[get("/sources/{name}/status")]
pub async fn source_status(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    let plugin = match state.sources.get(name.as_str()) {
        Ok(plugin) => plugin,
        Err(err) => return err.into_response(),
    };
    match plugin.status().await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(err) => RegistryError::from(err).into_response(),
    }
}

/// Send a tagged command to a source.
#[utoipa::path(
    post,
    path = "/sources/{name}/command",
    params(("name" = String, Path, description = "Source name")),
    request_body = PluginCommand,
    responses(
        (status = 200, description = "Command succeeded", body = CommandResponse),
        (status = 400, description = "Command failed", body = CommandResponse),
        (status = 404, description = "Unknown source"),
        (status = 503, description = "Source unavailable")
    )
)]
#[post("/sources/{name}/command")]
pub async fn source_command(
    state: web::Data<AppState>,
    name: web::Path<String>,
    body: web::Json<PluginCommand>,
) -> impl Responder {
    dispatch(&state, name.as_str(), body.into_inner()).await
}

/// Run one discovery pass without auto-connecting.
#[utoipa::path(
    post,
    path = "/sources/{name}/discover",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 200, description = "Discovery finished", body = CommandResponse),
        (status = 400, description = "Command failed", body = CommandResponse)
    )
)]
#[post("/sources/{name}/discover")]
pub async fn source_discover(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    dispatch(&state, name.as_str(), PluginCommand::Discover).await
}

/// Connect to a snapserver by host.
#[utoipa::path(
    post,
    path = "/sources/{name}/connect",
    params(("name" = String, Path, description = "Source name")),
    request_body = HostRequest,
    responses(
        (status = 200, description = "Connected", body = CommandResponse),
        (status = 400, description = "Connect rejected", body = CommandResponse)
    )
)]
#[post("/sources/{name}/connect")]
pub async fn source_connect(
    state: web::Data<AppState>,
    name: web::Path<String>,
    body: web::Json<HostRequest>,
) -> impl Responder {
    let host = body.into_inner().host;
    dispatch(&state, name.as_str(), PluginCommand::Connect { host }).await
}

/// Disconnect and blacklist the current host until the source restarts.
#[utoipa::path(
    post,
    path = "/sources/{name}/disconnect",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 200, description = "Disconnected", body = CommandResponse),
        (status = 400, description = "Command failed", body = CommandResponse)
    )
)]
#[post("/sources/{name}/disconnect")]
pub async fn source_disconnect(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    dispatch(&state, name.as_str(), PluginCommand::Disconnect).await
}

/// Restart the client process against the current host.
#[utoipa::path(
    post,
    path = "/sources/{name}/restart",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 200, description = "Client restarted", body = CommandResponse),
        (status = 400, description = "Command failed", body = CommandResponse)
    )
)]
#[post("/sources/{name}/restart")]
pub async fn source_restart(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    dispatch(&state, name.as_str(), PluginCommand::Restart).await
}

/// Play a short test tone through the source's output device.
#[utoipa::path(
    post,
    path = "/sources/{name}/test_audio",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 200, description = "Tone played", body = CommandResponse),
        (status = 400, description = "Client not running or player failed", body = CommandResponse)
    )
)]
#[post("/sources/{name}/test_audio")]
pub async fn source_test_audio(state: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    dispatch(&state, name.as_str(), PluginCommand::TestAudio).await
}

async fn dispatch(state: &AppState, name: &str, command: PluginCommand) -> HttpResponse {
    let plugin = match state.sources.get(name) {
        Ok(plugin) => plugin,
        Err(err) => return err.into_response(),
    };
    match plugin.command(command).await {
        Ok(response) if response.success => HttpResponse::Ok().json(response),
        Ok(response) => HttpResponse::BadRequest().json(response),
        Err(err) => RegistryError::from(err).into_response(),
    }
}
