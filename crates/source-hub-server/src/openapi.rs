use utoipa::OpenApi;

use crate::api;
use crate::models;
use crate::plugin::PluginCommand;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health,
        api::sources::sources_list,
        api::sources::sources_deactivate,
        api::sources::source_activate,
        api::sources::source_status,
        api::sources::source_command,
        api::sources::source_discover,
        api::sources::source_connect,
        api::sources::source_disconnect,
        api::sources::source_restart,
        api::sources::source_test_audio,
    ),
    components(
        schemas(
            models::SourceInfo,
            models::SourcesResponse,
            models::ActiveSourceResponse,
            models::HealthResponse,
            PluginCommand,
            source_hub_types::PluginState,
            source_hub_types::PluginStatus,
            source_hub_types::ServerDescriptor,
            source_hub_types::CommandResponse,
            source_hub_types::HostRequest,
        )
    ),
    tags(
        (name = "source-hub-server", description = "Audio source control API")
    )
)]
pub struct ApiDoc;
