//! HTTP API handlers.
//!
//! Defines the Actix routes for source selection, plugin commands, and the event
//! WebSocket.

pub mod health;
pub mod sources;
pub mod ws;

pub use sources::{
    source_activate,
    source_command,
    source_connect,
    source_disconnect,
    source_discover,
    source_restart,
    source_test_audio,
    source_status,
    sources_deactivate,
    sources_list,
};
pub use ws::events_ws;

/// Register every API route on an actix service config.
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(health::health)
        .service(sources_list)
        .service(sources_deactivate)
        .service(source_activate)
        .service(source_status)
        .service(source_command)
        .service(source_discover)
        .service(source_connect)
        .service(source_disconnect)
        .service(source_restart)
        .service(source_test_audio)
        .service(events_ws);
}
