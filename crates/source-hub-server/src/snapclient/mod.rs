//! Snapcast client source.
//!
//! Supervises a local `snapclient` process and keeps it attached to a discovered
//! snapserver.

pub mod connection;
pub mod control;
pub mod discovery;
pub mod mdns;
pub mod monitor;
pub mod plugin;
pub mod process;
pub mod tone;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::{DiscoveryBackend, SnapclientSettings};
use crate::events::EventBus;

pub use worker::SnapclientHandle;

/// Source name used in routes and events.
pub const SOURCE_NAME: &str = "snapclient";

/// Build the snapclient plugin from settings and spawn its worker.
pub fn spawn_snapclient(settings: SnapclientSettings, events: EventBus) -> SnapclientHandle {
    let process = process::ProcessSupervisor::new(
        settings.executable_path.clone(),
        settings.alsa_device.clone(),
        settings.extra_args.clone(),
    );
    let browser: Box<dyn discovery::ServerBrowser> = match settings.discovery_backend {
        DiscoveryBackend::Avahi => Box::new(discovery::AvahiBrowser::new(settings.discovery_timeout)),
        DiscoveryBackend::Mdns => Box::new(mdns::MdnsBrowser::new(settings.discovery_timeout)),
    };
    tracing::info!(
        exe = %settings.executable_path.display(),
        device = %settings.alsa_device,
        backend = ?settings.discovery_backend,
        auto_connect = settings.auto_connect,
        control_watch = settings.control_watch,
        "snapclient source configured"
    );
    let core = plugin::SnapclientCore::new(SOURCE_NAME, settings, Box::new(process), browser, events);
    worker::spawn_snapclient_worker(core)
}
