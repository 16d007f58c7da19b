//! Source registry.
//!
//! Holds every configured plugin and guarantees at most one is active.

use std::sync::Arc;

use actix_web::HttpResponse;
use tokio::sync::Mutex;

use super::{AudioSourcePlugin, PluginError};
use crate::events::EventBus;
use crate::models::SourceInfo;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown source {0}")]
    UnknownSource(String),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl RegistryError {
    /// Convert a registry error into an HTTP response.
    pub fn into_response(self) -> HttpResponse {
        match self {
            RegistryError::UnknownSource(_) => HttpResponse::NotFound().body(self.to_string()),
            RegistryError::Plugin(PluginError::Unavailable(_)) => {
                HttpResponse::ServiceUnavailable().body(self.to_string())
            }
            RegistryError::Plugin(PluginError::StartFailed { .. }) => {
                HttpResponse::InternalServerError().body(self.to_string())
            }
        }
    }
}

pub struct SourceRegistry {
    plugins: Vec<Arc<dyn AudioSourcePlugin>>,
    active: Mutex<Option<String>>,
    events: EventBus,
}

impl SourceRegistry {
    pub fn new(plugins: Vec<Arc<dyn AudioSourcePlugin>>, events: EventBus) -> Self {
        Self {
            plugins,
            active: Mutex::new(None),
            events,
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AudioSourcePlugin>, RegistryError> {
        self.plugins
            .iter()
            .find(|plugin| plugin.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSource(name.to_string()))
    }

    pub async fn active_source(&self) -> Option<String> {
        self.active.lock().await.clone()
    }

    /// Every source with its latest status (omitted when the plugin is unavailable).
    pub async fn list(&self) -> Vec<SourceInfo> {
        let active = self.active_source().await;
        let mut sources = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            let status = match plugin.status().await {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(source = %plugin.name(), error = %e, "source status unavailable");
                    None
                }
            };
            sources.push(SourceInfo {
                name: plugin.name().to_string(),
                active: active.as_deref() == Some(plugin.name()),
                status,
            });
        }
        sources
    }

    /// Make `name` the active source, fully stopping the previous one first.
    pub async fn activate(&self, name: &str) -> Result<(), RegistryError> {
        let target = self.get(name)?;
        let mut active = self.active.lock().await;
        if active.as_deref() == Some(name) {
            return Ok(());
        }
        if let Some(previous) = active.take() {
            self.stop_source(&previous).await;
        }
        tracing::info!(source = %name, "activating source");
        match target.start().await {
            Ok(()) => {
                *active = Some(name.to_string());
                self.events.active_source_changed(Some(name.to_string()));
                Ok(())
            }
            Err(e) => {
                tracing::error!(source = %name, error = %e, "source failed to start");
                self.events.active_source_changed(None);
                Err(e.into())
            }
        }
    }

    /// Stop the active source, if any.
    pub async fn deactivate(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.stop_source(&previous).await;
            self.events.active_source_changed(None);
        }
    }

    /// Stop every source; used on server exit.
    pub async fn shutdown(&self) {
        self.deactivate().await;
        for plugin in &self.plugins {
            if let Err(e) = plugin.stop().await {
                tracing::warn!(source = %plugin.name(), error = %e, "source stop failed during shutdown");
            }
        }
        tracing::info!("sources shut down");
    }

    async fn stop_source(&self, name: &str) {
        tracing::info!(source = %name, "deactivating source");
        match self.get(name) {
            Ok(plugin) => {
                if let Err(e) = plugin.stop().await {
                    tracing::warn!(source = %name, error = %e, "source stop failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "active source missing from registry"),
        }
    }
}
