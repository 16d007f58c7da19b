//! Actix server startup + app wiring.
//!
//! Builds the plugins and source registry, then serves routes, middleware, and
//! OpenAPI endpoints until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_cors::Cors;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse};
use actix_web::{App, Error, HttpServer, web};
use anyhow::Result;
use futures_util::future::{LocalBoxFuture, Ready, ok};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api;
use crate::config;
use crate::events::EventBus;
use crate::openapi;
use crate::plugin::AudioSourcePlugin;
use crate::plugin::registry::SourceRegistry;
use crate::snapclient;
use crate::state::AppState;

const DEFAULT_BIND: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    8000,
);

/// Build the source registry and run the Actix HTTP server until it exits.
pub(crate) async fn run(args: crate::Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let bind = resolve_bind(args.bind, &cfg)?;
    let snapclient_settings = config::snapclient_from_config(&cfg)?;
    tracing::info!(bind = %bind, "starting source-hub-server");

    let events = EventBus::new();
    let mut plugins: Vec<Arc<dyn AudioSourcePlugin>> = Vec::new();
    if snapclient_settings.enabled {
        plugins.push(Arc::new(snapclient::spawn_snapclient(
            snapclient_settings,
            events.clone(),
        )));
    } else {
        tracing::info!("snapclient source disabled");
    }
    tracing::info!(
        count = plugins.len(),
        names = ?plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "registered sources"
    );

    let state = web::Data::new(AppState::new(
        SourceRegistry::new(plugins, events.clone()),
        events,
    ));
    if let Some(name) = cfg.default_source.as_deref() {
        if let Err(e) = state.sources.activate(name).await {
            tracing::warn!(source = %name, error = %e, "default source not activated");
        }
    }

    let cors_origins = cfg.cors_origins.clone().unwrap_or_default();
    let app_state = state.clone();
    let result = HttpServer::new(move || {
        let cors = cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![actix_web::http::header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(FilteredLogger)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .configure(api::configure)
    })
    .bind(bind)?
    .run()
    .await;

    tracing::info!("http server stopped; shutting down sources");
    state.sources.shutdown().await;
    result?;
    Ok(())
}

/// Return true when the request path should be logged.
fn should_log_path(path: &str) -> bool {
    !(path == "/health" || path == "/ws" || path.ends_with("/status"))
}

/// Actix middleware that filters noisy paths from logging.
struct FilteredLogger;

impl<S, B> actix_web::dev::Transform<S, ServiceRequest> for FilteredLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = FilteredLoggerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(FilteredLoggerMiddleware { service })
    }
}

struct FilteredLoggerMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for FilteredLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, ctx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_log = should_log_path(&path);
        let method = req.method().clone();
        let peer = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("-")
            .to_string();
        let start = std::time::Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            if should_log {
                tracing::info!(
                    method = %method,
                    path = %path,
                    status = %res.status().as_u16(),
                    peer = %peer,
                    elapsed_ms = %start.elapsed().as_millis(),
                    "http request"
                );
            }
            Ok(res)
        })
    }
}

/// Load server config from `--config`, then `config.toml` next to the binary,
/// else defaults.
fn load_config(path: Option<&PathBuf>) -> Result<config::ServerConfig> {
    if let Some(path) = path {
        return config::ServerConfig::load(path);
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => config::ServerConfig::load(&path),
        _ => {
            tracing::info!("no config file found; using defaults");
            Ok(config::ServerConfig::default())
        }
    }
}

/// Resolve the final bind address from args + config.
fn resolve_bind(bind: Option<SocketAddr>, cfg: &config::ServerConfig) -> Result<SocketAddr> {
    Ok(match bind {
        Some(addr) => addr,
        None => config::bind_from_config(cfg)?.unwrap_or(DEFAULT_BIND),
    })
}
