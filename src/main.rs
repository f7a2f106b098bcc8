use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{routing::get, Router};
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aggregate;
mod api;
mod config;
mod dates;
mod error;
mod models;
mod sensor;
mod services;

use config::{AppConfig, IMAGE_URL_PREFIX};
use sensor::{FeedSensor, SensorHandle, SourceAdapter};
use services::image_cache::ImageCache;
use services::jellyfin::JellyfinAdapter;
use services::plex::PlexAdapter;
use services::radarr::RadarrAdapter;
use services::sonarr::SonarrAdapter;
use services::tmdb::{TmdbClient, TmdbListAdapter};
use services::trakt::TraktAdapter;

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(String, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name.into(), handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");

        // Signal all tasks to stop
        self.shutdown.cancel();

        // Wait for all tasks with a timeout
        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

pub struct AppState {
    pub sensors: Vec<SensorHandle>,
}

/// Build one adapter per configured source and discovery list.
fn build_adapters(
    config: &AppConfig,
    client: &Client,
    tmdb: Option<Arc<TmdbClient>>,
) -> Vec<Box<dyn SourceAdapter>> {
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();

    if let Some(sonarr) = &config.sonarr {
        adapters.push(Box::new(SonarrAdapter::new(
            client.clone(),
            sonarr,
            tmdb.clone(),
        )));
    }
    if let Some(radarr) = &config.radarr {
        adapters.push(Box::new(RadarrAdapter::new(
            client.clone(),
            radarr,
            tmdb.clone(),
        )));
    }
    if let Some(trakt) = &config.trakt {
        adapters.push(Box::new(TraktAdapter::new(
            client.clone(),
            trakt,
            tmdb.clone(),
        )));
    }
    if let Some(jellyfin) = &config.jellyfin {
        adapters.push(Box::new(JellyfinAdapter::new(client.clone(), jellyfin)));
    }
    if let Some(plex) = &config.plex {
        adapters.push(Box::new(PlexAdapter::new(
            client.clone(),
            plex,
            tmdb.clone(),
        )));
    }

    for list_key in &config.tmdb.lists {
        let Some(tmdb) = tmdb.clone() else {
            tracing::warn!("Skipping TMDB list '{}': no TMDB api_key configured", list_key);
            continue;
        };
        match TmdbListAdapter::new(tmdb, list_key, config.tmdb.max_items) {
            Some(adapter) => adapters.push(Box::new(adapter)),
            None => tracing::warn!("Skipping unknown TMDB list '{}'", list_key),
        }
    }

    adapters
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediarr_rust=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load();

    config.paths.ensure_dirs().await?;

    config.log_config();

    // One HTTP client shared by every adapter and the image cache
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let tmdb = config
        .tmdb
        .api_key
        .clone()
        .map(|key| Arc::new(TmdbClient::new(client.clone(), key)));

    let image_cache = Arc::new(ImageCache::new(
        client.clone(),
        config.paths.image_cache_dir(),
        IMAGE_URL_PREFIX,
    ));

    let poll_interval = Duration::from_secs(config.poll_interval_minutes * 60);

    // One poller task per sensor, all sharing the shutdown token
    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    let mut sensors = Vec::new();
    for adapter in build_adapters(&config, &client, tmdb) {
        let feed_sensor = FeedSensor::new(adapter, image_cache.clone());
        let handle = feed_sensor.handle();
        let task_name = format!("poller-{}", handle.id);
        sensors.push(handle);

        let cancel = shutdown_token.clone();
        bg_tasks.spawn(task_name, async move {
            sensor::run_poller(feed_sensor, poll_interval, cancel).await;
        });
    }

    let state = Arc::new(AppState { sensors });

    // Root handler
    async fn root_handler() -> &'static str {
        "Mediarr Rust Server"
    }

    // Build router
    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .nest_service(
            IMAGE_URL_PREFIX,
            ServeDir::new(config.paths.image_cache_dir()),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Starting server on {}:{}", config.bind_address, config.port);

    // Create shutdown signal listener
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    // Start server with graceful shutdown
    let listener =
        tokio::net::TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // After server stops, gracefully shutdown background tasks
    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
