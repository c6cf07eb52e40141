// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use finance_dashboard::application::dashboard_controller::DashboardController;
use finance_dashboard::application::dashboard_repository::DashboardRepository;
use finance_dashboard::application::data_fetcher::WidgetDataFetcher;
use finance_dashboard::application::preset_loader::PresetLoader;
use finance_dashboard::application::widget_data_source::WidgetDataSource;
use finance_dashboard::infrastructure::config::{BackendKind, load_app_config};
use finance_dashboard::infrastructure::http_client::HttpDashboardClient;
use finance_dashboard::infrastructure::memory_store::MemoryDashboardStore;
use finance_dashboard::infrastructure::tracing_notifier::TracingNotifier;
use finance_dashboard::presentation::app_state::AppState;
use finance_dashboard::presentation::routes::router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = load_app_config()?;

    // Create persistence and data-source adapters (infrastructure layer)
    let (repository, data_source): (Arc<dyn DashboardRepository>, Arc<dyn WidgetDataSource>) =
        match config.backend.kind {
            BackendKind::Http => {
                let client = Arc::new(HttpDashboardClient::new(
                    &config.api.base_url,
                    config.api.timeout(),
                    config.fetch.max_series_points,
                )?);
                tracing::info!(base_url = %config.api.base_url, "using remote dashboard API");
                let repository: Arc<dyn DashboardRepository> = client.clone();
                let data_source: Arc<dyn WidgetDataSource> = client;
                (repository, data_source)
            }
            BackendKind::Memory => {
                let store = Arc::new(
                    MemoryDashboardStore::new().with_series_points(config.fetch.max_series_points),
                );
                tracing::info!("using in-memory dashboard store");
                let repository: Arc<dyn DashboardRepository> = store.clone();
                let data_source: Arc<dyn WidgetDataSource> = store;
                (repository, data_source)
            }
        };

    // Create the controller and presets (application layer)
    let controller = DashboardController::new(
        repository,
        WidgetDataFetcher::new(data_source),
        Arc::new(TracingNotifier),
    );
    let presets = PresetLoader::builtin().context("Built-in presets are invalid")?;

    let state = Arc::new(AppState {
        controller: Arc::new(controller),
        presets: Arc::new(presets),
    });

    // Build router (presentation layer)
    let app = router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, "starting finance-dashboard service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
