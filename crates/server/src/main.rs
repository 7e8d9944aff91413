mod api;
mod config;
mod relay;
mod state;
mod supervisor;
mod utils;
mod worker;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use api::api_router;
use axum::Router;
use config::{config_path_from_env, load_or_create_config};
use library::{LibraryDb, LibraryStore};
use relay::{BroadcastRelay, RELAY_CAPACITY};
use state::AppState;
use tokio::sync::Mutex;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    let mut args = env::args().skip(1);
    if args.next().as_deref() == Some(worker::WORKER_ARG) {
        // stdout belongs to the IPC stream
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        let config_path = args
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(config_path_from_env);
        return worker::run_scan_worker(&config_path);
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve())
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let port = if config.port == 0 { 3000 } else { config.port };
    let bind_addr = format!("0.0.0.0:{}", port);

    let index_path = config.index_path(&config_path);
    let store: Arc<dyn LibraryStore> = Arc::new(LibraryDb::new(index_path));
    let relay = BroadcastRelay::new(Arc::clone(&store), RELAY_CAPACITY);

    let loaded = tokio::task::spawn_blocking(move || store.load_library()).await?;
    match loaded {
        Ok(graph) => {
            let stats = graph.stats();
            info!(
                "Library ready: {} artists, {} songs, {} media",
                stats.artists, stats.songs, stats.media
            );
            relay.set_snapshot(graph.snapshot());
        }
        Err(err) => warn!("Failed to load library, starting empty: {}", err),
    }

    let scan_on_start = config.scan_on_start;
    let state = AppState {
        config_path,
        relay,
        scan_control: Arc::new(Mutex::new(None)),
    };

    if scan_on_start {
        if let Err(err) = supervisor::start_scan(&state).await {
            warn!("Startup scan did not start: {}", err);
        }
    }

    let app = Router::new()
        .nest("/api", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if supervisor::cancel_scan(&state).await {
        info!("Canceled running scan on shutdown");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
