use std::sync::Arc;

use log::info;

use openidp::config::{self, CONFIG};
use openidp::connector::ConnectorRegistry;
use openidp::flow::AppState;
use openidp::http::pages::{DefaultPageRenderer, PageRenderer};
use openidp::keys::KeyCache;
use openidp::storage::{self, memory::MemoryStorage};

/// Runs the garbage-collection loop (spec.md §5: "a garbage-collection
/// loop on `config.gc_interval()`"), mirroring the shape of
/// `keys::spawn_rotation_loop`.
fn spawn_gc_loop(storage: Arc<dyn storage::Storage>, config: &'static config::Config) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.gc_interval());
        interval.tick().await;
        loop {
            interval.tick().await;
            match storage.garbage_collect(chrono::Utc::now()).await {
                Ok(counts) => info!("garbage collection: {counts:?}"),
                Err(e) => log::warn!("garbage collection failed: {e}"),
            }
        }
    })
}

#[rocket::main]
async fn main() {
    if let Err(e) = openidp::logging::init() {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config: &'static config::Config = &CONFIG;
    info!("starting with issuer {}", config.issuer());

    let storage: Arc<dyn storage::Storage> = Arc::new(MemoryStorage::new());

    let keys = Arc::new(KeyCache::load(storage.as_ref(), config).await.unwrap_or_else(|e| {
        eprintln!("failed to load signing keys: {e}");
        std::process::exit(1);
    }));

    let connectors = Arc::new(ConnectorRegistry::new());

    openidp::keys::spawn_rotation_loop(Arc::clone(&storage), Arc::clone(&keys), config);
    spawn_gc_loop(Arc::clone(&storage), config);

    let state = AppState {
        storage,
        keys,
        connectors,
        config,
    };

    let pages: Arc<dyn PageRenderer> = Arc::new(DefaultPageRenderer);

    let result = openidp::build_rocket(state, pages).launch().await;

    if let Err(e) = result {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
