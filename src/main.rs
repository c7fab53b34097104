use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use querygrid::config::Settings;
use querygrid::error::{GridError, Result};
use querygrid::persist::{PersistenceMode, SqliteStore};
use querygrid::server::{AppState, router};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Loads `{collection: [rows]}` into the store.
fn seed(store: &SqliteStore, path: &str) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|e| GridError::Config(format!("{path}: {e}")))?;
    let collections: BTreeMap<String, Vec<Value>> = serde_json::from_str(&text)?;
    for (collection, rows) in collections {
        let inserted = store.insert(&collection, rows)?;
        info!(collection = %collection, inserted, "seeded");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1);
    let settings = Settings::load(path.as_deref())?;
    let grids = settings.load_grids()?;
    let store = SqliteStore::new(PersistenceMode::from_setting(&settings.persistence))?;
    if let Some(path) = &settings.seed {
        seed(&store, path)?;
    }
    info!(grids = grids.len(), persistence = %settings.persistence, "grids loaded");

    let state = Arc::new(AppState::new(Arc::new(store), grids, settings.service.clone(), settings.version.clone()));
    let listener = TcpListener::bind(&settings.bind)
        .await
        .map_err(|e| GridError::Config(format!("bind {}: {e}", settings.bind)))?;
    info!(bind = %settings.bind, "listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| GridError::Store(format!("server: {e}")))
}
