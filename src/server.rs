use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::composite::CompositeGrid;
use crate::config::{GridDefinition, PublicField};
use crate::error::GridError;
use crate::output::{OutputEnvelope, OutputFormatter};
use crate::remote::LocalDispatch;
use crate::store::Store;

/// Shared by every request: the store, the hosted grids and the caller
/// remotes are resolved through.
pub struct AppState<S: Store> {
    store: Arc<S>,
    grids: Arc<BTreeMap<String, GridDefinition>>,
    dispatch: LocalDispatch<S>,
    output: OutputFormatter,
}

impl<S: Store> AppState<S> {
    pub fn new(
        store: Arc<S>,
        grids: BTreeMap<String, GridDefinition>,
        service: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let grids = Arc::new(grids);
        let dispatch = LocalDispatch::new(Arc::clone(&store), service, Arc::clone(&grids));
        Self { store, grids, dispatch, output: OutputFormatter::new(version) }
    }

    /// Runs grid `name` for one request body, producing the envelope and the
    /// HTTP status it should travel with.
    pub async fn run(&self, name: &str, header: &Value, body: &Value) -> (StatusCode, OutputEnvelope) {
        let Some(definition) = self.grids.get(name) else {
            let error = GridError::InvalidInput(format!("unknown grid '{name}'"));
            return (StatusCode::NOT_FOUND, self.output.failure(&error));
        };
        let result = match CompositeGrid::new(definition, &*self.store, &self.dispatch, header, &self.output, body) {
            Ok(mut grid) => grid.fetch().await,
            Err(error) => Err(error),
        };
        match result {
            Ok(envelope) => (StatusCode::OK, envelope),
            Err(error) => {
                let status = status_of(&error);
                warn!(grid = name, %error, code = %status.as_u16(), "grid error");
                (status, self.output.failure(&error))
            }
        }
    }

    pub fn configuration(&self, name: &str) -> Option<BTreeMap<String, PublicField>> {
        let definition = self.grids.get(name)?;
        let empty = Value::Object(Map::new());
        CompositeGrid::new(definition, &*self.store, &self.dispatch, &empty, &self.output, &empty)
            .ok()
            .map(|grid| grid.configuration())
    }
}

fn status_of(error: &GridError) -> StatusCode {
    match error {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        GridError::NoOutputFound => StatusCode::NOT_FOUND,
        GridError::RemoteUnavailable { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Request headers forwarded to remotes; values that are not valid text are dropped.
fn header_value(headers: &HeaderMap) -> Value {
    let forwarded: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), Value::String(value.to_str().ok()?.to_owned()))))
        .collect();
    Value::Object(forwarded)
}

async fn fetch_grid<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<OutputEnvelope>) {
    let started = Instant::now();
    let header = header_value(&headers);
    let (status, envelope) = state.run(&name, &header, &body).await;
    info!(grid = %name, code = %status.as_u16(), ms = started.elapsed().as_secs_f64() * 1000.0, "request complete");
    (status, Json(envelope))
}

async fn grid_configuration<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<BTreeMap<String, PublicField>>, (StatusCode, &'static str)> {
    state.configuration(&name).map(Json).ok_or((StatusCode::NOT_FOUND, "unknown grid"))
}

pub fn router<S: Store + 'static>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    Router::new()
        .route("/v1/grid/:name", post(fetch_grid::<S>))
        .route("/v1/grid/:name/configuration", get(grid_configuration::<S>))
        .layer(cors)
        .with_state(state)
}
