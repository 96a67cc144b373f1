use std::{future::Future, path::Path as FsPath};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::{
    config::ServerConfig,
    tseries::{Page, Reading, SeriesError, SharedStorage},
};

/// Key carrying the reading's timestamp in each rendered object.
pub const TIMESTAMP_KEY: &str = "dt";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("window must be `START,END` in epoch seconds, got `{0}`")]
    BadWindow(String),
    #[error("series error `{0}`")]
    Series(#[from] SeriesError),
    #[error("io error `{0}`")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadWindow(_) => StatusCode::BAD_REQUEST,
            Self::Series(_) | Self::Io(_) => {
                error!("{self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
pub struct Measurements {
    pub data: Vec<Map<String, Value>>,
    pub has_prev: bool,
    pub has_more: bool,
}

impl From<Page> for Measurements {
    fn from(page: Page) -> Self {
        Self {
            data: page.readings.into_iter().map(reading_object).collect(),
            has_prev: page.has_prev,
            has_more: page.has_more,
        }
    }
}

/// The payload's fields plus `dt` set to the timestamp.
pub fn reading_object(reading: Reading) -> Map<String, Value> {
    let mut obj: Map<String, Value> = reading
        .payload
        .into_inner()
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect();
    obj.insert(TIMESTAMP_KEY.to_string(), Value::from(reading.timestamp));
    obj
}

pub fn router(store: SharedStorage, static_dir: Option<&FsPath>) -> Router {
    let router = Router::new()
        .route("/measurements/{window}", get(measurements))
        .with_state(store);

    match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

/// Serves until `shutdown` resolves, then closes the store.
pub async fn serve(
    cfg: &ServerConfig,
    store: SharedStorage,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let listener = match bind(&cfg.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            close(store).await;
            return Err(e.into());
        }
    };

    let app = router(store.clone(), cfg.static_dir.as_deref());
    let res = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await;

    close(store).await;
    Ok(res?)
}

async fn bind(listen: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(listen).await?;
    info!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

async fn close(store: SharedStorage) {
    if let Err(e) = store.close().await {
        warn!("closing series store: {e}");
    }
}

async fn measurements(
    State(store): State<SharedStorage>,
    Path(window): Path<String>,
) -> Result<Json<Measurements>, ApiError> {
    let (start, end) = parse_window(&window)?;
    let page = store.page(start, end).await?;
    Ok(Json(page.into()))
}

fn parse_window(window: &str) -> Result<(f64, f64), ApiError> {
    let bad = || ApiError::BadWindow(window.to_string());
    let (start, end) = window.split_once(',').ok_or_else(bad)?;
    let start: f64 = start.trim().parse().map_err(|_| bad())?;
    let end: f64 = end.trim().parse().map_err(|_| bad())?;
    if start.is_nan() || end.is_nan() {
        return Err(bad());
    }
    Ok((start, end))
}
