use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, DefaultBodyLimit, Multipart,
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, patch},
    Router,
};
use chrono::FixedOffset;
use serde::{de::DeserializeOwned, Deserialize};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{success, AppError};
use crate::identity::{self, BearerHeader};
use crate::limiter::{RateLimiter, SlidingWindowLimiter};
use crate::photos::{DiskPhotoStore, HttpPhotoStore, PhotoStore};
use crate::ratings::{self, RatingInput};
use crate::reports::{self, ModerationInput, ReportForm, ReportQuery};
use crate::store::{MemoryStore, PgStore, Store};
use crate::utils::{Clock, PageRequest, SystemClock};
use crate::vehicles::{self, VehicleInput, VehicleQuery};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub photos: Arc<dyn PhotoStore>,
    pub limiter: Arc<dyn RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub identity_secret: String,
    pub day_offset: FixedOffset,
    pub max_body_bytes: usize,
}

pub async fn run_server(config: Config) -> Result<()> {
    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections).await?;
            info!("Connected to Postgres");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store; nothing will persist");
            Arc::new(MemoryStore::new())
        }
    };

    let photos: Arc<dyn PhotoStore> = match &config.photo_upload_url {
        Some(url) => {
            info!("Report photos will be uploaded to {}", url);
            Arc::new(HttpPhotoStore::new(url, config.photo_upload_token.clone()))
        }
        None => {
            info!("Report photos will be written under {}", config.photo_dir);
            Arc::new(DiskPhotoStore::new(
                &config.photo_dir,
                &config.photo_public_base,
            ))
        }
    };

    let state = AppState {
        store,
        photos,
        limiter: Arc::new(SlidingWindowLimiter::new()),
        clock: Arc::new(SystemClock),
        identity_secret: config.identity_secret.clone(),
        day_offset: config.day_offset,
        max_body_bytes: config.max_body_bytes,
    };

    let app = build_router(state);

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/vehicles", get(list_vehicles).post(create_vehicle))
        .route("/vehicles/:id", get(get_vehicle))
        .route(
            "/vehicles/:id/ratings",
            get(list_ratings).post(submit_rating),
        )
        .route(
            "/vehicles/:id/reports",
            get(list_vehicle_reports).post(submit_report),
        )
        .route("/reports", get(list_reports))
        .route("/reports/:id", patch(moderate_report))
        // Hard cap sits above the per-photo limit so oversized photos reach validation.
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<String>,
    offset: Option<String>,
}

/// Malformed ids can never match a row, so they read as missing.
fn parse_id(raw: &str, what: &'static str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(what))
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejecting request: invalid JSON body: {}", e);
        AppError::invalid("body", e.to_string())
    })
}

fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(value)| value)
        .map_err(|e| AppError::invalid("query", e.body_text()))
}

async fn list_vehicles(
    State(state): State<AppState>,
    query: Result<Query<VehicleQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let filter = parse_query(query)?.into_filter()?;
    let page = vehicles::list_vehicles(&state, filter).await?;
    Ok(success(StatusCode::OK, page, None))
}

async fn create_vehicle(
    State(state): State<AppState>,
    bearer: BearerHeader,
    body: Bytes,
) -> Result<Response, AppError> {
    identity::require_admin(&bearer, &state.identity_secret)?;
    let input: VehicleInput = parse_json(&body)?;
    let vehicle = vehicles::create_vehicle(&state, input).await?;
    Ok(success(
        StatusCode::CREATED,
        vehicle,
        Some("Vehicle created successfully"),
    ))
}

async fn get_vehicle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let vehicle_id = parse_id(&id, "Vehicle")?;
    let detail = vehicles::vehicle_detail(&state, vehicle_id).await?;
    Ok(success(StatusCode::OK, detail, None))
}

async fn submit_rating(
    State(state): State<AppState>,
    Path(id): Path<String>,
    bearer: BearerHeader,
    body: Bytes,
) -> Result<Response, AppError> {
    let caller = identity::require_user(&bearer, &state.identity_secret)?;
    let input: RatingInput = parse_json(&body)?;
    let vehicle_id = parse_id(&id, "Vehicle")?;
    let receipt = ratings::submit_rating(&state, &caller, vehicle_id, input).await?;
    Ok(success(
        StatusCode::CREATED,
        receipt,
        Some("Rating submitted successfully"),
    ))
}

async fn list_ratings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let page_query = parse_query(query)?;
    let page = PageRequest::from_query(page_query.limit.as_deref(), page_query.offset.as_deref());
    let vehicle_id = parse_id(&id, "Vehicle")?;
    let list = ratings::list_ratings(&state, vehicle_id, page).await?;
    Ok(success(StatusCode::OK, list, None))
}

async fn submit_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    bearer: BearerHeader,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let caller = identity::require_user(&bearer, &state.identity_secret)?;
    reports::admit(&state, &caller).await?;
    let multipart = multipart.map_err(|e| AppError::invalid("body", e.body_text()))?;
    let form = ReportForm::read(multipart).await?;
    let vehicle_id = parse_id(&id, "Vehicle")?;
    let receipt = reports::submit_report(&state, &caller, vehicle_id, form).await?;
    Ok(success(
        StatusCode::CREATED,
        receipt,
        Some("Report submitted successfully"),
    ))
}

async fn list_reports(
    State(state): State<AppState>,
    bearer: BearerHeader,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    identity::require_user(&bearer, &state.identity_secret)?;
    let filter = parse_query(query)?.into_filter()?;
    let page = reports::list_reports(&state, filter).await?;
    Ok(success(StatusCode::OK, page, None))
}

async fn list_vehicle_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
    bearer: BearerHeader,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    identity::require_admin(&bearer, &state.identity_secret)?;
    let filter = parse_query(query)?.into_filter()?;
    let vehicle_id = parse_id(&id, "Vehicle")?;
    let page = reports::list_vehicle_reports(&state, vehicle_id, filter).await?;
    Ok(success(StatusCode::OK, page, None))
}

async fn moderate_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    bearer: BearerHeader,
    body: Bytes,
) -> Result<Response, AppError> {
    let moderator = identity::require_admin(&bearer, &state.identity_secret)?;
    let input: ModerationInput = parse_json(&body)?;
    let report_id = parse_id(&id, "Report")?;
    let report = reports::moderate_report(&state, &moderator, report_id, input).await?;
    Ok(success(
        StatusCode::OK,
        report,
        Some("Report moderated successfully"),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
