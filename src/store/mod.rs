//! Storage client seam. Handlers receive an `Arc<dyn Store>`; Postgres backs
//! production and the in-memory store backs tests and database-less runs.
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ModerationOutcome, Moderation, NewRating, NewReport, NewVehicle, RatingOutcome, RatingView,
    Report, ReportCategory, ReportListItem, ReportStatus, Sacco, User, Vehicle, VehicleListItem,
};
use crate::utils::PageRequest;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("A record with this {0} already exists")]
    Conflict(String),

    #[error("Record not found")]
    NotFound,

    #[error("Invalid reference to related record")]
    InvalidReference,

    #[error("Database error occurred")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::InvalidReference => StatusCode::BAD_REQUEST,
            StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VehicleFilter {
    pub plate: Option<String>,
    pub route: Option<String>,
    pub sacco: Option<String>,
    pub min_rating: Option<f64>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub vehicle_id: Option<Uuid>,
    pub status: Option<ReportStatus>,
    pub category: Option<ReportCategory>,
    pub page: PageRequest,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_sacco(&self, id: Uuid) -> Result<Option<Sacco>, StoreError>;
    async fn find_vehicle(&self, id: Uuid) -> Result<Option<Vehicle>, StoreError>;
    async fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>, StoreError>;
    async fn create_vehicle(&self, vehicle: NewVehicle) -> Result<Vehicle, StoreError>;
    async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
    ) -> Result<(Vec<VehicleListItem>, u64), StoreError>;

    async fn has_rating_since(
        &self,
        user_id: Uuid,
        vehicle_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn count_ratings_since(&self, user_id: Uuid, since: DateTime<Utc>)
        -> Result<u64, StoreError>;
    /// Inserts the rating and overwrites the vehicle's aggregates in one transaction.
    /// Any rating by the same user for the vehicle at or after `duplicate_since`,
    /// checked under the same lock, yields [`RatingOutcome::Duplicate`] instead.
    async fn insert_rating(
        &self,
        rating: NewRating,
        duplicate_since: DateTime<Utc>,
    ) -> Result<RatingOutcome, StoreError>;
    async fn list_ratings(
        &self,
        vehicle_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<RatingView>, u64), StoreError>;
    /// Star histogram over every rating of the vehicle; index 0 holds one-star ratings.
    async fn rating_distribution(&self, vehicle_id: Uuid) -> Result<[u64; 5], StoreError>;

    async fn has_report_since(
        &self,
        user_id: Uuid,
        vehicle_id: Uuid,
        category: ReportCategory,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    async fn insert_report(&self, report: NewReport) -> Result<Report, StoreError>;
    async fn count_reports(
        &self,
        vehicle_id: Uuid,
        status: Option<ReportStatus>,
    ) -> Result<u64, StoreError>;
    async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<(Vec<ReportListItem>, u64), StoreError>;
    async fn moderate_report(
        &self,
        id: Uuid,
        moderation: Moderation,
    ) -> Result<ModerationOutcome, StoreError>;
}

/// Rounds a score to its star bucket (1..=5) for the rating histogram.
pub(crate) fn star_bucket(score: f64) -> Option<usize> {
    let star = score.round();
    if (1.0..=5.0).contains(&star) {
        Some(star as usize - 1)
    } else {
        None
    }
}
