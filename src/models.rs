use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    SaccoAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::SaccoAdmin => "SACCO_ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            "SACCO_ADMIN" => Ok(Role::SaccoAdmin),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value '{0}'")]
pub struct UnknownVariant(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportCategory {
    RecklessDriving,
    Speeding,
    Harassment,
    Overloading,
    Unroadworthy,
    RouteDeviation,
    FareDispute,
    DrunkDriving,
    Other,
}

impl ReportCategory {
    pub const ALL: [ReportCategory; 9] = [
        ReportCategory::RecklessDriving,
        ReportCategory::Speeding,
        ReportCategory::Harassment,
        ReportCategory::Overloading,
        ReportCategory::Unroadworthy,
        ReportCategory::RouteDeviation,
        ReportCategory::FareDispute,
        ReportCategory::DrunkDriving,
        ReportCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::RecklessDriving => "RECKLESS_DRIVING",
            ReportCategory::Speeding => "SPEEDING",
            ReportCategory::Harassment => "HARASSMENT",
            ReportCategory::Overloading => "OVERLOADING",
            ReportCategory::Unroadworthy => "UNROADWORTHY",
            ReportCategory::RouteDeviation => "ROUTE_DEVIATION",
            ReportCategory::FareDispute => "FARE_DISPUTE",
            ReportCategory::DrunkDriving => "DRUNK_DRIVING",
            ReportCategory::Other => "OTHER",
        }
    }
}

impl FromStr for ReportCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Pending,
    Verified,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "PENDING",
            ReportStatus::Verified => "VERIFIED",
            ReportStatus::Dismissed => "DISMISSED",
        }
    }
}

impl FromStr for ReportStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReportStatus::Pending),
            "VERIFIED" => Ok(ReportStatus::Verified),
            "DISMISSED" => Ok(ReportStatus::Dismissed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sacco {
    pub id: Uuid,
    pub name: String,
}

/// Cached per-vehicle statistics. Only the aggregation step writes these.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleAggregates {
    pub avg_rating: f64,
    pub rating_count: i64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Uuid,
    pub sacco_id: Uuid,
    pub registration_plate: String,
    pub route: String,
    pub capacity: i32,
    pub photo_url: Option<String>,
    #[serde(flatten)]
    pub aggregates: VehicleAggregates,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVehicle {
    pub sacco_id: Uuid,
    pub registration_plate: String,
    pub route: String,
    pub capacity: i32,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub vehicle_id: Uuid,
    pub trip_id: Option<String>,
    pub score: f64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
    pub comfort_score: Option<f64>,
    pub punctuality_score: Option<f64>,
    pub comments: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRating {
    pub user_id: Uuid,
    pub vehicle_id: Uuid,
    pub trip_id: Option<String>,
    pub score: f64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
    pub comfort_score: Option<f64>,
    pub punctuality_score: Option<f64>,
    pub comments: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

/// The subscores the aggregation step reads from each rating row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingScores {
    pub score: f64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub vehicle_id: Uuid,
    pub trip_id: Option<String>,
    pub category: ReportCategory,
    pub description: String,
    pub photo_url: Option<String>,
    pub status: ReportStatus,
    pub is_anonymous: bool,
    pub moderated_by: Option<Uuid>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderation_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Hides the reporter when the report was filed anonymously.
    pub fn redacted(mut self) -> Self {
        if self.is_anonymous {
            self.user_id = None;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub user_id: Uuid,
    pub vehicle_id: Uuid,
    pub trip_id: Option<String>,
    pub category: ReportCategory,
    pub description: String,
    pub photo_url: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Moderation {
    pub status: ReportStatus,
    pub moderator_id: Uuid,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RatingOutcome {
    Inserted(Rating, VehicleAggregates),
    /// The user already rated this vehicle at or after the cutoff.
    Duplicate,
}

#[derive(Debug, Clone)]
pub enum ModerationOutcome {
    Updated(Report),
    AlreadyModerated(ReportStatus),
    Missing,
}

// Read models returned by list queries.

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaccoRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleListItem {
    pub id: Uuid,
    pub registration_plate: String,
    pub route: String,
    pub capacity: i32,
    #[serde(flatten)]
    pub aggregates: VehicleAggregates,
    pub photo_url: Option<String>,
    pub sacco: SaccoRef,
    pub report_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Author {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingView {
    pub id: Uuid,
    pub score: f64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
    pub comfort_score: Option<f64>,
    pub punctuality_score: Option<f64>,
    pub comments: Option<String>,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub user: Option<Author>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportVehicle {
    pub id: Uuid,
    pub registration_plate: String,
    pub route: String,
    pub sacco: SaccoName,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaccoName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reporter {
    pub id: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportListItem {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub category: ReportCategory,
    pub description: String,
    pub photo_url: Option<String>,
    pub status: ReportStatus,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderation_note: Option<String>,
    pub vehicle: ReportVehicle,
    pub user: Option<Reporter>,
}
