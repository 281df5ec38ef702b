use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{star_bucket, ReportFilter, Store, StoreError, VehicleFilter};
use crate::models::{
    Author, Moderation, ModerationOutcome, NewRating, NewReport, NewVehicle, Rating, RatingOutcome,
    RatingScores, RatingView, Report, ReportCategory, ReportListItem, ReportStatus, ReportVehicle, Reporter,
    Sacco, SaccoName, SaccoRef, User, Vehicle, VehicleAggregates, VehicleListItem,
};
use crate::ratings::calculate_vehicle_rating;
use crate::utils::{contains_ignore_case, PageRequest};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    saccos: HashMap<Uuid, Sacco>,
    vehicles: HashMap<Uuid, Vehicle>,
    ratings: Vec<Rating>,
    reports: Vec<Report>,
}

impl Tables {
    fn pending_reports(&self, vehicle_id: Uuid) -> i64 {
        self.reports
            .iter()
            .filter(|r| r.vehicle_id == vehicle_id && r.status == ReportStatus::Pending)
            .count() as i64
    }

    fn report_item(&self, report: &Report) -> Option<ReportListItem> {
        let vehicle = self.vehicles.get(&report.vehicle_id)?;
        let sacco = self.saccos.get(&vehicle.sacco_id)?;
        let user = match (report.is_anonymous, report.user_id) {
            (false, Some(id)) => Some(Reporter {
                id,
                name: self.users.get(&id).and_then(|u| u.name.clone()),
            }),
            _ => None,
        };
        Some(ReportListItem {
            id: report.id,
            vehicle_id: report.vehicle_id,
            category: report.category,
            description: report.description.clone(),
            photo_url: report.photo_url.clone(),
            status: report.status,
            is_anonymous: report.is_anonymous,
            created_at: report.created_at,
            moderated_at: report.moderated_at,
            moderation_note: report.moderation_note.clone(),
            vehicle: ReportVehicle {
                id: vehicle.id,
                registration_plate: vehicle.registration_plate.clone(),
                route: vehicle.route.clone(),
                sacco: SaccoName {
                    name: sacco.name.clone(),
                },
            },
            user,
        })
    }
}

/// Process-local store. Every operation holds the table lock for its whole
/// duration, which gives each call the isolation of a serializable transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_sacco(&self, sacco: Sacco) {
        self.tables.lock().await.saccos.insert(sacco.id, sacco);
    }

    /// Inserts a vehicle as-is, including any preset aggregates.
    pub async fn insert_vehicle(&self, vehicle: Vehicle) {
        self.tables.lock().await.vehicles.insert(vehicle.id, vehicle);
    }
}

fn by_rating_desc(a: &Vehicle, b: &Vehicle) -> Ordering {
    b.aggregates
        .avg_rating
        .total_cmp(&a.aggregates.avg_rating)
        .then(b.aggregates.rating_count.cmp(&a.aggregates.rating_count))
        .then_with(|| a.registration_plate.cmp(&b.registration_plate))
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_sacco(&self, id: Uuid) -> Result<Option<Sacco>, StoreError> {
        Ok(self.tables.lock().await.saccos.get(&id).cloned())
    }

    async fn find_vehicle(&self, id: Uuid) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.tables.lock().await.vehicles.get(&id).cloned())
    }

    async fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .vehicles
            .values()
            .find(|v| v.registration_plate == plate)
            .cloned())
    }

    async fn create_vehicle(&self, vehicle: NewVehicle) -> Result<Vehicle, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.saccos.contains_key(&vehicle.sacco_id) {
            return Err(StoreError::InvalidReference);
        }
        if tables
            .vehicles
            .values()
            .any(|v| v.registration_plate == vehicle.registration_plate)
        {
            return Err(StoreError::Conflict("registration_plate".to_string()));
        }
        let created = Vehicle {
            id: Uuid::new_v4(),
            sacco_id: vehicle.sacco_id,
            registration_plate: vehicle.registration_plate,
            route: vehicle.route,
            capacity: vehicle.capacity,
            photo_url: vehicle.photo_url,
            aggregates: VehicleAggregates::default(),
            created_at: vehicle.created_at,
        };
        tables.vehicles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
    ) -> Result<(Vec<VehicleListItem>, u64), StoreError> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<&Vehicle> = tables
            .vehicles
            .values()
            .filter(|v| {
                filter
                    .plate
                    .as_deref()
                    .map_or(true, |p| contains_ignore_case(&v.registration_plate, p))
            })
            .filter(|v| {
                filter
                    .route
                    .as_deref()
                    .map_or(true, |r| contains_ignore_case(&v.route, r))
            })
            .filter(|v| {
                filter.sacco.as_deref().map_or(true, |s| {
                    tables
                        .saccos
                        .get(&v.sacco_id)
                        .is_some_and(|sacco| contains_ignore_case(&sacco.name, s))
                })
            })
            .filter(|v| {
                filter
                    .min_rating
                    .map_or(true, |min| v.aggregates.avg_rating >= min)
            })
            .collect();
        matching.sort_by(|a, b| by_rating_desc(a, b));

        let total = matching.len() as u64;
        let items = filter
            .page
            .window(&matching)
            .into_iter()
            .filter_map(|v| {
                let sacco = tables.saccos.get(&v.sacco_id)?;
                Some(VehicleListItem {
                    id: v.id,
                    registration_plate: v.registration_plate.clone(),
                    route: v.route.clone(),
                    capacity: v.capacity,
                    aggregates: v.aggregates,
                    photo_url: v.photo_url.clone(),
                    sacco: SaccoRef {
                        id: sacco.id,
                        name: sacco.name.clone(),
                    },
                    report_count: tables.pending_reports(v.id),
                })
            })
            .collect();
        Ok((items, total))
    }

    async fn has_rating_since(
        &self,
        user_id: Uuid,
        vehicle_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.ratings.iter().any(|r| {
            r.user_id == Some(user_id) && r.vehicle_id == vehicle_id && r.created_at >= since
        }))
    }

    async fn count_ratings_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .ratings
            .iter()
            .filter(|r| r.user_id == Some(user_id) && r.created_at > since)
            .count() as u64)
    }

    async fn insert_rating(
        &self,
        rating: NewRating,
        duplicate_since: DateTime<Utc>,
    ) -> Result<RatingOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.vehicles.contains_key(&rating.vehicle_id) {
            return Err(StoreError::InvalidReference);
        }
        if tables.ratings.iter().any(|r| {
            r.user_id == Some(rating.user_id)
                && r.vehicle_id == rating.vehicle_id
                && r.created_at >= duplicate_since
        }) {
            return Ok(RatingOutcome::Duplicate);
        }

        let stored = Rating {
            id: Uuid::new_v4(),
            user_id: Some(rating.user_id),
            vehicle_id: rating.vehicle_id,
            trip_id: rating.trip_id,
            score: rating.score,
            safety_score: rating.safety_score,
            cleanliness_score: rating.cleanliness_score,
            comfort_score: rating.comfort_score,
            punctuality_score: rating.punctuality_score,
            comments: rating.comments,
            is_anonymous: rating.is_anonymous,
            created_at: rating.created_at,
        };
        tables.ratings.push(stored.clone());

        let scores: Vec<RatingScores> = tables
            .ratings
            .iter()
            .filter(|r| r.vehicle_id == stored.vehicle_id)
            .map(|r| RatingScores {
                score: r.score,
                safety_score: r.safety_score,
                cleanliness_score: r.cleanliness_score,
            })
            .collect();
        let aggregates = calculate_vehicle_rating(&scores);
        if let Some(vehicle) = tables.vehicles.get_mut(&stored.vehicle_id) {
            vehicle.aggregates = aggregates;
        }
        Ok(RatingOutcome::Inserted(stored, aggregates))
    }

    async fn list_ratings(
        &self,
        vehicle_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<RatingView>, u64), StoreError> {
        let tables = self.tables.lock().await;
        let mut ratings: Vec<&Rating> = tables
            .ratings
            .iter()
            .filter(|r| r.vehicle_id == vehicle_id)
            .collect();
        ratings.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = ratings.len() as u64;
        let views = page
            .window(&ratings)
            .into_iter()
            .map(|r| RatingView {
                id: r.id,
                score: r.score,
                safety_score: r.safety_score,
                cleanliness_score: r.cleanliness_score,
                comfort_score: r.comfort_score,
                punctuality_score: r.punctuality_score,
                comments: r.comments.clone(),
                is_anonymous: r.is_anonymous,
                created_at: r.created_at,
                user: if r.is_anonymous {
                    None
                } else {
                    r.user_id.map(|id| Author {
                        name: tables.users.get(&id).and_then(|u| u.name.clone()),
                    })
                },
            })
            .collect();
        Ok((views, total))
    }

    async fn rating_distribution(&self, vehicle_id: Uuid) -> Result<[u64; 5], StoreError> {
        let tables = self.tables.lock().await;
        let mut buckets = [0u64; 5];
        for rating in tables.ratings.iter().filter(|r| r.vehicle_id == vehicle_id) {
            if let Some(idx) = star_bucket(rating.score) {
                buckets[idx] += 1;
            }
        }
        Ok(buckets)
    }

    async fn has_report_since(
        &self,
        user_id: Uuid,
        vehicle_id: Uuid,
        category: ReportCategory,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.reports.iter().any(|r| {
            r.user_id == Some(user_id)
                && r.vehicle_id == vehicle_id
                && r.category == category
                && r.created_at > since
        }))
    }

    async fn insert_report(&self, report: NewReport) -> Result<Report, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.vehicles.contains_key(&report.vehicle_id) {
            return Err(StoreError::InvalidReference);
        }
        let stored = Report {
            id: Uuid::new_v4(),
            user_id: Some(report.user_id),
            vehicle_id: report.vehicle_id,
            trip_id: report.trip_id,
            category: report.category,
            description: report.description,
            photo_url: report.photo_url,
            status: ReportStatus::Pending,
            is_anonymous: report.is_anonymous,
            moderated_by: None,
            moderated_at: None,
            moderation_note: None,
            created_at: report.created_at,
        };
        tables.reports.push(stored.clone());
        Ok(stored)
    }

    async fn count_reports(
        &self,
        vehicle_id: Uuid,
        status: Option<ReportStatus>,
    ) -> Result<u64, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .reports
            .iter()
            .filter(|r| r.vehicle_id == vehicle_id && status.map_or(true, |s| r.status == s))
            .count() as u64)
    }

    async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<(Vec<ReportListItem>, u64), StoreError> {
        let tables = self.tables.lock().await;
        let mut reports: Vec<&Report> = tables
            .reports
            .iter()
            .filter(|r| filter.vehicle_id.map_or(true, |id| r.vehicle_id == id))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.category.map_or(true, |c| r.category == c))
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = reports.len() as u64;
        let items = filter
            .page
            .window(&reports)
            .into_iter()
            .filter_map(|r| tables.report_item(r))
            .collect();
        Ok((items, total))
    }

    async fn moderate_report(
        &self,
        id: Uuid,
        moderation: Moderation,
    ) -> Result<ModerationOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(report) = tables.reports.iter_mut().find(|r| r.id == id) else {
            return Ok(ModerationOutcome::Missing);
        };
        if report.status != ReportStatus::Pending {
            return Ok(ModerationOutcome::AlreadyModerated(report.status));
        }
        report.status = moderation.status;
        report.moderated_by = Some(moderation.moderator_id);
        report.moderated_at = Some(moderation.at);
        report.moderation_note = moderation.note;
        Ok(ModerationOutcome::Updated(report.clone()))
    }
}
