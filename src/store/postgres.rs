use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::{star_bucket, ReportFilter, Store, StoreError, VehicleFilter};
use crate::models::{
    Author, Moderation, ModerationOutcome, NewRating, NewReport, NewVehicle, Rating, RatingOutcome,
    RatingScores, RatingView, Report, ReportCategory, ReportListItem, ReportStatus, ReportVehicle, Reporter,
    Sacco, SaccoName, SaccoRef, User, Vehicle, VehicleAggregates, VehicleListItem,
};
use crate::ratings::calculate_vehicle_rating;
use crate::utils::{escape_like, PageRequest};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id          UUID PRIMARY KEY,
        email       TEXT NOT NULL UNIQUE,
        name        TEXT,
        role        TEXT NOT NULL DEFAULT 'USER',
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS saccos (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS vehicles (
        id                  UUID PRIMARY KEY,
        sacco_id            UUID NOT NULL REFERENCES saccos (id),
        registration_plate  TEXT NOT NULL UNIQUE,
        route               TEXT NOT NULL,
        capacity            INTEGER NOT NULL,
        photo_url           TEXT,
        avg_rating          DOUBLE PRECISION NOT NULL DEFAULT 0,
        rating_count        BIGINT NOT NULL DEFAULT 0,
        safety_score        DOUBLE PRECISION NOT NULL DEFAULT 0,
        cleanliness_score   DOUBLE PRECISION NOT NULL DEFAULT 0,
        created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS ratings (
        id                  UUID PRIMARY KEY,
        user_id             UUID REFERENCES users (id),
        vehicle_id          UUID NOT NULL REFERENCES vehicles (id),
        trip_id             TEXT,
        score               DOUBLE PRECISION NOT NULL,
        safety_score        DOUBLE PRECISION NOT NULL,
        cleanliness_score   DOUBLE PRECISION NOT NULL,
        comfort_score       DOUBLE PRECISION,
        punctuality_score   DOUBLE PRECISION,
        comments            TEXT,
        is_anonymous        BOOLEAN NOT NULL DEFAULT FALSE,
        created_at          TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ratings_vehicle_created_idx ON ratings (vehicle_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS ratings_user_created_idx ON ratings (user_id, created_at)",
    "CREATE TABLE IF NOT EXISTS reports (
        id               UUID PRIMARY KEY,
        user_id          UUID REFERENCES users (id),
        vehicle_id       UUID NOT NULL REFERENCES vehicles (id),
        trip_id          TEXT,
        category         TEXT NOT NULL,
        description      TEXT NOT NULL,
        photo_url        TEXT,
        status           TEXT NOT NULL DEFAULT 'PENDING',
        is_anonymous     BOOLEAN NOT NULL DEFAULT FALSE,
        moderated_by     UUID REFERENCES users (id),
        moderated_at     TIMESTAMPTZ,
        moderation_note  TEXT,
        created_at       TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS reports_vehicle_status_idx ON reports (vehicle_id, status)",
    "CREATE INDEX IF NOT EXISTS reports_dedupe_idx ON reports (user_id, vehicle_id, category, created_at)",
];

const VEHICLE_COLUMNS: &str = "v.id, v.sacco_id, v.registration_plate, v.route, v.capacity, \
     v.photo_url, v.avg_rating, v.rating_count, v.safety_score, v.cleanliness_score, v.created_at";

const RATING_COLUMNS: &str = "id, user_id, vehicle_id, trip_id, score, safety_score, \
     cleanliness_score, comfort_score, punctuality_score, comments, is_anonymous, created_at";

const REPORT_COLUMNS: &str = "id, user_id, vehicle_id, trip_id, category, description, photo_url, \
     status, is_anonymous, moderated_by, moderated_at, moderation_note, created_at";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let mapped = match &err {
            sqlx::Error::RowNotFound => Some(StoreError::NotFound),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => Some(StoreError::Conflict(
                    db.constraint().unwrap_or("field").to_string(),
                )),
                Some("23503") => Some(StoreError::InvalidReference),
                _ => None,
            },
            _ => None,
        };
        mapped.unwrap_or_else(|| StoreError::Backend(err.into()))
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(anyhow::anyhow!("corrupt {} column: {}", what, err))
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            role: row.role.parse().map_err(|e| corrupt("users.role", e))?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct VehicleRow {
    id: Uuid,
    sacco_id: Uuid,
    registration_plate: String,
    route: String,
    capacity: i32,
    photo_url: Option<String>,
    avg_rating: f64,
    rating_count: i64,
    safety_score: f64,
    cleanliness_score: f64,
    created_at: DateTime<Utc>,
}

impl From<VehicleRow> for Vehicle {
    fn from(row: VehicleRow) -> Self {
        Vehicle {
            id: row.id,
            sacco_id: row.sacco_id,
            registration_plate: row.registration_plate,
            route: row.route,
            capacity: row.capacity,
            photo_url: row.photo_url,
            aggregates: VehicleAggregates {
                avg_rating: row.avg_rating,
                rating_count: row.rating_count,
                safety_score: row.safety_score,
                cleanliness_score: row.cleanliness_score,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct VehicleListRow {
    #[sqlx(flatten)]
    vehicle: VehicleRow,
    sacco_name: String,
    report_count: i64,
}

#[derive(FromRow)]
struct RatingRow {
    id: Uuid,
    user_id: Option<Uuid>,
    vehicle_id: Uuid,
    trip_id: Option<String>,
    score: f64,
    safety_score: f64,
    cleanliness_score: f64,
    comfort_score: Option<f64>,
    punctuality_score: Option<f64>,
    comments: Option<String>,
    is_anonymous: bool,
    created_at: DateTime<Utc>,
}

impl From<RatingRow> for Rating {
    fn from(row: RatingRow) -> Self {
        Rating {
            id: row.id,
            user_id: row.user_id,
            vehicle_id: row.vehicle_id,
            trip_id: row.trip_id,
            score: row.score,
            safety_score: row.safety_score,
            cleanliness_score: row.cleanliness_score,
            comfort_score: row.comfort_score,
            punctuality_score: row.punctuality_score,
            comments: row.comments,
            is_anonymous: row.is_anonymous,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct RatingViewRow {
    #[sqlx(flatten)]
    rating: RatingRow,
    user_name: Option<String>,
}

#[derive(FromRow)]
struct ReportRow {
    id: Uuid,
    user_id: Option<Uuid>,
    vehicle_id: Uuid,
    trip_id: Option<String>,
    category: String,
    description: String,
    photo_url: Option<String>,
    status: String,
    is_anonymous: bool,
    moderated_by: Option<Uuid>,
    moderated_at: Option<DateTime<Utc>>,
    moderation_note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Report {
            id: row.id,
            user_id: row.user_id,
            vehicle_id: row.vehicle_id,
            trip_id: row.trip_id,
            category: row
                .category
                .parse()
                .map_err(|e| corrupt("reports.category", e))?,
            description: row.description,
            photo_url: row.photo_url,
            status: row.status.parse().map_err(|e| corrupt("reports.status", e))?,
            is_anonymous: row.is_anonymous,
            moderated_by: row.moderated_by,
            moderated_at: row.moderated_at,
            moderation_note: row.moderation_note,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ReportListRow {
    #[sqlx(flatten)]
    report: ReportRow,
    registration_plate: String,
    route: String,
    sacco_name: String,
    user_name: Option<String>,
}

impl TryFrom<ReportListRow> for ReportListItem {
    type Error = StoreError;

    fn try_from(row: ReportListRow) -> Result<Self, Self::Error> {
        let report = Report::try_from(row.report)?;
        let user = match (report.is_anonymous, report.user_id) {
            (false, Some(id)) => Some(Reporter {
                id,
                name: row.user_name,
            }),
            _ => None,
        };
        Ok(ReportListItem {
            id: report.id,
            vehicle_id: report.vehicle_id,
            category: report.category,
            description: report.description,
            photo_url: report.photo_url,
            status: report.status,
            is_anonymous: report.is_anonymous,
            created_at: report.created_at,
            moderated_at: report.moderated_at,
            moderation_note: report.moderation_note,
            vehicle: ReportVehicle {
                id: report.vehicle_id,
                registration_plate: row.registration_plate,
                route: row.route,
                sacco: SaccoName {
                    name: row.sacco_name,
                },
            },
            user,
        })
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to Postgres")?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to apply schema statement: {}", statement))?;
        }
        info!("Database schema is up to date");
        Ok(())
    }

    pub async fn vehicle_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM vehicles ORDER BY registration_plate")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Recomputes one vehicle's aggregates from its ratings under a row lock.
    /// Returns the cached values before and after.
    pub async fn recompute_aggregates(
        &self,
        vehicle_id: Uuid,
    ) -> Result<(VehicleAggregates, VehicleAggregates), StoreError> {
        let mut tx = self.pool.begin().await?;
        let before: VehicleRow = sqlx::query_as(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles v WHERE v.id = $1 FOR UPDATE"
        ))
        .bind(vehicle_id)
        .fetch_one(&mut *tx)
        .await?;
        let after = recompute_locked(&mut tx, vehicle_id).await?;
        tx.commit().await?;
        Ok((Vehicle::from(before).aggregates, after))
    }
}

/// Caller must hold the vehicle row lock inside the current transaction.
async fn recompute_locked(
    conn: &mut PgConnection,
    vehicle_id: Uuid,
) -> Result<VehicleAggregates, StoreError> {
    let rows: Vec<(f64, f64, f64)> = sqlx::query_as(
        "SELECT score, safety_score, cleanliness_score FROM ratings WHERE vehicle_id = $1",
    )
    .bind(vehicle_id)
    .fetch_all(&mut *conn)
    .await?;
    let scores: Vec<RatingScores> = rows
        .into_iter()
        .map(|(score, safety_score, cleanliness_score)| RatingScores {
            score,
            safety_score,
            cleanliness_score,
        })
        .collect();
    let aggregates = calculate_vehicle_rating(&scores);

    sqlx::query(
        "UPDATE vehicles SET avg_rating = $2, rating_count = $3, safety_score = $4, \
         cleanliness_score = $5 WHERE id = $1",
    )
    .bind(vehicle_id)
    .bind(aggregates.avg_rating)
    .bind(aggregates.rating_count)
    .bind(aggregates.safety_score)
    .bind(aggregates.cleanliness_score)
    .execute(&mut *conn)
    .await?;
    Ok(aggregates)
}

fn push_vehicle_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &VehicleFilter) {
    if let Some(plate) = &filter.plate {
        qb.push(" AND v.registration_plate ILIKE ")
            .push_bind(format!("%{}%", escape_like(plate)));
    }
    if let Some(route) = &filter.route {
        qb.push(" AND v.route ILIKE ")
            .push_bind(format!("%{}%", escape_like(route)));
    }
    if let Some(sacco) = &filter.sacco {
        qb.push(" AND s.name ILIKE ")
            .push_bind(format!("%{}%", escape_like(sacco)));
    }
    if let Some(min) = filter.min_rating {
        qb.push(" AND v.avg_rating >= ").push_bind(min);
    }
}

fn push_report_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ReportFilter) {
    if let Some(vehicle_id) = filter.vehicle_id {
        qb.push(" AND r.vehicle_id = ").push_bind(vehicle_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND r.status = ").push_bind(status.as_str());
    }
    if let Some(category) = filter.category {
        qb.push(" AND r.category = ").push_bind(category.as_str());
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, email, name, role, created_at FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_sacco(&self, id: Uuid) -> Result<Option<Sacco>, StoreError> {
        let row: Option<(Uuid, String)> = sqlx::query_as("SELECT id, name FROM saccos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name)| Sacco { id, name }))
    }

    async fn find_vehicle(&self, id: Uuid) -> Result<Option<Vehicle>, StoreError> {
        let row: Option<VehicleRow> =
            sqlx::query_as(&format!("SELECT {VEHICLE_COLUMNS} FROM vehicles v WHERE v.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Vehicle::from))
    }

    async fn find_vehicle_by_plate(&self, plate: &str) -> Result<Option<Vehicle>, StoreError> {
        let row: Option<VehicleRow> = sqlx::query_as(&format!(
            "SELECT {VEHICLE_COLUMNS} FROM vehicles v WHERE v.registration_plate = $1"
        ))
        .bind(plate)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Vehicle::from))
    }

    async fn create_vehicle(&self, vehicle: NewVehicle) -> Result<Vehicle, StoreError> {
        let row: VehicleRow = sqlx::query_as(&format!(
            "INSERT INTO vehicles AS v (id, sacco_id, registration_plate, route, capacity, photo_url, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {VEHICLE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(vehicle.sacco_id)
        .bind(&vehicle.registration_plate)
        .bind(&vehicle.route)
        .bind(vehicle.capacity)
        .bind(&vehicle.photo_url)
        .bind(vehicle.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list_vehicles(
        &self,
        filter: &VehicleFilter,
    ) -> Result<(Vec<VehicleListItem>, u64), StoreError> {
        let mut count_qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM vehicles v JOIN saccos s ON s.id = v.sacco_id WHERE TRUE",
        );
        push_vehicle_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {VEHICLE_COLUMNS}, s.name AS sacco_name, \
             (SELECT COUNT(*) FROM reports r WHERE r.vehicle_id = v.id AND r.status = 'PENDING') AS report_count \
             FROM vehicles v JOIN saccos s ON s.id = v.sacco_id WHERE TRUE"
        ));
        push_vehicle_filters(&mut qb, filter);
        qb.push(" ORDER BY v.avg_rating DESC, v.rating_count DESC, v.registration_plate ASC LIMIT ")
            .push_bind(filter.page.limit)
            .push(" OFFSET ")
            .push_bind(filter.page.offset);
        let rows: Vec<VehicleListRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let items = rows
            .into_iter()
            .map(|row| {
                let vehicle = Vehicle::from(row.vehicle);
                VehicleListItem {
                    id: vehicle.id,
                    registration_plate: vehicle.registration_plate,
                    route: vehicle.route,
                    capacity: vehicle.capacity,
                    aggregates: vehicle.aggregates,
                    photo_url: vehicle.photo_url,
                    sacco: SaccoRef {
                        id: vehicle.sacco_id,
                        name: row.sacco_name,
                    },
                    report_count: row.report_count,
                }
            })
            .collect();
        Ok((items, total as u64))
    }

    async fn has_rating_since(
        &self,
        user_id: Uuid,
        vehicle_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ratings WHERE user_id = $1 AND vehicle_id = $2 AND created_at >= $3)",
        )
        .bind(user_id)
        .bind(vehicle_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn count_ratings_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE user_id = $1 AND created_at > $2")
                .bind(user_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn insert_rating(
        &self,
        rating: NewRating,
        duplicate_since: DateTime<Utc>,
    ) -> Result<RatingOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent submissions for the same vehicle.
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM vehicles WHERE id = $1 FOR UPDATE")
                .bind(rating.vehicle_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::InvalidReference);
        }

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM ratings WHERE user_id = $1 AND vehicle_id = $2 AND created_at >= $3)",
        )
        .bind(rating.user_id)
        .bind(rating.vehicle_id)
        .bind(duplicate_since)
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Ok(RatingOutcome::Duplicate);
        }

        let row: RatingRow = sqlx::query_as(&format!(
            "INSERT INTO ratings ({RATING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {RATING_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(rating.user_id)
        .bind(rating.vehicle_id)
        .bind(&rating.trip_id)
        .bind(rating.score)
        .bind(rating.safety_score)
        .bind(rating.cleanliness_score)
        .bind(rating.comfort_score)
        .bind(rating.punctuality_score)
        .bind(&rating.comments)
        .bind(rating.is_anonymous)
        .bind(rating.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let aggregates = recompute_locked(&mut tx, rating.vehicle_id).await?;
        tx.commit().await?;
        Ok(RatingOutcome::Inserted(row.into(), aggregates))
    }

    async fn list_ratings(
        &self,
        vehicle_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<RatingView>, u64), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE vehicle_id = $1")
            .bind(vehicle_id)
            .fetch_one(&self.pool)
            .await?;
        let rows: Vec<RatingViewRow> = sqlx::query_as(
            "SELECT r.id, r.user_id, r.vehicle_id, r.trip_id, r.score, r.safety_score, \
             r.cleanliness_score, r.comfort_score, r.punctuality_score, r.comments, r.is_anonymous, \
             r.created_at, u.name AS user_name \
             FROM ratings r LEFT JOIN users u ON u.id = r.user_id \
             WHERE r.vehicle_id = $1 ORDER BY r.created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(vehicle_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        let views = rows
            .into_iter()
            .map(|row| {
                let r = row.rating;
                let user = match (r.is_anonymous, r.user_id) {
                    (false, Some(_)) => Some(Author {
                        name: row.user_name,
                    }),
                    _ => None,
                };
                RatingView {
                    id: r.id,
                    score: r.score,
                    safety_score: r.safety_score,
                    cleanliness_score: r.cleanliness_score,
                    comfort_score: r.comfort_score,
                    punctuality_score: r.punctuality_score,
                    comments: r.comments,
                    is_anonymous: r.is_anonymous,
                    created_at: r.created_at,
                    user,
                }
            })
            .collect();
        Ok((views, total as u64))
    }

    async fn rating_distribution(&self, vehicle_id: Uuid) -> Result<[u64; 5], StoreError> {
        // FLOOR(x + 0.5) matches f64::round for the positive range scores live in.
        let rows: Vec<(f64, i64)> = sqlx::query_as(
            "SELECT FLOOR(score + 0.5) AS star, COUNT(*) FROM ratings WHERE vehicle_id = $1 GROUP BY 1",
        )
        .bind(vehicle_id)
        .fetch_all(&self.pool)
        .await?;
        let mut buckets = [0u64; 5];
        for (star, count) in rows {
            if let Some(idx) = star_bucket(star) {
                buckets[idx] += count as u64;
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
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reports WHERE user_id = $1 AND vehicle_id = $2 \
             AND category = $3 AND created_at > $4)",
        )
        .bind(user_id)
        .bind(vehicle_id)
        .bind(category.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn insert_report(&self, report: NewReport) -> Result<Report, StoreError> {
        let row: ReportRow = sqlx::query_as(&format!(
            "INSERT INTO reports (id, user_id, vehicle_id, trip_id, category, description, photo_url, \
             is_anonymous, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {REPORT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(report.user_id)
        .bind(report.vehicle_id)
        .bind(&report.trip_id)
        .bind(report.category.as_str())
        .bind(&report.description)
        .bind(&report.photo_url)
        .bind(report.is_anonymous)
        .bind(report.created_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn count_reports(
        &self,
        vehicle_id: Uuid,
        status: Option<ReportStatus>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reports WHERE vehicle_id = $1 AND ($2::TEXT IS NULL OR status = $2)",
        )
        .bind(vehicle_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn list_reports(
        &self,
        filter: &ReportFilter,
    ) -> Result<(Vec<ReportListItem>, u64), StoreError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reports r WHERE TRUE");
        push_report_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT r.id, r.user_id, r.vehicle_id, r.trip_id, r.category, r.description, r.photo_url, \
             r.status, r.is_anonymous, r.moderated_by, r.moderated_at, r.moderation_note, r.created_at, \
             v.registration_plate, v.route, s.name AS sacco_name, u.name AS user_name \
             FROM reports r \
             JOIN vehicles v ON v.id = r.vehicle_id \
             JOIN saccos s ON s.id = v.sacco_id \
             LEFT JOIN users u ON u.id = r.user_id \
             WHERE TRUE",
        );
        push_report_filters(&mut qb, filter);
        qb.push(" ORDER BY r.created_at DESC LIMIT ")
            .push_bind(filter.page.limit)
            .push(" OFFSET ")
            .push_bind(filter.page.offset);
        let rows: Vec<ReportListRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let items = rows
            .into_iter()
            .map(ReportListItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total as u64))
    }

    async fn moderate_report(
        &self,
        id: Uuid,
        moderation: Moderation,
    ) -> Result<ModerationOutcome, StoreError> {
        let updated: Option<ReportRow> = sqlx::query_as(&format!(
            "UPDATE reports SET status = $2, moderated_by = $3, moderated_at = $4, moderation_note = $5 \
             WHERE id = $1 AND status = 'PENDING' RETURNING {REPORT_COLUMNS}"
        ))
        .bind(id)
        .bind(moderation.status.as_str())
        .bind(moderation.moderator_id)
        .bind(moderation.at)
        .bind(&moderation.note)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = updated {
            return Ok(ModerationOutcome::Updated(row.try_into()?));
        }

        let current: Option<String> = sqlx::query_scalar("SELECT status FROM reports WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match current {
            None => Ok(ModerationOutcome::Missing),
            Some(status) => Ok(ModerationOutcome::AlreadyModerated(
                status.parse().map_err(|e| corrupt("reports.status", e))?,
            )),
        }
    }
}
