use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{AppError, FieldError};
use crate::identity::Caller;
use crate::models::{NewRating, RatingOutcome, RatingScores, RatingView, VehicleAggregates};
use crate::utils::{start_of_day, PageRequest};

pub const MAX_RATINGS_PER_HOUR: u64 = 10;
pub const NEW_ACCOUNT_DAYS: i64 = 7;
pub const MAX_COMMENT_CHARS: usize = 500;

/// Mean of each cached field across every rating of a vehicle. No weighting and
/// no outlier rejection; an empty slice yields zeroed aggregates.
pub fn calculate_vehicle_rating(ratings: &[RatingScores]) -> VehicleAggregates {
    if ratings.is_empty() {
        return VehicleAggregates::default();
    }
    let n = ratings.len() as f64;
    let (score, safety, cleanliness) = ratings.iter().fold((0.0, 0.0, 0.0), |acc, r| {
        (
            acc.0 + r.score,
            acc.1 + r.safety_score,
            acc.2 + r.cleanliness_score,
        )
    });
    VehicleAggregates {
        avg_rating: score / n,
        rating_count: ratings.len() as i64,
        safety_score: safety / n,
        cleanliness_score: cleanliness / n,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingInput {
    pub trip_id: Option<String>,
    pub score: Option<f64>,
    pub safety_score: Option<f64>,
    pub cleanliness_score: Option<f64>,
    pub comfort_score: Option<f64>,
    pub punctuality_score: Option<f64>,
    pub comments: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidRating {
    pub trip_id: Option<String>,
    pub score: f64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
    pub comfort_score: Option<f64>,
    pub punctuality_score: Option<f64>,
    pub comments: Option<String>,
    pub is_anonymous: bool,
}

fn star_score(
    field: &str,
    value: Option<f64>,
    required: bool,
    details: &mut Vec<FieldError>,
) -> Option<f64> {
    match value {
        None if required => {
            details.push(FieldError::new(field, "Required"));
            None
        }
        None => None,
        Some(v) if v.is_finite() && (1.0..=5.0).contains(&v) => Some(v),
        Some(_) => {
            details.push(FieldError::new(field, "Must be between 1 and 5"));
            None
        }
    }
}

impl RatingInput {
    pub fn validate(self) -> Result<ValidRating, AppError> {
        let mut details = Vec::new();
        let score = star_score("score", self.score, true, &mut details);
        let safety_score = star_score("safetyScore", self.safety_score, true, &mut details);
        let cleanliness_score =
            star_score("cleanlinessScore", self.cleanliness_score, true, &mut details);
        let comfort_score = star_score("comfortScore", self.comfort_score, false, &mut details);
        let punctuality_score =
            star_score("punctualityScore", self.punctuality_score, false, &mut details);

        if let Some(comments) = &self.comments {
            if comments.chars().count() > MAX_COMMENT_CHARS {
                details.push(FieldError::new(
                    "comments",
                    format!("Must be at most {} characters", MAX_COMMENT_CHARS),
                ));
            }
        }

        match (score, safety_score, cleanliness_score) {
            (Some(score), Some(safety_score), Some(cleanliness_score)) if details.is_empty() => {
                Ok(ValidRating {
                    trip_id: self.trip_id.filter(|t| !t.trim().is_empty()),
                    score,
                    safety_score,
                    cleanliness_score,
                    comfort_score,
                    punctuality_score,
                    comments: self.comments,
                    is_anonymous: self.is_anonymous,
                })
            }
            _ => Err(AppError::Validation(details)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub score: f64,
    pub safety_score: f64,
    pub cleanliness_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatedVehicle {
    pub id: Uuid,
    pub registration_plate: String,
    #[serde(flatten)]
    pub aggregates: VehicleAggregates,
}

#[derive(Debug, Serialize)]
pub struct RatingReceipt {
    pub rating: RatingSummary,
    pub vehicle: RatedVehicle,
}

fn is_extreme(score: f64) -> bool {
    score == 1.0 || score == 5.0
}

/// An extreme score from an account younger than [`NEW_ACCOUNT_DAYS`].
pub fn is_suspicious(account_age: Duration, score: f64) -> bool {
    account_age < Duration::days(NEW_ACCOUNT_DAYS) && is_extreme(score)
}

pub async fn submit_rating(
    state: &AppState,
    caller: &Caller,
    vehicle_id: Uuid,
    input: RatingInput,
) -> Result<RatingReceipt, AppError> {
    let valid = input.validate()?;

    let vehicle = state
        .store
        .find_vehicle(vehicle_id)
        .await?
        .ok_or(AppError::NotFound("Vehicle"))?;

    let now = state.clock.now();
    let today = start_of_day(now, state.day_offset);
    if state
        .store
        .has_rating_since(caller.user_id, vehicle.id, today)
        .await?
    {
        return Err(AppError::DuplicateRating);
    }

    let user = state
        .store
        .find_user(caller.user_id)
        .await?
        .ok_or(AppError::UserNotFound)?;

    if is_suspicious(now - user.created_at, valid.score) {
        // Flag only; the rating is still accepted.
        warn!(
            target: "fraud",
            flag = "suspicious_new_account",
            user_id = %user.id,
            vehicle_id = %vehicle.id,
            score = valid.score,
            "Suspicious rating from new account"
        );
    }

    let recent = state
        .store
        .count_ratings_since(caller.user_id, now - Duration::hours(1))
        .await?;
    if recent >= MAX_RATINGS_PER_HOUR {
        warn!(user_id = %caller.user_id, recent, "Rating rate limit exceeded");
        return Err(AppError::RateLimited(
            "Too many ratings submitted. Please try again later.",
        ));
    }

    let outcome = state
        .store
        .insert_rating(
            NewRating {
                user_id: caller.user_id,
                vehicle_id: vehicle.id,
                trip_id: valid.trip_id,
                score: valid.score,
                safety_score: valid.safety_score,
                cleanliness_score: valid.cleanliness_score,
                comfort_score: valid.comfort_score,
                punctuality_score: valid.punctuality_score,
                comments: valid.comments,
                is_anonymous: valid.is_anonymous,
                created_at: now,
            },
            today,
        )
        .await?;
    let (rating, aggregates) = match outcome {
        RatingOutcome::Inserted(rating, aggregates) => (rating, aggregates),
        // Lost a race with a concurrent submission that passed the early check.
        RatingOutcome::Duplicate => return Err(AppError::DuplicateRating),
    };

    info!(
        vehicle_id = %vehicle.id,
        rating_id = %rating.id,
        avg_rating = aggregates.avg_rating,
        rating_count = aggregates.rating_count,
        "Rating recorded"
    );

    Ok(RatingReceipt {
        rating: RatingSummary {
            id: rating.id,
            vehicle_id: rating.vehicle_id,
            score: rating.score,
            safety_score: rating.safety_score,
            cleanliness_score: rating.cleanliness_score,
            created_at: rating.created_at,
        },
        vehicle: RatedVehicle {
            id: vehicle.id,
            registration_plate: vehicle.registration_plate,
            aggregates,
        },
    })
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct Distribution {
    #[serde(rename = "5")]
    pub five: u64,
    #[serde(rename = "4")]
    pub four: u64,
    #[serde(rename = "3")]
    pub three: u64,
    #[serde(rename = "2")]
    pub two: u64,
    #[serde(rename = "1")]
    pub one: u64,
}

impl From<[u64; 5]> for Distribution {
    fn from(buckets: [u64; 5]) -> Self {
        Self {
            one: buckets[0],
            two: buckets[1],
            three: buckets[2],
            four: buckets[3],
            five: buckets[4],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingList {
    pub ratings: Vec<RatingView>,
    pub total: i64,
    pub avg_rating: f64,
    pub distribution: Distribution,
    pub page: i64,
    pub limit: i64,
}

pub async fn list_ratings(
    state: &AppState,
    vehicle_id: Uuid,
    page: PageRequest,
) -> Result<RatingList, AppError> {
    let vehicle = state
        .store
        .find_vehicle(vehicle_id)
        .await?
        .ok_or(AppError::NotFound("Vehicle"))?;

    let (ratings, total) = state.store.list_ratings(vehicle.id, page).await?;
    let distribution = state.store.rating_distribution(vehicle.id).await?;
    let info = page.info(total);

    Ok(RatingList {
        ratings,
        total: info.total,
        avg_rating: vehicle.aggregates.avg_rating,
        distribution: distribution.into(),
        page: info.page,
        limit: info.limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(score: f64, safety: f64, cleanliness: f64) -> RatingScores {
        RatingScores {
            score,
            safety_score: safety,
            cleanliness_score: cleanliness,
        }
    }

    #[test]
    fn aggregates_are_plain_means() {
        let agg = calculate_vehicle_rating(&[
            scores(5.0, 4.0, 3.0),
            scores(4.0, 4.0, 5.0),
            scores(3.0, 1.0, 4.0),
        ]);
        assert_eq!(agg.rating_count, 3);
        assert!((agg.avg_rating - 4.0).abs() < 1e-9);
        assert!((agg.safety_score - 3.0).abs() < 1e-9);
        assert!((agg.cleanliness_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn no_ratings_means_zeroed_aggregates() {
        assert_eq!(calculate_vehicle_rating(&[]), VehicleAggregates::default());
    }

    #[test]
    fn single_outlier_is_not_rejected() {
        let mut rows = vec![scores(5.0, 5.0, 5.0); 9];
        rows.push(scores(1.0, 1.0, 1.0));
        let agg = calculate_vehicle_rating(&rows);
        assert!((agg.avg_rating - 4.6).abs() < 1e-9);
    }

    #[test]
    fn validation_reports_every_bad_field() {
        let input = RatingInput {
            score: Some(6.0),
            safety_score: None,
            cleanliness_score: Some(3.0),
            comfort_score: Some(0.5),
            comments: Some("x".repeat(501)),
            ..Default::default()
        };
        let Err(AppError::Validation(details)) = input.validate() else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["score", "safetyScore", "comfortScore", "comments"]
        );
    }

    #[test]
    fn optional_scores_may_be_omitted() {
        let input = RatingInput {
            score: Some(4.0),
            safety_score: Some(5.0),
            cleanliness_score: Some(3.5),
            comments: Some("Smooth ride".to_string()),
            ..Default::default()
        };
        let valid = input.validate().unwrap();
        assert_eq!(valid.comfort_score, None);
        assert_eq!(valid.punctuality_score, None);
        assert!(!valid.is_anonymous);
    }

    #[test]
    fn extreme_scores_are_only_the_endpoints() {
        assert!(is_extreme(1.0));
        assert!(is_extreme(5.0));
        assert!(!is_extreme(4.5));
    }

    #[test]
    fn new_accounts_with_extreme_scores_are_suspicious() {
        let almost_a_week = Duration::days(7) - Duration::hours(1);
        assert!(is_suspicious(almost_a_week, 5.0));
        assert!(is_suspicious(Duration::zero(), 1.0));
        assert!(is_suspicious(Duration::days(7) - Duration::seconds(1), 1.0));

        assert!(!is_suspicious(Duration::days(7), 5.0));
        assert!(!is_suspicious(Duration::days(90), 1.0));
        assert!(!is_suspicious(almost_a_week, 4.0));
        assert!(!is_suspicious(almost_a_week, 2.0));
    }
}
