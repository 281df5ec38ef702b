use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{AppError, FieldError};
use crate::models::{NewVehicle, RatingView, SaccoRef, Vehicle, VehicleListItem};
use crate::store::{StoreError, VehicleFilter};
use crate::utils::{PageInfo, PageRequest};

pub const DEFAULT_CAPACITY: i32 = 14;
pub const MAX_CAPACITY: i32 = 100;
pub const MIN_ROUTE_CHARS: usize = 3;
pub const RECENT_RATINGS: i64 = 10;

// Kenyan plates: KXX 123X, the space optional.
static PLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^K[A-Z]{2}\s?\d{3}[A-Z]$").expect("plate pattern compiles")
});

pub fn is_valid_plate(plate: &str) -> bool {
    PLATE.is_match(plate)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleQuery {
    pub plate: Option<String>,
    pub route: Option<String>,
    pub sacco: Option<String>,
    pub min_rating: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

fn text_filter(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl VehicleQuery {
    pub fn into_filter(self) -> Result<VehicleFilter, AppError> {
        let min_rating = match self.min_rating.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => return Err(AppError::invalid("minRating", "Must be a number")),
            },
        };
        Ok(VehicleFilter {
            page: PageRequest::from_query(self.limit.as_deref(), self.offset.as_deref()),
            plate: text_filter(self.plate),
            route: text_filter(self.route),
            sacco: text_filter(self.sacco),
            min_rating,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct VehiclePage {
    pub vehicles: Vec<VehicleListItem>,
    #[serde(flatten)]
    pub pagination: PageInfo,
}

pub async fn list_vehicles(state: &AppState, filter: VehicleFilter) -> Result<VehiclePage, AppError> {
    let (vehicles, total) = state.store.list_vehicles(&filter).await?;
    Ok(VehiclePage {
        vehicles,
        pagination: filter.page.info(total),
    })
}

#[derive(Debug, Serialize)]
pub struct VehicleCounts {
    pub ratings: u64,
    pub reports: u64,
}

#[derive(Debug, Serialize)]
pub struct VehicleDetail {
    #[serde(flatten)]
    pub vehicle: Vehicle,
    pub sacco: Option<SaccoRef>,
    pub ratings: Vec<RatingView>,
    #[serde(rename = "_count")]
    pub counts: VehicleCounts,
}

pub async fn vehicle_detail(state: &AppState, vehicle_id: Uuid) -> Result<VehicleDetail, AppError> {
    let vehicle = state
        .store
        .find_vehicle(vehicle_id)
        .await?
        .ok_or(AppError::NotFound("Vehicle"))?;
    let sacco = state
        .store
        .find_sacco(vehicle.sacco_id)
        .await?
        .map(|s| SaccoRef {
            id: s.id,
            name: s.name,
        });
    let recent = PageRequest {
        limit: RECENT_RATINGS,
        offset: 0,
    };
    let (ratings, rating_total) = state.store.list_ratings(vehicle.id, recent).await?;
    let report_total = state.store.count_reports(vehicle.id, None).await?;

    Ok(VehicleDetail {
        vehicle,
        sacco,
        ratings,
        counts: VehicleCounts {
            ratings: rating_total,
            reports: report_total,
        },
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInput {
    pub sacco_id: Option<String>,
    pub registration_plate: Option<String>,
    pub route: Option<String>,
    pub capacity: Option<i64>,
    pub photo_url: Option<String>,
}

struct ValidVehicle {
    sacco_id: Uuid,
    registration_plate: String,
    route: String,
    capacity: i32,
    photo_url: Option<String>,
}

fn is_web_url(raw: &str) -> bool {
    reqwest::Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

impl VehicleInput {
    fn validate(self) -> Result<ValidVehicle, AppError> {
        let mut details = Vec::new();

        let sacco_id = match self.sacco_id.as_deref().map(Uuid::parse_str) {
            Some(Ok(id)) => Some(id),
            None => {
                details.push(FieldError::new("saccoId", "Required"));
                None
            }
            Some(Err(_)) => {
                details.push(FieldError::new("saccoId", "Invalid sacco id"));
                None
            }
        };

        let plate = self.registration_plate.unwrap_or_default();
        if !is_valid_plate(&plate) {
            details.push(FieldError::new(
                "registrationPlate",
                "Invalid registration plate format",
            ));
        }

        let route = self.route.unwrap_or_default();
        if route.trim().chars().count() < MIN_ROUTE_CHARS {
            details.push(FieldError::new(
                "route",
                format!("Must be at least {} characters", MIN_ROUTE_CHARS),
            ));
        }

        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY as i64);
        if !(1..=MAX_CAPACITY as i64).contains(&capacity) {
            details.push(FieldError::new(
                "capacity",
                format!("Must be between 1 and {}", MAX_CAPACITY),
            ));
        }

        let photo_url = self.photo_url.filter(|u| !u.trim().is_empty());
        if let Some(url) = &photo_url {
            if !is_web_url(url) {
                details.push(FieldError::new("photoUrl", "Must be a valid URL"));
            }
        }

        match sacco_id {
            Some(sacco_id) if details.is_empty() => Ok(ValidVehicle {
                sacco_id,
                registration_plate: plate,
                route: route.trim().to_string(),
                capacity: capacity as i32,
                photo_url,
            }),
            _ => Err(AppError::Validation(details)),
        }
    }
}

pub async fn create_vehicle(state: &AppState, input: VehicleInput) -> Result<Vehicle, AppError> {
    let valid = input.validate()?;

    if state
        .store
        .find_vehicle_by_plate(&valid.registration_plate)
        .await?
        .is_some()
    {
        return Err(AppError::VehicleExists);
    }
    if state.store.find_sacco(valid.sacco_id).await?.is_none() {
        return Err(AppError::invalid("saccoId", "Sacco does not exist"));
    }

    let created = state
        .store
        .create_vehicle(NewVehicle {
            sacco_id: valid.sacco_id,
            registration_plate: valid.registration_plate,
            route: valid.route,
            capacity: valid.capacity,
            photo_url: valid.photo_url,
            created_at: state.clock.now(),
        })
        .await;

    // A concurrent insert can still win the unique plate index.
    let vehicle = match created {
        Ok(vehicle) => vehicle,
        Err(StoreError::Conflict(_)) => return Err(AppError::VehicleExists),
        Err(StoreError::InvalidReference) => {
            return Err(AppError::invalid("saccoId", "Sacco does not exist"))
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        vehicle_id = %vehicle.id,
        plate = %vehicle.registration_plate,
        "Vehicle registered"
    );
    Ok(vehicle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plates_follow_kenyan_format() {
        assert!(is_valid_plate("KBZ 123A"));
        assert!(is_valid_plate("KCA456B"));
        assert!(!is_valid_plate("kbz 123a"));
        assert!(!is_valid_plate("KBZ  123A"));
        assert!(!is_valid_plate("UBZ 123A"));
        assert!(!is_valid_plate("KBZ 12A"));
    }

    #[test]
    fn capacity_defaults_and_bounds() {
        let input = VehicleInput {
            sacco_id: Some(Uuid::new_v4().to_string()),
            registration_plate: Some("KDA 001Z".into()),
            route: Some("Route 46".into()),
            ..Default::default()
        };
        assert_eq!(input.validate().ok().map(|v| v.capacity), Some(14));

        let input = VehicleInput {
            sacco_id: Some("nope".into()),
            registration_plate: Some("KDA 001Z".into()),
            route: Some("CB".into()),
            capacity: Some(101),
            photo_url: Some("ftp://photos.example/bus.jpg".into()),
        };
        let Err(AppError::Validation(details)) = input.validate() else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["saccoId", "route", "capacity", "photoUrl"]);
    }

    #[test]
    fn min_rating_must_be_numeric() {
        let query = VehicleQuery {
            min_rating: Some("four".into()),
            ..Default::default()
        };
        assert!(matches!(query.into_filter(), Err(AppError::Validation(_))));

        let filter = VehicleQuery {
            min_rating: Some("4.0".into()),
            plate: Some("  ".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.min_rating, Some(4.0));
        assert_eq!(filter.plate, None);
    }
}
