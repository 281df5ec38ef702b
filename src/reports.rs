use axum::body::Bytes;
use axum::extract::multipart::{Field, Multipart};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::{AppError, FieldError};
use crate::identity::Caller;
use crate::models::{
    Moderation, ModerationOutcome, NewReport, Report, ReportCategory, ReportListItem,
    ReportStatus,
};
use crate::store::ReportFilter;
use crate::utils::{PageInfo, PageRequest};

pub const MAX_REPORTS_PER_HOUR: usize = 5;
pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_NOTE_CHARS: usize = 500;
pub const MAX_PHOTO_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_PHOTO_TYPES: [(&str, &str); 3] = [
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Raw multipart fields of a report submission, before validation.
#[derive(Debug, Clone, Default)]
pub struct ReportForm {
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_anonymous: bool,
    pub trip_id: Option<String>,
    pub photo: Option<PhotoUpload>,
}

fn malformed(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::invalid("body", err.body_text())
}

async fn field_text(field: Field<'_>) -> Result<String, AppError> {
    field.text().await.map_err(malformed)
}

impl ReportForm {
    /// Collects the known parts of a multipart body. Unknown parts are skipped and
    /// an empty `photo` part counts as no photo.
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = ReportForm::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "category" => form.category = Some(field_text(field).await?),
                "description" => form.description = Some(field_text(field).await?),
                "isAnonymous" => form.is_anonymous = field_text(field).await? == "true",
                "tripId" => {
                    let trip = field_text(field).await?;
                    form.trip_id = Some(trip).filter(|t| !t.trim().is_empty());
                }
                "photo" => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await.map_err(malformed)?;
                    if !bytes.is_empty() {
                        form.photo = Some(PhotoUpload {
                            content_type,
                            bytes,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    fn validate(&self) -> Result<(ReportCategory, String), AppError> {
        let mut details = Vec::new();

        let category = match self.category.as_deref() {
            None | Some("") => {
                details.push(FieldError::new("category", "Required"));
                None
            }
            Some(raw) => match raw.parse::<ReportCategory>() {
                Ok(category) => Some(category),
                Err(_) => {
                    details.push(FieldError::new("category", "Invalid category"));
                    None
                }
            },
        };

        let description = self.description.clone().unwrap_or_default();
        let len = description.chars().count();
        if len < MIN_DESCRIPTION_CHARS {
            details.push(FieldError::new(
                "description",
                format!("Must be at least {} characters", MIN_DESCRIPTION_CHARS),
            ));
        } else if len > MAX_DESCRIPTION_CHARS {
            details.push(FieldError::new(
                "description",
                format!("Must be at most {} characters", MAX_DESCRIPTION_CHARS),
            ));
        }

        match category {
            Some(category) if details.is_empty() => Ok((category, description)),
            _ => Err(AppError::Validation(details)),
        }
    }
}

/// Maps an accepted image content type to the extension used in its object key.
fn photo_extension(photo: &PhotoUpload) -> Result<&'static str, AppError> {
    let ext = ALLOWED_PHOTO_TYPES
        .iter()
        .find(|(mime, _)| photo.content_type.eq_ignore_ascii_case(mime))
        .map(|(_, ext)| *ext)
        .ok_or(AppError::InvalidFileType)?;
    if photo.bytes.len() > MAX_PHOTO_BYTES {
        return Err(AppError::FileTooLarge);
    }
    Ok(ext)
}

/// Counts this attempt against the caller's hourly report budget.
pub async fn admit(state: &AppState, caller: &Caller) -> Result<(), AppError> {
    let key = format!("report:{}", caller.user_id);
    let allowed = state
        .limiter
        .check(
            &key,
            MAX_REPORTS_PER_HOUR,
            Duration::hours(1),
            state.clock.now(),
        )
        .await;
    if !allowed {
        warn!(user_id = %caller.user_id, "Report rate limit exceeded");
        return Err(AppError::RateLimited(
            "Too many reports submitted. Please try again later.",
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub category: ReportCategory,
    pub description: String,
    pub photo_url: Option<String>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedVehicle {
    pub id: Uuid,
    pub registration_plate: String,
    pub report_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ReportReceipt {
    pub report: ReportSummary,
    pub vehicle: ReportedVehicle,
}

/// Files a report for a caller already admitted by [`admit`].
pub async fn submit_report(
    state: &AppState,
    caller: &Caller,
    vehicle_id: Uuid,
    form: ReportForm,
) -> Result<ReportReceipt, AppError> {
    let (category, description) = form.validate()?;

    let vehicle = state
        .store
        .find_vehicle(vehicle_id)
        .await?
        .ok_or(AppError::NotFound("Vehicle"))?;

    let photo = match form.photo {
        Some(photo) => {
            let ext = photo_extension(&photo)?;
            Some((photo, ext))
        }
        None => None,
    };

    let now = state.clock.now();
    if state
        .store
        .has_report_since(caller.user_id, vehicle.id, category, now - Duration::hours(1))
        .await?
    {
        return Err(AppError::DuplicateReport);
    }

    let photo_url = match photo {
        Some((photo, ext)) => {
            let key = format!("reports/{}.{}", Uuid::new_v4(), ext);
            let url = state
                .photos
                .put(&key, &photo.content_type, photo.bytes)
                .await
                .map_err(AppError::Upload)?;
            Some(url)
        }
        None => None,
    };

    let report = state
        .store
        .insert_report(NewReport {
            user_id: caller.user_id,
            vehicle_id: vehicle.id,
            trip_id: form.trip_id,
            category,
            description,
            photo_url,
            is_anonymous: form.is_anonymous,
            created_at: now,
        })
        .await?;
    let pending = state
        .store
        .count_reports(vehicle.id, Some(ReportStatus::Pending))
        .await?;

    info!(
        vehicle_id = %vehicle.id,
        report_id = %report.id,
        category = category.as_str(),
        pending,
        "Report filed"
    );

    Ok(ReportReceipt {
        report: ReportSummary {
            id: report.id,
            vehicle_id: report.vehicle_id,
            category: report.category,
            description: report.description,
            photo_url: report.photo_url,
            status: report.status,
            created_at: report.created_at,
        },
        vehicle: ReportedVehicle {
            id: vehicle.id,
            registration_plate: vehicle.registration_plate,
            report_count: pending,
        },
    })
}

/// Query-string filters for report listings, parsed strictly.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub vehicle_id: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ReportQuery {
    pub fn into_filter(self) -> Result<ReportFilter, AppError> {
        let mut details = Vec::new();

        let vehicle_id = non_empty(&self.vehicle_id).and_then(|raw| match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                details.push(FieldError::new("vehicleId", "Invalid vehicle id"));
                None
            }
        });
        let status = non_empty(&self.status).and_then(|raw| match raw.parse() {
            Ok(status) => Some(status),
            Err(_) => {
                details.push(FieldError::new("status", "Invalid status"));
                None
            }
        });
        let category = non_empty(&self.category).and_then(|raw| match raw.parse() {
            Ok(category) => Some(category),
            Err(_) => {
                details.push(FieldError::new("category", "Invalid category"));
                None
            }
        });

        if !details.is_empty() {
            return Err(AppError::Validation(details));
        }
        Ok(ReportFilter {
            vehicle_id,
            status,
            category,
            page: PageRequest::from_query(self.limit.as_deref(), self.offset.as_deref()),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ReportPage {
    pub reports: Vec<ReportListItem>,
    #[serde(flatten)]
    pub pagination: PageInfo,
}

pub async fn list_reports(state: &AppState, filter: ReportFilter) -> Result<ReportPage, AppError> {
    let (reports, total) = state.store.list_reports(&filter).await?;
    Ok(ReportPage {
        reports,
        pagination: filter.page.info(total),
    })
}

pub async fn list_vehicle_reports(
    state: &AppState,
    vehicle_id: Uuid,
    mut filter: ReportFilter,
) -> Result<ReportPage, AppError> {
    let vehicle = state
        .store
        .find_vehicle(vehicle_id)
        .await?
        .ok_or(AppError::NotFound("Vehicle"))?;
    filter.vehicle_id = Some(vehicle.id);
    list_reports(state, filter).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ModerationInput {
    pub status: Option<String>,
    pub note: Option<String>,
}

impl ModerationInput {
    fn validate(self) -> Result<(ReportStatus, Option<String>), AppError> {
        let mut details = Vec::new();
        let status = match self.status.as_deref().map(str::parse::<ReportStatus>) {
            Some(Ok(status)) if status != ReportStatus::Pending => Some(status),
            None => {
                details.push(FieldError::new("status", "Required"));
                None
            }
            Some(_) => {
                details.push(FieldError::new("status", "Must be VERIFIED or DISMISSED"));
                None
            }
        };
        if let Some(note) = &self.note {
            if note.chars().count() > MAX_NOTE_CHARS {
                details.push(FieldError::new(
                    "note",
                    format!("Must be at most {} characters", MAX_NOTE_CHARS),
                ));
            }
        }
        match status {
            Some(status) if details.is_empty() => {
                Ok((status, self.note.filter(|n| !n.trim().is_empty())))
            }
            _ => Err(AppError::Validation(details)),
        }
    }
}

pub async fn moderate_report(
    state: &AppState,
    moderator: &Caller,
    report_id: Uuid,
    input: ModerationInput,
) -> Result<Report, AppError> {
    let (status, note) = input.validate()?;
    let outcome = state
        .store
        .moderate_report(
            report_id,
            Moderation {
                status,
                moderator_id: moderator.user_id,
                note,
                at: state.clock.now(),
            },
        )
        .await?;

    match outcome {
        ModerationOutcome::Updated(report) => {
            info!(
                report_id = %report.id,
                moderator_id = %moderator.user_id,
                status = report.status.as_str(),
                "Report moderated"
            );
            Ok(report.redacted())
        }
        ModerationOutcome::AlreadyModerated(current) => {
            Err(AppError::AlreadyModerated(current.as_str()))
        }
        ModerationOutcome::Missing => Err(AppError::NotFound("Report")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(category: &str, description: &str) -> ReportForm {
        ReportForm {
            category: Some(category.to_string()),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn validation_collects_category_and_description() {
        let Err(AppError::Validation(details)) = form("TAILGATING", "short").validate() else {
            panic!("expected validation error");
        };
        let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["category", "description"]);

        let (category, _) = form("SPEEDING", "Driver overtook on a blind corner")
            .validate()
            .unwrap();
        assert_eq!(category, ReportCategory::Speeding);
    }

    #[test]
    fn photo_checks_type_before_size() {
        let big_gif = PhotoUpload {
            content_type: "image/gif".into(),
            bytes: Bytes::from(vec![0u8; MAX_PHOTO_BYTES + 1]),
        };
        assert!(matches!(
            photo_extension(&big_gif),
            Err(AppError::InvalidFileType)
        ));

        let big_jpeg = PhotoUpload {
            content_type: "image/jpeg".into(),
            bytes: Bytes::from(vec![0u8; MAX_PHOTO_BYTES + 1]),
        };
        assert!(matches!(
            photo_extension(&big_jpeg),
            Err(AppError::FileTooLarge)
        ));

        let exact = PhotoUpload {
            content_type: "image/webp".into(),
            bytes: Bytes::from(vec![0u8; MAX_PHOTO_BYTES]),
        };
        assert_eq!(photo_extension(&exact).unwrap(), "webp");
    }

    #[test]
    fn moderation_rejects_pending_target() {
        let input = ModerationInput {
            status: Some("PENDING".into()),
            note: None,
        };
        assert!(matches!(input.validate(), Err(AppError::Validation(_))));

        let input = ModerationInput {
            status: Some("DISMISSED".into()),
            note: Some("  ".into()),
        };
        assert_eq!(input.validate().unwrap(), (ReportStatus::Dismissed, None));
    }

    #[test]
    fn report_query_rejects_unknown_enums() {
        let query = ReportQuery {
            status: Some("OPEN".into()),
            category: Some("SPEEDING".into()),
            ..Default::default()
        };
        let Err(AppError::Validation(details)) = query.into_filter() else {
            panic!("expected validation error");
        };
        assert_eq!(details[0].field, "status");

        let filter = ReportQuery {
            vehicle_id: Some(String::new()),
            limit: Some("5".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.vehicle_id, None);
        assert_eq!(filter.page.limit, 5);
    }
}
