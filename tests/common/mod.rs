#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use easymat::app::{build_router, AppState};
use easymat::identity::sign_token;
use easymat::limiter::SlidingWindowLimiter;
use easymat::models::{Role, Sacco, User, Vehicle, VehicleAggregates};
use easymat::photos::PhotoStore;
use easymat::store::MemoryStore;
use easymat::utils::Clock;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const SECRET: &str = "test-identity-secret";
pub const BODY_LIMIT: usize = 8 * 1024 * 1024;

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakePhotos {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait::async_trait]
impl PhotoStore for FakePhotos {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> anyhow::Result<String> {
        self.uploads
            .lock()
            .unwrap()
            .push((key.to_string(), content_type.to_string(), bytes.len()));
        Ok(format!("https://photos.test/{}", key))
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub photos: Arc<FakePhotos>,
}

/// 09:00 UTC, which is noon on the Nairobi calendar day.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let photos = Arc::new(FakePhotos::default());
        let state = AppState {
            store: store.clone(),
            photos: photos.clone(),
            limiter: Arc::new(SlidingWindowLimiter::new()),
            clock: clock.clone(),
            identity_secret: SECRET.to_string(),
            day_offset: FixedOffset::east_opt(3 * 3600).unwrap(),
            max_body_bytes: BODY_LIMIT,
        };
        Self {
            state,
            store,
            clock,
            photos,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Seeds a user whose account is `age` old and returns a signed bearer token.
    pub async fn user(&self, name: &str, role: Role, age: Duration) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.store
            .insert_user(User {
                id,
                email: format!("{}@example.com", name.to_lowercase()),
                name: Some(name.to_string()),
                role,
                created_at: self.clock.now() - age,
            })
            .await;
        (id, sign_token(id, role, SECRET))
    }

    pub async fn passenger(&self, name: &str) -> String {
        self.user(name, Role::User, Duration::days(90)).await.1
    }

    pub async fn admin(&self) -> String {
        self.user("Admin", Role::Admin, Duration::days(365)).await.1
    }

    pub async fn sacco(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_sacco(Sacco {
                id,
                name: name.to_string(),
            })
            .await;
        id
    }

    pub async fn vehicle(&self, sacco_id: Uuid, plate: &str, route: &str) -> Uuid {
        self.vehicle_with(sacco_id, plate, route, VehicleAggregates::default())
            .await
    }

    pub async fn vehicle_with(
        &self,
        sacco_id: Uuid,
        plate: &str,
        route: &str,
        aggregates: VehicleAggregates,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_vehicle(Vehicle {
                id,
                sacco_id,
                registration_plate: plate.to_string(),
                route: route.to_string(),
                capacity: 14,
                photo_url: None,
                aggregates,
                created_at: self.clock.now(),
            })
            .await;
        id
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

fn with_auth(
    builder: axum::http::request::Builder,
    token: Option<&str>,
) -> axum::http::request::Builder {
    match token {
        Some(token) => builder.header("authorization", format!("Bearer {}", token)),
        None => builder,
    }
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    with_auth(Request::get(uri), token)
        .body(Body::empty())
        .unwrap()
}

pub fn json(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    with_auth(Request::builder().method(method).uri(uri), token)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn multipart(
    uri: &str,
    token: Option<&str>,
    fields: &[(&str, &str)],
    photo: Option<(&str, Vec<u8>)>,
) -> Request<Body> {
    let boundary = "easymat-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((content_type, bytes)) = photo {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"photo\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    with_auth(Request::post(uri), token)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn rating_body(score: f64) -> Value {
    serde_json::json!({
        "score": score,
        "safetyScore": score,
        "cleanlinessScore": score,
    })
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
