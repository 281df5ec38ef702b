mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{error_code, get, json, multipart, Harness};
use serde_json::json;
use uuid::Uuid;

const DESCRIPTION: &str = "Driver was overtaking on the shoulder near Githurai";

fn png(len: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.resize(len, 0);
    bytes
}

async fn fleet(h: &Harness) -> Uuid {
    let sacco = h.sacco("Super Metro").await;
    h.vehicle(sacco, "KBZ 123A", "CBD - Thika").await
}

fn report_uri(vehicle: Uuid) -> String {
    format!("/vehicles/{}/reports", vehicle)
}

#[tokio::test]
async fn report_with_small_png_is_accepted() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let token = h.passenger("Njeri").await;

    let request = multipart(
        &report_uri(vehicle),
        Some(&token),
        &[
            ("category", "RECKLESS_DRIVING"),
            ("description", DESCRIPTION),
            ("tripId", "trip-42"),
        ],
        Some(("image/png", png(2 * 1024))),
    );
    let (status, body) = h.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["message"], "Report submitted successfully");

    let report = &body["data"]["report"];
    assert_eq!(report["status"], "PENDING");
    assert_eq!(report["category"], "RECKLESS_DRIVING");
    let url = report["photoUrl"].as_str().unwrap();
    assert!(url.starts_with("https://photos.test/reports/"));
    assert!(url.ends_with(".png"));
    assert_eq!(body["data"]["vehicle"]["reportCount"], 1);

    let uploads = h.photos.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, "image/png");
    assert_eq!(uploads[0].2, 2 * 1024);
}

#[tokio::test]
async fn oversized_or_unsupported_photos_are_rejected() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let token = h.passenger("Njeri").await;
    let fields = [("category", "SPEEDING"), ("description", DESCRIPTION)];

    let big = vec![0xffu8; 6 * 1024 * 1024];
    let (status, body) = h
        .send(multipart(
            &report_uri(vehicle),
            Some(&token),
            &fields,
            Some(("image/jpeg", big)),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "FILE_TOO_LARGE");

    let (status, body) = h
        .send(multipart(
            &report_uri(vehicle),
            Some(&token),
            &fields,
            Some(("image/gif", vec![b'G', b'I', b'F'])),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_FILE_TYPE");

    assert!(h.photos.uploads.lock().unwrap().is_empty());
    let (_, list) = h.send(get("/reports", Some(&token))).await;
    assert_eq!(list["data"]["total"], 0);

    // an empty photo part is the same as no photo
    let (status, body) = h
        .send(multipart(
            &report_uri(vehicle),
            Some(&token),
            &fields,
            Some(("application/octet-stream", Vec::new())),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert!(body["data"]["report"]["photoUrl"].is_null());
}

#[tokio::test]
async fn duplicate_window_is_one_hour() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let token = h.passenger("Kiprono").await;
    let fields = [("category", "OVERLOADING"), ("description", DESCRIPTION)];

    let (status, _) = h
        .send(multipart(&report_uri(vehicle), Some(&token), &fields, None))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    h.clock.advance(Duration::minutes(59));
    let (status, body) = h
        .send(multipart(&report_uri(vehicle), Some(&token), &fields, None))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "DUPLICATE_REPORT");

    // another category is not a duplicate
    let other = [("category", "HARASSMENT"), ("description", DESCRIPTION)];
    let (status, _) = h
        .send(multipart(&report_uri(vehicle), Some(&token), &other, None))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    h.clock.advance(Duration::minutes(2));
    let (status, body) = h
        .send(multipart(&report_uri(vehicle), Some(&token), &fields, None))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["vehicle"]["reportCount"], 3);
}

#[tokio::test]
async fn sixth_report_within_an_hour_is_rate_limited() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let token = h.passenger("Akinyi").await;
    let categories = [
        "RECKLESS_DRIVING",
        "SPEEDING",
        "HARASSMENT",
        "OVERLOADING",
        "FARE_DISPUTE",
    ];

    for category in categories {
        let fields = [("category", category), ("description", DESCRIPTION)];
        let (status, body) = h
            .send(multipart(&report_uri(vehicle), Some(&token), &fields, None))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        h.clock.advance(Duration::minutes(1));
    }

    let fields = [("category", "OTHER"), ("description", DESCRIPTION)];
    let (status, body) = h
        .send(multipart(&report_uri(vehicle), Some(&token), &fields, None))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["error"]["retryAfter"], 3600);

    // a different reporter has their own budget
    let other = h.passenger("Barasa").await;
    let (status, _) = h
        .send(multipart(&report_uri(vehicle), Some(&other), &fields, None))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn report_form_is_validated_after_identity() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let fields = [("category", "TAILGATING"), ("description", "too short")];

    let (status, _) = h
        .send(multipart(&report_uri(vehicle), None, &fields, None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = h.passenger("Chebet").await;
    let (status, body) = h
        .send(multipart(&report_uri(vehicle), Some(&token), &fields, None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"].as_array().unwrap().len(), 2);

    let fields = [("category", "SPEEDING"), ("description", DESCRIPTION)];
    let (status, body) = h
        .send(multipart(
            &report_uri(Uuid::new_v4()),
            Some(&token),
            &fields,
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn anonymous_reports_hide_the_reporter() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let named = h.passenger("Wafula").await;
    let hidden = h.passenger("Secret").await;

    let fields = [("category", "SPEEDING"), ("description", DESCRIPTION)];
    h.send(multipart(&report_uri(vehicle), Some(&named), &fields, None))
        .await;
    h.clock.advance(Duration::minutes(1));
    let fields = [
        ("category", "DRUNK_DRIVING"),
        ("description", DESCRIPTION),
        ("isAnonymous", "true"),
    ];
    h.send(multipart(&report_uri(vehicle), Some(&hidden), &fields, None))
        .await;

    let (status, body) = h.send(get("/reports", Some(&named))).await;
    assert_eq!(status, StatusCode::OK);
    let reports = body["data"]["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["isAnonymous"], true);
    assert!(reports[0]["user"].is_null());
    assert_eq!(reports[1]["user"]["name"], "Wafula");
    assert_eq!(reports[1]["vehicle"]["registrationPlate"], "KBZ 123A");
    assert_eq!(reports[1]["vehicle"]["sacco"]["name"], "Super Metro");

    let (_, body) = h
        .send(get("/reports?category=DRUNK_DRIVING", Some(&named)))
        .await;
    assert_eq!(body["data"]["total"], 1);

    let (status, body) = h.send(get("/reports?status=OPEN", Some(&named))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, _) = h.send(get("/reports", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn vehicle_reports_are_admin_only() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let user = h.passenger("Mutua").await;
    let admin = h.admin().await;
    let fields = [("category", "UNROADWORTHY"), ("description", DESCRIPTION)];
    h.send(multipart(&report_uri(vehicle), Some(&user), &fields, None))
        .await;

    let (status, _) = h.send(get(&report_uri(vehicle), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = h.send(get(&report_uri(vehicle), Some(&user))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "FORBIDDEN");

    let (status, body) = h
        .send(get(&format!("{}?status=PENDING", report_uri(vehicle)), Some(&admin)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["reports"][0]["category"], "UNROADWORTHY");
}

#[tokio::test]
async fn moderation_is_one_way_and_admin_only() {
    let h = Harness::new();
    let vehicle = fleet(&h).await;
    let user = h.passenger("Omondi").await;
    let admin = h.admin().await;
    let fields = [("category", "ROUTE_DEVIATION"), ("description", DESCRIPTION)];
    let (_, created) = h
        .send(multipart(&report_uri(vehicle), Some(&user), &fields, None))
        .await;
    let report_id = created["data"]["report"]["id"].as_str().unwrap().to_string();
    let uri = format!("/reports/{}", report_id);
    let verdict = json!({ "status": "VERIFIED", "note": "Confirmed with the sacco" });

    let (status, _) = h
        .send(json("PATCH", &uri, Some(&user), verdict.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .send(json("PATCH", &uri, Some(&admin), verdict.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "VERIFIED");
    assert_eq!(body["data"]["moderationNote"], "Confirmed with the sacco");
    assert!(body["data"]["moderatedAt"].is_string());

    let (status, body) = h
        .send(json("PATCH", &uri, Some(&admin), json!({ "status": "DISMISSED" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "REPORT_ALREADY_MODERATED");

    let (status, _) = h
        .send(json(
            "PATCH",
            &format!("/reports/{}", Uuid::new_v4()),
            Some(&admin),
            verdict,
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // verified reports no longer count as pending
    let (_, listing) = h.send(get("/vehicles", None)).await;
    assert_eq!(listing["data"]["vehicles"][0]["reportCount"], 0);
}
