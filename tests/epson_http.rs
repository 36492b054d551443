//! Integration tests for the Epson Connect HTTP client.
//!
//! A fake provider is served by axum on an ephemeral port and records every request
//! it receives, so the wire-level details (auth headers, query strings, bodies) can
//! be asserted exactly.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use fancam_print::cloud::{EpsonCloud, PrinterCloud};
use fancam_print::config::AppConfig;
use fancam_print::core::{PrintOptions, PrintService, Stage};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEVICE: &str = "booth@print.example.com";

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone)]
struct FakeProvider {
    base_url: String,
    job_create_status: StatusCode,
    upload_status: StatusCode,
    print_delay: Duration,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeProvider {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

async fn handle(
    State(fake): State<FakeProvider>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    fake.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    });

    let job_path = "/api/1/printing/printers/printer-42/jobs/job-7";
    match (method, path.as_str()) {
        (Method::POST, "/api/1/printing/oauth2/auth/token") => Json(json!({
            "token_type": "Bearer",
            "access_token": "tok-123",
            "expires_in": 3600,
            "refresh_token": "refresh",
            "subject_type": "printer",
            "subject_id": "printer-42"
        }))
        .into_response(),
        (Method::POST, "/api/1/printing/printers/printer-42/jobs") => {
            if fake.job_create_status != StatusCode::OK {
                return (fake.job_create_status, "{\"code\":\"bad_setting\"}").into_response();
            }
            Json(json!({
                "id": "job-7",
                "upload_uri": format!("{}/upload?Key=abc", fake.base_url)
            }))
            .into_response()
        }
        (Method::POST, "/upload") => fake.upload_status.into_response(),
        (Method::POST, p) if p == format!("{}/print", job_path) => {
            tokio::time::sleep(fake.print_delay).await;
            Json(json!({})).into_response()
        }
        (Method::GET, p) if p == job_path => Json(json!({
            "status": "completed",
            "status_reason": "job_completed",
            "start_date": "2026-10-16T10:00:00Z",
            "update_date": "2026-10-16T10:00:30Z",
            "job_name": "My Little Fancam",
            "total_pages": 1
        }))
        .into_response(),
        (Method::DELETE, p) if p == job_path => StatusCode::NO_CONTENT.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_fake(job_create_status: StatusCode, upload_status: StatusCode) -> FakeProvider {
    spawn_fake_with(job_create_status, upload_status, Duration::ZERO).await
}

async fn spawn_fake_with(
    job_create_status: StatusCode,
    upload_status: StatusCode,
    print_delay: Duration,
) -> FakeProvider {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake = FakeProvider {
        base_url: format!("http://{}", addr),
        job_create_status,
        upload_status,
        print_delay,
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new().fallback(handle).with_state(fake.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    fake
}

fn config_for(fake: &FakeProvider) -> AppConfig {
    let mut config = AppConfig::default();
    config.provider.host = fake.base_url.clone();
    config.provider.client_id = "client".to_string();
    config.provider.client_secret = "secret".to_string();
    config.provider.device_id = Some(DEVICE.to_string());
    config.provider.request_timeout_secs = 5;
    config.retry.max_retries = 0;
    config.batch_delay_ms = 0;
    config
}

fn service_for(fake: &FakeProvider) -> PrintService {
    let config = config_for(fake);
    let cloud = EpsonCloud::new(&config.provider).unwrap();
    PrintService::new(Arc::new(cloud) as Arc<dyn PrinterCloud>, &config)
}

#[tokio::test]
async fn test_print_photo_wire_sequence() {
    let fake = spawn_fake(StatusCode::OK, StatusCode::OK).await;
    let service = service_for(&fake);

    let job = service
        .print_photo(DEVICE, b"\x89PNG fake", "photo.png", &PrintOptions::default())
        .await
        .expect("print should succeed");

    assert_eq!(job.job_id, "job-7");
    assert_eq!(job.status, "completed");
    assert_eq!(job.status_reason.as_deref(), Some("job_completed"));
    assert_eq!(job.created_at.as_deref(), Some("2026-10-16T10:00:00Z"));
    assert_eq!(job.raw["total_pages"], json!(1));

    assert_eq!(
        fake.paths(),
        vec![
            "POST /api/1/printing/oauth2/auth/token",
            "POST /api/1/printing/printers/printer-42/jobs",
            "POST /upload",
            "POST /api/1/printing/printers/printer-42/jobs/job-7/print",
            "GET /api/1/printing/printers/printer-42/jobs/job-7",
        ]
    );
}

#[tokio::test]
async fn test_token_request_uses_basic_auth_and_password_grant() {
    let fake = spawn_fake(StatusCode::OK, StatusCode::OK).await;
    let cloud = EpsonCloud::new(&config_for(&fake).provider).unwrap();

    let credentials = cloud.authenticate(DEVICE).await.unwrap();
    assert_eq!(credentials.token, "tok-123");
    assert_eq!(credentials.printer_id, "printer-42");
    assert_eq!(credentials.expires_in, Some(3600));

    let token_req = &fake.requests()[0];
    assert_eq!(token_req.query.as_deref(), Some("subject=printer"));
    assert_eq!(
        token_req.header("authorization"),
        Some("Basic Y2xpZW50OnNlY3JldA==")
    );
    assert!(
        token_req
            .header("content-type")
            .unwrap()
            .starts_with("application/x-www-form-urlencoded")
    );
    assert_eq!(
        std::str::from_utf8(&token_req.body).unwrap(),
        "grant_type=password&username=booth%40print.example.com&password="
    );
}

#[tokio::test]
async fn test_job_body_and_upload_request() {
    let fake = spawn_fake(StatusCode::OK, StatusCode::OK).await;
    let service = service_for(&fake);

    let options = PrintOptions {
        copies: Some(2),
        quality: Some("high".to_string()),
        job_name: Some("Gala 2026".to_string()),
        ..Default::default()
    };
    let image = b"jpeg-bytes-0123456789";
    service
        .print_photo(DEVICE, image, "IMG_0042.jpeg", &options)
        .await
        .unwrap();

    let requests = fake.requests();

    let create = &requests[1];
    assert_eq!(create.header("authorization"), Some("Bearer tok-123"));
    assert_eq!(
        create.json(),
        json!({
            "job_name": "Gala 2026",
            "print_mode": "document",
            "print_setting": {
                "media_size": "ms_a4",
                "media_type": "mt_plainpaper",
                "borderless": false,
                "print_quality": "high",
                "source": "auto",
                "color_mode": "color",
                "copies": 2,
                "collate": true
            }
        })
    );

    let upload = &requests[2];
    assert_eq!(upload.query.as_deref(), Some("Key=abc&File=1.jpeg"));
    assert_eq!(
        upload.header("content-type"),
        Some("application/octet-stream")
    );
    assert_eq!(
        upload.header("content-length"),
        Some(image.len().to_string().as_str())
    );
    assert_eq!(&upload.body[..], &image[..]);

    let print = &requests[3];
    assert_eq!(print.header("authorization"), Some("Bearer tok-123"));
    assert_eq!(print.json(), json!({}));
}

#[tokio::test]
async fn test_rejected_job_creation_skips_upload_and_print() {
    let fake = spawn_fake(StatusCode::BAD_REQUEST, StatusCode::OK).await;
    let service = service_for(&fake);

    let err = service
        .print_photo(DEVICE, b"jpeg", "a.jpg", &PrintOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::JobCreation));
    assert_eq!(err.status(), Some(400));
    assert!(err.to_string().contains("bad_setting"));
    assert_eq!(fake.requests().len(), 2);
}

#[tokio::test]
async fn test_upload_requires_exactly_200() {
    let fake = spawn_fake(StatusCode::OK, StatusCode::CREATED).await;
    let service = service_for(&fake);

    let err = service
        .print_photo(DEVICE, b"jpeg", "a.jpg", &PrintOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Upload));
    assert_eq!(err.status(), Some(201));
    assert!(
        !fake
            .paths()
            .iter()
            .any(|p| p.ends_with("/print"))
    );
}

#[tokio::test]
async fn test_status_and_cancel_use_configured_device() {
    let fake = spawn_fake(StatusCode::OK, StatusCode::OK).await;
    let service = service_for(&fake);

    let job = service.check_print_job_status("job-7").await.unwrap();
    assert_eq!(job.status, "completed");

    assert!(service.cancel_print_job("job-7").await.unwrap());
    assert!(!service.cancel_print_job("job-unknown").await.unwrap());

    let paths = fake.paths();
    assert_eq!(
        paths,
        vec![
            "POST /api/1/printing/oauth2/auth/token",
            "GET /api/1/printing/printers/printer-42/jobs/job-7",
            "POST /api/1/printing/oauth2/auth/token",
            "DELETE /api/1/printing/printers/printer-42/jobs/job-7",
            "POST /api/1/printing/oauth2/auth/token",
            "DELETE /api/1/printing/printers/printer-42/jobs/job-unknown",
        ]
    );
    let token_req = &fake.requests()[0];
    assert!(
        std::str::from_utf8(&token_req.body)
            .unwrap()
            .contains("username=booth%40print.example.com")
    );
}

#[tokio::test]
async fn test_unreachable_provider_is_a_transport_error() {
    // Bind and drop a listener to get a port nothing is serving on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = AppConfig::default();
    config.provider.host = format!("http://{}", addr);
    let cloud = EpsonCloud::new(&config.provider).unwrap();

    let err = cloud.authenticate(DEVICE).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Authentication));
    assert!(matches!(
        err,
        fancam_print::core::PrintError::Transport { .. }
    ));
}

#[tokio::test]
async fn test_slow_print_trigger_is_not_sent_twice() {
    let fake = spawn_fake_with(StatusCode::OK, StatusCode::OK, Duration::from_millis(1500)).await;
    let mut config = config_for(&fake);
    config.provider.request_timeout_secs = 1;
    config.retry.max_retries = 2;
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    let cloud = EpsonCloud::new(&config.provider).unwrap();
    let service = PrintService::new(Arc::new(cloud) as Arc<dyn PrinterCloud>, &config);

    let err = service
        .print_photo(DEVICE, b"jpeg", "a.jpg", &PrintOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::PrintTrigger));
    assert!(matches!(
        err,
        fancam_print::core::PrintError::Transport { .. }
    ));
    let triggers = fake
        .paths()
        .iter()
        .filter(|p| p.ends_with("/print"))
        .count();
    assert_eq!(triggers, 1);
}

#[tokio::test]
async fn test_job_id_is_sent_as_a_single_path_segment() {
    let fake = spawn_fake(StatusCode::OK, StatusCode::OK).await;
    let service = service_for(&fake);

    let err = service
        .check_print_job_status("job-7?evil=1")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));

    let status_req = &fake.requests()[1];
    assert_eq!(
        status_req.path,
        "/api/1/printing/printers/printer-42/jobs/job-7%3Fevil=1"
    );
    assert_eq!(status_req.query, None);

    assert!(!service.cancel_print_job("job-7/print").await.unwrap());
    assert_eq!(
        fake.requests()[3].path,
        "/api/1/printing/printers/printer-42/jobs/job-7%2Fprint"
    );

    let err = service.cancel_print_job("..").await.unwrap_err();
    assert!(matches!(
        err,
        fancam_print::core::PrintError::InvalidId(_)
    ));
    assert!(
        !fake
            .paths()
            .iter()
            .any(|p| p.starts_with("DELETE") && !p.contains("%2F"))
    );
}
