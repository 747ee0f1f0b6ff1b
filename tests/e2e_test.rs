//! End-to-end tests against a running server.
//!
//! These tests require the server running with a writable uploads directory.
//! Conversion tests additionally need the converter binaries on PATH.
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:5001)

mod fixtures;
mod helpers;

use fixtures::*;
use helpers::*;

fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:5001".to_string())
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );

    let body: serde_json::Value = response.json().await.expect("health body");
    println!("✓ Health check passed, converters: {}", body["converters"]);
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_e2e_gltf_upload_round_trip() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();
    let fixture = &RAW_FIXTURES[0];

    let (status, accepted) = upload_over_http(&client, &base_url, fixture.filename, fixture.bytes.to_vec())
        .await
        .expect("upload");
    assert_eq!(status, 202, "upload rejected: {}", accepted);

    let job_id = accepted["job_id"].as_str().expect("job_id");
    let job = poll_job_over_http(&client, &base_url, job_id, 30)
        .await
        .expect("job did not finish");
    assert_eq!(job["status"], "done", "{}", job);

    let url = job["result"]["url"].as_str().expect("url");
    let served = client
        .get(format!("{}{}", base_url, url))
        .send()
        .await
        .expect("download");
    assert!(served.status().is_success());
    assert_eq!(served.bytes().await.expect("bytes").as_ref(), fixture.bytes);

    println!("✓ {} served at {}", fixture.filename, url);
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_e2e_slpk_service_root() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let (status, accepted) = upload_over_http(&client, &base_url, "campus.slpk", scene_server_slpk())
        .await
        .expect("upload");
    assert_eq!(status, 202);

    let job_id = accepted["job_id"].as_str().expect("job_id");
    let job = poll_job_over_http(&client, &base_url, job_id, 60)
        .await
        .expect("job did not finish");
    assert_eq!(job["status"], "done", "{}", job);

    let url = job["result"]["url"].as_str().expect("url");
    let root = client
        .get(format!("{}{}", base_url, url))
        .send()
        .await
        .expect("service root");
    assert!(root.status().is_success());
    assert_eq!(root.headers()["x-i3s-resolved-path"], "SceneServer/service.json");

    let miss = client
        .get(format!("{}{}/layers/0/nodes/does-not-exist", base_url, url))
        .send()
        .await
        .expect("miss");
    assert_eq!(miss.status().as_u16(), 404);

    println!("✓ SLPK extracted and navigable at {}", url);
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_e2e_unsupported_format_rejected() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let (status, body) = upload_over_http(&client, &base_url, "setup.exe", b"MZ".to_vec())
        .await
        .expect("upload");
    assert_eq!(status, 400);
    assert_eq!(body["error"], "unsupported_format");

    println!("✓ Unsupported upload rejected");
}

#[tokio::test]
#[ignore] // Requires a running server and py3dtiles or PotreeConverter
async fn test_e2e_point_cloud_never_served_raw() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let (status, accepted) = upload_over_http(&client, &base_url, "broken.las", b"not a las file".to_vec())
        .await
        .expect("upload");
    assert_eq!(status, 202);

    let job_id = accepted["job_id"].as_str().expect("job_id");
    let job = poll_job_over_http(&client, &base_url, job_id, 600)
        .await
        .expect("job did not finish");

    match job["status"].as_str() {
        Some("error") => assert!(job["result"].is_null()),
        Some("done") => assert!(job["result"]["url"].as_str().unwrap().ends_with("tileset.json")),
        other => panic!("unexpected status {:?}", other),
    }
}
