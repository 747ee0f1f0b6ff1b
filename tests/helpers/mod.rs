//! Shared helpers for router-level and end-to-end tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tower::ServiceExt;

use asset_ingest::app_state::AppState;
use asset_ingest::routes::build_router;
use asset_ingest::services::converters::{Converter, ConverterSet};
use asset_ingest::services::dispatcher::Dispatcher;
use asset_ingest::services::executor::ConversionError;
use asset_ingest::services::extraction::ExtractionLimits;
use asset_ingest::services::formats::FormatRegistry;
use asset_ingest::services::job_store::{InMemoryJobStore, JobStore};
use asset_ingest::services::storage::UploadStorage;

const BOUNDARY: &str = "asset-ingest-test-boundary";

/// Converter stand-in that writes a fixed output file or fails.
pub struct FakeConverter {
    output: Option<&'static str>,
}

impl FakeConverter {
    pub fn writes(output: &'static str) -> Option<Arc<dyn Converter>> {
        Some(Arc::new(FakeConverter { output: Some(output) }))
    }

    pub fn fails() -> Option<Arc<dyn Converter>> {
        Some(Arc::new(FakeConverter { output: None }))
    }
}

#[async_trait]
impl Converter for FakeConverter {
    fn name(&self) -> &str {
        "fake"
    }

    async fn convert(&self, _input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
        tokio::fs::create_dir_all(work_dir).await?;
        match self.output {
            Some(name) => {
                let out = work_dir.join(name);
                tokio::fs::write(&out, br#"{"asset":{"version":"1.0"}}"#).await?;
                Ok(out)
            }
            None => Err(ConversionError::ProcessFailed {
                tool: "fake".to_string(),
                code: 2,
                stderr: "unsupported point format".to_string(),
            }),
        }
    }
}

/// Router over a temporary uploads root.
pub struct TestApp {
    pub dir: TempDir,
    pub uploads: PathBuf,
    pub router: Router,
}

pub async fn test_app(converters: ConverterSet, max_upload_bytes: u64) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let uploads = dir.path().join("uploads");
    let storage = UploadStorage::new(&uploads);
    storage.ensure_root().await.expect("uploads root");

    let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(Duration::from_secs(3600)));
    let dispatcher = Dispatcher::new(storage, converters, ExtractionLimits::default());
    let state = AppState::new(jobs, FormatRegistry::new(), dispatcher, max_upload_bytes, Vec::new());

    TestApp {
        dir,
        uploads,
        router: build_router(state),
    }
}

/// Multipart body with a single file part. Returns (content type, body).
pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    (format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("router call")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
    }

    /// POST a file to the upload endpoint. `declare_length` controls the Content-Length header.
    pub async fn upload(&self, filename: &str, bytes: &[u8], declare_length: bool) -> (StatusCode, Value) {
        let (content_type, body) = multipart_body("file", filename, bytes);
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/upload-model")
            .header(header::CONTENT_TYPE, content_type);
        if declare_length {
            builder = builder.header(header::CONTENT_LENGTH, body.len());
        }

        let response = self.send(builder.body(Body::from(body)).expect("request")).await;
        let status = response.status();
        (status, body_json(response).await)
    }

    /// Poll the job endpoint until the job is done or failed.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        for _ in 0..500 {
            let response = self.get(&format!("/api/jobs/{}", job_id)).await;
            assert_eq!(response.status(), StatusCode::OK);
            let job = body_json(response).await;
            match job["status"].as_str() {
                Some("done") | Some("error") => return job,
                _ => sleep(Duration::from_millis(10)).await,
            }
        }
        panic!("job {} did not finish", job_id);
    }

    /// Upload and wait, asserting the upload was accepted.
    pub async fn ingest(&self, filename: &str, bytes: &[u8]) -> Value {
        let (status, accepted) = self.upload(filename, bytes, true).await;
        assert_eq!(status, StatusCode::ACCEPTED, "upload rejected: {}", accepted);
        let job_id = accepted["job_id"].as_str().expect("job_id").to_string();
        self.wait_for_job(&job_id).await
    }

    /// Names directly under the uploads root, excluding converter scratch space.
    pub fn upload_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.uploads)
            .expect("read uploads")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|n| n != ".work")
            .collect();
        names.sort();
        names
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body")
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Upload through a running server (end-to-end tests).
pub async fn upload_over_http(
    client: &reqwest::Client,
    base_url: &str,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<(u16, Value), Box<dyn std::error::Error>> {
    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
    );

    let response = client
        .post(format!("{}/api/upload-model", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status().as_u16();
    let body = response.json::<Value>().await?;
    Ok((status, body))
}

/// Poll a running server until the job is terminal (with timeout).
pub async fn poll_job_over_http(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout_secs: u64,
) -> Result<Value, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2;

    for _ in 0..max_attempts {
        let job = client
            .get(format!("{}/api/jobs/{}", base_url, job_id))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        match job["status"].as_str() {
            Some("done") | Some("error") => return Ok(job),
            _ => sleep(Duration::from_millis(500)).await,
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
