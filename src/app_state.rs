use std::sync::Arc;

use crate::services::{dispatcher::Dispatcher, formats::FormatRegistry, job_store::JobStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub formats: Arc<FormatRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub max_upload_bytes: u64,
    /// (name, binary) pairs reported by the health check.
    pub converter_binaries: Arc<Vec<(&'static str, String)>>,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        formats: FormatRegistry,
        dispatcher: Dispatcher,
        max_upload_bytes: u64,
        converter_binaries: Vec<(&'static str, String)>,
    ) -> Self {
        Self {
            jobs,
            formats: Arc::new(formats),
            dispatcher: Arc::new(dispatcher),
            max_upload_bytes,
            converter_binaries: Arc::new(converter_binaries),
        }
    }
}
