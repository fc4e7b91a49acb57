//! Download and lifecycle metrics
//!
//! Recorded through the `metrics` facade. The host installs whichever
//! recorder/exporter it uses; without one these calls are no-ops.

/// Record a download start
pub fn record_download_started(model_id: &str) {
    metrics::counter!("model_manager_downloads_started_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a completed and installed download
pub fn record_download_completed(model_id: &str, bytes: u64) {
    metrics::counter!("model_manager_downloads_completed_total",
        "model" => model_id.to_string()
    )
    .increment(1);
    metrics::counter!("model_manager_downloaded_bytes_total",
        "model" => model_id.to_string()
    )
    .increment(bytes);
}

/// Record a transfer or install failure
pub fn record_download_failed(model_id: &str, stage: &'static str) {
    metrics::counter!("model_manager_downloads_failed_total",
        "model" => model_id.to_string(),
        "stage" => stage
    )
    .increment(1);
}

/// Record a cancelled download
pub fn record_download_cancelled(model_id: &str) {
    metrics::counter!("model_manager_downloads_cancelled_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Update the in-flight download gauge
pub fn update_active_downloads(count: usize) {
    metrics::gauge!("model_manager_active_downloads").set(count as f64);
}

/// Record the outcome of a model load
pub fn record_model_load(model_id: &str, success: bool) {
    metrics::counter!("model_manager_model_loads_total",
        "model" => model_id.to_string(),
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a model unload
pub fn record_model_unload() {
    metrics::counter!("model_manager_model_unloads_total").increment(1);
}

/// Record a model deletion
pub fn record_model_deleted(model_id: &str) {
    metrics::counter!("model_manager_models_deleted_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}
