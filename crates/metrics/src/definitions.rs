//! Metric name and label definitions.
//!
//! Every metric cardvault emits is named here so the exported surface can be
//! read in one place.

/// HTTP request metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "cardvault_http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "cardvault_http_request_duration_seconds";
    /// Number of currently in-flight HTTP requests
    pub const REQUESTS_IN_FLIGHT: &str = "cardvault_http_requests_in_flight";
    /// Requests rejected by the per-IP throttle
    pub const THROTTLED_TOTAL: &str = "cardvault_http_throttled_total";
}

/// Vault and key rotation metrics
pub mod vault {
    /// Fields sealed
    pub const ENCRYPT_TOTAL: &str = "cardvault_vault_encrypt_total";
    /// Fields opened (labelled by result)
    pub const DECRYPT_TOTAL: &str = "cardvault_vault_decrypt_total";
    /// Completed key rotations
    pub const ROTATIONS_TOTAL: &str = "cardvault_vault_key_rotations_total";
    /// Version of the generation new values are sealed under
    pub const KEY_VERSION: &str = "cardvault_vault_key_version";
    /// Records processed by re-encryption sweeps (labelled by outcome)
    pub const SWEEP_RECORDS_TOTAL: &str = "cardvault_vault_sweep_records_total";
    /// Rotation sweep duration in seconds
    pub const SWEEP_DURATION_SECONDS: &str = "cardvault_vault_sweep_duration_seconds";
}

/// Card service metrics
pub mod cards {
    /// Card operations (labelled by operation and status)
    pub const OPERATIONS_TOTAL: &str = "cardvault_card_operations_total";
    /// Cards rejected by validation
    pub const VALIDATION_FAILURES_TOTAL: &str = "cardvault_card_validation_failures_total";
    /// Items processed by batch updates (labelled by status)
    pub const BATCH_ITEMS_TOTAL: &str = "cardvault_card_batch_items_total";
    /// Batch update duration in seconds
    pub const BATCH_DURATION_SECONDS: &str = "cardvault_card_batch_duration_seconds";
    /// Card store operation duration by operation type
    pub const STORE_OPERATION_DURATION_SECONDS: &str =
        "cardvault_card_store_operation_duration_seconds";
}

/// Common label keys used across metrics
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const RESULT: &str = "result";
    pub const OUTCOME: &str = "outcome";
    pub const OPERATION: &str = "operation";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// HTTP request duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub static HTTP_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });

    /// Sweep and batch duration buckets (in seconds)
    /// Covers 10ms to 30 minutes
    pub static SWEEP_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0,
        ]
    });
}
