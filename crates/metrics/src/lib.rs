//! Metrics for cardvault.
//!
//! Components record through the `metrics` crate facade. When the
//! `prometheus` feature is enabled, [`init_metrics`] installs a Prometheus
//! recorder whose output is served on `/metrics`; otherwise every macro is a
//! no-op.
//!
//! ```rust,ignore
//! use cardvault_metrics::{counter, labels, vault};
//!
//! counter!(vault::DECRYPT_TOTAL, labels::RESULT => "ok").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
