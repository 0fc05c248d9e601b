//! Status reporting toward the control-plane API.
//!
//! This crate provides:
//! - `StatusReporter` trait, the sink for `(job id, status text)` pairs
//! - `ApiStatusReporter`, which PUTs `backup_status` to `/api/v1/devices/{id}`

pub mod api;
pub mod traits;

pub use api::ApiStatusReporter;
pub use traits::{NotifyError, StatusReporter};
