//! Boundary layer: uniform envelope, parameter parsing, and the axum
//! router consumed by the companion dashboard.

pub mod envelope;
pub mod handlers;
pub mod params;
pub mod rate_limit;

pub use envelope::{ApiError, Envelope, PageMeta, ResponseMeta};
pub use handlers::{telemetry_router, ApiState};
pub use params::EntryQueryParams;
pub use rate_limit::FixedWindowLimiter;
