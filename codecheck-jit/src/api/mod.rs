//! HTTP API handlers for codecheck-jit
//!
//! REST for triggers and polling, SSE for live progress.

pub mod health;
pub mod jobs;
pub mod jurisdictions;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use jurisdictions::jurisdiction_routes;
pub use sse::event_stream;
