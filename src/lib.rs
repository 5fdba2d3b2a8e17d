//! Telemetry and session client for the GlassLab game services backend.
//!
//! The [`Client`] is a caller-owned handle: it manages the authenticated
//! session, dispatches asynchronous requests per message category, queues
//! telemetry durably on disk and uploads it in throttled batches from a
//! background worker. Completion handlers run on that worker in strict FIFO
//! order per category.

pub mod client;
pub mod config;
pub mod http;
pub mod request;
pub mod session;
pub mod store;
pub mod telemetry;

pub mod test_utils;

pub use client::Client;
pub use config::ThrottleConfig;
pub use http::{HttpClient, HttpRequest, HttpResponse, UreqHttpClient};
pub use request::{MessageCode, ResponseCallback, ResponseEnvelope, Status};
pub use session::UserInfo;
pub use telemetry::{TelemetryEvent, TelemetryValue};
