//! Core request types: the per-request context, the request itself,
//! the error taxonomy and served payloads.

mod context;
mod error;
mod request;
mod response;
mod tracker;

pub use context::RequestContext;
pub use error::{AppError, BoxError, ErrorKind};
pub use request::Request;
pub use response::{Envelope, Payload};
pub use tracker::{generate_log_id, Tracker, TrackerScope};
