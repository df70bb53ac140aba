//! Integration tests for litekit
//!
//! Most tests run the real pipeline in-process through `server::dispatch`.
//! `tcp` starts a server on an ephemeral port and talks to it with reqwest.

mod helpers;

mod isolation;
mod panic;
mod rate_limiting;
mod routing;
mod sse;
mod tcp;
mod timeout;
