//! Worker runtime (C5-C6): heartbeats, reconnects on broker loss, and
//! dispatches requests to an embedder-supplied handler.

pub mod handler;
pub mod runtime;

pub use handler::{FnHandler, HandlerError, RequestHandler};
pub use runtime::{spawn, StopHandle, WorkerReactor, WorkerRuntimeConfig};
