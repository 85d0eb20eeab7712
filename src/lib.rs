//! Runlink: cooperative run loop and WiFi co-processor link.
//!
//! Exposes the run loop, the module link engine and the network clients
//! built on them.  Hardware is reached only through the port traits in
//! [`ports`] and the [`link::ByteChannel`] trait; [`adapters`] holds the
//! host and `embedded-hal` implementations.

#![deny(unused_must_use)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod link;
pub mod net;
pub mod ports;
pub mod power;
pub mod runloop;

pub use config::CoreConfig;
pub use error::{Error, RequestError, Result};
pub use runloop::{RunLoop, Scheduler, Task, TaskId, TaskStatus};
