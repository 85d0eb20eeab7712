//! Network clients built on the module link.
//!
//! Each client drives a [`request::NetworkRequest`] from its frame
//! completions; only DNS is implemented here.

pub mod dns;
pub mod request;

pub use request::{Delivery, NetworkRequest, RequestState, WeakRequest};
