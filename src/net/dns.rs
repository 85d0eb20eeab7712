//! DNS resolver, the reference consumer of the link and the request
//! state machine.
//!
//! The module resolves names itself.  The host sends command 0x44 with
//! the bare hostname as payload and gets back:
//!
//! ```text
//! ┌───────┬─────────────┬─────────────┬─────
//! │ count │ IPv4 addr 0 │ IPv4 addr 1 │ ...
//! │ u8    │ 4 bytes     │ 4 bytes     │
//! └───────┴─────────────┴─────────────┴─────
//! ```

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use log::{info, warn};

use crate::error::{Error, RequestError};
use crate::link::{ByteChannel, Completion, Frame, FrameId, WifiModule};
use crate::net::request::{NetworkRequest, RequestState};
use crate::runloop::Scheduler;

pub const CMD_DNS_RESOLVE: u16 = 0x44;

/// Addresses kept from one answer.
pub const MAX_ADDRESSES: usize = 4;

const MAX_HOSTNAME: usize = 253;
const MAX_LABEL: usize = 63;

pub type Addresses = heapless::Vec<Ipv4Addr, MAX_ADDRESSES>;

/// Extract the host part of `input`, which may be a bare hostname or a
/// URL such as `http://example.com:8080/path`.
pub fn host_from_url(input: &str) -> Result<&str, RequestError> {
    let rest = input.split_once("://").map_or(input, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = host.split(':').next().unwrap_or("");
    validate_hostname(host)?;
    Ok(host)
}

fn validate_hostname(host: &str) -> Result<(), RequestError> {
    if host.is_empty() || host.len() > MAX_HOSTNAME {
        return Err(RequestError::UrlParseError);
    }
    let label_ok = |label: &str| {
        !label.is_empty()
            && label.len() <= MAX_LABEL
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    };
    if host.split('.').all(label_ok) {
        Ok(())
    } else {
        Err(RequestError::UrlParseError)
    }
}

/// Build the resolve command for `input`.
pub fn encode_query(input: &str) -> Result<Frame, RequestError> {
    let host = host_from_url(input)?;
    Frame::management(CMD_DNS_RESOLVE)
        .with_payload(host.as_bytes())
        .map_err(|_| RequestError::UrlParseError)
}

/// Parse a resolve answer.  An answer with no addresses is a failure.
pub fn parse_response(payload: &[u8]) -> Result<Addresses, RequestError> {
    let (&count, rest) = payload.split_first().ok_or(RequestError::DnsFailure)?;
    let count = usize::from(count);
    if count == 0 || rest.len() < count * 4 {
        return Err(RequestError::DnsFailure);
    }
    let mut out = Addresses::new();
    for raw in rest.chunks_exact(4).take(count.min(MAX_ADDRESSES)) {
        let _ = out.push(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]));
    }
    Ok(out)
}

/// Map a finished frame to the request outcome.
fn outcome(completion: &Completion) -> Result<Addresses, RequestError> {
    match completion.result() {
        Ok(()) => parse_response(completion.response()),
        Err(Error::Status(status)) => {
            warn!("Dns: module answered status {}", status);
            Err(RequestError::DnsFailure)
        }
        Err(e) => {
            warn!("Dns: lookup failed: {}", e);
            Err(RequestError::CommunicationError)
        }
    }
}

/// An in-progress lookup.  Once dropped, the frame hook does nothing.
pub struct DnsLookup {
    pub request: NetworkRequest,
    addresses: Rc<RefCell<Addresses>>,
    frame: Option<FrameId>,
}

impl DnsLookup {
    pub fn addresses(&self) -> Addresses {
        self.addresses.borrow().clone()
    }

    pub fn first_address(&self) -> Option<Ipv4Addr> {
        self.addresses.borrow().first().copied()
    }

    /// Link handle of the resolve command, if it was committed.
    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }
}

/// Start resolving `input`.  Every transition, including the start and
/// failures found before anything is sent, reaches the caller's hooks:
/// the start and early failures use queued delivery, so hooks attached
/// to the returned request right away see them.
pub fn resolve<C: ByteChannel>(
    module: &mut WifiModule<C>,
    sched: &mut Scheduler,
    input: &str,
) -> DnsLookup {
    let mut lookup = DnsLookup {
        request: NetworkRequest::new(),
        addresses: Rc::new(RefCell::new(Addresses::new())),
        frame: None,
    };

    if !module.is_network_ready() {
        lookup.request.fail_queued(sched, RequestError::NetworkNotReady);
        return lookup;
    }
    let frame = match encode_query(input) {
        Ok(frame) => frame,
        Err(code) => {
            lookup.request.fail_queued(sched, code);
            return lookup;
        }
    };

    let weak = lookup.request.downgrade();
    let addresses = Rc::downgrade(&lookup.addresses);
    let frame = frame.on_complete(move |completion| {
        let Some(request) = weak.upgrade() else {
            return;
        };
        if request.state() == RequestState::Setup {
            // Answered before the queued start ran; its timer then finds
            // the request terminal and does nothing.
            let _ = request.start();
        }
        match outcome(&completion) {
            Ok(found) => {
                info!("Dns: resolved to {:?}", found.first());
                if let Some(slot) = addresses.upgrade() {
                    *slot.borrow_mut() = found;
                }
                let _ = request.complete();
            }
            Err(code) => {
                let _ = request.fail(code);
            }
        }
    });

    match module.commit_async(frame) {
        Ok(id) => {
            lookup.frame = Some(id);
            lookup.request.start_queued(sched);
        }
        Err(e) => {
            warn!("Dns: commit rejected: {}", e);
            lookup.request.fail_queued(sched, RequestError::CommunicationError);
        }
    }
    lookup
}
