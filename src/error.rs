//! Unified error types for the run loop and module link.
//!
//! Lower layers return these as plain values; the committing frame folds
//! them into its [`Completion`](crate::link::frame::Completion) so that every
//! committed frame reports exactly one outcome.  All variants are `Copy` so
//! they can be stored in a completion without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The byte channel or the peer's control-step status failed.
    Transport(TransportError),
    /// The peer answered with something that does not match the request.
    Protocol(ProtocolError),
    /// A buffer, payload or queue limit was exceeded.
    Resource(ResourceError),
    /// The operation is not valid in the current state.
    State(StateError),
    /// The peer answered the command with a non-zero status.
    Status(u16),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Resource(e) => write!(f, "resource: {e}"),
            Self::State(e) => write!(f, "state: {e}"),
            Self::Status(s) => write!(f, "module status 0x{s:04x}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The underlying bus reported an error.
    Bus,
    /// A control step was answered with an unexpected status byte.
    BadStatus(u8),
    /// The peer kept answering BUSY past the retry ceiling.
    BusyRetriesExhausted,
    /// The peer never produced START_TOKEN within the retry budget.
    StartTokenTimeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => write!(f, "bus error"),
            Self::BadStatus(s) => write!(f, "bad control status 0x{s:02x}"),
            Self::BusyRetriesExhausted => write!(f, "peer busy, retries exhausted"),
            Self::StartTokenTimeout => write!(f, "START_TOKEN timeout"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// A response correlated against the wrong command.
    CommandMismatch { expected: u16, got: u16 },
    /// The LengthType nibble was neither management nor data.
    BadFrameType(u8),
    /// The frame descriptor declared an impossible length.
    BadDescriptor,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandMismatch { expected, got } => {
                write!(f, "response 0x{got:04x} does not match request 0x{expected:04x}")
            }
            Self::BadFrameType(t) => write!(f, "bad frame type nibble 0x{t:x}"),
            Self::BadDescriptor => write!(f, "bad frame descriptor"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Resource errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    BufferTooSmall { needed: usize, available: usize },
    /// Payload larger than the link maximum.
    PayloadTooLarge(usize),
    /// Outbound queue is at capacity.
    QueueFull,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small ({needed} > {available})")
            }
            Self::PayloadTooLarge(n) => write!(f, "payload of {n} bytes exceeds link maximum"),
            Self::QueueFull => write!(f, "outbound queue full"),
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

// ---------------------------------------------------------------------------
// State errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// Only TX frames can be committed.
    WrongDirection,
    /// A response arrived with nothing in flight.
    NothingInFlight,
    /// A synchronous commit was attempted while the link had work queued.
    LinkBusy,
    /// A request state transition was attempted from a terminal state.
    InvalidTransition,
    /// The in-flight frame was not answered within the timeout budget.
    ResponseTimeout,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongDirection => write!(f, "frame is not outbound"),
            Self::NothingInFlight => write!(f, "nothing in flight"),
            Self::LinkBusy => write!(f, "link busy"),
            Self::InvalidTransition => write!(f, "invalid state transition"),
            Self::ResponseTimeout => write!(f, "response timeout"),
        }
    }
}

impl From<StateError> for Error {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

// ---------------------------------------------------------------------------
// Request-level error codes
// ---------------------------------------------------------------------------

/// Application-readable error code carried by a network request's ERROR state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestError {
    NetworkNotReady = 1,
    CommunicationError = 2,
    InvalidState = 3,
    UrlParseError = 4,
    DnsFailure = 5,
}

impl RequestError {
    /// Stable integer code for application code and logs.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkNotReady => write!(f, "network not ready"),
            Self::CommunicationError => write!(f, "communication error"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::UrlParseError => write!(f, "URL parse error"),
            Self::DnsFailure => write!(f, "DNS failure"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
