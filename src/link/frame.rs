//! Frames exchanged with the module.
//!
//! A [`Frame`] is owned by exactly one place at a time: the client that
//! built it, the outbound queue, the in-flight slot, and finally the
//! [`Completion`] handed to its completion hook.  There is no
//! self-releasing frame; dropping the completion releases it.

use core::fmt;

use crate::config::LINK_MAX_PAYLOAD;
use crate::error::{Error, ResourceError, Result};

pub use super::codec::FrameKind;
use super::codec::FrameHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to module.
    Tx,
    /// Module to host.
    Rx,
}

/// What a response handler reports after consuming one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// More response frames follow for this command.
    More,
    /// The response is complete.
    Last,
}

/// Consumes one response chunk; receives the frame's response buffer.
pub type ResponseHook = Box<dyn FnMut(&[u8], &mut Vec<u8>) -> Chunk>;
/// Consumes one data frame correlated to the command.
pub type DataHook = Box<dyn FnMut(&[u8])>;
/// Fired exactly once when a committed frame finishes.
pub type CompletionHook = Box<dyn FnOnce(Completion)>;

pub struct Frame {
    kind: FrameKind,
    direction: Direction,
    command_id: u16,
    status: u16,
    payload: heapless::Vec<u8, LINK_MAX_PAYLOAD>,
    response: Vec<u8>,
    last_response_parsed: bool,
    on_response: Option<ResponseHook>,
    on_data: Option<DataHook>,
    on_complete: Option<CompletionHook>,
}

impl Frame {
    fn new(kind: FrameKind, direction: Direction, command_id: u16) -> Self {
        Self {
            kind,
            direction,
            command_id,
            status: 0,
            payload: heapless::Vec::new(),
            response: Vec::new(),
            last_response_parsed: false,
            on_response: None,
            on_data: None,
            on_complete: None,
        }
    }

    /// Outbound management (command) frame.
    pub fn management(command_id: u16) -> Self {
        Self::new(FrameKind::Management, Direction::Tx, command_id)
    }

    /// Outbound data frame.
    pub fn data(command_id: u16) -> Self {
        Self::new(FrameKind::Data, Direction::Tx, command_id)
    }

    /// Frame read from the module.
    pub(crate) fn inbound(header: &FrameHeader, payload: &[u8]) -> Result<Self> {
        let mut frame = Self::new(header.kind, Direction::Rx, header.command_id);
        frame.status = header.status;
        frame.set_payload(payload)?;
        Ok(frame)
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Result<Self> {
        self.set_payload(payload)?;
        Ok(self)
    }

    pub fn set_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.payload.clear();
        self.payload
            .extend_from_slice(payload)
            .map_err(|()| Error::from(ResourceError::PayloadTooLarge(payload.len())))
    }

    /// Attach the completion hook, replacing any previous one.
    pub fn set_completion_callback<F>(&mut self, f: F)
    where
        F: FnOnce(Completion) + 'static,
    {
        self.on_complete = Some(Box::new(f));
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Completion) + 'static,
    {
        self.set_completion_callback(f);
        self
    }

    /// Override the response handler.  The default appends each chunk to
    /// the response buffer and treats it as the last one.
    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8], &mut Vec<u8>) -> Chunk + 'static,
    {
        self.on_response = Some(Box::new(f));
        self
    }

    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.on_data = Some(Box::new(f));
        self
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn command_id(&self) -> u16 {
        self.command_id
    }

    /// Status from the module's response (or the inbound header).
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Accumulated response bytes.
    pub fn response(&self) -> &[u8] {
        &self.response
    }

    pub fn last_response_parsed(&self) -> bool {
        self.last_response_parsed
    }

    pub fn has_completion_callback(&self) -> bool {
        self.on_complete.is_some()
    }

    pub(crate) fn header(&self) -> FrameHeader {
        FrameHeader {
            kind: self.kind,
            length: self.payload.len() as u16,
            command_id: self.command_id,
            status: self.status,
        }
    }

    pub(crate) fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub(crate) fn handle_response(&mut self, chunk: &[u8]) -> Chunk {
        let verdict = match self.on_response.as_mut() {
            Some(hook) => hook(chunk, &mut self.response),
            None => {
                self.response.extend_from_slice(chunk);
                Chunk::Last
            }
        };
        if verdict == Chunk::Last {
            self.last_response_parsed = true;
        }
        verdict
    }

    pub(crate) fn handle_data(&mut self, data: &[u8]) {
        if let Some(hook) = self.on_data.as_mut() {
            hook(data);
        }
    }

    /// Drop every hook so nothing observes this frame again.
    pub(crate) fn neutralize(&mut self) {
        self.on_complete = None;
        self.on_response = None;
        self.on_data = None;
    }

    /// Detach the completion hook and package the outcome.
    pub(crate) fn finish(mut self, result: Result<()>) -> Finished {
        Finished {
            hook: self.on_complete.take(),
            completion: Completion {
                result,
                frame: self,
            },
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("command_id", &format_args!("0x{:04x}", self.command_id))
            .field("status", &self.status)
            .field("payload_len", &self.payload.len())
            .field("response_len", &self.response.len())
            .field("has_completion", &self.on_complete.is_some())
            .finish()
    }
}

/// Outcome of a committed frame, handed to its completion hook together
/// with ownership of the frame.
#[derive(Debug)]
pub struct Completion {
    result: Result<()>,
    frame: Frame,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn result(&self) -> Result<()> {
        self.result
    }

    pub fn error(&self) -> Option<Error> {
        self.result.err()
    }

    pub fn status(&self) -> u16 {
        self.frame.status
    }

    pub fn response(&self) -> &[u8] {
        &self.frame.response
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

/// A completion whose hook has not fired yet.
///
/// The engine returns these instead of firing in place so the caller can
/// release its borrow of the module first.
pub struct Finished {
    hook: Option<CompletionHook>,
    completion: Completion,
}

impl Finished {
    pub fn result(&self) -> Result<()> {
        self.completion.result
    }

    pub fn command_id(&self) -> u16 {
        self.completion.frame.command_id
    }

    /// Fire the hook (if any) and return the outcome.
    pub fn fire(self) -> Result<()> {
        let result = self.completion.result;
        if let Some(hook) = self.hook {
            hook(self.completion);
        }
        result
    }
}

impl fmt::Debug for Finished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finished")
            .field("has_hook", &self.hook.is_some())
            .field("completion", &self.completion)
            .finish()
    }
}
