//! Generic network-request state machine.
//!
//! ```text
//!   Setup ──start──▶ InProgress ──complete──▶ Completed
//!     │                  │
//!     └────── fail ──────┴──────────────────▶ Error(code)
//! ```
//!
//! Every transition fires the state-change hook.  The terminal ones also
//! fire `on_complete` or `on_error`, each at most once.
//!
//! Delivery is either direct (hooks run inside the call) or queued (a
//! zero-delay one-shot timer runs the transition on the next iteration).
//! The queued timer holds only a weak reference, so dropping the request
//! disarms its pending notification.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use log::{debug, trace};

use crate::error::{RequestError, Result, StateError};
use crate::runloop::{Scheduler, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Setup,
    InProgress,
    Completed,
    Error,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// How a transition's hooks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Direct,
    Queued,
}

type StateHook = Box<dyn FnMut(RequestState)>;
type CompleteHook = Box<dyn FnOnce()>;
type ErrorHook = Box<dyn FnOnce(RequestError)>;

#[derive(Default)]
struct Inner {
    state: Option<RequestState>,
    error: Option<RequestError>,
    on_state_change: Option<StateHook>,
    on_complete: Option<CompleteHook>,
    on_error: Option<ErrorHook>,
    deferred: Option<TimerId>,
    /// Set while hooks run; transitions made meanwhile queue up in
    /// `nested` and are delivered by the outer call, in order.
    delivering: bool,
    nested: VecDeque<Notification>,
}

enum Terminal {
    Completed(CompleteHook),
    Failed(ErrorHook, RequestError),
}

/// Hooks detached from the request so they run with no borrow held.
struct Notification {
    state: RequestState,
    terminal: Option<Terminal>,
}

/// Shared handle to one request.  Clones refer to the same request.
#[derive(Clone, Default)]
pub struct NetworkRequest {
    inner: Rc<RefCell<Inner>>,
}

impl NetworkRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RequestState {
        self.inner.borrow().state.unwrap_or(RequestState::Setup)
    }

    pub fn error(&self) -> Option<RequestError> {
        self.inner.borrow().error
    }

    pub fn on_state_change<F: FnMut(RequestState) + 'static>(&self, f: F) {
        self.inner.borrow_mut().on_state_change = Some(Box::new(f));
    }

    pub fn on_complete<F: FnOnce() + 'static>(&self, f: F) {
        self.inner.borrow_mut().on_complete = Some(Box::new(f));
    }

    pub fn on_error<F: FnOnce(RequestError) + 'static>(&self, f: F) {
        self.inner.borrow_mut().on_error = Some(Box::new(f));
    }

    /// Whether a queued notification is still waiting to run.
    pub fn has_deferred(&self) -> bool {
        self.inner.borrow().deferred.is_some()
    }

    /// Setup → InProgress.
    pub fn start(&self) -> Result<()> {
        self.transition(RequestState::InProgress, None)
    }

    /// InProgress → Completed, hooks run now.
    pub fn complete(&self) -> Result<()> {
        self.transition(RequestState::Completed, None)
    }

    /// Setup/InProgress → Error, hooks run now.
    pub fn fail(&self, code: RequestError) -> Result<()> {
        self.transition(RequestState::Error, Some(code))
    }

    /// Start on the next iteration, so hooks attached after this call
    /// still see the InProgress notification.
    pub fn start_queued(&self, sched: &mut Scheduler) {
        self.defer(sched, move |req| req.start());
    }

    /// Complete on the next iteration.
    pub fn complete_queued(&self, sched: &mut Scheduler) {
        self.defer(sched, move |req| req.complete());
    }

    /// Fail on the next iteration.  Used when the failure is found while
    /// the caller is still setting the request up.
    pub fn fail_queued(&self, sched: &mut Scheduler, code: RequestError) {
        self.defer(sched, move |req| req.fail(code));
    }

    /// Complete or fail with the given delivery.
    pub fn finish(
        &self,
        sched: &mut Scheduler,
        outcome: core::result::Result<(), RequestError>,
        delivery: Delivery,
    ) {
        match (outcome, delivery) {
            (Ok(()), Delivery::Direct) => {
                let _ = self.complete();
            }
            (Ok(()), Delivery::Queued) => self.complete_queued(sched),
            (Err(code), Delivery::Direct) => {
                let _ = self.fail(code);
            }
            (Err(code), Delivery::Queued) => self.fail_queued(sched, code),
        }
    }

    /// Drop a pending queued notification.
    pub fn cancel_deferred(&self, sched: &mut Scheduler) {
        if let Some(id) = self.inner.borrow_mut().deferred.take() {
            sched.release_timer(id);
        }
    }

    /// A handle that does not keep the request alive.
    pub fn downgrade(&self) -> WeakRequest {
        WeakRequest(Rc::downgrade(&self.inner))
    }

    fn defer<F>(&self, sched: &mut Scheduler, f: F)
    where
        F: FnOnce(&NetworkRequest) -> Result<()> + 'static,
    {
        self.cancel_deferred(sched);
        let weak = self.downgrade();
        let id = sched.call_once(0, move |_| {
            let Some(req) = weak.upgrade() else {
                trace!("Net: request dropped before its queued notification");
                return;
            };
            req.inner.borrow_mut().deferred = None;
            if let Err(e) = f(&req) {
                debug!("Net: queued transition rejected: {}", e);
            }
        });
        self.inner.borrow_mut().deferred = Some(id);
    }

    fn transition(&self, to: RequestState, code: Option<RequestError>) -> Result<()> {
        let note = {
            let mut inner = self.inner.borrow_mut();
            let from = inner.state.unwrap_or(RequestState::Setup);
            let allowed = match to {
                RequestState::InProgress => from == RequestState::Setup,
                RequestState::Completed => from == RequestState::InProgress,
                RequestState::Error => !from.is_terminal(),
                RequestState::Setup => false,
            };
            if !allowed {
                debug!("Net: rejected transition {:?} -> {:?}", from, to);
                return Err(StateError::InvalidTransition.into());
            }
            inner.state = Some(to);
            let terminal = match (to, code) {
                (RequestState::Completed, _) => inner.on_complete.take().map(Terminal::Completed),
                (RequestState::Error, Some(code)) => {
                    inner.error = Some(code);
                    inner.on_error.take().map(|hook| Terminal::Failed(hook, code))
                }
                _ => None,
            };
            let note = Notification {
                state: to,
                terminal,
            };
            if inner.delivering {
                trace!("Net: {:?} raised from a hook, queued behind it", to);
                inner.nested.push_back(note);
                return Ok(());
            }
            inner.delivering = true;
            note
        };
        self.deliver(note);
        Ok(())
    }

    fn deliver(&self, first: Notification) {
        let mut on_state_change = self.inner.borrow_mut().on_state_change.take();
        let mut next = Some(first);
        while let Some(Notification { state, terminal }) = next {
            if let Some(hook) = on_state_change.as_mut() {
                hook(state);
            }
            match terminal {
                Some(Terminal::Completed(hook)) => hook(),
                Some(Terminal::Failed(hook, code)) => hook(code),
                None => {}
            }
            let mut inner = self.inner.borrow_mut();
            // A hook installed during delivery wins.
            if let Some(installed) = inner.on_state_change.take() {
                on_state_change = Some(installed);
            }
            next = inner.nested.pop_front();
        }
        let mut inner = self.inner.borrow_mut();
        inner.on_state_change = on_state_change;
        inner.delivering = false;
    }
}

/// Non-owning request handle, held by pending notifications and frame
/// hooks so that dropping the request neutralizes them.
#[derive(Clone)]
pub struct WeakRequest(Weak<RefCell<Inner>>);

impl WeakRequest {
    pub fn upgrade(&self) -> Option<NetworkRequest> {
        self.0.upgrade().map(|inner| NetworkRequest { inner })
    }
}
