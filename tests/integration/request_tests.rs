//! DNS lookups end to end: request state machine, link and simulated
//! module.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::Rc;

use runlink::config::LinkConfig;
use runlink::error::RequestError;
use runlink::net::RequestState;
use runlink::net::dns::{self, CMD_DNS_RESOLVE, DnsLookup};

use crate::mock_hw::Rig;

/// Attach counters for every hook of the lookup's request.
struct Observed {
    states: Rc<RefCell<Vec<RequestState>>>,
    completed: Rc<Cell<u32>>,
    errors: Rc<RefCell<Vec<RequestError>>>,
}

fn observe(lookup: &DnsLookup) -> Observed {
    let obs = Observed {
        states: Rc::default(),
        completed: Rc::default(),
        errors: Rc::default(),
    };
    let s = obs.states.clone();
    lookup.request.on_state_change(move |st| s.borrow_mut().push(st));
    let c = obs.completed.clone();
    lookup.request.on_complete(move || c.set(c.get() + 1));
    let e = obs.errors.clone();
    lookup.request.on_error(move |code| e.borrow_mut().push(code));
    obs
}

fn dns_rig(answer: &'static [u8], status: u16) -> Rig {
    let rig = Rig::new();
    rig.sim().set_responder(move |rx, peer| {
        if rx.header.command_id == CMD_DNS_RESOLVE {
            peer.queue_response(CMD_DNS_RESOLVE, status, answer);
        }
    });
    rig.module.borrow_mut().set_network_ready(true);
    rig
}

fn start(rig: &mut Rig, input: &str) -> DnsLookup {
    let mut module = rig.module.borrow_mut();
    dns::resolve(&mut *module, rig.rl.scheduler(), input)
}

#[test]
fn resolves_a_hostname() {
    let mut rig = dns_rig(&[1, 10, 0, 0, 5], 0);
    let lookup = start(&mut rig, "example.com");
    assert_eq!(lookup.request.state(), RequestState::Setup);
    let obs = observe(&lookup);

    rig.step(1);
    assert_eq!(*obs.states.borrow(), vec![RequestState::InProgress]);
    rig.step(1);

    assert_eq!(obs.completed.get(), 1);
    assert!(obs.errors.borrow().is_empty());
    assert_eq!(
        *obs.states.borrow(),
        vec![RequestState::InProgress, RequestState::Completed]
    );
    assert_eq!(lookup.first_address(), Some(Ipv4Addr::new(10, 0, 0, 5)));

    let sent = rig.module.borrow().channel().received().to_vec();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header.command_id, 0x44);
    assert_eq!(sent[0].payload, b"example.com");

    rig.step(5);
    assert_eq!(obs.completed.get(), 1, "completion fires once");
}

#[test]
fn url_input_sends_only_the_host() {
    let mut rig = dns_rig(&[2, 1, 1, 1, 1, 8, 8, 8, 8], 0);
    let lookup = start(&mut rig, "https://dns.example.org:443/query");
    rig.step(2);

    assert_eq!(lookup.request.state(), RequestState::Completed);
    assert_eq!(
        lookup.addresses().as_slice(),
        &[Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)]
    );
    let sent = rig.module.borrow().channel().received().to_vec();
    assert_eq!(sent[0].payload, b"dns.example.org");
}

#[test]
fn not_ready_fails_on_next_iteration() {
    let mut rig = dns_rig(&[1, 10, 0, 0, 5], 0);
    rig.module.borrow_mut().set_network_ready(false);
    let lookup = start(&mut rig, "example.com");
    let obs = observe(&lookup);
    assert_eq!(lookup.request.state(), RequestState::Setup);
    assert!(obs.errors.borrow().is_empty());

    rig.step(1);

    assert_eq!(*obs.errors.borrow(), vec![RequestError::NetworkNotReady]);
    assert_eq!(lookup.request.error(), Some(RequestError::NetworkNotReady));
    assert!(rig.sent_commands().is_empty());
}

#[test]
fn malformed_input_is_a_url_error() {
    let mut rig = dns_rig(&[1, 10, 0, 0, 5], 0);
    let lookup = start(&mut rig, "http://bad_host/");
    let obs = observe(&lookup);
    rig.step(1);
    assert_eq!(*obs.errors.borrow(), vec![RequestError::UrlParseError]);
    assert!(rig.sent_commands().is_empty());
}

#[test]
fn module_status_is_a_dns_failure() {
    let mut rig = dns_rig(&[], 3);
    let lookup = start(&mut rig, "nowhere.example");
    let obs = observe(&lookup);
    rig.step(2);
    assert_eq!(*obs.errors.borrow(), vec![RequestError::DnsFailure]);
    assert_eq!(obs.completed.get(), 0);
    assert_eq!(lookup.first_address(), None);
}

#[test]
fn empty_answer_is_a_dns_failure() {
    let mut rig = dns_rig(&[0], 0);
    let lookup = start(&mut rig, "nowhere.example");
    let obs = observe(&lookup);
    rig.step(2);
    assert_eq!(*obs.errors.borrow(), vec![RequestError::DnsFailure]);
}

#[test]
fn unanswered_lookup_is_a_communication_error() {
    let mut rig = Rig::with_config(LinkConfig {
        response_timeout_ms: 100,
        ..LinkConfig::default()
    });
    rig.module.borrow_mut().set_network_ready(true);
    let lookup = start(&mut rig, "example.com");
    let obs = observe(&lookup);
    rig.step(1);
    rig.advance(100);
    assert_eq!(*obs.errors.borrow(), vec![RequestError::CommunicationError]);
    assert_eq!(
        *obs.states.borrow(),
        vec![RequestState::InProgress, RequestState::Error]
    );
    assert_eq!(lookup.request.state(), RequestState::Error);
}

#[test]
fn dropped_lookup_stays_silent() {
    let mut rig = dns_rig(&[1, 10, 0, 0, 5], 0);
    let completed = Rc::new(Cell::new(false));
    {
        let lookup = start(&mut rig, "example.com");
        let c = completed.clone();
        lookup.request.on_complete(move || c.set(true));
    }
    rig.step(2);
    assert!(!completed.get());
    assert_eq!(rig.module.borrow().stats().completed, 1);
}

#[test]
fn concurrent_lookups_complete_in_order() {
    let mut rig = Rig::new();
    rig.sim().set_responder(|rx, peer| {
        let last = if rx.payload.starts_with(b"a.") { 1 } else { 2 };
        peer.queue_response(CMD_DNS_RESOLVE, 0, &[1, 10, 0, 0, last]);
    });
    rig.module.borrow_mut().set_network_ready(true);
    let a = start(&mut rig, "a.example");
    let b = start(&mut rig, "b.example");
    rig.step(3);
    assert_eq!(a.first_address(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(b.first_address(), Some(Ipv4Addr::new(10, 0, 0, 2)));
}
