//! Link behaviour through the run loop against the simulated module.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use runlink::config::LinkConfig;
use runlink::error::{Error, StateError, TransportError};
use runlink::link::{AbortOutcome, Chunk, Frame};

use crate::mock_hw::Rig;

type Outcomes = Rc<RefCell<Vec<(u16, Result<(), Error>)>>>;

fn recording(cmd: u16, log: &Outcomes) -> Frame {
    let log = log.clone();
    Frame::management(cmd).on_complete(move |c| {
        log.borrow_mut().push((c.frame().command_id(), c.result()));
    })
}

// ── Ordering and failure ─────────────────────────────────────

#[test]
fn failed_status_does_not_block_the_next_frame() {
    let mut rig = Rig::new();
    rig.sim().set_responder(|rx, peer| {
        let status = if rx.header.command_id == 0x01 { 1 } else { 0 };
        peer.queue_response(rx.header.command_id, status, &[]);
    });
    let log: Outcomes = Rc::default();
    rig.module.borrow_mut().commit_async(recording(0x01, &log)).unwrap();
    rig.module.borrow_mut().commit_async(recording(0x02, &log)).unwrap();

    rig.step(3);

    assert_eq!(
        *log.borrow(),
        vec![(0x01, Err(Error::Status(1))), (0x02, Ok(()))]
    );
    assert_eq!(rig.sent_commands(), vec![0x01, 0x02]);
    let stats = rig.module.borrow().stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert!(rig.module.borrow().is_idle());
}

#[test]
fn frames_are_sent_one_at_a_time_in_commit_order() {
    let mut rig = Rig::new();
    rig.echo();
    let log: Outcomes = Rc::default();
    for cmd in [0x10, 0x11, 0x12] {
        rig.module.borrow_mut().commit_async(recording(cmd, &log)).unwrap();
    }

    rig.step(1);
    assert_eq!(rig.sent_commands(), vec![0x10]);
    rig.step(1);
    assert_eq!(rig.sent_commands(), vec![0x10, 0x11]);
    rig.step(2);

    let order: Vec<u16> = log.borrow().iter().map(|(cmd, _)| *cmd).collect();
    assert_eq!(order, vec![0x10, 0x11, 0x12]);
    assert!(log.borrow().iter().all(|(_, r)| r.is_ok()));
}

#[test]
fn oversized_inbound_frame_does_not_wedge_the_link() {
    let mut rig = Rig::new();
    rig.echo();
    rig.sim().queue_response(0x7F, 0, &[0x5A; 1000]);
    let log: Outcomes = Rc::default();
    for cmd in [0x01, 0x02, 0x03] {
        rig.module.borrow_mut().commit_async(recording(cmd, &log)).unwrap();
    }

    rig.step(4);

    assert_eq!(
        *log.borrow(),
        vec![(0x01, Ok(())), (0x02, Ok(())), (0x03, Ok(()))]
    );
    assert_eq!(rig.sim().pending_frames(), 0);
    assert!(rig.unsolicited.borrow().is_empty());
    assert!(rig.module.borrow().is_idle());
}

// ── Timeouts ──────────────────────────────────────────────────

#[test]
fn unanswered_frame_times_out_once() {
    let mut rig = Rig::new();
    let log: Outcomes = Rc::default();
    rig.module.borrow_mut().commit_async(recording(0x20, &log)).unwrap();
    rig.step(1);
    assert!(rig.module.borrow().has_in_flight());

    rig.advance(1999);
    assert!(log.borrow().is_empty(), "never before the timeout");
    rig.advance(1);
    rig.advance(5000);

    assert_eq!(
        *log.borrow(),
        vec![(0x20, Err(Error::State(StateError::ResponseTimeout)))]
    );
    assert_eq!(rig.module.borrow().stats().timeouts, 1);
    assert!(rig.module.borrow().is_idle());
}

#[test]
fn late_response_after_timeout_is_unsolicited() {
    let mut rig = Rig::new();
    rig.module
        .borrow_mut()
        .commit_async(Frame::management(0x21))
        .unwrap();
    rig.step(1);
    rig.advance(2000);
    rig.sim().queue_response(0x21, 0, &[9]);
    rig.step(1);
    assert_eq!(*rig.unsolicited.borrow(), vec![(0x21, vec![9])]);
}

// ── Abort ─────────────────────────────────────────────────────

#[test]
fn aborted_in_flight_frame_never_reports() {
    let mut rig = Rig::new();
    rig.echo();
    let fired = Rc::new(Cell::new(false));
    let f = fired.clone();
    let id = rig
        .module
        .borrow_mut()
        .commit_async(Frame::management(0x30).on_complete(move |_| f.set(true)))
        .unwrap();
    rig.step(1);

    assert_eq!(rig.module.borrow_mut().abort(id), AbortOutcome::Neutralized);
    rig.step(2);

    assert!(!fired.get());
    assert!(rig.module.borrow().is_idle());
    assert!(
        rig.unsolicited.borrow().is_empty(),
        "the response still belongs to the aborted frame"
    );
}

#[test]
fn aborted_queued_frame_is_never_sent() {
    let mut rig = Rig::new();
    rig.echo();
    let log: Outcomes = Rc::default();
    rig.module.borrow_mut().commit_async(recording(0x31, &log)).unwrap();
    let id = rig
        .module
        .borrow_mut()
        .commit_async(recording(0x32, &log))
        .unwrap();
    assert_eq!(rig.module.borrow_mut().abort(id), AbortOutcome::Unqueued);
    rig.step(3);

    assert_eq!(rig.sent_commands(), vec![0x31]);
    assert_eq!(*log.borrow(), vec![(0x31, Ok(()))]);
}

// ── BUSY handling ─────────────────────────────────────────────

fn busy_config(limit: u16) -> LinkConfig {
    LinkConfig {
        busy_retry_limit: limit,
        ..LinkConfig::default()
    }
}

#[test]
fn busy_within_limit_is_retried_with_backoff() {
    let mut rig = Rig::with_config(busy_config(3));
    rig.echo();
    rig.sim().set_busy(3);
    let log: Outcomes = Rc::default();
    rig.module.borrow_mut().commit_async(recording(0x40, &log)).unwrap();
    rig.step(2);

    assert_eq!(rig.sim().backoffs(), 3);
    assert_eq!(*log.borrow(), vec![(0x40, Ok(()))]);
}

#[test]
fn busy_past_limit_fails_the_frame() {
    let mut rig = Rig::with_config(busy_config(3));
    rig.echo();
    rig.sim().set_busy(4);
    let log: Outcomes = Rc::default();
    rig.module.borrow_mut().commit_async(recording(0x41, &log)).unwrap();
    rig.module.borrow_mut().commit_async(recording(0x42, &log)).unwrap();
    rig.step(3);

    assert_eq!(rig.sim().backoffs(), 3);
    assert_eq!(
        *log.borrow(),
        vec![
            (0x41, Err(Error::Transport(TransportError::BusyRetriesExhausted))),
            (0x42, Ok(())),
        ]
    );
    assert_eq!(rig.sent_commands(), vec![0x42]);
}

// ── Inbound traffic ───────────────────────────────────────────

#[test]
fn unsolicited_frames_reach_the_handler() {
    let mut rig = Rig::new();
    rig.sim().queue_data(0x77, &[1, 2]);
    rig.sim().queue_response(0x78, 0, &[]);
    rig.step(2);
    assert_eq!(
        *rig.unsolicited.borrow(),
        vec![(0x77, vec![1, 2]), (0x78, vec![])]
    );
    assert_eq!(rig.module.borrow().stats().unsolicited, 2);
}

#[test]
fn chunked_response_completes_on_last_chunk() {
    let mut rig = Rig::new();
    rig.sim().set_responder(|rx, peer| {
        peer.queue_response(rx.header.command_id, 0, &[1, 2]);
        peer.queue_response(rx.header.command_id, 0, &[3, 0xFF]);
    });
    let got = Rc::new(RefCell::new(None));
    let g = got.clone();
    let frame = Frame::management(0x50)
        .on_response(|chunk, out| {
            out.extend_from_slice(chunk);
            if chunk.last() == Some(&0xFF) {
                Chunk::Last
            } else {
                Chunk::More
            }
        })
        .on_complete(move |c| *g.borrow_mut() = Some(c.response().to_vec()));
    rig.module.borrow_mut().commit_async(frame).unwrap();

    rig.step(2);
    assert!(got.borrow().is_none(), "first chunk is not the last");
    rig.step(1);
    assert_eq!(*got.borrow(), Some(vec![1, 2, 3, 0xFF]));
}

#[test]
fn data_frames_for_the_in_flight_command_go_to_its_data_hook() {
    let mut rig = Rig::new();
    rig.sim().set_responder(|rx, peer| {
        peer.queue_data(rx.header.command_id, b"abc");
        peer.queue_response(rx.header.command_id, 0, &[]);
    });
    let data = Rc::new(RefCell::new(Vec::new()));
    let d = data.clone();
    let done = Rc::new(Cell::new(false));
    let dn = done.clone();
    let frame = Frame::management(0x60)
        .on_data(move |bytes| d.borrow_mut().extend_from_slice(bytes))
        .on_complete(move |c| dn.set(c.is_success()));
    rig.module.borrow_mut().commit_async(frame).unwrap();
    rig.step(3);

    assert_eq!(*data.borrow(), b"abc".to_vec());
    assert!(done.get());
    assert!(rig.unsolicited.borrow().is_empty());
}

#[test]
fn completion_hook_may_commit_again() {
    let mut rig = Rig::new();
    rig.echo();
    let module = rig.module.clone();
    let log: Outcomes = Rc::default();
    let follow_up = recording(0x71, &log);
    let first = Frame::management(0x70).on_complete(move |_| {
        module.borrow_mut().commit_async(follow_up).unwrap();
    });
    rig.module.borrow_mut().commit_async(first).unwrap();
    rig.step(4);

    assert_eq!(rig.sent_commands(), vec![0x70, 0x71]);
    assert_eq!(*log.borrow(), vec![(0x71, Ok(()))]);
}
