//! Run loop scenarios mixing tasks, timers, wall-clock entries and
//! deferred interrupts.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;
use std::sync::Arc;

use embedded_hal::digital::{ErrorType, InputPin};
use runlink::config::InputConfig;
use runlink::link::Frame;
use runlink::ports::Board;
use runlink::runloop::{DeferredInterrupt, EdgeEvent, InterruptLine, Scheduler, TimerMode};
use runlink::{RunLoop, TaskStatus};

use crate::mock_hw::Rig;

// ── Pin stub ──────────────────────────────────────────────────

/// Input pin whose level the test flips through a shared cell.
#[derive(Clone, Default)]
struct SharedPin(Rc<Cell<bool>>);

impl ErrorType for SharedPin {
    type Error = Infallible;
}

impl InputPin for SharedPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.0.get())
    }
    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.0.get())
    }
}

// ── Timers and tasks ──────────────────────────────────────────

#[test]
fn heartbeat_timer_and_one_shot_share_the_loop() {
    let mut rig = Rig::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let l = log.clone();
    let beat = rig
        .rl
        .scheduler()
        .create_timer(100, TimerMode::Repeating, move |s: &mut Scheduler| {
            l.borrow_mut().push(("beat", s.now_ms()));
        });
    rig.rl.scheduler().start_timer(beat);
    let l = log.clone();
    rig.rl.scheduler().call_once(250, move |s| {
        l.borrow_mut().push(("once", s.now_ms()));
    });

    for _ in 0..4 {
        rig.advance(100);
    }

    assert_eq!(
        *log.borrow(),
        vec![
            ("beat", 100),
            ("beat", 200),
            ("beat", 300),
            ("once", 300),
            ("beat", 400),
        ]
    );
    assert!(rig.rl.scheduler().is_running(beat));
}

#[test]
fn timer_callback_can_stop_another_timer() {
    let mut rig = Rig::new();
    let ticks = Rc::new(Cell::new(0));
    let t = ticks.clone();
    let victim = rig
        .rl
        .scheduler()
        .create_timer(10, TimerMode::Repeating, move |_| t.set(t.get() + 1));
    rig.rl.scheduler().start_timer(victim);
    rig.rl.scheduler().call_once(25, move |s| s.stop_timer(victim));

    for _ in 0..10 {
        rig.advance(10);
    }
    // 10, 20, then 30 where the victim runs before the one-shot.
    assert_eq!(ticks.get(), 3);
    assert!(!rig.rl.scheduler().is_running(victim));
    assert!(rig.rl.scheduler().timer_exists(victim));
}

#[test]
fn task_added_from_a_timer_runs_next_iteration() {
    let mut rig = Rig::new();
    let runs = Rc::new(Cell::new(0));
    let r = runs.clone();
    rig.rl.scheduler().call_once(0, move |s| {
        let r = r.clone();
        s.add_fn(move |_| {
            r.set(r.get() + 1);
            TaskStatus::Done
        });
    });

    rig.step(1);
    assert_eq!(runs.get(), 0);
    rig.step(2);
    assert_eq!(runs.get(), 1);
}

// ── Wall-clock entries ────────────────────────────────────────

#[test]
fn scheduled_entry_fires_when_rtc_reaches_due() {
    let mut rig = Rig::new();
    rig.clock.set_rtc(1_000);
    let fired = Rc::new(Cell::new(None));
    let f = fired.clone();
    rig.rl
        .scheduler()
        .schedule_at(1_002, false, move |s| f.set(Some(s.rtc_secs())));

    rig.advance(1_000);
    assert_eq!(fired.get(), None);
    rig.advance(1_000);
    assert_eq!(fired.get(), Some(1_002));
    assert_eq!(rig.rl.scheduler().next_due_secs(), None);
}

#[test]
fn sleep_poll_runs_only_sleep_safe_entries() {
    let mut rig = Rig::new();
    rig.clock.set_rtc(50);
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log.clone();
    rig.rl
        .scheduler()
        .schedule_at(50, false, move |_| l.borrow_mut().push("awake"));
    let l = log.clone();
    rig.rl
        .scheduler()
        .schedule_at(50, true, move |_| l.borrow_mut().push("asleep"));

    let ran = rig.rl.scheduler().process_scheduled_tasks(true);
    assert_eq!(ran, 1);
    assert_eq!(*log.borrow(), vec!["asleep"]);
    assert!(rig.power.should_wake());
    assert!(rig.power.busy_sleep());

    rig.step(1);
    assert_eq!(*log.borrow(), vec!["asleep", "awake"]);
    assert_eq!(rig.rl.scheduler().process_scheduled_tasks(true), 0);
    assert!(!rig.power.busy_sleep());
}

// ── Deferred interrupts ───────────────────────────────────────

#[test]
fn debounced_edge_commits_a_frame() {
    let mut rig = Rig::new();
    rig.echo();
    let line = Arc::new(InterruptLine::new(&InputConfig {
        debounce_ms: 20,
        deactivate_until_handled: true,
    }));
    let pin = SharedPin::default();
    let edges = Rc::new(RefCell::new(Vec::new()));
    let e = edges.clone();
    let module = rig.module.clone();
    rig.rl.scheduler().add(DeferredInterrupt::new(
        line.clone(),
        pin.clone(),
        false,
        move |edge: EdgeEvent, _: &mut Scheduler| {
            e.borrow_mut().push(edge);
            let _ = module.borrow_mut().commit_async(Frame::management(0x90));
        },
    ));

    // ISR: rising edge at t=0, then a bounce the line ignores.
    pin.0.set(true);
    line.on_edge(0, true);
    line.on_edge(1, false);
    rig.advance(10);
    assert!(edges.borrow().is_empty());
    rig.advance(10);

    assert_eq!(
        *edges.borrow(),
        vec![EdgeEvent {
            at_ms: 0,
            level: true
        }]
    );
    assert_eq!(line.suppressed_edges(), 1);
    rig.step(2);
    assert_eq!(rig.sent_commands(), vec![0x90]);
}

#[test]
fn transient_edge_is_never_delivered() {
    let mut rig = Rig::new();
    let line = Arc::new(InterruptLine::new(&InputConfig::default()));
    let pin = SharedPin::default();
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    rig.rl.scheduler().add(DeferredInterrupt::new(
        line.clone(),
        pin.clone(),
        false,
        move |_: EdgeEvent, _: &mut Scheduler| c.set(c.get() + 1),
    ));

    line.on_edge(0, true);
    // Level already back low when the debounce window closes.
    rig.advance(50);
    assert_eq!(count.get(), 0);
    assert!(!line.is_pending());
}

// ── Board hooks ───────────────────────────────────────────────

#[derive(Default)]
struct CountingBoard {
    reset_pending: Rc<Cell<bool>>,
    resets: Rc<Cell<u32>>,
    touches: Rc<Cell<u32>>,
}

impl Board for CountingBoard {
    fn serial_reset_requested(&mut self) -> bool {
        self.reset_pending.replace(false)
    }
    fn serial_reset(&mut self) {
        self.resets.set(self.resets.get() + 1);
    }
    fn poll_touch(&mut self, _sched: &mut Scheduler) {
        self.touches.set(self.touches.get() + 1);
    }
}

#[test]
fn board_hooks_run_every_iteration() {
    let board = CountingBoard::default();
    let pending = board.reset_pending.clone();
    let resets = board.resets.clone();
    let touches = board.touches.clone();
    let clock = runlink::adapters::time::ManualClock::new();
    let mut rl = RunLoop::new(
        Rc::new(clock),
        Arc::new(runlink::power::PowerFlags::new()),
    )
    .with_board(board);

    rl.run_once();
    pending.set(true);
    rl.run_once();
    rl.run_once();

    assert_eq!(touches.get(), 3);
    assert_eq!(resets.get(), 1);
    assert_eq!(rl.iterations(), 3);
}
