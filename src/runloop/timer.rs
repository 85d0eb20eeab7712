//! Software timers.
//!
//! A timer is a task slot with arming data.  The "hardware tick" is the
//! deadline comparison the run loop makes once per iteration: it only
//! marks the timer as fired, and the callback runs from the loop, never
//! from `start_timer`.
//!
//! ```text
//!   create_timer ──▶ Stopped ──start──▶ Running ──fire──▶ callback
//!                       ▲                  │                 │
//!                       └──────stop────────┘   single-shot ──┤
//!                                               + auto-release ──▶ released
//! ```
//!
//! Timers never fire before their interval has elapsed; under load they
//! may fire later.

use log::{debug, info};

use super::{Node, Scheduler, TaskId};

/// Callback signature shared by every timer.
pub type TimerCallback = Box<dyn FnMut(&mut Scheduler)>;

/// Handle to a timer owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(TaskId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    SingleShot,
    Repeating,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerArm {
    interval_ms: u64,
    deadline_ms: u64,
    mode: TimerMode,
    /// Release the slot after a single-shot fire.
    auto_release: bool,
}

impl Scheduler {
    /// Create a stopped timer.  The callback is attached for the timer's
    /// whole life, so `start_timer` can never run without one.
    pub fn create_timer<F>(&mut self, interval_ms: u64, mode: TimerMode, callback: F) -> TimerId
    where
        F: FnMut(&mut Scheduler) + 'static,
    {
        let arm = TimerArm {
            interval_ms,
            deadline_ms: 0,
            mode,
            auto_release: false,
        };
        TimerId(self.tasks.insert(Node::Timer(Box::new(callback)), Some(arm)))
    }

    /// Arm the timer and register it.  Restarting a running timer re-arms
    /// it without registering it twice.  Returns `false` for a stale id.
    pub fn start_timer(&mut self, id: TimerId) -> bool {
        let now = self.now_ms();
        let Some(arm) = self.tasks.get_mut(id.0).and_then(|s| s.timer.as_mut()) else {
            return false;
        };
        arm.deadline_ms = now.saturating_add(arm.interval_ms);
        debug!("Timer: {:?} armed for {} ms", id, arm.interval_ms);
        self.tasks.register(id.0)
    }

    /// Disarm and unregister.  The timer stays owned and can be restarted.
    pub fn stop_timer(&mut self, id: TimerId) {
        self.tasks.deregister(id.0);
    }

    /// Change the interval; takes effect at the next start or re-arm.
    pub fn set_timer_interval(&mut self, id: TimerId, interval_ms: u64) {
        if let Some(arm) = self.tasks.get_mut(id.0).and_then(|s| s.timer.as_mut()) {
            arm.interval_ms = interval_ms;
        }
    }

    /// Release a single-shot timer automatically after it fires.
    pub fn set_auto_release(&mut self, id: TimerId, auto_release: bool) {
        if let Some(arm) = self.tasks.get_mut(id.0).and_then(|s| s.timer.as_mut()) {
            arm.auto_release = auto_release;
        }
    }

    /// Stop the timer and drop its callback.  Stale ids are ignored.
    pub fn release_timer(&mut self, id: TimerId) {
        let node = self.tasks.release(id.0);
        drop(node);
    }

    pub fn is_running(&self, id: TimerId) -> bool {
        self.tasks.is_registered(id.0)
    }

    /// Whether the handle still refers to a live (running or stopped) timer.
    pub fn timer_exists(&self, id: TimerId) -> bool {
        self.tasks.get(id.0).is_some()
    }

    /// Milliseconds until a running timer is due.
    pub fn remaining_ms(&self, id: TimerId) -> Option<u64> {
        let slot = self.tasks.get(id.0)?;
        if !slot.registered {
            return None;
        }
        let arm = slot.timer.as_ref()?;
        Some(arm.deadline_ms.saturating_sub(self.now_ms()))
    }

    /// Run `f` once after `delay_ms`.  The timer owns itself and is
    /// released after firing; a delay of zero runs on the next iteration.
    pub fn call_once<F>(&mut self, delay_ms: u64, f: F) -> TimerId
    where
        F: FnOnce(&mut Scheduler) + 'static,
    {
        let mut f = Some(f);
        let id = self.create_timer(delay_ms, TimerMode::SingleShot, move |sched| {
            if let Some(f) = f.take() {
                f(sched);
            }
        });
        self.set_auto_release(id, true);
        self.start_timer(id);
        id
    }

    /// Fire the timer if its deadline has passed.
    pub(super) fn poll_timer(&mut self, id: TaskId, now: u64) {
        let Some(arm) = self.tasks.get(id).and_then(|s| s.timer) else {
            return;
        };
        if now < arm.deadline_ms {
            return;
        }

        let single_shot = arm.mode == TimerMode::SingleShot;
        if single_shot {
            self.tasks.deregister(id);
        } else {
            let rearm = self.now_ms().saturating_add(arm.interval_ms);
            if let Some(a) = self.tasks.get_mut(id).and_then(|s| s.timer.as_mut()) {
                a.deadline_ms = rearm;
            }
        }

        let mut callback = match self.tasks.take_node(id) {
            Some(Node::Timer(cb)) => cb,
            Some(other) => {
                let _ = self.tasks.restore_node(id, other);
                return;
            }
            None => return,
        };

        callback(self);

        if let Some(stale) = self.tasks.restore_node(id, Node::Timer(callback)) {
            // Released from inside its own callback.
            drop(stale);
            return;
        }

        // Re-read: the callback may have changed auto-release or restarted
        // the timer, in which case it must stay.
        let auto_release = self
            .tasks
            .get(id)
            .and_then(|s| s.timer)
            .is_some_and(|a| a.auto_release);
        if single_shot && auto_release && !self.tasks.is_registered(id) {
            let node = self.tasks.release(id);
            drop(node);
            info!("Timer: {:?} fired and released", TimerId(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::time::ManualClock;
    use crate::power::PowerFlags;
    use crate::runloop::RunLoop;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn new_loop() -> (RunLoop, ManualClock) {
        let clock = ManualClock::new();
        let rl = RunLoop::new(Rc::new(clock.clone()), Arc::new(PowerFlags::new()));
        (rl, clock)
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut(&mut Scheduler) + 'static) {
        let c = Rc::new(Cell::new(0));
        let c2 = c.clone();
        (c, move |_: &mut Scheduler| c2.set(c2.get() + 1))
    }

    #[test]
    fn zero_interval_fires_next_iteration_not_in_start() {
        let (mut rl, _) = new_loop();
        let (fired, cb) = counter();
        let t = rl.scheduler().create_timer(0, TimerMode::SingleShot, cb);
        rl.scheduler().start_timer(t);
        assert_eq!(fired.get(), 0, "start must never invoke the callback");
        rl.run_once();
        assert_eq!(fired.get(), 1);
        assert!(!rl.scheduler().is_running(t));
        assert!(rl.scheduler().timer_exists(t), "no auto-release: timer stays owned");
    }

    #[test]
    fn never_fires_early() {
        let (mut rl, clock) = new_loop();
        let (fired, cb) = counter();
        let t = rl.scheduler().create_timer(100, TimerMode::SingleShot, cb);
        rl.scheduler().start_timer(t);
        clock.advance_ms(99);
        rl.run_once();
        assert_eq!(fired.get(), 0);
        assert_eq!(rl.scheduler().remaining_ms(t), Some(1));
        clock.advance_ms(1);
        rl.run_once();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn repeating_timer_rearms_from_fire_time() {
        let (mut rl, clock) = new_loop();
        let (fired, cb) = counter();
        let t = rl.scheduler().create_timer(10, TimerMode::Repeating, cb);
        rl.scheduler().start_timer(t);
        for _ in 0..5 {
            clock.advance_ms(10);
            rl.run_once();
        }
        assert_eq!(fired.get(), 5);
        // A long stall fires once, not a burst.
        clock.advance_ms(100);
        rl.run_once();
        rl.run_once();
        assert_eq!(fired.get(), 6);
        assert!(rl.scheduler().is_running(t));
    }

    #[test]
    fn stop_deregisters_and_restart_reregisters_once() {
        let (mut rl, clock) = new_loop();
        let (fired, cb) = counter();
        let t = rl.scheduler().create_timer(5, TimerMode::Repeating, cb);
        rl.scheduler().start_timer(t);
        rl.scheduler().start_timer(t);
        assert_eq!(rl.scheduler().task_count(), 1, "running timer registered exactly once");
        rl.scheduler().stop_timer(t);
        assert_eq!(rl.scheduler().task_count(), 0);
        clock.advance_ms(50);
        rl.run_once();
        assert_eq!(fired.get(), 0);
        rl.scheduler().start_timer(t);
        clock.advance_ms(5);
        rl.run_once();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn call_once_releases_itself() {
        let (mut rl, clock) = new_loop();
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let t = rl.scheduler().call_once(20, move |_| f.set(f.get() + 1));
        clock.advance_ms(20);
        rl.run_once();
        rl.run_once();
        assert_eq!(fired.get(), 1);
        assert!(!rl.scheduler().timer_exists(t));
        assert_eq!(rl.scheduler().task_count(), 0);
        // The stale handle is inert.
        assert!(!rl.scheduler().start_timer(t));
    }

    #[test]
    fn single_shot_can_restart_itself_from_callback() {
        let (mut rl, clock) = new_loop();
        let fired = Rc::new(Cell::new(0));
        let me: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let f = fired.clone();
        let m = me.clone();
        let t = rl.scheduler().create_timer(10, TimerMode::SingleShot, move |sched| {
            f.set(f.get() + 1);
            if f.get() < 3 {
                if let Some(id) = m.get() {
                    sched.start_timer(id);
                }
            }
        });
        me.set(Some(t));
        rl.scheduler().set_auto_release(t, true);
        rl.scheduler().start_timer(t);
        for _ in 0..5 {
            clock.advance_ms(10);
            rl.run_once();
        }
        assert_eq!(fired.get(), 3);
        assert!(!rl.scheduler().timer_exists(t), "released after the last fire");
    }

    #[test]
    fn timer_released_inside_own_callback_is_dropped_once() {
        let (mut rl, _) = new_loop();
        let me: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let m = me.clone();
        let t = rl.scheduler().create_timer(0, TimerMode::Repeating, move |sched| {
            if let Some(id) = m.get() {
                sched.release_timer(id);
            }
        });
        me.set(Some(t));
        rl.scheduler().start_timer(t);
        rl.run_once();
        assert!(!rl.scheduler().timer_exists(t));
        rl.run_once();
        assert_eq!(rl.scheduler().task_count(), 0);
    }
}
