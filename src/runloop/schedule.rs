//! Wall-clock (RTC) scheduled tasks.
//!
//! A sorted queue of one-shot callbacks keyed by RTC seconds.  Entries with
//! equal due times fire in insertion order.  The queue is drained at the
//! end of every run-loop iteration, and by the power layer while polling
//! from sleep:
//!
//! ```text
//!   polling_from_sleep = false   every due entry fires
//!   polling_from_sleep = true    due entries with run_in_sleep fire;
//!                                the rest stay queued and request a wake
//! ```

use log::{debug, trace};

use super::Scheduler;

/// Handle to a scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleId(u32);

type DatedCallback = Box<dyn FnOnce(&mut Scheduler)>;

struct DatedTask {
    id: ScheduleId,
    due_secs: u64,
    run_in_sleep: bool,
    callback: DatedCallback,
}

/// Entries sorted by `due_secs`, stable for equal keys.
#[derive(Default)]
pub(crate) struct DateQueue {
    entries: Vec<DatedTask>,
    next_id: u32,
}

impl DateQueue {
    fn insert(&mut self, task: DatedTask) {
        // Insert after every entry with due <= this one.
        let at = self.entries.partition_point(|e| e.due_secs <= task.due_secs);
        self.entries.insert(at, task);
    }

    fn unlink(&mut self, id: ScheduleId) -> Option<DatedTask> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    fn alloc_id(&mut self) -> ScheduleId {
        let id = ScheduleId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}

impl Scheduler {
    /// Run `f` once when the RTC reaches `due_secs`.
    pub fn schedule_at<F>(&mut self, due_secs: u64, run_in_sleep: bool, f: F) -> ScheduleId
    where
        F: FnOnce(&mut Scheduler) + 'static,
    {
        let id = self.dated.alloc_id();
        self.dated.insert(DatedTask {
            id,
            due_secs,
            run_in_sleep,
            callback: Box::new(f),
        });
        debug!("RunLoop: {:?} scheduled for rtc {}", id, due_secs);
        id
    }

    /// Move a queued entry to a new due time.  Returns `false` if it
    /// already fired or was cancelled.
    pub fn reschedule(&mut self, id: ScheduleId, due_secs: u64) -> bool {
        match self.dated.unlink(id) {
            Some(mut task) => {
                task.due_secs = due_secs;
                self.dated.insert(task);
                true
            }
            None => false,
        }
    }

    /// Unlink without running.  Cancelling twice is a no-op.
    pub fn cancel_scheduled(&mut self, id: ScheduleId) -> bool {
        self.dated.unlink(id).is_some()
    }

    pub fn is_scheduled(&self, id: ScheduleId) -> bool {
        self.dated.entries.iter().any(|e| e.id == id)
    }

    /// Whether a queued entry's due time has been reached.
    pub fn is_due(&self, id: ScheduleId) -> bool {
        let now = self.rtc_secs();
        self.dated
            .entries
            .iter()
            .any(|e| e.id == id && e.due_secs <= now)
    }

    /// Earliest due time in the queue, for the power layer's wake alarm.
    pub fn next_due_secs(&self) -> Option<u64> {
        self.dated.entries.first().map(|e| e.due_secs)
    }

    /// Fire every due entry (subject to the sleep filter) and report how
    /// many ran.  Sets the busy-sleep flag when polling from sleep did work.
    ///
    /// The due set is fixed before the first callback: entries a callback
    /// schedules wait for the next pass, and entries it cancels or moves
    /// out of the due window do not fire.
    pub fn process_scheduled_tasks(&mut self, polling_from_sleep: bool) -> usize {
        let now = self.rtc_secs();
        let due = self.dated.partition_due(now);

        let mut ready = Vec::with_capacity(due);
        let mut skipped = 0usize;
        for task in &self.dated.entries[..due] {
            if polling_from_sleep && !task.run_in_sleep {
                skipped += 1;
            } else {
                ready.push(task.id);
            }
        }
        if skipped > 0 {
            trace!("RunLoop: {} due task(s) need the full loop, waking", skipped);
            self.power().request_wake();
        }

        let mut fired = 0;
        for id in ready {
            let Some(task) = self.dated.unlink_due(id, now) else {
                trace!("RunLoop: {:?} cancelled or moved during the pass", id);
                continue;
            };
            debug!("RunLoop: {:?} due, firing", task.id);
            (task.callback)(self);
            fired += 1;
        }
        self.power().set_busy_sleep(polling_from_sleep && fired > 0);
        fired
    }
}

impl DateQueue {
    /// Number of leading entries due at `now`.
    fn partition_due(&self, now: u64) -> usize {
        self.entries.partition_point(|e| e.due_secs <= now)
    }

    fn unlink_due(&mut self, id: ScheduleId, now: u64) -> Option<DatedTask> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.id == id && e.due_secs <= now)?;
        Some(self.entries.remove(pos))
    }
}
