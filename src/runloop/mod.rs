//! Cooperative run loop and dynamic task queue.
//!
//! There is no preemptive OS.  Everything that is deferred or time-based
//! is a task registered here and polled once per iteration:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  RunLoop::run_once()                                         │
//! │                                                              │
//! │  1. Board: serial-reset check, touch poll                    │
//! │  2. Every registered task/timer, in registration order       │
//! │  3. Due wall-clock tasks (DateQueue)                         │
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                ▲                     ▲
//!        │ flags          │ fired flags         │ RTC
//!   ISRs (InterruptLine)  timers (deadline)     Clock port
//! ```
//!
//! Tasks live in an arena owned by the [`Scheduler`] and are referenced by
//! generation-tagged [`TaskId`]s.  A task's node is taken out of its slot
//! while it runs, so a callback can add, remove or restart anything,
//! itself included, through the `&mut Scheduler` it receives.  The
//! iteration walks a snapshot of the registration order taken before the
//! first callback, which is what keeps traversal valid under mutation.

pub mod interrupt;
pub mod schedule;
pub mod timer;

use std::rc::Rc;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::ports::{Board, Clock, NoBoard};
use crate::power::PowerFlags;

use schedule::DateQueue;
use timer::{TimerArm, TimerCallback};

pub use interrupt::{DeferredInterrupt, EdgeEvent, InterruptLine};
pub use schedule::ScheduleId;
pub use timer::{TimerId, TimerMode};

// ═══════════════════════════════════════════════════════════════
//  Task identity
// ═══════════════════════════════════════════════════════════════

/// Handle to a registered task or timer.
///
/// Handles are generation-tagged: once the slot is released, every
/// operation on a stale handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

/// Returned by a task after each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Keep the task registered.
    Pending,
    /// Single-shot: unregister and drop the task after this call.
    Done,
}

/// Anything the run loop can poll.
pub trait Task {
    fn poll(&mut self, sched: &mut Scheduler) -> TaskStatus;
}

/// Adapter so plain closures can be registered with [`Scheduler::add_fn`].
struct FnTask<F>(F);

impl<F> Task for FnTask<F>
where
    F: FnMut(&mut Scheduler) -> TaskStatus,
{
    fn poll(&mut self, sched: &mut Scheduler) -> TaskStatus {
        (self.0)(sched)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Task arena
// ═══════════════════════════════════════════════════════════════

pub(crate) enum Node {
    Task(Box<dyn Task>),
    Timer(TimerCallback),
}

#[derive(Default)]
pub(crate) struct Slot {
    generation: u32,
    occupied: bool,
    /// Present in `order`.  For timers this is the Running state.
    registered: bool,
    /// `None` while the node's callback is executing.
    node: Option<Node>,
    /// Arming data for timer slots.  Kept outside the node so a timer can
    /// be stopped or restarted from inside its own callback.
    pub(crate) timer: Option<TimerArm>,
}

#[derive(Default)]
pub(crate) struct TaskArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Registration order of every registered slot.
    order: Vec<TaskId>,
}

impl TaskArena {
    fn insert(&mut self, node: Node, timer: Option<TimerArm>) -> TaskId {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.occupied = true;
        slot.registered = false;
        slot.node = Some(node);
        slot.timer = timer;
        TaskId {
            index,
            generation: slot.generation,
        }
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.occupied && s.generation == id.generation)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.occupied && s.generation == id.generation)
    }

    pub(crate) fn is_registered(&self, id: TaskId) -> bool {
        self.get(id).is_some_and(|s| s.registered)
    }

    /// Append to the registration order.  Already-registered is a no-op,
    /// so a slot can never appear twice.
    pub(crate) fn register(&mut self, id: TaskId) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.occupied && s.generation == id.generation)
        else {
            return false;
        };
        if !slot.registered {
            slot.registered = true;
            self.order.push(id);
        }
        true
    }

    pub(crate) fn deregister(&mut self, id: TaskId) {
        let Some(slot) = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.occupied && s.generation == id.generation)
        else {
            return;
        };
        if slot.registered {
            slot.registered = false;
            self.order.retain(|x| *x != id);
        }
    }

    /// Deregister and free the slot.  Returns the node (if it is not
    /// currently executing) so the caller drops it outside the arena.
    pub(crate) fn release(&mut self, id: TaskId) -> Option<Node> {
        self.deregister(id);
        let slot = self.get_mut(id)?;
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.timer = None;
        let node = slot.node.take();
        self.free.push(id.index);
        node
    }

    fn take_node(&mut self, id: TaskId) -> Option<Node> {
        self.get_mut(id).and_then(|s| s.node.take())
    }

    /// Put a node back after its callback returned.  If the slot was
    /// released meanwhile the node is handed back to be dropped.
    fn restore_node(&mut self, id: TaskId, node: Node) -> Option<Node> {
        match self.get_mut(id) {
            Some(slot) => {
                slot.node = Some(node);
                None
            }
            None => Some(node),
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// The context handle every task, timer and scheduled callback receives.
///
/// Owns the task arena and the wall-clock queue; timer and scheduled-task
/// operations are implemented in [`timer`] and [`schedule`].
pub struct Scheduler {
    pub(crate) tasks: TaskArena,
    pub(crate) dated: DateQueue,
    clock: Rc<dyn Clock>,
    power: Arc<PowerFlags>,
}

impl Scheduler {
    pub fn new(clock: Rc<dyn Clock>, power: Arc<PowerFlags>) -> Self {
        Self {
            tasks: TaskArena::default(),
            dated: DateQueue::default(),
            clock,
            power,
        }
    }

    /// Monotonic milliseconds, read fresh from the clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Wall-clock seconds from the RTC.
    pub fn rtc_secs(&self) -> u64 {
        self.clock.rtc_secs()
    }

    pub fn power(&self) -> &Arc<PowerFlags> {
        &self.power
    }

    /// Register a task at the end of the list.
    pub fn add<T: Task + 'static>(&mut self, task: T) -> TaskId {
        self.add_boxed(Box::new(task))
    }

    pub fn add_boxed(&mut self, task: Box<dyn Task>) -> TaskId {
        let id = self.tasks.insert(Node::Task(task), None);
        self.tasks.register(id);
        debug!("RunLoop: task {:?} registered ({} total)", id, self.tasks.len());
        id
    }

    /// Register a closure as a task.
    pub fn add_fn<F>(&mut self, f: F) -> TaskId
    where
        F: FnMut(&mut Scheduler) -> TaskStatus + 'static,
    {
        self.add(FnTask(f))
    }

    /// Unregister and drop a task.  Removing an absent task is a no-op.
    pub fn remove(&mut self, id: TaskId) {
        if self.tasks.get(id).is_some() {
            let node = self.tasks.release(id);
            drop(node);
            debug!("RunLoop: task {:?} removed", id);
        }
    }

    /// Whether the task is currently registered.
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.is_registered(id)
    }

    /// Number of registered tasks and running timers.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Poll every registered node once, in registration order.
    fn run_tasks(&mut self) {
        let now = self.clock.now_ms();
        // Captured before any callback runs; see module docs.
        let snapshot = self.tasks.order.clone();
        for id in snapshot {
            let Some(slot) = self.tasks.get(id) else {
                continue;
            };
            if !slot.registered {
                continue;
            }
            if slot.timer.is_some() {
                self.poll_timer(id, now);
            } else {
                self.poll_task(id);
            }
        }
    }

    fn poll_task(&mut self, id: TaskId) {
        let mut task = match self.tasks.take_node(id) {
            Some(Node::Task(task)) => task,
            Some(other) => {
                // Not reachable: timer slots always carry an arm.
                let _ = self.tasks.restore_node(id, other);
                return;
            }
            None => return,
        };

        let status = task.poll(self);

        if let Some(stale) = self.tasks.restore_node(id, Node::Task(task)) {
            // Removed itself (or was removed) during the call.
            drop(stale);
            return;
        }
        if status == TaskStatus::Done {
            let node = self.tasks.release(id);
            drop(node);
            debug!("RunLoop: single-shot task {:?} finished", id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Run loop
// ═══════════════════════════════════════════════════════════════

/// The single cooperative scheduler for the whole device.
pub struct RunLoop {
    sched: Scheduler,
    board: Box<dyn Board>,
    iterations: u64,
}

impl RunLoop {
    pub fn new(clock: Rc<dyn Clock>, power: Arc<PowerFlags>) -> Self {
        Self {
            sched: Scheduler::new(clock, power),
            board: Box::new(NoBoard),
            iterations: 0,
        }
    }

    /// Attach board hooks (serial reset, touch controller).
    pub fn with_board<B: Board + 'static>(mut self, board: B) -> Self {
        self.board = Box::new(board);
        self
    }

    pub fn scheduler(&mut self) -> &mut Scheduler {
        &mut self.sched
    }

    pub fn scheduler_ref(&self) -> &Scheduler {
        &self.sched
    }

    /// Completed iterations since construction.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run forever.
    pub fn run(&mut self) -> ! {
        info!("RunLoop: entering main loop");
        loop {
            self.run_once();
        }
    }

    /// Execute exactly one iteration.
    pub fn run_once(&mut self) {
        if self.board.serial_reset_requested() {
            warn!("RunLoop: serial reset requested");
            self.board.serial_reset();
        }
        self.board.poll_touch(&mut self.sched);
        self.sched.run_tasks();
        self.sched.process_scheduled_tasks(false);
        self.iterations = self.iterations.wrapping_add(1);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
