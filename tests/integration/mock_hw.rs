//! Test rig: a run loop on a manual clock driving a link to the
//! simulated module.
//!
//! Everything runs on the host; the simulated module stands in for the
//! SPI co-processor at the byte level.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use std::sync::Arc;

use runlink::adapters::sim_module::SimulatedModule;
use runlink::adapters::time::ManualClock;
use runlink::config::LinkConfig;
use runlink::link::{WifiModule, spawn_driver};
use runlink::power::PowerFlags;
use runlink::runloop::RunLoop;

pub type SharedModule = Rc<RefCell<WifiModule<SimulatedModule>>>;

pub struct Rig {
    pub rl: RunLoop,
    pub clock: ManualClock,
    pub power: Arc<PowerFlags>,
    pub module: SharedModule,
    /// (command, payload) of every unsolicited frame.
    pub unsolicited: Rc<RefCell<Vec<(u16, Vec<u8>)>>>,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default())
    }

    pub fn with_config(cfg: LinkConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let clock = ManualClock::new();
        let power = Arc::new(PowerFlags::new());
        let mut rl = RunLoop::new(Rc::new(clock.clone()), power.clone());
        let module = Rc::new(RefCell::new(WifiModule::new(SimulatedModule::new(), cfg)));
        let unsolicited = Rc::new(RefCell::new(Vec::new()));
        let sink = unsolicited.clone();
        spawn_driver(rl.scheduler(), module.clone(), move |frame, _| {
            sink.borrow_mut()
                .push((frame.command_id(), frame.payload().to_vec()));
        });
        Self {
            rl,
            clock,
            power,
            module,
            unsolicited,
        }
    }

    /// Run `n` iterations without moving time.
    pub fn step(&mut self, n: usize) {
        for _ in 0..n {
            self.rl.run_once();
        }
    }

    /// Move time forward, then run one iteration.
    pub fn advance(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        self.rl.run_once();
    }

    pub fn sim(&self) -> RefMut<'_, SimulatedModule> {
        RefMut::map(self.module.borrow_mut(), |m| m.channel_mut())
    }

    /// Commands the host has written to the module, in order.
    pub fn sent_commands(&self) -> Vec<u16> {
        self.module
            .borrow()
            .channel()
            .received()
            .iter()
            .map(|f| f.header.command_id)
            .collect()
    }

    /// Answer every command with status 0 and its own payload.
    pub fn echo(&self) {
        self.sim().set_responder(|rx, peer| {
            peer.queue_response(rx.header.command_id, 0, &rx.payload);
        });
    }
}
