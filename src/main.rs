//! Runlink host simulation
//!
//! Runs the cooperative loop on the host against an in-process model of
//! the WiFi co-processor and resolves one hostname end to end.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  RunLoop (SystemClock)                                   │
//! │                                                          │
//! │   heartbeat timer        LinkDriver task                 │
//! │                              │                           │
//! │                              ▼                           │
//! │   dns::resolve ──▶ WifiModule<SimulatedModule>           │
//! │                              │  0x44 "example.com"       │
//! │                              ▼                           │
//! │                   responder: [1, 10.0.0.5]               │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `runlink-sim [hostname]`.  Set `RUST_LOG=debug` for link traffic.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use log::{debug, info, warn};

use runlink::CoreConfig;
use runlink::adapters::sim_module::SimulatedModule;
use runlink::adapters::time::SystemClock;
use runlink::link::{WifiModule, spawn_driver};
use runlink::net::RequestState;
use runlink::net::dns::{self, CMD_DNS_RESOLVE};
use runlink::power::PowerFlags;
use runlink::runloop::{RunLoop, TimerMode};

/// Address the simulated module hands out for every lookup.
const SIM_ANSWER: [u8; 5] = [1, 10, 0, 0, 5];

/// Give up after this many loop iterations (1 ms apart).
const MAX_ITERATIONS: u64 = 5_000;

fn simulated_module() -> SimulatedModule {
    let mut sim = SimulatedModule::new();
    sim.set_responder(|frame, module| {
        if frame.header.command_id == CMD_DNS_RESOLVE {
            debug!(
                "Sim: resolving {:?}",
                String::from_utf8_lossy(&frame.payload)
            );
            module.queue_response(CMD_DNS_RESOLVE, 0, &SIM_ANSWER);
        } else {
            warn!("Sim: unknown command 0x{:04x}", frame.header.command_id);
            module.queue_response(frame.header.command_id, 1, &[]);
        }
    });
    sim
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Runlink simulation v{}", env!("CARGO_PKG_VERSION"));

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "example.com".to_string());

    let cfg = CoreConfig::default();
    cfg.validate().map_err(anyhow::Error::msg)?;

    // ── Run loop ──────────────────────────────────────────────
    let power = Arc::new(PowerFlags::new());
    let mut rl = RunLoop::new(Rc::new(SystemClock::new()), power);

    let heartbeat = rl
        .scheduler()
        .create_timer(500, TimerMode::Repeating, |sched| {
            debug!("Sim: heartbeat at {} ms", sched.now_ms());
        });
    rl.scheduler().start_timer(heartbeat);

    // ── Link ──────────────────────────────────────────────────
    let module = Rc::new(RefCell::new(WifiModule::new(
        simulated_module(),
        cfg.link.clone(),
    )));
    spawn_driver(rl.scheduler(), module.clone(), |frame, _| {
        info!("Sim: unsolicited cmd 0x{:04x}", frame.command_id());
    });
    module.borrow_mut().set_network_ready(true);

    // ── Lookup ────────────────────────────────────────────────
    let lookup = dns::resolve(&mut *module.borrow_mut(), rl.scheduler(), &host);
    let finished = Rc::new(Cell::new(false));
    {
        let finished = finished.clone();
        lookup.request.on_state_change(move |state| {
            debug!("Sim: request -> {:?}", state);
            if state.is_terminal() {
                finished.set(true);
            }
        });
    }

    while !finished.get() {
        if rl.iterations() >= MAX_ITERATIONS {
            bail!("lookup of {} did not finish", host);
        }
        rl.run_once();
        std::thread::sleep(Duration::from_millis(1));
    }

    let stats = module.borrow().stats();
    info!(
        "Sim: {} iterations, {} sent, {} received",
        rl.iterations(),
        stats.sent,
        stats.received
    );

    match lookup.request.state() {
        RequestState::Completed => {
            for addr in lookup.addresses() {
                info!("{} -> {}", host, addr);
            }
            Ok(())
        }
        _ => {
            let code = lookup.request.error();
            bail!("lookup of {} failed: {:?}", host, code)
        }
    }
}
