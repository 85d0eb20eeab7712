//! Link and input configuration parameters
//!
//! All tunable parameters for the run loop and the module link.
//! Values can be overridden by the board layer before the link is created.

use serde::{Deserialize, Serialize};

/// Largest management payload the module accepts in one frame.
pub const LINK_MAX_PAYLOAD: usize = 872;

/// Core configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub link: LinkConfig,
    pub input: InputConfig,
}

impl CoreConfig {
    /// Reject values that would hang the link or disable debouncing logic.
    pub fn validate(&self) -> Result<(), &'static str> {
        self.link.validate()?;
        self.input.validate()
    }
}

/// Module link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    // --- Limits ---
    /// Maximum frame payload in bytes (before 4-byte padding)
    pub max_payload: usize,
    /// Outbound frames that may wait behind the in-flight one
    pub outbound_capacity: usize,

    // --- Control-step retries ---
    /// How many BUSY answers a control step tolerates before failing
    pub busy_retry_limit: u16,
    /// Backoff after each BUSY answer (microseconds)
    pub busy_backoff_us: u32,
    /// Dummy reads spent waiting for START_TOKEN
    pub start_token_retries: u16,

    // --- Response timing ---
    /// Budget for the module to answer an in-flight request (milliseconds)
    pub response_timeout_ms: u32,
    /// Interval between input polls in the blocking commit path (microseconds)
    pub sync_poll_interval_us: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            // Limits
            max_payload: LINK_MAX_PAYLOAD,
            outbound_capacity: 8,

            // Control-step retries
            busy_retry_limit: 16,
            busy_backoff_us: 50,
            start_token_retries: 64,

            // Response timing
            response_timeout_ms: 2000,
            sync_poll_interval_us: 500,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_payload == 0 || self.max_payload > LINK_MAX_PAYLOAD {
            return Err("max_payload out of range");
        }
        if self.outbound_capacity == 0 {
            return Err("outbound_capacity must be non-zero");
        }
        if self.start_token_retries == 0 {
            return Err("start_token_retries must be non-zero");
        }
        if self.response_timeout_ms == 0 || self.sync_poll_interval_us == 0 {
            return Err("response timing must be non-zero");
        }
        Ok(())
    }

    /// Number of input polls the blocking commit path spends before giving up.
    pub fn sync_poll_budget(&self) -> u32 {
        let budget_us = u64::from(self.response_timeout_ms) * 1000;
        (budget_us / u64::from(self.sync_poll_interval_us.max(1))).max(1) as u32
    }
}

/// Deferred interrupt configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// Level must stay asserted this long before an edge is delivered (0 = no debounce)
    pub debounce_ms: u32,
    /// Ignore further edges while one is pending
    pub deactivate_until_handled: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 20,
            deactivate_until_handled: true,
        }
    }
}

impl InputConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.debounce_ms > 1000 {
            return Err("debounce_ms above one second");
        }
        Ok(())
    }
}
