//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter      | Implements    | Connects to                          |
//! |--------------|---------------|--------------------------------------|
//! | `time`       | Clock         | `std::time` / manually advanced time |
//! | `spi`        | ByteChannel   | `embedded-hal` SPI bus + data-ready  |
//! | `sim_module` | ByteChannel   | in-process model of the module       |

pub mod sim_module;
pub mod spi;
pub mod time;
