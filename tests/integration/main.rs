//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one subsystem through
//! the public API.  All tests run on the host with the simulated module
//! in place of SPI hardware.

mod link_tests;
mod mock_hw;
mod request_tests;
mod runloop_tests;
