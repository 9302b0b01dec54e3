//! Headless driver for the world-history simulation kernel: map loading,
//! the batch run loop, checkpoint outputs and the parity harness.

pub mod loader;
pub mod run;
