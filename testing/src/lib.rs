//! Shared test fixtures for the collector workspace.
//!
//! Provides:
//! - A shared Redis testcontainer, started lazily once per test process
//! - A cluster driver that records every call and can be told to fail or
//!   hang, for startup and shutdown ordering tests

mod fixtures;
mod tracking;

pub use fixtures::*;
pub use tracking::*;
