//! Deterministic fake driver and shared entity fixtures for tests.

pub mod fake_driver;
pub mod fixtures;

pub use fake_driver::{ExecutedStatement, FakeConnection, FakeDriver, FakeOutcome};
