//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use pvengine_rs::{EngineConfig, PvEngine};
use std::time::Duration;

/// Engine with a fixed noise seed
pub fn test_engine() -> PvEngine {
    PvEngine::new(EngineConfig::default().with_seed(0x5eed))
}

/// Clock position `s` seconds after the display started
pub fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

/// Numeric value of a PV, panicking if it has none
pub fn number(engine: &PvEngine, name: &str) -> f64 {
    engine
        .get_value(name)
        .unwrap_or_else(|| panic!("{} has no value", name))
        .to_number()
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
