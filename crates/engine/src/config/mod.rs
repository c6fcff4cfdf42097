//! Configuration module for the Stateflow engine.
//!
//! This module provides configuration loading from environment variables
//! using the `envy` crate for type-safe environment variable parsing.

mod engine;

pub use engine::{EngineConfig, FailurePolicy};
