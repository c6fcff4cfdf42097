//! Rule documents.
//!
//! This module provides rule parsing and validation:
//! - Type definitions for steps and programs
//! - JSON/YAML parsing

pub mod parser;
pub mod types;

pub use parser::{parse_rule, parse_rule_file, parse_rule_value, parse_rule_yaml};
pub use types::{Action, Condition, DurationUnit, FetchSpec, RuleProgram, Step, START_STEP};
