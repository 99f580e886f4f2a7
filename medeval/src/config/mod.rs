//! Configuration module for evaluation.
//!
//! It is organized into two submodules:
//! - `core`: Contains the configuration structures
//! - `enums`: Contains the enumeration types used in configurations

pub mod core;
pub mod enums;

pub use core::{ClassLabel, EvaluationConfig, LossOptions, MetricOptions, ModelConfig};
pub(crate) use core::check_tversky_parameters;

pub use enums::{Average, ProblemType, Reduction};
