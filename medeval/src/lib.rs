//! `medeval`: evaluation metrics and training losses for medical imaging with Burn.
//!
//! The crate covers segmentation (Dice, surface distances, NSD, overlap counts),
//! classification and regression statistics, image synthesis quality measures and the
//! matching differentiable losses. [`LossFunction`] and [`MetricKind`] map the names
//! used in configuration files to their implementations, and
//! [`generate_metrics_dict`] evaluates a whole CSV of predictions.

pub mod config;
pub mod error;
pub mod generate;
pub mod io;
pub mod losses;
pub mod metrics;


#[doc(inline)]
pub use config::{
    Average, ClassLabel, EvaluationConfig, LossOptions, MetricOptions, ModelConfig, ProblemType,
    Reduction,
};
#[doc(inline)]
pub use error::{MedEvalError, MedEvalResult};
#[doc(inline)]
pub use generate::{generate_metrics_dict, MetricsReport};
#[doc(inline)]
pub use io::{read_image, LoadedImage};
#[doc(inline)]
pub use losses::LossFunction;
#[doc(inline)]
pub use metrics::{metrics_for, MetricKind, MetricValue};
