//! Enumeration types for evaluation configuration.
//!
//! This module contains the enumeration types that select problem types, reductions
//! and averaging modes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::MedEvalError;

/// The kind of learning problem a model solves.
///
/// The problem type selects which metrics apply and how raw model outputs are turned
/// into class decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemType {
    /// Dense per-voxel labelling.
    Segmentation,
    /// Continuous-valued prediction.
    Regression,
    /// Per-sample class prediction.
    Classification,
    /// Image-to-image generation.
    Synthesis,
}

impl ProblemType {
    /// Lower-case name used in configuration files and reports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Segmentation => "segmentation",
            Self::Regression => "regression",
            Self::Classification => "classification",
            Self::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProblemType {
    type Err = MedEvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "segmentation" => Ok(Self::Segmentation),
            "regression" => Ok(Self::Regression),
            "classification" => Ok(Self::Classification),
            "synthesis" => Ok(Self::Synthesis),
            other => Err(MedEvalError::config(format!("Unknown problem type: {other}"))),
        }
    }
}

/// Reduction applied to element-wise loss values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduction {
    /// Keep every element (flattened).
    None,
    /// Average of all elements.
    #[default]
    Mean,
    /// Sum of all elements.
    Sum,
}

/// Averaging mode for confusion-matrix based metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    /// Pool the counts of all classes before computing the score.
    Micro,
    /// Unweighted mean of the per-class scores.
    Macro,
    /// Mean of the per-class scores weighted by class support.
    #[default]
    Weighted,
    /// Report every per-class score.
    None,
}

impl Average {
    /// Suffix used for this averaging mode in the overall statistics report.
    pub const fn report_suffix(&self) -> &'static str {
        match self {
            Self::Micro => "global",
            Self::None => "per_class",
            Self::Macro => "per_class_average",
            Self::Weighted => "per_class_weighted",
        }
    }

    /// All averaging modes in report order.
    pub const ALL: [Self; 4] = [Self::Micro, Self::None, Self::Macro, Self::Weighted];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_type_round_trip_names() {
        for problem in [
            ProblemType::Segmentation,
            ProblemType::Regression,
            ProblemType::Classification,
            ProblemType::Synthesis,
        ] {
            assert_eq!(problem.as_str().parse::<ProblemType>().unwrap(), problem);
        }
        assert!("detection".parse::<ProblemType>().is_err());
    }

    #[test]
    fn test_enums_deserialize_lowercase() {
        let reduction: Reduction = serde_json::from_str("\"sum\"").unwrap();
        assert_eq!(reduction, Reduction::Sum);

        let average: Average = serde_json::from_str("\"macro\"").unwrap();
        assert_eq!(average, Average::Macro);
        assert_eq!(average.report_suffix(), "per_class_average");
    }
}
