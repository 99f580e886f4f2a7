//! Metrics report generation from an evaluation CSV.
//!
//! The CSV lists one subject per row with its `SubjectID`, `Prediction` and `Target`
//! columns (matched case-insensitively). Classification and regression tables hold
//! numbers and produce whole-dataset statistics; segmentation and synthesis tables
//! hold image paths and produce one entry per subject.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use burn::{
    backend::{ndarray::NdArrayDevice, NdArray},
    tensor::{ElementConversion, Tensor, TensorData},
};
use burn_extra_ops::TensorExtraOps;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    config::{EvaluationConfig, ProblemType},
    error::{MedEvalError, MedEvalResult},
    io::{read_image, LoadedImage},
    losses::dice,
    metrics::{
        mean_squared_error, ncc_statistics,
        overall_stats,
        segmentation::{class_counts, class_surface_distances},
        structural_similarity_index,
        synthesis::psnr,
        ChannelData, OverallStats,
    },
};

type HostBackend = NdArray<f32>;

const SUBJECT_ID: &str = "subjectid";
const PREDICTION: &str = "prediction";
const TARGET: &str = "target";

/// Segmentation scores of one class of one subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassReport {
    pub dice: f64,
    pub nsd: f64,
    pub hd100: f64,
    pub hd95: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

/// A value in a subject entry: class scores keyed by class index, or a single number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubjectValue {
    Class(ClassReport),
    Number(f64),
}

/// Metrics of one subject.
pub type SubjectReport = BTreeMap<String, SubjectValue>;

/// Generated metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricsReport {
    /// Whole-dataset statistics (classification, regression).
    Overall(OverallStats),
    /// One entry per subject ID (segmentation, synthesis).
    Subjects(BTreeMap<String, SubjectReport>),
}

impl MetricsReport {
    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be serialized.
    pub fn to_json(&self) -> MedEvalResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Entry of `subject`, for per-subject reports.
    pub fn subject(&self, subject: &str) -> Option<&SubjectReport> {
        match self {
            Self::Subjects(subjects) => subjects.get(subject),
            Self::Overall(_) => None,
        }
    }
}

/// One row of the evaluation CSV.
#[derive(Debug, Clone)]
struct Row {
    subject: String,
    prediction: String,
    target: String,
}

/// Generates the metrics report of `input_csv` under `config`.
///
/// # Arguments
/// * `input_csv` - Table with `SubjectID`, `Prediction` and `Target` columns
/// * `config` - Evaluation configuration; the problem type decides what is computed
/// * `output` - When given, the report is also written there as pretty JSON
///
/// # Errors
///
/// Returns an error for unreadable or incomplete CSV files, unreadable images,
/// mismatched prediction / target geometry, or problem types without a report.
pub fn generate_metrics_dict(
    input_csv: impl AsRef<Path>,
    config: &EvaluationConfig,
    output: Option<&Path>,
) -> MedEvalResult<MetricsReport> {
    let input_csv = input_csv.as_ref();
    let rows = read_rows(input_csv)?;
    let problem_type = config.problem_type();
    info!(
        csv = %input_csv.display(),
        subjects = rows.len(),
        %problem_type,
        "generating metrics"
    );

    let report = match problem_type {
        ProblemType::Classification | ProblemType::Regression => {
            let predictions = parse_column(&rows, PREDICTION, |row| &row.prediction)?;
            let targets = parse_column(&rows, TARGET, |row| &row.target)?;
            MetricsReport::Overall(overall_stats(&predictions, &targets, config)?)
        }
        ProblemType::Segmentation => MetricsReport::Subjects(per_subject(&rows, |row| {
            segmentation_subject(row, config)
        })?),
        ProblemType::Synthesis => MetricsReport::Subjects(per_subject(&rows, |row| {
            synthesis_subject(row, config)
        })?),
    };

    let json = report.to_json()?;
    debug!("{json}");
    if let Some(output) = output {
        fs::write(output, &json).map_err(|source| MedEvalError::Io {
            path: output.to_path_buf(),
            source,
        })?;
        info!(path = %output.display(), "metrics written");
    }

    Ok(report)
}

fn read_rows(path: &Path) -> MedEvalResult<Vec<Row>> {
    let csv_error = |source| MedEvalError::CsvReadFailed {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;

    let headers = reader.headers().map_err(csv_error)?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
            .ok_or_else(|| MedEvalError::MissingColumn {
                column: name.to_string(),
            })
    };
    let subject = column(SUBJECT_ID)?;
    let prediction = column(PREDICTION)?;
    let target = column(TARGET)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let field = |index: usize| record.get(index).unwrap_or_default().trim().to_string();
        rows.push(Row {
            subject: field(subject),
            prediction: field(prediction),
            target: field(target),
        });
    }
    Ok(rows)
}

fn parse_column(
    rows: &[Row],
    column: &str,
    field: impl Fn(&Row) -> &String,
) -> MedEvalResult<Vec<f64>> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let value = field(row);
            value.parse::<f64>().map_err(|_| MedEvalError::InvalidCsvValue {
                column: column.to_string(),
                row: index,
                value: value.clone(),
            })
        })
        .collect()
}

fn per_subject(
    rows: &[Row],
    evaluate: impl Fn(&Row) -> MedEvalResult<SubjectReport>,
) -> MedEvalResult<BTreeMap<String, SubjectReport>> {
    let mut subjects = BTreeMap::new();
    for row in rows {
        debug!(subject = %row.subject, "evaluating subject");
        subjects.insert(row.subject.clone(), evaluate(row)?);
    }
    Ok(subjects)
}

/// Reads the prediction and target images of `row` and checks they share a grid.
fn read_pair(row: &Row) -> MedEvalResult<(LoadedImage, LoadedImage)> {
    let prediction_path = PathBuf::from(&row.prediction);
    let target_path = PathBuf::from(&row.target);
    let prediction = read_image(&prediction_path)?;
    let target = read_image(&target_path)?;

    if prediction.shape != target.shape {
        return Err(MedEvalError::GeometryMismatch {
            prediction: prediction_path,
            target: target_path,
            reason: format!("shape {:?} vs {:?}", prediction.shape, target.shape),
        });
    }
    Ok((prediction, target))
}

/// `[1, 1, spatial...]` tensor of `image`.
fn subject_tensor<const D: usize>(image: &LoadedImage) -> MedEvalResult<Tensor<HostBackend, D>> {
    if image.ndim() + 2 != D {
        return Err(MedEvalError::shape(
            format!("{} spatial axes", D - 2),
            &image.shape,
        ));
    }
    let shape = [&[1, 1][..], &image.shape].concat();
    Ok(Tensor::from_data(
        TensorData::new(image.data.clone(), shape),
        &NdArrayDevice::default(),
    ))
}

fn segmentation_subject(row: &Row, config: &EvaluationConfig) -> MedEvalResult<SubjectReport> {
    let (prediction, target) = read_pair(row)?;

    let mut subject_config = config.clone();
    subject_config.subject_spacing = Some(target.spacing.clone());
    // every class channel is evaluated, whatever the validation settings
    subject_config.model.ignore_label_validation = None;

    match target.ndim() {
        2 => segmentation_scores::<4>(&prediction, &target, &subject_config),
        3 => segmentation_scores::<5>(&prediction, &target, &subject_config),
        _ => Err(MedEvalError::shape("2D or 3D images", &target.shape)),
    }
}

fn segmentation_scores<const D: usize>(
    prediction: &LoadedImage,
    target: &LoadedImage,
    config: &EvaluationConfig,
) -> MedEvalResult<SubjectReport> {
    let classes = &config.model.class_list;
    if classes.is_empty() {
        return Err(MedEvalError::config("segmentation needs a class list"));
    }

    let prediction = subject_tensor::<D>(prediction)?.one_hot_classes(classes);
    let target = subject_tensor::<D>(target)?.one_hot_classes(classes);
    let prediction_host = ChannelData::from_tensor(prediction.clone())?;
    let target_host = ChannelData::from_tensor(target.clone())?;
    let threshold = config.metrics.threshold;

    let mut report = SubjectReport::new();
    for class in 0..classes.len() {
        let overlap = dice(
            prediction.clone().narrow(1, class, 1),
            target.clone().narrow(1, class, 1),
        )
        .into_scalar()
        .elem::<f64>();
        let distances = class_surface_distances(&prediction_host, &target_host, class, config)?;
        let counts = class_counts(&prediction_host, &target_host, class, threshold);

        report.insert(
            class.to_string(),
            SubjectValue::Class(ClassReport {
                dice: overlap,
                nsd: distances.nsd,
                hd100: distances.hd100,
                hd95: distances.hd95,
                sensitivity: counts.sensitivity(),
                specificity: counts.specificity(),
            }),
        );
        report.insert(
            format!("jaccard_{class}"),
            SubjectValue::Number(counts.jaccard()),
        );
    }
    Ok(report)
}

fn synthesis_subject(row: &Row, config: &EvaluationConfig) -> MedEvalResult<SubjectReport> {
    let (prediction, target) = read_pair(row)?;
    match target.ndim() {
        2 => synthesis_scores::<4>(&prediction, &target, config),
        3 => synthesis_scores::<5>(&prediction, &target, config),
        _ => Err(MedEvalError::shape("2D or 3D images", &target.shape)),
    }
}

fn synthesis_scores<const D: usize>(
    prediction: &LoadedImage,
    target: &LoadedImage,
    config: &EvaluationConfig,
) -> MedEvalResult<SubjectReport> {
    let (min, max) = target
        .data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &value| {
            (min.min(f64::from(value)), max.max(f64::from(value)))
        });

    let target = subject_tensor::<D>(target)?;
    let prediction = subject_tensor::<D>(prediction)?;

    let mse = mean_squared_error(target.clone(), prediction.clone())?;
    let ssim = structural_similarity_index(
        target.clone(),
        prediction.clone(),
        None,
        &config.metrics,
    )?;
    let ncc = ncc_statistics(target, prediction, config.metrics.ncc_radius)?;

    Ok(SubjectReport::from([
        ("mse".to_string(), SubjectValue::Number(mse)),
        ("rmse".to_string(), SubjectValue::Number(mse.sqrt())),
        ("psnr_0".to_string(), SubjectValue::Number(psnr(max, mse))),
        ("psnr_1".to_string(), SubjectValue::Number(psnr(max - min, mse))),
        ("ssim".to_string(), SubjectValue::Number(ssim)),
        ("ncc_mean".to_string(), SubjectValue::Number(ncc.mean)),
        ("ncc_std".to_string(), SubjectValue::Number(ncc.std)),
        ("ncc_max".to_string(), SubjectValue::Number(ncc.max)),
        ("ncc_min".to_string(), SubjectValue::Number(ncc.min)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let file = write_csv("SubjectID,Prediction,TARGET\n001,1,1\n002,0,1\n");
        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].subject, "002");
        assert_eq!(rows[1].prediction, "0");
    }

    #[test]
    fn test_missing_column() {
        let file = write_csv("SubjectID,Prediction\n001,1\n");
        let err = read_rows(file.path()).unwrap_err();
        assert!(matches!(err, MedEvalError::MissingColumn { column } if column == "target"));
    }

    #[test]
    fn test_invalid_number() {
        let file = write_csv("subjectid,prediction,target\n001,abc,1\n");
        let config = EvaluationConfig::new().with_problem_type(Some(ProblemType::Regression));
        let err = generate_metrics_dict(file.path(), &config, None).unwrap_err();
        assert!(matches!(err, MedEvalError::InvalidCsvValue { row: 0, .. }));
    }

    #[test]
    fn test_regression_report() {
        let file = write_csv("subjectid,prediction,target\n1,1.0,1.0\n2,2.0,2.0\n3,3.0,3.5\n");
        let config = EvaluationConfig::new().with_problem_type(Some(ProblemType::Regression));
        let report = generate_metrics_dict(file.path(), &config, None).unwrap();

        let MetricsReport::Overall(stats) = report else {
            panic!("expected whole-dataset statistics");
        };
        assert!((stats["mae"].mean() - 0.5 / 3.0).abs() < 1e-9);
        assert!(stats.contains_key("pearson"));
    }

    #[test]
    fn test_subject_tensor_rank() {
        let image = LoadedImage {
            data: vec![0.0, 1.0, 2.0, 3.0],
            shape: vec![2, 2],
            spacing: vec![1.0, 1.0],
        };
        assert_eq!(subject_tensor::<4>(&image).unwrap().dims(), [1, 1, 2, 2]);
        assert!(subject_tensor::<5>(&image).is_err());
    }

    #[test]
    fn test_segmentation_scores_per_class() {
        let target = LoadedImage {
            data: vec![
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 1.0, 0.0, //
                0.0, 1.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ],
            shape: vec![4, 4],
            spacing: vec![1.0, 1.0],
        };
        let config = EvaluationConfig::new().with_model(
            crate::config::ModelConfig::new().with_class_list(vec![0.into(), 1.into()]),
        );

        let report = segmentation_scores::<4>(&target, &target, &config).unwrap();
        for class in ["0", "1"] {
            let Some(SubjectValue::Class(scores)) = report.get(class) else {
                panic!("missing class {class}");
            };
            assert!((scores.dice - 1.0).abs() < 1e-6);
            assert_eq!(scores.hd100, 0.0);
            assert_eq!(scores.nsd, 1.0);
            assert_eq!(scores.sensitivity, 1.0);
        }
        assert_eq!(report.get("jaccard_1"), Some(&SubjectValue::Number(1.0)));
    }
}
