//! Naive Bayes with Gaussian numeric and Laplace-smoothed nominal estimators.

use super::registry::{ClassifierFactory, ParamKind, param_f64};
use super::{Classifier, Model, Params, check_width, decode, encode};
use crate::data::{AttributeKind, DatasetView, Value};
use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};

pub const ID: &str = "naive_bayes";

const DEFAULT_MIN_STD_DEV: f64 = 1e-3;

pub fn factory() -> ClassifierFactory {
    ClassifierFactory::new(
        ID,
        "Naive Bayes (Gaussian numeric, Laplace nominal)",
        build,
        load,
    )
    .with_param(
        "min_std_dev",
        ParamKind::PositiveFloat,
        "Lower bound on per-class standard deviation of numeric attributes",
    )
}

fn build(params: &Params) -> Result<Box<dyn Classifier>, ClassifierError> {
    Ok(Box::new(NaiveBayes {
        min_std_dev: param_f64(params, "min_std_dev", DEFAULT_MIN_STD_DEV)?,
    }))
}

fn load(bytes: &[u8]) -> Result<Box<dyn Model>, ClassifierError> {
    Ok(Box::new(decode::<NaiveBayesModel>(bytes)?))
}

#[derive(Debug, Clone)]
pub struct NaiveBayes {
    pub min_std_dev: f64,
}

impl Default for NaiveBayes {
    fn default() -> Self {
        Self {
            min_std_dev: DEFAULT_MIN_STD_DEV,
        }
    }
}

/// Per-attribute, per-class estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Estimator {
    Gaussian { mean: Vec<f64>, std_dev: Vec<f64> },
    /// `probs[class][value]`
    Discrete { probs: Vec<Vec<f64>> },
}

impl Classifier for NaiveBayes {
    fn id(&self) -> &str {
        ID
    }

    fn train(&self, data: DatasetView<'_>) -> Result<Box<dyn Model>, ClassifierError> {
        // A zero floor turns a constant attribute into NaN densities
        if !(self.min_std_dev.is_finite() && self.min_std_dev > 0.0) {
            return Err(ClassifierError::InvalidParam {
                name: "min_std_dev".into(),
                reason: format!("{} must be greater than 0", self.min_std_dev),
            });
        }
        let schema = data.schema();
        let k = schema.num_classes();
        let counts = data.class_counts();
        let total: usize = counts.iter().sum();
        if total == 0 {
            return Err(ClassifierError::RejectedData(
                "no labeled training instances".into(),
            ));
        }

        let priors = counts
            .iter()
            .map(|&c| (c + 1) as f64 / (total + k) as f64)
            .collect();

        let mut estimators = Vec::with_capacity(schema.width());
        for (a, attr) in schema.attributes.iter().enumerate() {
            let estimator = match &attr.kind {
                AttributeKind::Numeric => {
                    let mut sum = vec![0.0; k];
                    let mut sum_sq = vec![0.0; k];
                    let mut n = vec![0usize; k];
                    for (inst, label) in data.labeled() {
                        if let Some(v) = inst.values[a].as_f64() {
                            sum[label] += v;
                            sum_sq[label] += v * v;
                            n[label] += 1;
                        }
                    }
                    let mut mean = vec![0.0; k];
                    let mut std_dev = vec![self.min_std_dev; k];
                    for c in 0..k {
                        if n[c] > 0 {
                            let m = sum[c] / n[c] as f64;
                            let var = (sum_sq[c] / n[c] as f64 - m * m).max(0.0);
                            mean[c] = m;
                            std_dev[c] = var.sqrt().max(self.min_std_dev);
                        }
                    }
                    Estimator::Gaussian { mean, std_dev }
                }
                AttributeKind::Nominal { values } => {
                    let mut counts = vec![vec![1.0; values.len()]; k];
                    for (inst, label) in data.labeled() {
                        if let Some(v) = inst.values[a].as_nominal() {
                            counts[label][v] += 1.0;
                        }
                    }
                    for row in &mut counts {
                        let sum: f64 = row.iter().sum();
                        row.iter_mut().for_each(|p| *p /= sum);
                    }
                    Estimator::Discrete { probs: counts }
                }
            };
            estimators.push(estimator);
        }

        Ok(Box::new(NaiveBayesModel {
            attribute_names: schema.attributes.iter().map(|a| a.name.clone()).collect(),
            labels: schema.class.labels.clone(),
            priors,
            estimators,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    attribute_names: Vec<String>,
    labels: Vec<String>,
    priors: Vec<f64>,
    estimators: Vec<Estimator>,
}

fn log_gaussian(x: f64, mean: f64, std_dev: f64) -> f64 {
    let z = (x - mean) / std_dev;
    -0.5 * z * z - std_dev.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln()
}

impl Model for NaiveBayesModel {
    fn classifier_id(&self) -> &str {
        ID
    }

    fn num_classes(&self) -> usize {
        self.priors.len()
    }

    fn distribution(&self, row: &[Value]) -> Result<Vec<f64>, ClassifierError> {
        check_width(self.estimators.len(), row)?;
        let mut log_probs: Vec<f64> = self.priors.iter().map(|p| p.ln()).collect();

        for (a, (estimator, value)) in self.estimators.iter().zip(row).enumerate() {
            match (estimator, value) {
                (_, Value::Missing) => {}
                (Estimator::Gaussian { mean, std_dev }, Value::Numeric(x)) => {
                    for (c, lp) in log_probs.iter_mut().enumerate() {
                        *lp += log_gaussian(*x, mean[c], std_dev[c]);
                    }
                }
                (Estimator::Discrete { probs }, Value::Nominal(v)) => {
                    for (c, lp) in log_probs.iter_mut().enumerate() {
                        let p = probs[c].get(*v).copied().ok_or_else(|| {
                            ClassifierError::SchemaMismatch(format!(
                                "value index {v} unknown for attribute `{}`",
                                self.attribute_names[a]
                            ))
                        })?;
                        *lp += p.ln();
                    }
                }
                _ => {
                    return Err(ClassifierError::SchemaMismatch(format!(
                        "value {value:?} does not fit attribute `{}`",
                        self.attribute_names[a]
                    )));
                }
            }
        }

        // Normalize in log space to avoid underflow
        let max = log_probs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = log_probs.iter().map(|lp| (lp - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        Ok(exp.into_iter().map(|e| e / sum).collect())
    }

    fn describe(&self) -> String {
        let mut out = String::from("Naive Bayes Classifier\n\n");
        out.push_str("Class priors:\n");
        for (label, p) in self.labels.iter().zip(&self.priors) {
            out.push_str(&format!("  {label}: {p:.4}\n"));
        }
        for (name, estimator) in self.attribute_names.iter().zip(&self.estimators) {
            out.push_str(&format!("\n{name}\n"));
            match estimator {
                Estimator::Gaussian { mean, std_dev } => {
                    for (c, label) in self.labels.iter().enumerate() {
                        out.push_str(&format!(
                            "  {label}: mean {:.4}, std. dev. {:.4}\n",
                            mean[c], std_dev[c]
                        ));
                    }
                }
                Estimator::Discrete { probs } => {
                    for (c, label) in self.labels.iter().enumerate() {
                        let formatted: Vec<String> =
                            probs[c].iter().map(|p| format!("{p:.4}")).collect();
                        out.push_str(&format!("  {label}: [{}]\n", formatted.join(", ")));
                    }
                }
            }
        }
        out
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError> {
        encode(self)
    }
}
