//! k-nearest-neighbours over range-normalized attributes.

use super::registry::{ClassifierFactory, ParamKind, param_bool, param_usize};
use super::{Classifier, Model, Params, check_width, decode, encode};
use crate::data::{DatasetView, Value};
use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};

pub const ID: &str = "knn";

pub fn factory() -> ClassifierFactory {
    ClassifierFactory::new(ID, "k-nearest-neighbours", build, load)
        .with_param("k", ParamKind::Integer { min: 1 }, "Number of neighbours")
        .with_param(
            "distance_weighting",
            ParamKind::Bool,
            "Weight votes by 1 / distance",
        )
}

fn build(params: &Params) -> Result<Box<dyn Classifier>, ClassifierError> {
    let k = param_usize(params, "k", 1)?;
    if k == 0 {
        return Err(ClassifierError::InvalidParam {
            name: "k".into(),
            reason: "must be >= 1".into(),
        });
    }
    Ok(Box::new(Knn {
        k,
        distance_weighting: param_bool(params, "distance_weighting", false)?,
    }))
}

fn load(bytes: &[u8]) -> Result<Box<dyn Model>, ClassifierError> {
    Ok(Box::new(decode::<KnnModel>(bytes)?))
}

#[derive(Debug, Clone)]
pub struct Knn {
    pub k: usize,
    pub distance_weighting: bool,
}

impl Classifier for Knn {
    fn id(&self) -> &str {
        ID
    }

    fn train(&self, data: DatasetView<'_>) -> Result<Box<dyn Model>, ClassifierError> {
        let schema = data.schema();
        let width = schema.width();
        let mut ranges: Vec<Option<(f64, f64)>> = vec![None; width];
        let mut rows = Vec::new();

        for (inst, label) in data.labeled() {
            for (a, value) in inst.values.iter().enumerate() {
                if let Some(v) = value.as_f64() {
                    ranges[a] = Some(match ranges[a] {
                        None => (v, v),
                        Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    });
                }
            }
            rows.push(StoredRow {
                values: inst.values.clone(),
                label,
            });
        }
        if rows.is_empty() {
            return Err(ClassifierError::RejectedData(
                "no labeled training instances".into(),
            ));
        }

        Ok(Box::new(KnnModel {
            k: self.k,
            distance_weighting: self.distance_weighting,
            num_classes: schema.num_classes(),
            width,
            ranges,
            rows,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    values: Vec<Value>,
    label: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnModel {
    k: usize,
    distance_weighting: bool,
    num_classes: usize,
    width: usize,
    ranges: Vec<Option<(f64, f64)>>,
    rows: Vec<StoredRow>,
}

impl KnnModel {
    fn normalize(&self, a: usize, v: f64) -> f64 {
        match self.ranges[a] {
            Some((lo, hi)) if hi > lo => (v - lo) / (hi - lo),
            _ => 0.0,
        }
    }

    /// Euclidean distance; a missing value on either side counts as maximal difference.
    fn distance(&self, a: &[Value], b: &[Value]) -> f64 {
        let mut sum = 0.0;
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            let diff = match (x, y) {
                (Value::Numeric(x), Value::Numeric(y)) => {
                    self.normalize(i, *x) - self.normalize(i, *y)
                }
                (Value::Nominal(x), Value::Nominal(y)) => f64::from(u8::from(x != y)),
                _ => 1.0,
            };
            sum += diff * diff;
        }
        sum.sqrt()
    }
}

impl Model for KnnModel {
    fn classifier_id(&self) -> &str {
        ID
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn distribution(&self, row: &[Value]) -> Result<Vec<f64>, ClassifierError> {
        check_width(self.width, row)?;
        let mut neighbours: Vec<(f64, usize)> = self
            .rows
            .iter()
            .map(|r| (self.distance(row, &r.values), r.label))
            .collect();
        // Stable sort keeps training order among equidistant rows
        neighbours.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut votes = vec![0.0; self.num_classes];
        for &(dist, label) in neighbours.iter().take(self.k) {
            let weight = if self.distance_weighting {
                1.0 / (dist + 1e-6)
            } else {
                1.0
            };
            votes[label] += weight;
        }
        let total: f64 = votes.iter().sum();
        Ok(votes.into_iter().map(|v| v / total).collect())
    }

    fn describe(&self) -> String {
        format!(
            "IB{} instance-based classifier\nusing {} nearest neighbour(s) for classification{}\nstored instances: {}\n",
            self.k,
            self.k,
            if self.distance_weighting {
                ", weighted by 1/distance"
            } else {
                ""
            },
            self.rows.len()
        )
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError> {
        encode(self)
    }
}
