//! Majority-class baseline.

use super::registry::ClassifierFactory;
use super::{Classifier, Model, Params, check_width, decode, encode};
use crate::data::{DatasetView, Value};
use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};

pub const ID: &str = "zero_r";

pub fn factory() -> ClassifierFactory {
    ClassifierFactory::new(ID, "Predicts the most frequent training class", build, load)
}

pub(crate) fn build(_params: &Params) -> Result<Box<dyn Classifier>, ClassifierError> {
    Ok(Box::new(ZeroR))
}

pub(crate) fn load(bytes: &[u8]) -> Result<Box<dyn Model>, ClassifierError> {
    Ok(Box::new(decode::<ZeroRModel>(bytes)?))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroR;

impl Classifier for ZeroR {
    fn id(&self) -> &str {
        ID
    }

    fn train(&self, data: DatasetView<'_>) -> Result<Box<dyn Model>, ClassifierError> {
        let counts = data.class_counts();
        let total: usize = counts.iter().sum();
        if total == 0 {
            return Err(ClassifierError::RejectedData(
                "no labeled training instances".into(),
            ));
        }
        Ok(Box::new(ZeroRModel {
            width: data.schema().width(),
            labels: data.schema().class.labels.clone(),
            counts,
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroRModel {
    width: usize,
    labels: Vec<String>,
    counts: Vec<usize>,
}

impl Model for ZeroRModel {
    fn classifier_id(&self) -> &str {
        ID
    }

    fn num_classes(&self) -> usize {
        self.counts.len()
    }

    fn distribution(&self, row: &[Value]) -> Result<Vec<f64>, ClassifierError> {
        check_width(self.width, row)?;
        // Laplace-smoothed class frequencies
        let total = self.counts.iter().sum::<usize>() + self.counts.len();
        Ok(self
            .counts
            .iter()
            .map(|&c| (c + 1) as f64 / total as f64)
            .collect())
    }

    fn describe(&self) -> String {
        let best = super::argmax(&self.counts.iter().map(|&c| c as f64).collect::<Vec<_>>())
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
            .unwrap_or("?");
        let mut out = format!("ZeroR predicts class value: {best}\n");
        for (label, count) in self.labels.iter().zip(&self.counts) {
            out.push_str(&format!("  {label}: {count}\n"));
        }
        out
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError> {
        encode(self)
    }
}
