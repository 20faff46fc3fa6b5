//! Classifier capability boundary and the built-in reference classifiers.
//!
//! The experiment engine only depends on the [`Classifier`] and [`Model`]
//! traits. Concrete implementations are resolved by identifier through the
//! [`ClassifierRegistry`]; the small classifiers shipped here exist so the
//! engine can be exercised end to end.

pub mod knn;
pub mod naive_bayes;
pub mod registry;
pub mod zero_r;

pub use registry::{ClassifierFactory, ClassifierRegistry, ParamKind, ParamSpec};

use crate::data::{DatasetView, Value};
use crate::error::ClassifierError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hyperparameters as declared in configuration.
pub type Params = BTreeMap<String, serde_json::Value>;

/// A configuration-level classifier declaration: identifier plus hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    pub id: String,
    /// Display name; defaults to the identifier. Must be unique within an experiment.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Params,
}

impl ClassifierSpec {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            params: Params::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An untrained classifier with its hyperparameters bound.
pub trait Classifier: Send + Sync {
    /// Registry identifier.
    fn id(&self) -> &str;

    /// Fit a model on the given rows.
    fn train(&self, data: DatasetView<'_>) -> Result<Box<dyn Model>, ClassifierError>;
}

/// A fitted model.
pub trait Model: Send + Sync + std::fmt::Debug {
    fn classifier_id(&self) -> &str;

    fn num_classes(&self) -> usize;

    /// Class probability estimates for a row; sums to 1.
    fn distribution(&self, row: &[Value]) -> Result<Vec<f64>, ClassifierError>;

    /// Most probable class index (ties go to the lowest index).
    fn predict(&self, row: &[Value]) -> Result<usize, ClassifierError> {
        let dist = self.distribution(row)?;
        argmax(&dist).ok_or_else(|| ClassifierError::Untrained("empty distribution".into()))
    }

    /// Human-readable description of the fitted model.
    fn describe(&self) -> String;

    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError>;
}

pub(crate) fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

pub(crate) fn check_width(expected: usize, row: &[Value]) -> Result<(), ClassifierError> {
    if row.len() != expected {
        return Err(ClassifierError::SchemaMismatch(format!(
            "model expects {expected} attributes, row has {}",
            row.len()
        )));
    }
    Ok(())
}

pub(crate) fn encode<T: Serialize>(model: &T) -> Result<Vec<u8>, ClassifierError> {
    serde_json::to_vec(model).map_err(|e| ClassifierError::Encoding(e.to_string()))
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ClassifierError> {
    serde_json::from_slice(bytes).map_err(|e| ClassifierError::Encoding(e.to_string()))
}
