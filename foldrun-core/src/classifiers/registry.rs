//! Classifier registry: maps configuration identifiers to factories.

use super::{Classifier, ClassifierSpec, Model, Params};
use crate::error::{ClassifierError, ExperimentError};
use std::collections::HashMap;

/// Builds a classifier from validated hyperparameters.
pub type BuildFn = fn(&Params) -> Result<Box<dyn Classifier>, ClassifierError>;

/// Rebuilds a fitted model from its serialized payload.
pub type LoadFn = fn(&[u8]) -> Result<Box<dyn Model>, ClassifierError>;

/// Hyperparameter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Integer { min: i64 },
    Float { min: f64 },
    /// A finite number strictly greater than zero.
    PositiveFloat,
    Bool,
}

/// Declared hyperparameter of a classifier.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
}

impl ParamSpec {
    fn check(&self, value: &serde_json::Value) -> Result<(), String> {
        match self.kind {
            ParamKind::Integer { min } => match value.as_i64() {
                Some(v) if v >= min => Ok(()),
                Some(v) => Err(format!("{v} is below the minimum {min}")),
                None => Err(format!("expected an integer, got {value}")),
            },
            ParamKind::Float { min } => match value.as_f64() {
                Some(v) if v.is_finite() && v >= min => Ok(()),
                Some(v) => Err(format!("{v} is below the minimum {min}")),
                None => Err(format!("expected a number, got {value}")),
            },
            ParamKind::PositiveFloat => match value.as_f64() {
                Some(v) if v.is_finite() && v > 0.0 => Ok(()),
                Some(v) => Err(format!("{v} must be greater than 0")),
                None => Err(format!("expected a number, got {value}")),
            },
            ParamKind::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected a boolean, got {value}"))
                }
            }
        }
    }
}

/// Constructor, hyperparameter schema and model loader for one classifier type.
#[derive(Debug, Clone)]
pub struct ClassifierFactory {
    pub id: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    build: BuildFn,
    load: LoadFn,
}

impl ClassifierFactory {
    pub fn new(id: &'static str, description: &'static str, build: BuildFn, load: LoadFn) -> Self {
        Self {
            id,
            description,
            params: Vec::new(),
            build,
            load,
        }
    }

    pub fn with_param(mut self, name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        self.params.push(ParamSpec {
            name,
            kind,
            description,
        });
        self
    }

    fn validate(&self, params: &Params) -> Result<(), ExperimentError> {
        for (key, value) in params {
            let spec = self.params.iter().find(|p| p.name == key).ok_or_else(|| {
                ExperimentError::configuration(format!(
                    "classifier `{}` has no hyperparameter `{key}`",
                    self.id
                ))
            })?;
            spec.check(value).map_err(|reason| {
                ExperimentError::configuration(format!(
                    "classifier `{}` hyperparameter `{key}`: {reason}",
                    self.id
                ))
            })?;
        }
        Ok(())
    }
}

/// Registry of classifier factories, keyed by identifier.
pub struct ClassifierRegistry {
    factories: HashMap<String, ClassifierFactory>,
}

impl ClassifierRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the built-in classifiers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(super::zero_r::factory());
        registry.register(super::naive_bayes::factory());
        registry.register(super::knn::factory());
        registry
    }

    /// Register a factory, replacing any previous one with the same id.
    pub fn register(&mut self, factory: ClassifierFactory) {
        self.factories.insert(factory.id.to_string(), factory);
    }

    pub fn get(&self, id: &str) -> Option<&ClassifierFactory> {
        self.factories.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Check that a declaration names a known classifier with valid hyperparameters.
    pub fn resolve(&self, spec: &ClassifierSpec) -> Result<&ClassifierFactory, ExperimentError> {
        let factory = self.factories.get(&spec.id).ok_or_else(|| {
            ExperimentError::configuration(format!(
                "unknown classifier `{}` (known: {})",
                spec.id,
                self.list().join(", ")
            ))
        })?;
        factory.validate(&spec.params)?;
        Ok(factory)
    }

    /// Build a fresh, untrained classifier instance.
    pub fn instantiate(&self, spec: &ClassifierSpec) -> Result<Box<dyn Classifier>, ExperimentError> {
        let factory = self.resolve(spec)?;
        (factory.build)(&spec.params).map_err(|e| {
            ExperimentError::configuration(format!("classifier `{}`: {e}", spec.id))
        })
    }

    /// Rebuild a model serialized by `Model::to_bytes`.
    pub fn load_model(&self, id: &str, bytes: &[u8]) -> Result<Box<dyn Model>, ExperimentError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ExperimentError::model(format!("unknown classifier `{id}`")))?;
        (factory.load)(bytes).map_err(|e| ExperimentError::model(e.to_string()))
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Read an integer hyperparameter, falling back to `default` when absent.
pub(crate) fn param_usize(params: &Params, name: &str, default: usize) -> Result<usize, ClassifierError> {
    match params.get(name) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| ClassifierError::InvalidParam {
                name: name.to_string(),
                reason: format!("expected a non-negative integer, got {v}"),
            }),
    }
}

pub(crate) fn param_f64(params: &Params, name: &str, default: f64) -> Result<f64, ClassifierError> {
    match params.get(name) {
        None => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| ClassifierError::InvalidParam {
            name: name.to_string(),
            reason: format!("expected a number, got {v}"),
        }),
    }
}

pub(crate) fn param_bool(params: &Params, name: &str, default: bool) -> Result<bool, ClassifierError> {
    match params.get(name) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| ClassifierError::InvalidParam {
            name: name.to_string(),
            reason: format!("expected a boolean, got {v}"),
        }),
    }
}
