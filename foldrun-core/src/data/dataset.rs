//! In-memory labeled dataset and its schema.

use crate::error::ExperimentError;
use serde::{Deserialize, Serialize};

/// Attribute type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeKind {
    Numeric,
    Nominal { values: Vec<String> },
}

/// A single (non-class) attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
}

impl Attribute {
    pub fn numeric(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AttributeKind::Numeric,
        }
    }

    pub fn nominal(name: &str, values: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: AttributeKind::Nominal { values },
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, AttributeKind::Numeric)
    }

    /// Vocabulary of a nominal attribute, `None` for numeric ones.
    pub fn nominal_values(&self) -> Option<&[String]> {
        match &self.kind {
            AttributeKind::Nominal { values } => Some(values),
            AttributeKind::Numeric => None,
        }
    }
}

/// The class (label) attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAttribute {
    pub name: String,
    pub labels: Vec<String>,
}

/// Attribute schema shared by every instance of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub attributes: Vec<Attribute>,
    pub class: ClassAttribute,
}

impl DatasetSchema {
    pub fn new(attributes: Vec<Attribute>, class: ClassAttribute) -> Self {
        Self { attributes, class }
    }

    /// Number of attribute values per instance (class excluded).
    pub fn width(&self) -> usize {
        self.attributes.len()
    }

    pub fn num_classes(&self) -> usize {
        self.class.labels.len()
    }

    pub fn class_label(&self, index: usize) -> Option<&str> {
        self.class.labels.get(index).map(String::as_str)
    }

    /// Check that a row conforms to this schema.
    pub fn check_row(&self, row: &[Value]) -> Result<(), String> {
        if row.len() != self.width() {
            return Err(format!(
                "expected {} attribute values, got {}",
                self.width(),
                row.len()
            ));
        }
        for (attr, value) in self.attributes.iter().zip(row) {
            match (&attr.kind, value) {
                (_, Value::Missing) => {}
                (AttributeKind::Numeric, Value::Numeric(v)) if v.is_finite() => {}
                (AttributeKind::Nominal { values }, Value::Nominal(idx)) if *idx < values.len() => {}
                _ => {
                    return Err(format!(
                        "value {:?} does not fit attribute `{}`",
                        value, attr.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Numeric(f64),
    Nominal(usize),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_nominal(&self) -> Option<usize> {
        match self {
            Self::Nominal(i) => Some(*i),
            _ => None,
        }
    }
}

/// One row: attribute values plus the class label index (if known).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub values: Vec<Value>,
    pub label: Option<usize>,
}

impl Instance {
    pub fn new(values: Vec<Value>, label: Option<usize>) -> Self {
        Self { values, label }
    }
}

/// An ordered, read-only table of instances sharing one schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    name: String,
    schema: DatasetSchema,
    instances: Vec<Instance>,
}

impl Dataset {
    /// Build a dataset, checking every instance against the schema.
    pub fn new(
        name: &str,
        schema: DatasetSchema,
        instances: Vec<Instance>,
    ) -> Result<Self, ExperimentError> {
        if schema.num_classes() == 0 {
            return Err(ExperimentError::dataset(format!(
                "class attribute `{}` has no labels",
                schema.class.name
            )));
        }
        for (idx, inst) in instances.iter().enumerate() {
            schema
                .check_row(&inst.values)
                .map_err(|e| ExperimentError::dataset(format!("instance[{idx}]: {e}")))?;
            if let Some(label) = inst.label {
                if label >= schema.num_classes() {
                    return Err(ExperimentError::dataset(format!(
                        "instance[{idx}]: label index {label} out of range"
                    )));
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            schema,
            instances,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn unlabeled_count(&self) -> usize {
        self.instances.iter().filter(|i| i.label.is_none()).count()
    }

    /// Borrow a subset of the rows without copying them.
    pub fn view<'a>(&'a self, indices: &'a [usize]) -> DatasetView<'a> {
        DatasetView {
            dataset: self,
            indices,
        }
    }
}

/// A dataset restricted to a set of row indices (e.g. a training partition).
#[derive(Debug, Clone, Copy)]
pub struct DatasetView<'a> {
    dataset: &'a Dataset,
    indices: &'a [usize],
}

impl<'a> DatasetView<'a> {
    pub fn schema(&self) -> &'a DatasetSchema {
        &self.dataset.schema
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(self) -> impl Iterator<Item = &'a Instance> + 'a {
        let dataset = self.dataset;
        self.indices
            .iter()
            .filter_map(move |&i| dataset.instances.get(i))
    }

    /// Instances that carry a label, paired with it.
    pub fn labeled(self) -> impl Iterator<Item = (&'a Instance, usize)> + 'a {
        self.iter().filter_map(|inst| inst.label.map(|l| (inst, l)))
    }

    /// Per-class instance counts over the labeled rows.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.schema().num_classes()];
        for (_, label) in self.labeled() {
            counts[label] += 1;
        }
        counts
    }
}
