//! Full-dataset training and prediction with fitted models.

use crate::classifiers::{ClassifierRegistry, ClassifierSpec, Model};
use crate::data::{Dataset, DatasetSchema};
use crate::error::ExperimentError;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A model fitted on a whole dataset, with what is needed to use it later.
#[derive(Debug)]
pub struct TrainedModel {
    pub name: String,
    pub classifier: ClassifierSpec,
    pub schema: DatasetSchema,
    pub trained_on: String,
    pub training_instances: usize,
    pub model: Box<dyn Model>,
}

impl TrainedModel {
    /// Header plus the model's own description.
    pub fn description(&self) -> String {
        format!(
            "=== {} ({}) ===\ntrained on: {} ({} instances)\nclass attribute: {}\n\n{}",
            self.name,
            self.classifier.id,
            self.trained_on,
            self.training_instances,
            self.schema.class.name,
            self.model.describe()
        )
    }
}

/// Prediction for one dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub index: usize,
    pub predicted: String,
    pub distribution: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

pub struct Workbench {
    registry: Arc<ClassifierRegistry>,
}

impl Workbench {
    pub fn new(registry: Arc<ClassifierRegistry>) -> Self {
        Self { registry }
    }

    /// Train one classifier on every labeled instance of `dataset`.
    pub fn train(
        &self,
        spec: &ClassifierSpec,
        dataset: &Dataset,
    ) -> Result<TrainedModel, ExperimentError> {
        let classifier = self.registry.instantiate(spec)?;
        let rows: Vec<usize> = dataset
            .instances()
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.label.is_some())
            .map(|(i, _)| i)
            .collect();
        let view = dataset.view(&rows);

        let model = panic::catch_unwind(AssertUnwindSafe(|| classifier.train(view)))
            .map_err(|p| {
                ExperimentError::training(format!(
                    "{} panicked: {}",
                    spec.display_name(),
                    crate::experiment::evaluator::panic_message(p.as_ref())
                ))
            })?
            .map_err(|e| ExperimentError::training(format!("{}: {e}", spec.display_name())))?;

        tracing::info!(
            classifier = spec.display_name(),
            instances = rows.len(),
            "Trained model on full dataset"
        );
        Ok(TrainedModel {
            name: spec.display_name().to_string(),
            classifier: spec.clone(),
            schema: dataset.schema().clone(),
            trained_on: dataset.name().to_string(),
            training_instances: rows.len(),
            model,
        })
    }

    /// Train every classifier; one failing classifier does not stop the others.
    pub fn train_all(
        &self,
        specs: &[ClassifierSpec],
        dataset: &Dataset,
    ) -> Vec<Result<TrainedModel, ExperimentError>> {
        specs
            .iter()
            .map(|spec| {
                let trained = self.train(spec, dataset);
                if let Err(e) = &trained {
                    tracing::warn!(classifier = spec.display_name(), "Training failed: {e}");
                }
                trained
            })
            .collect()
    }
}

/// Predict every row of `dataset`, which must share the model's schema.
pub fn predict(trained: &TrainedModel, dataset: &Dataset) -> Result<Vec<Prediction>, ExperimentError> {
    if dataset.schema() != &trained.schema {
        return Err(ExperimentError::dataset(format!(
            "dataset `{}` does not match the schema `{}` was trained on",
            dataset.name(),
            trained.name
        )));
    }
    let schema = &trained.schema;
    dataset
        .instances()
        .iter()
        .enumerate()
        .map(|(index, inst)| {
            let distribution = trained
                .model
                .distribution(&inst.values)
                .map_err(|e| ExperimentError::evaluation(format!("row {index}: {e}")))?;
            let predicted = crate::classifiers::argmax(&distribution)
                .and_then(|c| schema.class_label(c))
                .map(str::to_string)
                .ok_or_else(|| {
                    ExperimentError::evaluation(format!("row {index}: no class predicted"))
                })?;
            Ok(Prediction {
                index,
                predicted,
                distribution,
                actual: inst
                    .label
                    .and_then(|l| schema.class_label(l))
                    .map(str::to_string),
            })
        })
        .collect()
}

/// Predictions as CSV: `index,predicted,actual`.
pub fn predictions_to_csv(predictions: &[Prediction]) -> String {
    let mut out = String::from("index,predicted,actual\n");
    for p in predictions {
        out.push_str(&format!(
            "{},{},{}\n",
            p.index,
            p.predicted,
            p.actual.as_deref().unwrap_or("?")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::threshold_dataset;

    fn workbench() -> Workbench {
        Workbench::new(Arc::new(ClassifierRegistry::with_builtins()))
    }

    #[test]
    fn test_train_and_predict() {
        let ds = threshold_dataset(50);
        let trained = workbench()
            .train(&ClassifierSpec::new("knn"), &ds)
            .unwrap();
        assert_eq!(trained.training_instances, 50);
        assert!(trained.description().contains("knn"));

        let predictions = predict(&trained, &ds).unwrap();
        assert_eq!(predictions.len(), 50);
        assert!(predictions.iter().all(|p| p.actual.as_ref() == Some(&p.predicted)));

        let csv = predictions_to_csv(&predictions);
        assert!(csv.starts_with("index,predicted,actual\n0,no,no\n"));
    }

    #[test]
    fn test_train_all_keeps_going() {
        let ds = threshold_dataset(20);
        let specs = vec![
            ClassifierSpec::new("zero_r"),
            ClassifierSpec::new("svm"),
            ClassifierSpec::new("naive_bayes"),
        ];
        let results = workbench().train_all(&specs, &ds);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_predict_rejects_other_schema() {
        let trained = workbench()
            .train(&ClassifierSpec::new("zero_r"), &threshold_dataset(10))
            .unwrap();
        let schema = DatasetSchema::new(
            vec![crate::data::Attribute::numeric("other")],
            trained.schema.class.clone(),
        );
        let other = Dataset::new("other", schema, vec![]).unwrap();
        assert!(matches!(
            predict(&trained, &other),
            Err(ExperimentError::Dataset(_))
        ));
    }
}
