//! Model store: serialized models, model descriptions and report files.
//!
//! A saved model is a single `<name>.model.json` envelope holding the
//! classifier declaration, the schema it was trained on, and the model
//! payload with its SHA-256 digest. Loading verifies the digest before the
//! registry rebuilds the model.

use crate::classifiers::{ClassifierRegistry, ClassifierSpec};
use crate::data::DatasetSchema;
use crate::error::ExperimentError;
use crate::workbench::TrainedModel;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
pub const MODEL_EXTENSION: &str = "model.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub format_version: u32,
    pub name: String,
    pub classifier: ClassifierSpec,
    pub schema: DatasetSchema,
    pub trained_on: String,
    pub training_instances: usize,
    pub created_at: DateTime<Utc>,
    pub sha256: String,
    /// Base64 of `Model::to_bytes`.
    pub payload: String,
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Replace characters that do not belong in a file name.
pub fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "model".into() } else { stem }
}

/// Write to a `.tmp` sibling, then rename over the target.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ExperimentError> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

/// Directory of saved models and their descriptions.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn model_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{MODEL_EXTENSION}", file_stem(name)))
    }

    pub fn description_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", file_stem(name)))
    }

    /// Serialize a trained model; returns the written path.
    pub fn save(&self, trained: &TrainedModel) -> Result<PathBuf, ExperimentError> {
        let bytes = trained
            .model
            .to_bytes()
            .map_err(|e| ExperimentError::model(format!("{}: {e}", trained.name)))?;
        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION,
            name: trained.name.clone(),
            classifier: trained.classifier.clone(),
            schema: trained.schema.clone(),
            trained_on: trained.trained_on.clone(),
            training_instances: trained.training_instances,
            created_at: Utc::now(),
            sha256: digest(&bytes),
            payload: STANDARD.encode(&bytes),
        };
        let path = self.model_path(&trained.name);
        write_json(&path, &envelope)?;
        tracing::info!(model = %trained.name, path = %path.display(), "Saved model");
        Ok(path)
    }

    /// Read an envelope and rebuild its model through the registry.
    pub fn load(path: &Path, registry: &ClassifierRegistry) -> Result<TrainedModel, ExperimentError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExperimentError::model(format!("Failed to read {}: {e}", path.display()))
        })?;
        let envelope: ModelEnvelope = serde_json::from_str(&content)?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(ExperimentError::model(format!(
                "{}: unsupported format version {} (expected {FORMAT_VERSION})",
                path.display(),
                envelope.format_version
            )));
        }
        let bytes = STANDARD.decode(envelope.payload.as_bytes()).map_err(|e| {
            ExperimentError::model(format!("{}: corrupt payload: {e}", path.display()))
        })?;
        if digest(&bytes) != envelope.sha256 {
            return Err(ExperimentError::model(format!(
                "{}: payload digest mismatch",
                path.display()
            )));
        }
        let model = registry.load_model(&envelope.classifier.id, &bytes)?;
        if model.classifier_id() != envelope.classifier.id {
            return Err(ExperimentError::model(format!(
                "{}: `{}` loader produced a `{}` model",
                path.display(),
                envelope.classifier.id,
                model.classifier_id()
            )));
        }
        tracing::debug!(model = %envelope.name, path = %path.display(), "Loaded model");
        Ok(TrainedModel {
            name: envelope.name,
            classifier: envelope.classifier,
            schema: envelope.schema,
            trained_on: envelope.trained_on,
            training_instances: envelope.training_instances,
            model,
        })
    }

    /// Write the human-readable model description; returns the written path.
    pub fn write_description(&self, trained: &TrainedModel) -> Result<PathBuf, ExperimentError> {
        let path = self.description_path(&trained.name);
        write_atomic(&path, trained.description().as_bytes())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::registry::ClassifierFactory;
    use crate::classifiers::zero_r;
    use crate::data::Value;
    use crate::data::dataset::tests::threshold_dataset;
    use crate::workbench::Workbench;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn trained(id: &str) -> TrainedModel {
        Workbench::new(Arc::new(ClassifierRegistry::with_builtins()))
            .train(&ClassifierSpec::new(id).named("my model/1"), &threshold_dataset(40))
            .unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let original = trained("naive_bayes");
        let path = store.save(&original).unwrap();
        assert_eq!(path, dir.path().join("my_model_1.model.json"));

        let registry = ClassifierRegistry::with_builtins();
        let restored = ModelStore::load(&path, &registry).unwrap();
        assert_eq!(restored.name, "my model/1");
        assert_eq!(restored.schema, original.schema);
        let row = [Value::Numeric(8.0), Value::Numeric(1.0)];
        assert_eq!(
            restored.model.predict(&row).unwrap(),
            original.model.predict(&row).unwrap()
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let path = store.save(&trained("zero_r")).unwrap();

        let mut envelope: ModelEnvelope =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        envelope.payload = STANDARD.encode(br#"{"width":2,"labels":["no","yes"],"counts":[0,9]}"#);
        std::fs::write(&path, serde_json::to_string(&envelope).unwrap()).unwrap();

        let err = ModelStore::load(&path, &ClassifierRegistry::with_builtins()).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn test_loader_for_wrong_classifier_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let path = store.save(&trained("zero_r")).unwrap();

        let mut envelope: ModelEnvelope =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        envelope.classifier.id = "majority".into();
        std::fs::write(&path, serde_json::to_string(&envelope).unwrap()).unwrap();

        let mut registry = ClassifierRegistry::with_builtins();
        registry.register(ClassifierFactory::new(
            "majority",
            "ZeroR under another name",
            zero_r::build,
            zero_r::load,
        ));
        let err = ModelStore::load(&path, &registry).unwrap_err();
        assert!(err.to_string().contains("produced a `zero_r` model"), "{err}");
    }

    #[test]
    fn test_write_description() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let path = store.write_description(&trained("zero_r")).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("ZeroR predicts class value"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("knn-3"), "knn-3");
        assert_eq!(file_stem("a b:c"), "a_b_c");
        assert_eq!(file_stem(""), "model");
    }
}
