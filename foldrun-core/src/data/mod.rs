//! Dataset representation and loading.

pub mod dataset;
pub mod source;

pub use dataset::{
    Attribute, AttributeKind, ClassAttribute, Dataset, DatasetSchema, DatasetView, Instance, Value,
};
pub use source::CsvSource;
