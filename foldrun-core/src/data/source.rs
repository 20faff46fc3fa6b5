//! CSV data source: the loader that turns a delimited text file into a `Dataset`.

use super::dataset::{Attribute, ClassAttribute, Dataset, DatasetSchema, Instance, Value};
use crate::error::ExperimentError;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Tokens read as a missing value.
const MISSING_TOKENS: &[&str] = &["", "?"];

/// CSV file data source.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub path: PathBuf,
    pub delimiter: char,
    /// Class column name; the last column when unset.
    pub class_attribute: Option<String>,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: ',',
            class_attribute: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_class_attribute(mut self, name: Option<String>) -> Self {
        self.class_attribute = name;
        self
    }

    /// Load the file, inferring the schema from its contents.
    ///
    /// A column whose non-missing cells all parse as finite numbers is numeric;
    /// any other column is nominal with its distinct values in sorted order.
    /// The class column is always nominal.
    pub fn load(&self) -> Result<Dataset, ExperimentError> {
        let (columns, rows) = self.read_table()?;
        let class_idx = self.class_column(&columns)?;

        let mut attributes = Vec::with_capacity(columns.len() - 1);
        for (col, name) in columns.iter().enumerate() {
            if col == class_idx {
                continue;
            }
            let cells: Vec<&str> = rows.iter().map(|r| r[col].as_str()).collect();
            attributes.push(infer_attribute(name, &cells));
        }
        let labels: BTreeSet<&str> = rows
            .iter()
            .map(|r| r[class_idx].as_str())
            .filter(|c| !is_missing(c))
            .collect();
        let schema = DatasetSchema::new(
            attributes,
            ClassAttribute {
                name: columns[class_idx].clone(),
                labels: labels.into_iter().map(str::to_string).collect(),
            },
        );

        let mapping: Vec<usize> = (0..columns.len()).filter(|&c| c != class_idx).collect();
        let instances = rows
            .iter()
            .enumerate()
            .map(|(line, row)| encode_row(&schema, row, &mapping, Some(class_idx), line))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            path = %self.path.display(),
            rows = instances.len(),
            attributes = schema.width(),
            classes = schema.num_classes(),
            "Loaded CSV dataset"
        );
        Dataset::new(&dataset_name(&self.path), schema, instances)
    }

    /// Load the file against a known schema (e.g. the one a model was trained on).
    ///
    /// Columns are matched by name. The class column may be absent, in which
    /// case every instance is unlabeled.
    pub fn load_with_schema(&self, schema: &DatasetSchema) -> Result<Dataset, ExperimentError> {
        let (columns, rows) = self.read_table()?;
        let by_name: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mapping = schema
            .attributes
            .iter()
            .map(|attr| {
                by_name.get(attr.name.as_str()).copied().ok_or_else(|| {
                    ExperimentError::dataset(format!(
                        "column `{}` missing from {}",
                        attr.name,
                        self.path.display()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let class_idx = by_name.get(schema.class.name.as_str()).copied();

        let instances = rows
            .iter()
            .enumerate()
            .map(|(line, row)| encode_row(schema, row, &mapping, class_idx, line))
            .collect::<Result<Vec<_>, _>>()?;
        Dataset::new(&dataset_name(&self.path), schema.clone(), instances)
    }

    fn read_table(&self) -> Result<(Vec<String>, Vec<Vec<String>>), ExperimentError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ExperimentError::dataset(format!("Failed to read {}: {e}", self.path.display()))
        })?;
        parse_table(&content, self.delimiter)
    }

    fn class_column(&self, columns: &[String]) -> Result<usize, ExperimentError> {
        if columns.len() < 2 {
            return Err(ExperimentError::dataset(
                "CSV needs at least one attribute column and a class column",
            ));
        }
        match &self.class_attribute {
            None => Ok(columns.len() - 1),
            Some(name) => columns.iter().position(|c| c == name).ok_or_else(|| {
                ExperimentError::dataset(format!("class attribute `{name}` not found in header"))
            }),
        }
    }
}

/// Split delimited text into a header and rows of trimmed cells.
///
/// Quoted cells may hold the delimiter, doubled quotes and line breaks.
pub fn parse_table(
    content: &str,
    delimiter: char,
) -> Result<(Vec<String>, Vec<Vec<String>>), ExperimentError> {
    let delimiter = u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            ExperimentError::dataset(format!("delimiter `{delimiter}` is not an ASCII character"))
        })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.is_empty() {
        return Err(ExperimentError::dataset("Empty CSV file"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != columns.len() {
            return Err(ExperimentError::dataset(format!(
                "line {}: expected {} cells, found {}",
                record.position().map_or(0, |p| p.line()),
                columns.len(),
                record.len()
            )));
        }
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok((columns, rows))
}

fn csv_error(e: csv::Error) -> ExperimentError {
    ExperimentError::dataset(format!("CSV parse error: {e}"))
}

fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell)
}

fn infer_attribute(name: &str, cells: &[&str]) -> Attribute {
    let present: Vec<&str> = cells.iter().copied().filter(|c| !is_missing(c)).collect();
    let numeric = !present.is_empty()
        && present
            .iter()
            .all(|c| c.parse::<f64>().map(f64::is_finite).unwrap_or(false));
    if numeric {
        Attribute::numeric(name)
    } else {
        let values: BTreeSet<&str> = present.into_iter().collect();
        Attribute::nominal(name, values.into_iter().map(str::to_string).collect())
    }
}

fn encode_row(
    schema: &DatasetSchema,
    row: &[String],
    mapping: &[usize],
    class_idx: Option<usize>,
    line: usize,
) -> Result<Instance, ExperimentError> {
    let mut values = Vec::with_capacity(mapping.len());
    for (attr, &col) in schema.attributes.iter().zip(mapping) {
        let cell = row[col].as_str();
        let value = if is_missing(cell) {
            Value::Missing
        } else {
            match attr.nominal_values() {
                None => cell.parse::<f64>().map(Value::Numeric).map_err(|_| {
                    ExperimentError::dataset(format!(
                        "row {line}: `{cell}` is not numeric (attribute `{}`)",
                        attr.name
                    ))
                })?,
                Some(vocab) => vocab
                    .iter()
                    .position(|v| v == cell)
                    .map(Value::Nominal)
                    .ok_or_else(|| {
                        ExperimentError::dataset(format!(
                            "row {line}: unknown value `{cell}` for attribute `{}`",
                            attr.name
                        ))
                    })?,
            }
        };
        values.push(value);
    }

    let label = match class_idx.map(|c| row[c].as_str()) {
        None => None,
        Some(cell) if is_missing(cell) => None,
        Some(cell) => Some(
            schema
                .class
                .labels
                .iter()
                .position(|l| l == cell)
                .ok_or_else(|| {
                    ExperimentError::dataset(format!("row {line}: unknown class label `{cell}`"))
                })?,
        ),
    };
    Ok(Instance::new(values, label))
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}
