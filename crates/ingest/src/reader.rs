use arrow::json::WriterBuilder;
use arrow::json::writer::JsonArray;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::IngestError;

pub type Row = Map<String, Value>;

/// An artifact table normalized to rows, with the set of columns it declares.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub columns: BTreeSet<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Required columns absent from the table, in the order given.
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        // A table without rows declares nothing, and has nothing to validate either
        if self.rows.is_empty() && self.columns.is_empty() {
            return Vec::new();
        }
        required
            .iter()
            .filter(|c| !self.columns.contains(**c))
            .copied()
            .collect()
    }
}

pub struct FileReader;

impl FileReader {
    /// Read a `.parquet` artifact, or a JSON table export for any other extension.
    pub async fn read_table(path: &Path) -> Result<Table, IngestError> {
        if is_parquet(path) {
            let owned = path.to_path_buf();
            return tokio::task::spawn_blocking(move || Self::read_parquet(&owned))
                .await
                .map_err(|e| IngestError::Io {
                    path: path.to_path_buf(),
                    source: std::io::Error::other(e),
                })?;
        }

        let content = fs::read_to_string(path).await.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let value: Value = serde_json::from_str(&content).map_err(|source| IngestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let artifact = artifact_name(path);
        Self::table_from_value(&artifact, value)
    }

    /// Decode every record batch of a parquet file into rows. Columns come
    /// from the file schema, so an all-null column still counts as present.
    pub fn read_parquet(path: &Path) -> Result<Table, IngestError> {
        let parquet_error = |source| IngestError::Parquet {
            path: path.to_path_buf(),
            source,
        };
        let arrow_error = |source| IngestError::Arrow {
            path: path.to_path_buf(),
            source,
        };

        let file = std::fs::File::open(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(parquet_error)?;
        let columns: BTreeSet<String> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let batches = builder.build().map_err(parquet_error)?;

        // Nulls stay explicit so every row carries every column
        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, JsonArray>(Vec::new());
        let mut rows = 0;
        for batch in batches {
            let batch = batch.map_err(arrow_error)?;
            rows += batch.num_rows();
            writer.write(&batch).map_err(arrow_error)?;
        }
        writer.finish().map_err(arrow_error)?;

        let value: Value =
            serde_json::from_slice(&writer.into_inner()).map_err(|source| IngestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let mut table = Self::table_from_value(&artifact_name(path), value)?;
        table.columns.extend(columns);

        tracing::debug!(
            path = %path.display(),
            rows,
            columns = table.columns.len(),
            "Parquet artifact decoded"
        );
        Ok(table)
    }

    /// First existing `<stem>.parquet` or `<stem>.json` in `dir`.
    pub fn locate(dir: &Path, stem: &str) -> Option<PathBuf> {
        ARTIFACT_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", stem, ext)))
            .find(|path| path.is_file())
    }

    /// Accepts row-oriented (`[{..}, ..]`) and column-oriented
    /// (`{"col": [..]}` or `{"col": {"0": .., "1": ..}}`) tables.
    pub fn table_from_value(artifact: &str, value: Value) -> Result<Table, IngestError> {
        match value {
            Value::Array(items) => Self::from_records(artifact, items),
            Value::Object(columns) => Self::from_columns(artifact, columns),
            other => Err(IngestError::Schema {
                artifact: artifact.to_string(),
                detail: format!("expected a JSON table, found {}", json_kind(&other)),
            }),
        }
    }

    fn from_records(artifact: &str, items: Vec<Value>) -> Result<Table, IngestError> {
        let mut table = Table::default();

        for (idx, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(row) => {
                    table.columns.extend(row.keys().cloned());
                    table.rows.push(row);
                }
                other => {
                    return Err(IngestError::Schema {
                        artifact: artifact.to_string(),
                        detail: format!("row {} is {}, expected an object", idx, json_kind(&other)),
                    });
                }
            }
        }

        Ok(table)
    }

    fn from_columns(artifact: &str, columns: Map<String, Value>) -> Result<Table, IngestError> {
        let mut materialized: Vec<(String, Vec<Value>)> = Vec::with_capacity(columns.len());

        for (name, column) in columns {
            let values = match column {
                Value::Array(values) => values,
                Value::Object(indexed) => Self::indexed_values(artifact, &name, indexed)?,
                other => {
                    return Err(IngestError::Schema {
                        artifact: artifact.to_string(),
                        detail: format!("column {} is {}, expected a list", name, json_kind(&other)),
                    });
                }
            };
            materialized.push((name, values));
        }

        let len = materialized.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, values)) = materialized.iter().find(|(_, v)| v.len() != len) {
            return Err(IngestError::Schema {
                artifact: artifact.to_string(),
                detail: format!("column {} has {} values, expected {}", name, values.len(), len),
            });
        }

        let mut table = Table {
            columns: materialized.iter().map(|(name, _)| name.clone()).collect(),
            rows: vec![Row::new(); len],
        };

        for (name, values) in materialized {
            for (row, value) in table.rows.iter_mut().zip(values) {
                row.insert(name.clone(), value);
            }
        }

        Ok(table)
    }

    // Dataframe exports key each cell by its row index
    fn indexed_values(
        artifact: &str,
        column: &str,
        indexed: Map<String, Value>,
    ) -> Result<Vec<Value>, IngestError> {
        let mut cells = Vec::with_capacity(indexed.len());
        for (key, value) in indexed {
            let idx: usize = key.parse().map_err(|_| IngestError::Schema {
                artifact: artifact.to_string(),
                detail: format!("column {} has non-numeric row index {:?}", column, key),
            })?;
            cells.push((idx, value));
        }
        cells.sort_by_key(|(idx, _)| *idx);
        Ok(cells.into_iter().map(|(_, v)| v).collect())
    }
}

/// Artifact formats in order of preference.
pub const ARTIFACT_EXTENSIONS: [&str; 2] = ["parquet", "json"];

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"))
}

fn artifact_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
