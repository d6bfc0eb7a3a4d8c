use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::error::{PredictError, Result};
use crate::models::{FieldValue, StudentRecord, STATUS_COLUMN};

/// Field separator of the student performance export.
pub const DELIMITER: u8 = b';';

/// A labelled cohort read from the semicolon-delimited export.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    records: Vec<StudentRecord>,
    statuses: Vec<String>,
}

impl Dataset {
    /// Builds a dataset from already parsed rows. `columns` excludes `Status`.
    pub fn new(columns: Vec<String>, records: Vec<StudentRecord>, statuses: Vec<String>) -> Result<Self> {
        if records.is_empty() {
            return Err(PredictError::EmptyDataset);
        }
        if records.len() != statuses.len() {
            return Err(PredictError::Training(format!(
                "{} records but {} status labels",
                records.len(),
                statuses.len()
            )));
        }
        Ok(Self {
            columns,
            records,
            statuses,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.columns.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    /// Reads a labelled cohort. Every row must carry a non-empty `Status`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let (headers, rows) = read_rows(reader)?;
        if !headers.iter().any(|h| h == STATUS_COLUMN) {
            return Err(PredictError::MissingColumn(STATUS_COLUMN.to_string()));
        }
        let columns: Vec<String> = headers.into_iter().filter(|h| h != STATUS_COLUMN).collect();

        let mut records = Vec::with_capacity(rows.len());
        let mut statuses = Vec::with_capacity(rows.len());
        for (index, mut record) in rows.into_iter().enumerate() {
            let status = match record.remove(STATUS_COLUMN) {
                Some(value) if !value.category_key().is_empty() => value.category_key(),
                _ => {
                    return Err(PredictError::Training(format!(
                        "row {} has no {STATUS_COLUMN} value",
                        index + 1
                    )))
                }
            };
            statuses.push(status);
            records.push(record);
        }

        Self::new(columns, records, statuses)
    }

    /// Feature columns in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    pub fn statuses(&self) -> &[String] {
        &self.statuses
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Columns holding at least one value that is not a number.
    pub fn categorical_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| {
                self.records.iter().any(|record| {
                    matches!(record.get(column), Some(FieldValue::Text(text)) if !text.is_empty())
                })
            })
            .map(String::as_str)
            .collect()
    }

    /// Raw values of `column` as encoder keys, skipping rows that lack it.
    pub fn column_keys(&self, column: &str) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|record| record.get(column))
            .map(FieldValue::category_key)
            .collect()
    }
}

/// Reads unlabelled records for scoring. Any columns are accepted.
pub fn read_records(path: &Path) -> Result<Vec<StudentRecord>> {
    let file = std::fs::File::open(path)?;
    let (_, rows) = read_rows(file)?;
    info!(path = %path.display(), rows = rows.len(), "loaded records for scoring");
    Ok(rows)
}

pub fn read_records_from<R: Read>(reader: R) -> Result<Vec<StudentRecord>> {
    let (_, rows) = read_rows(reader)?;
    Ok(rows)
}

/// Headers plus one record per row. Short rows simply omit the trailing fields.
fn read_rows<R: Read>(reader: R) -> Result<(Vec<String>, Vec<StudentRecord>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for result in reader.records() {
        let row = result?;
        let record: StudentRecord = headers
            .iter()
            .zip(row.iter())
            .map(|(name, raw)| (name.clone(), FieldValue::parse(raw)))
            .collect();
        rows.push(record);
    }

    Ok((headers, rows))
}
