//! Retriever contract and a file-based implementation.
//!
//! A retriever produces a [`RawTable`] for a dataset name. How the table was
//! obtained (HTTP, spreadsheet parsing, a local export) is invisible to the
//! rest of the system; the table only needs parseable period labels and
//! numeric-looking cells.

use crate::error::RetrievalError;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Unparsed table: one period label per row plus named text columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub periods: Vec<String>,
    pub columns: Vec<RawColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub cells: Vec<String>,
}

impl RawTable {
    pub fn rows(&self) -> usize {
        self.periods.len()
    }
}

/// Source of raw tables, keyed by dataset name.
pub trait Retriever: Send + Sync {
    fn fetch(&self, name: &str) -> Result<RawTable, RetrievalError>;
}

/// Reads `{raw_dir}/{name}.csv`: first column is the period label, the
/// remaining columns are series named by their header.
pub struct CsvRetriever {
    raw_dir: PathBuf,
}

impl CsvRetriever {
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.raw_dir.join(format!("{name}.csv"))
    }
}

impl Retriever for CsvRetriever {
    fn fetch(&self, name: &str) -> Result<RawTable, RetrievalError> {
        let path = self.path(name);
        let file = File::open(&path).map_err(|e| {
            let message = format!("cannot open {}: {e}", path.display());
            match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    RetrievalError::permanent(message)
                }
                _ => RetrievalError::transient(message),
            }
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| RetrievalError::permanent(format!("{}: bad header: {e}", path.display())))?
            .clone();
        if headers.len() < 2 {
            return Err(RetrievalError::permanent(format!(
                "{}: expected a period column and at least one series",
                path.display()
            )));
        }

        let mut table = RawTable {
            periods: Vec::new(),
            columns: headers
                .iter()
                .skip(1)
                .map(|h| RawColumn {
                    name: h.to_string(),
                    cells: Vec::new(),
                })
                .collect(),
        };

        for (idx, record) in reader.records().enumerate() {
            // +2: records start after the header and lines are 1-based.
            let line = idx + 2;
            let record = record.map_err(|e| {
                RetrievalError::permanent(format!("{}:{line}: {e}", path.display()))
            })?;
            table
                .periods
                .push(record.get(0).unwrap_or_default().to_string());
            for (pos, column) in table.columns.iter_mut().enumerate() {
                column
                    .cells
                    .push(record.get(pos + 1).unwrap_or_default().to_string());
            }
        }

        tracing::debug!(dataset = name, rows = table.rows(), path = %path.display(), "read raw csv");
        Ok(table)
    }
}
