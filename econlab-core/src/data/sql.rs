//! Relational cache backend on SQLite.
//!
//! One table per dataset (`period TEXT PRIMARY KEY` plus one `REAL` column per
//! series). Column metadata lives in `econlab_metadata`, keyed by dataset and
//! column; write time and history in `econlab_datasets`.

use super::store::{CacheStore, CachedDataset};
use crate::dataset::Dataset;
use crate::error::DataError;
use crate::metadata::{DatasetMetadata, IndicatorMetadata};
use crate::transform::Transform;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed [`CacheStore`]. The connection mutex serializes all writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DataError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn, path.display().to_string())
    }

    pub fn in_memory() -> Result<Self, DataError> {
        Self::with_connection(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, location: String) -> Result<Self, DataError> {
        setup_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    fn corruption(name: &str, reason: impl Into<String>) -> DataError {
        let reason = reason.into();
        tracing::warn!(dataset = name, %reason, "unreadable sql cache entry");
        DataError::CacheCorruption {
            name: name.to_string(),
            reason,
        }
    }
}

fn setup_schema(conn: &Connection) -> Result<(), DataError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS econlab_datasets (
            dataset TEXT PRIMARY KEY,
            written_at TEXT NOT NULL,
            history TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS econlab_metadata (
            dataset TEXT NOT NULL,
            column_key TEXT NOT NULL,
            position INTEGER NOT NULL,
            name TEXT NOT NULL,
            area TEXT NOT NULL,
            frequency TEXT NOT NULL,
            currency TEXT NOT NULL,
            inflation_adjustment TEXT NOT NULL,
            unit TEXT NOT NULL,
            seasonal_adjustment TEXT NOT NULL,
            series_type TEXT NOT NULL,
            cumulative_periods INTEGER NOT NULL,
            PRIMARY KEY (dataset, column_key)
        )",
        [],
    )?;
    Ok(())
}

/// Quote an identifier for SQLite, doubling embedded quotes.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn table_name(dataset: &str) -> String {
    quote_ident(&format!("data_{dataset}"))
}

/// SQLite folds identifier case, so column keys (and the `period` column)
/// must stay distinct after case folding.
fn check_column_keys(dataset: &Dataset) -> Result<(), DataError> {
    let mut seen = HashSet::from(["period".to_string()]);
    for key in dataset.keys() {
        if !seen.insert(key.to_lowercase()) {
            return Err(DataError::CacheError(format!(
                "column '{key}' of '{}' clashes with another column once case is ignored",
                dataset.name()
            )));
        }
    }
    Ok(())
}

struct MetadataRow {
    key: String,
    fields: [String; 8],
    cumulative_periods: i64,
}

impl MetadataRow {
    fn parse(self) -> Result<(String, IndicatorMetadata), String> {
        let [name, area, frequency, currency, inflation, unit, seasonal, series_type] = self.fields;
        let metadata = IndicatorMetadata {
            name,
            area: area.parse()?,
            frequency: frequency.parse()?,
            currency: currency.parse()?,
            inflation_adjustment: inflation.parse()?,
            unit,
            seasonal_adjustment: seasonal.parse()?,
            series_type: series_type.parse()?,
            cumulative_periods: u32::try_from(self.cumulative_periods)
                .map_err(|_| format!("invalid cumulative_periods {}", self.cumulative_periods))?,
        };
        Ok((self.key, metadata))
    }
}

impl CacheStore for SqliteStore {
    fn read(&self, name: &str) -> Result<Option<CachedDataset>, DataError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let header: Option<(String, String)> = conn
            .query_row(
                "SELECT written_at, history FROM econlab_datasets WHERE dataset = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((written_at, history)) = header else {
            return Ok(None);
        };
        let written_at = DateTime::parse_from_rfc3339(&written_at)
            .map_err(|e| Self::corruption(name, format!("bad written_at: {e}")))?
            .with_timezone(&Utc);
        let history: Vec<Transform> = serde_json::from_str(&history)
            .map_err(|e| Self::corruption(name, format!("bad history: {e}")))?;

        let mut stmt = conn.prepare(
            "SELECT column_key, name, area, frequency, currency, inflation_adjustment,
                    unit, seasonal_adjustment, series_type, cumulative_periods
             FROM econlab_metadata
             WHERE dataset = ?1
             ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok(MetadataRow {
                    key: row.get(0)?,
                    fields: [
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ],
                    cumulative_periods: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let entries = rows
            .into_iter()
            .map(MetadataRow::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| Self::corruption(name, reason))?;
        let metadata = DatasetMetadata::new(entries);

        let select_cols: Vec<String> = metadata.keys().map(quote_ident).collect();
        let sql = if select_cols.is_empty() {
            format!("SELECT period FROM {} ORDER BY period", table_name(name))
        } else {
            format!(
                "SELECT period, {} FROM {} ORDER BY period",
                select_cols.join(", "),
                table_name(name)
            )
        };
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Self::corruption(name, format!("data table: {e}")))?;
        let width = metadata.len();
        let rows = stmt
            .query_map([], |row| {
                let period: String = row.get(0)?;
                let values = (0..width)
                    .map(|i| row.get::<_, Option<f64>>(i + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((period, values))
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Self::corruption(name, format!("data rows: {e}")))?;

        let mut index = Vec::with_capacity(rows.len());
        let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(rows.len()); width];
        for (period, values) in rows {
            let date = NaiveDate::parse_from_str(&period, "%Y-%m-%d")
                .map_err(|e| Self::corruption(name, format!("bad period '{period}': {e}")))?;
            index.push(date);
            for (col, v) in columns.iter_mut().zip(values) {
                col.push(v);
            }
        }
        let keyed = metadata.keys().map(str::to_string).zip(columns).collect();
        let dataset = Dataset::new(name, index, keyed, metadata)
            .map_err(|e| Self::corruption(name, e.to_string()))?
            .with_history(history);

        Ok(Some(CachedDataset {
            dataset,
            written_at,
        }))
    }

    fn write(&self, name: &str, dataset: &Dataset) -> Result<DateTime<Utc>, DataError> {
        check_column_keys(dataset)?;
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        let table = table_name(name);

        let other: Option<String> = tx
            .query_row(
                "SELECT dataset FROM econlab_datasets
                 WHERE lower(dataset) = lower(?1) AND dataset <> ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(other) = other {
            return Err(DataError::CacheError(format!(
                "dataset '{name}' would share a table with '{other}'"
            )));
        }

        tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        let mut ddl = format!("CREATE TABLE {table} (period TEXT PRIMARY KEY");
        for key in dataset.keys() {
            ddl.push_str(&format!(", {} REAL", quote_ident(key)));
        }
        ddl.push(')');
        tx.execute(&ddl, [])?;

        {
            let placeholders: Vec<String> =
                (1..=dataset.width() + 1).map(|i| format!("?{i}")).collect();
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {table} VALUES ({})",
                placeholders.join(", ")
            ))?;
            for (row, date) in dataset.index().iter().enumerate() {
                let mut values = Vec::with_capacity(dataset.width() + 1);
                values.push(Value::Text(date.format("%Y-%m-%d").to_string()));
                for (_, column) in dataset.columns() {
                    values.push(column[row].map_or(Value::Null, Value::Real));
                }
                insert.execute(params_from_iter(values.iter()))?;
            }

            tx.execute("DELETE FROM econlab_metadata WHERE dataset = ?1", params![name])?;
            let mut meta_insert = tx.prepare(
                "INSERT INTO econlab_metadata (dataset, column_key, position, name, area,
                    frequency, currency, inflation_adjustment, unit, seasonal_adjustment,
                    series_type, cumulative_periods)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for (position, entry) in dataset.metadata().iter().enumerate() {
                let m = &entry.metadata;
                meta_insert.execute(params![
                    name,
                    entry.key,
                    position as i64,
                    m.name,
                    m.area.as_str(),
                    m.frequency.to_string(),
                    m.currency.as_str(),
                    m.inflation_adjustment.as_str(),
                    m.unit,
                    m.seasonal_adjustment.as_str(),
                    m.series_type.as_str(),
                    m.cumulative_periods as i64,
                ])?;
            }
        }

        let written_at = Utc::now();
        let history = serde_json::to_string(dataset.history())?;
        tx.execute(
            "INSERT INTO econlab_datasets (dataset, written_at, history) VALUES (?1, ?2, ?3)
             ON CONFLICT(dataset) DO UPDATE SET written_at = excluded.written_at,
                                                history = excluded.history",
            params![name, written_at.to_rfc3339(), history],
        )?;
        tx.commit()?;
        tracing::debug!(dataset = name, rows = dataset.len(), db = %self.location, "sql cache written");
        Ok(written_at)
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
