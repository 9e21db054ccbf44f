//! Fakes shared by the runner integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use econlab_core::{
    CacheStore, CachedDataset, DataError, Dataset, MemoryStore, RawColumn, RawTable, Registry,
    RetrievalError, Retriever,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const REGISTRY: &str = r#"
    [datasets.cpi]
    source = "ine"
    frequency = "monthly"
    indicator = { area = "prices", unit = "index", type = "stock" }

    [datasets.nxr]
    source = "bcu"
    frequency = "monthly"
    indicator = { area = "prices", unit = "UYU/USD", type = "stock", currency = "none" }

    [datasets.wages]
    source = "ine"
    frequency = "monthly"
    revise_rows = 2
    indicator = { area = "labor", unit = "millions", type = "flow" }
    transforms = [{ type = "resample", rule = "quarterly", operation = "sum" }]

    [datasets.slow]
    source = "test"
    frequency = "monthly"
    indicator = { area = "activity", unit = "units", type = "flow" }
"#;

pub fn registry() -> Registry {
    Registry::from_toml_str(REGISTRY).unwrap()
}

/// Monthly raw table starting January 2024, one column named `value`.
pub fn raw_monthly(start_month: u32, values: &[f64]) -> RawTable {
    let periods = (0..values.len() as u32)
        .map(|i| {
            let m0 = start_month - 1 + i;
            format!("{}-{:02}", 2024 + m0 / 12, m0 % 12 + 1)
        })
        .collect();
    RawTable {
        periods,
        columns: vec![RawColumn {
            name: "value".into(),
            cells: values.iter().map(|v| v.to_string()).collect(),
        }],
    }
}

/// Dataset exactly as the reconciler would build it from `raw`.
pub fn normalized(registry: &Registry, name: &str, raw: &RawTable) -> Dataset {
    Dataset::from_raw(registry.require(name).unwrap(), raw).unwrap()
}

enum Script {
    Fixed(RawTable),
    Sequence(Mutex<VecDeque<Result<RawTable, RetrievalError>>>),
    Slow(RawTable, Duration),
}

/// Retriever answering from per-name scripts and counting calls.
#[derive(Default)]
pub struct ScriptedRetriever {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, table: RawTable) -> Self {
        self.scripts.insert(name.into(), Script::Fixed(table));
        self
    }

    /// Answers in order; the last answer repeats.
    pub fn with_sequence(mut self, name: &str, answers: Vec<Result<RawTable, RetrievalError>>) -> Self {
        self.scripts
            .insert(name.into(), Script::Sequence(Mutex::new(answers.into())));
        self
    }

    pub fn with_delay(mut self, name: &str, table: RawTable, delay: Duration) -> Self {
        self.scripts.insert(name.into(), Script::Slow(table, delay));
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl Retriever for ScriptedRetriever {
    fn fetch(&self, name: &str) -> Result<RawTable, RetrievalError> {
        *self.calls.lock().unwrap().entry(name.into()).or_default() += 1;
        match self.scripts.get(name) {
            None => Err(RetrievalError::permanent(format!("no source for {name}"))),
            Some(Script::Fixed(table)) => Ok(table.clone()),
            Some(Script::Slow(table, delay)) => {
                std::thread::sleep(*delay);
                Ok(table.clone())
            }
            Some(Script::Sequence(answers)) => {
                let mut answers = answers.lock().unwrap();
                if answers.len() > 1 {
                    answers.pop_front().unwrap()
                } else {
                    answers.front().cloned().unwrap()
                }
            }
        }
    }
}

/// In-memory store counting every read and write.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    writes: AtomicUsize,
    corrupt: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, name: &str, dataset: Dataset, written_at: DateTime<Utc>) {
        self.inner.insert(name, dataset, written_at);
    }

    /// The next read reports corruption.
    pub fn corrupt_next_read(&self) {
        self.corrupt.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, name: &str) -> Option<CachedDataset> {
        self.inner.read(name).unwrap()
    }
}

impl CacheStore for CountingStore {
    fn read(&self, name: &str) -> Result<Option<CachedDataset>, DataError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.corrupt.swap(false, Ordering::SeqCst) {
            return Err(DataError::CacheCorruption {
                name: name.into(),
                reason: "checksum mismatch".into(),
            });
        }
        self.inner.read(name)
    }

    fn write(&self, name: &str, dataset: &Dataset) -> Result<DateTime<Utc>, DataError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(name, dataset)
    }

    fn location(&self) -> String {
        "counting".into()
    }
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(hours)
}
