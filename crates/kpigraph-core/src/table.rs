//! Source tables and where they come from.
//!
//! Tables are immutable once loaded and shared read-only between validators.
//! `JsonlTableStore` reads the `linked_tables(<year>).jsonl` files produced by
//! the upstream table linker: one JSON object per line.

use crate::wire;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid table record: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("table not found: {0}")]
    Missing(String),
}

/// A table as the validator sees it.
///
/// `stub_col[i]` labels row `i`; `merged_headers[j]` labels column `j`, with
/// index 0 being the row-label column itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    pub table_id: String,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_string")]
    pub section_name: Option<String>,
    #[serde(default)]
    pub headers: serde_json::Value,
    #[serde(default, deserialize_with = "wire::cell_rows")]
    pub rows: Vec<Vec<String>>,
    #[serde(default, deserialize_with = "wire::labels")]
    pub stub_col: Vec<String>,
    #[serde(default, deserialize_with = "wire::labels")]
    pub merged_headers: Vec<String>,
}

impl SourceTable {
    pub fn new(table_id: impl Into<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            table_id: table_id.into(),
            rows,
            ..Self::default()
        }
    }

    pub fn with_stub_col(mut self, stub_col: Vec<String>) -> Self {
        self.stub_col = stub_col;
        self
    }

    pub fn with_merged_headers(mut self, merged_headers: Vec<String>) -> Self {
        self.merged_headers = merged_headers;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_section(mut self, section_name: impl Into<String>) -> Self {
        self.section_name = Some(section_name.into());
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Width of one (possibly ragged) row.
    pub fn row_width(&self, row: usize) -> usize {
        self.rows.get(row).map_or(0, Vec::len)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row)?.get(col).map(String::as_str)
    }

    pub fn row_label(&self, row: usize) -> Option<&str> {
        self.stub_col.get(row).map(String::as_str)
    }

    pub fn column_label(&self, col: usize) -> Option<&str> {
        self.merged_headers.get(col).map(String::as_str)
    }

    /// Human description used in error messages: `"12 rows x 5 cols"`.
    pub fn dimensions(&self) -> String {
        let cols = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        format!("{} rows x {} cols", self.rows.len(), cols)
    }

    pub fn title_or_unknown(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }

    pub fn section_or_unknown(&self) -> &str {
        self.section_name.as_deref().unwrap_or("Unknown")
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Lookup of source tables by id.
pub trait TableProvider: Send + Sync {
    fn table(&self, table_id: &str) -> Option<Arc<SourceTable>>;

    fn require(&self, table_id: &str) -> Result<Arc<SourceTable>, TableError> {
        self.table(table_id)
            .ok_or_else(|| TableError::Missing(table_id.to_string()))
    }
}

/// In-memory table store, usually loaded from a JSONL file.
#[derive(Debug, Clone, Default)]
pub struct JsonlTableStore {
    tables: HashMap<String, Arc<SourceTable>>,
    order: Vec<String>,
}

impl JsonlTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: impl IntoIterator<Item = SourceTable>) -> Self {
        let mut store = Self::new();
        for table in tables {
            store.insert(table);
        }
        store
    }

    /// Load one JSONL file. Blank lines are skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, path)
    }

    pub fn from_reader(reader: impl Read, origin: &Path) -> Result<Self, TableError> {
        let mut store = Self::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line.map_err(|source| TableError::Io {
                path: origin.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let table: SourceTable =
                serde_json::from_str(&line).map_err(|source| TableError::Parse {
                    path: origin.to_path_buf(),
                    line: idx + 1,
                    source,
                })?;
            store.insert(table);
        }
        tracing::debug!(path = %origin.display(), tables = store.len(), "loaded tables");
        Ok(store)
    }

    /// Insert or replace a table. Replacement keeps the original position.
    pub fn insert(&mut self, table: SourceTable) {
        let id = table.table_id.clone();
        if self.tables.insert(id.clone(), Arc::new(table)).is_none() {
            self.order.push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Table ids in load order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl TableProvider for JsonlTableStore {
    fn table(&self, table_id: &str) -> Option<Arc<SourceTable>> {
        self.tables.get(table_id).cloned()
    }
}

/// Year encoded in a dataset file name, e.g. `linked_tables(2021).jsonl` or
/// `valid_kpis_2021.json`.
pub fn year_from_file_name(name: &str) -> Option<i32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?:\(|_)((?:19|20)\d{2})(?:\)|\.|_)").expect("year pattern"));
    re.captures(name)?.get(1)?.as_str().parse().ok()
}
