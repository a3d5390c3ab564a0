//! Declarative configuration for the extraction pipeline.

use crate::archive::ArchiveLimits;
use crate::parser::DocumentFormat;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Header names accepted for each column of a tabular extract. The first
/// header matching any candidate wins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TabularColumns {
    pub element: Vec<String>,
    pub context: Vec<String>,
    pub value: Vec<String>,
    pub unit: Vec<String>,
    pub decimals: Vec<String>,
    pub relative_period: Vec<String>,
    pub scope: Vec<String>,
    pub period_kind: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for TabularColumns {
    fn default() -> Self {
        Self {
            element: names(&["要素ID", "element", "ElementId"]),
            context: names(&["コンテキストID", "context", "ContextId"]),
            value: names(&["値", "value", "Value"]),
            unit: names(&["ユニットID", "unit", "Unit"]),
            decimals: names(&["decimals", "Decimals"]),
            relative_period: names(&["相対年度"]),
            scope: names(&["連結・個別"]),
            period_kind: names(&["期間・時点"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub limits: ArchiveLimits,
    /// Extraction path tried first; the other one is the fallback.
    pub prefer: DocumentFormat,
    pub tabular: TabularColumns,
    /// External taxonomy file. `None` uses the built-in table.
    pub taxonomy: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            limits: ArchiveLimits::default(),
            prefer: DocumentFormat::Xbrl,
            tabular: TabularColumns::default(),
            taxonomy: None,
        }
    }
}

impl ExtractConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn with_limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_preference(mut self, prefer: DocumentFormat) -> Self {
        self.prefer = prefer;
        self
    }

    /// Formats in the order the pipeline tries them.
    pub fn format_order(&self) -> [DocumentFormat; 2] {
        match self.prefer {
            DocumentFormat::Xbrl => [DocumentFormat::Xbrl, DocumentFormat::Tabular],
            DocumentFormat::Tabular => [DocumentFormat::Tabular, DocumentFormat::Xbrl],
        }
    }
}
