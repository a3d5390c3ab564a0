//! edinet-xbrl - Safe extraction and taxonomy normalization of EDINET filings
//!
//! Licensed under AGPL-3.0

pub mod archive;
pub mod assembler;
pub mod config;
pub mod model;
pub mod parser;
pub mod resolver;
pub mod selector;
mod tabular;
pub mod taxonomy;
pub mod validator;

pub use archive::{ArchiveEntries, ArchiveExtractor, ArchiveLimits};
pub use assembler::{AssemblyStats, DocumentScope, StatementAssembler};
pub use config::{ExtractConfig, TabularColumns};
pub use model::{
    AccountingStandard, Amount, FactValue, FilingStatements, LineItem, ParsingContext, PeriodKind,
    PeriodRole, PeriodValues, RawFact, StatementData, StatementType,
};
pub use parser::{DocumentFormat, ElementParser, ParsedDocument};
pub use resolver::{Resolution, TaxonomyResolver, UnresolvedReason};
pub use selector::{DocumentSelector, SelectedDocument};
pub use taxonomy::{SharedTaxonomy, Taxonomy, TaxonomyEntry};
pub use validator::{StatementValidator, ValidationProfile, ValidationReport, ValidationWarning};

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Resource limit exceeded{}: {reason}", .entry.as_ref().map(|e| format!(" at {e}")).unwrap_or_default())]
    ResourceLimitExceeded { entry: Option<String>, reason: String },

    #[error("Path traversal in archive entry {entry}")]
    PathTraversal { entry: String },

    #[error("Rejected {construct} in {document}")]
    XxeRejected { document: String, construct: String },

    #[error("Malformed document {document}: {construct}")]
    MalformedDocument { document: String, construct: String },

    #[error("No candidate document for {statement}")]
    NoCandidateDocument { statement: StatementType },

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors raised to defend against hostile input.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Error::ResourceLimitExceeded { .. } | Error::PathTraversal { .. } | Error::XxeRejected { .. }
        )
    }
}

/// Archive-to-statement pipeline over one taxonomy snapshot.
///
/// An `Extractor` holds no mutable state and can be shared across threads;
/// every call works on its own buffers.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractConfig,
    taxonomy: Arc<Taxonomy>,
    archive: ArchiveExtractor,
    selector: DocumentSelector,
    parser: ElementParser,
}

impl Extractor {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self::with_config(ExtractConfig::default(), taxonomy)
    }

    pub fn with_config(config: ExtractConfig, taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            archive: ArchiveExtractor::new().with_limits(config.limits),
            selector: DocumentSelector::new(),
            parser: ElementParser::new().with_columns(config.tabular.clone()),
            config,
            taxonomy,
        }
    }

    /// Build from configuration alone, loading the configured taxonomy file
    /// or the built-in table.
    pub fn from_config(config: ExtractConfig) -> Result<Self> {
        let taxonomy = match &config.taxonomy {
            Some(path) => Taxonomy::from_path(path)?,
            None => Taxonomy::builtin()?,
        };
        Ok(Self::with_config(config, Arc::new(taxonomy)))
    }

    /// Bind to the current snapshot of a reloadable taxonomy.
    pub fn from_shared(config: ExtractConfig, shared: &SharedTaxonomy) -> Self {
        Self::with_config(config, shared.snapshot())
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn unpack(&self, archive: &[u8]) -> Result<ArchiveEntries> {
        self.archive.extract(archive)
    }

    /// Extract one normalized statement from archive bytes.
    pub fn extract(
        &self,
        archive: &[u8],
        statement: StatementType,
        period_end: NaiveDate,
    ) -> Result<StatementData> {
        let entries = self.unpack(archive)?;
        self.extract_entries(&entries, statement, period_end)
    }

    /// Extract one statement from already unpacked entries. The preferred
    /// format is tried first; the other one is used when the first has no
    /// candidate document or the candidate is malformed.
    pub fn extract_entries(
        &self,
        entries: &ArchiveEntries,
        statement: StatementType,
        period_end: NaiveDate,
    ) -> Result<StatementData> {
        let mut failure: Option<Error> = None;

        for format in self.config.format_order() {
            let selected = match self.selector.select(entries, statement, format) {
                Ok(selected) => selected,
                Err(err @ Error::NoCandidateDocument { .. }) => {
                    if failure.is_none() {
                        failure = Some(err);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let doc = match self.parser.parse(selected.path, selected.data, format, period_end) {
                Ok(doc) => doc,
                Err(err @ Error::MalformedDocument { .. }) => {
                    warn!(
                        statement = %statement,
                        document = selected.path,
                        error = %err,
                        "document unusable, trying the other extraction path"
                    );
                    if matches!(failure, None | Some(Error::NoCandidateDocument { .. })) {
                        failure = Some(err);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let (data, _) = StatementAssembler::new(&self.taxonomy, statement)
                .assemble_document(&doc, selected.scope);
            return Ok(data);
        }

        Err(failure.unwrap_or(Error::NoCandidateDocument { statement }))
    }

    /// Extract all three statements. A statement without any candidate
    /// document comes back empty; the call only fails with
    /// `NoCandidateDocument` when no statement could be extracted.
    pub fn extract_all(&self, archive: &[u8], period_end: NaiveDate) -> Result<FilingStatements> {
        let entries = self.unpack(archive)?;
        let standard = self.selector.detect_standard(&entries);

        #[cfg(feature = "parallel")]
        let results: Vec<Result<StatementData>> = StatementType::ALL
            .as_slice()
            .par_iter()
            .map(|&statement| self.extract_entries(&entries, statement, period_end))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<StatementData>> = StatementType::ALL
            .iter()
            .map(|&statement| self.extract_entries(&entries, statement, period_end))
            .collect();

        let mut results = results.into_iter();
        let mut missing = Vec::new();
        let mut next = |statement: StatementType| -> Result<StatementData> {
            match results.next() {
                Some(Ok(data)) => Ok(data),
                Some(Err(Error::NoCandidateDocument { .. })) | None => {
                    missing.push(statement);
                    Ok(StatementData::empty(statement))
                }
                Some(Err(err)) => Err(err),
            }
        };
        let balance_sheet = next(StatementType::BalanceSheet)?;
        let income_statement = next(StatementType::IncomeStatement)?;
        let cash_flow = next(StatementType::CashFlow)?;

        if missing.len() == StatementType::ALL.len() {
            return Err(Error::NoCandidateDocument {
                statement: StatementType::BalanceSheet,
            });
        }
        debug!(standard = %standard, missing = ?missing, "filing extracted");

        Ok(FilingStatements {
            standard,
            balance_sheet,
            income_statement,
            cash_flow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_entry() {
        let err = Error::ResourceLimitExceeded {
            entry: Some("XBRL/PublicDoc/big.xbrl".to_string()),
            reason: "too large".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Resource limit exceeded at XBRL/PublicDoc/big.xbrl: too large"
        );
        assert!(err.is_security_violation());

        let err = Error::NoCandidateDocument {
            statement: StatementType::CashFlow,
        };
        assert_eq!(err.to_string(), "No candidate document for cash_flow");
        assert!(!err.is_security_violation());
    }

    #[test]
    fn test_from_config_missing_taxonomy_file() {
        let config = ExtractConfig {
            taxonomy: Some("/nonexistent/taxonomy.toml".into()),
            ..ExtractConfig::default()
        };
        assert!(matches!(Extractor::from_config(config), Err(Error::Io(_))));
    }

    #[test]
    fn test_extractor_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Extractor>();
    }
}
