// Candidate document selection inside an extracted filing
use crate::archive::ArchiveEntries;
use crate::assembler::DocumentScope;
use crate::model::{AccountingStandard, StatementType};
use crate::parser::DocumentFormat;
use crate::{Error, Result};
use tracing::debug;

/// File names that look like instances but hold taxonomy or manifest data.
const NON_INSTANCE_MARKERS: [&str; 9] = [
    "manifest", "linkbase", "schema", "_lab", "_pre", "_cal", "_def", "_gla", "auditdoc",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedDocument<'a> {
    pub path: &'a str,
    pub format: DocumentFormat,
    pub scope: DocumentScope,
    pub data: &'a [u8],
}

/// First-match document selection.
///
/// Only one document is chosen per statement, so facts split across
/// several instance documents are not merged and the result may be
/// partial.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentSelector;

impl DocumentSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn select<'a>(
        &self,
        entries: &'a ArchiveEntries,
        statement: StatementType,
        format: DocumentFormat,
    ) -> Result<SelectedDocument<'a>> {
        let mut candidates: Vec<(Rank, SelectedDocument<'a>)> = entries
            .iter()
            .filter_map(|(path, data)| {
                let scope = classify(path, statement, format)?;
                let doc = SelectedDocument {
                    path,
                    format,
                    scope,
                    data,
                };
                Some((Rank::of(path, scope), doc))
            })
            .collect();
        candidates.sort_by(|(a, da), (b, db)| a.cmp(b).then_with(|| da.path.cmp(db.path)));

        let (_, chosen) = candidates
            .into_iter()
            .next()
            .ok_or(Error::NoCandidateDocument { statement })?;
        debug!(
            statement = %statement,
            document = chosen.path,
            format = ?format,
            scope = ?chosen.scope,
            "document selected"
        );
        Ok(chosen)
    }

    pub fn detect_standard(&self, entries: &ArchiveEntries) -> AccountingStandard {
        AccountingStandard::detect(entries.names())
    }
}

/// Sort key: statement-specific files first, consolidated scope before
/// standalone, public documents before attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    filing_wide: bool,
    non_consolidated: bool,
    outside_public_doc: bool,
}

impl Rank {
    fn of(path: &str, scope: DocumentScope) -> Self {
        let lower = path.to_ascii_lowercase();
        Self {
            filing_wide: scope == DocumentScope::Filing,
            non_consolidated: lower.contains("nonconsolidated") || lower.contains("non-consolidated"),
            outside_public_doc: !lower.contains("publicdoc"),
        }
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

fn classify(path: &str, statement: StatementType, format: DocumentFormat) -> Option<DocumentScope> {
    let name = file_name(path);
    let lower = name.to_ascii_lowercase();
    let ext = extension(name)?;

    match format {
        DocumentFormat::Xbrl => {
            if ext != "xbrl" && ext != "xml" {
                return None;
            }
            if NON_INSTANCE_MARKERS.iter().any(|m| lower.contains(m))
                || lower.starts_with("jpaud")
                || path.to_ascii_lowercase().contains("auditdoc")
            {
                return None;
            }
            Some(DocumentScope::Filing)
        }
        DocumentFormat::Tabular => {
            if ext != "tsv" && ext != "csv" {
                return None;
            }
            if lower.starts_with("jpaud") {
                return None;
            }
            if names_statement(&lower, statement) {
                return Some(DocumentScope::Statement);
            }
            let other_statement = StatementType::ALL
                .iter()
                .any(|&s| s != statement && names_statement(&lower, s));
            (!other_statement).then_some(DocumentScope::Filing)
        }
    }
}

/// EDINET names per-statement extracts `jpcrp…{BS|PL|CF}….tsv`.
fn names_statement(lower_name: &str, statement: StatementType) -> bool {
    let Some(start) = lower_name.find("jpcrp") else {
        return false;
    };
    let token = statement.file_token().to_ascii_lowercase();
    lower_name[start + "jpcrp".len()..].contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entries(names: &[&str]) -> ArchiveEntries {
        names
            .iter()
            .map(|name| (name.to_string(), name.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_selects_instance_document() {
        let entries = entries(&[
            "XBRL/PublicDoc/jpcrp030000-asr-001_E02144-000_2024-03-31_01_2024-06-18.xbrl",
            "XBRL/PublicDoc/jpcrp030000-asr-001_E02144-000_2024-03-31_01_2024-06-18_lab.xml",
            "XBRL/PublicDoc/jpcrp030000-asr-001_E02144-000_2024-03-31_01_2024-06-18_pre.xml",
            "XBRL/PublicDoc/manifest_PublicDoc.xml",
            "XBRL/AuditDoc/jpaud-aai-cc-001_E02144-000_2024-03-31_01_2024-06-18.xbrl",
        ]);
        let doc = DocumentSelector::new()
            .select(&entries, StatementType::BalanceSheet, DocumentFormat::Xbrl)
            .unwrap();
        assert_eq!(
            doc.path,
            "XBRL/PublicDoc/jpcrp030000-asr-001_E02144-000_2024-03-31_01_2024-06-18.xbrl"
        );
        assert_eq!(doc.scope, DocumentScope::Filing);
        assert_eq!(doc.data, doc.path.as_bytes());
    }

    #[test]
    fn test_prefers_consolidated_and_lexical_order() {
        let entries = entries(&[
            "b/NonConsolidated_instance.xbrl",
            "b/instance2.xbrl",
            "a/instance.xbrl",
        ]);
        let doc = DocumentSelector::new()
            .select(&entries, StatementType::IncomeStatement, DocumentFormat::Xbrl)
            .unwrap();
        assert_eq!(doc.path, "a/instance.xbrl");
    }

    #[test]
    fn test_selects_statement_extract() {
        let entries = entries(&[
            "XBRL_TO_CSV/jpcrp030000-asr-001_E02144-000_BS.tsv",
            "XBRL_TO_CSV/jpcrp030000-asr-001_E02144-000_PL.tsv",
            "XBRL_TO_CSV/jpcrp030000-asr-001_E02144-000_CF.tsv",
        ]);
        let selector = DocumentSelector::new();
        let pl = selector
            .select(&entries, StatementType::IncomeStatement, DocumentFormat::Tabular)
            .unwrap();
        assert_eq!(pl.path, "XBRL_TO_CSV/jpcrp030000-asr-001_E02144-000_PL.tsv");
        assert_eq!(pl.scope, DocumentScope::Statement);

        let cf = selector
            .select(&entries, StatementType::CashFlow, DocumentFormat::Tabular)
            .unwrap();
        assert_eq!(cf.path, "XBRL_TO_CSV/jpcrp030000-asr-001_E02144-000_CF.tsv");
    }

    #[test]
    fn test_filing_wide_extract() {
        let entries = entries(&["XBRL_TO_CSV/jpcrp030000-asr-001_E02144-000_2024-03-31_01.csv"]);
        let doc = DocumentSelector::new()
            .select(&entries, StatementType::BalanceSheet, DocumentFormat::Tabular)
            .unwrap();
        assert_eq!(doc.scope, DocumentScope::Filing);
    }

    #[test]
    fn test_no_candidate() {
        let entries = entries(&["XBRL/PublicDoc/0101010_honbun.htm"]);
        let err = DocumentSelector::new()
            .select(&entries, StatementType::CashFlow, DocumentFormat::Xbrl)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NoCandidateDocument {
                statement: StatementType::CashFlow
            }
        ));
    }

    #[test]
    fn test_detect_standard() {
        let entries = entries(&["XBRL/PublicDoc/jpigp030000-asr-001_E02144-000_ifrs.xbrl"]);
        assert_eq!(
            DocumentSelector::new().detect_standard(&entries),
            AccountingStandard::Ifrs
        );
    }
}
