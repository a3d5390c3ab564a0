// Declarative canonical line-item table
use crate::model::{AccountingStandard, StatementType};
use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const BUILTIN: &str = include_str!("../data/taxonomy.toml");

/// Raw element names reporting one line item, per accounting standard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Aliases {
    pub jgaap: Vec<CompactString>,
    pub ifrs: Vec<CompactString>,
    pub usgaap: Vec<CompactString>,
}

impl Aliases {
    pub fn for_standard(&self, standard: AccountingStandard) -> &[CompactString] {
        match standard {
            AccountingStandard::JGaap => &self.jgaap,
            AccountingStandard::Ifrs => &self.ifrs,
            AccountingStandard::UsGaap => &self.usgaap,
            AccountingStandard::Unknown => &[],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccountingStandard, &str)> {
        tagged(AccountingStandard::JGaap, &self.jgaap)
            .chain(tagged(AccountingStandard::Ifrs, &self.ifrs))
            .chain(tagged(AccountingStandard::UsGaap, &self.usgaap))
    }

    pub fn is_empty(&self) -> bool {
        self.jgaap.is_empty() && self.ifrs.is_empty() && self.usgaap.is_empty()
    }
}

fn tagged(
    standard: AccountingStandard,
    list: &[CompactString],
) -> impl Iterator<Item = (AccountingStandard, &str)> + '_ {
    list.iter().map(move |alias| (standard, alias.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxonomyEntry {
    pub id: CompactString,
    pub label: CompactString,
    pub label_en: Option<CompactString>,
    pub statement: StatementType,
    pub aliases: Aliases,
}

/// Listing row returned by [`Taxonomy::labels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaxonomyLabel<'a> {
    pub id: &'a str,
    pub label: &'a str,
    pub label_en: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EntrySource {
    id: CompactString,
    label: CompactString,
    label_en: Option<CompactString>,
    #[serde(default)]
    aliases: Aliases,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaxonomySource {
    #[serde(default)]
    balance_sheet: Vec<EntrySource>,
    #[serde(default)]
    income_statement: Vec<EntrySource>,
    #[serde(default)]
    cash_flow: Vec<EntrySource>,
}

#[derive(Debug, Clone, Default)]
struct StatementTable {
    entries: Vec<TaxonomyEntry>,
    by_alias: AHashMap<CompactString, usize>,
    by_id: AHashMap<CompactString, usize>,
}

impl StatementTable {
    fn build(statement: StatementType, sources: Vec<EntrySource>) -> Result<Self> {
        let mut table = StatementTable::default();
        let mut labels = AHashSet::with_capacity(sources.len());

        for source in sources {
            let invalid = |reason: String| {
                Error::Taxonomy(format!("{statement} entry {}: {reason}", source.id))
            };
            if source.id.is_empty() || source.label.is_empty() {
                return Err(invalid("id and label must be non-empty".to_string()));
            }
            if source.aliases.is_empty() {
                return Err(invalid("no aliases".to_string()));
            }
            if table.by_id.contains_key(&source.id) {
                return Err(invalid("duplicate id".to_string()));
            }
            if !labels.insert(source.label.clone()) {
                return Err(invalid(format!("duplicate label {}", source.label)));
            }

            let position = table.entries.len();
            for (_, alias) in source.aliases.iter() {
                if let Some(&other) = table.by_alias.get(alias) {
                    if other != position {
                        return Err(invalid(format!(
                            "alias {alias} already maps to {}",
                            table.entries[other].id
                        )));
                    }
                    continue;
                }
                table.by_alias.insert(alias.into(), position);
            }

            table.by_id.insert(source.id.clone(), position);
            table.entries.push(TaxonomyEntry {
                id: source.id,
                label: source.label,
                label_en: source.label_en,
                statement,
                aliases: source.aliases,
            });
        }
        Ok(table)
    }
}

/// Validated alias table for all three statement types. Immutable once
/// built; share it through `Arc` or [`SharedTaxonomy`].
#[derive(Debug, Clone)]
pub struct Taxonomy {
    tables: [StatementTable; 3],
}

impl Taxonomy {
    /// The table compiled into the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let source: TaxonomySource =
            toml::from_str(text).map_err(|e| Error::Taxonomy(e.to_string()))?;
        let taxonomy = Self {
            tables: [
                StatementTable::build(StatementType::BalanceSheet, source.balance_sheet)?,
                StatementTable::build(StatementType::IncomeStatement, source.income_statement)?,
                StatementTable::build(StatementType::CashFlow, source.cash_flow)?,
            ],
        };
        debug!(
            balance_sheet = taxonomy.entries(StatementType::BalanceSheet).len(),
            income_statement = taxonomy.entries(StatementType::IncomeStatement).len(),
            cash_flow = taxonomy.entries(StatementType::CashFlow).len(),
            "taxonomy loaded"
        );
        Ok(taxonomy)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            Error::Taxonomy(msg) => Error::Taxonomy(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Entries of one statement in declaration order.
    pub fn entries(&self, statement: StatementType) -> &[TaxonomyEntry] {
        &self.tables[statement.index()].entries
    }

    pub fn entry(&self, statement: StatementType, id: &str) -> Option<&TaxonomyEntry> {
        let table = &self.tables[statement.index()];
        table.by_id.get(id).map(|&i| &table.entries[i])
    }

    /// Exact alias lookup within one statement.
    pub fn lookup(&self, statement: StatementType, alias: &str) -> Option<&TaxonomyEntry> {
        let table = &self.tables[statement.index()];
        table.by_alias.get(alias).map(|&i| &table.entries[i])
    }

    /// Declaration position of an entry, used for line-item ordering.
    pub(crate) fn position(&self, statement: StatementType, id: &str) -> Option<usize> {
        self.tables[statement.index()].by_id.get(id).copied()
    }

    pub fn labels(&self, statement: StatementType) -> Vec<TaxonomyLabel<'_>> {
        self.entries(statement)
            .iter()
            .map(|entry| TaxonomyLabel {
                id: &entry.id,
                label: &entry.label,
                label_en: entry.label_en.as_deref(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.iter().map(|t| t.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reloadable handle over a [`Taxonomy`]. Readers take a snapshot and keep
/// it for the whole parse, so a reload never changes a parse in flight.
#[derive(Debug, Clone)]
pub struct SharedTaxonomy {
    current: Arc<RwLock<Arc<Taxonomy>>>,
}

impl SharedTaxonomy {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(taxonomy))),
        }
    }

    pub fn snapshot(&self) -> Arc<Taxonomy> {
        self.current.read().clone()
    }

    pub fn replace(&self, taxonomy: Taxonomy) {
        *self.current.write() = Arc::new(taxonomy);
    }

    /// Load and validate `path`, then swap it in. On failure the previous
    /// table stays active.
    pub fn reload_from<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let taxonomy = Taxonomy::from_path(path.as_ref())?;
        self.replace(taxonomy);
        debug!(path = %path.as_ref().display(), "taxonomy reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SMALL: &str = r#"
[[income_statement]]
id = "revenue"
label = "売上高"
label_en = "Revenue"
aliases = { jgaap = ["NetSales"], ifrs = ["Revenue"], usgaap = ["Revenues"] }

[[income_statement]]
id = "operating_income"
label = "営業利益"
aliases = { jgaap = ["OperatingIncome"] }
"#;

    #[test]
    fn test_builtin_loads() {
        let taxonomy = Taxonomy::builtin().unwrap();
        for statement in StatementType::ALL {
            assert!(!taxonomy.entries(statement).is_empty(), "{statement} is empty");
        }
        let labels = taxonomy.labels(StatementType::IncomeStatement);
        assert_eq!(
            labels[0],
            TaxonomyLabel {
                id: "revenue",
                label: "売上高",
                label_en: Some("Revenue"),
            }
        );
        assert_eq!(
            taxonomy.lookup(StatementType::BalanceSheet, "TotalAssets").unwrap().label,
            "資産合計"
        );
        assert_eq!(
            taxonomy
                .lookup(StatementType::CashFlow, "CashFlowsFromOperatingActivities")
                .unwrap()
                .label,
            "営業活動によるキャッシュ・フロー"
        );
    }

    #[test]
    fn test_aliases_per_standard() {
        let taxonomy = Taxonomy::builtin().unwrap();
        let revenue = taxonomy.entry(StatementType::IncomeStatement, "revenue").unwrap();
        assert!(revenue.aliases.for_standard(AccountingStandard::JGaap).contains(&"NetSales".into()));
        assert!(revenue.aliases.for_standard(AccountingStandard::Ifrs).contains(&"Revenue".into()));
        assert!(revenue.aliases.for_standard(AccountingStandard::Unknown).is_empty());
    }

    #[test]
    fn test_alias_shared_across_statements() {
        let taxonomy = Taxonomy::builtin().unwrap();
        assert!(taxonomy.lookup(StatementType::BalanceSheet, "CashAndCashEquivalents").is_some());
        assert!(taxonomy.lookup(StatementType::CashFlow, "CashAndCashEquivalents").is_some());
        assert!(taxonomy.lookup(StatementType::IncomeStatement, "CashAndCashEquivalents").is_none());
    }

    #[test]
    fn test_entry_and_position() {
        let taxonomy = Taxonomy::from_toml_str(SMALL).unwrap();
        let entry = taxonomy.entry(StatementType::IncomeStatement, "operating_income").unwrap();
        assert_eq!(entry.label_en, None);
        assert_eq!(entry.statement, StatementType::IncomeStatement);
        assert_eq!(taxonomy.position(StatementType::IncomeStatement, "operating_income"), Some(1));
        assert_eq!(taxonomy.len(), 2);
        assert!(taxonomy.entries(StatementType::BalanceSheet).is_empty());
    }

    #[test]
    fn test_rejects_duplicate_alias() {
        let text = r#"
[[balance_sheet]]
id = "a"
label = "A"
aliases = { jgaap = ["Assets"] }

[[balance_sheet]]
id = "b"
label = "B"
aliases = { ifrs = ["Assets"] }
"#;
        let err = Taxonomy::from_toml_str(text).unwrap_err();
        assert!(matches!(err, Error::Taxonomy(msg) if msg.contains("Assets")));
    }

    #[test]
    fn test_rejects_duplicate_label_and_id() {
        let dup_label = r#"
[[cash_flow]]
id = "a"
label = "X"
aliases = { jgaap = ["A"] }

[[cash_flow]]
id = "b"
label = "X"
aliases = { jgaap = ["B"] }
"#;
        assert!(matches!(Taxonomy::from_toml_str(dup_label), Err(Error::Taxonomy(_))));

        let dup_id = dup_label.replace("id = \"b\"", "id = \"a\"");
        assert!(matches!(Taxonomy::from_toml_str(&dup_id), Err(Error::Taxonomy(_))));
    }

    #[test]
    fn test_rejects_entry_without_aliases() {
        let text = "[[balance_sheet]]\nid = \"a\"\nlabel = \"A\"\n";
        let err = Taxonomy::from_toml_str(text).unwrap_err();
        assert!(matches!(err, Error::Taxonomy(msg) if msg.contains("no aliases")));
    }

    #[test]
    fn test_rejects_unknown_section() {
        let text = "[[equity_statement]]\nid = \"a\"\nlabel = \"A\"\n";
        assert!(matches!(Taxonomy::from_toml_str(text), Err(Error::Taxonomy(_))));
    }

    #[test]
    fn test_shared_reload_keeps_snapshots() {
        let shared = SharedTaxonomy::new(Taxonomy::builtin().unwrap());
        let before = shared.snapshot();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SMALL.as_bytes()).unwrap();
        shared.reload_from(file.path()).unwrap();

        let after = shared.snapshot();
        assert_eq!(after.len(), 2);
        assert!(before.len() > after.len());
        assert!(before.lookup(StatementType::BalanceSheet, "TotalAssets").is_some());
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let shared = SharedTaxonomy::new(Taxonomy::from_toml_str(SMALL).unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[balance_sheet]]\nid = 1\n").unwrap();

        let err = shared.reload_from(file.path()).unwrap_err();
        assert!(matches!(err, Error::Taxonomy(_)));
        assert_eq!(shared.snapshot().len(), 2);
    }
}
