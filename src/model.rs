use bitflags::bitflags;
use chrono::NaiveDate;
use compact_str::CompactString;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Statement and standard tags
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [
        StatementType::BalanceSheet,
        StatementType::IncomeStatement,
        StatementType::CashFlow,
    ];

    /// Key used for this statement in the taxonomy file.
    pub const fn key(self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::IncomeStatement => "income_statement",
            StatementType::CashFlow => "cash_flow",
        }
    }

    /// Short code EDINET uses in tabular extract file names.
    pub const fn file_token(self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "BS",
            StatementType::IncomeStatement => "PL",
            StatementType::CashFlow => "CF",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            StatementType::BalanceSheet => 0,
            StatementType::IncomeStatement => 1,
            StatementType::CashFlow => 2,
        }
    }

    /// Keyword routing for element names that no taxonomy entry claims.
    pub fn classify_element(name: &str) -> Option<StatementType> {
        let lower = name.to_ascii_lowercase();
        if ["asset", "liabilit", "equity", "netasset"]
            .iter()
            .any(|k| lower.contains(k))
        {
            Some(StatementType::BalanceSheet)
        } else if ["revenue", "profit", "loss", "income", "expense", "sales"]
            .iter()
            .any(|k| lower.contains(k))
        {
            Some(StatementType::IncomeStatement)
        } else if lower.contains("cash") {
            Some(StatementType::CashFlow)
        } else {
            None
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StatementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bs" | "balance_sheet" | "balance-sheet" => Ok(StatementType::BalanceSheet),
            "pl" | "income_statement" | "income-statement" => Ok(StatementType::IncomeStatement),
            "cf" | "cash_flow" | "cash-flow" | "cash_flow_statement" => Ok(StatementType::CashFlow),
            other => Err(format!("unknown statement type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountingStandard {
    #[serde(rename = "J-GAAP")]
    JGaap,
    #[serde(rename = "IFRS")]
    Ifrs,
    #[serde(rename = "US-GAAP")]
    UsGaap,
    Unknown,
}

impl AccountingStandard {
    /// Infer the standard from the entry names of a filing archive.
    pub fn detect<'a, I>(entry_names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<String> = entry_names
            .into_iter()
            .map(|n| n.to_ascii_lowercase())
            .collect();
        let any = |needle: &str| names.iter().any(|n| n.contains(needle));

        if any("ifrs") {
            AccountingStandard::Ifrs
        } else if any("usgaap") || any("us-gaap") {
            AccountingStandard::UsGaap
        } else if any("jppfs") || any("jpcrp") {
            AccountingStandard::JGaap
        } else {
            AccountingStandard::Unknown
        }
    }
}

impl fmt::Display for AccountingStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountingStandard::JGaap => "J-GAAP",
            AccountingStandard::Ifrs => "IFRS",
            AccountingStandard::UsGaap => "US-GAAP",
            AccountingStandard::Unknown => "Unknown",
        })
    }
}

// ============================================================================
// Contexts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Instant,
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodRole {
    Current,
    Prior,
}

impl fmt::Display for PeriodRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeriodRole::Current => "current",
            PeriodRole::Prior => "prior",
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u8 {
        /// Scoped to the filer alone via the consolidation axis.
        const NON_CONSOLIDATED = 0b0000_0001;
        /// Carries dimension members other than the consolidation axis.
        const DIMENSIONAL = 0b0000_0010;
    }
}

/// Period and scope classification of one context id.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsingContext {
    pub id: CompactString,
    pub kind: PeriodKind,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub role: Option<PeriodRole>,
    pub flags: ContextFlags,
}

impl ParsingContext {
    #[inline]
    pub fn is_consolidated(&self) -> bool {
        !self.flags.contains(ContextFlags::NON_CONSOLIDATED)
    }

    #[inline]
    pub fn is_dimensional(&self) -> bool {
        self.flags.contains(ContextFlags::DIMENSIONAL)
    }
}

// ============================================================================
// Facts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FactValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
    Nil,
}

impl FactValue {
    pub fn amount(&self) -> Option<Amount> {
        match *self {
            FactValue::Integer(v) => Some(Amount::Integer(v)),
            FactValue::Decimal(v) => Some(Amount::Decimal(v)),
            FactValue::Text(_) | FactValue::Nil => None,
        }
    }
}

/// Numeric value of a line item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Amount {
    Integer(i64),
    Decimal(f64),
}

impl Amount {
    pub fn as_f64(self) -> f64 {
        match self {
            Amount::Integer(v) => v as f64,
            Amount::Decimal(v) => v,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Integer(v) => write!(f, "{v}"),
            Amount::Decimal(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decimals {
    Infinite,
    Places(i32),
}

impl FromStr for Decimals {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "INF" {
            Ok(Decimals::Infinite)
        } else {
            s.parse().map(Decimals::Places)
        }
    }
}

/// One fact as it appeared in the source document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawFact {
    pub prefix: Option<CompactString>,
    pub element: CompactString,
    pub context_ref: CompactString,
    pub value: FactValue,
    pub decimals: Option<Decimals>,
    pub unit: Option<CompactString>,
    pub consolidated: bool,
}

impl RawFact {
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.element),
            None => self.element.to_string(),
        }
    }
}

// ============================================================================
// Normalized statements
// ============================================================================

/// Values of one line item keyed by period role, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodValues {
    entries: Vec<(PeriodRole, Amount)>,
}

impl PeriodValues {
    pub fn get(&self, role: PeriodRole) -> Option<Amount> {
        self.entries
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, v)| *v)
    }

    pub fn current(&self) -> Option<Amount> {
        self.get(PeriodRole::Current)
    }

    pub fn prior(&self) -> Option<Amount> {
        self.get(PeriodRole::Prior)
    }

    pub fn contains(&self, role: PeriodRole) -> bool {
        self.entries.iter().any(|(r, _)| *r == role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeriodRole, Amount)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns false if the role already holds a value.
    pub(crate) fn insert_first(&mut self, role: PeriodRole, amount: Amount) -> bool {
        if self.contains(role) {
            return false;
        }
        self.entries.push((role, amount));
        true
    }
}

impl Serialize for PeriodValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (role, amount) in &self.entries {
            map.serialize_entry(role, amount)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub id: CompactString,
    pub label: CompactString,
    pub label_en: Option<CompactString>,
    pub values: PeriodValues,
    /// Indices into the owning statement's `raw_items`.
    pub provenance: Vec<usize>,
}

/// One normalized financial statement.
///
/// `items` follow the taxonomy's declaration order. `raw_items` holds every
/// fact attributed to this statement type, resolved or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementData {
    pub statement: StatementType,
    pub source: Option<String>,
    pub items: Vec<LineItem>,
    pub raw_items: Vec<RawFact>,
}

impl StatementData {
    pub fn empty(statement: StatementType) -> Self {
        Self {
            statement,
            source: None,
            items: Vec::new(),
            raw_items: Vec::new(),
        }
    }

    /// Look up a line item's values by its canonical label.
    pub fn get(&self, label: &str) -> Option<&PeriodValues> {
        self.items
            .iter()
            .find(|item| item.label == label)
            .map(|item| &item.values)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&PeriodValues> {
        self.items
            .iter()
            .find(|item| item.id == id)
            .map(|item| &item.values)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.label.as_str()).collect()
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn raw_items(&self) -> &[RawFact] {
        &self.raw_items
    }

    pub fn provenance<'a>(&'a self, item: &'a LineItem) -> impl Iterator<Item = &'a RawFact> + 'a {
        item.provenance
            .iter()
            .filter_map(move |&idx| self.raw_items.get(idx))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// All three statements of one filing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilingStatements {
    pub standard: AccountingStandard,
    pub balance_sheet: StatementData,
    pub income_statement: StatementData,
    pub cash_flow: StatementData,
}

impl FilingStatements {
    pub fn statement(&self, statement: StatementType) -> &StatementData {
        match statement {
            StatementType::BalanceSheet => &self.balance_sheet,
            StatementType::IncomeStatement => &self.income_statement,
            StatementType::CashFlow => &self.cash_flow,
        }
    }
}
