// Element name to canonical line-item resolution
use crate::model::{Amount, ParsingContext, PeriodRole, RawFact, StatementType};
use crate::taxonomy::{Taxonomy, TaxonomyEntry};
use std::fmt;
use tracing::trace;

/// Accounting-standard and section suffixes EDINET appends to element
/// names, longest first so a compound suffix wins over its tail.
pub const SUFFIX_TOKENS: [&str; 9] = [
    "IFRSSummaryOfBusinessResults",
    "JGAAPSummaryOfBusinessResults",
    "USGAAPSummaryOfBusinessResults",
    "SummaryOfBusinessResults",
    "IFRSKeyFinancialData",
    "KeyFinancialData",
    "IFRS",
    "JGAAP",
    "USGAAP",
];

/// Balance-sheet position tags that follow the base name. `OpeCF`,
/// `InvCF` and `FinCF` belong to canonical names and are never stripped.
pub const POSITION_TAGS: [&str; 5] = ["NCA", "NCL", "CA", "CL", "SS"];

const MAX_PASSES: usize = SUFFIX_TOKENS.len() + POSITION_TAGS.len();

/// Drop a namespace prefix such as `jppfs_cor:`.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Strip one token from the end of `name`. Standard suffixes are tried
/// before position tags; a tag is only removed if something remains.
fn strip_once(name: &str) -> Option<&str> {
    SUFFIX_TOKENS
        .iter()
        .chain(POSITION_TAGS.iter())
        .find_map(|token| name.strip_suffix(token).filter(|rest| !rest.is_empty()))
}

/// Fully stripped base name.
pub fn strip_suffixes(name: &str) -> &str {
    let mut current = local_name(name);
    for _ in 0..MAX_PASSES {
        match strip_once(current) {
            Some(rest) => current = rest,
            None => break,
        }
    }
    current
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnresolvedReason {
    /// Filer-only figure while a consolidated figure exists.
    NonConsolidated,
    /// Reported against a segment or other dimension member.
    Dimensional,
    /// Context is neither the current nor the prior period.
    OutsidePeriod,
    UnknownElement,
    NotNumeric,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnresolvedReason::NonConsolidated => "non-consolidated",
            UnresolvedReason::Dimensional => "dimensional",
            UnresolvedReason::OutsidePeriod => "outside period",
            UnresolvedReason::UnknownElement => "unknown element",
            UnresolvedReason::NotNumeric => "not numeric",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<'t> {
    Resolved {
        entry: &'t TaxonomyEntry,
        role: PeriodRole,
        amount: Amount,
    },
    Unresolved(UnresolvedReason),
}

impl<'t> Resolution<'t> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    pub fn entry(&self) -> Option<&'t TaxonomyEntry> {
        match *self {
            Resolution::Resolved { entry, .. } => Some(entry),
            Resolution::Unresolved(_) => None,
        }
    }
}

/// Resolves raw facts of one statement type against a taxonomy snapshot.
///
/// Resolution depends only on the element name, the context flags and the
/// taxonomy, never on discovery order.
#[derive(Debug, Clone, Copy)]
pub struct TaxonomyResolver<'t> {
    taxonomy: &'t Taxonomy,
    statement: StatementType,
    accept_non_consolidated: bool,
}

impl<'t> TaxonomyResolver<'t> {
    pub fn new(taxonomy: &'t Taxonomy, statement: StatementType) -> Self {
        Self {
            taxonomy,
            statement,
            accept_non_consolidated: false,
        }
    }

    /// Accept non-consolidated facts. Used when the statement has no
    /// consolidated context at all.
    pub fn with_non_consolidated(mut self, accept: bool) -> Self {
        self.accept_non_consolidated = accept;
        self
    }

    /// Pick the consolidation policy from the facts of this statement:
    /// non-consolidated figures are only accepted when none of the facts
    /// sits in a consolidated, non-dimensional context.
    pub fn with_policy_for<'a, I>(self, facts: I) -> Self
    where
        I: IntoIterator<Item = (&'a RawFact, Option<&'a ParsingContext>)>,
    {
        let has_consolidated = facts.into_iter().any(|(fact, ctx)| {
            fact.consolidated && ctx.map_or(true, |c| !c.is_dimensional())
        });
        self.with_non_consolidated(!has_consolidated)
    }

    pub fn statement(&self) -> StatementType {
        self.statement
    }

    pub fn accepts_non_consolidated(&self) -> bool {
        self.accept_non_consolidated
    }

    /// Canonical entry for a raw element name: exact alias match first,
    /// then one suffix token stripped per pass.
    pub fn canonical(&self, element: &str) -> Option<&'t TaxonomyEntry> {
        let mut current = local_name(element);
        if let Some(entry) = self.taxonomy.lookup(self.statement, current) {
            return Some(entry);
        }
        for _ in 0..MAX_PASSES {
            current = strip_once(current)?;
            if let Some(entry) = self.taxonomy.lookup(self.statement, current) {
                return Some(entry);
            }
        }
        None
    }

    /// Whether a fact from a filing-wide document belongs to this
    /// statement: claimed by one of its aliases, or routed here by name.
    pub fn claims(&self, element: &str) -> bool {
        self.canonical(element).is_some()
            || StatementType::classify_element(strip_suffixes(element)) == Some(self.statement)
    }

    pub fn resolve(&self, fact: &RawFact, context: Option<&ParsingContext>) -> Resolution<'t> {
        let resolution = self.resolve_inner(fact, context);
        trace!(
            statement = %self.statement,
            element = %fact.element,
            context = %fact.context_ref,
            resolved = ?resolution.entry().map(|e| e.id.as_str()),
            "fact resolution"
        );
        resolution
    }

    fn resolve_inner(&self, fact: &RawFact, context: Option<&ParsingContext>) -> Resolution<'t> {
        if !fact.consolidated && !self.accept_non_consolidated {
            return Resolution::Unresolved(UnresolvedReason::NonConsolidated);
        }
        if context.is_some_and(ParsingContext::is_dimensional) {
            return Resolution::Unresolved(UnresolvedReason::Dimensional);
        }
        let Some(entry) = self.canonical(&fact.element) else {
            return Resolution::Unresolved(UnresolvedReason::UnknownElement);
        };
        let Some(role) = context.and_then(|c| c.role) else {
            return Resolution::Unresolved(UnresolvedReason::OutsidePeriod);
        };
        match fact.value.amount() {
            Some(amount) => Resolution::Resolved {
                entry,
                role,
                amount,
            },
            None => Resolution::Unresolved(UnresolvedReason::NotNumeric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContextFlags, FactValue, PeriodKind};
    use pretty_assertions::assert_eq;

    fn taxonomy() -> Taxonomy {
        Taxonomy::builtin().unwrap()
    }

    fn context(id: &str, role: Option<PeriodRole>, flags: ContextFlags) -> ParsingContext {
        ParsingContext {
            id: id.into(),
            kind: PeriodKind::Duration,
            start: None,
            end: None,
            role,
            flags,
        }
    }

    fn fact(element: &str, value: FactValue, consolidated: bool) -> RawFact {
        RawFact {
            prefix: None,
            element: element.into(),
            context_ref: "CurrentYearDuration".into(),
            value,
            decimals: None,
            unit: Some("JPY".into()),
            consolidated,
        }
    }

    fn current() -> ParsingContext {
        context("CurrentYearDuration", Some(PeriodRole::Current), ContextFlags::empty())
    }

    #[test]
    fn test_strip_suffixes() {
        assert_eq!(strip_suffixes("TotalAssets"), "TotalAssets");
        assert_eq!(strip_suffixes("CurrentAssetsIFRS"), "CurrentAssets");
        assert_eq!(strip_suffixes("NetSalesSummaryOfBusinessResults"), "NetSales");
        assert_eq!(strip_suffixes("TotalAssetsIFRSSummaryOfBusinessResults"), "TotalAssets");
        assert_eq!(strip_suffixes("OperatingRevenuesIFRSKeyFinancialData"), "OperatingRevenues");
        assert_eq!(strip_suffixes("OtherCurrentAssetsCAIFRS"), "OtherCurrentAssets");
        assert_eq!(
            strip_suffixes("RetirementBenefitLiabilityNCLIFRS"),
            "RetirementBenefitLiability"
        );
        assert_eq!(strip_suffixes("OtherFinancialAssetsNCAIFRS"), "OtherFinancialAssets");
        assert_eq!(
            strip_suffixes("DepreciationAndAmortizationOpeCFIFRS"),
            "DepreciationAndAmortizationOpeCF"
        );
        assert_eq!(strip_suffixes("NetSalesJGAAP"), "NetSales");
        assert_eq!(strip_suffixes("RevenueUSGAAP"), "Revenue");
        assert_eq!(strip_suffixes("jpcrp_cor:SalesRevenuesIFRS"), "SalesRevenues");
        assert_eq!(strip_suffixes("CA"), "CA");
        assert_eq!(strip_suffixes("IFRS"), "IFRS");
    }

    #[test]
    fn test_three_standards_resolve_to_same_label() {
        let taxonomy = taxonomy();
        let resolver = TaxonomyResolver::new(&taxonomy, StatementType::IncomeStatement);
        let ctx = current();

        let labels: Vec<_> = ["jppfs_cor:NetSales", "ifrs-full:Revenue", "us-gaap:Revenues"]
            .iter()
            .map(|name| {
                let f = fact(local_name(name), FactValue::Integer(1), true);
                match resolver.resolve(&f, Some(&ctx)) {
                    Resolution::Resolved { entry, .. } => entry.label.to_string(),
                    other => panic!("{name} unresolved: {other:?}"),
                }
            })
            .collect();
        assert_eq!(labels, vec!["売上高"; 3]);
    }

    #[test]
    fn test_suffixed_name_matches_plain_name() {
        let taxonomy = taxonomy();
        let resolver = TaxonomyResolver::new(&taxonomy, StatementType::BalanceSheet);
        let plain = resolver.canonical("TotalAssets").unwrap();
        let suffixed = resolver
            .canonical("jpcrp_cor:TotalAssetsIFRSSummaryOfBusinessResults")
            .unwrap();
        assert_eq!(plain.id, suffixed.id);

        let cf = TaxonomyResolver::new(&taxonomy, StatementType::CashFlow);
        assert_eq!(
            cf.canonical("CashFlowsFromUsedInOperatingActivitiesIFRSSummaryOfBusinessResults")
                .unwrap()
                .id,
            "operating_cash_flow"
        );
        assert_eq!(
            cf.canonical("DepreciationAndAmortizationOpeCFIFRS").unwrap().id,
            "depreciation_and_amortization"
        );
    }

    #[test]
    fn test_unresolved_reasons() {
        let taxonomy = taxonomy();
        let resolver = TaxonomyResolver::new(&taxonomy, StatementType::IncomeStatement);
        let ctx = current();

        let unknown = fact("FilerNameInEnglish", FactValue::Text("Toyota".into()), true);
        assert_eq!(
            resolver.resolve(&unknown, Some(&ctx)),
            Resolution::Unresolved(UnresolvedReason::UnknownElement)
        );

        let nil = fact("NetSales", FactValue::Nil, true);
        assert_eq!(
            resolver.resolve(&nil, Some(&ctx)),
            Resolution::Unresolved(UnresolvedReason::NotNumeric)
        );

        let old = context("Prior2YearDuration", None, ContextFlags::empty());
        let sales = fact("NetSales", FactValue::Integer(5), true);
        assert_eq!(
            resolver.resolve(&sales, Some(&old)),
            Resolution::Unresolved(UnresolvedReason::OutsidePeriod)
        );

        let segment = context(
            "CurrentYearDuration_SegmentA",
            Some(PeriodRole::Current),
            ContextFlags::DIMENSIONAL,
        );
        assert_eq!(
            resolver.resolve(&sales, Some(&segment)),
            Resolution::Unresolved(UnresolvedReason::Dimensional)
        );
    }

    #[test]
    fn test_consolidation_policy() {
        let taxonomy = taxonomy();
        let consolidated = current();
        let standalone = context(
            "CurrentYearDuration_NonConsolidatedMember",
            Some(PeriodRole::Current),
            ContextFlags::NON_CONSOLIDATED,
        );
        let group = fact("NetSales", FactValue::Integer(100), true);
        let parent = fact("NetSales", FactValue::Integer(40), false);

        let both = [(&group, Some(&consolidated)), (&parent, Some(&standalone))];
        let resolver = TaxonomyResolver::new(&taxonomy, StatementType::IncomeStatement)
            .with_policy_for(both.iter().copied());
        assert!(!resolver.accepts_non_consolidated());
        assert!(resolver.resolve(&group, Some(&consolidated)).is_resolved());
        assert_eq!(
            resolver.resolve(&parent, Some(&standalone)),
            Resolution::Unresolved(UnresolvedReason::NonConsolidated)
        );

        let only_parent = [(&parent, Some(&standalone))];
        let resolver = TaxonomyResolver::new(&taxonomy, StatementType::IncomeStatement)
            .with_policy_for(only_parent.iter().copied());
        assert!(resolver.accepts_non_consolidated());
        match resolver.resolve(&parent, Some(&standalone)) {
            Resolution::Resolved { amount, role, .. } => {
                assert_eq!(amount, Amount::Integer(40));
                assert_eq!(role, PeriodRole::Current);
            }
            other => panic!("expected fallback resolution, got {other:?}"),
        }
    }

    #[test]
    fn test_claims() {
        let taxonomy = taxonomy();
        let bs = TaxonomyResolver::new(&taxonomy, StatementType::BalanceSheet);
        let pl = TaxonomyResolver::new(&taxonomy, StatementType::IncomeStatement);
        let cf = TaxonomyResolver::new(&taxonomy, StatementType::CashFlow);

        assert!(bs.claims("OtherCurrentAssetsCAIFRS"));
        assert!(pl.claims("NetSales"));
        assert!(pl.claims("ExtraordinaryLoss"));
        assert!(!bs.claims("NetSales"));
        assert!(bs.claims("CashAndCashEquivalents"));
        assert!(cf.claims("CashAndCashEquivalents"));
        assert!(!cf.claims("FilerNameInEnglish"));
    }
}
