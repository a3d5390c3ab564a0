// Ordered statement assembly from resolved facts
use crate::model::*;
use crate::parser::ParsedDocument;
use crate::resolver::{Resolution, TaxonomyResolver, UnresolvedReason};
use crate::taxonomy::{Taxonomy, TaxonomyEntry};
use tracing::{debug, trace};

/// How much of a filing a selected document covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentScope {
    /// Every fact in the document belongs to the requested statement.
    Statement,
    /// The document covers the whole filing; membership is decided per fact.
    Filing,
}

/// A resolved fact ready for assembly. `index` points into the raw-item
/// list handed to [`StatementAssembler::assemble`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedFact<'t> {
    pub index: usize,
    pub entry: &'t TaxonomyEntry,
    pub role: PeriodRole,
    pub amount: Amount,
}

/// Counters reported alongside an assembled statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub raw: usize,
    pub resolved: usize,
    pub duplicates: usize,
    pub non_consolidated: usize,
    pub dimensional: usize,
    pub outside_period: usize,
    pub unknown: usize,
    pub not_numeric: usize,
}

impl AssemblyStats {
    fn record(&mut self, reason: UnresolvedReason) {
        match reason {
            UnresolvedReason::NonConsolidated => self.non_consolidated += 1,
            UnresolvedReason::Dimensional => self.dimensional += 1,
            UnresolvedReason::OutsidePeriod => self.outside_period += 1,
            UnresolvedReason::UnknownElement => self.unknown += 1,
            UnresolvedReason::NotNumeric => self.not_numeric += 1,
        }
    }
}

pub struct StatementAssembler<'t> {
    taxonomy: &'t Taxonomy,
    statement: StatementType,
}

impl<'t> StatementAssembler<'t> {
    pub fn new(taxonomy: &'t Taxonomy, statement: StatementType) -> Self {
        Self {
            taxonomy,
            statement,
        }
    }

    /// Build a statement from resolved facts given in document order.
    ///
    /// The first fact for a label and role wins; later ones stay in
    /// `raw_items` only. Items follow the taxonomy's declaration order and
    /// labels without any value are left out.
    pub fn assemble<I>(&self, source: Option<String>, raw_items: Vec<RawFact>, resolved: I) -> StatementData
    where
        I: IntoIterator<Item = ResolvedFact<'t>>,
    {
        self.assemble_counting(source, raw_items, resolved).0
    }

    fn assemble_counting<I>(
        &self,
        source: Option<String>,
        raw_items: Vec<RawFact>,
        resolved: I,
    ) -> (StatementData, usize)
    where
        I: IntoIterator<Item = ResolvedFact<'t>>,
    {
        let entries = self.taxonomy.entries(self.statement);
        let mut slots: Vec<Option<LineItem>> = vec![None; entries.len()];
        let mut duplicates = 0;

        for fact in resolved {
            if fact.index >= raw_items.len() {
                continue;
            }
            let Some(position) = self.taxonomy.position(self.statement, &fact.entry.id) else {
                continue;
            };
            let item = slots[position].get_or_insert_with(|| LineItem {
                id: fact.entry.id.clone(),
                label: fact.entry.label.clone(),
                label_en: fact.entry.label_en.clone(),
                values: PeriodValues::default(),
                provenance: Vec::new(),
            });
            if item.values.insert_first(fact.role, fact.amount) {
                item.provenance.push(fact.index);
            } else {
                duplicates += 1;
                trace!(
                    label = %item.label,
                    role = %fact.role,
                    index = fact.index,
                    "duplicate fact kept in raw items only"
                );
            }
        }

        let items = slots
            .into_iter()
            .flatten()
            .filter(|item| !item.values.is_empty())
            .collect();

        let data = StatementData {
            statement: self.statement,
            source,
            items,
            raw_items,
        };
        (data, duplicates)
    }

    /// Run membership, resolution and assembly over one parsed document.
    pub fn assemble_document(&self, doc: &ParsedDocument, scope: DocumentScope) -> (StatementData, AssemblyStats) {
        let resolver = TaxonomyResolver::new(self.taxonomy, self.statement);

        let members: Vec<(&RawFact, Option<&ParsingContext>)> = doc
            .facts_with_contexts()
            .filter(|(fact, _)| match scope {
                DocumentScope::Statement => true,
                DocumentScope::Filing => resolver.claims(&fact.element),
            })
            .collect();
        let resolver = resolver.with_policy_for(members.iter().copied());

        let mut stats = AssemblyStats {
            raw: members.len(),
            ..AssemblyStats::default()
        };
        let mut resolved = Vec::new();
        for (index, &(fact, ctx)) in members.iter().enumerate() {
            match resolver.resolve(fact, ctx) {
                Resolution::Resolved {
                    entry,
                    role,
                    amount,
                } => resolved.push(ResolvedFact {
                    index,
                    entry,
                    role,
                    amount,
                }),
                Resolution::Unresolved(reason) => stats.record(reason),
            }
        }
        stats.resolved = resolved.len();

        let raw_items = members.iter().map(|(fact, _)| (*fact).clone()).collect();
        let (data, duplicates) = self.assemble_counting(Some(doc.name.clone()), raw_items, resolved);
        stats.duplicates = duplicates;

        debug!(
            statement = %self.statement,
            document = %doc.name,
            raw = stats.raw,
            resolved = stats.resolved,
            items = data.len(),
            duplicates,
            fallback_non_consolidated = resolver.accepts_non_consolidated(),
            "statement assembled"
        );
        (data, stats)
    }
}
