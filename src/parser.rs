// XBRL instance and tabular extract parsing into raw facts
use crate::config::TabularColumns;
use crate::{model::*, tabular, Error, Result};
use ahash::AHashMap;
use chrono::NaiveDate;
use compact_str::CompactString;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// XBRL instance document.
    Xbrl,
    /// Tab-delimited extract with a header row.
    Tabular,
}

/// Facts and contexts of one parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub name: String,
    pub format: DocumentFormat,
    pub facts: Vec<RawFact>,
    pub contexts: Vec<ParsingContext>,
    index: AHashMap<CompactString, usize>,
}

impl ParsedDocument {
    pub(crate) fn new(
        name: &str,
        format: DocumentFormat,
        facts: Vec<RawFact>,
        contexts: Vec<ParsingContext>,
    ) -> Self {
        let index = contexts
            .iter()
            .enumerate()
            .map(|(i, ctx)| (ctx.id.clone(), i))
            .collect();
        Self {
            name: name.to_string(),
            format,
            facts,
            contexts,
            index,
        }
    }

    pub fn context(&self, id: &str) -> Option<&ParsingContext> {
        self.index.get(id).map(|&i| &self.contexts[i])
    }

    /// Pairs every fact with its context.
    pub fn facts_with_contexts(&self) -> impl Iterator<Item = (&RawFact, Option<&ParsingContext>)> {
        self.facts
            .iter()
            .map(move |fact| (fact, self.context(&fact.context_ref)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElementParser {
    columns: TabularColumns,
}

impl ElementParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, columns: TabularColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Parse one document. `period_end` is the filing's reporting-period end
    /// date used to assign current/prior roles to dated contexts.
    pub fn parse(
        &self,
        name: &str,
        data: &[u8],
        format: DocumentFormat,
        period_end: NaiveDate,
    ) -> Result<ParsedDocument> {
        let doc = match format {
            DocumentFormat::Xbrl => XbrlReader::new(name, data).read(period_end)?,
            DocumentFormat::Tabular => tabular::parse(name, data, &self.columns)?,
        };
        debug!(
            document = name,
            facts = doc.facts.len(),
            contexts = doc.contexts.len(),
            "document parsed"
        );
        Ok(doc)
    }
}

// ============================================================================
// XBRL instance reader
// ============================================================================

#[derive(Debug, Default)]
struct ContextDraft {
    id: CompactString,
    instant: Option<NaiveDate>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    forever: bool,
    flags: ContextFlags,
}

#[derive(Debug)]
enum ContextField {
    Instant,
    StartDate,
    EndDate,
    ExplicitMember,
}

#[derive(Debug, Default)]
struct UnitDraft {
    id: CompactString,
    measures: Vec<String>,
}

#[derive(Debug)]
struct FactDraft {
    prefix: Option<CompactString>,
    element: CompactString,
    context_ref: CompactString,
    unit_ref: Option<CompactString>,
    decimals: Option<Decimals>,
    nil: bool,
    depth: usize,
}

struct XbrlReader<'a> {
    name: &'a str,
    reader: Reader<&'a [u8]>,
    text: String,
    depth: usize,
    root_seen: bool,
    context: Option<ContextDraft>,
    field: Option<ContextField>,
    unit: Option<UnitDraft>,
    in_measure: bool,
    fact: Option<FactDraft>,
    contexts: Vec<ContextDraft>,
    units: AHashMap<CompactString, CompactString>,
    facts: Vec<(FactDraft, String)>,
}

impl<'a> XbrlReader<'a> {
    fn new(name: &'a str, data: &'a [u8]) -> Self {
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);
        Self {
            name,
            reader,
            text: String::new(),
            depth: 0,
            root_seen: false,
            context: None,
            field: None,
            unit: None,
            in_measure: false,
            fact: None,
            contexts: Vec::new(),
            units: AHashMap::new(),
            facts: Vec::new(),
        }
    }

    fn malformed(&self, construct: impl Into<String>) -> Error {
        Error::MalformedDocument {
            document: self.name.to_string(),
            construct: construct.into(),
        }
    }

    fn read(mut self, period_end: NaiveDate) -> Result<ParsedDocument> {
        loop {
            let event = self.reader.read_event().map_err(|e| {
                self.malformed(format!(
                    "xml syntax at byte {}: {e}",
                    self.reader.buffer_position()
                ))
            })?;
            match event {
                Event::DocType(doctype) => {
                    let body = String::from_utf8_lossy(&doctype).trim().to_string();
                    return Err(Error::XxeRejected {
                        document: self.name.to_string(),
                        construct: format!("<!DOCTYPE {body}>"),
                    });
                }
                Event::Start(start) => self.open(&start, false)?,
                Event::Empty(start) => self.open(&start, true)?,
                Event::End(end) => {
                    let local = String::from_utf8_lossy(end.local_name().as_ref()).into_owned();
                    self.close(&local)?;
                }
                Event::Text(text) => {
                    if self.depth == 0 {
                        return Err(self.malformed("text outside the root element"));
                    }
                    let unescaped = text
                        .unescape()
                        .map_err(|e| self.malformed(format!("character data: {e}")))?;
                    self.text.push_str(&unescaped);
                }
                Event::CData(cdata) => {
                    let raw = std::str::from_utf8(&cdata)
                        .map_err(|_| self.malformed("CDATA section is not UTF-8"))?;
                    self.text.push_str(raw);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !self.root_seen {
            return Err(self.malformed("missing xbrl root element"));
        }
        if self.depth != 0 {
            return Err(self.malformed("unexpected end of document"));
        }
        self.finish(period_end)
    }

    fn open(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<()> {
        let qname = start.name();
        let local = String::from_utf8_lossy(qname.local_name().as_ref()).into_owned();

        if !self.root_seen {
            if local != "xbrl" {
                return Err(self.malformed(format!("root element <{local}> is not xbrl")));
            }
            self.root_seen = true;
            if !empty {
                self.depth = 1;
            }
            return Ok(());
        }
        if self.depth == 0 {
            return Err(self.malformed(format!("element <{local}> after the root element")));
        }

        if !empty {
            self.depth += 1;
        }

        if let Some(fact) = self.fact.as_mut() {
            // Markup nested inside a fact value contributes its text only.
            if !empty {
                fact.depth += 1;
            }
            return Ok(());
        }
        self.text.clear();

        if self.context.is_some() {
            return self.open_context_child(start, &local, empty);
        }
        if self.unit.is_some() {
            self.in_measure = local == "measure" && !empty;
            return Ok(());
        }

        match local.as_str() {
            "context" => {
                let id = self.required_attr(start, b"id", &local)?;
                let mut draft = ContextDraft {
                    id: id.into(),
                    ..ContextDraft::default()
                };
                if draft.id.contains("NonConsolidatedMember") {
                    draft.flags |= ContextFlags::NON_CONSOLIDATED;
                }
                if empty {
                    self.contexts.push(draft);
                } else {
                    self.context = Some(draft);
                }
            }
            "unit" => {
                let id = self.required_attr(start, b"id", &local)?;
                if !empty {
                    self.unit = Some(UnitDraft {
                        id: id.into(),
                        measures: Vec::new(),
                    });
                }
            }
            _ => {
                if let Some(fact) = self.fact_draft(start, &local)? {
                    if empty {
                        self.facts.push((fact, String::new()));
                    } else {
                        self.fact = Some(fact);
                    }
                }
            }
        }
        Ok(())
    }

    fn open_context_child(&mut self, start: &BytesStart<'_>, local: &str, empty: bool) -> Result<()> {
        let field = match local {
            "instant" => Some(ContextField::Instant),
            "startDate" => Some(ContextField::StartDate),
            "endDate" => Some(ContextField::EndDate),
            "forever" => {
                if let Some(ctx) = self.context.as_mut() {
                    ctx.forever = true;
                }
                None
            }
            "explicitMember" => {
                let dimension = self.required_attr(start, b"dimension", local)?;
                let axis = dimension.rsplit(':').next().unwrap_or_default().to_string();
                if axis != "ConsolidatedOrNonConsolidatedAxis" {
                    if let Some(ctx) = self.context.as_mut() {
                        ctx.flags |= ContextFlags::DIMENSIONAL;
                    }
                }
                Some(ContextField::ExplicitMember)
            }
            "typedMember" => {
                if let Some(ctx) = self.context.as_mut() {
                    ctx.flags |= ContextFlags::DIMENSIONAL;
                }
                None
            }
            _ => None,
        };
        if !empty {
            self.field = field;
        }
        Ok(())
    }

    fn close(&mut self, local: &str) -> Result<()> {
        if self.depth == 0 {
            return Err(self.malformed(format!("unbalanced </{local}>")));
        }
        self.depth -= 1;

        if let Some(fact) = self.fact.as_mut() {
            if fact.depth > 0 {
                fact.depth -= 1;
                return Ok(());
            }
        }
        if let Some(fact) = self.fact.take() {
            let text = std::mem::take(&mut self.text);
            self.facts.push((fact, text));
            return Ok(());
        }

        if self.context.is_some() {
            if local == "context" {
                if let Some(ctx) = self.context.take() {
                    self.contexts.push(ctx);
                }
            } else if let Some(field) = self.field.take() {
                self.apply_field(field)?;
            }
            self.text.clear();
            return Ok(());
        }

        if local == "measure" && self.in_measure {
            let measure = std::mem::take(&mut self.text).trim().to_string();
            if let Some(unit) = self.unit.as_mut() {
                unit.measures.push(measure);
            }
            self.in_measure = false;
        } else if local == "unit" {
            if let Some(unit) = self.unit.take() {
                self.units
                    .insert(unit.id, CompactString::from(unit.measures.join("/")));
            }
        }
        self.text.clear();
        Ok(())
    }

    fn apply_field(&mut self, field: ContextField) -> Result<()> {
        let text = std::mem::take(&mut self.text);
        let text = text.trim();
        let Some(ctx_id) = self.context.as_ref().map(|c| c.id.clone()) else {
            return Ok(());
        };
        match field {
            ContextField::ExplicitMember => {
                let member = text.rsplit(':').next().unwrap_or_default();
                if let Some(ctx) = self.context.as_mut() {
                    if member == "NonConsolidatedMember" {
                        ctx.flags |= ContextFlags::NON_CONSOLIDATED;
                    }
                }
            }
            date_field => {
                let date = parse_date(text)
                    .ok_or_else(|| self.malformed(format!("context {ctx_id}: invalid date {text:?}")))?;
                if let Some(ctx) = self.context.as_mut() {
                    match date_field {
                        ContextField::Instant => ctx.instant = Some(date),
                        ContextField::StartDate => ctx.start = Some(date),
                        ContextField::EndDate => ctx.end = Some(date),
                        ContextField::ExplicitMember => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn required_attr(&self, start: &BytesStart<'_>, key: &[u8], element: &str) -> Result<String> {
        self.attr(start, key)?
            .ok_or_else(|| {
                self.malformed(format!(
                    "<{element}> missing {} attribute",
                    String::from_utf8_lossy(key)
                ))
            })
    }

    fn attr(&self, start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.malformed(format!("attribute: {e}")))?;
            if attr.key.local_name().as_ref() == key {
                let value = attr
                    .unescape_value()
                    .map_err(|e| self.malformed(format!("attribute value: {e}")))?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    /// Elements carrying a contextRef are facts; anything else is structure.
    fn fact_draft(&self, start: &BytesStart<'_>, local: &str) -> Result<Option<FactDraft>> {
        let Some(context_ref) = self.attr(start, b"contextRef")? else {
            return Ok(None);
        };
        let qname = start.name();
        let prefix = qname
            .prefix()
            .map(|p| CompactString::from(String::from_utf8_lossy(p.as_ref()).as_ref()));
        let decimals = match self.attr(start, b"decimals")? {
            Some(raw) => Some(raw.parse::<Decimals>().map_err(|_| {
                self.malformed(format!("element {local}: invalid decimals {raw:?}"))
            })?),
            None => None,
        };
        let nil = self
            .attr(start, b"nil")?
            .is_some_and(|v| v.trim() == "true" || v.trim() == "1");

        Ok(Some(FactDraft {
            prefix,
            element: local.into(),
            context_ref: context_ref.into(),
            unit_ref: self.attr(start, b"unitRef")?.map(CompactString::from),
            decimals,
            nil,
            depth: 0,
        }))
    }

    fn finish(mut self, period_end: NaiveDate) -> Result<ParsedDocument> {
        let drafts = std::mem::take(&mut self.contexts);
        let mut contexts = Vec::with_capacity(drafts.len());
        let mut seen = ahash::AHashSet::with_capacity(drafts.len());
        for draft in drafts {
            if !seen.insert(draft.id.clone()) {
                return Err(self.malformed(format!("duplicate context id {}", draft.id)));
            }
            let (kind, start, end) = match (draft.instant, draft.start, draft.end, draft.forever) {
                (Some(instant), None, None, false) => (PeriodKind::Instant, None, Some(instant)),
                (None, Some(start), Some(end), false) => {
                    if start > end {
                        return Err(self.malformed(format!(
                            "context {}: start {start} is after end {end}",
                            draft.id
                        )));
                    }
                    (PeriodKind::Duration, Some(start), Some(end))
                }
                (None, None, None, true) => (PeriodKind::Duration, None, None),
                _ => {
                    return Err(self.malformed(format!(
                        "context {} has no valid period",
                        draft.id
                    )))
                }
            };
            contexts.push(ParsingContext {
                id: draft.id,
                kind,
                start,
                end,
                role: None,
                flags: draft.flags,
            });
        }
        assign_roles(&mut contexts, period_end);

        let by_id: AHashMap<&str, &ParsingContext> =
            contexts.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut facts = Vec::with_capacity(self.facts.len());
        for (draft, text) in &self.facts {
            let ctx = by_id.get(draft.context_ref.as_str()).ok_or_else(|| {
                self.malformed(format!(
                    "element {} references undefined context {}",
                    draft.element, draft.context_ref
                ))
            })?;
            let unit = match &draft.unit_ref {
                Some(unit_ref) => Some(self.units.get(unit_ref).cloned().ok_or_else(|| {
                    self.malformed(format!(
                        "element {} references undefined unit {}",
                        draft.element, unit_ref
                    ))
                })?),
                None => None,
            };
            let value = if draft.nil {
                FactValue::Nil
            } else if draft.unit_ref.is_some() {
                parse_xbrl_number(text).ok_or_else(|| {
                    self.malformed(format!(
                        "element {}: non-numeric value {:?}",
                        draft.element,
                        text.trim()
                    ))
                })?
            } else {
                FactValue::Text(text.trim().to_string())
            };
            facts.push(RawFact {
                prefix: draft.prefix.clone(),
                element: draft.element.clone(),
                context_ref: draft.context_ref.clone(),
                value,
                decimals: draft.decimals,
                unit,
                consolidated: ctx.is_consolidated(),
            });
        }
        drop(by_id);

        Ok(ParsedDocument::new(self.name, DocumentFormat::Xbrl, facts, contexts))
    }
}

/// Assign current/prior roles against the reporting period end. A context
/// ending on that date is current; among the remaining contexts of the same
/// kind, those ending on the latest earlier date are prior.
pub(crate) fn assign_roles(contexts: &mut [ParsingContext], period_end: NaiveDate) {
    let prior_end = |kind: PeriodKind| {
        contexts
            .iter()
            .filter(|c| c.kind == kind)
            .filter_map(|c| c.end)
            .filter(|&end| end < period_end)
            .max()
    };
    let prior_instant = prior_end(PeriodKind::Instant);
    let prior_duration = prior_end(PeriodKind::Duration);

    for ctx in contexts.iter_mut() {
        let prior = match ctx.kind {
            PeriodKind::Instant => prior_instant,
            PeriodKind::Duration => prior_duration,
        };
        ctx.role = match ctx.end {
            Some(end) if end == period_end => Some(PeriodRole::Current),
            Some(end) if Some(end) == prior => Some(PeriodRole::Prior),
            _ => None,
        };
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let day = text.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn parse_xbrl_number(text: &str) -> Option<FactValue> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(FactValue::Integer(v));
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(FactValue::Decimal)
}
