// Tab-delimited extract parsing
use crate::config::TabularColumns;
use crate::model::*;
use crate::parser::{DocumentFormat, ParsedDocument};
use crate::{Error, Result};
use ahash::AHashSet;
use compact_str::CompactString;
use csv::{ReaderBuilder, StringRecord};
use std::borrow::Cow;
use tracing::warn;

struct ColumnIndex {
    element: usize,
    context: Option<usize>,
    value: usize,
    unit: Option<usize>,
    decimals: Option<usize>,
    relative_period: Option<usize>,
    scope: Option<usize>,
    period_kind: Option<usize>,
}

impl ColumnIndex {
    fn resolve(document: &str, headers: &StringRecord, columns: &TabularColumns) -> Result<Self> {
        let find = |candidates: &[String]| {
            headers.iter().position(|h| {
                let h = h.trim_start_matches('\u{feff}').trim();
                candidates.iter().any(|c| c == h)
            })
        };
        let required = |candidates: &[String], what: &str| {
            find(candidates).ok_or_else(|| Error::MalformedDocument {
                document: document.to_string(),
                construct: format!("header has no {what} column (expected one of {candidates:?})"),
            })
        };

        Ok(Self {
            element: required(&columns.element, "element")?,
            context: find(&columns.context),
            value: required(&columns.value, "value")?,
            unit: find(&columns.unit),
            decimals: find(&columns.decimals),
            relative_period: find(&columns.relative_period),
            scope: find(&columns.scope),
            period_kind: find(&columns.period_kind),
        })
    }
}

pub(crate) fn parse(name: &str, data: &[u8], columns: &TabularColumns) -> Result<ParsedDocument> {
    let malformed = |construct: String| Error::MalformedDocument {
        document: name.to_string(),
        construct,
    };

    let text = decode(data).ok_or_else(|| malformed("text is not UTF-8 or UTF-16".to_string()))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| malformed(format!("header row: {e}")))?
        .clone();
    let index = ColumnIndex::resolve(name, &headers, columns)?;

    let mut facts = Vec::new();
    let mut contexts: Vec<ParsingContext> = Vec::new();
    let mut seen = AHashSet::new();

    for (row, record) in reader.records().enumerate() {
        let line = row + 2;
        let record = record.map_err(|e| malformed(format!("row {line}: {e}")))?;
        let cell = |i: Option<usize>| i.and_then(|i| record.get(i)).map(str::trim).unwrap_or("");

        let raw_element = cell(Some(index.element));
        if raw_element.is_empty() {
            return Err(malformed(format!("row {line}: empty element")));
        }
        let (prefix, element) = match raw_element.rsplit_once(':') {
            Some((prefix, local)) => (Some(CompactString::from(prefix)), CompactString::from(local)),
            None => (None, CompactString::from(raw_element)),
        };

        let context_id = cell(index.context);
        if seen.insert(context_id.to_string()) {
            contexts.push(context_from_row(
                context_id,
                cell(index.relative_period),
                cell(index.scope),
                cell(index.period_kind),
            ));
        }
        let consolidated = contexts
            .iter()
            .find(|c| c.id == context_id)
            .map_or(true, ParsingContext::is_consolidated);

        let raw_value = cell(Some(index.value));
        let value = match parse_amount(raw_value) {
            Some(value) => value,
            None => {
                warn!(document = name, row = line, element = %element, "non-numeric value kept as text");
                FactValue::Text(raw_value.to_string())
            }
        };

        let decimals = match cell(index.decimals) {
            "" => None,
            raw => Some(
                raw.parse::<Decimals>()
                    .map_err(|_| malformed(format!("row {line}: invalid decimals {raw:?}")))?,
            ),
        };
        let unit = match cell(index.unit) {
            "" => None,
            unit => Some(CompactString::from(unit)),
        };

        facts.push(RawFact {
            prefix,
            element,
            context_ref: context_id.into(),
            value,
            decimals,
            unit,
            consolidated,
        });
    }

    Ok(ParsedDocument::new(name, DocumentFormat::Tabular, facts, contexts))
}

fn decode(data: &[u8]) -> Option<Cow<'_, str>> {
    if let Some(rest) = data.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return std::str::from_utf8(rest).ok().map(Cow::Borrowed);
    }
    if let Some(rest) = data.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes).map(Cow::Owned);
    }
    if let Some(rest) = data.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes).map(Cow::Owned);
    }
    std::str::from_utf8(data).ok().map(Cow::Borrowed)
}

fn decode_utf16(data: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if data.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = data.chunks_exact(2).map(|c| unit([c[0], c[1]])).collect();
    String::from_utf16(&units).ok()
}

/// Numeric coercion for tabular cells. Accepts thousands separators,
/// parenthesized negatives and the `△` negative marker; `-` and `－`
/// alone mean no value.
pub(crate) fn parse_amount(raw: &str) -> Option<FactValue> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" || raw == "－" {
        return Some(FactValue::Nil);
    }

    let (negative, body) = if let Some(inner) = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        (true, inner.trim())
    } else if let Some(rest) = raw.strip_prefix('△').or_else(|| raw.strip_prefix('▲')) {
        (true, rest.trim())
    } else {
        (false, raw)
    };

    let cleaned: String = body.chars().filter(|&c| c != ',').collect();
    if cleaned.is_empty() || (negative && cleaned.starts_with('-')) {
        return None;
    }

    if let Ok(v) = cleaned.parse::<i64>() {
        return Some(FactValue::Integer(if negative { -v } else { v }));
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| FactValue::Decimal(if negative { -v } else { v }))
}

fn context_from_row(id: &str, relative_period: &str, scope: &str, period_kind: &str) -> ParsingContext {
    let mut flags = context_flags(id);
    match scope {
        "個別" => flags |= ContextFlags::NON_CONSOLIDATED,
        "連結" => flags.remove(ContextFlags::NON_CONSOLIDATED),
        _ => {}
    }

    let kind = match period_kind {
        "時点" => PeriodKind::Instant,
        "期間" => PeriodKind::Duration,
        _ if id.contains("Instant") => PeriodKind::Instant,
        _ => PeriodKind::Duration,
    };

    let role = match relative_period {
        "当期" | "当期末" => Some(PeriodRole::Current),
        "前期" | "前期末" => Some(PeriodRole::Prior),
        "提出日時点" => None,
        other if other.starts_with("前々期") => None,
        _ => role_from_context_id(id),
    };

    ParsingContext {
        id: id.into(),
        kind,
        start: None,
        end: None,
        role,
        flags,
    }
}

/// Scope flags encoded in an EDINET context id such as
/// `CurrentYearInstant_NonConsolidatedMember`.
pub(crate) fn context_flags(id: &str) -> ContextFlags {
    let mut flags = ContextFlags::empty();
    for part in id.split('_').skip(1) {
        if part == "NonConsolidatedMember" {
            flags |= ContextFlags::NON_CONSOLIDATED;
        } else if !part.is_empty() {
            flags |= ContextFlags::DIMENSIONAL;
        }
    }
    flags
}

/// Period role from an EDINET context id when no date or relative-year
/// column is available.
pub(crate) fn role_from_context_id(id: &str) -> Option<PeriodRole> {
    let head = id.split('_').next().unwrap_or_default();
    if let Some(rest) = head.strip_prefix("Prior") {
        let years: String = rest.chars().take_while(char::is_ascii_digit).collect();
        return match years.as_str() {
            "" | "1" => Some(PeriodRole::Prior),
            _ => None,
        };
    }
    if head.starts_with("Previous") || head.starts_with("LastYear") {
        return Some(PeriodRole::Prior);
    }
    Some(PeriodRole::Current)
}
