use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use edinet_xbrl::{DocumentFormat, ElementParser, Extractor, StatementType, Taxonomy};
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const ELEMENTS: [&str; 8] = [
    "NetSales",
    "CostOfSales",
    "GrossProfit",
    "OperatingIncome",
    "Assets",
    "Liabilities",
    "NetAssets",
    "NetCashProvidedByUsedInOperatingActivities",
];

fn instance(facts: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<xbrli:xbrl xmlns:xbrli="http://www.xbrl.org/2003/instance"
            xmlns:jppfs_cor="http://disclosure.edinet-fsa.go.jp/taxonomy/jppfs/2023-12-01/jppfs_cor">
  <xbrli:context id="CurrentYearDuration">
    <xbrli:entity><xbrli:identifier scheme="http://disclosure.edinet-fsa.go.jp">E02144-000</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:startDate>2023-04-01</xbrli:startDate><xbrli:endDate>2024-03-31</xbrli:endDate></xbrli:period>
  </xbrli:context>
  <xbrli:context id="Prior1YearDuration">
    <xbrli:entity><xbrli:identifier scheme="http://disclosure.edinet-fsa.go.jp">E02144-000</xbrli:identifier></xbrli:entity>
    <xbrli:period><xbrli:startDate>2022-04-01</xbrli:startDate><xbrli:endDate>2023-03-31</xbrli:endDate></xbrli:period>
  </xbrli:context>
  <xbrli:unit id="JPY"><xbrli:measure>iso4217:JPY</xbrli:measure></xbrli:unit>
"#,
    );
    for i in 0..facts {
        let element = ELEMENTS[i % ELEMENTS.len()];
        let context = if i % 2 == 0 {
            "CurrentYearDuration"
        } else {
            "Prior1YearDuration"
        };
        xml.push_str(&format!(
            "  <jppfs_cor:{element} contextRef=\"{context}\" unitRef=\"JPY\" decimals=\"-6\">{}</jppfs_cor:{element}>\n",
            1_000_000 * (i as i64 + 1)
        ));
    }
    xml.push_str("</xbrli:xbrl>\n");
    xml
}

fn archive(xml: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            "XBRL/PublicDoc/jpcrp030000-asr-001_E02144-000_2024-03-31_01_2024-06-18.xbrl",
            SimpleFileOptions::default(),
        )
        .unwrap();
    writer.write_all(xml.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

fn parse_instance(c: &mut Criterion) {
    let parser = ElementParser::new();
    let period_end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
    let xml = instance(2_000);

    c.bench_function("parse_instance_2000_facts", |b| {
        b.iter(|| {
            parser.parse(
                "instance.xbrl",
                black_box(xml.as_bytes()),
                DocumentFormat::Xbrl,
                period_end,
            )
        });
    });
}

fn extract_pipeline(c: &mut Criterion) {
    let extractor = Extractor::new(Arc::new(Taxonomy::builtin().unwrap()));
    let period_end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
    let data = archive(&instance(2_000));

    c.bench_function("extract_income_statement", |b| {
        b.iter(|| extractor.extract(black_box(&data), StatementType::IncomeStatement, period_end));
    });
    c.bench_function("extract_all_statements", |b| {
        b.iter(|| extractor.extract_all(black_box(&data), period_end));
    });
}

criterion_group!(benches, parse_instance, extract_pipeline);
criterion_main!(benches);
