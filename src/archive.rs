// Safe in-memory extraction of filing archives
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

const LOCAL_HEADER_MAGIC: &[u8] = b"PK\x03\x04";
const EMPTY_ARCHIVE_MAGIC: &[u8] = b"PK\x05\x06";
/// Upper bound on buffer space reserved from a declared entry size.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Ceilings applied before and during decompression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_entry_size: u64,
    pub max_total_size: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            max_entry_size: 50 * 1024 * 1024,
            max_total_size: 500 * 1024 * 1024,
        }
    }
}

/// Decompressed archive entries keyed by normalized path, in lexical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveEntries {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveEntries {
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<u8>> {
        self.entries
    }
}

impl FromIterator<(String, Vec<u8>)> for ArchiveEntries {
    fn from_iter<T: IntoIterator<Item = (String, Vec<u8>)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    limits: ArchiveLimits,
}

impl ArchiveExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: ArchiveLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> &ArchiveLimits {
        &self.limits
    }

    /// Validate and decompress `data`. Nothing is written to disk and no
    /// partial result is returned on failure.
    pub fn extract(&self, data: &[u8]) -> Result<ArchiveEntries> {
        if !data.starts_with(LOCAL_HEADER_MAGIC) && !data.starts_with(EMPTY_ARCHIVE_MAGIC) {
            return Err(Error::InvalidArchive(describe_payload(data)));
        }

        let mut archive = ZipArchive::new(Cursor::new(data))
            .map_err(|e| Error::InvalidArchive(format!("unreadable central directory: {e}")))?;

        if archive.len() > self.limits.max_entries {
            return Err(Error::ResourceLimitExceeded {
                entry: None,
                reason: format!(
                    "{} entries exceeds limit of {}",
                    archive.len(),
                    self.limits.max_entries
                ),
            });
        }

        let plan = self.plan(&mut archive)?;

        let mut entries = BTreeMap::new();
        let mut total: u64 = 0;
        for (index, path) in plan {
            let mut file = archive
                .by_index(index)
                .map_err(|e| Error::InvalidArchive(format!("{path}: {e}")))?;

            let remaining = self.limits.max_total_size - total;
            let cap = self.limits.max_entry_size.min(remaining);
            let reserve = file.size().min(cap).min(MAX_PREALLOCATION);
            let mut buf = Vec::with_capacity(reserve as usize);
            (&mut file)
                .take(cap.saturating_add(1))
                .read_to_end(&mut buf)
                .map_err(|e| Error::InvalidArchive(format!("{path}: {e}")))?;

            if buf.len() as u64 > cap {
                return Err(Error::ResourceLimitExceeded {
                    entry: Some(path),
                    reason: "decompressed size exceeds declared limits".to_string(),
                });
            }
            total += buf.len() as u64;
            entries.insert(path, buf);
        }

        debug!(entries = entries.len(), bytes = total, "archive extracted");
        Ok(ArchiveEntries { entries })
    }

    /// Check declared sizes and containment for every entry before any
    /// payload is decompressed. Returns the file entries to read.
    fn plan(&self, archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Vec<(usize, String)>> {
        let mut plan = Vec::with_capacity(archive.len());
        let mut seen = ahash::AHashSet::with_capacity(archive.len());
        let mut declared_total: u64 = 0;

        for index in 0..archive.len() {
            let file = archive
                .by_index_raw(index)
                .map_err(|e| Error::InvalidArchive(format!("entry {index}: {e}")))?;
            let name = file.name().to_string();

            if file.size() > self.limits.max_entry_size {
                return Err(Error::ResourceLimitExceeded {
                    entry: Some(name),
                    reason: format!(
                        "declared size {} exceeds per-entry limit of {}",
                        file.size(),
                        self.limits.max_entry_size
                    ),
                });
            }
            declared_total = declared_total.saturating_add(file.size());
            if declared_total > self.limits.max_total_size {
                return Err(Error::ResourceLimitExceeded {
                    entry: Some(name),
                    reason: format!(
                        "declared total size exceeds limit of {}",
                        self.limits.max_total_size
                    ),
                });
            }

            let path = match contain(&name) {
                Containment::Inside(path) => path,
                Containment::Root if file.is_dir() => continue,
                Containment::Root | Containment::Escapes => {
                    return Err(Error::PathTraversal { entry: name });
                }
            };
            if file.is_dir() {
                continue;
            }
            if file.encrypted() {
                return Err(Error::InvalidArchive(format!("{name}: encrypted entry")));
            }
            if !seen.insert(path.clone()) {
                return Err(Error::InvalidArchive(format!("duplicate entry {path}")));
            }
            plan.push((index, path));
        }

        Ok(plan)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Containment {
    Inside(String),
    Root,
    Escapes,
}

/// Normalize an entry name against a virtual extraction root.
fn contain(name: &str) -> Containment {
    let bytes = name.as_bytes();
    let absolute = name.starts_with('/')
        || name.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':');
    if absolute || name.contains('\0') {
        return Containment::Escapes;
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Containment::Escapes;
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Containment::Root
    } else {
        Containment::Inside(parts.join("/"))
    }
}

fn describe_payload(data: &[u8]) -> String {
    let head = &data[..data.len().min(64)];
    let trimmed = String::from_utf8_lossy(head);
    let trimmed = trimmed.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('<') {
        format!("expected zip signature, payload looks like a text response: {trimmed:?}")
    } else {
        format!("expected zip signature, found {} bytes without it", data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const CENTRAL_HEADER_MAGIC: &[u8] = b"PK\x01\x02";

    fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_contain() {
        assert_eq!(contain("a/b.xbrl"), Containment::Inside("a/b.xbrl".into()));
        assert_eq!(contain("./a//b"), Containment::Inside("a/b".into()));
        assert_eq!(contain("a/../b"), Containment::Inside("b".into()));
        assert_eq!(contain("a\\..\\..\\b"), Containment::Escapes);
        assert_eq!(contain("../../secret"), Containment::Escapes);
        assert_eq!(contain("/etc/passwd"), Containment::Escapes);
        assert_eq!(contain("C:\\windows"), Containment::Escapes);
        assert_eq!(contain("a/.."), Containment::Root);
    }

    #[test]
    fn test_extracts_all_entries() {
        let data = build(&[
            ("XBRL/PublicDoc/a.xbrl", b"<xbrl/>"),
            ("XBRL/PublicDoc/b.tsv", b"element\tvalue\n"),
        ]);
        let entries = ArchiveExtractor::new().extract(&data).unwrap();
        let names: Vec<_> = entries.names().collect();
        assert_eq!(names, vec!["XBRL/PublicDoc/a.xbrl", "XBRL/PublicDoc/b.tsv"]);
        assert_eq!(entries.get("XBRL/PublicDoc/a.xbrl"), Some(&b"<xbrl/>"[..]));
    }

    #[test]
    fn test_rejects_non_zip_payload() {
        let err = ArchiveExtractor::new()
            .extract(br#"{"statusCode": 404, "message": "not found"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArchive(msg) if msg.contains("text response")));
    }

    #[test]
    fn test_rejects_corrupt_zip() {
        let err = ArchiveExtractor::new()
            .extract(b"PK\x03\x04garbage")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArchive(_)));
    }

    #[test]
    fn test_rejects_traversal() {
        let data = build(&[("ok.txt", b"fine"), ("../../secret", b"gotcha")]);
        let err = ArchiveExtractor::new().extract(&data).unwrap_err();
        assert!(matches!(err, Error::PathTraversal { entry } if entry == "../../secret"));
    }

    #[test]
    fn test_rejects_too_many_entries() {
        let data = build(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let limits = ArchiveLimits {
            max_entries: 2,
            ..ArchiveLimits::default()
        };
        let err = ArchiveExtractor::new()
            .with_limits(limits)
            .extract(&data)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded { entry: None, .. }));
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let big = vec![b'0'; 4096];
        let data = build(&[("big.xbrl", &big)]);
        let limits = ArchiveLimits {
            max_entry_size: 1024,
            ..ArchiveLimits::default()
        };
        let err = ArchiveExtractor::new()
            .with_limits(limits)
            .extract(&data)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded { entry: Some(e), .. } if e == "big.xbrl"));
    }

    #[test]
    fn test_rejects_total_size() {
        let chunk = vec![b'x'; 600];
        let data = build(&[("a", &chunk), ("b", &chunk)]);
        let limits = ArchiveLimits {
            max_entry_size: 1000,
            max_total_size: 1000,
            ..ArchiveLimits::default()
        };
        let err = ArchiveExtractor::new()
            .with_limits(limits)
            .extract(&data)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded { .. }));
    }

    #[test]
    fn test_unbounded_limits() {
        let data = build(&[("a.xbrl", b"<xbrl/>")]);
        let limits = ArchiveLimits {
            max_entries: usize::MAX,
            max_entry_size: u64::MAX,
            max_total_size: u64::MAX,
        };
        let entries = ArchiveExtractor::new()
            .with_limits(limits)
            .extract(&data)
            .unwrap();
        assert_eq!(entries.get("a.xbrl"), Some(&b"<xbrl/>"[..]));
    }

    #[test]
    fn test_rejects_understated_size() {
        let big = vec![b'0'; 200 * 1024];
        let mut data = build(&[("big.xbrl", &big)]);

        // Declare 10 bytes in both the local and the central header.
        let declared = 10u32.to_le_bytes();
        data[22..26].copy_from_slice(&declared);
        let central = data
            .windows(CENTRAL_HEADER_MAGIC.len())
            .rposition(|w| w == CENTRAL_HEADER_MAGIC)
            .unwrap();
        data[central + 24..central + 28].copy_from_slice(&declared);

        let limits = ArchiveLimits {
            max_entry_size: 1024,
            ..ArchiveLimits::default()
        };
        let err = ArchiveExtractor::new()
            .with_limits(limits)
            .extract(&data)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceLimitExceeded { entry: Some(ref e), ref reason }
                if e == "big.xbrl" && reason.contains("decompressed")
        ));
    }

    #[test]
    fn test_empty_archive() {
        let data = build(&[]);
        let entries = ArchiveExtractor::new().extract(&data).unwrap();
        assert!(entries.is_empty());
    }
}
