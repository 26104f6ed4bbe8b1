//! Signature, extension and heuristic detection indexes

use bytescope_schema::Signature;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// How a format was recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Signature,
    Extension,
    Heuristic,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionMethod::Signature => "signature",
            DetectionMethod::Extension => "extension",
            DetectionMethod::Heuristic => "heuristic",
        })
    }
}

/// Result of format detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub format_id: String,
    pub method: DetectionMethod,
}

impl Detection {
    pub fn new(format_id: impl Into<String>, method: DetectionMethod) -> Self {
        Self {
            format_id: format_id.into(),
            method,
        }
    }
}

#[derive(Debug, Clone)]
struct SignatureEntry {
    format_id: String,
    signature: Signature,
    /// Registration order, for tie breaks
    order: u64,
}

/// Signatures grouped by their first byte at their offset
#[derive(Debug, Default)]
pub(crate) struct SignatureIndex {
    buckets: HashMap<(usize, u8), Vec<SignatureEntry>>,
    /// Signatures whose first byte is masked
    masked: Vec<SignatureEntry>,
    offsets: BTreeSet<usize>,
}

impl SignatureIndex {
    pub(crate) fn insert(&mut self, format_id: &str, signature: &Signature, order: u64) {
        let Some(&first) = signature.bytes.first() else {
            return;
        };
        let entry = SignatureEntry {
            format_id: format_id.to_string(),
            signature: signature.clone(),
            order,
        };
        let first_mask = signature
            .mask
            .as_ref()
            .and_then(|m| m.first().copied())
            .unwrap_or(0xFF);
        if first_mask == 0xFF {
            self.offsets.insert(signature.offset);
            self.buckets
                .entry((signature.offset, first))
                .or_default()
                .push(entry);
        } else {
            self.masked.push(entry);
        }
    }

    pub(crate) fn remove(&mut self, format_id: &str) {
        for bucket in self.buckets.values_mut() {
            bucket.retain(|e| e.format_id != format_id);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        self.masked.retain(|e| e.format_id != format_id);
        self.offsets = self.buckets.keys().map(|(offset, _)| *offset).collect();
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum::<usize>() + self.masked.len()
    }

    /// Longest matching signature, earliest registration on ties
    pub(crate) fn lookup(&self, data: &[u8]) -> Option<&str> {
        let bucketed = self
            .offsets
            .iter()
            .filter_map(|offset| {
                let byte = data.get(*offset)?;
                self.buckets.get(&(*offset, *byte))
            })
            .flatten();

        bucketed
            .chain(&self.masked)
            .filter(|e| e.signature.matches(data))
            .min_by(|a, b| {
                b.signature
                    .bytes
                    .len()
                    .cmp(&a.signature.bytes.len())
                    .then(a.order.cmp(&b.order))
            })
            .map(|e| e.format_id.as_str())
    }
}

/// Format ids per lowercase extension, in registration order
#[derive(Debug, Default)]
pub(crate) struct ExtensionIndex {
    extensions: HashMap<String, Vec<String>>,
}

impl ExtensionIndex {
    pub(crate) fn insert(&mut self, format_id: &str, extensions: &[String]) {
        for ext in extensions {
            let ids = self.extensions.entry(ext.to_lowercase()).or_default();
            if !ids.iter().any(|id| id == format_id) {
                ids.push(format_id.to_string());
            }
        }
    }

    pub(crate) fn remove(&mut self, format_id: &str) {
        for ids in self.extensions.values_mut() {
            ids.retain(|id| id != format_id);
        }
        self.extensions.retain(|_, ids| !ids.is_empty());
    }

    pub(crate) fn len(&self) -> usize {
        self.extensions.len()
    }

    pub(crate) fn lookup(&self, file_name: &str) -> Option<&str> {
        let ext = extension_of(file_name)?;
        self.extensions
            .get(&ext)
            .and_then(|ids| ids.first())
            .map(String::as_str)
    }
}

/// Lowercase extension of a file name (`photo.PNG` -> `png`)
pub fn extension_of(file_name: &str) -> Option<String> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// A loose content check tied to name fragments of the formats it implies
pub(crate) struct Heuristic {
    pub(crate) name: &'static str,
    pub(crate) keywords: &'static [&'static str],
    pub(crate) check: fn(&[u8]) -> bool,
}

impl Heuristic {
    /// Whether one of the words of `name` is a keyword
    pub(crate) fn names(&self, name: &str) -> bool {
        name.split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| self.keywords.iter().any(|k| word.eq_ignore_ascii_case(k)))
    }
}

pub(crate) const HEURISTICS: &[Heuristic] = &[
    Heuristic {
        name: "dos executable",
        keywords: &["dos", "mz", "pe", "exe", "executable"],
        check: |b| b.starts_with(b"MZ"),
    },
    Heuristic {
        name: "zip archive",
        keywords: &["zip"],
        check: |b| b.starts_with(b"PK") && matches!(b.get(2), Some(0x03 | 0x05 | 0x07)),
    },
    Heuristic {
        name: "png image",
        keywords: &["png"],
        check: |b| b.starts_with(&[0x89, b'P', b'N', b'G']),
    },
    Heuristic {
        name: "gif image",
        keywords: &["gif"],
        check: |b| b.starts_with(b"GIF8"),
    },
    Heuristic {
        name: "elf binary",
        keywords: &["elf"],
        check: |b| b.starts_with(&[0x7F, b'E', b'L', b'F']),
    },
];
