//! Text side-tables: the `md1_file_map` name mapping and the `meta_info`
//! header sidecar.
//!
//! Both formats are parsed leniently.  Blank lines are ignored and lines that
//! do not split into exactly one `key=value` pair are skipped, so tables
//! written by older tooling never fail to load.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::codec::CompressionFormat;
use crate::header::{HeaderField, Md1Header};

/// Internal name (and marker text) of the synthetic mapping entry.
pub const FILE_MAP_NAME: &str = "md1_file_map";
pub const META_INFO_NAME: &str = "meta_info";

fn split_pair(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if line.is_empty() {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    if value.contains('=') {
        return None;
    }
    Some((key, value))
}

// ── FileMapping ───────────────────────────────────────────────────────────────

/// External file name → internal (header) name.
///
/// Keys are unique; re-inserting a key replaces its value in place so the
/// original line order survives a parse/serialize cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileMapping {
    pairs: Vec<(String, String)>,
}

impl FileMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `external=internal` lines.
    pub fn parse(text: &str) -> Self {
        let mut mapping = Self::new();
        for (external, internal) in text.lines().filter_map(split_pair) {
            mapping.insert(external, internal);
        }
        mapping
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (external, internal) in &self.pairs {
            let _ = writeln!(out, "{external}={internal}");
        }
        out
    }

    pub fn insert(&mut self, external: impl Into<String>, internal: impl Into<String>) {
        let external = external.into();
        let internal = internal.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == external) {
            Some(pair) => pair.1 = internal,
            None       => self.pairs.push((external, internal)),
        }
    }

    pub fn get(&self, external: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == external).map(|(_, v)| v.as_str())
    }

    /// Reverse lookup: the first external name mapped onto `internal`.
    pub fn external_for(&self, internal: &str) -> Option<&str> {
        self.pairs.iter().find(|(_, v)| v == internal).map(|(k, _)| k.as_str())
    }

    /// Resolve a candidate file name against the keys, ignoring case and also
    /// accepting a key that is the candidate plus `.gz` or `.xz`.
    ///
    /// Returns the matched `(key, internal)` pair; keys are tried in order.
    pub fn resolve(&self, candidate: &str) -> Option<(&str, &str)> {
        let lower = candidate.to_lowercase();
        let gz = format!("{lower}.gz");
        let xz = format!("{lower}.xz");
        self.pairs
            .iter()
            .find(|(k, _)| {
                let key = k.to_lowercase();
                key == lower || key == gz || key == xz
            })
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compression a key's suffix asks for, if any.
    pub fn compression_for_key(key: &str) -> Option<CompressionFormat> {
        CompressionFormat::from_suffix(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ── MetaInfo ──────────────────────────────────────────────────────────────────

/// Parsed `meta_info`: internal name → field name → raw value.
#[derive(Debug, Clone, Default)]
pub struct MetaInfo {
    blocks: HashMap<String, HashMap<String, String>>,
}

impl MetaInfo {
    /// Blocks are separated by blank lines.  A `name=X` line opens a block for
    /// `X` (flushing any open one); other pairs land in the open block.  A
    /// final block without a trailing blank line is still kept.
    pub fn parse(text: &str) -> Self {
        let mut blocks = HashMap::new();
        let mut current: Option<(String, HashMap<String, String>)> = None;

        for line in text.lines() {
            if line.trim().is_empty() {
                if let Some((name, fields)) = current.take() {
                    blocks.insert(name, fields);
                }
                continue;
            }
            let Some((key, value)) = split_pair(line) else { continue };
            if key == "name" {
                if let Some((name, fields)) = current.take() {
                    blocks.insert(name, fields);
                }
                current = Some((value.to_owned(), HashMap::new()));
            } else if let Some((_, fields)) = current.as_mut() {
                fields.insert(key.to_owned(), value.to_owned());
            }
        }
        if let Some((name, fields)) = current {
            blocks.insert(name, fields);
        }
        Self { blocks }
    }

    pub fn get(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.blocks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Copy every overridable field present in `name`'s block onto `header`.
    /// Values that are not valid hex leave the field untouched.
    ///
    /// Returns `false` when there is no block for `name`.
    pub fn apply(&self, name: &str, header: &mut Md1Header) -> bool {
        let Some(fields) = self.blocks.get(name) else { return false };
        for field in HeaderField::ALL {
            if let Some(value) = fields.get(field.key()).and_then(|v| parse_hex(v)) {
                *header.field_mut(field) = value;
            }
        }
        true
    }
}

fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

/// One `meta_info` block for an entry: `name=` first, then every other
/// header field, then the blank separator line.
pub fn format_meta_block(name: &str, header: &Md1Header) -> String {
    let mut out = format!("name={name}\n");
    for (key, value) in header.meta_fields() {
        let _ = writeln!(out, "{key}={value}");
    }
    out.push('\n');
    out
}
