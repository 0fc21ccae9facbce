//! Signature matching over raw bytes.
//!
//! The analyzer consumes matchers through the [`SignatureMatcher`] trait; the
//! bundled [`MagicScanner`] matches magic-number rules loadable from a JSON
//! file, with a builtin rule set covering the formats the resource heuristic
//! cares about. [`identify_file_type`] is a separate content sniff used as a
//! best-guess report when an input fails to parse as a PE.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::PescopeError;

/// One signature hit: rule name plus named string fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMatch {
    pub rule: String,
    fields: BTreeMap<String, String>,
}

impl SignatureMatch {
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.field("description")
    }

    pub fn extension(&self) -> Option<&str> {
        self.field("extension")
    }
}

/// Byte-pattern matcher contract.
pub trait SignatureMatcher {
    /// Load rules from a file. A missing or unreadable rule file degrades to
    /// the current rule set and returns `false`; it is never an error.
    fn load_rules(&mut self, path: &Path) -> bool;

    /// Scan a byte buffer, returning every matching rule.
    fn scan_bytes(&self, data: &[u8]) -> Vec<SignatureMatch>;

    /// Scan a file's contents. IO failures yield an empty match list.
    fn scan_file(&self, path: &Path) -> Vec<SignatureMatch>;
}

/// JSON rule shape: `magic` is a hex string matched at `offset`.
#[derive(Debug, Clone, Deserialize)]
struct RawRule {
    name: String,
    description: String,
    extension: String,
    magic: String,
    #[serde(default)]
    offset: usize,
}

#[derive(Debug, Clone)]
struct MagicRule {
    name: String,
    description: String,
    extension: String,
    pattern: Vec<u8>,
    offset: usize,
}

impl MagicRule {
    fn matches(&self, data: &[u8]) -> bool {
        data.get(self.offset..self.offset + self.pattern.len())
            .map(|window| window == self.pattern.as_slice())
            .unwrap_or(false)
    }

    fn to_match(&self) -> SignatureMatch {
        SignatureMatch::new(self.name.clone())
            .with_field("description", self.description.clone())
            .with_field("extension", self.extension.clone())
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

/// Magic-number scanner with a builtin rule set.
#[derive(Debug, Clone)]
pub struct MagicScanner {
    rules: Vec<MagicRule>,
}

impl MagicScanner {
    /// Scanner with only the builtin rules.
    pub fn builtin() -> Self {
        let rules = vec![
            MagicRule {
                name: "pe_executable".into(),
                description: "PE executable".into(),
                extension: ".exe".into(),
                pattern: b"MZ".to_vec(),
                offset: 0,
            },
            MagicRule {
                name: "cabinet_archive".into(),
                description: "Microsoft Cabinet archive".into(),
                extension: ".cab".into(),
                pattern: b"MSCF".to_vec(),
                offset: 0,
            },
            MagicRule {
                name: "pdf_document".into(),
                description: "PDF document".into(),
                extension: ".pdf".into(),
                pattern: b"%PDF".to_vec(),
                offset: 0,
            },
        ];
        Self { rules }
    }

    /// Empty scanner; rules come solely from [`load_rules`].
    ///
    /// [`load_rules`]: SignatureMatcher::load_rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Load rules from a JSON file, returning how many were added.
    ///
    /// Rules with invalid hex magic are skipped; an unreadable or malformed
    /// file leaves the current rule set untouched.
    pub fn try_load_rules(&mut self, path: &Path) -> crate::error::Result<usize> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| PescopeError::Rules(format!("{}: {}", path.display(), err)))?;
        let raw: Vec<RawRule> = serde_json::from_str(&text)
            .map_err(|err| PescopeError::Rules(format!("{}: {}", path.display(), err)))?;

        let mut added = 0;
        for rule in raw {
            let Some(pattern) = decode_hex(&rule.magic) else {
                warn!(rule = %rule.name, "rule magic is not valid hex, skipping");
                continue;
            };
            if pattern.is_empty() {
                continue;
            }
            self.rules.push(MagicRule {
                name: rule.name,
                description: rule.description,
                extension: rule.extension,
                pattern,
                offset: rule.offset,
            });
            added += 1;
        }
        Ok(added)
    }
}

impl SignatureMatcher for MagicScanner {
    fn load_rules(&mut self, path: &Path) -> bool {
        match self.try_load_rules(path) {
            Ok(added) => {
                debug!(path = %path.display(), added, "rule file loaded");
                true
            }
            Err(err) => {
                warn!(error = %err, "keeping current rules");
                false
            }
        }
    }

    fn scan_bytes(&self, data: &[u8]) -> Vec<SignatureMatch> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(data))
            .map(MagicRule::to_match)
            .collect()
    }

    fn scan_file(&self, path: &Path) -> Vec<SignatureMatch> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "scan target unreadable");
                return Vec::new();
            }
        };
        // Safety: the mapping is read-only and dropped before return.
        let map = match unsafe { Mmap::map(&file) } {
            Ok(map) => map,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "mmap failed");
                return Vec::new();
            }
        };
        self.scan_bytes(&map)
    }
}

/// Content-based file typing, used as a best-guess report when the PE parse
/// fails.
pub fn identify_file_type(data: &[u8]) -> Option<SignatureMatch> {
    let kind = infer::get(data)?;
    Some(
        SignatureMatch::new(format!("infer_{}", kind.extension()))
            .with_field("description", kind.mime_type())
            .with_field("extension", format!(".{}", kind.extension())),
    )
}
