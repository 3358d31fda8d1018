//! Property keys.
//!
//! Both surface syntaxes address the same slots:
//!
//! ```text
//! enclosure.discovery.source(1).compute(2).column          (flat)
//! monitors.enclosure.discovery.sources.s1.compute(2).column (structured)
//! pre.source(1).type / pre.lsblk.type / pre.sources.lsblk.type
//! detection.criteria(1).step(2).type
//! hdf.displayname, constants.NAME, sudo(1).command, embeddedfile(3)
//! StatusTable(ok) / translations.StatusTable.ok
//! ```
//!
//! Keys are case-insensitive. Indices are 1-based.

use crate::error::CompileError;
use crate::model::{Phase, SourceScope};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Source address within a connector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceAddr {
    pub scope: SourceScope,
    /// `source(N)` for flat keys, the author's name for structured keys.
    pub name: String,
    /// Index carried by the key itself (flat syntax only).
    pub index: Option<u32>,
}

impl SourceAddr {
    pub fn key(&self) -> String {
        self.scope.source_key(&self.name)
    }
}

/// The entity a key addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Connector,
    Detection,
    Constant { name: String },
    Sudo { index: u32 },
    EmbeddedFile { index: u32 },
    TranslationEntry { table: String, entry: String },
    Criterion { index: u32 },
    CriterionStep { criterion: u32, step: u32 },
    Task(SourceScope),
    Source(SourceAddr),
    Compute { source: SourceAddr, index: u32 },
    SourceStep { source: SourceAddr, index: u32 },
}

/// Slot discriminant, used by rules to declare which keys they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Connector,
    Detection,
    Constant,
    Sudo,
    EmbeddedFile,
    TranslationEntry,
    Criterion,
    CriterionStep,
    Task,
    Source,
    Compute,
    SourceStep,
}

impl Slot {
    pub fn kind(&self) -> SlotKind {
        match self {
            Slot::Connector => SlotKind::Connector,
            Slot::Detection => SlotKind::Detection,
            Slot::Constant { .. } => SlotKind::Constant,
            Slot::Sudo { .. } => SlotKind::Sudo,
            Slot::EmbeddedFile { .. } => SlotKind::EmbeddedFile,
            Slot::TranslationEntry { .. } => SlotKind::TranslationEntry,
            Slot::Criterion { .. } => SlotKind::Criterion,
            Slot::CriterionStep { .. } => SlotKind::CriterionStep,
            Slot::Task(_) => SlotKind::Task,
            Slot::Source(_) => SlotKind::Source,
            Slot::Compute { .. } => SlotKind::Compute,
            Slot::SourceStep { .. } => SlotKind::SourceStep,
        }
    }

    /// Human-readable entity name for diagnostics.
    pub fn entity(&self) -> String {
        match self {
            Slot::Connector => "connector".to_string(),
            Slot::Detection => "detection".to_string(),
            Slot::Constant { name } => format!("constant {name}"),
            Slot::Sudo { index } => format!("sudo({index})"),
            Slot::EmbeddedFile { index } => format!("EmbeddedFile({index})"),
            Slot::TranslationEntry { table, .. } => format!("translation table {table}"),
            Slot::Criterion { index } => format!("detection.criteria({index})"),
            Slot::CriterionStep { criterion, step } => {
                format!("detection.criteria({criterion}).step({step})")
            }
            Slot::Task(scope) => scope.to_string(),
            Slot::Source(source) => source.key(),
            Slot::Compute { source, index } => format!("{}.compute({index})", source.key()),
            Slot::SourceStep { source, index } => format!("{}.step({index})", source.key()),
        }
    }
}

/// A parsed property key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    pub raw: String,
    pub slot: Slot,
    /// Monitor name as written, for monitor-scoped keys.
    pub monitor: Option<String>,
    /// Lowercased property segments joined by `.`, index suffix removed.
    /// Empty when the key addresses the slot itself.
    pub property: String,
    /// Property as written.
    pub property_raw: String,
    /// `N` of a trailing `prop(N)` segment.
    pub property_index: Option<u32>,
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Words that introduce an indexed segment and therefore never name a
/// translation table.
const RESERVED_INDEXED: [&str; 7] = [
    "source",
    "compute",
    "criteria",
    "criterion",
    "step",
    "sudo",
    "embeddedfile",
];

static LEGACY_TRANSLATION_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+)\((.*)\)$").expect("valid translation entry regex"));

static INDEXED_PROPERTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][\w]*)\(([^)]*)\)$").expect("valid property regex"));

impl KeyPath {
    /// Parse `key`. `Ok(None)` means the key has no recognizable shape.
    pub fn parse(key: &str) -> Result<Option<KeyPath>, CompileError> {
        let raw = key.trim();
        if raw.is_empty() {
            return Ok(None);
        }

        if let Some(caps) = LEGACY_TRANSLATION_ENTRY.captures(raw) {
            let table = &caps[1];
            if !RESERVED_INDEXED.contains(&table.to_ascii_lowercase().as_str()) {
                let slot = Slot::TranslationEntry {
                    table: table.to_string(),
                    entry: unquote_entry(&caps[2]),
                };
                return Ok(Some(KeyPath::build(raw, slot, None, &[])?));
            }
        }

        let segments: Vec<&str> = raw.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(malformed(raw, "empty path segment"));
        }
        let head = segments[0].to_ascii_lowercase();

        match head.as_str() {
            "hdf" | "connector" => {
                if segments.len() < 2 {
                    return Ok(None);
                }
                Ok(Some(KeyPath::build(raw, Slot::Connector, None, &segments[1..])?))
            }
            "detection" => parse_detection(raw, &segments),
            "constants" | "constant" => {
                if segments.len() < 2 {
                    return Ok(None);
                }
                let slot = Slot::Constant {
                    name: segments[1..].join("."),
                };
                Ok(Some(KeyPath::build(raw, slot, None, &[])?))
            }
            "translations" => {
                if segments.len() < 3 {
                    return Ok(None);
                }
                let slot = Slot::TranslationEntry {
                    table: segments[1].to_string(),
                    entry: segments[2..].join("."),
                };
                Ok(Some(KeyPath::build(raw, slot, None, &[])?))
            }
            "pre" => parse_pre(raw, &segments),
            "monitors" => {
                if segments.len() < 3 {
                    return Ok(None);
                }
                let Some(phase) = Phase::parse(segments[2]) else {
                    return Ok(None);
                };
                parse_task(raw, segments[1], phase, &segments[3..], true)
            }
            _ => {
                if let Some(index) = indexed(raw, segments[0], "sudo")? {
                    return Ok(Some(KeyPath::build(
                        raw,
                        Slot::Sudo { index },
                        None,
                        &segments[1..],
                    )?));
                }
                if let Some(index) = indexed(raw, segments[0], "embeddedfile")? {
                    return Ok(Some(KeyPath::build(
                        raw,
                        Slot::EmbeddedFile { index },
                        None,
                        &segments[1..],
                    )?));
                }
                if segments.len() < 3 {
                    return Ok(None);
                }
                let Some(phase) = Phase::parse(segments[1]) else {
                    return Ok(None);
                };
                parse_task(raw, segments[0], phase, &segments[2..], false)
            }
        }
    }

    fn build(
        raw: &str,
        slot: Slot,
        monitor: Option<String>,
        property: &[&str],
    ) -> Result<KeyPath, CompileError> {
        let property_raw = property.join(".");
        let mut lowered: Vec<String> = property.iter().map(|s| s.to_ascii_lowercase()).collect();
        let mut property_index = None;
        if let Some(last) = lowered.last_mut() {
            if let Some(caps) = INDEXED_PROPERTY.captures(last) {
                let index = parse_index(raw, &caps[2])?;
                property_index = Some(index);
                *last = caps[1].to_string();
            }
        }
        Ok(KeyPath {
            raw: raw.to_string(),
            slot,
            monitor,
            property: lowered.join("."),
            property_raw,
            property_index,
        })
    }

    pub fn slot_kind(&self) -> SlotKind {
        self.slot.kind()
    }

    /// The source this key targets, directly or through one of its computes
    /// or steps.
    pub fn source(&self) -> Option<&SourceAddr> {
        match &self.slot {
            Slot::Source(source)
            | Slot::Compute { source, .. }
            | Slot::SourceStep { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn scope(&self) -> Option<&SourceScope> {
        match &self.slot {
            Slot::Task(scope) => Some(scope),
            _ => self.source().map(|s| &s.scope),
        }
    }
}

fn parse_detection(raw: &str, segments: &[&str]) -> Result<Option<KeyPath>, CompileError> {
    if segments.len() < 2 {
        return Ok(None);
    }
    let criterion = match indexed(raw, segments[1], "criteria")? {
        Some(index) => Some(index),
        None => indexed(raw, segments[1], "criterion")?,
    };
    let Some(criterion) = criterion else {
        return Ok(Some(KeyPath::build(raw, Slot::Detection, None, &segments[1..])?));
    };
    if let Some(step) = segments.get(2) {
        if let Some(step) = indexed(raw, step, "step")? {
            let slot = Slot::CriterionStep { criterion, step };
            return Ok(Some(KeyPath::build(raw, slot, None, &segments[3..])?));
        }
    }
    let slot = Slot::Criterion { index: criterion };
    Ok(Some(KeyPath::build(raw, slot, None, &segments[2..])?))
}

fn parse_pre(raw: &str, segments: &[&str]) -> Result<Option<KeyPath>, CompileError> {
    match segments.len() {
        1 => Ok(None),
        2 => {
            if let Some(index) = indexed(raw, segments[1], "source")? {
                let source = flat_source(SourceScope::Pre, index);
                return Ok(Some(KeyPath::build(raw, Slot::Source(source), None, &[])?));
            }
            Ok(Some(KeyPath::build(
                raw,
                Slot::Task(SourceScope::Pre),
                None,
                &segments[1..],
            )?))
        }
        _ => {
            let rest = if segments[1].eq_ignore_ascii_case("sources") {
                &segments[2..]
            } else {
                &segments[1..]
            };
            source_key(raw, SourceScope::Pre, None, rest)
        }
    }
}

fn parse_task(
    raw: &str,
    monitor: &str,
    phase: Phase,
    rest: &[&str],
    structured: bool,
) -> Result<Option<KeyPath>, CompileError> {
    let scope = SourceScope::task(monitor, phase);
    let monitor = Some(monitor.to_string());
    if rest.is_empty() {
        return Ok(None);
    }
    if structured && rest[0].eq_ignore_ascii_case("sources") {
        if rest.len() < 2 {
            return Ok(None);
        }
        return source_key(raw, scope, monitor, &rest[1..]);
    }
    if indexed(raw, rest[0], "source")?.is_some() {
        return source_key(raw, scope, monitor, rest);
    }
    Ok(Some(KeyPath::build(raw, Slot::Task(scope), monitor, rest)?))
}

/// `rest` starts with the source name (or `source(N)`). A bare `source` is
/// an ordinary name here.
fn source_key(
    raw: &str,
    scope: SourceScope,
    monitor: Option<String>,
    rest: &[&str],
) -> Result<Option<KeyPath>, CompileError> {
    let index = if rest[0].eq_ignore_ascii_case("source") {
        None
    } else {
        indexed(raw, rest[0], "source")?
    };
    let source = match index {
        Some(index) => flat_source(scope, index),
        None => SourceAddr {
            scope,
            name: rest[0].to_string(),
            index: None,
        },
    };
    let tail = &rest[1..];
    if let Some(first) = tail.first() {
        if let Some(index) = indexed(raw, first, "compute")? {
            let slot = Slot::Compute { source, index };
            return Ok(Some(KeyPath::build(raw, slot, monitor, &tail[1..])?));
        }
        if let Some(index) = indexed(raw, first, "step")? {
            let slot = Slot::SourceStep { source, index };
            return Ok(Some(KeyPath::build(raw, slot, monitor, &tail[1..])?));
        }
    }
    Ok(Some(KeyPath::build(raw, Slot::Source(source), monitor, tail)?))
}

/// `Table("OK")` and `Table(OK)` address the same entry.
fn unquote_entry(entry: &str) -> String {
    let trimmed = entry.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

fn flat_source(scope: SourceScope, index: u32) -> SourceAddr {
    SourceAddr {
        scope,
        name: format!("source({index})"),
        index: Some(index),
    }
}

/// `Some(N)` when `segment` is `word(N)`. A bare `word` or a bad index is a
/// malformed key; any other segment is `None`.
fn indexed(raw: &str, segment: &str, word: &str) -> Result<Option<u32>, CompileError> {
    let lower = segment.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix(word) else {
        return Ok(None);
    };
    if rest.is_empty() {
        return Err(malformed(raw, format!("'{segment}' is missing its index")));
    }
    let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) else {
        return Ok(None);
    };
    parse_index(raw, inner).map(Some)
}

fn parse_index(raw: &str, text: &str) -> Result<u32, CompileError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(malformed(raw, "empty index"));
    }
    let value: i64 = text
        .parse()
        .map_err(|_| malformed(raw, format!("index '{text}' is not a number")))?;
    if value < 1 {
        return Err(malformed(raw, format!("index {value} must be positive")));
    }
    u32::try_from(value).map_err(|_| malformed(raw, format!("index {value} is too large")))
}

fn malformed(key: &str, reason: impl Into<String>) -> CompileError {
    CompileError::MalformedKey {
        key: key.to_string(),
        reason: reason.into(),
    }
}
