//! Placeholder scanning.
//!
//! Recognized placeholder forms:
//!
//! ```text
//! ${source::monitors.cpu.discovery.sources.s1}   bracketed, with a category
//! $monitors.cpu.discovery.sources.s1$            dollar-delimited path
//! %Cpu.Discovery.Source(1)%                      legacy percent path
//! %{USERNAME}                                    run-time macro
//! ```
//!
//! Only paths that address a source of some task are compile-time source
//! references. Per-row placeholders (`$entry.column(1)$`) and macros share the
//! surface syntax but are resolved by the execution engine.

use crate::model::compute::Compute;
use crate::model::source::Source;
use crate::model::{Phase, SourceScope};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Macros the execution engine substitutes per request.
pub const KNOWN_MACROS: [&str; 6] = [
    "USERNAME",
    "PASSWORD",
    "HOSTNAME",
    "AUTHENTICATION_TOKEN",
    "BASIC_AUTH_BASE64",
    "PASSWORD_BASE64",
];

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\$\{(?P<cat>[A-Za-z_]+)::(?P<fbody>[^}]*)\}|%\{(?P<mbody>[^}\s]+)\}|\$(?P<dbody>[A-Za-z][^$\s]*?)\$|%(?P<pbody>[A-Za-z][\w.()]*)%",
    )
    .expect("valid placeholder regex")
});

static FLAT_SOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([\w-]+)\.(discovery|collect|simple)\.source\((\d+)\)$")
        .expect("valid flat source regex")
});

static ROW_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^entry(\.(column\(\d+\)|raw))?$").expect("valid row placeholder regex")
});

/// A compile-time reference to another source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub scope: SourceScope,
    pub name: String,
}

impl SourceRef {
    /// Canonical key, as carried by [`Source::key`].
    pub fn key(&self) -> String {
        self.scope.source_key(&self.name)
    }

    pub fn refers_to(&self, scope: &SourceScope, name: &str) -> bool {
        self.scope == *scope && self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A classified placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Source(SourceRef),
    /// Per-row accessor, resolved while iterating a table.
    RowPlaceholder(String),
    Macro(String),
    Constant(String),
    EmbeddedFile(u32),
    Translation(String),
    Other(String),
}

/// Every placeholder in `text`, classified, in order of appearance.
pub fn scan(text: &str) -> Vec<Reference> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| {
            if let (Some(cat), Some(body)) = (caps.name("cat"), caps.name("fbody")) {
                classify_bracketed(cat.as_str(), body.as_str().trim())
            } else if let Some(body) = caps.name("mbody") {
                Reference::Macro(body.as_str().to_string())
            } else {
                let body = caps
                    .name("dbody")
                    .or_else(|| caps.name("pbody"))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                classify_path(body)
            }
        })
        .collect()
}

fn classify_bracketed(category: &str, body: &str) -> Reference {
    match category.to_ascii_lowercase().as_str() {
        "source" => classify_path(body),
        "constant" => Reference::Constant(body.to_string()),
        "translation" => Reference::Translation(body.to_string()),
        "file" => match body.parse() {
            Ok(id) => Reference::EmbeddedFile(id),
            Err(_) => Reference::Other(format!("${{{category}::{body}}}")),
        },
        _ => Reference::Other(format!("${{{category}::{body}}}")),
    }
}

fn classify_path(path: &str) -> Reference {
    if ROW_PLACEHOLDER.is_match(path) {
        return Reference::RowPlaceholder(path.to_string());
    }
    match source_path(path) {
        Some(source) => Reference::Source(source),
        None => Reference::Other(path.to_string()),
    }
}

/// Parse a source path: `monitors.<m>.<phase>.sources.<name>`,
/// `pre.[sources.]<name>` or the flat `<m>.<phase>.source(N)`.
pub fn source_path(path: &str) -> Option<SourceRef> {
    let segments: Vec<&str> = path.splitn(5, '.').collect();
    let head = segments.first()?.to_ascii_lowercase();
    if head == "monitors" && segments.len() == 5 && segments[3].eq_ignore_ascii_case("sources") {
        let phase = Phase::parse(segments[2])?;
        return Some(SourceRef {
            scope: SourceScope::task(segments[1], phase),
            name: normalize_name(segments[4]),
        });
    }
    if head == "pre" {
        let rest = path.get(4..)?;
        let name = match rest.split_once('.') {
            Some((sources, name)) if sources.eq_ignore_ascii_case("sources") => name,
            _ => rest,
        };
        if name.is_empty() {
            return None;
        }
        return Some(SourceRef {
            scope: SourceScope::Pre,
            name: normalize_name(name),
        });
    }
    let caps = FLAT_SOURCE.captures(path)?;
    let phase = Phase::parse(&caps[2])?;
    Some(SourceRef {
        scope: SourceScope::task(&caps[1], phase),
        name: format!("source({})", &caps[3]),
    })
}

/// `Source(3)` and `source(3)` name the same flat source.
fn normalize_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("source(") && lower.ends_with(')') {
        lower
    } else {
        name.to_string()
    }
}

/// Compile-time source references in `text`, duplicates removed.
pub fn extract_references(text: &str) -> Vec<SourceRef> {
    let mut out: Vec<SourceRef> = Vec::new();
    for reference in scan(text) {
        if let Reference::Source(source) = reference {
            if !out.contains(&source) {
                out.push(source);
            }
        }
    }
    out
}

/// Keys of [`extract_references`].
pub fn extract_source_keys(text: &str) -> Vec<String> {
    extract_references(text).iter().map(SourceRef::key).collect()
}

/// Where a reference was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReference {
    /// `url`, `compute(2).value`, `executeForEachEntryOf`...
    pub field: String,
    pub target: SourceRef,
}

/// References held by `field` of `source`. Fields that cannot hold a
/// reference yield nothing, whatever their text.
pub fn field_references(source: &Source, field: &str) -> Vec<SourceRef> {
    source
        .kind
        .reference_fields()
        .into_iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(field))
        .flat_map(|(_, text)| extract_references(text))
        .collect()
}

fn compute_references(compute: &Compute) -> impl Iterator<Item = FieldReference> + '_ {
    compute
        .reference_fields()
        .into_iter()
        .flat_map(move |(name, text)| {
            extract_references(text)
                .into_iter()
                .map(move |target| FieldReference {
                    field: format!("compute({}).{name}", compute.index),
                    target,
                })
        })
}

/// Every source reference held by a source: its variant fields, its
/// "execute for each entry of" source and its computes.
pub fn source_references(source: &Source) -> Vec<FieldReference> {
    let mut out = Vec::new();
    for (field, text) in source.kind.reference_fields() {
        for target in extract_references(text) {
            out.push(FieldReference {
                field: field.clone(),
                target,
            });
        }
    }
    if let Some(each) = &source.execute_for_each_entry_of {
        for target in extract_references(&each.source) {
            out.push(FieldReference {
                field: "executeForEachEntryOf".to_string(),
                target,
            });
        }
    }
    for compute in &source.computes {
        out.extend(compute_references(compute));
    }
    out
}
