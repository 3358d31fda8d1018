//! Embedded resources: raw text blocks, HTTP header/body payloads and
//! translation tables.
//!
//! All of them share the [`EmbeddedResource`] contract: an independent deep
//! `copy()`, an in-place `update()` that rewrites every textual sub-field, and
//! a stable `description()` for diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Rewrite function applied by [`EmbeddedResource::update`].
pub type Rewrite<'a> = &'a dyn Fn(&str) -> String;

pub trait EmbeddedResource: Clone {
    /// Fully independent copy. Mutating the copy never touches `self`.
    fn copy(&self) -> Self {
        self.clone()
    }

    /// Rewrite every textual sub-field through `rewrite`, in place.
    fn update(&mut self, rewrite: Rewrite<'_>);

    /// Stable human-readable identifier.
    fn description(&self) -> String;
}

/// `EmbeddedFile(2)` or `${file::2}`.
static EMBEDDED_FILE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)EmbeddedFile\((\d+)\)|\$\{file::(\d+)\}").expect("valid embedded file regex")
});

/// Ids of every embedded-file token found in `text`, in order of appearance.
pub fn embedded_file_tokens(text: &str) -> Vec<u32> {
    EMBEDDED_FILE_TOKEN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// A raw text block declared once in the connector and referenced from free
/// text by `EmbeddedFile(id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedFile {
    pub id: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl EmbeddedFile {
    pub fn new(id: u32, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            file_type: None,
        }
    }

    /// Token used to reference this file from free text.
    pub fn reference(&self) -> String {
        format!("EmbeddedFile({})", self.id)
    }
}

impl EmbeddedResource for EmbeddedFile {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        self.content = rewrite(&self.content);
        if let Some(file_type) = &self.file_type {
            self.file_type = Some(rewrite(file_type));
        }
    }

    fn description(&self) -> String {
        self.reference()
    }
}

/// HTTP header or body: inline text, or a reference to an embedded file that
/// finalize resolves into an owned copy.
///
/// Run-time macros (`%{USERNAME}`, `%{PASSWORD}`, ...) stay verbatim in the
/// text; the execution engine substitutes them per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum HttpPayload {
    Text {
        text: String,
    },
    File {
        id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<EmbeddedFile>,
    },
}

pub type Header = HttpPayload;
pub type Body = HttpPayload;

impl HttpPayload {
    /// A value that is exactly one embedded-file token becomes a file
    /// reference; anything else is inline text.
    pub fn from_value(value: &str) -> Self {
        let trimmed = value.trim();
        let ids = embedded_file_tokens(trimmed);
        if let [id] = ids.as_slice() {
            if EMBEDDED_FILE_TOKEN
                .find(trimmed)
                .is_some_and(|m| m.start() == 0 && m.end() == trimmed.len())
            {
                return HttpPayload::File { id: *id, file: None };
            }
        }
        HttpPayload::Text {
            text: value.to_string(),
        }
    }

    /// Textual content, once resolved.
    pub fn text(&self) -> Option<&str> {
        match self {
            HttpPayload::Text { text } => Some(text),
            HttpPayload::File { file, .. } => file.as_ref().map(|f| f.content.as_str()),
        }
    }

    pub fn embedded_file_id(&self) -> Option<u32> {
        match self {
            HttpPayload::File { id, .. } => Some(*id),
            HttpPayload::Text { .. } => None,
        }
    }
}

impl EmbeddedResource for HttpPayload {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        match self {
            HttpPayload::Text { text } => *text = rewrite(text),
            HttpPayload::File { file, .. } => {
                if let Some(file) = file {
                    file.update(rewrite);
                }
            }
        }
    }

    fn description(&self) -> String {
        match self {
            HttpPayload::Text { text } => text.clone(),
            HttpPayload::File { id, .. } => format!("EmbeddedFile({id})"),
        }
    }
}

/// Case-insensitive string to string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationTable {
    pub name: String,
    /// Keys are stored lowercased.
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

impl TranslationTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.to_lowercase(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EmbeddedResource for TranslationTable {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        for value in self.entries.values_mut() {
            *value = rewrite(value);
        }
    }

    fn description(&self) -> String {
        format!("TranslationTable({})", self.name)
    }
}

static TRANSLATION_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*\$\{translation::\s*([^}\s]+)\s*\}\s*$")
        .expect("valid translation reference regex")
});

/// Named pointer to a connector-level [`TranslationTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTranslationTable {
    pub name: String,
}

impl ReferenceTranslationTable {
    /// Accepts `${translation::Name}` as well as a bare `Name`.
    pub fn from_reference(value: &str) -> Option<Self> {
        if let Some(caps) = TRANSLATION_REFERENCE.captures(value) {
            return caps.get(1).map(|m| Self {
                name: m.as_str().to_string(),
            });
        }
        let bare = value.trim();
        let valid = !bare.is_empty()
            && bare
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self {
            name: bare.to_string(),
        })
    }
}

impl EmbeddedResource for ReferenceTranslationTable {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        self.name = rewrite(&self.name);
    }

    fn description(&self) -> String {
        format!("${{translation::{}}}", self.name)
    }
}

impl fmt::Display for ReferenceTranslationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedded_file_copy_is_independent() {
        let original = EmbeddedFile::new(2, "BEGIN { print }");
        let mut copy = original.copy();
        copy.content.push_str(" END {}");
        copy.update(&|s| s.to_uppercase());
        assert_eq!(original.content, "BEGIN { print }");
        assert_eq!(original.description(), "EmbeddedFile(2)");
    }

    #[test]
    fn header_copy_is_independent() {
        let original = HttpPayload::from_value("Authorization: %{AUTHENTICATION_TOKEN}");
        let mut copy = original.copy();
        copy.update(&|s| s.replace("Authorization", "X-Auth"));
        assert_eq!(
            original.text(),
            Some("Authorization: %{AUTHENTICATION_TOKEN}")
        );
        assert_eq!(copy.text(), Some("X-Auth: %{AUTHENTICATION_TOKEN}"));
    }

    #[test]
    fn translation_table_copy_is_independent_and_case_insensitive() {
        let mut original = TranslationTable::new("StatusTable");
        original.insert("OK", "ok");
        let mut copy = original.copy();
        copy.insert("Degraded", "degraded");
        copy.update(&|s| format!("{s}!"));

        assert_eq!(original.len(), 1);
        assert_eq!(original.get("ok"), Some("ok"));
        assert_eq!(copy.get("OK"), Some("ok!"));
        assert_eq!(copy.get("degraded"), Some("degraded!"));
    }

    #[test]
    fn payload_recognizes_a_lone_embedded_file_token() {
        assert_eq!(
            HttpPayload::from_value("EmbeddedFile(3)"),
            HttpPayload::File { id: 3, file: None }
        );
        assert_eq!(
            HttpPayload::from_value("${file::4}"),
            HttpPayload::File { id: 4, file: None }
        );
        assert!(matches!(
            HttpPayload::from_value("see EmbeddedFile(3) here"),
            HttpPayload::Text { .. }
        ));
    }

    #[test]
    fn translation_reference_forms() {
        assert_eq!(
            ReferenceTranslationTable::from_reference("${translation::StatusTable}")
                .map(|r| r.name),
            Some("StatusTable".to_string())
        );
        assert_eq!(
            ReferenceTranslationTable::from_reference("StatusTable").map(|r| r.name),
            Some("StatusTable".to_string())
        );
        assert_eq!(ReferenceTranslationTable::from_reference("not a name"), None);
    }

    #[test]
    fn finds_embedded_file_tokens() {
        assert_eq!(
            embedded_file_tokens("awk -f EmbeddedFile(1) ${file::7} embeddedfile(2)"),
            vec![1, 7, 2]
        );
    }
}
