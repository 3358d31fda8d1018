//! Readers turning connector files into `(key, value)` assignments.

pub mod flat;
pub mod tree;

pub use flat::parse_flat;
pub use tree::{flatten_tree, parse_json, parse_yaml};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// One `key = value` assignment.
pub type Assignment = (String, String);

#[derive(Debug, Error)]
pub enum InputError {
    #[error("line {line}: EmbeddedFile({id}) is never closed")]
    UnterminatedEmbeddedFile { id: String, line: usize },

    #[error("line {line}: EmbeddedFile({closed}).End does not close EmbeddedFile({opened})")]
    MismatchedEmbeddedFile {
        opened: String,
        closed: String,
        line: usize,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Surface syntax of a connector file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Flat,
    Json,
    Yaml,
}

impl InputFormat {
    /// Guess from the file extension; anything unknown is flat text.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => InputFormat::Json,
            Some("yaml" | "yml") => InputFormat::Yaml,
            _ => InputFormat::Flat,
        }
    }

    pub fn read(self, text: &str) -> Result<Vec<Assignment>, InputError> {
        match self {
            InputFormat::Flat => parse_flat(text),
            InputFormat::Json => parse_json(text),
            InputFormat::Yaml => parse_yaml(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(InputFormat::from_path(Path::new("a/MIB2.yaml")), InputFormat::Yaml);
        assert_eq!(InputFormat::from_path(Path::new("MIB2.JSON")), InputFormat::Json);
        assert_eq!(InputFormat::from_path(Path::new("MIB2.hdfs")), InputFormat::Flat);
    }

    #[test]
    fn every_format_yields_the_same_assignment() {
        let flat = InputFormat::Flat.read("pre.lsblk.type = OsCommand\n").unwrap();
        let json = InputFormat::Json
            .read(r#"{ "pre": { "lsblk": { "type": "OsCommand" } } }"#)
            .unwrap();
        let yaml = InputFormat::Yaml.read("pre:\n  lsblk:\n    type: OsCommand\n").unwrap();
        assert_eq!(flat, json);
        assert_eq!(json, yaml);
    }
}
