//! Flat `key = value` connector text.
//!
//! ```text
//! #define TOOL /usr/bin/ipmitool
//! hdf.DisplayName = "IPMI"          // trailing comments are dropped
//! Fan.Collect.Source(1).Type = "OsCommand"
//! Fan.Collect.Source(1).CommandLine = "TOOL sdr"
//!
//! EmbeddedFile(1):
//! BEGIN { FS = ";" }
//! EmbeddedFile(1).End
//! ```
//!
//! `#define` names are replaced as whole words in every value and every
//! embedded file, and also kept as `constants.<NAME>`. The define text is
//! used as written, quotes included. Embedded file blocks become
//! `embeddedfile(N)` assignments placed before everything else.

use super::{Assignment, InputError};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static DEFINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#define\s+(\w+)\s+(.+?)\s*$").expect("valid define regex")
});

static EMBEDDED_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*EmbeddedFile\((\d+)\):\s*$").expect("valid embedded file start regex")
});

static EMBEDDED_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*EmbeddedFile\((\d+)\)\.End\s*$").expect("valid embedded file end regex")
});

/// Quoted strings survive, comments are removed.
static COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"("(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*')|//[^\n]*|/\*(?:[^*]|\*+[^*/])*\*+/"#)
        .expect("valid comment regex")
});

/// `#define` names as whole-word patterns with their replacement text.
struct Defines {
    words: Vec<(String, Regex, String)>,
}

impl Defines {
    fn collect(text: &str) -> Self {
        let words = text
            .lines()
            .filter_map(|line| DEFINE.captures(line))
            .filter_map(|caps| {
                let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(&caps[1]))).ok()?;
                Some((caps[1].to_string(), pattern, caps[2].to_string()))
            })
            .collect();
        Self { words }
    }

    fn expand(&self, text: &str) -> String {
        let mut text = text.to_string();
        for (_, word, replacement) in &self.words {
            text = word.replace_all(&text, regex::NoExpand(replacement.as_str())).into_owned();
        }
        text
    }
}

/// Parse flat connector text into ordered assignments.
///
/// Lines that are not `key = value` are skipped with a warning.
pub fn parse_flat(text: &str) -> Result<Vec<Assignment>, InputError> {
    let defines = Defines::collect(text);
    let mut files: Vec<Assignment> = Vec::new();
    let mut code = String::with_capacity(text.len());

    let mut lines = text.lines().enumerate();
    while let Some((number, line)) = lines.next() {
        if DEFINE.is_match(line) {
            code.push('\n');
            continue;
        }
        if let Some(caps) = EMBEDDED_START.captures(line) {
            let id = caps[1].to_string();
            let mut content: Vec<&str> = Vec::new();
            let mut closed = false;
            code.push('\n');
            for (_, inner) in lines.by_ref() {
                code.push('\n');
                if let Some(end) = EMBEDDED_END.captures(inner) {
                    if end[1] != id {
                        return Err(InputError::MismatchedEmbeddedFile {
                            opened: id,
                            closed: end[1].to_string(),
                            line: number + 1,
                        });
                    }
                    closed = true;
                    break;
                }
                content.push(inner);
            }
            if !closed {
                return Err(InputError::UnterminatedEmbeddedFile { id, line: number + 1 });
            }
            let content = defines.expand(&content.join("\n"));
            files.push((format!("embeddedfile({id})"), content));
            continue;
        }
        if let Some(end) = EMBEDDED_END.captures(line) {
            return Err(InputError::MismatchedEmbeddedFile {
                opened: String::new(),
                closed: end[1].to_string(),
                line: number + 1,
            });
        }
        code.push_str(line);
        code.push('\n');
    }

    // Keep line breaks so reported line numbers match the input.
    let code = COMMENT.replace_all(&code, |caps: &regex::Captures<'_>| match caps.get(1) {
        Some(quoted) => quoted.as_str().to_string(),
        None => "\n".repeat(caps[0].matches('\n').count()),
    });
    let mut out: Vec<Assignment> = files;
    for (name, _, value) in &defines.words {
        out.push((format!("constants.{name}"), value.clone()));
    }

    for (number, line) in code.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = number + 1, text = line, "skipping line without '='");
            continue;
        };
        out.push((key.trim().to_string(), defines.expand(&unquote(value))));
    }
    Ok(out)
}

/// Drop one pair of surrounding quotes and expand `\t`, `\n` and `""`.
fn unquote(value: &str) -> String {
    let value = value.trim();
    let value = value.strip_prefix('"').unwrap_or(value);
    let value = value.strip_suffix('"').unwrap_or(value);
    value
        .replace("\\t", "\t")
        .replace("\\n", "\n")
        .replace("\"\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pairs(text: &str) -> Vec<(String, String)> {
        parse_flat(text).unwrap()
    }

    #[test]
    fn reads_assignments_and_strips_comments() {
        let text = r#"
// Identity
hdf.DisplayName = "IPMI ""Generic"""   // trailing comment
/* block
   comment */
enclosure.discovery.source(1).type = Wbem
enclosure.discovery.source(1).query = "SELECT Name FROM CIM_Chassis // not a comment"
"#;
        assert_eq!(
            pairs(text),
            vec![
                ("hdf.DisplayName".to_string(), "IPMI \"Generic\"".to_string()),
                ("enclosure.discovery.source(1).type".into(), "Wbem".into()),
                (
                    "enclosure.discovery.source(1).query".into(),
                    "SELECT Name FROM CIM_Chassis // not a comment".into()
                ),
            ]
        );
    }

    #[test]
    fn defines_become_constants_and_are_expanded() {
        let text = "#define TOOL /usr/bin/ipmitool\nfan.collect.source(1).commandLine = \"TOOL sdr; TOOLBOX\"\n";
        assert_eq!(
            pairs(text),
            vec![
                ("constants.TOOL".to_string(), "/usr/bin/ipmitool".to_string()),
                (
                    "fan.collect.source(1).commandLine".into(),
                    "/usr/bin/ipmitool sdr; TOOLBOX".into()
                ),
            ]
        );
    }

    #[test]
    fn embedded_files_are_collected_verbatim() {
        let text = "EmbeddedFile(2):\nBEGIN { FS = \";\" } // kept\n{ print $1 }\nEmbeddedFile(2).End\nx.collect.source(1).type = Awk\n";
        let got = pairs(text);
        assert_eq!(
            got[0],
            (
                "embeddedfile(2)".to_string(),
                "BEGIN { FS = \";\" } // kept\n{ print $1 }".to_string()
            )
        );
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn broken_embedded_files_are_reported() {
        let err = parse_flat("EmbeddedFile(1):\nabc\n").unwrap_err();
        assert!(
            matches!(err, InputError::UnterminatedEmbeddedFile { ref id, line: 1 } if id == "1")
        );

        let err = parse_flat("EmbeddedFile(1):\nabc\nEmbeddedFile(3).End\n").unwrap_err();
        assert!(matches!(err, InputError::MismatchedEmbeddedFile { .. }));
    }

    #[test]
    fn defines_apply_inside_embedded_files() {
        let text = "#define TOOL /usr/bin/ipmitool\nEmbeddedFile(1):\nTOOL -V\nTOOLBOX\nEmbeddedFile(1).End\n";
        assert_eq!(
            pairs(text)[0],
            (
                "embeddedfile(1)".to_string(),
                "/usr/bin/ipmitool -V\nTOOLBOX".to_string()
            )
        );
    }

    #[test]
    fn define_text_is_kept_as_written() {
        let text = "#define SEP \";\"\nx.collect.source(1).value = a SEP b\n";
        assert_eq!(
            pairs(text),
            vec![
                ("constants.SEP".to_string(), "\";\"".to_string()),
                ("x.collect.source(1).value".into(), "a \";\" b".into()),
            ]
        );
    }

    #[test]
    fn lines_without_separator_are_skipped() {
        assert_eq!(
            pairs("a = 1\njust words\nb = 2\n"),
            vec![("a".to_string(), "1".to_string()), ("b".into(), "2".into())]
        );
    }
}
