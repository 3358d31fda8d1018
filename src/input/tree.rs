//! Structured connector documents (JSON or YAML) flattened to assignments.
//!
//! ```yaml
//! connector:
//!   displayName: IPMI
//!   detection:
//!     criteria:
//!       - type: osCommand
//!         commandLine: ipmitool -V
//! constants:
//!   TOOL: /usr/bin/ipmitool
//! translations:
//!   StatusTable: { ok: OK, degraded: WARN }
//! embeddedFiles:
//!   1: "BEGIN { FS = \";\" }"
//! pre:
//!   lsblk: { type: osCommand, commandLine: lsblk -l }
//! monitors:
//!   disk:
//!     discovery:
//!       sources:
//!         source1:
//!           type: copy
//!           from: ${source::pre.lsblk}
//!           computes:
//!             - type: keepColumns
//!               columnNumbers: 1,2
//!       executionOrder: [source1]
//!       mapping:
//!         source: ${source::monitors.disk.discovery.sources.source1}
//!         attributes: { id: $1 }
//! ```

use super::{Assignment, InputError};
use serde_json::{Map, Value};

/// Array keys whose object items become indexed segments.
const INDEXED_ARRAYS: [(&str, &str); 3] =
    [("computes", "compute"), ("criteria", "criteria"), ("steps", "step")];

/// Flatten a structured document. Objects become dotted segments with `type`
/// first, arrays of objects become 1-based indexed segments and arrays of
/// scalars become one comma-joined value.
pub fn flatten_tree(tree: &Value) -> Vec<Assignment> {
    let mut out = Vec::new();
    let Value::Object(root) = tree else {
        return out;
    };
    for (key, value) in root {
        match key.to_ascii_lowercase().as_str() {
            "connector" => flatten_connector(value, &mut out),
            "embeddedfiles" => flatten_embedded_files(value, &mut out),
            "sudocommands" | "sudo" => flatten_sudo(value, &mut out),
            _ => walk(key, value, &mut out),
        }
    }
    out
}

fn flatten_connector(value: &Value, out: &mut Vec<Assignment>) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, value) in map {
        if key.eq_ignore_ascii_case("detection") {
            walk("detection", value, out);
        } else {
            walk(&format!("connector.{key}"), value, out);
        }
    }
}

fn flatten_embedded_files(value: &Value, out: &mut Vec<Assignment>) {
    let Value::Object(map) = value else {
        return;
    };
    for (id, file) in map {
        let prefix = format!("embeddedfile({id})");
        match file {
            Value::Object(fields) => {
                for (field, value) in fields {
                    if let Some(text) = scalar(value) {
                        out.push((format!("{prefix}.{field}"), text));
                    }
                }
            }
            other => {
                if let Some(text) = scalar(other) {
                    out.push((prefix, text));
                }
            }
        }
    }
}

fn flatten_sudo(value: &Value, out: &mut Vec<Assignment>) {
    let Value::Array(commands) = value else {
        return;
    };
    for (i, command) in commands.iter().enumerate() {
        if let Some(text) = scalar(command) {
            out.push((format!("sudo({}).command", i + 1), text));
        }
    }
}

fn walk(prefix: &str, value: &Value, out: &mut Vec<Assignment>) {
    match value {
        Value::Null => {}
        Value::Object(map) => walk_object(prefix, map, out),
        Value::Array(items) => walk_array(prefix, items, out),
        scalar_value => {
            if let Some(text) = scalar(scalar_value) {
                out.push((prefix.to_string(), text));
            }
        }
    }
}

fn walk_object(prefix: &str, map: &Map<String, Value>, out: &mut Vec<Assignment>) {
    // `type` instantiates the entity, so it goes first.
    let (typed, rest): (Vec<_>, Vec<_>) = map
        .iter()
        .partition(|(key, _)| key.eq_ignore_ascii_case("type"));
    for (key, value) in typed.into_iter().chain(rest) {
        walk(&format!("{prefix}.{key}"), value, out);
    }
}

fn walk_array(prefix: &str, items: &[Value], out: &mut Vec<Assignment>) {
    if items.is_empty() {
        return;
    }
    if items.iter().all(|item| !item.is_object()) {
        let joined: Vec<String> = items.iter().filter_map(scalar).collect();
        out.push((prefix.to_string(), joined.join(",")));
        return;
    }
    let (parent, last) = match prefix.rsplit_once('.') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, prefix),
    };
    let segment = INDEXED_ARRAYS
        .iter()
        .find(|(plural, _)| last.eq_ignore_ascii_case(plural))
        .map_or(last, |(_, singular)| *singular);
    for (i, item) in items.iter().enumerate() {
        let indexed = match parent {
            Some(parent) => format!("{parent}.{segment}({})", i + 1),
            None => format!("{segment}({})", i + 1),
        };
        walk(&indexed, item, out);
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Parse a JSON document and flatten it.
pub fn parse_json(text: &str) -> Result<Vec<Assignment>, InputError> {
    let tree: Value = serde_json::from_str(text)?;
    Ok(flatten_tree(&tree))
}

/// Parse a YAML document and flatten it. Non-string mapping keys (such as
/// embedded file ids) are turned into strings.
pub fn parse_yaml(text: &str) -> Result<Vec<Assignment>, InputError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
    let tree = serde_json::to_value(yaml)?;
    Ok(flatten_tree(&tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn keys(pairs: &[Assignment]) -> Vec<&str> {
        pairs.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn type_comes_first_and_arrays_are_indexed() {
        let tree = json!({
            "monitors": {
                "disk": {
                    "collect": {
                        "sources": {
                            "s1": {
                                "computes": [
                                    { "column": 2, "type": "duplicateColumn" }
                                ],
                                "type": "static",
                                "value": "a;b"
                            }
                        },
                        "executionOrder": ["s1"]
                    }
                }
            }
        });
        let pairs = flatten_tree(&tree);
        assert_eq!(
            keys(&pairs),
            vec![
                "monitors.disk.collect.sources.s1.type",
                "monitors.disk.collect.sources.s1.compute(1).type",
                "monitors.disk.collect.sources.s1.compute(1).column",
                "monitors.disk.collect.sources.s1.value",
                "monitors.disk.collect.executionOrder",
            ]
        );
        assert_eq!(pairs[2].1, "2");
        assert_eq!(pairs[4].1, "s1");
    }

    #[test]
    fn connector_section_and_resources() {
        let tree = json!({
            "connector": {
                "displayName": "IPMI",
                "appliesToOs": ["Linux", "Solaris"],
                "detection": { "criteria": [ { "type": "process", "commandLine": "ipmi" } ] }
            },
            "embeddedFiles": { "1": "BEGIN {}", "2": { "content": "x", "type": "awk" } },
            "sudoCommands": ["/usr/bin/ipmitool"],
            "translations": { "StatusTable": { "ok": "OK" } }
        });
        assert_eq!(
            flatten_tree(&tree),
            vec![
                ("connector.displayName".to_string(), "IPMI".to_string()),
                ("connector.appliesToOs".into(), "Linux,Solaris".into()),
                ("detection.criteria(1).type".into(), "process".into()),
                ("detection.criteria(1).commandLine".into(), "ipmi".into()),
                ("embeddedfile(1)".into(), "BEGIN {}".into()),
                ("embeddedfile(2).content".into(), "x".into()),
                ("embeddedfile(2).type".into(), "awk".into()),
                ("sudo(1).command".into(), "/usr/bin/ipmitool".into()),
                ("translations.StatusTable.ok".into(), "OK".into()),
            ]
        );
    }

    #[test]
    fn yaml_integer_keys_become_strings() {
        let pairs = parse_yaml("embeddedFiles:\n  3: hello\n").unwrap();
        assert_eq!(pairs, vec![("embeddedfile(3)".to_string(), "hello".to_string())]);
    }
}
