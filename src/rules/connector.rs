//! Connector-level and task-level rules.

use super::{Apply, Gate, Prop, Rule, SetError, ValueShape, flag, list};
use crate::key::{KeyPath, Slot, SlotKind};
use crate::model::resource::{EmbeddedFile, TranslationTable};
use crate::model::{Connector, Phase, Task};

const CONNECTOR: &[SlotKind] = &[SlotKind::Connector];
const TASK: &[SlotKind] = &[SlotKind::Task];

fn connector(
    name: &'static str,
    prop: Prop,
    shape: ValueShape,
    set: super::ConnectorSetter,
) -> Rule {
    Rule::new(name, CONNECTOR, prop, shape, None, Apply::Connector(set))
}

fn task(name: &'static str, prop: Prop, gate: Option<Gate>, set: super::TaskSetter) -> Rule {
    Rule::new(name, TASK, prop, ValueShape::Any, gate, Apply::Task(set))
}

/// Property as written, minus its first `skip` segments.
fn raw_tail(key: &KeyPath, skip: usize) -> String {
    key.property_raw
        .split('.')
        .skip(skip)
        .collect::<Vec<_>>()
        .join(".")
}

fn ordered_names(value: &str) -> Vec<String> {
    list(value.trim().trim_start_matches('[').trim_end_matches(']'))
}

pub(super) fn rules() -> Vec<Rule> {
    vec![
        connector("displayName", Prop::Exact("displayname"), ValueShape::Any, |c, _, v| {
            c.identity.display_name = Some(v.to_string());
            Ok(())
        }),
        connector(
            "typicalPlatform",
            Prop::Exact("typicalplatform"),
            ValueShape::Any,
            |c, _, v| {
                c.identity.typical_platform = Some(v.to_string());
                Ok(())
            },
        ),
        connector("reliesOn", Prop::Exact("relieson"), ValueShape::Any, |c, _, v| {
            c.identity.relies_on = Some(v.to_string());
            Ok(())
        }),
        connector("version", Prop::Exact("version"), ValueShape::Any, |c, _, v| {
            c.identity.version = Some(v.to_string());
            Ok(())
        }),
        connector("comments", Prop::OneOf(&["comments", "comment"]), ValueShape::Any, |c, _, v| {
            c.identity.comments = Some(v.to_string());
            Ok(())
        }),
        connector(
            "remoteSupport",
            Prop::Exact("remotesupport"),
            ValueShape::Boolean,
            |c, _, v| {
                c.identity.remote_support = Some(flag(v)?);
                Ok(())
            },
        ),
        connector(
            "localSupport",
            Prop::Exact("localsupport"),
            ValueShape::Boolean,
            |c, _, v| {
                c.identity.local_support = Some(flag(v)?);
                Ok(())
            },
        ),
        connector("appliesToOs", Prop::Exact("appliestoos"), ValueShape::Any, |c, _, v| {
            c.identity.applies_to_os = list(v);
            Ok(())
        }),
        connector("supersedes", Prop::Exact("supersedes"), ValueShape::Any, |c, _, v| {
            c.identity.supersedes = list(v);
            Ok(())
        }),
        Rule::new(
            "onLastResort",
            &[SlotKind::Connector, SlotKind::Detection],
            Prop::Exact("onlastresort"),
            ValueShape::NonBlank,
            None,
            Apply::Connector(|c, _, v| {
                c.detection.on_last_resort = Some(v.trim().to_string());
                Ok(())
            }),
        ),
        Rule::new(
            "constant",
            &[SlotKind::Constant],
            Prop::Exact(""),
            ValueShape::Any,
            None,
            Apply::Connector(|c, key, v| match &key.slot {
                Slot::Constant { name } => {
                    c.constants.insert(name.clone(), v.to_string());
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            }),
        ),
        Rule::new(
            "sudoCommand",
            &[SlotKind::Sudo],
            Prop::Exact("command"),
            ValueShape::NonBlank,
            None,
            Apply::Connector(|c, key, v| match key.slot {
                Slot::Sudo { index } => {
                    c.sudo_commands.insert(index, v.trim().to_string());
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            }),
        ),
        Rule::new(
            "embeddedFile",
            &[SlotKind::EmbeddedFile],
            Prop::OneOf(&["", "content"]),
            ValueShape::Any,
            None,
            Apply::Connector(|c, key, v| match key.slot {
                Slot::EmbeddedFile { index } => {
                    c.embedded_files
                        .entry(index)
                        .or_insert_with(|| EmbeddedFile::new(index, ""))
                        .content = v.to_string();
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            }),
        ),
        Rule::new(
            "embeddedFileType",
            &[SlotKind::EmbeddedFile],
            Prop::Exact("type"),
            ValueShape::NonBlank,
            None,
            Apply::Connector(|c, key, v| match key.slot {
                Slot::EmbeddedFile { index } => {
                    c.embedded_files
                        .entry(index)
                        .or_insert_with(|| EmbeddedFile::new(index, ""))
                        .file_type = Some(v.trim().to_string());
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            }),
        ),
        Rule::new(
            "translationEntry",
            &[SlotKind::TranslationEntry],
            Prop::Exact(""),
            ValueShape::Any,
            None,
            Apply::Connector(set_translation_entry),
        ),
        task("executionOrder", Prop::Exact("executionorder"), None, |t, _, v| {
            t.execution_order = Some(ordered_names(v));
            Ok(())
        }),
        task("mappingSource", Prop::Exact("mapping.source"), None, set_mapping_source),
        task(
            "instanceTable",
            Prop::Exact("instancetable"),
            Some(Gate::Phase(Phase::Discovery)),
            set_mapping_source,
        ),
        task(
            "valueTable",
            Prop::Exact("valuetable"),
            Some(Gate::Phase(Phase::Collect)),
            set_mapping_source,
        ),
        task("mappingAttribute", Prop::Prefix("mapping.attributes"), None, |t, key, v| {
            t.mapping.attributes.insert(raw_tail(key, 2), v.to_string());
            Ok(())
        }),
        task(
            "instanceAttribute",
            Prop::Prefix("instance"),
            Some(Gate::Phase(Phase::Discovery)),
            |t, key, v| {
                t.mapping.attributes.insert(raw_tail(key, 1), v.to_string());
                Ok(())
            },
        ),
        task("mappingMetric", Prop::Prefix("mapping.metrics"), None, |t, key, v| {
            t.mapping.metrics.insert(raw_tail(key, 2), v.to_string());
            Ok(())
        }),
    ]
}

/// Registered after every other rule: a bare `<monitor>.collect.<param>`
/// is a collect parameter.
pub(super) fn fallback_rules() -> Vec<Rule> {
    vec![task(
        "collectParameter",
        Prop::Any,
        Some(Gate::Phase(Phase::Collect)),
        |t, key, v| {
            t.mapping.metrics.insert(key.property_raw.clone(), v.to_string());
            Ok(())
        },
    )]
}

fn set_mapping_source(task: &mut Task, _key: &KeyPath, value: &str) -> Result<(), SetError> {
    task.mapping.source = Some(value.trim().to_string());
    Ok(())
}

fn set_translation_entry(
    connector: &mut Connector,
    key: &KeyPath,
    value: &str,
) -> Result<(), SetError> {
    let Slot::TranslationEntry { table, entry } = &key.slot else {
        return Err(SetError::WrongVariant);
    };
    connector
        .translation_tables
        .entry(table.to_lowercase())
        .or_insert_with(|| TranslationTable::new(table.as_str()))
        .insert(entry, value);
    Ok(())
}
