//! Connector object graph: connector -> monitors -> tasks -> sources ->
//! computes, plus detection criteria and the embedded resources.
//!
//! Entities are owned by their parent collection and addressed by name or
//! 1-based index. Nothing holds a pointer back to its owner; lookups take the
//! owning scope as a parameter instead.

pub mod compute;
pub mod detection;
pub mod resource;
pub mod source;

use crate::model::detection::Criterion;
use crate::model::resource::{EmbeddedFile, EmbeddedResource, Rewrite, TranslationTable};
use crate::model::source::Source;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The three task slots of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Discovery,
    Collect,
    Simple,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Discovery, Phase::Collect, Phase::Simple];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Collect => "collect",
            Phase::Simple => "simple",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.name().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which task a source belongs to: the connector-wide `pre` task, or one
/// phase of one monitor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "scope")]
pub enum SourceScope {
    Pre,
    Task { monitor: String, phase: Phase },
}

impl SourceScope {
    pub fn task(monitor: impl Into<String>, phase: Phase) -> Self {
        SourceScope::Task {
            monitor: monitor.into().to_lowercase(),
            phase,
        }
    }

    /// Unique key of the source `name` within this scope.
    pub fn source_key(&self, name: &str) -> String {
        match self {
            SourceScope::Pre => format!("pre.{name}"),
            SourceScope::Task { monitor, phase } => {
                format!("monitors.{monitor}.{phase}.sources.{name}")
            }
        }
    }
}

impl fmt::Display for SourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceScope::Pre => f.write_str("pre"),
            SourceScope::Task { monitor, phase } => write!(f, "monitors.{monitor}.{phase}"),
        }
    }
}

/// Sources of one task, in insertion order, looked up by name without
/// regard to case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceMap {
    sources: Vec<Source>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.sources
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.position(name).map(|i| &self.sources[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Source> {
        let i = self.position(name)?;
        Some(&mut self.sources[i])
    }

    /// Append a source. The caller guarantees the name is new.
    pub fn push(&mut self, source: Source) -> &mut Source {
        debug_assert!(!self.contains(&source.name));
        self.sources.push(source);
        let last = self.sources.len() - 1;
        &mut self.sources[last]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Source> {
        self.sources.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Source> {
        self.sources.iter_mut()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }
}

impl<'a> IntoIterator for &'a SourceMap {
    type Item = &'a Source;
    type IntoIter = std::slice::Iter<'a, Source>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

impl FromIterator<Source> for SourceMap {
    fn from_iter<I: IntoIterator<Item = Source>>(iter: I) -> Self {
        let mut map = SourceMap::new();
        for source in iter {
            if !map.contains(&source.name) {
                map.sources.push(source);
            }
        }
        map
    }
}

/// Result-to-metric mapping of a task. Carried through compilation, never
/// evaluated here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, String>,
}

impl Mapping {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.attributes.is_empty() && self.metrics.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default)]
    pub sources: SourceMap,
    /// Author-declared execution order, overriding computed layering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<Vec<String>>,
    /// Filled at finalize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_layers: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub mapping: Mapping,
}

impl Task {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.execution_order.is_none() && self.mapping.is_empty()
    }
}

impl EmbeddedResource for Task {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        for source in self.sources.iter_mut() {
            source.update(rewrite);
        }
        if let Some(source) = &mut self.mapping.source {
            *source = rewrite(source);
        }
        for value in self
            .mapping
            .attributes
            .values_mut()
            .chain(self.mapping.metrics.values_mut())
        {
            *value = rewrite(value);
        }
    }

    fn description(&self) -> String {
        format!("task with {} source(s)", self.sources.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorJob {
    /// Name as first written; lookups use the lowercased map key.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple: Option<Task>,
}

impl MonitorJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery: None,
            collect: None,
            simple: None,
        }
    }

    pub fn task(&self, phase: Phase) -> Option<&Task> {
        match phase {
            Phase::Discovery => self.discovery.as_ref(),
            Phase::Collect => self.collect.as_ref(),
            Phase::Simple => self.simple.as_ref(),
        }
    }

    pub fn task_mut(&mut self, phase: Phase) -> Option<&mut Task> {
        match phase {
            Phase::Discovery => self.discovery.as_mut(),
            Phase::Collect => self.collect.as_mut(),
            Phase::Simple => self.simple.as_mut(),
        }
    }

    pub(crate) fn task_slot(&mut self, phase: Phase) -> &mut Option<Task> {
        match phase {
            Phase::Discovery => &mut self.discovery,
            Phase::Collect => &mut self.collect,
            Phase::Simple => &mut self.simple,
        }
    }

    /// Present tasks in phase order.
    pub fn tasks(&self) -> impl Iterator<Item = (Phase, &Task)> {
        Phase::ALL
            .into_iter()
            .filter_map(move |phase| self.task(phase).map(|task| (phase, task)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typical_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relies_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_support: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_support: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applies_to_os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<Criterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_last_resort: Option<String>,
}

impl Detection {
    pub fn criterion(&self, index: u32) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.index == index)
    }

    pub fn criterion_mut(&mut self, index: u32) -> Option<&mut Criterion> {
        self.criteria.iter_mut().find(|c| c.index == index)
    }

    pub(crate) fn insert_criterion(&mut self, criterion: Criterion) -> &mut Criterion {
        let position = self
            .criteria
            .iter()
            .position(|c| c.index > criterion.index)
            .unwrap_or(self.criteria.len());
        self.criteria.insert(position, criterion);
        &mut self.criteria[position]
    }
}

/// A compiled monitoring recipe for one class of device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub id: String,
    #[serde(default)]
    pub identity: Identity,
    #[serde(default)]
    pub detection: Detection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constants: BTreeMap<String, String>,
    /// Keyed by lowercased table name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translation_tables: BTreeMap<String, TranslationTable>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub embedded_files: BTreeMap<u32, EmbeddedFile>,
    #[serde(default, skip_serializing_if = "Task::is_empty")]
    pub pre: Task,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sudo_commands: BTreeMap<u32, String>,
    /// Keyed by lowercased monitor name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub monitors: BTreeMap<String, MonitorJob>,
}

impl Connector {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn monitor(&self, name: &str) -> Option<&MonitorJob> {
        self.monitors.get(&name.to_lowercase())
    }

    pub fn monitor_mut(&mut self, name: &str) -> Option<&mut MonitorJob> {
        self.monitors.get_mut(&name.to_lowercase())
    }

    pub fn task(&self, scope: &SourceScope) -> Option<&Task> {
        match scope {
            SourceScope::Pre => Some(&self.pre),
            SourceScope::Task { monitor, phase } => {
                self.monitor(monitor).and_then(|m| m.task(*phase))
            }
        }
    }

    pub fn task_mut(&mut self, scope: &SourceScope) -> Option<&mut Task> {
        match scope {
            SourceScope::Pre => Some(&mut self.pre),
            SourceScope::Task { monitor, phase } => {
                self.monitor_mut(monitor).and_then(|m| m.task_mut(*phase))
            }
        }
    }

    /// Every task, `pre` first, then monitors by name and phase.
    pub fn tasks(&self) -> Vec<(SourceScope, &Task)> {
        let mut tasks = vec![(SourceScope::Pre, &self.pre)];
        for (key, monitor) in &self.monitors {
            for (phase, task) in monitor.tasks() {
                tasks.push((SourceScope::task(key.as_str(), phase), task));
            }
        }
        tasks
    }

    pub fn scopes(&self) -> Vec<SourceScope> {
        self.tasks().into_iter().map(|(scope, _)| scope).collect()
    }

    /// Look a source up by scope and name.
    pub fn source(&self, scope: &SourceScope, name: &str) -> Option<&Source> {
        self.task(scope).and_then(|task| task.sources.get(name))
    }

    pub fn translation_table(&self, name: &str) -> Option<&TranslationTable> {
        self.translation_tables.get(&name.to_lowercase())
    }

    /// Inherit from `parent` everything this connector does not define
    /// itself. Inherited entities are independent copies.
    pub fn extend_from(&mut self, parent: &Connector) {
        for (name, value) in &parent.constants {
            self.constants
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, table) in &parent.translation_tables {
            self.translation_tables
                .entry(key.clone())
                .or_insert_with(|| table.copy());
        }
        for (id, file) in &parent.embedded_files {
            self.embedded_files.entry(*id).or_insert_with(|| file.copy());
        }
        for (index, command) in &parent.sudo_commands {
            self.sudo_commands
                .entry(*index)
                .or_insert_with(|| command.clone());
        }
        // Flat pre sources are positional: the parent's `source(N)` is
        // renumbered after the child's and every inherited reference follows.
        let mut renumbered = BTreeMap::new();
        let mut inherited_pre = Vec::new();
        let mut next = self.pre.sources.len() as u32;
        for source in &parent.pre.sources {
            let flat = flat_source_index(&source.name);
            if flat.is_none() && self.pre.sources.contains(&source.name) {
                continue;
            }
            next += 1;
            while flat.is_some() && self.pre.sources.contains(&format!("source({next})")) {
                next += 1;
            }
            let mut inherited = source.copy();
            inherited.index = next;
            if let Some(old) = flat {
                renumbered.insert(old, next);
                inherited.name = format!("source({next})");
            }
            inherited.key = SourceScope::Pre.source_key(&inherited.name);
            inherited_pre.push(inherited);
        }
        let rewrite = |text: &str| renumber_pre_references(text, &renumbered);
        for mut inherited in inherited_pre {
            if !renumbered.is_empty() {
                inherited.update(&rewrite);
            }
            self.pre.sources.push(inherited);
        }
        for (key, monitor) in &parent.monitors {
            if self.monitors.contains_key(key) {
                continue;
            }
            let mut monitor = monitor.clone();
            if !renumbered.is_empty() {
                for phase in Phase::ALL {
                    if let Some(task) = monitor.task_mut(phase) {
                        task.update(&rewrite);
                    }
                }
            }
            self.monitors.insert(key.clone(), monitor);
        }
        if self.detection.criteria.is_empty() {
            self.detection = parent.detection.clone();
        }
    }

    /// Run `rewrite` over every textual field of every source, criterion and
    /// mapping.
    pub fn update_all(&mut self, rewrite: Rewrite<'_>) {
        self.pre.update(rewrite);
        for monitor in self.monitors.values_mut() {
            for phase in Phase::ALL {
                if let Some(task) = monitor.task_mut(phase) {
                    task.update(rewrite);
                }
            }
        }
        for criterion in &mut self.detection.criteria {
            criterion.update(rewrite);
        }
        for command in self.sudo_commands.values_mut() {
            *command = rewrite(command);
        }
    }
}

static FLAT_PRE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bpre\.(sources\.)?source\((\d+)\)").expect("valid pre reference regex")
});

/// `N` when `name` is a flat `source(N)`.
fn flat_source_index(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    lower
        .strip_prefix("source(")?
        .strip_suffix(')')?
        .trim()
        .parse()
        .ok()
}

/// Point `pre.source(N)` references at their renumbered index.
fn renumber_pre_references(text: &str, renumbered: &BTreeMap<u32, u32>) -> String {
    FLAT_PRE_REFERENCE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let target = caps[2]
                .parse::<u32>()
                .ok()
                .and_then(|old| renumbered.get(&old));
            let sources = caps.get(1).map_or("", |m| m.as_str());
            match target {
                Some(new) => format!("pre.{sources}source({new})"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::source::{SourceKind, SourceType};
    use pretty_assertions::assert_eq;

    fn static_source(scope: &SourceScope, index: u32, name: &str, value: &str) -> Source {
        let mut source = Source::new(index, name, scope.source_key(name), SourceType::Static);
        if let SourceKind::Static(s) = &mut source.kind {
            s.value = Some(value.to_string());
        }
        source
    }

    #[test]
    fn source_keys_follow_scope() {
        let scope = SourceScope::task("Enclosure", Phase::Discovery);
        assert_eq!(
            scope.source_key("source(1)"),
            "monitors.enclosure.discovery.sources.source(1)"
        );
        assert_eq!(SourceScope::Pre.source_key("lsblk"), "pre.lsblk");
        assert_eq!(scope.to_string(), "monitors.enclosure.discovery");
    }

    #[test]
    fn source_map_is_case_insensitive_and_ordered() {
        let scope = SourceScope::Pre;
        let map: SourceMap = vec![
            static_source(&scope, 1, "Beta", "b"),
            static_source(&scope, 2, "alpha", "a"),
        ]
        .into_iter()
        .collect();
        assert!(map.contains("BETA"));
        assert_eq!(map.position("Alpha"), Some(1));
        assert_eq!(map.names(), vec!["Beta", "alpha"]);
    }

    #[test]
    fn extend_from_keeps_child_definitions_and_copies_the_rest() {
        let mut parent = Connector::new("Parent");
        parent.constants.insert("TOOL".into(), "parent-tool".into());
        parent.constants.insert("ONLY_PARENT".into(), "p".into());
        parent
            .pre
            .sources
            .push(static_source(&SourceScope::Pre, 1, "shared", "parent"));
        parent
            .pre
            .sources
            .push(static_source(&SourceScope::Pre, 2, "inherited", "parent"));
        parent
            .monitors
            .insert("disk".into(), MonitorJob::new("Disk"));

        let mut child = Connector::new("Child");
        child.constants.insert("TOOL".into(), "child-tool".into());
        child
            .pre
            .sources
            .push(static_source(&SourceScope::Pre, 1, "shared", "child"));

        child.extend_from(&parent);

        assert_eq!(child.constants["TOOL"], "child-tool");
        assert_eq!(child.constants["ONLY_PARENT"], "p");
        assert_eq!(child.pre.sources.names(), vec!["shared", "inherited"]);
        let inherited = child.pre.sources.get("inherited").unwrap();
        assert_eq!(inherited.index, 2);
        assert!(child.monitor("DISK").is_some());

        // The parent is untouched by later edits to the child.
        child.update_all(&|s| s.to_uppercase());
        let SourceKind::Static(parent_static) = &parent.pre.sources.get("inherited").unwrap().kind
        else {
            panic!("variant changed");
        };
        assert_eq!(parent_static.value.as_deref(), Some("parent"));
    }

    #[test]
    fn inherited_flat_pre_sources_are_renumbered_with_their_references() {
        let pre = SourceScope::Pre;
        let mut parent = Connector::new("Parent");
        parent.pre.sources.push(static_source(&pre, 1, "source(1)", "parent"));
        parent.pre.sources.push(static_source(
            &pre,
            2,
            "source(2)",
            "${source::pre.source(1)} $pre.sources.source(1)$",
        ));
        let mut disk = MonitorJob::new("Disk");
        let mut collect = Task::default();
        let scope = SourceScope::task("disk", Phase::Collect);
        collect.sources.push(static_source(&scope, 1, "source(1)", "$pre.source(2)$"));
        disk.collect = Some(collect);
        parent.monitors.insert("disk".into(), disk);

        let mut child = Connector::new("Child");
        child.pre.sources.push(static_source(&pre, 1, "source(1)", "child"));
        child.extend_from(&parent);

        assert_eq!(
            child.pre.sources.names(),
            vec!["source(1)", "source(2)", "source(3)"]
        );
        let value = |connector: &Connector, scope: &SourceScope, name: &str| {
            match &connector.source(scope, name).unwrap().kind {
                SourceKind::Static(s) => s.value.clone().unwrap_or_default(),
                _ => panic!("variant changed"),
            }
        };
        assert_eq!(value(&child, &pre, "source(1)"), "child");
        assert_eq!(value(&child, &pre, "source(2)"), "parent");
        assert_eq!(
            value(&child, &pre, "source(3)"),
            "${source::pre.source(2)} $pre.sources.source(2)$"
        );
        assert_eq!(child.pre.sources.get("source(3)").unwrap().key, "pre.source(3)");
        assert_eq!(value(&child, &scope, "source(1)"), "$pre.source(3)$");
        // The parent keeps its own numbering.
        assert_eq!(value(&parent, &scope, "source(1)"), "$pre.source(2)$");
    }

    #[test]
    fn tasks_list_pre_first() {
        let mut connector = Connector::new("c");
        let mut monitor = MonitorJob::new("Cpu");
        monitor.collect = Some(Task::default());
        monitor.discovery = Some(Task::default());
        connector.monitors.insert("cpu".into(), monitor);
        let scopes: Vec<String> = connector.scopes().iter().map(|s| s.to_string()).collect();
        assert_eq!(
            scopes,
            vec!["pre", "monitors.cpu.discovery", "monitors.cpu.collect"]
        );
    }
}
