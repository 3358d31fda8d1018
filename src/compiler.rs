//! Incremental connector compiler.
//!
//! Assignments are applied one at a time, in order, against a growing
//! [`Connector`]. [`ConnectorCompiler::finish`] then runs the cross-entity
//! checks and builds the execution plan:
//!
//! 1. constant substitution
//! 2. index contiguity
//! 3. embedded files and translation tables
//! 4. source references
//! 5. dependency layers, per task
//! 6. sequencing, per task
//!
//! The result is immutable and cheap to share between threads.

use crate::config::CompilerConfig;
use crate::dependency::DependencyGraph;
use crate::error::{CompileError, ConnectorError, Problem};
use crate::key::KeyPath;
use crate::model::compute::Compute;
use crate::model::detection::Step;
use crate::model::resource::{EmbeddedResource, HttpPayload, embedded_file_tokens};
use crate::model::source::{Source, SourceKind};
use crate::model::{Connector, SourceScope, Task};
use crate::plan::{ExecutionPlan, TaskPlan};
use crate::references::source_references;
use crate::rules;
use crate::sequence::sequence;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

static CONSTANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\$\{constant::\s*([^}\s]+)\s*\}").expect("valid constant regex")
});

/// Builds one connector from a stream of assignments.
#[derive(Debug, Clone)]
pub struct ConnectorCompiler {
    connector: Connector,
    config: CompilerConfig,
    problems: Vec<Problem>,
}

impl ConnectorCompiler {
    pub fn new(id: impl Into<String>, config: CompilerConfig) -> Self {
        Self {
            connector: Connector::new(id),
            config,
            problems: Vec::new(),
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    /// Apply one assignment. Unrecognized keys are recorded as problems;
    /// every other error aborts.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), CompileError> {
        let outcome = match KeyPath::parse(key)? {
            Some(path) => rules::dispatch(&mut self.connector, &path, value).map(|_| ()),
            None => Err(CompileError::UnrecognizedKey {
                key: key.to_string(),
                value: value.to_string(),
            }),
        };
        match outcome {
            Err(err) if !err.is_fatal() => {
                self.record(&err);
                Ok(())
            }
            other => other,
        }
    }

    pub fn apply_all<I, K, V>(&mut self, assignments: I) -> Result<(), CompileError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in assignments {
            self.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    /// Apply a structured document (see [`crate::input::flatten_tree`]).
    pub fn apply_tree(&mut self, tree: &serde_json::Value) -> Result<(), CompileError> {
        self.apply_all(crate::input::flatten_tree(tree))
    }

    /// Inherit what this connector does not define from `parent`.
    pub fn extend_from(&mut self, parent: &Connector) {
        self.connector.extend_from(parent);
    }

    fn record(&mut self, err: &CompileError) {
        if let Some(problem) = Problem::from_error(err) {
            warn!(connector = %self.connector.id, key = %problem.key, "{}", problem.message);
            self.problems.push(problem);
        }
    }

    /// Run the finalize pass.
    pub fn finish(self) -> Result<CompiledConnector, CompileError> {
        let ConnectorCompiler {
            mut connector,
            config,
            problems,
        } = self;

        if config.fail_on_problems {
            if let Some(problem) = problems.first() {
                return Err(problem.clone().into_error());
            }
        }
        if config.substitute_constants {
            substitute_constants(&mut connector);
        }
        if config.require_contiguous_indices {
            check_contiguous(&connector)?;
        }
        resolve_embedded_files(&mut connector)?;
        check_translation_tables(&connector)?;
        if config.validate_references {
            check_references(&connector)?;
        }
        let plan = build_plan(&mut connector)?;

        info!(
            connector = %connector.id,
            monitors = connector.monitors.len(),
            sources = plan.source_count(),
            problems = problems.len(),
            "compiled connector"
        );
        Ok(CompiledConnector {
            connector: Arc::new(connector),
            plan: Arc::new(plan),
            problems,
        })
    }
}

/// A finalized connector with its plan.
#[derive(Debug, Clone)]
pub struct CompiledConnector {
    pub connector: Arc<Connector>,
    pub plan: Arc<ExecutionPlan>,
    pub problems: Vec<Problem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactRef<'a> {
    connector: &'a Connector,
    plan: &'a ExecutionPlan,
    problems: &'a [Problem],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    connector: Connector,
    plan: ExecutionPlan,
    #[serde(default)]
    problems: Vec<Problem>,
}

impl CompiledConnector {
    pub fn id(&self) -> &str {
        &self.connector.id
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&ArtifactRef {
            connector: &self.connector,
            plan: &self.plan,
            problems: &self.problems,
        })
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let artifact: Artifact = serde_json::from_str(text)?;
        Ok(Self {
            connector: Arc::new(artifact.connector),
            plan: Arc::new(artifact.plan),
            problems: artifact.problems,
        })
    }
}

/// Compile one connector from flat assignments.
pub fn compile<I, K, V>(
    id: &str,
    assignments: I,
    config: &CompilerConfig,
) -> Result<CompiledConnector, ConnectorError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut compiler = ConnectorCompiler::new(id, config.clone());
    compiler
        .apply_all(assignments)
        .and_then(|()| compiler.finish())
        .map_err(|err| ConnectorError::new(id, err))
}

/// One connector's worth of input for [`compile_batch`].
#[derive(Debug, Clone, Default)]
pub struct ConnectorInput {
    pub id: String,
    pub assignments: Vec<(String, String)>,
}

/// Compile independent connectors in parallel. A failure only affects its own
/// connector; results come back in input order.
pub fn compile_batch(
    inputs: &[ConnectorInput],
    config: &CompilerConfig,
) -> Vec<Result<CompiledConnector, ConnectorError>> {
    inputs
        .par_iter()
        .map(|input| {
            let pairs = input.assignments.iter().map(|(k, v)| (k.as_str(), v.as_str()));
            compile(&input.id, pairs, config)
        })
        .collect()
}

fn substitute_constants(connector: &mut Connector) {
    if connector.constants.is_empty() {
        return;
    }
    let constants: BTreeMap<String, String> = connector
        .constants
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.clone()))
        .collect();
    let rewrite = |text: &str| -> String {
        CONSTANT
            .replace_all(text, |caps: &regex::Captures<'_>| {
                constants
                    .get(&caps[1].to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    };
    connector.update_all(&rewrite);
    for file in connector.embedded_files.values_mut() {
        file.update(&rewrite);
    }
}

/// `indices` must be exactly 1..=n.
fn first_gap(mut indices: Vec<u32>) -> Option<(u32, u32)> {
    indices.sort_unstable();
    indices
        .iter()
        .zip(1u32..)
        .find(|(index, expected)| **index != *expected)
        .map(|(index, expected)| (expected, *index))
}

fn gap_error(owner: &str, segment: &str, (missing, next): (u32, u32)) -> CompileError {
    CompileError::MissingReferencedEntity {
        entity: format!("{owner}.{segment}({missing})"),
        referrer: format!("{owner}.{segment}({next})"),
    }
}

fn check_steps(owner: &str, steps: Option<&[Step]>) -> Result<(), CompileError> {
    let Some(steps) = steps else {
        return Ok(());
    };
    match first_gap(steps.iter().map(|s| s.index).collect()) {
        Some(gap) => Err(gap_error(owner, "step", gap)),
        None => Ok(()),
    }
}

fn is_flat_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("source(") && lower.ends_with(')')
}

fn check_contiguous(connector: &Connector) -> Result<(), CompileError> {
    if let Some(gap) = first_gap(connector.detection.criteria.iter().map(|c| c.index).collect()) {
        return Err(gap_error("detection", "criteria", gap));
    }
    for criterion in &connector.detection.criteria {
        let owner = format!("detection.criteria({})", criterion.index);
        check_steps(&owner, criterion.steps())?;
    }
    for (scope, task) in connector.tasks() {
        // Only flat sources carry author-chosen indices.
        let flat: Vec<u32> = task
            .sources
            .iter()
            .filter(|s| is_flat_name(&s.name))
            .map(|s| s.index)
            .collect();
        if flat.len() == task.sources.len() {
            if let Some(gap) = first_gap(flat) {
                return Err(gap_error(&scope.to_string(), "source", gap));
            }
        }
        for source in &task.sources {
            if let Some(gap) = first_gap(source.computes.iter().map(|c| c.index).collect()) {
                return Err(gap_error(&source.key, "compute", gap));
            }
            check_steps(&source.key, source.steps())?;
        }
    }
    Ok(())
}

fn missing_file(connector: &Connector, id: u32, referrer: String) -> Result<(), CompileError> {
    if connector.embedded_files.contains_key(&id) {
        Ok(())
    } else {
        Err(CompileError::MissingEmbeddedFile {
            file: format!("EmbeddedFile({id})"),
            referrer,
        })
    }
}

fn check_file_tokens<'a>(
    connector: &Connector,
    owner: &str,
    fields: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<(), CompileError> {
    for (field, text) in fields {
        for id in embedded_file_tokens(text) {
            missing_file(connector, id, format!("{owner}.{field}"))?;
        }
    }
    Ok(())
}

fn compute_owner(source: &Source, compute: &Compute) -> String {
    format!("{}.compute({})", source.key, compute.index)
}

/// Check every embedded-file token and give HTTP payloads that reference a
/// file their own copy of it.
fn resolve_embedded_files(connector: &mut Connector) -> Result<(), CompileError> {
    for criterion in &connector.detection.criteria {
        let owner = format!("detection.criteria({})", criterion.index);
        check_file_tokens(connector, &owner, criterion.embedded_file_fields())?;
    }
    for (_, task) in connector.tasks() {
        for source in &task.sources {
            check_file_tokens(connector, &source.key, source.kind.embedded_file_fields())?;
            for compute in &source.computes {
                if let Some(script) = compute.awk_script() {
                    let owner = compute_owner(source, compute);
                    check_file_tokens(connector, &owner, [("script", script)])?;
                }
            }
        }
    }

    let files = connector.embedded_files.clone();
    let mut unresolved = None;
    let resolve = |payload: &mut HttpPayload, owner: String| {
        if let HttpPayload::File { id, file } = payload {
            match files.get(&*id) {
                Some(found) => *file = Some(found.copy()),
                None => return Some((*id, owner)),
            }
        }
        None
    };
    'tasks: for monitor_task in tasks_mut(connector) {
        for source in monitor_task.sources.iter_mut() {
            if let SourceKind::Http(http) = &mut source.kind {
                for (field, payload) in [("header", &mut http.header), ("body", &mut http.body)] {
                    if let Some(payload) = payload {
                        if let Some(missing) = resolve(payload, format!("{}.{field}", source.key)) {
                            unresolved = Some(missing);
                            break 'tasks;
                        }
                    }
                }
            }
        }
    }
    match unresolved {
        Some((id, referrer)) => missing_file(connector, id, referrer),
        None => Ok(()),
    }
}

fn tasks_mut(connector: &mut Connector) -> impl Iterator<Item = &mut Task> {
    std::iter::once(&mut connector.pre).chain(
        connector
            .monitors
            .values_mut()
            .flat_map(|m| [&mut m.discovery, &mut m.collect, &mut m.simple])
            .filter_map(Option::as_mut),
    )
}

fn check_translation_tables(connector: &Connector) -> Result<(), CompileError> {
    for (_, task) in connector.tasks() {
        for source in &task.sources {
            for compute in &source.computes {
                let Some(table) = compute.translation_table() else {
                    continue;
                };
                if connector.translation_table(&table.name).is_none() {
                    return Err(CompileError::MissingTranslationTable {
                        table: table.name.clone(),
                        referrer: compute_owner(source, compute),
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_references(connector: &Connector) -> Result<(), CompileError> {
    for (_, task) in connector.tasks() {
        for source in &task.sources {
            for reference in source_references(source) {
                let target = &reference.target;
                if connector.source(&target.scope, &target.name).is_none() {
                    return Err(CompileError::MissingReferencedEntity {
                        entity: target.key(),
                        referrer: format!("{}.{}", source.key, reference.field),
                    });
                }
            }
        }
    }
    Ok(())
}

fn plan_task(
    connector: &mut Connector,
    scope: &SourceScope,
) -> Result<Option<TaskPlan>, CompileError> {
    let Some(task) = connector.task_mut(scope) else {
        return Ok(None);
    };
    let layers = DependencyGraph::build(scope, &task.sources).layers()?;
    let order = sequence(
        &task.sources,
        task.execution_order.as_deref(),
        Some(layers.as_slice()),
    )
    .map_err(|err| err.in_scope(&scope.to_string()))?;
    task.dependency_layers = Some(layers.clone());

    let (monitor, phase) = match scope {
        SourceScope::Pre => (None, None),
        SourceScope::Task { monitor, phase } => (Some(monitor.clone()), Some(*phase)),
    };
    Ok(Some(TaskPlan {
        monitor,
        phase,
        layers,
        order,
    }))
}

fn build_plan(connector: &mut Connector) -> Result<ExecutionPlan, CompileError> {
    let mut plan = ExecutionPlan {
        connector_id: connector.id.clone(),
        ..ExecutionPlan::default()
    };
    for scope in connector.scopes() {
        let Some(task_plan) = plan_task(connector, &scope)? else {
            continue;
        };
        match scope {
            SourceScope::Pre => plan.pre = task_plan,
            SourceScope::Task { .. } => plan.tasks.push(task_plan),
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::Phase;
    use crate::model::source::SourceKind;
    use pretty_assertions::assert_eq;

    fn compile_pairs(pairs: &[(&str, &str)]) -> Result<CompiledConnector, CompileError> {
        let mut compiler = ConnectorCompiler::new("Test", CompilerConfig::default());
        compiler.apply_all(pairs.iter().copied())?;
        compiler.finish()
    }

    fn err_kind(pairs: &[(&str, &str)]) -> ErrorKind {
        compile_pairs(pairs).unwrap_err().kind()
    }

    #[test]
    fn unrecognized_keys_become_problems() {
        let compiled = compile_pairs(&[
            ("hdf.DisplayName", "Test"),
            ("hdf.NotAThing", "x"),
            ("disk.discovery.source(1).type", "Static"),
            ("disk.discovery.source(1).value", "a;b"),
        ])
        .unwrap();
        assert_eq!(compiled.problems.len(), 1);
        assert_eq!(compiled.problems[0].key, "hdf.NotAThing");

        let mut strict = ConnectorCompiler::new("Test", CompilerConfig::strict());
        strict.apply("hdf.NotAThing", "x").unwrap();
        assert_eq!(strict.finish().unwrap_err().kind(), ErrorKind::UnrecognizedKey);
    }

    #[test]
    fn constants_are_substituted_before_validation() {
        let compiled = compile_pairs(&[
            ("constants.TOOL", "/usr/bin/ipmitool"),
            ("constants.SRC", "monitors.fan.collect.sources.source(1)"),
            ("fan.collect.source(1).type", "OsCommand"),
            ("fan.collect.source(1).commandLine", "${constant::TOOL} sdr"),
            ("fan.collect.source(2).type", "Copy"),
            ("fan.collect.source(2).from", "$${constant::SRC}$"),
        ])
        .unwrap();
        let scope = SourceScope::task("fan", Phase::Collect);
        let source = compiled.connector.source(&scope, "source(1)").unwrap();
        let SourceKind::OsCommand(command) = &source.kind else {
            panic!("variant changed");
        };
        assert_eq!(command.command_line.as_deref(), Some("/usr/bin/ipmitool sdr"));
        assert_eq!(
            compiled.plan.order(&scope).unwrap(),
            &["source(1)".to_string(), "source(2)".to_string()]
        );
    }

    #[test]
    fn gaps_in_computes_are_missing_entities() {
        let err = compile_pairs(&[
            ("disk.collect.source(1).type", "Static"),
            ("disk.collect.source(1).compute(1).type", "DuplicateColumn"),
            ("disk.collect.source(1).compute(3).type", "DuplicateColumn"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingReferencedEntity {
                entity: "monitors.disk.collect.sources.source(1).compute(2)".into(),
                referrer: "monitors.disk.collect.sources.source(1).compute(3)".into(),
            }
        );

        let mut lenient = ConnectorCompiler::new("Test", CompilerConfig::lenient());
        lenient.apply("disk.collect.source(2).type", "Static").unwrap();
        assert!(lenient.finish().is_ok());
    }

    #[test]
    fn unknown_translation_table_is_fatal() {
        assert_eq!(
            err_kind(&[
                ("disk.collect.source(1).type", "Static"),
                ("disk.collect.source(1).compute(1).type", "Translate"),
                ("disk.collect.source(1).compute(1).translationTable", "StatusTable"),
            ]),
            ErrorKind::MissingTranslationTable
        );
        assert!(
            compile_pairs(&[
                ("StatusTable(ok)", "OK"),
                ("disk.collect.source(1).type", "Static"),
                ("disk.collect.source(1).compute(1).type", "Translate"),
                ("disk.collect.source(1).compute(1).translationTable", "statustable"),
            ])
            .is_ok()
        );
    }

    #[test]
    fn http_payloads_get_their_own_file_copy() {
        let compiled = compile_pairs(&[
            ("EmbeddedFile(1)", "Authorization: %{AUTHENTICATION_TOKEN}"),
            ("pre.source(1).type", "Http"),
            ("pre.source(1).header", "EmbeddedFile(1)"),
            ("pre.source(1).url", "/api/v1"),
        ])
        .unwrap();
        let source = compiled.connector.source(&SourceScope::Pre, "source(1)").unwrap();
        let SourceKind::Http(http) = &source.kind else {
            panic!("variant changed");
        };
        let header = http.header.as_ref().unwrap();
        assert_eq!(header.text(), Some("Authorization: %{AUTHENTICATION_TOKEN}"));

        assert_eq!(
            err_kind(&[
                ("pre.source(1).type", "Http"),
                ("pre.source(1).body", "EmbeddedFile(4)"),
            ]),
            ErrorKind::MissingEmbeddedFile
        );
        assert_eq!(
            err_kind(&[
                ("pre.source(1).type", "OsCommand"),
                ("pre.source(1).commandLine", "/bin/sh EmbeddedFile(2)"),
            ]),
            ErrorKind::MissingEmbeddedFile
        );
    }

    #[test]
    fn dangling_source_reference_is_fatal() {
        let err = compile_pairs(&[
            ("disk.collect.source(1).type", "Copy"),
            ("disk.collect.source(1).from", "$monitors.disk.discovery.sources.source(1)$"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingReferencedEntity {
                entity: "monitors.disk.discovery.sources.source(1)".into(),
                referrer: "monitors.disk.collect.sources.source(1).from".into(),
            }
        );
    }

    #[test]
    fn divergent_explicit_order_names_its_task() {
        let err = compile_pairs(&[
            ("disk.collect.source(1).type", "Static"),
            ("disk.collect.source(2).type", "Static"),
            ("disk.collect.executionOrder", "source(2)"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::IncompleteOrDivergentOrder {
                scope: "monitors.disk.collect".into(),
                missing: vec!["source(1)".into()],
                extra: Vec::new(),
            }
        );
    }

    #[test]
    fn layers_are_stored_on_the_task() {
        let compiled = compile_pairs(&[
            ("pre.lsblk.type", "OsCommand"),
            ("pre.parsed.type", "Copy"),
            ("pre.parsed.from", "${source::pre.lsblk}"),
        ])
        .unwrap();
        assert_eq!(
            compiled.connector.pre.dependency_layers,
            Some(vec![vec!["lsblk".to_string()], vec!["parsed".to_string()]])
        );
        assert_eq!(compiled.plan.pre.order, vec!["lsblk", "parsed"]);
    }

    #[test]
    fn artifact_round_trips() {
        let compiled = compile_pairs(&[
            ("hdf.DisplayName", "Round trip"),
            ("cpu.discovery.source(1).type", "SnmpTable"),
            ("cpu.discovery.source(1).oid", "1.3.6.1.2.1.25.3.3"),
            ("cpu.discovery.source(1).selectColumns", "ID,1"),
            ("cpu.discovery.instanceTable", "source(1)"),
        ])
        .unwrap();
        let text = compiled.to_json().unwrap();
        let back = CompiledConnector::from_json(&text).unwrap();
        assert_eq!(*back.connector, *compiled.connector);
        assert_eq!(*back.plan, *compiled.plan);
    }

    #[test]
    fn batch_failures_stay_with_their_connector() {
        let good = ConnectorInput {
            id: "Good".into(),
            assignments: vec![("pre.source(1).type".into(), "Static".into())],
        };
        let bad = ConnectorInput {
            id: "Bad".into(),
            assignments: vec![("pre.source(0).type".into(), "Static".into())],
        };
        let results = compile_batch(&[good, bad], &CompilerConfig::default());
        assert_eq!(results[0].as_ref().map(|c| c.id()), Ok("Good"));
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.connector, "Bad");
        assert_eq!(err.error.kind(), ErrorKind::MalformedKey);
    }
}
