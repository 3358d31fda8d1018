//! Boundary with the execution engine.
//!
//! The compiler never talks to a device. The engine walks an
//! [`ExecutionPlan`] and runs each planned source through a
//! [`ProtocolExecutor`], then each of the source's computes through a
//! [`ComputeApplier`]. AWK computes are prepared once per distinct script
//! text and shared through a process-wide [`ScriptCache`].

use crate::model::compute::{Compute, ComputeKind, ComputeType};
use crate::model::resource::embedded_file_tokens;
use crate::model::source::Source;
use crate::model::Connector;
use crate::plan::{ExecutionPlan, TaskPlan};
use crate::rules::list;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Column separator of the text form of a table.
pub const TABLE_SEPARATOR: char = ';';

/// Tabular result of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTable {
    pub rows: Vec<Vec<String>>,
    /// Unparsed protocol output, when the protocol returns text.
    pub raw: Option<String>,
}

impl SourceTable {
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
            raw: None,
        }
    }

    /// Parse `;` separated lines. One trailing separator per line is allowed
    /// and does not add an empty column.
    pub fn from_text(text: &str) -> Self {
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let line = line.strip_suffix(TABLE_SEPARATOR).unwrap_or(line);
                line.split(TABLE_SEPARATOR).map(str::to_string).collect()
            })
            .collect();
        Self {
            rows,
            raw: Some(text.to_string()),
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            for cell in row {
                out.push_str(cell);
                out.push(TABLE_SEPARATOR);
            }
            out.push('\n');
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Source tables produced so far, keyed by source key.
pub type SourceResults = BTreeMap<String, SourceTable>;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("{scope} plans source '{name}' which the connector does not define")]
    UnknownSource { scope: String, name: String },

    #[error("source {key} failed: {message}")]
    Protocol { key: String, message: String },

    #[error("compute({index}) of {key} failed: {message}")]
    Compute {
        key: String,
        index: u32,
        message: String,
    },

    #[error("compute({index}) of {key} is {compute}, which this applier does not handle")]
    Unsupported {
        key: String,
        index: u32,
        compute: ComputeType,
    },

    #[error("invalid awk script at line {line}: {reason}")]
    InvalidScript { line: usize, reason: String },

    #[error("missing embedded file EmbeddedFile({file}) (referenced by {referrer})")]
    MissingScript { file: u32, referrer: String },
}

/// Runs one source against the monitored host.
pub trait ProtocolExecutor: Send + Sync {
    /// `results` holds the tables of every source already run in this
    /// collection cycle, `pre` sources included.
    fn execute(&self, source: &Source, results: &SourceResults)
    -> Result<SourceTable, ExecuteError>;
}

/// Transforms a source table in place, one compute at a time.
pub trait ComputeApplier: Send + Sync {
    fn apply(
        &self,
        source: &Source,
        compute: &Compute,
        table: &mut SourceTable,
    ) -> Result<(), ExecuteError>;
}

/// Run the sources of one task in plan order and store each final table in
/// `results`.
pub fn run_task(
    connector: &Connector,
    plan: &TaskPlan,
    executor: &dyn ProtocolExecutor,
    applier: &dyn ComputeApplier,
    results: &mut SourceResults,
) -> Result<(), ExecuteError> {
    let scope = plan.scope();
    for name in &plan.order {
        let source = connector
            .source(&scope, name)
            .ok_or_else(|| ExecuteError::UnknownSource {
                scope: scope.to_string(),
                name: name.clone(),
            })?;
        let mut table = executor.execute(source, results)?;
        for compute in &source.computes {
            applier.apply(source, compute, &mut table)?;
        }
        debug!(source = %source.key, rows = table.len(), "source executed");
        results.insert(source.key.clone(), table);
    }
    Ok(())
}

/// Run `pre` first, then every monitor task.
pub fn run_plan(
    connector: &Connector,
    plan: &ExecutionPlan,
    executor: &dyn ProtocolExecutor,
    applier: &dyn ComputeApplier,
) -> Result<SourceResults, ExecuteError> {
    let mut results = SourceResults::new();
    run_task(connector, &plan.pre, executor, applier, &mut results)?;
    for task in &plan.tasks {
        run_task(connector, task, executor, applier, &mut results)?;
    }
    Ok(results)
}

/// Prepared programs keyed by exact script text.
pub struct ScriptCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T> Default for ScriptCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> ScriptCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached program for `script`, preparing it on first use.
    /// Failed preparations are not cached.
    pub fn get_or_prepare<E>(
        &self,
        script: &str,
        prepare: impl FnOnce(&str) -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(hit) = self.entries.lock().get(script) {
            return Ok(Arc::clone(hit));
        }
        let prepared = Arc::new(prepare(script)?);
        let mut entries = self.entries.lock();
        Ok(Arc::clone(
            entries.entry(script.to_string()).or_insert(prepared),
        ))
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// One `pattern { action }` pair. Either side may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwkRule {
    pub pattern: Option<String>,
    pub action: Option<String>,
}

/// An AWK script split into its top-level parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwkProgram {
    pub functions: Vec<String>,
    pub begin: Vec<String>,
    pub rules: Vec<AwkRule>,
    pub end: Vec<String>,
}

impl AwkProgram {
    /// Split `script` into BEGIN blocks, main rules, END blocks and function
    /// definitions. Braces must balance outside strings, regex literals and
    /// comments.
    pub fn parse(script: &str) -> Result<Self, ExecuteError> {
        let mut program = AwkProgram::default();
        let mut pattern = String::new();
        let mut body = String::new();
        let mut depth = 0usize;
        let mut line = 1usize;
        let mut block_line = 0usize;
        let mut previous = '\n';
        let mut chars = script.chars().peekable();

        while let Some(c) = chars.next() {
            let target = if depth == 0 { &mut pattern } else { &mut body };
            match c {
                '"' => {
                    target.push(c);
                    let start = line;
                    let mut closed = false;
                    while let Some(s) = chars.next() {
                        target.push(s);
                        match s {
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    target.push(escaped);
                                }
                            }
                            '"' => {
                                closed = true;
                                break;
                            }
                            '\n' => break,
                            _ => {}
                        }
                    }
                    if !closed {
                        return Err(ExecuteError::InvalidScript {
                            line: start,
                            reason: "unterminated string".into(),
                        });
                    }
                }
                '/' if "(,~!&|{};\n".contains(previous) => {
                    target.push(c);
                    while let Some(s) = chars.next() {
                        target.push(s);
                        match s {
                            '\\' => {
                                if let Some(escaped) = chars.next() {
                                    target.push(escaped);
                                }
                            }
                            '/' => break,
                            '\n' => {
                                line += 1;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                '#' => {
                    while chars.peek().is_some_and(|s| *s != '\n') {
                        chars.next();
                    }
                }
                '{' => {
                    if depth == 0 {
                        block_line = line;
                    } else {
                        body.push(c);
                    }
                    depth += 1;
                }
                '}' => {
                    if depth == 0 {
                        return Err(ExecuteError::InvalidScript {
                            line,
                            reason: "unexpected '}'".into(),
                        });
                    }
                    depth -= 1;
                    if depth == 0 {
                        program.push_block(pattern.trim(), body.trim());
                        pattern.clear();
                        body.clear();
                    } else {
                        body.push(c);
                    }
                }
                '\n' | ';' if depth == 0 => {
                    if c == '\n' {
                        line += 1;
                    }
                    if pattern.trim().is_empty() {
                        pattern.clear();
                    } else if continues(&pattern) {
                        pattern.push(c);
                    } else {
                        program.rules.push(AwkRule {
                            pattern: Some(pattern.trim().to_string()),
                            action: None,
                        });
                        pattern.clear();
                    }
                }
                _ => {
                    if c == '\n' {
                        line += 1;
                    }
                    target.push(c);
                }
            }
            if !c.is_whitespace() || c == '\n' {
                previous = c;
            }
        }

        if depth > 0 {
            return Err(ExecuteError::InvalidScript {
                line: block_line,
                reason: "unclosed '{'".into(),
            });
        }
        if !pattern.trim().is_empty() {
            program.rules.push(AwkRule {
                pattern: Some(pattern.trim().to_string()),
                action: None,
            });
        }
        Ok(program)
    }

    fn push_block(&mut self, pattern: &str, action: &str) {
        match pattern {
            "BEGIN" => self.begin.push(action.to_string()),
            "END" => self.end.push(action.to_string()),
            p if p.starts_with("function ") || p.starts_with("func ") => {
                self.functions.push(format!("{p} {{ {action} }}"));
            }
            p => self.rules.push(AwkRule {
                pattern: (!p.is_empty()).then(|| p.to_string()),
                action: Some(action.to_string()),
            }),
        }
    }
}

/// A pattern ending in an operator goes on after the line break.
fn continues(pattern: &str) -> bool {
    let trimmed = pattern.trim_end();
    ["&&", "||", ",", "\\"]
        .iter()
        .any(|op| trimmed.ends_with(op))
}

static AWK_CACHE: Lazy<ScriptCache<AwkProgram>> = Lazy::new(ScriptCache::new);

pub fn awk_cache() -> &'static ScriptCache<AwkProgram> {
    &AWK_CACHE
}

/// Drop every prepared AWK program.
pub fn reset_awk_cache() {
    AWK_CACHE.clear();
}

/// Text of an AWK compute's script. A script that is exactly one
/// `EmbeddedFile(N)` token is read from the connector.
pub fn awk_script_text<'a>(
    connector: &'a Connector,
    source: &Source,
    compute: &'a Compute,
) -> Result<Option<&'a str>, ExecuteError> {
    let Some(script) = compute.awk_script() else {
        return Ok(None);
    };
    let trimmed = script.trim();
    if let [id] = embedded_file_tokens(trimmed).as_slice() {
        let is_token = trimmed.eq_ignore_ascii_case(&format!("EmbeddedFile({id})"))
            || trimmed == format!("${{file::{id}}}");
        if is_token {
            return connector
                .embedded_files
                .get(id)
                .map(|file| Some(file.content.as_str()))
                .ok_or_else(|| ExecuteError::MissingScript {
                    file: *id,
                    referrer: format!("{}.compute({})", source.key, compute.index),
                });
        }
    }
    Ok(Some(script))
}

/// Prepared program of an AWK compute, shared through the process-wide
/// cache. `None` for other computes and for AWK computes without a script.
pub fn prepare_awk(
    connector: &Connector,
    source: &Source,
    compute: &Compute,
) -> Result<Option<Arc<AwkProgram>>, ExecuteError> {
    match awk_script_text(connector, source, compute)? {
        Some(script) => AWK_CACHE.get_or_prepare(script, AwkProgram::parse).map(Some),
        None => Ok(None),
    }
}

/// Applies the computes that only reshape or filter the table and need no
/// protocol access. Anything else is [`ExecuteError::Unsupported`].
pub struct TableComputes<'a> {
    connector: &'a Connector,
}

impl<'a> TableComputes<'a> {
    pub fn new(connector: &'a Connector) -> Self {
        Self { connector }
    }
}

impl ComputeApplier for TableComputes<'_> {
    fn apply(
        &self,
        source: &Source,
        compute: &Compute,
        table: &mut SourceTable,
    ) -> Result<(), ExecuteError> {
        let fail = |message: String| ExecuteError::Compute {
            key: source.key.clone(),
            index: compute.index,
            message,
        };
        let column = |column: Option<u32>| {
            column
                .filter(|c| *c > 0)
                .map(|c| c as usize - 1)
                .ok_or_else(|| fail("no column set".into()))
        };

        match &compute.kind {
            ComputeKind::KeepColumns(c) => {
                let keep: Vec<usize> = list(c.column_numbers.as_deref().unwrap_or_default())
                    .iter()
                    .map(|n| n.parse::<usize>().ok().filter(|n| *n > 0))
                    .collect::<Option<_>>()
                    .ok_or_else(|| fail("columnNumbers must list positive integers".into()))?;
                for row in &mut table.rows {
                    *row = keep.iter().filter_map(|n| row.get(n - 1).cloned()).collect();
                }
            }
            ComputeKind::DuplicateColumn(c) => {
                let at = column(c.column)?;
                for row in &mut table.rows {
                    if let Some(cell) = row.get(at).cloned() {
                        row.insert(at + 1, cell);
                    }
                }
            }
            ComputeKind::LeftConcat(c) | ComputeKind::RightConcat(c) => {
                let at = column(c.column)?;
                let left = matches!(compute.kind, ComputeKind::LeftConcat(_));
                let value = c.value.as_deref().unwrap_or_default();
                for row in &mut table.rows {
                    let operand = cell_or_literal(row, value);
                    if let Some(cell) = row.get_mut(at) {
                        *cell = if left {
                            format!("{operand}{cell}")
                        } else {
                            format!("{cell}{operand}")
                        };
                    }
                }
            }
            ComputeKind::Replace(c) => {
                let at = column(c.column)?;
                let existing = c.existing_value.as_deref().unwrap_or_default();
                if existing.is_empty() {
                    return Err(fail("existingValue is empty".into()));
                }
                let new_value = c.new_value.as_deref().unwrap_or_default();
                for row in &mut table.rows {
                    let replacement = cell_or_literal(row, new_value);
                    if let Some(cell) = row.get_mut(at) {
                        *cell = cell.replace(existing, &replacement);
                    }
                }
            }
            ComputeKind::Translate(c) => {
                let at = column(c.column)?;
                let name = c
                    .translation_table
                    .as_ref()
                    .map(|t| t.name.as_str())
                    .ok_or_else(|| fail("no translation table set".into()))?;
                let translations = self
                    .connector
                    .translation_table(name)
                    .ok_or_else(|| fail(format!("translation table '{name}' is not defined")))?;
                for row in &mut table.rows {
                    if let Some(cell) = row.get_mut(at) {
                        *cell = translations
                            .get(cell)
                            .or_else(|| translations.get("default"))
                            .unwrap_or_default()
                            .to_string();
                    }
                }
            }
            ComputeKind::KeepOnlyMatchingLines(c) | ComputeKind::ExcludeMatchingLines(c) => {
                let at = column(c.column)?;
                let keep = matches!(compute.kind, ComputeKind::KeepOnlyMatchingLines(_));
                let pattern = c
                    .regexp
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .map(|r| Regex::new(&format!("(?i){r}")))
                    .transpose()
                    .map_err(|e| fail(format!("invalid regexp: {e}")))?;
                let values: Vec<String> = list(c.value_list.as_deref().unwrap_or_default())
                    .into_iter()
                    .map(|v| v.to_lowercase())
                    .collect();
                table.rows.retain(|row| {
                    let cell = row.get(at).map(String::as_str).unwrap_or_default();
                    let matched = pattern.as_ref().is_some_and(|re| re.is_match(cell))
                        || values.contains(&cell.to_lowercase());
                    matched == keep
                });
            }
            _ => {
                return Err(ExecuteError::Unsupported {
                    key: source.key.clone(),
                    index: compute.index,
                    compute: compute.compute_type(),
                });
            }
        }
        Ok(())
    }
}

/// `$N` reads column N of the row; anything else is a literal.
fn cell_or_literal(row: &[String], value: &str) -> String {
    value
        .strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .map(|n| row.get(n - 1).cloned().unwrap_or_default())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::compute::{Awk, ColumnOnly, Concat, KeepColumns, MatchingLines, Translate};
    use crate::model::resource::{EmbeddedFile, ReferenceTranslationTable, TranslationTable};
    use crate::model::source::SourceType;
    use crate::model::{MonitorJob, Phase, SourceScope, Task};
    use pretty_assertions::assert_eq;

    fn source() -> Source {
        Source::new(1, "source(1)", "monitors.disk.collect.sources.source(1)", SourceType::Static)
    }

    fn compute(kind: ComputeKind) -> Compute {
        Compute { index: 1, kind }
    }

    fn table() -> SourceTable {
        SourceTable::from_rows([["sda", "ok", "100"], ["sdb", "failed", "200"]])
    }

    #[test]
    fn text_tables_drop_the_trailing_separator() {
        let t = SourceTable::from_text("a;b;\nc;d;\n\n");
        assert_eq!(t.rows, vec![vec!["a", "b"], vec!["c", "d"]]);
        assert_eq!(t.to_text(), "a;b;\nc;d;\n");
    }

    #[test]
    fn reshaping_computes() {
        let connector = Connector::new("c");
        let applier = TableComputes::new(&connector);
        let mut t = table();

        let keep = compute(ComputeKind::KeepColumns(KeepColumns {
            column_numbers: Some("1,3".into()),
        }));
        applier.apply(&source(), &keep, &mut t).unwrap();
        assert_eq!(t.rows[0], vec!["sda", "100"]);

        let dup = compute(ComputeKind::DuplicateColumn(ColumnOnly { column: Some(1) }));
        applier.apply(&source(), &dup, &mut t).unwrap();
        assert_eq!(t.rows[1], vec!["sdb", "sdb", "200"]);

        let concat = compute(ComputeKind::LeftConcat(Concat {
            column: Some(2),
            value: Some("/dev/".into()),
        }));
        applier.apply(&source(), &concat, &mut t).unwrap();
        assert_eq!(t.rows[0], vec!["sda", "/dev/sda", "100"]);

        let concat = compute(ComputeKind::RightConcat(Concat {
            column: Some(3),
            value: Some("$1".into()),
        }));
        applier.apply(&source(), &concat, &mut t).unwrap();
        assert_eq!(t.rows[1], vec!["sdb", "/dev/sdb", "200sdb"]);
    }

    #[test]
    fn filters_and_translations() {
        let mut connector = Connector::new("c");
        let mut status = TranslationTable::new("StatusTable");
        status.insert("ok", "OK");
        status.insert("Default", "UNKNOWN");
        connector.translation_tables.insert("statustable".into(), status);
        let applier = TableComputes::new(&connector);

        let mut t = table();
        let translate = compute(ComputeKind::Translate(Translate {
            column: Some(2),
            translation_table: ReferenceTranslationTable::from_reference("StatusTable"),
        }));
        applier.apply(&source(), &translate, &mut t).unwrap();
        assert_eq!(t.rows[0][1], "OK");
        assert_eq!(t.rows[1][1], "UNKNOWN");

        let mut t = table();
        let keep = compute(ComputeKind::KeepOnlyMatchingLines(MatchingLines {
            column: Some(1),
            regexp: Some("^sdb$".into()),
            value_list: None,
        }));
        applier.apply(&source(), &keep, &mut t).unwrap();
        assert_eq!(t.len(), 1);

        let mut t = table();
        let exclude = compute(ComputeKind::ExcludeMatchingLines(MatchingLines {
            column: Some(2),
            regexp: None,
            value_list: Some("OK, degraded".into()),
        }));
        applier.apply(&source(), &exclude, &mut t).unwrap();
        assert_eq!(t.rows, vec![vec!["sdb", "failed", "200"]]);
    }

    #[test]
    fn other_computes_are_unsupported() {
        let connector = Connector::new("c");
        let awk = compute(ComputeKind::Awk(Awk::default()));
        let err = TableComputes::new(&connector)
            .apply(&source(), &awk, &mut table())
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Unsupported { compute: ComputeType::Awk, .. }));

        let dup = compute(ComputeKind::DuplicateColumn(ColumnOnly { column: None }));
        let err = TableComputes::new(&connector)
            .apply(&source(), &dup, &mut table())
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Compute { index: 1, .. }));
    }

    #[test]
    fn awk_programs_are_split_into_blocks() {
        let program = AwkProgram::parse(
            r#"
BEGIN { FS = ";" }   # header
function trim(s) { gsub(/^ +| +$/, "", s); return s }
/^disk/ { print trim($2) "}" }
NR > 1 &&
  $3 != ""
END { print "done" }
"#,
        )
        .unwrap();
        assert_eq!(program.begin, vec![r#"FS = ";""#]);
        assert_eq!(program.end, vec![r#"print "done""#]);
        assert_eq!(program.functions.len(), 1);
        assert_eq!(
            program.rules,
            vec![
                AwkRule {
                    pattern: Some("/^disk/".into()),
                    action: Some(r#"print trim($2) "}""#.into()),
                },
                AwkRule {
                    pattern: Some("NR > 1 &&\n  $3 != \"\"".into()),
                    action: None,
                },
            ]
        );
    }

    #[test]
    fn unbalanced_awk_is_rejected() {
        let err = AwkProgram::parse("{ print $1\n").unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidScript { line: 1, .. }));
        let err = AwkProgram::parse("{ print }\n}\n").unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidScript { line: 2, .. }));
        let err = AwkProgram::parse("{ print \"x }\n").unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidScript { .. }));
    }

    #[test]
    fn script_cache_prepares_each_text_once() {
        let cache: ScriptCache<AwkProgram> = ScriptCache::new();
        let mut prepared = 0;
        let mut prepare = |script: &str| {
            prepared += 1;
            AwkProgram::parse(script)
        };
        let a = cache.get_or_prepare("{ print $1 }", &mut prepare).unwrap();
        let b = cache.get_or_prepare("{ print $1 }", &mut prepare).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get_or_prepare("{", &mut prepare).is_err());
        assert_eq!(prepared, 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn awk_scripts_resolve_embedded_files() {
        let mut connector = Connector::new("c");
        connector
            .embedded_files
            .insert(4, EmbeddedFile::new(4, "{ print \"embedded-4\" }"));
        let with_script = |script: &str| {
            compute(ComputeKind::Awk(Awk {
                script: Some(script.into()),
                ..Awk::default()
            }))
        };

        let from_file = with_script("EmbeddedFile(4)");
        assert_eq!(
            awk_script_text(&connector, &source(), &from_file).unwrap(),
            Some("{ print \"embedded-4\" }")
        );
        let first = prepare_awk(&connector, &source(), &from_file).unwrap().unwrap();
        let again = prepare_awk(&connector, &source(), &with_script("${file::4}"))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let missing = with_script("EmbeddedFile(9)");
        let err = prepare_awk(&connector, &source(), &missing).unwrap_err();
        assert!(matches!(err, ExecuteError::MissingScript { file: 9, .. }));

        let inline = with_script("BEGIN { x = 1 } EmbeddedFile(4)");
        assert_eq!(
            awk_script_text(&connector, &source(), &inline).unwrap(),
            Some("BEGIN { x = 1 } EmbeddedFile(4)")
        );
    }

    struct Echo;

    impl ProtocolExecutor for Echo {
        fn execute(
            &self,
            source: &Source,
            results: &SourceResults,
        ) -> Result<SourceTable, ExecuteError> {
            Ok(SourceTable::from_rows([[source.name.clone(), results.len().to_string()]]))
        }
    }

    #[test]
    fn tasks_run_in_plan_order() {
        let scope = SourceScope::task("disk", Phase::Collect);
        let mut task = Task::default();
        for (i, name) in ["a", "b"].iter().enumerate() {
            let mut s =
                Source::new(i as u32 + 1, *name, scope.source_key(name), SourceType::Static);
            s.computes.push(Compute {
                index: 1,
                kind: ComputeKind::DuplicateColumn(ColumnOnly { column: Some(1) }),
            });
            task.sources.push(s);
        }
        let mut monitor = MonitorJob::new("disk");
        monitor.collect = Some(task);
        let mut connector = Connector::new("c");
        connector.monitors.insert("disk".into(), monitor);

        let plan = ExecutionPlan {
            connector_id: "c".into(),
            pre: TaskPlan::default(),
            tasks: vec![TaskPlan {
                monitor: Some("disk".into()),
                phase: Some(Phase::Collect),
                layers: Vec::new(),
                order: vec!["b".into(), "a".into()],
            }],
        };
        let results = run_plan(&connector, &plan, &Echo, &TableComputes::new(&connector)).unwrap();
        assert_eq!(results["monitors.disk.collect.sources.b"].rows, vec![vec!["b", "b", "0"]]);
        assert_eq!(results["monitors.disk.collect.sources.a"].rows, vec![vec!["a", "a", "1"]]);

        let mut broken = plan.clone();
        broken.tasks[0].order.push("ghost".into());
        let err =
            run_plan(&connector, &broken, &Echo, &TableComputes::new(&connector)).unwrap_err();
        assert!(matches!(err, ExecuteError::UnknownSource { ref name, .. } if name == "ghost"));
    }
}
