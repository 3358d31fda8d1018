//! Sources: one data-gathering step per entry, tagged by protocol or table
//! transform.

use crate::model::compute::Compute;
use crate::model::detection::Step;
use crate::model::resource::{Body, EmbeddedResource, Header, Rewrite};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Concrete source variant, without its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    Copy,
    Http,
    Ipmi,
    OsCommand,
    SnmpGet,
    SnmpTable,
    Sql,
    Static,
    TableJoin,
    TableUnion,
    Wbem,
    Wmi,
    SshInteractive,
}

impl SourceType {
    pub const ALL: [SourceType; 13] = [
        SourceType::Copy,
        SourceType::Http,
        SourceType::Ipmi,
        SourceType::OsCommand,
        SourceType::SnmpGet,
        SourceType::SnmpTable,
        SourceType::Sql,
        SourceType::Static,
        SourceType::TableJoin,
        SourceType::TableUnion,
        SourceType::Wbem,
        SourceType::Wmi,
        SourceType::SshInteractive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceType::Copy => "copy",
            SourceType::Http => "http",
            SourceType::Ipmi => "ipmi",
            SourceType::OsCommand => "osCommand",
            SourceType::SnmpGet => "snmpGet",
            SourceType::SnmpTable => "snmpTable",
            SourceType::Sql => "sql",
            SourceType::Static => "static",
            SourceType::TableJoin => "tableJoin",
            SourceType::TableUnion => "tableUnion",
            SourceType::Wbem => "wbem",
            SourceType::Wmi => "wmi",
            SourceType::SshInteractive => "sshInteractive",
        }
    }

    /// Parse a `type` value. Case-insensitive; legacy spellings accepted.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();
        let ty = match normalized.as_str() {
            "copy" | "reference" => SourceType::Copy,
            "http" => SourceType::Http,
            "ipmi" => SourceType::Ipmi,
            "oscommand" | "commandline" => SourceType::OsCommand,
            "snmpget" => SourceType::SnmpGet,
            "snmptable" => SourceType::SnmpTable,
            "sql" => SourceType::Sql,
            "static" => SourceType::Static,
            "tablejoin" | "tablejoint" => SourceType::TableJoin,
            "tableunion" => SourceType::TableUnion,
            "wbem" => SourceType::Wbem,
            "wmi" => SourceType::Wmi,
            "sshinteractive" | "telnetinteractive" => SourceType::SshInteractive,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Header>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpmiSource {}

/// Fields shared by every source that slices a text result into a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_at_line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at_line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separators: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_columns: Option<String>,
}

impl LineFilter {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        for field in [
            &mut self.exclude,
            &mut self.keep,
            &mut self.separators,
            &mut self.select_columns,
        ] {
            rewrite_opt(field, rewrite);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsCommandSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub execute_locally: bool,
    #[serde(flatten)]
    pub filter: LineFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpGetSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnmpTableSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_columns: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableJoinSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_key_column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_key_column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_right_line: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_wbem_key: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUnionSource {
    /// 1-based table position to table reference.
    #[serde(default)]
    pub tables: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WqlSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    #[serde(flatten)]
    pub filter: LineFilter,
}

/// Variant-specific source fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    Copy(CopySource),
    Http(HttpSource),
    Ipmi(IpmiSource),
    OsCommand(OsCommandSource),
    SnmpGet(SnmpGetSource),
    SnmpTable(SnmpTableSource),
    Sql(SqlSource),
    Static(StaticSource),
    TableJoin(TableJoinSource),
    TableUnion(TableUnionSource),
    Wbem(WqlSource),
    Wmi(WqlSource),
    SshInteractive(InteractiveSource),
}

impl SourceKind {
    pub fn new(ty: SourceType) -> Self {
        match ty {
            SourceType::Copy => SourceKind::Copy(CopySource::default()),
            SourceType::Http => SourceKind::Http(HttpSource::default()),
            SourceType::Ipmi => SourceKind::Ipmi(IpmiSource::default()),
            SourceType::OsCommand => SourceKind::OsCommand(OsCommandSource::default()),
            SourceType::SnmpGet => SourceKind::SnmpGet(SnmpGetSource::default()),
            SourceType::SnmpTable => SourceKind::SnmpTable(SnmpTableSource::default()),
            SourceType::Sql => SourceKind::Sql(SqlSource::default()),
            SourceType::Static => SourceKind::Static(StaticSource::default()),
            SourceType::TableJoin => SourceKind::TableJoin(TableJoinSource::default()),
            SourceType::TableUnion => SourceKind::TableUnion(TableUnionSource::default()),
            SourceType::Wbem => SourceKind::Wbem(WqlSource::default()),
            SourceType::Wmi => SourceKind::Wmi(WqlSource::default()),
            SourceType::SshInteractive => {
                SourceKind::SshInteractive(InteractiveSource::default())
            }
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            SourceKind::Copy(_) => SourceType::Copy,
            SourceKind::Http(_) => SourceType::Http,
            SourceKind::Ipmi(_) => SourceType::Ipmi,
            SourceKind::OsCommand(_) => SourceType::OsCommand,
            SourceKind::SnmpGet(_) => SourceType::SnmpGet,
            SourceKind::SnmpTable(_) => SourceType::SnmpTable,
            SourceKind::Sql(_) => SourceType::Sql,
            SourceKind::Static(_) => SourceType::Static,
            SourceKind::TableJoin(_) => SourceType::TableJoin,
            SourceKind::TableUnion(_) => SourceType::TableUnion,
            SourceKind::Wbem(_) => SourceType::Wbem,
            SourceKind::Wmi(_) => SourceType::Wmi,
            SourceKind::SshInteractive(_) => SourceType::SshInteractive,
        }
    }

    /// Fields of this variant that may legally hold a source reference, as
    /// `(field name, value)` pairs. Unset fields are skipped.
    pub fn reference_fields<'a>(&'a self) -> Vec<(String, &'a str)> {
        let mut fields: Vec<(String, &'a str)> = Vec::new();
        let mut push = |name: &str, value: Option<&'a str>| {
            if let Some(value) = value {
                fields.push((name.to_string(), value));
            }
        };
        match self {
            SourceKind::Copy(s) => push("from", s.from.as_deref()),
            SourceKind::Http(s) => {
                push("url", s.url.as_deref());
                push("path", s.path.as_deref());
                push("header", s.header.as_ref().and_then(|h| h.text()));
                push("body", s.body.as_ref().and_then(|b| b.text()));
                push("authenticationToken", s.authentication_token.as_deref());
            }
            SourceKind::OsCommand(s) => push("commandLine", s.command_line.as_deref()),
            SourceKind::SnmpGet(s) => push("oid", s.oid.as_deref()),
            SourceKind::SnmpTable(s) => push("oid", s.oid.as_deref()),
            SourceKind::Sql(s) => push("query", s.query.as_deref()),
            SourceKind::Static(s) => push("value", s.value.as_deref()),
            SourceKind::TableJoin(s) => {
                push("leftTable", s.left_table.as_deref());
                push("rightTable", s.right_table.as_deref());
            }
            SourceKind::TableUnion(s) => {
                for (position, table) in &s.tables {
                    push(&format!("table({position})"), Some(table));
                }
            }
            SourceKind::Wbem(s) | SourceKind::Wmi(s) => {
                push("query", s.query.as_deref());
                push("namespace", s.namespace.as_deref());
            }
            SourceKind::Ipmi(_) | SourceKind::SshInteractive(_) => {}
        }
        fields
    }

    /// Text fields that may embed an `EmbeddedFile(N)` token.
    pub fn embedded_file_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            SourceKind::OsCommand(s) => s
                .command_line
                .as_deref()
                .map(|v| vec![("commandLine", v)])
                .unwrap_or_default(),
            SourceKind::Sql(s) => s
                .query
                .as_deref()
                .map(|v| vec![("query", v)])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn update(&mut self, rewrite: Rewrite<'_>) {
        match self {
            SourceKind::Copy(s) => rewrite_opt(&mut s.from, rewrite),
            SourceKind::Http(s) => {
                for field in [
                    &mut s.method,
                    &mut s.url,
                    &mut s.path,
                    &mut s.authentication_token,
                    &mut s.result_content,
                ] {
                    rewrite_opt(field, rewrite);
                }
                if let Some(header) = &mut s.header {
                    header.update(rewrite);
                }
                if let Some(body) = &mut s.body {
                    body.update(rewrite);
                }
            }
            SourceKind::Ipmi(_) => {}
            SourceKind::OsCommand(s) => {
                rewrite_opt(&mut s.command_line, rewrite);
                s.filter.update(rewrite);
            }
            SourceKind::SnmpGet(s) => rewrite_opt(&mut s.oid, rewrite),
            SourceKind::SnmpTable(s) => {
                rewrite_opt(&mut s.oid, rewrite);
                rewrite_opt(&mut s.select_columns, rewrite);
            }
            SourceKind::Sql(s) => {
                rewrite_opt(&mut s.query, rewrite);
                rewrite_opt(&mut s.database, rewrite);
            }
            SourceKind::Static(s) => rewrite_opt(&mut s.value, rewrite),
            SourceKind::TableJoin(s) => {
                rewrite_opt(&mut s.left_table, rewrite);
                rewrite_opt(&mut s.right_table, rewrite);
                rewrite_opt(&mut s.default_right_line, rewrite);
            }
            SourceKind::TableUnion(s) => {
                for table in s.tables.values_mut() {
                    *table = rewrite(table);
                }
            }
            SourceKind::Wbem(s) | SourceKind::Wmi(s) => {
                rewrite_opt(&mut s.query, rewrite);
                rewrite_opt(&mut s.namespace, rewrite);
            }
            SourceKind::SshInteractive(s) => {
                s.filter.update(rewrite);
                for step in &mut s.steps {
                    step.update(rewrite);
                }
            }
        }
    }
}

/// How per-entry results of an "execute for each entry of" source are joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum EntryConcatMethod {
    #[default]
    List,
    JsonArray,
    JsonArrayExtended,
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<String>,
    },
}

impl EntryConcatMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "list" => Some(EntryConcatMethod::List),
            "jsonarray" => Some(EntryConcatMethod::JsonArray),
            "jsonarrayextended" => Some(EntryConcatMethod::JsonArrayExtended),
            "custom" => Some(EntryConcatMethod::Custom {
                start: None,
                end: None,
            }),
            _ => None,
        }
    }
}

/// Run a source once per row of another source's table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteForEachEntryOf {
    pub source: String,
    #[serde(default)]
    pub concat_method: EntryConcatMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<u64>,
}

/// One data-gathering step of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// 1-based position within the owning task.
    pub index: u32,
    pub name: String,
    /// `monitors.<type>.<phase>.sources.<name>` or `pre.<name>`.
    pub key: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_serialization: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computes: Vec<Compute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_for_each_entry_of: Option<ExecuteForEachEntryOf>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

impl Source {
    pub fn new(
        index: u32,
        name: impl Into<String>,
        key: impl Into<String>,
        ty: SourceType,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            key: key.into(),
            force_serialization: false,
            computes: Vec::new(),
            execute_for_each_entry_of: None,
            kind: SourceKind::new(ty),
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.kind.source_type()
    }

    pub fn compute(&self, index: u32) -> Option<&Compute> {
        self.computes.iter().find(|c| c.index == index)
    }

    pub fn compute_mut(&mut self, index: u32) -> Option<&mut Compute> {
        self.computes.iter_mut().find(|c| c.index == index)
    }

    /// Insert keeping the computes sorted by index.
    pub(crate) fn insert_compute(&mut self, compute: Compute) -> &mut Compute {
        let position = self
            .computes
            .iter()
            .position(|c| c.index > compute.index)
            .unwrap_or(self.computes.len());
        self.computes.insert(position, compute);
        &mut self.computes[position]
    }

    /// Interactive steps, when this source is of the interactive variant.
    pub fn steps(&self) -> Option<&[Step]> {
        match &self.kind {
            SourceKind::SshInteractive(s) => Some(&s.steps),
            _ => None,
        }
    }

    pub(crate) fn steps_mut(&mut self) -> Option<&mut Vec<Step>> {
        match &mut self.kind {
            SourceKind::SshInteractive(s) => Some(&mut s.steps),
            _ => None,
        }
    }
}

impl EmbeddedResource for Source {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        self.kind.update(rewrite);
        if let Some(each) = &mut self.execute_for_each_entry_of {
            each.source = rewrite(&each.source);
            if let EntryConcatMethod::Custom { start, end } = &mut each.concat_method {
                rewrite_opt(start, rewrite);
                rewrite_opt(end, rewrite);
            }
        }
        for compute in &mut self.computes {
            compute.update(rewrite);
        }
    }

    fn description(&self) -> String {
        format!("{} ({})", self.key, self.source_type())
    }
}

pub(crate) fn rewrite_opt(field: &mut Option<String>, rewrite: Rewrite<'_>) {
    if let Some(value) = field {
        *value = rewrite(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_legacy_type_names() {
        assert_eq!(SourceType::parse("TableJoint"), Some(SourceType::TableJoin));
        assert_eq!(SourceType::parse("SNMPTable"), Some(SourceType::SnmpTable));
        assert_eq!(SourceType::parse("os_command"), Some(SourceType::OsCommand));
        assert_eq!(SourceType::parse("Wbem"), Some(SourceType::Wbem));
        assert_eq!(SourceType::parse("carrier-pigeon"), None);
        for ty in SourceType::ALL {
            assert_eq!(SourceType::parse(ty.name()), Some(ty));
            assert_eq!(SourceKind::new(ty).source_type(), ty);
        }
    }

    #[test]
    fn reference_fields_follow_the_variant() {
        let mut source = Source::new(1, "source(1)", "x", SourceType::TableJoin);
        if let SourceKind::TableJoin(join) = &mut source.kind {
            join.left_table = Some("$pre.a$".into());
            join.right_table = Some("$pre.b$".into());
            join.default_right_line = Some(";;".into());
        }
        let fields: Vec<String> = source
            .kind
            .reference_fields()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(fields, vec!["leftTable", "rightTable"]);

        let ipmi = SourceKind::new(SourceType::Ipmi);
        assert!(ipmi.reference_fields().is_empty());
    }

    #[test]
    fn update_rewrites_nested_text() {
        let mut source = Source::new(2, "source(2)", "x", SourceType::OsCommand);
        if let SourceKind::OsCommand(cmd) = &mut source.kind {
            cmd.command_line = Some("run ${constant::TOOL}".into());
        }
        source.execute_for_each_entry_of = Some(ExecuteForEachEntryOf {
            source: "${constant::TOOL}".into(),
            ..Default::default()
        });
        source.update(&|s| s.replace("${constant::TOOL}", "ipmitool"));
        let SourceKind::OsCommand(cmd) = &source.kind else {
            panic!("variant changed");
        };
        assert_eq!(cmd.command_line.as_deref(), Some("run ipmitool"));
        assert_eq!(
            source.execute_for_each_entry_of.as_ref().map(|e| e.source.as_str()),
            Some("ipmitool")
        );
    }

    #[test]
    fn computes_stay_sorted_by_index() {
        use crate::model::compute::{Compute, ComputeType};
        let mut source = Source::new(1, "source(1)", "x", SourceType::Static);
        source.insert_compute(Compute::new(3, ComputeType::DuplicateColumn));
        source.insert_compute(Compute::new(1, ComputeType::Add));
        source.insert_compute(Compute::new(2, ComputeType::Awk));
        let indices: Vec<u32> = source.computes.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn serialization_round_trips_optional_fields() {
        let mut source =
            Source::new(1, "s1", "monitors.cpu.discovery.sources.s1", SourceType::Http);
        if let SourceKind::Http(http) = &mut source.kind {
            http.url = Some("/api".into());
            http.header = Some(Header::from_value("EmbeddedFile(1)"));
        }
        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains(r#""type":"http""#));
        assert!(!json.contains("body"));
        let back: Source = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }
}
