//! Source rules: one `type` rule plus one rule per variant field.

use super::{Apply, Prop, Rule, SetError, ValueShape, count, flag, list, positive};
use crate::key::{KeyPath, SlotKind};
use crate::model::resource::HttpPayload;
use crate::model::source::{
    EntryConcatMethod, ExecuteForEachEntryOf, LineFilter, Source, SourceKind, SourceType,
};

const ANY_SOURCE: &[SourceType] = &SourceType::ALL;
const FILTERED: &[SourceType] = &[SourceType::OsCommand, SourceType::SshInteractive];

fn line_filter(source: &mut Source) -> Result<&mut LineFilter, SetError> {
    match &mut source.kind {
        SourceKind::OsCommand(s) => Ok(&mut s.filter),
        SourceKind::SshInteractive(s) => Ok(&mut s.filter),
        _ => Err(SetError::WrongVariant),
    }
}

fn each_entry(source: &mut Source) -> &mut ExecuteForEachEntryOf {
    source
        .execute_for_each_entry_of
        .get_or_insert_with(ExecuteForEachEntryOf::default)
}

fn set_concat_method(source: &mut Source, _: &KeyPath, value: &str) -> Result<(), SetError> {
    let method = EntryConcatMethod::parse(value).ok_or(SetError::Invalid {
        expected: "list, jsonArray, jsonArrayExtended or custom",
    })?;
    let each = each_entry(source);
    // An explicit start/end given earlier already switched to custom.
    if !(matches!(method, EntryConcatMethod::Custom { .. })
        && matches!(each.concat_method, EntryConcatMethod::Custom { .. }))
    {
        each.concat_method = method;
    }
    Ok(())
}

fn set_concat_bound(source: &mut Source, key: &KeyPath, value: &str) -> Result<(), SetError> {
    let each = each_entry(source);
    if !matches!(each.concat_method, EntryConcatMethod::Custom { .. }) {
        each.concat_method = EntryConcatMethod::Custom {
            start: None,
            end: None,
        };
    }
    if let EntryConcatMethod::Custom { start, end } = &mut each.concat_method {
        let bound = if key.property.ends_with("start") {
            start
        } else {
            end
        };
        *bound = Some(value.to_string());
    }
    Ok(())
}

fn set_union_table(source: &mut Source, key: &KeyPath, value: &str) -> Result<(), SetError> {
    let SourceKind::TableUnion(union) = &mut source.kind else {
        return Err(SetError::WrongVariant);
    };
    let position = key.property_index.ok_or(SetError::Invalid {
        expected: "a table(N) key",
    })?;
    union.tables.insert(position, value.trim().to_string());
    Ok(())
}

fn set_union_tables(source: &mut Source, _: &KeyPath, value: &str) -> Result<(), SetError> {
    let SourceKind::TableUnion(union) = &mut source.kind else {
        return Err(SetError::WrongVariant);
    };
    union.tables = list(value)
        .into_iter()
        .enumerate()
        .map(|(i, table)| (i as u32 + 1, table))
        .collect();
    Ok(())
}

pub(super) fn rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "sourceType",
            &[SlotKind::Source],
            Prop::Exact("type"),
            ValueShape::NonBlank,
            None,
            Apply::SourceType,
        ),
        Rule::source("forceserialization", ValueShape::Boolean, ANY_SOURCE, |s, _, v| {
            s.force_serialization = flag(v)?;
            Ok(())
        }),
        Rule::new(
            "executeForEachEntryOf",
            &[SlotKind::Source],
            Prop::OneOf(&["executeforeachentryof", "executeforeachentryof.source"]),
            ValueShape::NonBlank,
            Some(super::Gate::Source(ANY_SOURCE)),
            Apply::Source(|s, _, v| {
                each_entry(s).source = v.trim().to_string();
                Ok(())
            }),
        ),
        Rule::source(
            "executeforeachentryof.concatmethod",
            ValueShape::NonBlank,
            ANY_SOURCE,
            set_concat_method,
        ),
        Rule::source(
            "executeforeachentryof.concatstart",
            ValueShape::Any,
            ANY_SOURCE,
            set_concat_bound,
        ),
        Rule::source(
            "executeforeachentryof.concatend",
            ValueShape::Any,
            ANY_SOURCE,
            set_concat_bound,
        ),
        Rule::source("executeforeachentryof.sleep", ValueShape::Count, ANY_SOURCE, |s, _, v| {
            each_entry(s).sleep = Some(count(v)?);
            Ok(())
        }),
        // copy
        Rule::source(
            "from",
            ValueShape::NonBlank,
            &[SourceType::Copy],
            text_field!(SourceKind::[Copy].from),
        ),
        // http
        Rule::source(
            "method",
            ValueShape::NonBlank,
            &[SourceType::Http],
            text_field!(SourceKind::[Http].method),
        ),
        Rule::source(
            "url",
            ValueShape::Any,
            &[SourceType::Http],
            text_field!(SourceKind::[Http].url),
        ),
        Rule::source(
            "path",
            ValueShape::Any,
            &[SourceType::Http],
            text_field!(SourceKind::[Http].path),
        ),
        Rule::source("header", ValueShape::Any, &[SourceType::Http], |s, _, v| match &mut s.kind {
            SourceKind::Http(http) => {
                http.header = Some(HttpPayload::from_value(v));
                Ok(())
            }
            _ => Err(SetError::WrongVariant),
        }),
        Rule::source("body", ValueShape::Any, &[SourceType::Http], |s, _, v| match &mut s.kind {
            SourceKind::Http(http) => {
                http.body = Some(HttpPayload::from_value(v));
                Ok(())
            }
            _ => Err(SetError::WrongVariant),
        }),
        Rule::source(
            "authenticationtoken",
            ValueShape::Any,
            &[SourceType::Http],
            text_field!(SourceKind::[Http].authentication_token),
        ),
        Rule::source(
            "resultcontent",
            ValueShape::NonBlank,
            &[SourceType::Http],
            text_field!(SourceKind::[Http].result_content),
        ),
        // os command
        Rule::source(
            "commandline",
            ValueShape::NonBlank,
            &[SourceType::OsCommand],
            text_field!(SourceKind::[OsCommand].command_line),
        ),
        Rule::source(
            "timeout",
            ValueShape::Count,
            &[SourceType::OsCommand],
            parsed_field!(SourceKind::[OsCommand].timeout, count),
        ),
        Rule::source("executelocally", ValueShape::Boolean, &[SourceType::OsCommand], |s, _, v| {
            match &mut s.kind {
                SourceKind::OsCommand(cmd) => {
                    cmd.execute_locally = flag(v)?;
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            }
        }),
        // text filtering, shared by os command and interactive sources
        Rule::source("exclude", ValueShape::Any, FILTERED, |s, _, v| {
            line_filter(s)?.exclude = Some(v.to_string());
            Ok(())
        }),
        Rule::source("keep", ValueShape::Any, FILTERED, |s, _, v| {
            line_filter(s)?.keep = Some(v.to_string());
            Ok(())
        }),
        Rule::source("beginatlinenumber", ValueShape::PositiveInteger, FILTERED, |s, _, v| {
            line_filter(s)?.begin_at_line_number = Some(positive(v)?);
            Ok(())
        }),
        Rule::source("endatlinenumber", ValueShape::PositiveInteger, FILTERED, |s, _, v| {
            line_filter(s)?.end_at_line_number = Some(positive(v)?);
            Ok(())
        }),
        Rule::source("separators", ValueShape::Any, FILTERED, |s, _, v| {
            line_filter(s)?.separators = Some(v.to_string());
            Ok(())
        }),
        Rule::source("selectcolumns", ValueShape::NonBlank, FILTERED, |s, _, v| {
            line_filter(s)?.select_columns = Some(v.trim().to_string());
            Ok(())
        }),
        // snmp
        Rule::source(
            "oid",
            ValueShape::NonBlank,
            &[SourceType::SnmpGet],
            text_field!(SourceKind::[SnmpGet].oid),
        ),
        Rule::source(
            "oid",
            ValueShape::NonBlank,
            &[SourceType::SnmpTable],
            text_field!(SourceKind::[SnmpTable].oid),
        ),
        Rule::source(
            "selectcolumns",
            ValueShape::NonBlank,
            &[SourceType::SnmpTable],
            text_field!(SourceKind::[SnmpTable].select_columns),
        ),
        // sql, wbem, wmi
        Rule::source(
            "query",
            ValueShape::NonBlank,
            &[SourceType::Sql],
            text_field!(SourceKind::[Sql].query),
        ),
        Rule::source(
            "database",
            ValueShape::NonBlank,
            &[SourceType::Sql],
            text_field!(SourceKind::[Sql].database),
        ),
        Rule::source(
            "query",
            ValueShape::NonBlank,
            &[SourceType::Wbem, SourceType::Wmi],
            text_field!(SourceKind::[Wbem, Wmi].query),
        ),
        Rule::source(
            "namespace",
            ValueShape::NonBlank,
            &[SourceType::Wbem, SourceType::Wmi],
            text_field!(SourceKind::[Wbem, Wmi].namespace),
        ),
        // static
        Rule::source(
            "value",
            ValueShape::Any,
            &[SourceType::Static],
            text_field!(SourceKind::[Static].value),
        ),
        // table join
        Rule::source(
            "lefttable",
            ValueShape::NonBlank,
            &[SourceType::TableJoin],
            text_field!(SourceKind::[TableJoin].left_table),
        ),
        Rule::source(
            "righttable",
            ValueShape::NonBlank,
            &[SourceType::TableJoin],
            text_field!(SourceKind::[TableJoin].right_table),
        ),
        Rule::source(
            "leftkeycolumn",
            ValueShape::PositiveInteger,
            &[SourceType::TableJoin],
            parsed_field!(SourceKind::[TableJoin].left_key_column, positive),
        ),
        Rule::source(
            "rightkeycolumn",
            ValueShape::PositiveInteger,
            &[SourceType::TableJoin],
            parsed_field!(SourceKind::[TableJoin].right_key_column, positive),
        ),
        Rule::source(
            "defaultrightline",
            ValueShape::Any,
            &[SourceType::TableJoin],
            text_field!(SourceKind::[TableJoin].default_right_line),
        ),
        Rule::source(
            "iswbemkey",
            ValueShape::Boolean,
            &[SourceType::TableJoin],
            |s, _, v| match &mut s.kind {
                SourceKind::TableJoin(join) => {
                    join.is_wbem_key = flag(v)?;
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            },
        ),
        // table union
        Rule::source("table", ValueShape::NonBlank, &[SourceType::TableUnion], set_union_table),
        Rule::source("tables", ValueShape::NonBlank, &[SourceType::TableUnion], set_union_tables),
        // interactive
        Rule::source(
            "port",
            ValueShape::PositiveInteger,
            &[SourceType::SshInteractive],
            parsed_field!(SourceKind::[SshInteractive].port, positive),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use crate::key::KeyPath;
    use crate::model::Connector;
    use crate::model::source::{EntryConcatMethod, SourceKind};
    use crate::rules::dispatch;
    use pretty_assertions::assert_eq;

    fn apply(connector: &mut Connector, key: &str, value: &str) {
        let key = KeyPath::parse(key).unwrap().unwrap();
        dispatch(connector, &key, value).unwrap();
    }

    fn source<'a>(connector: &'a Connector, key: &str) -> &'a crate::model::source::Source {
        let key = KeyPath::parse(key).unwrap().unwrap();
        crate::resolver::find_source(connector, key.source().unwrap()).unwrap()
    }

    #[test]
    fn table_union_collects_indexed_tables() {
        let mut c = Connector::new("c");
        apply(&mut c, "enclosure.discovery.source(3).type", "TableUnion");
        apply(&mut c, "enclosure.discovery.source(3).table(2)", "%Enclosure.Discovery.Source(2)%");
        apply(&mut c, "enclosure.discovery.source(3).table(1)", "%Enclosure.Discovery.Source(1)%");
        let SourceKind::TableUnion(union) = &source(&c, "enclosure.discovery.source(3).type").kind
        else {
            panic!("not a table union");
        };
        assert_eq!(union.tables.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn os_command_filter_fields() {
        let mut c = Connector::new("c");
        apply(&mut c, "disk.collect.source(1).type", "OsCommand");
        apply(&mut c, "disk.collect.source(1).CommandLine", "/usr/sbin/lsblk -P");
        apply(&mut c, "disk.collect.source(1).Keep", "^TYPE=\"disk\"");
        apply(&mut c, "disk.collect.source(1).BeginAtLineNumber", "2");
        apply(&mut c, "disk.collect.source(1).ExecuteLocally", "1");
        let SourceKind::OsCommand(cmd) = &source(&c, "disk.collect.source(1).type").kind else {
            panic!("not an os command");
        };
        assert_eq!(cmd.command_line.as_deref(), Some("/usr/sbin/lsblk -P"));
        assert_eq!(cmd.filter.begin_at_line_number, Some(2));
        assert!(cmd.execute_locally);
    }

    #[test]
    fn execute_for_each_entry_of() {
        let mut c = Connector::new("c");
        apply(&mut c, "monitors.disk.collect.sources.detail.type", "http");
        apply(
            &mut c,
            "monitors.disk.collect.sources.detail.executeForEachEntryOf.source",
            "${source::monitors.disk.discovery.sources.list}",
        );
        apply(
            &mut c,
            "monitors.disk.collect.sources.detail.executeForEachEntryOf.concatStart",
            "[",
        );
        apply(
            &mut c,
            "monitors.disk.collect.sources.detail.executeForEachEntryOf.concatMethod",
            "custom",
        );
        let detail = source(&c, "monitors.disk.collect.sources.detail.type");
        let each = detail.execute_for_each_entry_of.as_ref().unwrap();
        assert_eq!(each.source, "${source::monitors.disk.discovery.sources.list}");
        assert_eq!(
            each.concat_method,
            EntryConcatMethod::Custom {
                start: Some("[".into()),
                end: None
            }
        );
    }
}
