//! End-to-end compilation scenarios through the public API.

use connector_compiler::model::source::SourceKind;
use connector_compiler::{
    CompileError, CompiledConnector, CompilerConfig, ConnectorCompiler, ErrorKind, InputFormat,
    Phase, SourceScope, compile, extract_references,
};
use pretty_assertions::assert_eq;

fn compile_pairs(pairs: &[(&str, &str)]) -> Result<CompiledConnector, CompileError> {
    compile("Enclosure", pairs.iter().copied(), &CompilerConfig::default()).map_err(|e| e.error)
}

fn names(order: Option<&[String]>) -> Vec<&str> {
    order
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect()
}

const WBEM_UNION: [(&str, &str); 4] = [
    ("enclosure.discovery.source(1).type", "Wbem"),
    (
        "enclosure.discovery.source(1).query",
        "SELECT __PATH,Model FROM CIM_Chassis",
    ),
    ("enclosure.discovery.source(2).type", "TableUnion"),
    (
        "enclosure.discovery.source(2).table(1)",
        "$monitors.enclosure.discovery.sources.source(1)$",
    ),
];

#[test]
fn table_union_follows_its_wbem_source() {
    let compiled = compile_pairs(&WBEM_UNION).unwrap();
    let scope = SourceScope::task("enclosure", Phase::Discovery);

    let task = compiled.connector.task(&scope).unwrap();
    assert_eq!(task.sources.len(), 2);
    assert_eq!(
        names(compiled.plan.order(&scope)),
        vec!["source(1)", "source(2)"]
    );
    assert_eq!(
        compiled.plan.task("Enclosure", Phase::Discovery).unwrap().layers,
        vec![vec!["source(1)".to_string()], vec!["source(2)".to_string()]]
    );
}

#[test]
fn explicit_order_wins_over_layers() {
    let mut pairs = WBEM_UNION.to_vec();
    pairs.push(("enclosure.discovery.executionOrder", "source(2), source(1)"));
    let compiled = compile_pairs(&pairs).unwrap();
    let scope = SourceScope::task("enclosure", Phase::Discovery);
    assert_eq!(
        names(compiled.plan.order(&scope)),
        vec!["source(2)", "source(1)"]
    );
}

#[test]
fn compute_property_before_its_type_is_rejected() {
    let ordered = compile_pairs(&[
        ("enclosure.collect.source(1).type", "Static"),
        ("enclosure.collect.source(1).compute(1).type", "Add"),
        ("enclosure.collect.source(1).compute(1).column", "3"),
    ]);
    assert!(ordered.is_ok());

    let err = compile_pairs(&[
        ("enclosure.collect.source(1).type", "Static"),
        ("enclosure.collect.source(1).compute(1).column", "3"),
        ("enclosure.collect.source(1).compute(1).type", "Add"),
    ])
    .unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::MissingReferencedEntity | ErrorKind::TypeMismatch
    ));
}

#[test]
fn independent_chains_share_the_first_layer() {
    let compiled = compile_pairs(&[
        ("monitors.disk.discovery.sources.a.type", "Copy"),
        (
            "monitors.disk.discovery.sources.a.from",
            "${source::monitors.disk.discovery.sources.b}",
        ),
        ("monitors.disk.discovery.sources.b.type", "Static"),
        ("monitors.disk.discovery.sources.b.value", "1;2"),
        ("monitors.disk.discovery.sources.c.type", "Static"),
        ("monitors.disk.discovery.sources.c.value", "3;4"),
    ])
    .unwrap();
    let plan = compiled.plan.task("disk", Phase::Discovery).unwrap();
    assert_eq!(
        plan.layers,
        vec![
            vec!["b".to_string(), "c".to_string()],
            vec!["a".to_string()]
        ]
    );
    assert_eq!(plan.order, vec!["b", "c", "a"]);
}

#[test]
fn three_source_cycle_is_reported() {
    let err = compile_pairs(&[
        ("monitors.fan.collect.sources.a.type", "Copy"),
        ("monitors.fan.collect.sources.a.from", "$monitors.fan.collect.sources.b$"),
        ("monitors.fan.collect.sources.b.type", "Copy"),
        ("monitors.fan.collect.sources.b.from", "$monitors.fan.collect.sources.c$"),
        ("monitors.fan.collect.sources.c.type", "Copy"),
        ("monitors.fan.collect.sources.c.from", "$monitors.fan.collect.sources.a$"),
    ])
    .unwrap_err();
    let CompileError::CyclicSourceDependency { scope, sources } = err else {
        panic!("expected a cycle, got {err}");
    };
    assert_eq!(scope, "monitors.fan.collect");
    for name in ["a", "b", "c"] {
        assert!(sources.iter().any(|s| s == name), "{name} missing from {sources:?}");
    }
}

#[test]
fn repeated_assignments_resolve_to_one_entity() {
    let mut compiler = ConnectorCompiler::new("Disk", CompilerConfig::default());
    for _ in 0..2 {
        compiler.apply("disk.collect.source(1).type", "OsCommand").unwrap();
        compiler
            .apply("disk.collect.source(1).commandLine", "lsblk -l")
            .unwrap();
    }
    let scope = SourceScope::task("disk", Phase::Collect);
    assert_eq!(compiler.connector().task(&scope).unwrap().sources.len(), 1);

    let err = compiler
        .apply("disk.collect.source(1).type", "Static")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingType);
}

#[test]
fn row_placeholders_are_not_source_references() {
    let refs = extract_references(
        "http://$entry.column(1)$/$monitors.cpu.discovery.sources.source1$",
    );
    let keys: Vec<String> = refs.iter().map(|r| r.key()).collect();
    assert_eq!(keys, vec!["monitors.cpu.discovery.sources.source1"]);
}

#[test]
fn flat_text_compiles_end_to_end() {
    let text = r#"
#define IPMITOOL /usr/bin/ipmitool
hdf.DisplayName = "IPMI Fans"
hdf.AppliesToOs = "Linux"

EmbeddedFile(1):
BEGIN { FS = ";" }
{ print $1 ";" $3 }
EmbeddedFile(1).End

fan.discovery.source(1).type = "OsCommand"
fan.discovery.source(1).commandLine = "IPMITOOL sdr type Fan"
fan.discovery.source(1).compute(1).type = "Awk"
fan.discovery.source(1).compute(1).script = EmbeddedFile(1)
fan.discovery.instanceTable = "source(1)"
"#;
    let assignments = InputFormat::Flat.read(text).unwrap();
    let compiled = compile("IpmiFans", assignments, &CompilerConfig::strict()).unwrap();
    assert!(compiled.problems.is_empty());
    assert_eq!(compiled.connector.constants["IPMITOOL"], "/usr/bin/ipmitool");

    let scope = SourceScope::task("fan", Phase::Discovery);
    let source = compiled.connector.source(&scope, "source(1)").unwrap();
    let SourceKind::OsCommand(command) = &source.kind else {
        panic!("expected an OS command source");
    };
    assert_eq!(
        command.command_line.as_deref(),
        Some("/usr/bin/ipmitool sdr type Fan")
    );
    assert_eq!(source.computes.len(), 1);
}

#[test]
fn yaml_and_flat_inputs_agree() {
    let yaml = r#"
connector:
  displayName: Disks
pre:
  lsblk:
    type: osCommand
    commandLine: lsblk -l
monitors:
  disk:
    discovery:
      sources:
        parsed:
          type: copy
          from: ${source::pre.lsblk}
          computes:
            - type: keepColumns
              columnNumbers: 1,2
      executionOrder: [parsed]
"#;
    let flat = r#"
hdf.DisplayName = Disks
pre.lsblk.type = osCommand
pre.lsblk.commandLine = lsblk -l
monitors.disk.discovery.sources.parsed.type = copy
monitors.disk.discovery.sources.parsed.from = ${source::pre.lsblk}
monitors.disk.discovery.sources.parsed.compute(1).type = keepColumns
monitors.disk.discovery.sources.parsed.compute(1).columnNumbers = 1,2
monitors.disk.discovery.executionOrder = parsed
"#;
    let config = CompilerConfig::strict();
    let from_yaml = compile("Disks", InputFormat::Yaml.read(yaml).unwrap(), &config).unwrap();
    let from_flat = compile("Disks", InputFormat::Flat.read(flat).unwrap(), &config).unwrap();
    assert_eq!(*from_yaml.connector, *from_flat.connector);
    assert_eq!(*from_yaml.plan, *from_flat.plan);
    assert_eq!(from_yaml.plan.pre.order, vec!["lsblk"]);
}

#[test]
fn extended_connectors_inherit_pre_sources_and_constants_apply() {
    let parent = compile(
        "Parent",
        [
            ("pre.lsblk.type", "OsCommand"),
            ("pre.lsblk.commandLine", "${constant::TOOL} --list"),
        ],
        &CompilerConfig::default(),
    )
    .unwrap();

    let mut child = ConnectorCompiler::new("Child", CompilerConfig::default());
    child
        .apply_all([
            ("constants.TOOL", "/usr/local/bin/lsblk"),
            ("disk.collect.source(1).type", "Copy"),
            ("disk.collect.source(1).from", "${source::pre.lsblk}"),
        ])
        .unwrap();
    child.extend_from(&parent.connector);
    let compiled = child.finish().unwrap();

    let inherited = compiled.connector.source(&SourceScope::Pre, "lsblk").unwrap();
    assert_eq!(inherited.index, 1);
    assert_eq!(inherited.key, "pre.lsblk");
    let SourceKind::OsCommand(command) = &inherited.kind else {
        panic!("expected an OS command source");
    };
    assert_eq!(command.command_line.as_deref(), Some("/usr/local/bin/lsblk --list"));

    // The parent is untouched.
    let original = parent.connector.source(&SourceScope::Pre, "lsblk").unwrap();
    let SourceKind::OsCommand(command) = &original.kind else {
        panic!("expected an OS command source");
    };
    assert_eq!(command.command_line.as_deref(), Some("${constant::TOOL} --list"));
    assert_eq!(compiled.plan.pre.order, vec!["lsblk"]);
}
