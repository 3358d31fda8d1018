//! Detection criterion rules and interactive step rules.

use super::{Apply, Gate, Prop, Rule, SetError, ValueShape, count, flag, list, positive};
use crate::key::{KeyPath, SlotKind};
use crate::model::detection::{Criterion, CriterionKind, CriterionProbe, CriterionType, StepType};

const PROBES: &[CriterionType] = &[
    CriterionType::Http,
    CriterionType::Ipmi,
    CriterionType::OsCommand,
    CriterionType::SnmpGet,
    CriterionType::SnmpGetNext,
    CriterionType::Sql,
    CriterionType::Wbem,
    CriterionType::Wmi,
];

const PROBES_AND_PROCESS: &[CriterionType] = &[
    CriterionType::Http,
    CriterionType::Ipmi,
    CriterionType::OsCommand,
    CriterionType::Process,
    CriterionType::SnmpGet,
    CriterionType::SnmpGetNext,
    CriterionType::Sql,
    CriterionType::Wbem,
    CriterionType::Wmi,
];

const WITH_EXPECTED_RESULT: &[CriterionType] = &[
    CriterionType::Http,
    CriterionType::Ipmi,
    CriterionType::OsCommand,
    CriterionType::SnmpGet,
    CriterionType::SnmpGetNext,
    CriterionType::Sql,
    CriterionType::Wbem,
    CriterionType::Wmi,
    CriterionType::SshInteractive,
];

const STEP_SLOTS: &[SlotKind] = &[SlotKind::CriterionStep, SlotKind::SourceStep];

fn probe(criterion: &mut Criterion) -> Result<&mut CriterionProbe, SetError> {
    criterion.kind.probe_mut().ok_or(SetError::WrongVariant)
}

/// Setter writing `Some(text)` into one probe field.
macro_rules! probe_field {
    ($field:ident) => {
        |criterion, _key, value| {
            probe(criterion)?.$field = Some(value.to_string());
            Ok(())
        }
    };
}

fn set_expected_result(
    criterion: &mut Criterion,
    _: &KeyPath,
    value: &str,
) -> Result<(), SetError> {
    match &mut criterion.kind {
        CriterionKind::SshInteractive(c) => c.expected_result = Some(value.to_string()),
        other => {
            other.probe_mut().ok_or(SetError::WrongVariant)?.expected_result =
                Some(value.to_string())
        }
    }
    Ok(())
}

fn set_command_line(criterion: &mut Criterion, _: &KeyPath, value: &str) -> Result<(), SetError> {
    match &mut criterion.kind {
        CriterionKind::Process(c) => c.command_line = Some(value.to_string()),
        other => {
            other.probe_mut().ok_or(SetError::WrongVariant)?.command_line =
                Some(value.to_string())
        }
    }
    Ok(())
}

fn step(
    name: &'static str,
    shape: ValueShape,
    types: &'static [StepType],
    set: super::StepSetter,
) -> Rule {
    Rule::new(
        name,
        STEP_SLOTS,
        Prop::Exact(name),
        shape,
        Some(Gate::Step(types)),
        Apply::Step(set),
    )
}

pub(super) fn rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "criterionType",
            &[SlotKind::Criterion],
            Prop::Exact("type"),
            ValueShape::NonBlank,
            None,
            Apply::CriterionType,
        ),
        Rule::criterion(
            "forceserialization",
            ValueShape::Boolean,
            &CriterionType::ALL,
            |c, _, v| {
                c.force_serialization = flag(v)?;
                Ok(())
            },
        ),
        Rule::criterion("commandline", ValueShape::NonBlank, PROBES_AND_PROCESS, set_command_line),
        Rule::criterion("query", ValueShape::NonBlank, PROBES, probe_field!(query)),
        Rule::criterion("namespace", ValueShape::NonBlank, PROBES, probe_field!(namespace)),
        Rule::criterion("oid", ValueShape::NonBlank, PROBES, probe_field!(oid)),
        Rule::criterion("url", ValueShape::Any, PROBES, probe_field!(url)),
        Rule::criterion("method", ValueShape::NonBlank, PROBES, probe_field!(method)),
        Rule::criterion(
            "expectedresult",
            ValueShape::Any,
            WITH_EXPECTED_RESULT,
            set_expected_result,
        ),
        Rule::criterion("errormessage", ValueShape::Any, PROBES, probe_field!(error_message)),
        Rule::criterion("timeout", ValueShape::Count, PROBES, |c, _, v| {
            probe(c)?.timeout = Some(count(v)?);
            Ok(())
        }),
        Rule::criterion("executelocally", ValueShape::Boolean, PROBES, |c, _, v| {
            probe(c)?.execute_locally = flag(v)?;
            Ok(())
        }),
        Rule::criterion(
            "keeponly",
            ValueShape::Any,
            &[CriterionType::DeviceType],
            |c, _, v| match &mut c.kind {
                CriterionKind::DeviceType(d) => {
                    d.keep_only = list(v);
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            },
        ),
        Rule::criterion(
            "exclude",
            ValueShape::Any,
            &[CriterionType::DeviceType],
            |c, _, v| match &mut c.kind {
                CriterionKind::DeviceType(d) => {
                    d.exclude = list(v);
                    Ok(())
                }
                _ => Err(SetError::WrongVariant),
            },
        ),
        Rule::criterion(
            "engineversion",
            ValueShape::NonBlank,
            &[CriterionType::ProductRequirements],
            text_field!(CriterionKind::[ProductRequirements].engine_version),
        ),
        Rule::criterion(
            "kmversion",
            ValueShape::NonBlank,
            &[CriterionType::ProductRequirements],
            text_field!(CriterionKind::[ProductRequirements].km_version),
        ),
        Rule::criterion(
            "name",
            ValueShape::NonBlank,
            &[CriterionType::Service],
            text_field!(CriterionKind::[Service].name),
        ),
        Rule::criterion(
            "port",
            ValueShape::PositiveInteger,
            &[CriterionType::SshInteractive],
            parsed_field!(CriterionKind::[SshInteractive].port, positive),
        ),
        Rule::new(
            "stepType",
            STEP_SLOTS,
            Prop::Exact("type"),
            ValueShape::NonBlank,
            None,
            Apply::StepType,
        ),
        step("capture", ValueShape::Boolean, &StepType::ALL, |s, _, v| {
            s.capture = flag(v)?;
            Ok(())
        }),
        step("telnetonly", ValueShape::Boolean, &StepType::ALL, |s, _, v| {
            s.telnet_only = flag(v)?;
            Ok(())
        }),
        step(
            "text",
            ValueShape::Any,
            &[StepType::SendText, StepType::WaitFor],
            |s, _, v| {
                s.fields.text = Some(v.to_string());
                Ok(())
            },
        ),
        step("duration", ValueShape::PositiveInteger, &[StepType::Sleep], |s, _, v| {
            s.fields.duration = Some(u64::from(positive(v)?));
            Ok(())
        }),
        step(
            "timeout",
            ValueShape::Count,
            &[
                StepType::GetAvailable,
                StepType::GetUntilPrompt,
                StepType::WaitFor,
                StepType::WaitForPrompt,
            ],
            |s, _, v| {
                s.fields.timeout = Some(count(v)?);
                Ok(())
            },
        ),
    ]
}
