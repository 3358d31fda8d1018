//! Detection criteria and the interactive steps nested under them.

use crate::model::resource::{EmbeddedResource, Rewrite};
use crate::model::source::rewrite_opt;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriterionType {
    DeviceType,
    Http,
    Ipmi,
    OsCommand,
    Process,
    ProductRequirements,
    Service,
    SnmpGet,
    SnmpGetNext,
    Sql,
    Wbem,
    Wmi,
    SshInteractive,
}

impl CriterionType {
    pub const ALL: [CriterionType; 13] = [
        CriterionType::DeviceType,
        CriterionType::Http,
        CriterionType::Ipmi,
        CriterionType::OsCommand,
        CriterionType::Process,
        CriterionType::ProductRequirements,
        CriterionType::Service,
        CriterionType::SnmpGet,
        CriterionType::SnmpGetNext,
        CriterionType::Sql,
        CriterionType::Wbem,
        CriterionType::Wmi,
        CriterionType::SshInteractive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CriterionType::DeviceType => "deviceType",
            CriterionType::Http => "http",
            CriterionType::Ipmi => "ipmi",
            CriterionType::OsCommand => "osCommand",
            CriterionType::Process => "process",
            CriterionType::ProductRequirements => "productRequirements",
            CriterionType::Service => "service",
            CriterionType::SnmpGet => "snmpGet",
            CriterionType::SnmpGetNext => "snmpGetNext",
            CriterionType::Sql => "sql",
            CriterionType::Wbem => "wbem",
            CriterionType::Wmi => "wmi",
            CriterionType::SshInteractive => "sshInteractive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase();
        let ty = match normalized.as_str() {
            "os" | "devicetype" => CriterionType::DeviceType,
            "kmversion" | "productrequirements" => CriterionType::ProductRequirements,
            "oscommand" | "commandline" => CriterionType::OsCommand,
            "telnetinteractive" | "sshinteractive" => CriterionType::SshInteractive,
            other => {
                return Self::ALL
                    .into_iter()
                    .find(|ty| ty.name().eq_ignore_ascii_case(other));
            }
        };
        Some(ty)
    }
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The protocol-independent part every criterion carries: what to run, and
/// what the result must look like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionProbe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub execute_locally: bool,
}

impl CriterionProbe {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        for field in [
            &mut self.command_line,
            &mut self.query,
            &mut self.namespace,
            &mut self.oid,
            &mut self.url,
            &mut self.method,
            &mut self.expected_result,
            &mut self.error_message,
        ] {
            rewrite_opt(field, rewrite);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeCriterion {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keep_only: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequirementsCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub km_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveCriterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CriterionKind {
    DeviceType(DeviceTypeCriterion),
    Http(CriterionProbe),
    Ipmi(CriterionProbe),
    OsCommand(CriterionProbe),
    Process(ProcessCriterion),
    ProductRequirements(ProductRequirementsCriterion),
    Service(ServiceCriterion),
    SnmpGet(CriterionProbe),
    SnmpGetNext(CriterionProbe),
    Sql(CriterionProbe),
    Wbem(CriterionProbe),
    Wmi(CriterionProbe),
    SshInteractive(InteractiveCriterion),
}

impl CriterionKind {
    pub fn new(ty: CriterionType) -> Self {
        let probe = CriterionProbe::default();
        match ty {
            CriterionType::DeviceType => CriterionKind::DeviceType(Default::default()),
            CriterionType::Http => CriterionKind::Http(probe),
            CriterionType::Ipmi => CriterionKind::Ipmi(probe),
            CriterionType::OsCommand => CriterionKind::OsCommand(probe),
            CriterionType::Process => CriterionKind::Process(Default::default()),
            CriterionType::ProductRequirements => {
                CriterionKind::ProductRequirements(Default::default())
            }
            CriterionType::Service => CriterionKind::Service(Default::default()),
            CriterionType::SnmpGet => CriterionKind::SnmpGet(probe),
            CriterionType::SnmpGetNext => CriterionKind::SnmpGetNext(probe),
            CriterionType::Sql => CriterionKind::Sql(probe),
            CriterionType::Wbem => CriterionKind::Wbem(probe),
            CriterionType::Wmi => CriterionKind::Wmi(probe),
            CriterionType::SshInteractive => CriterionKind::SshInteractive(Default::default()),
        }
    }

    pub fn criterion_type(&self) -> CriterionType {
        match self {
            CriterionKind::DeviceType(_) => CriterionType::DeviceType,
            CriterionKind::Http(_) => CriterionType::Http,
            CriterionKind::Ipmi(_) => CriterionType::Ipmi,
            CriterionKind::OsCommand(_) => CriterionType::OsCommand,
            CriterionKind::Process(_) => CriterionType::Process,
            CriterionKind::ProductRequirements(_) => CriterionType::ProductRequirements,
            CriterionKind::Service(_) => CriterionType::Service,
            CriterionKind::SnmpGet(_) => CriterionType::SnmpGet,
            CriterionKind::SnmpGetNext(_) => CriterionType::SnmpGetNext,
            CriterionKind::Sql(_) => CriterionType::Sql,
            CriterionKind::Wbem(_) => CriterionType::Wbem,
            CriterionKind::Wmi(_) => CriterionType::Wmi,
            CriterionKind::SshInteractive(_) => CriterionType::SshInteractive,
        }
    }

    /// Shared probe fields, for the protocol variants that have them.
    pub fn probe_mut(&mut self) -> Option<&mut CriterionProbe> {
        match self {
            CriterionKind::Http(p)
            | CriterionKind::Ipmi(p)
            | CriterionKind::OsCommand(p)
            | CriterionKind::SnmpGet(p)
            | CriterionKind::SnmpGetNext(p)
            | CriterionKind::Sql(p)
            | CriterionKind::Wbem(p)
            | CriterionKind::Wmi(p) => Some(p),
            _ => None,
        }
    }

    pub fn probe(&self) -> Option<&CriterionProbe> {
        match self {
            CriterionKind::Http(p)
            | CriterionKind::Ipmi(p)
            | CriterionKind::OsCommand(p)
            | CriterionKind::SnmpGet(p)
            | CriterionKind::SnmpGetNext(p)
            | CriterionKind::Sql(p)
            | CriterionKind::Wbem(p)
            | CriterionKind::Wmi(p) => Some(p),
            _ => None,
        }
    }
}

/// One detection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub index: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_serialization: bool,
    #[serde(flatten)]
    pub kind: CriterionKind,
}

impl Criterion {
    pub fn new(index: u32, ty: CriterionType) -> Self {
        Self {
            index,
            force_serialization: false,
            kind: CriterionKind::new(ty),
        }
    }

    pub fn criterion_type(&self) -> CriterionType {
        self.kind.criterion_type()
    }

    pub fn steps(&self) -> Option<&[Step]> {
        match &self.kind {
            CriterionKind::SshInteractive(c) => Some(&c.steps),
            _ => None,
        }
    }

    pub(crate) fn steps_mut(&mut self) -> Option<&mut Vec<Step>> {
        match &mut self.kind {
            CriterionKind::SshInteractive(c) => Some(&mut c.steps),
            _ => None,
        }
    }

    /// Text fields that may embed an `EmbeddedFile(N)` token.
    pub fn embedded_file_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = Vec::new();
        if let Some(probe) = self.kind.probe() {
            if let Some(v) = probe.command_line.as_deref() {
                fields.push(("commandLine", v));
            }
            if let Some(v) = probe.query.as_deref() {
                fields.push(("query", v));
            }
        }
        fields
    }
}

impl EmbeddedResource for Criterion {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        match &mut self.kind {
            CriterionKind::DeviceType(c) => {
                for os in c.keep_only.iter_mut().chain(c.exclude.iter_mut()) {
                    *os = rewrite(os);
                }
            }
            CriterionKind::Process(c) => rewrite_opt(&mut c.command_line, rewrite),
            CriterionKind::ProductRequirements(c) => {
                rewrite_opt(&mut c.engine_version, rewrite);
                rewrite_opt(&mut c.km_version, rewrite);
            }
            CriterionKind::Service(c) => rewrite_opt(&mut c.name, rewrite),
            CriterionKind::SshInteractive(c) => {
                rewrite_opt(&mut c.expected_result, rewrite);
                for step in &mut c.steps {
                    step.update(rewrite);
                }
            }
            other => {
                if let Some(probe) = other.probe_mut() {
                    probe.update(rewrite);
                }
            }
        }
    }

    fn description(&self) -> String {
        format!("criteria({}) ({})", self.index, self.criterion_type())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepType {
    GetAvailable,
    GetUntilPrompt,
    SendPassword,
    SendText,
    SendUsername,
    Sleep,
    WaitFor,
    WaitForPrompt,
}

impl StepType {
    pub const ALL: [StepType; 8] = [
        StepType::GetAvailable,
        StepType::GetUntilPrompt,
        StepType::SendPassword,
        StepType::SendText,
        StepType::SendUsername,
        StepType::Sleep,
        StepType::WaitFor,
        StepType::WaitForPrompt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StepType::GetAvailable => "getAvailable",
            StepType::GetUntilPrompt => "getUntilPrompt",
            StepType::SendPassword => "sendPassword",
            StepType::SendText => "sendText",
            StepType::SendUsername => "sendUsername",
            StepType::Sleep => "sleep",
            StepType::WaitFor => "waitFor",
            StepType::WaitForPrompt => "waitForPrompt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim();
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Step fields. Which ones are meaningful depends on the step type; the
/// field rules gate on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub index: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub capture: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub telnet_only: bool,
    #[serde(flatten)]
    pub fields: StepFields,
}

impl Step {
    pub fn new(index: u32, step_type: StepType) -> Self {
        Self {
            index,
            step_type,
            capture: false,
            telnet_only: false,
            fields: StepFields::default(),
        }
    }
}

impl EmbeddedResource for Step {
    fn update(&mut self, rewrite: Rewrite<'_>) {
        rewrite_opt(&mut self.fields.text, rewrite);
    }

    fn description(&self) -> String {
        format!("step({}) ({})", self.index, self.step_type)
    }
}

/// Insert keeping the steps sorted by index.
pub(crate) fn insert_step(steps: &mut Vec<Step>, step: Step) -> &mut Step {
    let position = steps
        .iter()
        .position(|s| s.index > step.index)
        .unwrap_or(steps.len());
    steps.insert(position, step);
    &mut steps[position]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn criterion_aliases() {
        assert_eq!(CriterionType::parse("OS"), Some(CriterionType::DeviceType));
        assert_eq!(
            CriterionType::parse("KMVersion"),
            Some(CriterionType::ProductRequirements)
        );
        assert_eq!(CriterionType::parse("SNMPGetNext"), Some(CriterionType::SnmpGetNext));
        assert_eq!(CriterionType::parse("bogus"), None);
    }

    #[test]
    fn steps_stay_sorted() {
        let mut criterion = Criterion::new(1, CriterionType::SshInteractive);
        let steps = criterion.steps_mut().unwrap();
        insert_step(steps, Step::new(2, StepType::SendText));
        insert_step(steps, Step::new(1, StepType::WaitForPrompt));
        let order: Vec<u32> = criterion.steps().unwrap().iter().map(|s| s.index).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn probe_only_for_protocol_criteria() {
        assert!(CriterionKind::new(CriterionType::Wbem).probe().is_some());
        assert!(CriterionKind::new(CriterionType::Service).probe().is_none());
    }

    #[test]
    fn update_reaches_nested_steps() {
        let mut criterion = Criterion::new(1, CriterionType::SshInteractive);
        let mut step = Step::new(1, StepType::SendText);
        step.fields.text = Some("${constant::CMD}".into());
        criterion.steps_mut().unwrap().push(step);
        criterion.update(&|s| s.replace("${constant::CMD}", "show version"));
        assert_eq!(
            criterion.steps().unwrap()[0].fields.text.as_deref(),
            Some("show version")
        );
    }
}
