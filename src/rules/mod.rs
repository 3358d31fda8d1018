//! Property rules.
//!
//! Each rule names the key shape it accepts (slot kind + property), the value
//! shape it expects, the entity variants it may write to, and the setter that
//! writes exactly one field. The table is built once and never mutated.
//!
//! Dispatch applies the first rule whose key shape and gate both match. When
//! the key shape matches some rules but no gate admits the entity, the error
//! says why: the entity is missing (`MissingReferencedEntity`) or has another
//! variant (`TypeMismatch`).

/// Setter writing `Some(text)` into a field of one or more same-typed
/// variants.
macro_rules! text_field {
    ($kind:ident :: [$($variant:ident),+] . $field:ident) => {
        |entity, _key, value| match &mut entity.kind {
            $($kind::$variant(inner))|+ => {
                inner.$field = Some(value.to_string());
                Ok(())
            }
            _ => Err(SetError::WrongVariant),
        }
    };
}

/// Setter parsing the value with `$parse` before storing it.
macro_rules! parsed_field {
    ($kind:ident :: [$($variant:ident),+] . $field:ident, $parse:path) => {
        |entity, _key, value| match &mut entity.kind {
            $($kind::$variant(inner))|+ => {
                inner.$field = Some($parse(value)?);
                Ok(())
            }
            _ => Err(SetError::WrongVariant),
        }
    };
}

mod compute;
mod connector;
mod detection;
mod source;

use crate::error::CompileError;
use crate::key::{KeyPath, Slot, SlotKind};
use crate::model::compute::{Compute, ComputeType};
use crate::model::detection::{Criterion, CriterionType, Step, StepType};
use crate::model::source::{Source, SourceType};
use crate::model::{Connector, Phase, Task};
use crate::resolver::{self, EntityType};
use once_cell::sync::Lazy;
use tracing::debug;

/// Why a setter refused a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetError {
    /// The entity does not have the variant the setter writes to.
    WrongVariant,
    Invalid { expected: &'static str },
}

pub type ConnectorSetter = fn(&mut Connector, &KeyPath, &str) -> Result<(), SetError>;
pub type TaskSetter = fn(&mut Task, &KeyPath, &str) -> Result<(), SetError>;
pub type SourceSetter = fn(&mut Source, &KeyPath, &str) -> Result<(), SetError>;
pub type ComputeSetter = fn(&mut Compute, &KeyPath, &str) -> Result<(), SetError>;
pub type CriterionSetter = fn(&mut Criterion, &KeyPath, &str) -> Result<(), SetError>;
pub type StepSetter = fn(&mut Step, &KeyPath, &str) -> Result<(), SetError>;

/// Property part of a key shape.
#[derive(Debug, Clone, Copy)]
pub enum Prop {
    /// Exactly this property. `""` matches keys addressing the slot itself.
    Exact(&'static str),
    /// Any of these spellings.
    OneOf(&'static [&'static str]),
    /// `prefix.<anything>`.
    Prefix(&'static str),
    /// Any non-empty property.
    Any,
}

impl Prop {
    fn matches(&self, property: &str) -> bool {
        match self {
            Prop::Exact(p) => *p == property,
            Prop::OneOf(ps) => ps.contains(&property),
            Prop::Prefix(prefix) => property
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('.')),
            Prop::Any => !property.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Any,
    NonBlank,
    PositiveInteger,
    /// Zero or more.
    Count,
    Boolean,
}

impl ValueShape {
    fn admits(self, value: &str) -> bool {
        let value = value.trim();
        match self {
            ValueShape::Any => true,
            ValueShape::NonBlank => !value.is_empty(),
            ValueShape::PositiveInteger => value.parse::<u32>().is_ok_and(|n| n > 0),
            ValueShape::Count => value.parse::<u64>().is_ok(),
            ValueShape::Boolean => parse_bool(value).is_some(),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ValueShape::Any => "any value",
            ValueShape::NonBlank => "a non-blank value",
            ValueShape::PositiveInteger => "a positive integer",
            ValueShape::Count => "a non-negative integer",
            ValueShape::Boolean => "a boolean",
        }
    }
}

/// Variants a rule may write to.
#[derive(Debug, Clone, Copy)]
pub enum Gate {
    Source(&'static [SourceType]),
    Compute(&'static [ComputeType]),
    Criterion(&'static [CriterionType]),
    Step(&'static [StepType]),
    /// Task keys valid in one phase only.
    Phase(Phase),
}

impl Gate {
    fn admits(&self, entity: EntityType) -> bool {
        match (self, entity) {
            (Gate::Source(types), EntityType::Source(ty)) => types.contains(&ty),
            (Gate::Compute(types), EntityType::Compute(ty)) => types.contains(&ty),
            (Gate::Criterion(types), EntityType::Criterion(ty)) => types.contains(&ty),
            (Gate::Step(types), EntityType::Step(ty)) => types.contains(&ty),
            _ => false,
        }
    }

    fn describe(&self) -> String {
        fn names<T: std::fmt::Display>(types: &[T]) -> String {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|")
        }
        match self {
            Gate::Source(types) => names(types),
            Gate::Compute(types) => names(types),
            Gate::Criterion(types) => names(types),
            Gate::Step(types) => names(types),
            Gate::Phase(phase) => phase.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Apply {
    Connector(ConnectorSetter),
    Task(TaskSetter),
    SourceType,
    ComputeType,
    CriterionType,
    StepType,
    Source(SourceSetter),
    Compute(ComputeSetter),
    Criterion(CriterionSetter),
    Step(StepSetter),
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub slots: &'static [SlotKind],
    pub prop: Prop,
    pub shape: ValueShape,
    pub gate: Option<Gate>,
    pub apply: Apply,
}

impl Rule {
    pub const fn new(
        name: &'static str,
        slots: &'static [SlotKind],
        prop: Prop,
        shape: ValueShape,
        gate: Option<Gate>,
        apply: Apply,
    ) -> Self {
        Self {
            name,
            slots,
            prop,
            shape,
            gate,
            apply,
        }
    }

    pub const fn source(
        prop: &'static str,
        shape: ValueShape,
        types: &'static [SourceType],
        setter: SourceSetter,
    ) -> Self {
        Self::new(
            prop,
            &[SlotKind::Source],
            Prop::Exact(prop),
            shape,
            Some(Gate::Source(types)),
            Apply::Source(setter),
        )
    }

    pub const fn compute(
        prop: &'static str,
        shape: ValueShape,
        types: &'static [ComputeType],
        setter: ComputeSetter,
    ) -> Self {
        Self::new(
            prop,
            &[SlotKind::Compute],
            Prop::Exact(prop),
            shape,
            Some(Gate::Compute(types)),
            Apply::Compute(setter),
        )
    }

    pub const fn criterion(
        prop: &'static str,
        shape: ValueShape,
        types: &'static [CriterionType],
        setter: CriterionSetter,
    ) -> Self {
        Self::new(
            prop,
            &[SlotKind::Criterion],
            Prop::Exact(prop),
            shape,
            Some(Gate::Criterion(types)),
            Apply::Criterion(setter),
        )
    }

    /// Key shape match, ignoring entity state.
    fn matches_key(&self, key: &KeyPath) -> bool {
        if !self.slots.contains(&key.slot_kind()) || !self.prop.matches(&key.property) {
            return false;
        }
        match (self.gate, &key.slot) {
            (Some(Gate::Phase(phase)), Slot::Task(scope)) => {
                matches!(scope, crate::model::SourceScope::Task { phase: p, .. } if *p == phase)
            }
            (Some(Gate::Phase(_)), _) => false,
            _ => true,
        }
    }

    /// True when this rule would apply to `key` in the current graph: the
    /// key shape matches and, for gated rules, the addressed entity already
    /// carries one of the admitted variants.
    pub fn detect(&self, key: &KeyPath, connector: &Connector) -> bool {
        if !self.matches_key(key) {
            return false;
        }
        match self.gate {
            None | Some(Gate::Phase(_)) => true,
            Some(gate) => {
                resolver::entity_type(connector, &key.slot).is_some_and(|ty| gate.admits(ty))
            }
        }
    }

    /// Write `value` through this rule.
    pub fn apply(
        &self,
        connector: &mut Connector,
        key: &KeyPath,
        value: &str,
    ) -> Result<(), CompileError> {
        if !self.detect(key, connector) {
            return Err(mismatch(connector, key, std::slice::from_ref(self)));
        }
        if !self.shape.admits(value) {
            return Err(invalid(key, value, self.shape.expected()));
        }
        let outcome = match self.apply {
            Apply::Connector(set) => set(connector, key, value),
            Apply::Task(set) => {
                let Some(scope) = key.scope() else {
                    return Err(mismatch(connector, key, std::slice::from_ref(self)));
                };
                let task = resolver::ensure_task(connector, scope, key.monitor.as_deref());
                set(task, key, value)
            }
            Apply::SourceType => return instantiate(connector, key, value),
            Apply::ComputeType => return instantiate(connector, key, value),
            Apply::CriterionType => return instantiate(connector, key, value),
            Apply::StepType => return instantiate(connector, key, value),
            Apply::Source(set) => match &key.slot {
                Slot::Source(addr) => match resolver::source_mut(connector, addr) {
                    Some(source) => set(source, key, value),
                    None => return Err(missing(key)),
                },
                _ => return Err(missing(key)),
            },
            Apply::Compute(set) => match &key.slot {
                Slot::Compute { source, index } => {
                    match resolver::compute_mut(connector, source, *index) {
                        Some(compute) => set(compute, key, value),
                        None => return Err(missing(key)),
                    }
                }
                _ => return Err(missing(key)),
            },
            Apply::Criterion(set) => match &key.slot {
                Slot::Criterion { index } => match resolver::criterion_mut(connector, *index) {
                    Some(criterion) => set(criterion, key, value),
                    None => return Err(missing(key)),
                },
                _ => return Err(missing(key)),
            },
            Apply::Step(set) => match resolver::step_mut(connector, &key.slot) {
                Some(step) => set(step, key, value),
                None => return Err(missing(key)),
            },
        };
        outcome.map_err(|err| match err {
            SetError::Invalid { expected } => invalid(key, value, expected),
            SetError::WrongVariant => mismatch(connector, key, std::slice::from_ref(self)),
        })
    }
}

/// The rule table, in dispatch order.
pub static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let mut rules = Vec::new();
    rules.extend(connector::rules());
    rules.extend(source::rules());
    rules.extend(compute::rules());
    rules.extend(detection::rules());
    rules.extend(connector::fallback_rules());
    rules
});

/// Apply `value` to the first matching rule and return its name.
pub fn dispatch(
    connector: &mut Connector,
    key: &KeyPath,
    value: &str,
) -> Result<&'static str, CompileError> {
    let rules: &'static [Rule] = RULES.as_slice();
    let candidates: Vec<&'static Rule> = rules.iter().filter(|r| r.matches_key(key)).collect();
    if candidates.is_empty() {
        return Err(CompileError::UnrecognizedKey {
            key: key.raw.clone(),
            value: value.to_string(),
        });
    }
    let Some(rule) = candidates.iter().find(|r| r.detect(key, connector)) else {
        let gated: Vec<Rule> = candidates.iter().map(|r| **r).collect();
        return Err(mismatch(connector, key, &gated));
    };
    rule.apply(connector, key, value)?;
    debug!(key = %key, rule = rule.name, "applied");
    Ok(rule.name)
}

fn instantiate(connector: &mut Connector, key: &KeyPath, value: &str) -> Result<(), CompileError> {
    match &key.slot {
        Slot::Source(addr) => {
            let ty = SourceType::parse(value).ok_or_else(|| invalid(key, value, "a source type"))?;
            resolver::instantiate_source(connector, key, addr, ty).map(|_| ())
        }
        Slot::Compute { source, index } => {
            let ty =
                ComputeType::parse(value).ok_or_else(|| invalid(key, value, "a compute type"))?;
            resolver::instantiate_compute(connector, key, source, *index, ty).map(|_| ())
        }
        Slot::Criterion { index } => {
            let ty = CriterionType::parse(value)
                .ok_or_else(|| invalid(key, value, "a criterion type"))?;
            resolver::instantiate_criterion(connector, key, *index, ty).map(|_| ())
        }
        Slot::CriterionStep { .. } | Slot::SourceStep { .. } => {
            let ty = StepType::parse(value).ok_or_else(|| invalid(key, value, "a step type"))?;
            resolver::instantiate_step(connector, key, ty).map(|_| ())
        }
        _ => Err(missing(key)),
    }
}

fn missing(key: &KeyPath) -> CompileError {
    CompileError::MissingReferencedEntity {
        entity: key.slot.entity(),
        referrer: key.raw.clone(),
    }
}

fn invalid(key: &KeyPath, value: &str, expected: &str) -> CompileError {
    CompileError::InvalidValue {
        key: key.raw.clone(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

/// The key shape matched `rules` but none admits the entity.
fn mismatch(connector: &Connector, key: &KeyPath, rules: &[Rule]) -> CompileError {
    match resolver::entity_type(connector, &key.slot) {
        None => missing(key),
        Some(actual) => CompileError::TypeMismatch {
            key: key.raw.clone(),
            entity: key.slot.entity(),
            expected: rules
                .iter()
                .filter_map(|r| r.gate.map(|g| g.describe()))
                .collect::<Vec<_>>()
                .join("|"),
            actual: actual.to_string(),
        },
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

pub(crate) fn flag(value: &str) -> Result<bool, SetError> {
    parse_bool(value).ok_or(SetError::Invalid {
        expected: "a boolean",
    })
}

pub(crate) fn positive(value: &str) -> Result<u32, SetError> {
    value
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or(SetError::Invalid {
            expected: "a positive integer",
        })
}

pub(crate) fn count(value: &str) -> Result<u64, SetError> {
    value.trim().parse::<u64>().map_err(|_| SetError::Invalid {
        expected: "a non-negative integer",
    })
}

/// Comma or semicolon separated list, blanks dropped.
pub(crate) fn list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn apply(
        connector: &mut Connector,
        key: &str,
        value: &str,
    ) -> Result<&'static str, CompileError> {
        let key = KeyPath::parse(key)?.expect("recognizable key");
        dispatch(connector, &key, value)
    }

    #[test]
    fn type_rule_creates_and_field_rule_sets() {
        let mut connector = Connector::new("c");
        apply(&mut connector, "enclosure.discovery.source(1).type", "Wbem").unwrap();
        apply(&mut connector, "enclosure.discovery.source(1).query", "SELECT Name FROM X").unwrap();
        apply(&mut connector, "enclosure.discovery.source(1).namespace", "root/cimv2").unwrap();
        let json = serde_json::to_value(&connector.monitors["enclosure"]).unwrap();
        assert_eq!(
            json["discovery"]["sources"][0]["query"],
            serde_json::json!("SELECT Name FROM X")
        );
    }

    #[test]
    fn field_before_type_is_missing_entity() {
        let mut connector = Connector::new("c");
        let err = apply(&mut connector, "enclosure.collect.source(1).compute(1).column", "3")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingReferencedEntity);
    }

    #[test]
    fn field_of_another_variant_is_a_type_mismatch() {
        let mut connector = Connector::new("c");
        apply(&mut connector, "cpu.collect.source(1).type", "SnmpTable").unwrap();
        let err = apply(&mut connector, "cpu.collect.source(1).query", "SELECT 1").unwrap_err();
        let CompileError::TypeMismatch { actual, expected, .. } = err else {
            panic!("expected a type mismatch, got {err:?}");
        };
        assert_eq!(actual, "snmpTable");
        assert!(expected.contains("wbem"));
    }

    #[test]
    fn shared_property_picks_the_gate_that_admits() {
        let mut connector = Connector::new("c");
        apply(&mut connector, "cpu.collect.source(1).type", "SnmpTable").unwrap();
        apply(&mut connector, "cpu.collect.source(2).type", "OsCommand").unwrap();
        assert_eq!(
            apply(&mut connector, "cpu.collect.source(1).selectColumns", "1,2").unwrap(),
            apply(&mut connector, "cpu.collect.source(2).selectColumns", "1,2").unwrap()
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut connector = Connector::new("c");
        apply(&mut connector, "cpu.collect.source(1).type", "TableJoin").unwrap();
        let err = apply(&mut connector, "cpu.collect.source(1).leftKeyColumn", "zero").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        let err = apply(&mut connector, "cpu.collect.source(2).type", "Carrier").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn unknown_properties_are_unrecognized() {
        let mut connector = Connector::new("c");
        apply(&mut connector, "cpu.discovery.source(1).type", "Static").unwrap();
        let err = apply(&mut connector, "cpu.discovery.source(1).colour", "blue").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnrecognizedKey);
        assert!(!err.is_fatal());
    }

    #[test]
    fn detect_requires_the_gated_variant() {
        let mut connector = Connector::new("c");
        let key = KeyPath::parse("cpu.collect.source(1).oid").unwrap().unwrap();
        let oid_rule = RULES
            .iter()
            .find(|r| r.name == "oid")
            .expect("oid rule");
        assert!(!oid_rule.detect(&key, &connector));
        apply(&mut connector, "cpu.collect.source(1).type", "SnmpGet").unwrap();
        assert!(oid_rule.detect(&key, &connector));
    }

    #[test]
    fn every_rule_has_a_slot() {
        assert!(RULES.iter().all(|r| !r.slots.is_empty()));
    }
}
