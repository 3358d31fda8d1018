//! Locate-or-create over the connector graph.
//!
//! Monitors and tasks are created on first mention. Sources, computes,
//! criteria and steps are only created by their `type` key; every other key
//! must find them already typed.

use crate::error::CompileError;
use crate::key::{KeyPath, Slot, SourceAddr};
use crate::model::compute::{Compute, ComputeType};
use crate::model::detection::{Criterion, CriterionType, Step, StepType, insert_step};
use crate::model::source::{Source, SourceType};
use crate::model::{Connector, MonitorJob, SourceScope, Task};
use std::fmt;

/// Concrete variant of an existing indexed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Source(SourceType),
    Compute(ComputeType),
    Criterion(CriterionType),
    Step(StepType),
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Source(ty) => ty.fmt(f),
            EntityType::Compute(ty) => ty.fmt(f),
            EntityType::Criterion(ty) => ty.fmt(f),
            EntityType::Step(ty) => ty.fmt(f),
        }
    }
}

/// Monitor `name`, created if needed. The first spelling wins as display
/// name.
pub fn ensure_monitor<'a>(connector: &'a mut Connector, name: &str) -> &'a mut MonitorJob {
    connector
        .monitors
        .entry(name.to_lowercase())
        .or_insert_with(|| MonitorJob::new(name))
}

/// Task of `scope`, created with its monitor if needed.
pub fn ensure_task<'a>(
    connector: &'a mut Connector,
    scope: &SourceScope,
    monitor_name: Option<&str>,
) -> &'a mut Task {
    match scope {
        SourceScope::Pre => &mut connector.pre,
        SourceScope::Task { monitor, phase } => {
            let display = monitor_name.unwrap_or(monitor);
            ensure_monitor(connector, display)
                .task_slot(*phase)
                .get_or_insert_with(Task::default)
        }
    }
}

pub fn find_source<'a>(connector: &'a Connector, addr: &SourceAddr) -> Option<&'a Source> {
    connector.source(&addr.scope, &addr.name)
}

pub fn source_mut<'a>(connector: &'a mut Connector, addr: &SourceAddr) -> Option<&'a mut Source> {
    connector
        .task_mut(&addr.scope)
        .and_then(|task| task.sources.get_mut(&addr.name))
}

fn steps_of<'a>(connector: &'a Connector, slot: &Slot) -> Option<&'a [Step]> {
    match slot {
        Slot::CriterionStep { criterion, .. } => {
            connector.detection.criterion(*criterion)?.steps()
        }
        Slot::SourceStep { source, .. } => find_source(connector, source)?.steps(),
        _ => None,
    }
}

/// Type of the typed entity at `slot`, if there is one.
pub fn entity_type(connector: &Connector, slot: &Slot) -> Option<EntityType> {
    match slot {
        Slot::Source(addr) => {
            find_source(connector, addr).map(|s| EntityType::Source(s.source_type()))
        }
        Slot::Compute { source, index } => find_source(connector, source)?
            .compute(*index)
            .map(|c| EntityType::Compute(c.compute_type())),
        Slot::Criterion { index } => connector
            .detection
            .criterion(*index)
            .map(|c| EntityType::Criterion(c.criterion_type())),
        Slot::CriterionStep { step, .. } | Slot::SourceStep { index: step, .. } => {
            steps_of(connector, slot)?
                .iter()
                .find(|s| s.index == *step)
                .map(|s| EntityType::Step(s.step_type))
        }
        _ => None,
    }
}

pub fn compute_mut<'a>(
    connector: &'a mut Connector,
    source: &SourceAddr,
    index: u32,
) -> Option<&'a mut Compute> {
    source_mut(connector, source)?.compute_mut(index)
}

pub fn criterion_mut(connector: &mut Connector, index: u32) -> Option<&mut Criterion> {
    connector.detection.criterion_mut(index)
}

fn steps_mut<'a>(connector: &'a mut Connector, slot: &Slot) -> Option<&'a mut Vec<Step>> {
    match slot {
        Slot::CriterionStep { criterion, .. } => {
            connector.detection.criterion_mut(*criterion)?.steps_mut()
        }
        Slot::SourceStep { source, .. } => source_mut(connector, source)?.steps_mut(),
        _ => None,
    }
}

pub fn step_mut<'a>(connector: &'a mut Connector, slot: &Slot) -> Option<&'a mut Step> {
    let index = match slot {
        Slot::CriterionStep { step, .. } => *step,
        Slot::SourceStep { index, .. } => *index,
        _ => return None,
    };
    steps_mut(connector, slot)?
        .iter_mut()
        .find(|s| s.index == index)
}

fn missing(entity: String, key: &KeyPath) -> CompileError {
    CompileError::MissingReferencedEntity {
        entity,
        referrer: key.raw.clone(),
    }
}

fn conflicting(
    key: &KeyPath,
    existing: impl fmt::Display,
    requested: impl fmt::Display,
) -> CompileError {
    CompileError::ConflictingType {
        key: key.raw.clone(),
        entity: key.slot.entity(),
        existing: existing.to_string(),
        requested: requested.to_string(),
    }
}

/// Create the source at `addr` with variant `ty`, or return the existing one
/// when it already has that variant.
pub fn instantiate_source<'a>(
    connector: &'a mut Connector,
    key: &KeyPath,
    addr: &SourceAddr,
    ty: SourceType,
) -> Result<&'a mut Source, CompileError> {
    let task = ensure_task(connector, &addr.scope, key.monitor.as_deref());
    if let Some(position) = task.sources.position(&addr.name) {
        let existing = task.sources.iter().nth(position).map(Source::source_type);
        if let Some(existing) = existing.filter(|existing| *existing != ty) {
            return Err(conflicting(key, existing, ty));
        }
        return task
            .sources
            .get_mut(&addr.name)
            .ok_or_else(|| missing(addr.key(), key));
    }
    let index = addr.index.unwrap_or(task.sources.len() as u32 + 1);
    let source = Source::new(index, addr.name.clone(), addr.key(), ty);
    Ok(task.sources.push(source))
}

pub fn instantiate_compute<'a>(
    connector: &'a mut Connector,
    key: &KeyPath,
    source: &SourceAddr,
    index: u32,
    ty: ComputeType,
) -> Result<&'a mut Compute, CompileError> {
    let owner = source_mut(connector, source).ok_or_else(|| missing(source.key(), key))?;
    match owner.compute(index).map(Compute::compute_type) {
        Some(existing) if existing != ty => Err(conflicting(key, existing, ty)),
        Some(_) => owner
            .compute_mut(index)
            .ok_or_else(|| missing(key.slot.entity(), key)),
        None => Ok(owner.insert_compute(Compute::new(index, ty))),
    }
}

pub fn instantiate_criterion<'a>(
    connector: &'a mut Connector,
    key: &KeyPath,
    index: u32,
    ty: CriterionType,
) -> Result<&'a mut Criterion, CompileError> {
    let detection = &mut connector.detection;
    match detection.criterion(index).map(Criterion::criterion_type) {
        Some(existing) if existing != ty => Err(conflicting(key, existing, ty)),
        Some(_) => detection
            .criterion_mut(index)
            .ok_or_else(|| missing(key.slot.entity(), key)),
        None => Ok(detection.insert_criterion(Criterion::new(index, ty))),
    }
}

/// Steps hang off an interactive criterion or source, which must exist.
pub fn instantiate_step<'a>(
    connector: &'a mut Connector,
    key: &KeyPath,
    ty: StepType,
) -> Result<&'a mut Step, CompileError> {
    let (parent, index) = match &key.slot {
        Slot::CriterionStep { criterion, step } => (Slot::Criterion { index: *criterion }, *step),
        Slot::SourceStep { source, index } => (Slot::Source(source.clone()), *index),
        other => return Err(missing(other.entity(), key)),
    };
    let Some(parent_type) = entity_type(connector, &parent) else {
        return Err(missing(parent.entity(), key));
    };
    let steps = steps_mut(connector, &key.slot).ok_or_else(|| CompileError::TypeMismatch {
        key: key.raw.clone(),
        entity: parent.entity(),
        expected: "sshInteractive".to_string(),
        actual: parent_type.to_string(),
    })?;
    match steps.iter().position(|s| s.index == index) {
        Some(position) if steps[position].step_type != ty => {
            Err(conflicting(key, steps[position].step_type, ty))
        }
        Some(position) => Ok(&mut steps[position]),
        None => Ok(insert_step(steps, Step::new(index, ty))),
    }
}
