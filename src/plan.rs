//! Execution plan handed to the execution engine.
//!
//! The plan is read-only once built and shared behind an `Arc`, so retries of
//! the same collection cycle reuse it without recompiling.

use crate::model::{Connector, Phase, SourceScope};
use crate::model::source::Source;
use serde::{Deserialize, Serialize};

/// Ordered sources of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    /// `None` for the connector-wide `pre` task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Sources sharing a layer may run in any order, or in parallel.
    #[serde(default)]
    pub layers: Vec<Vec<String>>,
    pub order: Vec<String>,
}

impl TaskPlan {
    pub fn scope(&self) -> SourceScope {
        match (&self.monitor, self.phase) {
            (Some(monitor), Some(phase)) => SourceScope::task(monitor.as_str(), phase),
            _ => SourceScope::Pre,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The planned sources, in execution order.
    pub fn sources<'a>(
        &'a self,
        connector: &'a Connector,
    ) -> impl Iterator<Item = &'a Source> + 'a {
        let scope = self.scope();
        self.order
            .iter()
            .filter_map(move |name| connector.source(&scope, name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub connector_id: String,
    pub pre: TaskPlan,
    /// Monitor tasks sorted by monitor name, then phase.
    #[serde(default)]
    pub tasks: Vec<TaskPlan>,
}

impl ExecutionPlan {
    pub fn task(&self, monitor: &str, phase: Phase) -> Option<&TaskPlan> {
        self.tasks.iter().find(|t| {
            t.phase == Some(phase)
                && t.monitor
                    .as_deref()
                    .is_some_and(|m| m.eq_ignore_ascii_case(monitor))
        })
    }

    /// Order of the task at `scope`.
    pub fn order(&self, scope: &SourceScope) -> Option<&[String]> {
        match scope {
            SourceScope::Pre => Some(&self.pre.order),
            SourceScope::Task { monitor, phase } => {
                self.task(monitor, *phase).map(|t| t.order.as_slice())
            }
        }
    }

    pub fn source_count(&self) -> usize {
        self.pre.order.len() + self.tasks.iter().map(|t| t.order.len()).sum::<usize>()
    }
}
