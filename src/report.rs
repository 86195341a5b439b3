//! Offline reports for inspecting a task graph without a coordinator.

use camino::Utf8Path;
use prost::Message;

use crate::error::LoomError;
use crate::graph::{TaskGraph, TaskHandle};
use crate::plan::Plan;
use crate::protocol;
use crate::symbols::Symbols;

/// Numbers the graph from id 0 and writes it to `path` as a report with no
/// events. Symbols are whatever the plan refers to, sorted by name.
pub fn write_dry_report(
    graph: &TaskGraph,
    tasks: &[TaskHandle],
    path: impl AsRef<Utf8Path>,
) -> Result<(), LoomError> {
    let report = dry_report(graph, tasks)?;
    std::fs::write(path.as_ref(), report.encode_to_vec())?;

    tracing::info!(path = %path.as_ref(), tasks = report.plan.tasks.len(), "dry report written");
    Ok(())
}

pub fn dry_report(graph: &TaskGraph, tasks: &[TaskHandle]) -> Result<protocol::Report, LoomError> {
    let mut plan = Plan::new(graph, 0);
    let results = tasks
        .iter()
        .map(|&handle| plan.add_task(handle))
        .collect::<Result<Vec<_>, _>>()?;

    let symbols = Symbols::from_unordered(plan.collect_symbols());

    Ok(protocol::Report {
        symbols: symbols.names().map(String::from).collect(),
        plan: plan.serialize(&symbols, &results, true)?,
        events: Vec::new(),
    })
}
