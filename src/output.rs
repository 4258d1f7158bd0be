//! Human-readable rendering of plans, results, state and schemas.

use std::collections::HashSet;
use std::time::Duration;

use tabled::settings::Style;
use tabled::{Table, Tabled};
use termtree::Tree;

use crate::engine::OutputValue;
use crate::executor::ExecutionResult;
use crate::graph::DependencyGraph;
use crate::plan::Plan;
use crate::resource::ResourceId;
use crate::schema::{Schema, SchemaRegistry};
use crate::state::ResourceState;

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = " ")]
    symbol: &'static str,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

pub fn plan_table(plan: &Plan) -> String {
    let rows: Vec<PlanRow> = plan
        .changes()
        .filter(|s| s.action.is_change())
        .map(|s| PlanRow {
            symbol: s.action.symbol(),
            resource: s.id.to_string(),
            action: s.action.to_string(),
            changes: s
                .changes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
}

pub fn result_table(result: &ExecutionResult) -> String {
    let rows: Vec<ResultRow> = result
        .steps
        .iter()
        .filter(|s| s.action.is_change())
        .map(|s| ResultRow {
            resource: s.id.to_string(),
            action: s.action.to_string(),
            outcome: s.outcome.to_string(),
            attempts: s.attempts,
            elapsed: format_elapsed(s.elapsed),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 60 {
        format!("{}m{:02}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

pub fn state_table<'a>(resources: impl IntoIterator<Item = &'a ResourceState>) -> String {
    let rows: Vec<StateRow> = resources
        .into_iter()
        .map(|s| StateRow {
            resource: s.id.to_string(),
            provider_id: s.provider_id.clone(),
            updated_at: s.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Output")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Description")]
    description: String,
}

pub fn outputs_table(outputs: &[OutputValue]) -> String {
    let rows: Vec<OutputRow> = outputs
        .iter()
        .map(|o| OutputRow {
            name: o.name.clone(),
            value: output_value(o),
            description: o.description.clone().unwrap_or_default(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Strings unquoted, everything else as JSON.
pub fn output_value(output: &OutputValue) -> String {
    match &output.value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "(not yet applied)".to_string(),
    }
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "Attribute")]
    name: &'static str,
    #[tabled(rename = "Type")]
    ty: String,
    #[tabled(rename = "Required")]
    required: &'static str,
    #[tabled(rename = "Forces replacement")]
    forces_replacement: &'static str,
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

pub fn schema_table(schema: &Schema) -> String {
    let inputs: Vec<SchemaRow> = schema
        .inputs
        .iter()
        .map(|a| SchemaRow {
            name: a.name,
            ty: a.ty.to_string(),
            required: yes_no(a.required),
            forces_replacement: yes_no(a.forces_replacement),
        })
        .collect();
    let outputs = schema
        .outputs
        .iter()
        .map(|o| format!("{} ({})", o.name, o.ty))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}\n{}\nOutputs: {}",
        schema.kind,
        Table::new(inputs).with(Style::rounded()),
        outputs
    )
}

#[derive(Tabled)]
struct KindRow {
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Inputs")]
    inputs: usize,
    #[tabled(rename = "Outputs")]
    outputs: String,
}

pub fn schemas_table(registry: &SchemaRegistry) -> String {
    let rows: Vec<KindRow> = registry
        .schemas()
        .map(|s| KindRow {
            kind: s.kind.to_string(),
            inputs: s.inputs.len(),
            outputs: s
                .outputs
                .iter()
                .map(|o| o.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Dependency tree: resources without dependencies at the top, each with its
/// dependents below. A resource reached twice is expanded only once.
pub fn graph_tree(graph: &DependencyGraph, root: &str) -> Tree<String> {
    let mut tree = Tree::new(root.to_string());
    let mut expanded = HashSet::new();
    for id in graph.nodes() {
        if graph.dependencies(id).is_empty() {
            tree.push(subtree(graph, id, &mut expanded));
        }
    }
    tree
}

fn subtree<'a>(
    graph: &'a DependencyGraph,
    id: &'a ResourceId,
    expanded: &mut HashSet<&'a ResourceId>,
) -> Tree<String> {
    if !expanded.insert(id) {
        return Tree::new(format!("{id} (see above)"));
    }
    let mut node = Tree::new(id.to_string());
    for dependent in graph.dependents(id) {
        node.push(subtree(graph, dependent, expanded));
    }
    node
}
