//! Planner: diffs the declarations against the last-known state and orders
//! the resulting actions.
//!
//! Deletions come first, dependents before their dependencies. Creations,
//! updates and no-ops follow, dependencies before their dependents. A
//! replacement contributes one step to each half. Every step lists the
//! earlier steps it must wait for, which is all the executor needs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::error::ConfigError;
use crate::graph::DependencyGraph;
use crate::resource::{DeclarationSet, Expr, Reference, ResourceDeclaration, ResourceId};
use crate::state::ResourceState;

/// What happens to a resource, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Destroy, then create under the same identity.
    Replace,
    Destroy,
    NoOp,
}

impl Action {
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::Destroy => "-",
            Action::NoOp => " ",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Destroy => "destroy",
            Action::NoOp => "no-op",
        };
        f.write_str(name)
    }
}

/// What the executor does for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Nothing to send to the provider.
    Keep,
}

/// A declared attribute value as far as it is known at plan time.
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    Known(serde_json::Value),
    /// Depends on an output of a resource created or replaced in this plan.
    Unknown,
    Absent,
}

impl fmt::Display for Planned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Planned::Known(v) => write!(f, "{v}"),
            Planned::Unknown => f.write_str("(known after apply)"),
            Planned::Absent => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub name: String,
    pub before: Option<serde_json::Value>,
    pub after: Planned,
    pub forces_replacement: bool,
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.before {
            Some(before) => write!(f, "{}: {} -> {}", self.name, before, self.after)?,
            None => write!(f, "{}: {}", self.name, self.after)?,
        }
        if self.forces_replacement {
            f.write_str(" (forces replacement)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub id: ResourceId,
    pub action: Action,
    pub operation: Operation,
    /// Declared inputs, resolved at apply time. Empty for deletions.
    pub inputs: BTreeMap<String, Expr>,
    pub changes: Vec<AttributeChange>,
    /// Resources this one depends on; recorded in state on success.
    pub dependencies: Vec<ResourceId>,
    /// Indexes of earlier steps that must finish first.
    pub depends_on: Vec<usize>,
    pub provider_id: Option<String>,
    pub prevent_destroy: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub destroy: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn has_changes(&self) -> bool {
        self.create + self.update + self.replace + self.destroy > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to destroy.",
            self.create, self.update, self.replace, self.destroy
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// One step per resource; the delete half of a replacement is folded
    /// into its create half.
    pub fn changes(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps
            .iter()
            .filter(|s| !(s.action == Action::Replace && s.operation == Operation::Delete))
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in self.changes() {
            match step.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Destroy => summary.destroy += 1,
                Action::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.action.is_change())
    }

    pub fn action_for(&self, id: &ResourceId) -> Option<Action> {
        self.changes().find(|s| &s.id == id).map(|s| s.action)
    }

    /// Position of the step performing `operation` on `id`.
    pub fn position(&self, id: &ResourceId, operation: Operation) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| &s.id == id && s.operation == operation)
    }

    /// Groups step indexes into waves: a step's prerequisites all sit in
    /// earlier waves.
    pub fn waves(&self) -> Vec<Vec<usize>> {
        let mut level = vec![0usize; self.steps.len()];
        let mut waves: Vec<Vec<usize>> = Vec::new();
        for (i, step) in self.steps.iter().enumerate() {
            level[i] = step
                .depends_on
                .iter()
                .map(|&d| level[d] + 1)
                .max()
                .unwrap_or(0);
            if waves.len() <= level[i] {
                waves.resize_with(level[i] + 1, Vec::new);
            }
            waves[level[i]].push(i);
        }
        waves
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        if !summary.has_changes() {
            return writeln!(f, "No changes. Infrastructure matches the configuration.");
        }

        for step in self.changes().filter(|s| s.action.is_change()) {
            writeln!(f, "  {} {}", step.action.symbol(), step.id)?;
            for change in &step.changes {
                writeln!(f, "      {change}")?;
            }
        }
        writeln!(f)?;
        writeln!(f, "{summary}")
    }
}

struct Decision {
    action: Action,
    changes: Vec<AttributeChange>,
}

/// Computes the plan converging `prior` towards `declarations`.
///
/// `graph` must have been built from `declarations`. Resources only present
/// in `prior` are destroyed, ordered by the dependencies recorded in state.
pub fn plan(
    graph: &DependencyGraph,
    declarations: &DeclarationSet,
    prior: &BTreeMap<ResourceId, ResourceState>,
) -> Result<Plan, ConfigError> {
    let mut combined = graph.clone();
    let orphans: Vec<&ResourceState> = prior
        .values()
        .filter(|s| !declarations.contains(&s.id))
        .collect();
    for orphan in &orphans {
        combined.add_node(orphan.id.clone());
    }
    for orphan in &orphans {
        for dep in &orphan.dependencies {
            if combined.contains(dep) {
                combined.add_edge(&orphan.id, dep);
            }
        }
    }
    let order = combined.topological_order()?;

    let mut decisions: HashMap<&ResourceId, Decision> = HashMap::new();
    let mut pending: HashSet<ResourceId> = HashSet::new();
    for id in &order {
        let Some(decl) = declarations.get(id) else {
            continue;
        };
        let decision = decide(decl, prior, &pending);
        if decision.action == Action::Replace && decl.prevent_destroy {
            return Err(ConfigError::PreventDestroy {
                resource: id.to_string(),
                action: Action::Replace.to_string(),
            });
        }
        if matches!(decision.action, Action::Create | Action::Replace) {
            pending.insert(id.clone());
        }
        decisions.insert(id, decision);
    }

    for orphan in &orphans {
        if orphan.prevent_destroy {
            return Err(ConfigError::PreventDestroy {
                resource: orphan.id.to_string(),
                action: Action::Destroy.to_string(),
            });
        }
    }

    let mut steps: Vec<PlanStep> = Vec::new();
    let mut delete_index: HashMap<&ResourceId, usize> = HashMap::new();

    for id in order.iter().rev() {
        let (action, state) = match (decisions.get(id), prior.get(id)) {
            (Some(d), Some(state)) if d.action == Action::Replace => (Action::Replace, state),
            (None, Some(state)) => (Action::Destroy, state),
            _ => continue,
        };
        let depends_on = combined
            .dependents(id)
            .into_iter()
            .filter_map(|dependent| delete_index.get(dependent).copied())
            .collect();
        delete_index.insert(id, steps.len());
        steps.push(PlanStep {
            id: id.clone(),
            action,
            operation: Operation::Delete,
            inputs: BTreeMap::new(),
            changes: Vec::new(),
            dependencies: state.dependencies.clone(),
            depends_on,
            provider_id: Some(state.provider_id.clone()),
            prevent_destroy: state.prevent_destroy,
        });
    }

    let mut converge_index: HashMap<&ResourceId, usize> = HashMap::new();
    for id in &order {
        let (Some(decl), Some(decision)) = (declarations.get(id), decisions.remove(id)) else {
            continue;
        };
        let operation = match decision.action {
            Action::Create | Action::Replace => Operation::Create,
            Action::Update => Operation::Update,
            _ => Operation::Keep,
        };
        let dependencies: Vec<ResourceId> =
            combined.dependencies(id).into_iter().cloned().collect();
        let mut depends_on: Vec<usize> = delete_index.get(id).copied().into_iter().collect();
        depends_on.extend(
            dependencies
                .iter()
                .filter_map(|dep| converge_index.get(dep).copied()),
        );

        converge_index.insert(id, steps.len());
        steps.push(PlanStep {
            id: id.clone(),
            action: decision.action,
            operation,
            inputs: decl.inputs.clone(),
            changes: decision.changes,
            dependencies,
            depends_on,
            provider_id: match decision.action {
                Action::Update | Action::NoOp => prior.get(id).map(|s| s.provider_id.clone()),
                _ => None,
            },
            prevent_destroy: decl.prevent_destroy,
        });
    }

    let plan = Plan { steps };
    let summary = plan.summary();
    tracing::debug!(
        create = summary.create,
        update = summary.update,
        replace = summary.replace,
        destroy = summary.destroy,
        unchanged = summary.unchanged,
        "plan computed"
    );
    Ok(plan)
}

/// Plan that destroys everything recorded in `prior`.
pub fn destroy_plan(prior: &BTreeMap<ResourceId, ResourceState>) -> Result<Plan, ConfigError> {
    plan(&DependencyGraph::new(), &DeclarationSet::new(), prior)
}

fn decide(
    decl: &ResourceDeclaration,
    prior: &BTreeMap<ResourceId, ResourceState>,
    pending: &HashSet<ResourceId>,
) -> Decision {
    let schema = decl.id.kind.schema();
    let lookup = |r: &Reference| -> Option<serde_json::Value> {
        if pending.contains(&r.target) {
            return None;
        }
        prior
            .get(&r.target)
            .and_then(|s| s.outputs.get(&r.attribute))
            .cloned()
    };
    let planned = |name: &str| match decl.inputs.get(name) {
        Some(expr) => expr.resolve(&lookup).map_or(Planned::Unknown, Planned::Known),
        None => Planned::Absent,
    };

    let Some(state) = prior.get(&decl.id) else {
        let changes = decl
            .inputs
            .keys()
            .map(|name| AttributeChange {
                name: name.clone(),
                before: None,
                after: planned(name),
                forces_replacement: false,
            })
            .collect();
        return Decision {
            action: Action::Create,
            changes,
        };
    };

    let names: BTreeSet<&str> = decl
        .inputs
        .keys()
        .chain(state.inputs.keys())
        .map(String::as_str)
        .collect();

    let mut changes = Vec::new();
    for name in names {
        let before = state.inputs.get(name).cloned();
        let after = planned(name);
        let unchanged = match (&before, &after) {
            (Some(b), Planned::Known(a)) => b == a,
            (None, Planned::Absent) => true,
            _ => false,
        };
        if !unchanged {
            changes.push(AttributeChange {
                name: name.to_string(),
                before,
                after,
                forces_replacement: schema.forces_replacement(name),
            });
        }
    }

    let action = if changes.is_empty() {
        Action::NoOp
    } else if changes.iter().any(|c| c.forces_replacement) {
        Action::Replace
    } else {
        Action::Update
    };
    Decision { action, changes }
}
