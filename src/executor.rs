//! Executor: walks a plan wave by wave, calls the provider and records each
//! converged resource in state as soon as it converges.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{RetryConfig, Settings};
use crate::plan::{Action, Operation, Plan, PlanStep};
use crate::providers::{self, Provider, ProviderError};
use crate::resource::{AttributeMap, Reference, ResourceId};
use crate::schema::ResourceKind;
use crate::state::{ResourceState, StateError, StateStore};

/// Errors that abort the whole run. Per-resource failures are reported in
/// the [`ExecutionResult`] instead. Steps already in flight when one of
/// these occurs still run to completion first.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to record {resource} in state: {source}")]
    StateWrite {
        resource: String,
        #[source]
        source: StateError,
    },
}

/// Why a single resource failed to converge.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("input '{attribute}' references {reference}, which has no recorded value")]
    UnresolvedInput { attribute: String, reference: String },

    #[error("no provider id recorded")]
    Untracked,

    #[error("provider call crashed: {0}")]
    Crashed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The named resource failed; this step depends on it.
    DependencyFailed(ResourceId),
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DependencyFailed(id) => write!(f, "dependency {id} failed"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    Converged,
    Failed(StepError),
    Skipped(SkipReason),
}

impl Outcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Outcome::Converged)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Converged => f.write_str("converged"),
            Outcome::Failed(e) => write!(f, "failed: {e}"),
            Outcome::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug)]
pub struct StepResult {
    pub id: ResourceId,
    pub action: Action,
    pub operation: Operation,
    pub outcome: Outcome,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl StepResult {
    fn immediate(step: &PlanStep, outcome: Outcome) -> Self {
        Self {
            id: step.id.clone(),
            action: step.action,
            operation: step.operation,
            outcome,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Per-step outcomes in plan order.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub steps: Vec<StepResult>,
}

impl ExecutionResult {
    pub fn converged(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_converged()).count()
    }

    pub fn failed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, Outcome::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, Outcome::Skipped(_)))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome.is_converged())
    }

    pub fn was_cancelled(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.outcome, Outcome::Skipped(SkipReason::Cancelled)))
    }

    /// Final outcome for a resource; for replacements, the create half.
    pub fn outcome(&self, id: &ResourceId) -> Option<&Outcome> {
        self.steps
            .iter()
            .rev()
            .find(|s| &s.id == id)
            .map(|s| &s.outcome)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Apply complete: {} converged, {} failed, {} skipped.",
            self.converged(),
            self.failed(),
            self.skipped()
        )
    }
}

enum JobOutput {
    Applied {
        inputs: AttributeMap,
        outputs: AttributeMap,
    },
    Deleted,
    /// The provider no longer knows the resource.
    AlreadyGone,
}

/// One provider call, owned so it can run on its own task.
struct Job {
    provider: Arc<dyn Provider>,
    id: ResourceId,
    kind: ResourceKind,
    operation: Operation,
    provider_id: Option<String>,
    inputs: AttributeMap,
    timeout: Duration,
    retry: RetryConfig,
}

impl Job {
    async fn run(self) -> (Result<JobOutput, StepError>, u32, Duration) {
        let started = Instant::now();
        let mut attempts = 0;
        let result = tokio::time::timeout(self.timeout, async {
            loop {
                attempts += 1;
                match self.call().await {
                    Ok(output) => return Ok(output),
                    Err(e) if e.is_transient() && attempts < self.retry.max_attempts => {
                        let delay = self.retry.delay_for(attempts);
                        warn!(
                            resource = %self.id,
                            attempt = attempts,
                            delay = ?delay,
                            error = %e,
                            "transient provider error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => return Err(StepError::Provider(e)),
                }
            }
        })
        .await;

        let result = result.unwrap_or(Err(StepError::Timeout(self.timeout)));
        (result, attempts, started.elapsed())
    }

    async fn call(&self) -> Result<JobOutput, ProviderError> {
        let provider_id = || {
            self.provider_id
                .as_deref()
                .ok_or_else(|| ProviderError::Permanent(format!("{} has no provider id", self.id)))
        };
        match self.operation {
            Operation::Create => {
                let outputs = self.provider.create(self.kind, &self.inputs).await?;
                Ok(JobOutput::Applied {
                    inputs: self.inputs.clone(),
                    outputs,
                })
            }
            Operation::Update => {
                let outputs = self
                    .provider
                    .update(self.kind, provider_id()?, &self.inputs)
                    .await?;
                Ok(JobOutput::Applied {
                    inputs: self.inputs.clone(),
                    outputs,
                })
            }
            Operation::Delete => match self.provider.delete(self.kind, provider_id()?).await {
                Ok(()) => Ok(JobOutput::Deleted),
                Err(ProviderError::NotFound(_)) => Ok(JobOutput::AlreadyGone),
                Err(e) => Err(e),
            },
            Operation::Keep => Err(ProviderError::Permanent(
                "nothing to apply for an unchanged resource".to_string(),
            )),
        }
    }
}

pub struct Executor {
    provider: Arc<dyn Provider>,
    parallelism: usize,
    timeout: Duration,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(provider: Arc<dyn Provider>, settings: &Settings) -> Self {
        Self {
            provider,
            parallelism: settings.parallelism.max(1),
            timeout: settings.resource_timeout,
            retry: settings.retry.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Once cancelled, no new step starts; in-flight steps finish.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Applies `plan`, persisting every converged step to `store` before the
    /// next step is recorded.
    pub async fn apply(
        &self,
        plan: &Plan,
        store: &mut StateStore,
    ) -> Result<ExecutionResult, ExecutorError> {
        let mut results: Vec<Option<StepResult>> = plan.steps.iter().map(|_| None).collect();

        for (wave_number, wave) in plan.waves().into_iter().enumerate() {
            let mut runnable = Vec::new();
            for i in wave {
                let step = &plan.steps[i];
                if let Some(reason) = blocked_by(step, &results) {
                    results[i] = Some(StepResult::immediate(step, Outcome::Skipped(reason)));
                } else if self.cancel.is_cancelled() {
                    results[i] = Some(StepResult::immediate(
                        step,
                        Outcome::Skipped(SkipReason::Cancelled),
                    ));
                } else {
                    runnable.push(i);
                }
            }
            if runnable.is_empty() {
                continue;
            }
            info!(wave = wave_number, steps = runnable.len(), "starting wave");

            let mut queue = runnable.into_iter();
            let mut running: JoinSet<(usize, (Result<JobOutput, StepError>, u32, Duration))> =
                JoinSet::new();
            let mut tasks: HashMap<task::Id, usize> = HashMap::new();
            let mut fatal: Option<ExecutorError> = None;
            loop {
                while fatal.is_none()
                    && running.len() < self.parallelism
                    && !self.cancel.is_cancelled()
                {
                    let Some(i) = queue.next() else {
                        break;
                    };
                    let step = &plan.steps[i];
                    if step.operation == Operation::Keep {
                        match self.keep(step, store).await {
                            Ok(()) => {
                                results[i] = Some(StepResult::immediate(step, Outcome::Converged));
                            }
                            Err(e) => fatal = Some(e),
                        }
                        continue;
                    }
                    match self.job(step, store) {
                        Ok(job) => {
                            info!(resource = %step.id, action = %step.action, "applying");
                            let handle = running.spawn(async move { (i, job.run().await) });
                            tasks.insert(handle.id(), i);
                        }
                        Err(e) => {
                            error!(resource = %step.id, error = %e, "cannot apply");
                            results[i] = Some(StepResult::immediate(step, Outcome::Failed(e)));
                        }
                    }
                }

                let Some(joined) = running.join_next_with_id().await else {
                    break;
                };
                let (i, (result, attempts, elapsed)) = match joined {
                    Ok((task_id, done)) => {
                        tasks.remove(&task_id);
                        done
                    }
                    Err(e) => {
                        let Some(i) = tasks.remove(&e.id()) else {
                            continue;
                        };
                        error!(resource = %plan.steps[i].id, error = %e, "provider call crashed");
                        (i, (Err(StepError::Crashed(e.to_string())), 1, Duration::ZERO))
                    }
                };
                let step = &plan.steps[i];
                let outcome = match self.record(step, result, store).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(resource = %step.id, error = %e, "state write failed, draining in-flight steps");
                        fatal.get_or_insert(e);
                        continue;
                    }
                };
                results[i] = Some(StepResult {
                    id: step.id.clone(),
                    action: step.action,
                    operation: step.operation,
                    outcome,
                    attempts,
                    elapsed,
                });
            }

            if let Some(e) = fatal {
                return Err(e);
            }

            for i in queue {
                results[i] = Some(StepResult::immediate(
                    &plan.steps[i],
                    Outcome::Skipped(SkipReason::Cancelled),
                ));
            }
        }

        let result = ExecutionResult {
            steps: results.into_iter().flatten().collect(),
        };
        if result.was_cancelled() {
            warn!(skipped = result.skipped(), "apply cancelled");
        }
        info!(
            converged = result.converged(),
            failed = result.failed(),
            skipped = result.skipped(),
            "apply finished"
        );
        Ok(result)
    }

    fn job(&self, step: &PlanStep, store: &StateStore) -> Result<Job, StepError> {
        let inputs = if step.operation == Operation::Delete {
            AttributeMap::new()
        } else {
            resolve_inputs(step, store)?
        };
        let provider_id = match step.operation {
            Operation::Create => None,
            _ => Some(step.provider_id.clone().ok_or(StepError::Untracked)?),
        };
        Ok(Job {
            provider: Arc::clone(&self.provider),
            id: step.id.clone(),
            kind: step.id.kind,
            operation: step.operation,
            provider_id,
            inputs,
            timeout: self.timeout,
            retry: self.retry.clone(),
        })
    }

    /// Refreshes recorded metadata of an unchanged resource.
    async fn keep(&self, step: &PlanStep, store: &mut StateStore) -> Result<(), ExecutorError> {
        if let Some(current) = store.get(&step.id)
            && (current.dependencies != step.dependencies
                || current.prevent_destroy != step.prevent_destroy)
        {
            let mut updated = current.clone();
            updated.dependencies = step.dependencies.clone();
            updated.prevent_destroy = step.prevent_destroy;
            store
                .upsert(updated)
                .await
                .map_err(|source| state_write(&step.id, source))?;
        }
        Ok(())
    }

    async fn record(
        &self,
        step: &PlanStep,
        result: Result<JobOutput, StepError>,
        store: &mut StateStore,
    ) -> Result<Outcome, ExecutorError> {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!(resource = %step.id, action = %step.action, error = %e, "resource failed");
                return Ok(Outcome::Failed(e));
            }
        };

        match output {
            JobOutput::Applied { inputs, outputs } => {
                let provider_id = match providers::provider_id(&outputs) {
                    Ok(id) => id,
                    Err(e) => return Ok(Outcome::Failed(e.into())),
                };
                let mut state = ResourceState::new(step.id.clone(), provider_id)
                    .with_inputs(inputs)
                    .with_outputs(outputs)
                    .with_dependencies(step.dependencies.clone());
                state.prevent_destroy = step.prevent_destroy;
                store
                    .upsert(state)
                    .await
                    .map_err(|source| state_write(&step.id, source))?;
            }
            JobOutput::Deleted | JobOutput::AlreadyGone => {
                if matches!(output, JobOutput::AlreadyGone) {
                    warn!(resource = %step.id, "already deleted at the provider");
                }
                match store.remove(&step.id).await {
                    Ok(_) | Err(StateError::NotTracked(_)) => {}
                    Err(source) => return Err(state_write(&step.id, source)),
                }
            }
        }
        info!(resource = %step.id, action = %step.action, "converged");
        Ok(Outcome::Converged)
    }
}

fn state_write(id: &ResourceId, source: StateError) -> ExecutorError {
    ExecutorError::StateWrite {
        resource: id.to_string(),
        source,
    }
}

/// The failed resource behind the first unfinished prerequisite, if any.
fn blocked_by(step: &PlanStep, results: &[Option<StepResult>]) -> Option<SkipReason> {
    step.depends_on.iter().find_map(|&d| match &results[d] {
        Some(r) => match &r.outcome {
            Outcome::Converged => None,
            Outcome::Failed(_) => Some(SkipReason::DependencyFailed(r.id.clone())),
            Outcome::Skipped(reason) => Some(reason.clone()),
        },
        None => Some(SkipReason::Cancelled),
    })
}

/// Resolves declared inputs against the outputs currently recorded in state.
fn resolve_inputs(step: &PlanStep, store: &StateStore) -> Result<AttributeMap, StepError> {
    let lookup = |r: &Reference| -> Option<serde_json::Value> {
        store
            .get(&r.target)
            .and_then(|s| s.outputs.get(&r.attribute))
            .cloned()
    };

    step.inputs
        .iter()
        .map(|(name, expr)| match expr.resolve(&lookup) {
            Some(value) => Ok((name.clone(), value)),
            None => Err(StepError::UnresolvedInput {
                attribute: name.clone(),
                reference: expr
                    .references()
                    .into_iter()
                    .find(|r| lookup(r).is_none())
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            }),
        })
        .collect()
}
