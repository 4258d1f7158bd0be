//! One orchestration run: lock, load, refresh, plan, apply, unlock.
//!
//! Planning returns a [`PlannedRun`] that keeps holding the lock, so the
//! caller can show the plan and ask for confirmation before applying it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Configuration, OutputDeclaration, Settings};
use crate::error::{ConfigError, TierformError};
use crate::executor::{ExecutionResult, Executor};
use crate::graph::DependencyGraph;
use crate::plan::{self, Plan};
use crate::providers::{Provider, ProviderError};
use crate::resource::{AttributeMap, Reference, ResourceId};
use crate::state::{LockInfo, ResourceState, StateError, StateLock, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    /// Converge towards an empty declaration set.
    Destroy,
}

impl Mode {
    fn operation(&self) -> &'static str {
        match self {
            Mode::Apply => "apply",
            Mode::Destroy => "destroy",
        }
    }
}

/// Differences between recorded state and what the provider reports.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Entries whose outputs changed outside tierform.
    pub drifted: Vec<ResourceState>,
    /// Entries the provider no longer knows; they plan as creations.
    pub vanished: Vec<ResourceId>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.drifted.is_empty() && self.vanished.is_empty()
    }
}

/// A computed plan together with the lock it was computed under.
#[derive(Debug)]
pub struct PlannedRun {
    pub mode: Mode,
    pub plan: Plan,
    pub refresh: RefreshReport,
    lock: StateLock,
}

impl PlannedRun {
    pub fn lock_info(&self) -> &LockInfo {
        self.lock.info()
    }

    /// Gives up the run without applying anything.
    pub async fn abandon(self) -> Result<(), StateError> {
        self.lock.release().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    pub name: String,
    /// `None` until everything the output references has been applied.
    pub value: Option<serde_json::Value>,
    pub description: Option<String>,
}

pub struct Engine {
    config: Configuration,
    graph: DependencyGraph,
    settings: Settings,
    provider: Arc<dyn Provider>,
    store: StateStore,
    cancel: CancellationToken,
}

impl Engine {
    /// Builds the dependency graph up front, so configuration errors surface
    /// before any lock is taken or any provider call is made.
    pub fn new(
        config: Configuration,
        settings: Settings,
        provider: Arc<dyn Provider>,
        store: StateStore,
    ) -> Result<Self, TierformError> {
        settings.validate()?;
        let graph = DependencyGraph::build(&config.declarations)?;
        Ok(Self {
            config,
            graph,
            settings,
            provider,
            store,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn plan(&mut self, mode: Mode) -> Result<PlannedRun, TierformError> {
        let lock = self
            .store
            .lock(mode.operation(), self.settings.lock_stale_after)
            .await?;
        self.store.load().await?;

        let mut prior = self.store.document().resources.clone();
        let refresh = if self.settings.refresh {
            self.refresh().await?
        } else {
            RefreshReport::default()
        };
        for state in &refresh.drifted {
            prior.insert(state.id.clone(), state.clone());
        }
        for id in &refresh.vanished {
            prior.remove(id);
        }

        let plan = match mode {
            Mode::Apply => plan::plan(&self.graph, &self.config.declarations, &prior)?,
            Mode::Destroy => plan::destroy_plan(&prior)?,
        };
        info!(mode = mode.operation(), summary = %plan.summary(), "planned");

        Ok(PlannedRun {
            mode,
            plan,
            refresh,
            lock,
        })
    }

    /// Records refreshed differences, executes the plan, releases the lock.
    pub async fn apply(&mut self, run: PlannedRun) -> Result<ExecutionResult, TierformError> {
        let PlannedRun {
            plan,
            refresh,
            lock,
            ..
        } = run;

        for id in &refresh.vanished {
            match self.store.remove(id).await {
                Ok(_) | Err(StateError::NotTracked(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for state in refresh.drifted {
            self.store.upsert(state).await?;
        }

        let result = Executor::new(Arc::clone(&self.provider), &self.settings)
            .with_cancellation(self.cancel.clone())
            .apply(&plan, &mut self.store)
            .await?;

        lock.release().await?;
        Ok(result)
    }

    async fn refresh(&self) -> Result<RefreshReport, TierformError> {
        let mut report = RefreshReport::default();
        for state in self.store.resources() {
            match self.read_with_retry(state).await {
                Ok(outputs) if outputs != state.outputs => {
                    debug!(resource = %state.id, "outputs changed outside tierform");
                    report
                        .drifted
                        .push(state.clone().with_outputs(outputs));
                }
                Ok(_) => {}
                Err(ProviderError::NotFound(_)) => {
                    warn!(resource = %state.id, "no longer exists at the provider");
                    report.vanished.push(state.id.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(report)
    }

    /// Reads one resource, backing off on transient errors the same way
    /// provider calls during apply do.
    async fn read_with_retry(&self, state: &ResourceState) -> Result<AttributeMap, ProviderError> {
        let retry = &self.settings.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.read(state.id.kind, &state.provider_id).await {
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        resource = %state.id,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "transient error during refresh, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Values of every declared output, read from recorded state.
    pub async fn outputs(&mut self) -> Result<Vec<OutputValue>, TierformError> {
        self.store.load().await?;
        Ok(self
            .config
            .outputs
            .iter()
            .map(|decl| self.resolve_output(decl))
            .collect())
    }

    pub async fn output(&mut self, name: &str) -> Result<OutputValue, TierformError> {
        let decl = self
            .config
            .output(name)
            .ok_or_else(|| ConfigError::UnknownOutput(name.to_string()))?;
        self.store.load().await?;
        Ok(self.resolve_output(decl))
    }

    fn resolve_output(&self, decl: &OutputDeclaration) -> OutputValue {
        let value = decl.value.resolve(&|r: &Reference| {
            self.store
                .get(&r.target)
                .and_then(|s| s.outputs.get(&r.attribute))
                .cloned()
        });
        OutputValue {
            name: decl.name.clone(),
            value,
            description: decl.description.clone(),
        }
    }

    /// Resources grouped into the waves an apply from scratch would use.
    pub fn waves(&self) -> Result<Vec<Vec<ResourceId>>, TierformError> {
        Ok(self.graph.waves()?)
    }

    /// Outputs keyed by name, for machine-readable rendering.
    pub async fn output_map(
        &mut self,
    ) -> Result<BTreeMap<String, Option<serde_json::Value>>, TierformError> {
        Ok(self
            .outputs()
            .await?
            .into_iter()
            .map(|o| (o.name, o.value))
            .collect())
    }
}
