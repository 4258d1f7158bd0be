use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tierform::config::{Configuration, Settings};
use tierform::executor::{Executor, Outcome, SkipReason};
use tierform::graph::DependencyGraph;
use tierform::plan::Action;
use tierform::providers::local::LocalProvider;
use tierform::resource::AttributeMap;
use tierform::schema::ResourceKind;
use tierform::{
    ConfigError, Engine, Mode, Provider, ProviderError, ResourceId, StateStore, TierformError,
};

/// Echoes inputs back as outputs, fails or hangs on request by resource name.
#[derive(Default)]
struct ScriptedProvider {
    serial: AtomicU64,
    fail: BTreeSet<String>,
    hang: BTreeSet<String>,
    hung: Notify,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn failing(names: &[&str]) -> Self {
        Self {
            fail: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    fn hanging(names: &[&str]) -> Self {
        Self {
            hang: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(
        &self,
        kind: ResourceKind,
        inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError> {
        let name = inputs["name"].as_str().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(format!("create {kind}.{name}"));
        if self.hang.contains(&name) {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }
        if self.fail.contains(&name) {
            return Err(ProviderError::Permanent(format!("quota exceeded for {name}")));
        }
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let mut outputs = inputs.clone();
        outputs.insert("id".to_string(), json!(format!("{kind}-{serial}")));
        outputs.insert("self_link".to_string(), json!(format!("{kind}/{name}")));
        Ok(outputs)
    }

    async fn read(&self, kind: ResourceKind, id: &str) -> Result<AttributeMap, ProviderError> {
        Err(ProviderError::Permanent(format!("read {kind} {id} not scripted")))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        _inputs: &AttributeMap,
    ) -> Result<AttributeMap, ProviderError> {
        Err(ProviderError::Permanent(format!("update {kind} {id} not scripted")))
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        self.calls.lock().unwrap().push(format!("delete {kind} {id}"));
        Ok(())
    }
}

fn parse(doc: &str) -> Configuration {
    Configuration::parse("main.toml", doc, Path::new("."), &BTreeMap::new()).unwrap()
}

fn no_refresh() -> Settings {
    Settings {
        refresh: false,
        ..Settings::default()
    }
}

fn id(s: &str) -> ResourceId {
    s.parse().unwrap()
}

const TWO_SUBTREES: &str = r#"
[resource.network.a]
name = "a"

[resource.subnetwork.a]
name = "subnet-a"
network = "${network.a.id}"
region = "europe-west1"
cidr = "10.0.0.0/24"

[resource.sql_instance.a]
name = "db-a"
database_version = "POSTGRES_15"
region = "europe-west1"
tier = "db-f1-micro"
network = "${subnetwork.a.self_link}"

[resource.sql_database.a]
name = "app-a"
instance = "${sql_instance.a.id}"

[resource.network.b]
name = "b"

[resource.subnetwork.b]
name = "subnet-b"
network = "${network.b.id}"
region = "europe-west1"
cidr = "10.1.0.0/24"

[resource.sql_instance.b]
name = "db-b"
database_version = "POSTGRES_15"
region = "europe-west1"
tier = "db-f1-micro"
network = "${subnetwork.b.self_link}"
"#;

#[tokio::test]
async fn test_failure_in_one_subtree_leaves_the_other_converged() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::failing(&["subnet-a"]));
    let mut engine = Engine::new(
        parse(TWO_SUBTREES),
        no_refresh(),
        provider.clone(),
        StateStore::new(dir.path(), "test"),
    )
    .unwrap();

    let run = engine.plan(Mode::Apply).await.unwrap();
    let result = engine.apply(run).await.unwrap();

    assert!(!result.is_success());
    assert_eq!(result.failed(), 1);
    assert_eq!(result.skipped(), 2);
    assert_eq!(result.converged(), 4);

    assert!(matches!(
        result.outcome(&id("subnetwork.a")),
        Some(Outcome::Failed(_))
    ));
    for skipped in ["sql_instance.a", "sql_database.a"] {
        assert!(
            matches!(
                result.outcome(&id(skipped)),
                Some(Outcome::Skipped(SkipReason::DependencyFailed(root))) if *root == id("subnetwork.a")
            ),
            "{skipped}"
        );
    }
    for converged in ["network.a", "network.b", "subnetwork.b", "sql_instance.b"] {
        assert!(matches!(
            result.outcome(&id(converged)),
            Some(Outcome::Converged)
        ));
        assert!(engine.store().get(&id(converged)).is_some());
    }
    assert!(!provider.calls().iter().any(|c| c.contains("db-a")));

    // The next plan retries only what did not converge.
    let run = engine.plan(Mode::Apply).await.unwrap();
    let summary = run.plan.summary();
    assert_eq!((summary.create, summary.unchanged), (3, 4));
    run.abandon().await.unwrap();
}

#[tokio::test]
async fn test_interrupted_apply_keeps_converged_sibling_only() {
    const SIBLINGS: &str = r#"
[resource.network.x]
name = "x"

[resource.network.y]
name = "y"
"#;
    let dir = tempfile::tempdir().unwrap();
    let config = parse(SIBLINGS);
    let graph = DependencyGraph::build(&config.declarations).unwrap();
    let plan = tierform::plan::plan(&graph, &config.declarations, &BTreeMap::new()).unwrap();

    let provider = Arc::new(ScriptedProvider::hanging(&["y"]));
    let settings = Settings {
        parallelism: 1,
        ..Settings::default()
    };
    let executor = Executor::new(provider.clone(), &settings);
    let mut store = StateStore::new(dir.path(), "test");
    store.load().await.unwrap();

    let handle = tokio::spawn(async move { executor.apply(&plan, &mut store).await });
    provider.hung.notified().await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    let mut reloaded = StateStore::new(dir.path(), "test");
    reloaded.load().await.unwrap();
    assert!(reloaded.get(&id("network.x")).is_some());
    assert!(reloaded.get(&id("network.y")).is_none());
    assert_eq!(reloaded.serial(), 1);
}

const THREE: &str = r#"
[resource.network.main]
name = "main"

[resource.sql_instance.database]
name = "database"
database_version = "POSTGRES_15"
region = "europe-west1"
tier = "db-f1-micro"
network = "${network.main.id}"

[resource.cache_instance.cache]
name = "cache"
tier = "BASIC"
memory_size_gb = 1
region = "europe-west1"
network = "${network.main.id}"
"#;

#[tokio::test]
async fn test_network_first_on_create_last_on_destroy() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(LocalProvider::in_memory());
    let mut engine = Engine::new(
        parse(THREE),
        Settings::default(),
        provider.clone(),
        StateStore::new(dir.path(), "test"),
    )
    .unwrap();

    let run = engine.plan(Mode::Apply).await.unwrap();
    let waves: Vec<Vec<ResourceId>> = run
        .plan
        .waves()
        .into_iter()
        .map(|w| w.into_iter().map(|i| run.plan.steps[i].id.clone()).collect())
        .collect();
    assert_eq!(waves[0], vec![id("network.main")]);
    let second: BTreeSet<_> = waves[1].iter().cloned().collect();
    assert_eq!(
        second,
        BTreeSet::from([id("sql_instance.database"), id("cache_instance.cache")])
    );
    assert!(engine.apply(run).await.unwrap().is_success());

    let run = engine.plan(Mode::Destroy).await.unwrap();
    let waves = run.plan.waves();
    assert_eq!(waves.len(), 2);
    assert_eq!(run.plan.steps[waves[1][0]].id, id("network.main"));
    assert!(engine.apply(run).await.unwrap().is_success());
    assert_eq!(provider.resource_count().await, 0);
}

#[tokio::test]
async fn test_removing_cache_destroys_only_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(LocalProvider::in_memory());
    let mut engine = Engine::new(
        parse(THREE),
        Settings::default(),
        provider.clone(),
        StateStore::new(dir.path(), "test"),
    )
    .unwrap();
    let run = engine.plan(Mode::Apply).await.unwrap();
    engine.apply(run).await.unwrap();

    let without_cache = THREE
        .split("[resource.cache_instance.cache]")
        .next()
        .unwrap();
    let mut engine = Engine::new(
        parse(without_cache),
        Settings::default(),
        provider.clone(),
        StateStore::new(dir.path(), "test"),
    )
    .unwrap();
    let run = engine.plan(Mode::Apply).await.unwrap();

    let changed: Vec<_> = run.plan.changes().filter(|s| s.action.is_change()).collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].id, id("cache_instance.cache"));
    assert_eq!(changed[0].action, Action::Destroy);
    assert_eq!(run.plan.action_for(&id("network.main")), Some(Action::NoOp));
    assert_eq!(
        run.plan.action_for(&id("sql_instance.database")),
        Some(Action::NoOp)
    );

    assert!(engine.apply(run).await.unwrap().is_success());
    assert_eq!(provider.resource_count().await, 2);
    assert!(engine.store().get(&id("cache_instance.cache")).is_none());
}

#[tokio::test]
async fn test_prevent_destroy_blocks_removal_and_releases_lock() {
    let protected = THREE.replace(
        "name = \"database\"",
        "name = \"database\"\nprevent_destroy = true",
    );
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(LocalProvider::in_memory());
    let mut engine = Engine::new(
        parse(&protected),
        Settings::default(),
        provider.clone(),
        StateStore::new(dir.path(), "test"),
    )
    .unwrap();
    let run = engine.plan(Mode::Apply).await.unwrap();
    engine.apply(run).await.unwrap();

    let err = engine.plan(Mode::Destroy).await.unwrap_err();
    assert!(matches!(
        err,
        TierformError::Config(ConfigError::PreventDestroy { .. })
    ));
    assert!(engine.store().lock_info().await.unwrap().is_none());

    // Still protected after the declaration disappears: the flag lives in state.
    let mut engine = Engine::new(
        parse("[resource.network.main]\nname = \"main\"\n"),
        Settings::default(),
        provider.clone(),
        StateStore::new(dir.path(), "test"),
    )
    .unwrap();
    assert!(matches!(
        engine.plan(Mode::Apply).await,
        Err(TierformError::Config(ConfigError::PreventDestroy { .. }))
    ));
    assert_eq!(provider.resource_count().await, 3);
}

#[test]
fn test_service_cannot_be_bound_to_its_own_identity() {
    const SERVICES: &str = r#"
[resource.compute_service.backend]
name = "backend"
region = "europe-west1"
image = "backend:1"

[resource.compute_service.frontend]
name = "frontend"
region = "europe-west1"
image = "frontend:1"
"#;
    let self_binding = format!(
        "{SERVICES}
[resource.invoker_binding.invoke]
service = \"${{compute_service.backend.id}}\"
member = \"${{compute_service.backend.service_account}}\"
"
    );
    let err = Configuration::parse("main.toml", &self_binding, Path::new("."), &BTreeMap::new())
        .unwrap_err();
    assert!(matches!(err, ConfigError::SelfInvokerBinding { .. }));

    let caller_binding = format!(
        "{SERVICES}
[resource.invoker_binding.invoke]
service = \"${{compute_service.backend.id}}\"
member = \"${{compute_service.frontend.service_account}}\"
"
    );
    let config = parse(&caller_binding);
    let graph = DependencyGraph::build(&config.declarations).unwrap();
    let binding = id("invoker_binding.invoke");
    let deps: BTreeSet<_> = graph.dependencies(&binding).into_iter().cloned().collect();
    assert_eq!(
        deps,
        BTreeSet::from([id("compute_service.backend"), id("compute_service.frontend")])
    );
}

#[test]
fn test_reference_cycle_is_rejected() {
    const CYCLE: &str = r#"
[resource.compute_service.a]
name = "a"
region = "europe-west1"
image = "a:1"
env = { PEER = "${compute_service.b.url}" }

[resource.compute_service.b]
name = "b"
region = "europe-west1"
image = "b:1"
env = { PEER = "${compute_service.a.url}" }
"#;
    let config = parse(CYCLE);
    let err = DependencyGraph::build(&config.declarations).unwrap_err();
    assert!(matches!(err, ConfigError::CyclicDependency { .. }));
}
