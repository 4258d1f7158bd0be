use std::process::ExitCode;

use color_eyre::eyre::{Result, eyre};
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tierform::config::{
    Configuration, ProviderConfig, Settings, SettingsOverlay, load_user_settings, user_config_path,
};
use tierform::engine::{Engine, Mode, RefreshReport};
use tierform::executor::Outcome;
use tierform::graph::DependencyGraph;
use tierform::output::{
    graph_tree, output_value, outputs_table, plan_table, result_table, schema_table,
    schemas_table, state_table,
};
use tierform::plan::Plan;
use tierform::providers::{ProviderError, get_provider, provider_config};
use tierform::resource::ResourceId;
use tierform::schema::SchemaRegistry;
use tierform::state::StateStore;

use super::args::{Cli, Command, GlobalArgs, OutputArgs, StateCommand};

/// Plan-only run with pending changes, or an apply with failed or skipped resources.
const EXIT_INCOMPLETE: u8 = 1;

pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<ExitCode> {
    let global = &cli.global;
    match cli.command {
        Command::Init => init(global).await,
        Command::Validate => validate(global),
        Command::Plan => plan(global, cancel).await,
        Command::Apply(args) => converge(global, Mode::Apply, args.auto_approve, cancel).await,
        Command::Destroy(args) => converge(global, Mode::Destroy, args.auto_approve, cancel).await,
        Command::Output(args) => output(global, args, cancel).await,
        Command::Graph => graph(global),
        Command::State { command } => state(global, command).await,
        Command::ForceUnlock => force_unlock(global).await,
        Command::Schema(args) => schema(args.resource_type.as_deref()),
    }
}

fn user_settings() -> Result<SettingsOverlay> {
    match user_config_path() {
        Some(path) => Ok(load_user_settings(&path)?),
        None => Ok(SettingsOverlay::default()),
    }
}

/// Defaults, then the user file, then the document, then flags.
fn layered_settings(
    global: &GlobalArgs,
    user: &SettingsOverlay,
    document: &SettingsOverlay,
) -> Settings {
    let mut settings = Settings::default()
        .with_overlay(user)
        .with_overlay(document);
    if let Some(parallelism) = global.parallelism {
        settings.parallelism = parallelism;
    }
    if let Some(refresh) = global.refresh {
        settings.refresh = refresh;
    }
    settings
}

fn resolve_provider(
    global: &GlobalArgs,
    declared: &ProviderConfig,
) -> Result<ProviderConfig, ProviderError> {
    match (&global.provider, declared) {
        (Some(name), _) => provider_config(name, global.endpoint.clone()),
        (None, ProviderConfig::Http { .. }) if global.endpoint.is_some() => {
            provider_config("http", global.endpoint.clone())
        }
        (None, declared) => Ok(declared.clone()),
    }
}

fn load_configuration(global: &GlobalArgs) -> Result<Configuration> {
    let path = global.document_path();
    Ok(Configuration::load(&path, &global.variables())?)
}

fn build_engine(global: &GlobalArgs, cancel: CancellationToken) -> Result<Engine> {
    let config = load_configuration(global)?;
    let settings = layered_settings(global, &user_settings()?, &config.settings);
    let store = StateStore::new(&global.dir, &global.workspace);
    let provider_config = resolve_provider(global, &config.provider)?;
    let provider = get_provider(&provider_config, global.token.clone(), store.dir())?;
    debug!(provider = provider.name(), workspace = %global.workspace, "engine ready");
    Ok(Engine::new(config, settings, provider, store)?.with_cancellation(cancel))
}

async fn confirm_proceed(prompt: &'static str) -> Result<bool> {
    let answer = tokio::task::spawn_blocking(move || {
        Confirm::new().with_prompt(prompt).default(false).interact()
    })
    .await??;
    Ok(answer)
}

fn print_plan(plan: &Plan) {
    if plan.has_changes() {
        println!("{}\n{}", plan_table(plan), plan.summary());
    } else {
        print!("{plan}");
    }
}

fn report_refresh(refresh: &RefreshReport) {
    for state in &refresh.drifted {
        println!("Note: {} changed outside tierform", state.id);
    }
    for id in &refresh.vanished {
        println!("Note: {id} no longer exists and will be recreated");
    }
    if !refresh.is_empty() {
        println!();
    }
}

async fn init(global: &GlobalArgs) -> Result<ExitCode> {
    let mut store = StateStore::new(&global.dir, &global.workspace);
    if store.initialize().await? {
        println!(
            "Initialized empty state for workspace '{}' at {}",
            global.workspace,
            store.state_path().display()
        );
    } else {
        println!(
            "Workspace '{}' is already initialized (serial {})",
            global.workspace,
            store.serial()
        );
    }
    let document = global.document_path();
    if !document.exists() {
        println!("No document at {} yet", document.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(global: &GlobalArgs) -> Result<ExitCode> {
    let config = load_configuration(global)?;
    layered_settings(global, &user_settings()?, &config.settings).validate()?;
    let graph = DependencyGraph::build(&config.declarations)?;
    println!(
        "The configuration is valid: {} resources, {} outputs, {} waves.",
        config.declarations.len(),
        config.outputs.len(),
        graph.waves()?.len()
    );
    Ok(ExitCode::SUCCESS)
}

async fn plan(global: &GlobalArgs, cancel: CancellationToken) -> Result<ExitCode> {
    let mut engine = build_engine(global, cancel)?;
    let run = engine.plan(Mode::Apply).await?;
    report_refresh(&run.refresh);
    print_plan(&run.plan);
    let has_changes = run.plan.has_changes();
    run.abandon().await?;
    Ok(if has_changes {
        ExitCode::from(EXIT_INCOMPLETE)
    } else {
        ExitCode::SUCCESS
    })
}

async fn converge(
    global: &GlobalArgs,
    mode: Mode,
    auto_approve: bool,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let mut engine = build_engine(global, cancel)?;
    let run = engine.plan(mode).await?;
    report_refresh(&run.refresh);
    print_plan(&run.plan);

    if !run.plan.has_changes() {
        run.abandon().await?;
        return Ok(ExitCode::SUCCESS);
    }
    if !auto_approve {
        let prompt = match mode {
            Mode::Apply => "Apply these changes?",
            Mode::Destroy => "Destroy every tracked resource?",
        };
        if !confirm_proceed(prompt).await? {
            run.abandon().await?;
            println!("Nothing was changed.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    let result = engine.apply(run).await?;
    println!("{}", result_table(&result));
    for step in &result.steps {
        if let Outcome::Failed(err) = &step.outcome {
            eprintln!("Error: {} ({}): {err}", step.id, step.action);
        }
    }
    println!("{result}");

    if mode == Mode::Apply && result.is_success() {
        let outputs = engine.outputs().await?;
        if !outputs.is_empty() {
            println!("\nOutputs:\n{}", outputs_table(&outputs));
        }
    }
    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    })
}

async fn output(
    global: &GlobalArgs,
    args: OutputArgs,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let mut engine = build_engine(global, cancel)?;
    match args.name {
        Some(name) => {
            let value = engine.output(&name).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&value.value)?);
            } else {
                println!("{}", output_value(&value));
            }
        }
        None if args.json => {
            println!("{}", serde_json::to_string_pretty(&engine.output_map().await?)?);
        }
        None => {
            let outputs = engine.outputs().await?;
            if outputs.is_empty() {
                println!("No outputs declared.");
            } else {
                println!("{}", outputs_table(&outputs));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn graph(global: &GlobalArgs) -> Result<ExitCode> {
    let config = load_configuration(global)?;
    let graph = DependencyGraph::build(&config.declarations)?;
    println!("{}", graph_tree(&graph, &global.workspace));
    Ok(ExitCode::SUCCESS)
}

async fn state(global: &GlobalArgs, command: StateCommand) -> Result<ExitCode> {
    let mut store = StateStore::new(&global.dir, &global.workspace);
    match command {
        StateCommand::List => {
            store.load().await?;
            if store.document().resources.is_empty() {
                println!("No resources tracked in workspace '{}'.", global.workspace);
            } else {
                println!("{}", state_table(store.resources()));
                println!("Serial: {}", store.serial());
            }
        }
        StateCommand::Show { id } => {
            store.load().await?;
            let state = store
                .get(&id)
                .ok_or_else(|| eyre!("{id} is not tracked in workspace '{}'", global.workspace))?;
            println!("{}", serde_json::to_string_pretty(state)?);
        }
        StateCommand::Rm { id } => remove_from_state(global, &mut store, &id).await?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn remove_from_state(
    global: &GlobalArgs,
    store: &mut StateStore,
    id: &ResourceId,
) -> Result<()> {
    let settings = layered_settings(global, &user_settings()?, &SettingsOverlay::default());
    let lock = store.lock("state rm", settings.lock_stale_after).await?;
    store.load().await?;
    let removed = store.remove(id).await;
    lock.release().await?;
    let removed = removed?;
    println!(
        "Removed {} ({}) from state; the resource itself was left untouched.",
        removed.id, removed.provider_id
    );
    Ok(())
}

async fn force_unlock(global: &GlobalArgs) -> Result<ExitCode> {
    let store = StateStore::new(&global.dir, &global.workspace);
    let info = store.force_unlock().await?;
    println!(
        "Removed lock held by {} (pid {}, {}) since {}",
        info.holder, info.pid, info.operation, info.acquired_at
    );
    Ok(ExitCode::SUCCESS)
}

fn schema(resource_type: Option<&str>) -> Result<ExitCode> {
    let registry = SchemaRegistry::builtin();
    match resource_type {
        Some(name) => println!("{}", schema_table(registry.lookup(name)?)),
        None => println!("{}", schemas_table(&registry)),
    }
    Ok(ExitCode::SUCCESS)
}
