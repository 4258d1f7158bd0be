use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tierform::resource::ResourceId;
use tierform::state::DEFAULT_WORKSPACE;

pub const DEFAULT_FILE: &str = "main.toml";

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Project directory holding the document and the `.tierform` state
    #[arg(long, global = true, default_value = ".")]
    pub dir: PathBuf,

    /// Root declaration document, relative to `--dir`
    #[arg(long, global = true, default_value = DEFAULT_FILE)]
    pub file: PathBuf,

    #[arg(long, global = true, env = "TIERFORM_WORKSPACE", default_value = DEFAULT_WORKSPACE)]
    pub workspace: String,

    #[arg(long, global = true, env = "TIERFORM_PROVIDER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Root variable value, repeatable
    #[arg(long = "var", global = true, value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    #[arg(long, global = true)]
    pub parallelism: Option<usize>,

    /// Read tracked resources from the provider before planning
    #[arg(long, global = true, value_name = "BOOL")]
    pub refresh: Option<bool>,

    /// Override the document's `[provider]` kind (`local` or `http`)
    #[arg(long, global = true)]
    pub provider: Option<String>,

    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    pub fn document_path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }

    /// Later `--var` flags win over earlier ones.
    pub fn variables(&self) -> BTreeMap<String, String> {
        self.vars.iter().cloned().collect()
    }
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the workspace state directory and an empty state
    Init,
    /// Parse the document and check schemas and references
    Validate,
    /// Show what apply would change
    Plan,
    /// Converge real resources towards the document
    Apply(ApproveArgs),
    /// Delete every tracked resource
    Destroy(ApproveArgs),
    /// Print declared output values
    Output(OutputArgs),
    /// Print the dependency tree
    Graph,
    /// Inspect or edit recorded state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    /// Remove a lock left behind by an interrupted run
    ForceUnlock,
    /// Describe resource types and their attributes
    Schema(SchemaArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApproveArgs {
    /// Skip the confirmation prompt
    #[arg(long)]
    pub auto_approve: bool,
}

#[derive(clap::Args, Debug)]
pub struct OutputArgs {
    pub name: Option<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    List,
    Show { id: ResourceId },
    /// Forget a resource without deleting it at the provider
    Rm { id: ResourceId },
}

#[derive(clap::Args, Debug)]
pub struct SchemaArgs {
    #[arg(value_name = "TYPE")]
    pub resource_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use tierform::schema::ResourceKind;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["tierform", "plan"]);
        assert_eq!(cli.global.dir, PathBuf::from("."));
        assert_eq!(cli.global.document_path(), PathBuf::from("./main.toml"));
        assert!(cli.global.vars.is_empty());
        assert!(cli.global.refresh.is_none());
        assert!(matches!(cli.command, Command::Plan));
    }

    #[test]
    fn test_apply_auto_approve() {
        let cli = Cli::parse_from(["tierform", "apply", "--auto-approve"]);
        if let Command::Apply(args) = cli.command {
            assert!(args.auto_approve);
        } else {
            panic!("Expected Apply command, got {:?}", cli.command);
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "tierform",
            "destroy",
            "--dir=demo",
            "--parallelism=4",
            "--refresh=false",
            "--var",
            "region=europe-west1",
            "--var=tier=db-f1-micro",
        ]);
        assert_eq!(cli.global.dir, PathBuf::from("demo"));
        assert_eq!(cli.global.parallelism, Some(4));
        assert_eq!(cli.global.refresh, Some(false));
        let vars = cli.global.variables();
        assert_eq!(vars["region"], "europe-west1");
        assert_eq!(vars["tier"], "db-f1-micro");
    }

    #[test]
    fn test_var_without_equals_rejected() {
        assert!(Cli::try_parse_from(["tierform", "plan", "--var", "region"]).is_err());
        assert!(Cli::try_parse_from(["tierform", "plan", "--var", "=x"]).is_err());
    }

    #[test]
    fn test_var_value_may_contain_equals() {
        assert_eq!(
            parse_var("labels=a=b").unwrap(),
            ("labels".to_string(), "a=b".to_string())
        );
    }

    #[test]
    fn test_state_show_parses_resource_id() {
        let cli = Cli::parse_from(["tierform", "state", "show", "module.data.sql_instance.db"]);
        if let Command::State {
            command: StateCommand::Show { id },
        } = cli.command
        {
            assert_eq!(id.kind, ResourceKind::SqlInstance);
            assert_eq!(id.to_string(), "module.data.sql_instance.db");
        } else {
            panic!("Expected State Show command, got {:?}", cli.command);
        }
    }

    #[test]
    fn test_state_rm_rejects_malformed_id() {
        assert!(Cli::try_parse_from(["tierform", "state", "rm", "nonsense"]).is_err());
    }

    #[test]
    fn test_output_name_and_json() {
        let cli = Cli::parse_from(["tierform", "output", "url", "--json"]);
        if let Command::Output(args) = cli.command {
            assert_eq!(args.name.as_deref(), Some("url"));
            assert!(args.json);
        } else {
            panic!("Expected Output command, got {:?}", cli.command);
        }
    }

    #[test]
    #[serial]
    fn test_workspace_and_token_from_env() {
        let workspace_backup = std::env::var("TIERFORM_WORKSPACE").ok();
        let token_backup = std::env::var("TIERFORM_PROVIDER_TOKEN").ok();
        unsafe {
            std::env::set_var("TIERFORM_WORKSPACE", "staging");
            std::env::set_var("TIERFORM_PROVIDER_TOKEN", "env_token");
        }

        let cli = Cli::parse_from(["tierform", "plan"]);

        unsafe {
            match workspace_backup {
                Some(ws) => std::env::set_var("TIERFORM_WORKSPACE", ws),
                None => std::env::remove_var("TIERFORM_WORKSPACE"),
            }
            match token_backup {
                Some(token) => std::env::set_var("TIERFORM_PROVIDER_TOKEN", token),
                None => std::env::remove_var("TIERFORM_PROVIDER_TOKEN"),
            }
        }

        assert_eq!(cli.global.workspace, "staging");
        assert_eq!(cli.global.token, Some("env_token".to_string()));
    }

    #[test]
    #[serial]
    fn test_no_env_uses_default_workspace() {
        let workspace_backup = std::env::var("TIERFORM_WORKSPACE").ok();
        let token_backup = std::env::var("TIERFORM_PROVIDER_TOKEN").ok();
        unsafe {
            std::env::remove_var("TIERFORM_WORKSPACE");
            std::env::remove_var("TIERFORM_PROVIDER_TOKEN");
        }

        let cli = Cli::parse_from(["tierform", "plan"]);

        unsafe {
            if let Some(ws) = workspace_backup {
                std::env::set_var("TIERFORM_WORKSPACE", ws);
            }
            if let Some(token) = token_backup {
                std::env::set_var("TIERFORM_PROVIDER_TOKEN", token);
            }
        }

        assert_eq!(cli.global.workspace, DEFAULT_WORKSPACE);
        assert!(cli.global.token.is_none());
    }

    #[test]
    #[serial]
    fn test_token_flag_takes_precedence_over_env() {
        let token_backup = std::env::var("TIERFORM_PROVIDER_TOKEN").ok();
        unsafe {
            std::env::set_var("TIERFORM_PROVIDER_TOKEN", "env_token");
        }

        let cli = Cli::parse_from(["tierform", "apply", "--token=cli_token"]);

        unsafe {
            match token_backup {
                Some(token) => std::env::set_var("TIERFORM_PROVIDER_TOKEN", token),
                None => std::env::remove_var("TIERFORM_PROVIDER_TOKEN"),
            }
        }

        assert_eq!(cli.global.token, Some("cli_token".to_string()));
    }
}
