//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{agents::AgentsArgs, run::RunArgs, validate::ValidateArgs};

#[derive(Parser, Debug)]
#[command(name = "taskmesh")]
#[command(about = "Taskmesh - capability-routed task scheduler", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to .taskmesh/config.yaml and .taskmesh/local.yaml)
    #[arg(short, long, global = true, env = "TASKMESH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the agents in the registry
    Agents(AgentsArgs),

    /// Validate configuration and the agent registry
    Validate(ValidateArgs),

    /// Submit tasks from a file and run them to completion
    Run(RunArgs),
}

/// Report a command error and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from([
            "taskmesh", "run", "--tasks", "tasks.yaml", "--timeout", "5", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.tasks, PathBuf::from("tasks.yaml"));
                assert_eq!(args.timeout, 5);
                assert!(args.registry.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_agents_registry_override() {
        let cli = Cli::try_parse_from(["taskmesh", "agents", "--registry", "a.yaml"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Agents(AgentsArgs { registry: Some(ref p) }) if p == &PathBuf::from("a.yaml")
        ));
    }
}
