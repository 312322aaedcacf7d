// Cancelflow CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Talk to the worker service admin API over HTTP with reqwest.

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cancelflow")]
#[command(about = "Cancelflow CLI - Start, cancel and inspect cancellable workflow runs")]
#[command(version)]
pub struct Cli {
    /// Worker service base URL
    #[arg(
        long,
        env = "CANCELFLOW_API_URL",
        default_value = "http://localhost:9000"
    )]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a cancel workflow run
    Trigger {
        /// Workflow ID (generated if omitted)
        #[arg(long, short)]
        workflow_id: Option<String>,

        /// Let the long-running activity finish after this many heartbeats
        #[arg(long)]
        max_ticks: Option<u64>,
    },

    /// Request cancellation of a run
    Cancel {
        /// Workflow ID
        workflow_id: String,

        /// Reason recorded in the run history
        #[arg(long, short)]
        reason: Option<String>,
    },

    /// Show the latest run of a workflow
    Describe {
        /// Workflow ID
        workflow_id: String,
    },

    /// Show the event history of the latest run of a workflow
    History {
        /// Workflow ID
        workflow_id: String,
    },

    /// List runs, most recent first
    List {
        /// Filter by status
        #[arg(long, value_parser = ["running", "completed", "failed"])]
        status: Option<String>,

        /// Filter by workflow type
        #[arg(long)]
        workflow_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = client::Client::new(&cli.api_url);
    let output_format = output::OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Trigger {
            workflow_id,
            max_ticks,
        } => {
            commands::workflows::trigger(&client, output_format, cli.quiet, workflow_id, max_ticks)
                .await
        }
        Commands::Cancel {
            workflow_id,
            reason,
        } => {
            commands::workflows::cancel(&client, output_format, cli.quiet, &workflow_id, reason)
                .await
        }
        Commands::Describe { workflow_id } => {
            commands::workflows::describe(&client, output_format, &workflow_id).await
        }
        Commands::History { workflow_id } => {
            commands::workflows::history(&client, output_format, &workflow_id).await
        }
        Commands::List {
            status,
            workflow_type,
        } => commands::workflows::list(&client, output_format, status, workflow_type).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cancel() {
        let cli = Cli::parse_from(["cancelflow", "cancel", "wf-1", "--reason", "done"]);
        match cli.command {
            Commands::Cancel {
                workflow_id,
                reason,
            } => {
                assert_eq!(workflow_id, "wf-1");
                assert_eq!(reason.as_deref(), Some("done"));
            }
            _ => panic!("expected cancel command"),
        }
    }

    #[test]
    fn test_parse_trigger_with_output() {
        let cli = Cli::parse_from([
            "cancelflow",
            "--output",
            "json",
            "trigger",
            "--workflow-id",
            "wf-2",
            "--max-ticks",
            "10",
        ]);
        assert_eq!(cli.output, "json");
        match cli.command {
            Commands::Trigger {
                workflow_id,
                max_ticks,
            } => {
                assert_eq!(workflow_id.as_deref(), Some("wf-2"));
                assert_eq!(max_ticks, Some(10));
            }
            _ => panic!("expected trigger command"),
        }
    }
}
