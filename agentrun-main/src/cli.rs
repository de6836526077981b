use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for agentrun
#[derive(Parser)]
#[command(name = "agentrun")]
#[command(about = "Run shells and coding agents behind managed sessions")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print raw events as JSON lines instead of rendering them
    #[arg(long, global = true)]
    pub json: bool,

    /// Orchestrator config file (TOML)
    #[arg(long, global = true, value_name = "PATH", env = "AGENTRUN_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a shell command to completion, sourcing the shell's rc file first
    Exec {
        /// Command line to run
        command: String,

        /// Shell to run it with (defaults to the configured shell)
        #[arg(long)]
        shell: Option<String>,

        /// Working directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Send a one-shot prompt to an agent and print its answer
    Ask {
        /// Agent name, e.g. claude
        agent: String,

        /// Prompt text
        prompt: String,

        /// Executable to run (defaults to the agent name)
        #[arg(long, value_name = "PATH")]
        bin: Option<String>,

        /// Extra argument for the agent, placed before the prompt (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Working directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Open an interactive shell session; stdin lines are sent to it
    Shell {
        /// Shell to start (defaults to the configured shell)
        #[arg(long)]
        shell: Option<String>,

        /// Working directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}
