use anyhow::{Context, Result};
use colored::Colorize;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use clap::Parser;

use agentrun_terminal::{OrchestratorConfig, ProcessConfig, ProcessEvent, ProcessOrchestrator};
use agentrun_types::UNKNOWN_EXIT_CODE;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let code = match cli.command {
        Commands::Exec { command, shell, cwd } => {
            let cwd = resolve_cwd(cwd)?;
            let shell = config.resolve_shell(shell.as_deref());
            run_exec(config, &command, &cwd, &shell, cli.json).await?
        }
        Commands::Ask { agent, prompt, bin, args, cwd } => {
            let cwd = resolve_cwd(cwd)?;
            let bin = bin.unwrap_or_else(|| agent.clone());
            let session_id = format!("ask-{}", Uuid::new_v4());
            let process = ProcessConfig::agent(&session_id, agent, bin, cwd)
                .with_args(args)
                .with_prompt(prompt);
            run_ask(config, process, cli.json).await?
        }
        Commands::Shell { shell, cwd } => {
            let cwd = resolve_cwd(cwd)?;
            let session_id = format!("shell-{}", Uuid::new_v4());
            let mut process = ProcessConfig::terminal(&session_id, cwd);
            process.shell = shell;
            run_shell(config, process, cli.json).await?
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => OrchestratorConfig::load_from_file(path)?,
        None => OrchestratorConfig::default(),
    };
    config.apply_env()
}

fn resolve_cwd(cwd: Option<PathBuf>) -> Result<PathBuf> {
    match cwd {
        Some(cwd) => Ok(cwd),
        None => env::current_dir().context("Failed to determine current directory"),
    }
}

async fn run_exec(config: OrchestratorConfig, command: &str, cwd: &Path, shell: &str, json: bool) -> Result<i32> {
    let (orchestrator, rx) = ProcessOrchestrator::new(config);
    let session_id = format!("exec-{}", Uuid::new_v4());

    let printer = tokio::spawn(print_events(rx, session_id.clone(), json));
    let code = orchestrator.run_command(&session_id, command, cwd, shell).await;
    printer.await??;
    Ok(code)
}

async fn run_ask(config: OrchestratorConfig, process: ProcessConfig, json: bool) -> Result<i32> {
    let (orchestrator, rx) = ProcessOrchestrator::new(config);
    let session_id = process.session_id.clone();

    orchestrator.spawn(process).await?;
    print_events(rx, session_id, json).await
}

async fn run_shell(config: OrchestratorConfig, process: ProcessConfig, json: bool) -> Result<i32> {
    let (orchestrator, rx) = ProcessOrchestrator::new(config);
    let session_id = process.session_id.clone();

    orchestrator.spawn(process).await?;
    let mut printer = tokio::spawn(print_events(rx, session_id.clone(), json));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            result = &mut printer => return result?,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !orchestrator.write(&session_id, &format!("{}\n", line)) {
                        log::warn!("[{}] input not delivered", session_id);
                    }
                }
                None => {
                    orchestrator.kill(&session_id);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                orchestrator.interrupt(&session_id);
            }
        }
    }

    printer.await?
}

/// Print events until the session's final event, returning its exit code
async fn print_events(mut rx: UnboundedReceiver<ProcessEvent>, session_id: String, json: bool) -> Result<i32> {
    while let Some(event) = rx.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            render_event(&event)?;
        }

        if event.session_id() == session_id {
            match event {
                ProcessEvent::Exit { code, .. } | ProcessEvent::CommandExit { code, .. } => return Ok(code),
                _ => {}
            }
        }
    }
    Ok(UNKNOWN_EXIT_CODE)
}

fn render_event(event: &ProcessEvent) -> Result<()> {
    match event {
        ProcessEvent::Data { text, .. } => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()?;
        }
        ProcessEvent::Stderr { text, .. } => {
            eprint!("{}", text.red());
        }
        ProcessEvent::Error { message, .. } => {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
        ProcessEvent::SessionId { captured_id, .. } => {
            eprintln!("\n{} {}", "session:".dimmed(), captured_id.cyan());
        }
        ProcessEvent::Exit { code, .. } | ProcessEvent::CommandExit { code, .. } => {
            if *code != 0 {
                eprintln!("{}", format!("exited with code {}", code).yellow());
            }
        }
    }
    Ok(())
}
