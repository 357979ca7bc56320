//! Copilot command line: chat with the browser agent, run one-off
//! instructions or plan an automation task.

mod config;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use agent_core::{CopilotRuntime, RuntimeHandle, RuntimeWorker};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use llm_router::LlmRouter;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{CopilotConfig, DEFAULT_CONFIG_PATH};

/// Command-line arguments for the copilot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the servers configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Response cache file, overriding `cachePath` from the config
    #[arg(long)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat with the browser agent
    Chat,
    /// Send one message and print the reply
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Run one self-contained instruction without chat history
    Task {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Clarify a task description interactively, then print a step plan
    Plan {
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let config = CopilotConfig::load(&args.config)?;
    let router = LlmRouter::new(config.api_key()?);
    let model = router
        .route(&config.routing_policy(args.cache.clone()))
        .context("failed to set up the language model")?;
    let mut runtime = CopilotRuntime::builder(model)
        .with_config(config.agent_config())
        .with_servers(config.mcp_servers.clone())
        .build();
    tracing::info!(
        servers = config.mcp_servers.len(),
        provider = ?config.provider,
        "starting copilot"
    );

    let outcome = match args.command {
        Commands::Chat => {
            runtime.initialize().await?;
            let (worker, handle) = RuntimeWorker::new(runtime, Handle::current());
            let worker = tokio::spawn(worker.run());
            tokio::task::spawn_blocking(move || chat_loop(handle))
                .await
                .context("chat loop panicked")??;
            runtime = worker.await.context("runtime worker panicked")?;
            Ok(())
        }
        Commands::Ask { text } => {
            let reply = runtime.process_message(&text.join(" ")).await;
            reply.map(|reply| println!("{reply}")).map_err(Into::into)
        }
        Commands::Task { text } => {
            let result = runtime.process_task(&text.join(" ")).await;
            result
                .map(|result| {
                    println!("{}", result.final_text);
                    tracing::debug!(context = %result.last_tool_context, "last tool result");
                })
                .map_err(Into::into)
        }
        Commands::Plan { description } => plan_dialogue(&mut runtime, &description.join(" ")).await,
    };

    if let Err(err) = runtime.shutdown().await {
        tracing::warn!(error = %err, "shutdown did not complete cleanly");
    }
    outcome
}

/// Reads lines on a blocking thread and hands them to the runtime worker.
fn chat_loop(handle: RuntimeHandle) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("Chat started. Type 'quit' or 'exit' to leave.");
    loop {
        print!("You: ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_ascii_lowercase().as_str(), "quit" | "exit") {
            break;
        }
        match handle.blocking_process_message(input) {
            Ok(reply) => println!("Assistant: {reply}"),
            Err(err) => println!("Assistant: request failed: {err}"),
        }
    }
    Ok(())
}

async fn plan_dialogue(runtime: &mut CopilotRuntime, description: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let planner = runtime.planner();

    let mut statements = vec![description.to_string()];
    let mut next = description.to_string();
    while planner.check_for_missing_information(&next).await? {
        println!("{}", planner.prepare_question()?);
        print!("Answer: ");
        io::stdout().flush()?;
        let Some(answer) = lines.next_line().await? else {
            anyhow::bail!("input closed before the plan was complete");
        };
        next = planner.process_answer(answer.trim()).await?;
        println!("Noted: {next}");
        statements.push(next.clone());
    }

    let full_description = statements.join("\n");
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    let name: String = description.chars().take(60).collect();
    let task = planner
        .prepare_plan(&format!("task-{created}"), &name, &full_description)
        .await?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}
