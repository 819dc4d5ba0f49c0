use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use marathon_rs::marathon::workflow::graph::StepGraph;
use marathon_rs::marathon::workflow::loader::WorkflowLoader;
use marathon_rs::marathon::{
    LogEmitter, Marathon, MarathonConfig, Payload, ShellScriptPreparer,
};

use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare a workflow and run it from one step until every branch finishes
    Run {
        /// Path to the workflow file
        #[arg(short, long)]
        file: String,

        /// Step to start from
        #[arg(short, long)]
        step: String,

        /// Initial context values as key=value (repeatable)
        #[arg(short, long = "payload", value_parser = parse_key_value)]
        payload: Vec<(String, String)>,

        /// Working directory for prepared steps (defaults to MARATHON_DIRECTORY or ./marathon)
        #[arg(short, long)]
        root: Option<String>,
    },
    /// Check a workflow file without preparing or running anything
    Validate {
        /// Path to the workflow file
        #[arg(short, long)]
        file: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let loader = WorkflowLoader::new();

    match args.command {
        Commands::Run {
            file,
            step,
            payload,
            root,
        } => {
            let def = loader
                .load_workflow(&file)
                .with_context(|| format!("loading workflow {}", file))?;

            let mut config = MarathonConfig::from_env();
            if let Some(root) = root {
                config.root_dir = root.into();
            }
            let engine = Marathon::init(&def, config, &ShellScriptPreparer::new()).await?;
            log::info!(
                "Prepared {} steps under {}",
                engine.graph().len(),
                engine.config().root_dir.display()
            );

            let payload: Payload = payload
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();

            let handle = engine.trigger(&step, payload, Arc::new(LogEmitter))?;
            println!("Running workflow {} as run {}", def.name, handle.run_id());

            let summary = tokio::select! {
                summary = handle.wait() => summary,
                _ = tokio::signal::ctrl_c() => {
                    handle.cancel();
                    handle.wait().await
                }
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Validate { file } => {
            let def = loader
                .load_workflow(&file)
                .with_context(|| format!("loading workflow {}", file))?;
            let graph = StepGraph::build(&def)?;
            println!(
                "Workflow {} is valid ({} steps)",
                graph.name(),
                graph.len()
            );
        }
    }

    Ok(())
}
