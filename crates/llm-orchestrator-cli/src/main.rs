// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! LLM Orchestrator CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use llm_orchestrator_benchmarks::{
    benchmarks::io::{write_raw_results, write_summary},
    run_all_benchmarks,
};
use llm_orchestrator_core::checkpoint::InMemoryCheckpointStore;
use llm_orchestrator_core::dag::Dag;
use llm_orchestrator_core::models::ModelRegistry;
use llm_orchestrator_core::providers::LLMProvider;
use llm_orchestrator_core::runner::{Runner, RunnerConfig};
use llm_orchestrator_core::step::{ProviderRegistry, StepCompiler};
use llm_orchestrator_core::tools::ToolRegistry;
use llm_orchestrator_core::trace::{FileSink, RotationPolicy, TraceEmitter};
use llm_orchestrator_core::workflow::WorkflowConfig;
use llm_orchestrator_core::WorkflowExecutor;
use llm_orchestrator_providers::{AnthropicProvider, OpenAIProvider};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "llm-orchestrator")]
#[command(version, about = "LLM Workflow Orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow definition
    Validate {
        /// Path to workflow file
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a workflow
    Run {
        /// Path to workflow file
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string or file
        #[arg(short, long)]
        input: Option<String>,

        /// Maximum concurrent steps
        #[arg(long, default_value = "4")]
        max_concurrency: usize,
    },

    /// Run the canonical benchmark suite
    Benchmark {
        /// Output directory for benchmark results
        #[arg(short, long, default_value = "benchmarks/output")]
        output: String,

        /// Output format: json, markdown, or both
        #[arg(short, long, default_value = "both")]
        format: String,

        /// Run benchmarks quietly (no progress output)
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() {
    // Load a `.env` file from the working directory or an ancestor,
    // before any provider credential probing (§4.2). Silently does
    // nothing if none is found.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("llm_orchestrator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Run {
            file,
            input,
            max_concurrency,
        } => run_workflow(&file, input.as_deref(), max_concurrency).await,
        Commands::Benchmark {
            output,
            format,
            quiet,
        } => run_benchmarks(&output, &format, quiet).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn validate_workflow(file_path: &str) -> Result<()> {
    info!("Validating workflow: {}", file_path);
    println!("{} {}", "Validating workflow:".cyan().bold(), file_path);

    // Read workflow file
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read workflow file: {}", file_path))?;

    // Parse workflow
    let workflow: WorkflowConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse workflow YAML: {}", file_path))?;

    info!("Parsed workflow: {} v{}", workflow.name, workflow.version);

    // Validate the data model: unique step names, known dependencies,
    // acyclic (modulo self-loops), sane loop bounds (§3, §4.5).
    workflow
        .validate()
        .with_context(|| "Workflow validation failed")?;

    // Compile the DAG to surface cycle/missing-dependency errors the
    // same way a real run would (§4.5).
    let dag = Dag::compile(&workflow).with_context(|| "Failed to compile workflow graph")?;

    println!("{}", "✓ Workflow is valid".green().bold());
    println!("  Name: {}", workflow.name);
    println!("  Version: {}", workflow.version);
    println!("  Steps: {}", workflow.steps.len());
    println!("  Graph nodes: {}", dag.len());

    Ok(())
}

async fn run_workflow(
    file_path: &str,
    input: Option<&str>,
    max_concurrency: usize,
) -> Result<()> {
    info!("Running workflow: {}", file_path);
    println!("{} {}", "Running workflow:".cyan().bold(), file_path);

    // Read workflow file
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read workflow file: {}", file_path))?;
    let workflow_name = Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string();

    // Parse input
    let inputs = if let Some(input_str) = input {
        parse_input(input_str)?
    } else {
        HashMap::new()
    };
    info!("Workflow inputs: {:?}", inputs);

    // Register whichever providers have credentials available (§4.2).
    let mut providers = ProviderRegistry::new();
    let mut any_provider = false;

    match OpenAIProvider::from_env() {
        Ok(openai) => {
            info!("Registered OpenAI provider");
            providers.register("openai", Arc::new(openai) as Arc<dyn LLMProvider>);
            any_provider = true;
        }
        Err(_) => info!("OpenAI provider not available (OPENAI_API_KEY not set)"),
    }

    match AnthropicProvider::from_env() {
        Ok(anthropic) => {
            info!("Registered Anthropic provider");
            providers.register("anthropic", Arc::new(anthropic) as Arc<dyn LLMProvider>);
            any_provider = true;
        }
        Err(_) => info!("Anthropic provider not available (ANTHROPIC_API_KEY not set)"),
    }

    if !any_provider {
        anyhow::bail!(
            "No LLM providers available. Please set OPENAI_API_KEY or ANTHROPIC_API_KEY environment variable."
        );
    }

    // Wire the runner façade: model registry + provider registry + tool
    // registry feed the step compiler, which the executor runs against
    // an in-memory checkpoint store and a stdout-less trace emitter.
    let compiler = Arc::new(StepCompiler::new(
        ModelRegistry::default(),
        providers,
        ToolRegistry::new(),
    ));
    // §6: a trace-enable env var switches on the file sink; a separate
    // capture-sensitive flag opts the emitter into shipping step outputs
    // rather than filtering them (§4.8).
    let mut trace = TraceEmitter::new()
        .with_capture_sensitive(env_flag("LLM_ORCHESTRATOR_CAPTURE_SENSITIVE"));
    if env_flag("LLM_ORCHESTRATOR_TRACE") {
        match FileSink::new(Path::new("trace.jsonl").to_path_buf(), RotationPolicy::SizeBased(10_000_000)) {
            Ok(sink) => trace = trace.with_sink(Arc::new(sink)),
            Err(error) => info!("failed to open trace file sink: {}", error),
        }
    }

    let executor = Arc::new(WorkflowExecutor::new(
        compiler,
        Arc::new(InMemoryCheckpointStore::new()),
        trace,
    ));
    let runner = Runner::new(executor, RunnerConfig::default().with_max_concurrency(max_concurrency));

    println!("{}", "Executing workflow...".cyan());

    let resolved = runner
        .run(&workflow_name, &content, inputs)
        .await
        .with_context(|| "Workflow execution failed")?;

    println!("{}", "✓ Workflow completed".green().bold());
    println!("\n{}", "Results:".cyan().bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&resolved.outputs)
            .unwrap_or_else(|_| format!("{:?}", resolved.outputs))
    );
    if !resolved.unresolved_required.is_empty() {
        println!(
            "{} {:?}",
            "⚠ Unresolved required outputs:".yellow().bold(),
            resolved.unresolved_required
        );
    }
    if !resolved.errors.is_empty() {
        println!("{} {:?}", "Errors:".red().bold(), resolved.errors);
    }

    // §6: a failed run is a non-zero exit; partial/success are not.
    if resolved.status == llm_orchestrator_core::runner::RunStatus::Failed {
        anyhow::bail!("workflow run failed: {}", resolved.errors.join("; "));
    }

    Ok(())
}

/// Truthy check for a boolean-shaped environment variable (§6's
/// trace-enable / capture-sensitive flags): unset or empty is `false`;
/// `0`/`false`/`no` (any case) is `false`; anything else is `true`.
fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => !matches!(value.to_ascii_lowercase().as_str(), "" | "0" | "false" | "no"),
        Err(_) => false,
    }
}

fn parse_input(input_str: &str) -> Result<HashMap<String, Value>> {
    // Check if input is a file path
    if Path::new(input_str).exists() {
        let content = fs::read_to_string(input_str)
            .with_context(|| format!("Failed to read input file: {}", input_str))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse input JSON from file: {}", input_str))
    } else {
        // Try to parse as JSON string
        serde_json::from_str(input_str)
            .with_context(|| "Failed to parse input JSON string")
    }
}

/// Runs the canonical benchmark suite.
async fn run_benchmarks(output_dir: &str, format: &str, quiet: bool) -> Result<()> {
    if !quiet {
        println!("{}", "Running LLM Orchestrator Benchmarks...".cyan().bold());
        println!();
    }

    info!("Starting benchmark suite");

    // Run all benchmarks
    let results = run_all_benchmarks().await;

    if !quiet {
        println!(
            "{} {} benchmarks",
            "✓ Completed".green().bold(),
            results.len()
        );
        println!();

        // Print summary
        for result in &results {
            let duration = result
                .metrics
                .get("duration_ms")
                .and_then(|v| v.as_f64())
                .map(|d| format!("{:.2}ms", d))
                .unwrap_or_else(|| "N/A".to_string());

            let ops = result
                .metrics
                .get("ops_per_sec")
                .and_then(|v| v.as_f64())
                .map(|o| format!("{:.0} ops/sec", o))
                .unwrap_or_else(|| "".to_string());

            println!(
                "  {} {} - {} {}",
                "●".green(),
                result.target_id.cyan(),
                duration,
                ops.dimmed()
            );
        }
        println!();
    }

    // Create output directory
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir))?;

    // Write output based on format
    let write_json = format == "json" || format == "both";
    let write_md = format == "markdown" || format == "both";

    if write_json {
        let paths = write_raw_results(&results, output_dir)
            .with_context(|| "Failed to write raw benchmark results")?;

        if !quiet {
            println!("{} JSON results written:", "✓".green().bold());
            for path in &paths {
                println!("  {}", path.dimmed());
            }
        }
    }

    if write_md {
        let summary_path = write_summary(&results, output_dir)
            .with_context(|| "Failed to write benchmark summary")?;

        if !quiet {
            println!(
                "{} Summary written: {}",
                "✓".green().bold(),
                summary_path.dimmed()
            );
        }
    }

    if !quiet {
        println!();
        println!("{}", "Benchmark suite completed successfully!".green().bold());
    }

    info!("Benchmark suite completed with {} results", results.len());

    Ok(())
}
