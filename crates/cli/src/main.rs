mod config;
mod progress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use codeloop_core::{ExecutionRequest, ExecutionResult};
use colored::Colorize;
use events::EventBus;
use orchestrator::{
    ChatCompletionProvider, ConvergenceOrchestrator, FallbackProvider, OrchestrationReport,
    OrderedEventEmitter, SynthesisProvider,
};
use sandbox::{ExecutionSession, PythonLauncher, RuntimeLauncher, RuntimeManager};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use config::{project_config_path, CodeloopConfig, CODELOOP_DIR, CONFIG_FILE};

#[derive(Parser)]
#[command(name = "codeloop")]
#[command(about = "Generate, execute, diagnose and repair code until its tests pass", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write .codeloop/config.toml with default settings
    Init,
    /// Turn a specification file into verified code
    Run {
        spec: PathBuf,

        #[arg(long)]
        max_iterations: Option<u32>,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        model: Option<String>,

        /// Run the enrichment step on the verified artifact
        #[arg(long)]
        visualize: bool,

        /// Print the full report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Run one candidate file against one tests file in the sandbox
    Exec {
        candidate: PathBuf,
        tests: PathBuf,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        json: bool,
    },
    /// Check that the guest runtime can start
    Doctor,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let cwd = std::env::current_dir()?;
    match cli.command {
        Commands::Init => init_project(cwd).await,
        Commands::Run {
            spec,
            max_iterations,
            timeout_ms,
            model,
            visualize,
            json,
        } => {
            let (mut config, _) = CodeloopConfig::discover(&cwd)?;
            if let Some(max_iterations) = max_iterations {
                config.orchestrator.max_iterations = max_iterations;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.execution.run_timeout_ms = timeout_ms;
            }
            if let Some(model) = model {
                config.provider.primary_model = model;
            }
            config.orchestrator.visualize |= visualize;
            run(&config, spec, json).await
        }
        Commands::Exec {
            candidate,
            tests,
            timeout_ms,
            json,
        } => {
            let (mut config, _) = CodeloopConfig::discover(&cwd)?;
            if let Some(timeout_ms) = timeout_ms {
                config.execution.run_timeout_ms = timeout_ms;
            }
            exec(&config, candidate, tests, json).await
        }
        Commands::Doctor => doctor(cwd).await,
    }
}

async fn init_project(cwd: PathBuf) -> Result<ExitCode> {
    let config_path = project_config_path(&cwd);

    if config_path.exists() {
        println!("Project already initialized at {}", config_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    CodeloopConfig::default().save(&config_path)?;

    println!();
    println!("Initialized codeloop in {}", cwd.display());
    println!();
    println!("Created:");
    println!("  {}/", CODELOOP_DIR);
    println!("  └── {}", CONFIG_FILE);
    println!();
    println!("Next steps:");
    println!("  1. export {}=...", CodeloopConfig::default().provider.api_key_env);
    println!("  2. codeloop doctor");
    println!("  3. codeloop run <SPEC_FILE>");

    Ok(ExitCode::SUCCESS)
}

fn build_session(config: &CodeloopConfig) -> Arc<ExecutionSession> {
    Arc::new(sandbox::python_session(
        config.python_runtime(),
        config.session(),
    ))
}

fn build_provider(config: &CodeloopConfig) -> Result<Arc<ChatCompletionProvider>> {
    let primary = ChatCompletionProvider::new(config.provider(&config.provider.primary_model)?)
        .context("Failed to create synthesis provider")?;
    Ok(Arc::new(primary))
}

async fn run(config: &CodeloopConfig, spec: PathBuf, json: bool) -> Result<ExitCode> {
    let specification = tokio::fs::read_to_string(&spec)
        .await
        .with_context(|| format!("Failed to read specification {}", spec.display()))?;

    let primary = build_provider(config)?;
    let provider: Arc<dyn SynthesisProvider> = match &config.provider.fallback_model {
        Some(fallback_model) => {
            let secondary = ChatCompletionProvider::new(config.provider(fallback_model)?)
                .context("Failed to create fallback provider")?;
            Arc::new(FallbackProvider::new(primary.clone(), Arc::new(secondary)))
        }
        None => primary.clone(),
    };

    let bus = EventBus::new();
    let run_id = Uuid::new_v4();
    let renderer = progress::spawn(bus.subscribe_run(run_id), json);

    let orchestrator =
        ConvergenceOrchestrator::new(build_session(config), provider, config.convergence())
            .with_enricher(primary)
            .with_event_emitter(OrderedEventEmitter::new(bus));

    let report = orchestrator.run_with_id(run_id, &specification).await;
    drop(orchestrator);
    if let Err(e) = renderer.await {
        tracing::debug!(error = %e, "Progress renderer stopped");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_report(report: &OrchestrationReport) {
    println!();
    match (&report.artifact, report.is_completed()) {
        (Some(artifact), true) => {
            println!(
                "{} after {} iteration(s)",
                "Verified".green().bold(),
                report.iterations()
            );
            if !artifact.candidate.explanation.is_empty() {
                println!();
                println!("{}", artifact.candidate.explanation);
            }
            println!();
            println!("{}", "── code ──".dimmed());
            println!("{}", artifact.candidate.code.trim_end());
            println!("{}", "── tests ──".dimmed());
            println!("{}", artifact.candidate.tests.trim_end());
            print_variables(&artifact.result);
            if let Some(enrichment) = &artifact.enrichment {
                println!();
                println!("{}", enrichment.trim_end());
            }
        }
        _ => {
            println!(
                "{} after {} iteration(s)",
                "Failed".red().bold(),
                report.iterations()
            );
            if let Some(cause) = &report.cause {
                println!();
                println!("{}", "── last logs ──".dimmed());
                println!("{}", cause.trim_end());
            }
        }
    }
}

fn print_variables(result: &ExecutionResult) {
    if result.variables.is_empty() {
        return;
    }
    println!("{}", "── variables ──".dimmed());
    for variable in &result.variables {
        println!(
            "  {} {} = {}",
            variable.name.bold(),
            format!("({})", variable.type_name).dimmed(),
            variable.preview
        );
    }
}

async fn exec(
    config: &CodeloopConfig,
    candidate: PathBuf,
    tests: PathBuf,
    json: bool,
) -> Result<ExitCode> {
    let candidate_source = tokio::fs::read_to_string(&candidate)
        .await
        .with_context(|| format!("Failed to read {}", candidate.display()))?;
    let test_source = tokio::fs::read_to_string(&tests)
        .await
        .with_context(|| format!("Failed to read {}", tests.display()))?;

    let session = build_session(config);
    let result = session
        .run(&ExecutionRequest::new(candidate_source, test_source))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !result.logs.is_empty() {
            println!("{}", result.logs.trim_end());
        }
        print_variables(&result);
        let verdict = if result.passed {
            "PASSED".green().bold()
        } else {
            "FAILED".red().bold()
        };
        match &result.failure {
            Some(kind) => println!("{} ({}, {}ms)", verdict, kind.as_str(), result.duration_ms),
            None => println!("{} ({}ms)", verdict, result.duration_ms),
        }
    }

    Ok(if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn doctor(cwd: PathBuf) -> Result<ExitCode> {
    let (config, path) = CodeloopConfig::discover(&cwd)?;
    match &path {
        Some(path) => println!("Config:       {}", path.display()),
        None => println!("Config:       defaults (run 'codeloop init' to create one)"),
    }

    let runtime = config.python_runtime();
    let interpreter = runtime
        .resolve_interpreter()
        .context("No usable Python interpreter")?;
    println!("Interpreter:  {}", interpreter.display());
    println!("Preload:      {}", runtime.preload_modules.join(", "));

    let launcher: Arc<dyn RuntimeLauncher> = Arc::new(PythonLauncher::new(runtime));
    let manager = Arc::new(RuntimeManager::new(launcher));
    let guest = manager
        .ensure_ready()
        .await
        .context("Guest runtime failed to start")?;
    println!("Runtime:      {} ({})", guest.describe(), "ready".green());

    let session = ExecutionSession::new(Arc::clone(&manager), config.session());
    let probe = session
        .run(&ExecutionRequest::new("probe = 6 * 7", "assert probe == 42"))
        .await?;
    if !probe.passed {
        bail!("Probe run failed:\n{}", probe.logs);
    }
    println!("Probe run:    {} ({}ms)", "passed".green(), probe.duration_ms);

    match std::env::var(&config.provider.api_key_env) {
        Ok(_) => println!("Provider key: {} is set", config.provider.api_key_env),
        Err(_) => println!(
            "Provider key: {} ({} is not set)",
            "missing".yellow(),
            config.provider.api_key_env
        ),
    }

    manager.invalidate("doctor finished").await;
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codeloop=info,orchestrator=info,sandbox=info".into()),
        )
        .init();
}
