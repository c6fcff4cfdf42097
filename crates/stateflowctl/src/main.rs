//! Stateflow command line tool.
//!
//! Runs the workflow engine over a JSON data file, lints rule documents and
//! evaluates a single rule against a single subject.

mod report;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stateflow_engine::{
    parse_rule_file, BufferedLog, EngineConfig, FailurePolicy, FileRuleSource, LogLevel,
    LogSource, MemoryEntityStore, MemorySubjectRepository, ProcessLog, StepInterpreter,
    TracingLog, Value, VariableContext, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "stateflow")]
#[command(version, about = "Stateflow rule-driven workflow engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Advance every subject in a data file through the workflow
    ///
    /// Settings not given as flags come from STATEFLOW_* environment
    /// variables (a .env file is honored).
    ///
    /// Examples:
    ///     stateflow run --data demos/data.json --rules demos/rules
    ///     stateflow run -d data.json --policy isolate --output out.json
    #[command(verbatim_doc_comment)]
    Run {
        /// JSON data file: {"<EntityKind>": [records...]}
        #[arg(short, long)]
        data: PathBuf,

        /// Directory holding the rule documents
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Ordered workflow states, comma separated (last one is terminal)
        #[arg(long, value_delimiter = ',')]
        states: Option<Vec<String>>,

        /// What to do when a rule run fails: fail_fast or isolate
        #[arg(long)]
        policy: Option<FailurePolicy>,

        /// Write the updated data here instead of back into --data
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for the saved run log
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Abort the batch after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Parse rule documents and report undefined step references
    Check {
        /// Rule files (.json, .yaml or .yml)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run one rule against one subject and print the result as JSON
    Eval {
        /// Rule file
        rule: PathBuf,

        /// Subject record as a JSON object
        #[arg(short, long)]
        subject: String,

        /// Data file the rule may fetch from
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
}

/// Options of the `run` command.
struct RunOptions {
    data: PathBuf,
    output: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            data,
            rules,
            states,
            policy,
            output,
            log_dir,
            timeout_secs,
        } => {
            let mut config = EngineConfig::from_env().context("Failed to load configuration")?;
            if let Some(rules) = rules {
                config.rules_dir = rules;
            }
            if let Some(states) = states {
                config.states = states;
            }
            if let Some(policy) = policy {
                config.failure_policy = policy;
            }
            if let Some(log_dir) = log_dir {
                config.log_dir = log_dir;
            }
            config.validate()?;

            run(
                &config,
                RunOptions {
                    data,
                    output,
                    timeout_secs,
                },
            )
            .await
        }
        Commands::Check { files } => check(&files).await,
        Commands::Eval {
            rule,
            subject,
            data,
        } => {
            let config = EngineConfig::from_env().context("Failed to load configuration")?;
            eval(&config, &rule, &subject, data.as_deref()).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,stateflow=debug,stateflow_engine=debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the batch, then save the run log whatever the outcome.
async fn run(config: &EngineConfig, options: RunOptions) -> Result<()> {
    let log = Arc::new(BufferedLog::new(Arc::new(TracingLog)));
    log.log("=== Workflow Engine Started ===", LogSource::Engine, LogLevel::Info);

    let result = run_batch(config, &options, log.clone()).await;
    if let Err(e) = &result {
        log.log(
            &format!("Unexpected error in workflow engine: {:#}", e),
            LogSource::Engine,
            LogLevel::Error,
        );
    }

    let log_path = config.log_dir.join(format!(
        "WorkflowLog-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    match log.save(&log_path).await {
        Ok(()) => println!("Log file saved to: {}", log_path.display()),
        Err(e) => tracing::error!(path = %log_path.display(), error = %e, "Failed to save run log"),
    }

    result
}

async fn run_batch(config: &EngineConfig, options: &RunOptions, log: Arc<BufferedLog>) -> Result<()> {
    let store = Arc::new(
        MemoryEntityStore::load_json(&options.data)
            .await
            .with_context(|| format!("Failed to load data file {}", options.data.display()))?,
    );
    let rules = Arc::new(FileRuleSource::new(
        config.rules_dir.clone(),
        config.rule_file_pattern.clone(),
    ));
    let engine = WorkflowEngine::from_config(config, store.clone(), rules, log.clone())?;
    let repository = MemorySubjectRepository::new(
        store.clone(),
        config.subject_kind.clone(),
        config.id_field.clone(),
        config.state_field.clone(),
    );

    tracing::info!(
        data = %options.data.display(),
        rules_dir = %config.rules_dir.display(),
        policy = %config.failure_policy,
        terminal = %engine.states().terminal(),
        "Running workflow batch"
    );

    let batch = engine.run_repository(&repository);
    let report = match options.timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), batch)
            .await
            .map_err(|_| anyhow::anyhow!("Workflow batch timed out after {}s", secs))??,
        None => batch.await?,
    };
    log.log(
        "=== Workflow execution completed ===",
        LogSource::Engine,
        LogLevel::Info,
    );

    let target = options.output.as_ref().unwrap_or(&options.data);
    store
        .save_json(target)
        .await
        .with_context(|| format!("Failed to write data file {}", target.display()))?;

    let records = store.records(&config.subject_kind).await?;
    print!(
        "{}",
        report::render_by_state(&records, &config.id_field, &config.state_field, &config.states)
    );
    print!("{}", report::render_summary(&report));
    Ok(())
}

async fn check(files: &[PathBuf]) -> Result<()> {
    let mut failures = 0;

    for path in files {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        match parse_rule_file(path, &contents) {
            Ok(program) => {
                let dangling = program.dangling_references();
                if dangling.is_empty() {
                    println!("✓ {} ({} steps)", path.display(), program.len());
                } else {
                    failures += 1;
                    println!("✗ {}", path.display());
                    for (from, missing) in dangling {
                        println!("    step '{}' references undefined step '{}'", from, missing);
                    }
                }
            }
            Err(e) => {
                failures += 1;
                println!("✗ {}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} rule files failed validation", failures, files.len());
    }
    Ok(())
}

async fn eval(config: &EngineConfig, rule: &Path, subject: &str, data: Option<&Path>) -> Result<()> {
    let contents = tokio::fs::read_to_string(rule)
        .await
        .with_context(|| format!("Failed to read {}", rule.display()))?;
    let program = parse_rule_file(rule, &contents)?;

    let subject: serde_json::Value =
        serde_json::from_str(subject).context("--subject must be valid JSON")?;
    if !subject.is_object() {
        anyhow::bail!("--subject must be a JSON object");
    }

    let store = match data {
        Some(path) => MemoryEntityStore::load_json(path)
            .await
            .with_context(|| format!("Failed to load data file {}", path.display()))?,
        None => MemoryEntityStore::new(),
    };

    let interpreter = StepInterpreter::new(Arc::new(store), Arc::new(TracingLog));
    let mut ctx = VariableContext::new();
    ctx.set(&config.subject_key, Value::project(&subject))?;

    let outcome = interpreter.execute(&program, &mut ctx).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
