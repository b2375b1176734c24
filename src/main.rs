// Omics Orchestrator - runs analysis pipelines on an external workflow engine
//
// Renders a job-specific pipeline from a workflow template, launches the engine
// and follows the job to a terminal state. Ctrl-C cancels the running job.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use omics_orchestrator::config::{ConfigManager, LogLevel};
use omics_orchestrator::execution::{EngineCommand, JobOutcome, JobRegistry, Orchestrator};
use omics_orchestrator::pipeline::PipelineGenerator;
use omics_orchestrator::store::{FileJobStore, JobStore};
use omics_orchestrator::workflow::{
    AnalysisJob, AnalysisKind, RuntimeParams, TemplateCatalog, WorkflowTemplate,
};

/// Omics Orchestrator - external pipeline execution for analysis jobs
#[derive(Parser)]
#[command(name = "omics-orchestrator")]
#[command(about = "Runs genomics and transcriptomics analysis pipelines on Nextflow")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration directory
    #[arg(long, global = true, env = "OMICS_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow template against input files
    Run(RunArgs),
    /// Generate the pipeline files without running the engine
    Render(RenderArgs),
    /// List available workflow templates
    Templates {
        /// Only list templates of this kind
        #[arg(long)]
        kind: Option<AnalysisKind>,
    },
}

#[derive(Args)]
struct TemplateSelector {
    /// Template definition file (YAML)
    #[arg(long, conflicts_with = "kind")]
    template: Option<PathBuf>,

    /// Built-in template kind (rna-seq, genome-seq, single-cell-rna-seq)
    #[arg(long, required_unless_present = "template")]
    kind: Option<AnalysisKind>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    selector: TemplateSelector,

    /// Input read files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Job name
    #[arg(long)]
    name: Option<String>,

    /// Engine profile to activate
    #[arg(long)]
    profile: Option<String>,

    /// Resume from cached engine state
    #[arg(long)]
    resume: bool,

    /// Pipeline parameter override, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, serde_json::Value)>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    selector: TemplateSelector,

    /// Input read files
    inputs: Vec<PathBuf>,

    /// Directory the pipeline files are written to
    #[arg(long, default_value = "pipeline")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config_dir {
        Some(dir) => ConfigManager::load(dir).await?,
        None => ConfigManager::new().await?,
    };

    let _log_guard = init_logging(cli.verbose, manager.config().log_level, cli.log_dir.as_deref())?;

    let validation = manager.validate();
    for warning in &validation.warnings {
        tracing::warn!("Configuration: {}", warning);
    }
    if !validation.is_valid {
        anyhow::bail!("Invalid configuration: {}", validation.errors.join("; "));
    }

    match cli.command {
        Command::Run(args) => run(&manager, args).await,
        Command::Render(args) => render(&manager, args).await,
        Command::Templates { kind } => list_templates(&manager, kind.as_ref()),
    }
}

/// Execute one job and report its outcome
async fn run(manager: &ConfigManager, args: RunArgs) -> Result<()> {
    let mut template = resolve_template(manager, &args.selector)?;
    let config = manager.config();

    let store: Arc<dyn JobStore> = Arc::new(
        FileJobStore::new(&config.store_dir)
            .with_context(|| format!("Failed to open job store at {}", config.store_dir.display()))?,
    );
    let registry = JobRegistry::new();
    let orchestrator = Orchestrator::new(manager.runner_config(), registry.clone(), store.clone())?;

    let name = args
        .name
        .unwrap_or_else(|| format!("{} run", template.name));
    let mut job = AnalysisJob::new(template.id, name, args.inputs);
    job.parameters = args.params.into_iter().collect();
    store.save_job(&job)?;

    let mut runtime =
        RuntimeParams::for_job(&job, config.work_dir_for(&job.id), config.output_dir_for(&job.id))
            .with_resume(args.resume);
    if let Some(profile) = args.profile.or_else(|| config.engine_profile.clone()) {
        runtime = runtime.with_profile(profile);
    }

    println!("Starting job {} ({})", job.id, template.identifier());
    println!("  Work dir:   {}", runtime.work_dir.display());
    println!("  Output dir: {}", runtime.output_dir.display());

    let job_id = job.id;
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            match registry.cancel_all() {
                0 => tracing::warn!(job_id = %job_id, "Interrupt received but the engine is not running"),
                n => tracing::warn!(job_id = %job_id, "Interrupt received, cancelling {} job(s)", n),
            }
        }
    });

    let result = orchestrator.execute(&mut template, &mut job, runtime).await;
    interrupt.abort();

    match result {
        Ok(JobOutcome::Completed { result, output_files }) => {
            println!(
                "\n✓ Job completed in {:.1}s with {} output files",
                result.duration.as_secs_f64(),
                output_files.len()
            );
            for file in &output_files {
                println!("  {}", file.display());
            }
            Ok(())
        },
        Ok(JobOutcome::Cancelled { .. }) => {
            println!("\n✗ Job cancelled");
            Ok(())
        },
        Err(e) => {
            println!("\n✗ Job failed: {}", e);
            Err(e.into())
        },
    }
}

/// Write the pipeline files and print the stage graph and engine command
async fn render(manager: &ConfigManager, args: RenderArgs) -> Result<()> {
    let template = resolve_template(manager, &args.selector)?;

    tokio::fs::create_dir_all(&args.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let runtime =
        RuntimeParams::new(&args.out_dir, args.out_dir.join("results")).with_inputs(args.inputs);
    let definition = PipelineGenerator::new().generate(&template, &runtime)?;
    let command = EngineCommand::for_pipeline(&manager.runner_config(), &definition);

    println!("Pipeline for {}:\n", template.identifier());
    for (upstream, stage) in definition.script.stage_graph() {
        println!("  {} -> {}", upstream, stage);
    }
    println!("\nScript: {}", definition.script_path.display());
    println!("Config: {}", definition.config_path.display());
    println!("\n{}", command.display());

    Ok(())
}

fn list_templates(manager: &ConfigManager, kind: Option<&AnalysisKind>) -> Result<()> {
    let catalog = load_catalog(manager)?;
    let mut templates = catalog.find_templates(kind);
    templates.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str()).then(a.name.cmp(&b.name)));

    println!("Available templates:\n");
    if templates.is_empty() {
        println!("  No templates found");
        return Ok(());
    }

    for template in templates {
        println!("  {} - {}", template.identifier(), template.name);
        println!(
            "    Resources: {} CPUs, {}, {} ({})",
            template.resources.cpu,
            template.resources.memory,
            template.resources.time,
            template.resources.queue
        );
        if let Some(description) = &template.description {
            println!("    {}\n", description);
        }
    }

    println!("Run a template with: omics-orchestrator run --kind <kind> <inputs>...");
    Ok(())
}

fn load_catalog(manager: &ConfigManager) -> Result<TemplateCatalog> {
    let templates_dir = manager.templates_dir();
    if templates_dir.is_dir() {
        TemplateCatalog::new(&templates_dir)
    } else {
        Ok(TemplateCatalog::builtin())
    }
}

fn resolve_template(manager: &ConfigManager, selector: &TemplateSelector) -> Result<WorkflowTemplate> {
    if let Some(path) = &selector.template {
        return TemplateCatalog::load_template(path);
    }

    let kind = selector
        .kind
        .as_ref()
        .context("Either --template or --kind is required")?;
    let catalog = load_catalog(manager)?;
    catalog
        .find_by_kind(kind)
        .into_iter()
        .next()
        .cloned()
        .with_context(|| format!("No template available for kind '{}'", kind))
}

/// Parse a `KEY=VALUE` override; JSON values keep their type, anything else is a string
fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Initialize logging based on verbosity level
fn init_logging(
    verbose: bool,
    level: LogLevel,
    log_dir: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { LogLevel::Debug } else { level };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "omics-orchestrator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("omics_orchestrator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}
