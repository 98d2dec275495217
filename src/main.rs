use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use planforge::config::Config;
use planforge::core::task::{Job, TaskId, TaskStatus, TaskSummary};
use planforge::executor::{Pipeline, TaskQueue};
use planforge::planning::{decompose, ArchitectureDescription, DecompositionPlan, PlanningConfig};
use planforge::store::{Dashboard, TaskStore};
use planforge::{Error, Result};

/// Planforge - decompose architectures into work packages and run them as tasks
#[derive(Parser, Debug)]
#[command(name = "planforge")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    PLANFORGE_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.planforge/planforge.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (default: ~/.planforge/planforge.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Task store directory (overrides output_dir from the config)
    #[arg(short = 's', long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Decompose one architecture description and print the plan
    Plan {
        /// Architecture description (JSON)
        architecture: PathBuf,

        /// Maximum units per work package
        #[arg(short = 'k', long)]
        max_units: Option<usize>,

        /// Write the full plan as JSON to this file
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Queue one task per architecture file and wait for all of them
    Run {
        /// Architecture descriptions (JSON)
        #[arg(required = true)]
        architectures: Vec<PathBuf>,

        /// Number of concurrent workers
        #[arg(short = 'w', long)]
        workers: Option<usize>,
    },

    /// Show all tasks, or one task in detail
    Status {
        /// Task ID
        task_id: Option<String>,
    },

    /// Show planning metrics of a task
    Metrics {
        /// Task ID
        task_id: String,
    },

    /// Write the current settings to ~/.planforge/planforge.toml
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    planforge::log::init_with_debug(cli.debug);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(store) = &cli.store {
        config.output_dir = Some(store.display().to_string());
    }

    match cli.command {
        Command::Plan {
            architecture,
            max_units,
            output,
        } => run_plan(&config, &architecture, max_units, output),
        Command::Run {
            architectures,
            workers,
        } => {
            if let Some(workers) = workers {
                config.worker_count = workers;
            }
            run_tasks(&config, architectures)
        }
        Command::Status { task_id } => run_status(&config, task_id),
        Command::Metrics { task_id } => run_metrics(&config, &task_id),
        Command::Init => {
            config.save()?;
            println!("Config written to {}", Config::config_path()?.display());
            Ok(())
        }
    }
}

fn read_architecture(path: &Path) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

fn title_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}

fn parse_task_id(raw: &str) -> Result<TaskId> {
    raw.parse().map_err(|_| Error::TaskNotFound(raw.to_string()))
}

fn open_store(config: &Config) -> Result<Arc<TaskStore>> {
    let store = TaskStore::open(&config.effective_output_dir())?.with_retry_backoff(config.store_retry_backoff());
    Ok(Arc::new(store))
}

/// Decompose a single architecture without touching the task store.
fn run_plan(config: &Config, architecture: &Path, max_units: Option<usize>, output: Option<PathBuf>) -> Result<()> {
    tracing::info!(path = %architecture.display(), ?max_units, "plan command");
    let arch = ArchitectureDescription::from_value(read_architecture(architecture)?)?;
    let planning = PlanningConfig::with_max_units(max_units.unwrap_or(config.max_units_per_package));
    let plan = decompose(&arch, &planning)?;

    match output {
        Some(path) => {
            std::fs::write(&path, serde_json::to_string_pretty(&plan)?)?;
            print_plan(&plan);
            println!();
            println!("Plan written to {}", path.display());
        }
        None => print_plan(&plan),
    }
    Ok(())
}

fn print_plan(plan: &DecompositionPlan) {
    let metrics = plan.metrics();
    println!("Units:        {}", plan.units.len());
    println!("Packages:     {} ({} remediation)", metrics.package_count, metrics.remediation_count);
    println!("Coverage:     {:.1}%", metrics.coverage_percentage);
    println!("Batches:      {}", metrics.batch_count);
    println!();
    for batch in &plan.concurrency.batches {
        println!("Batch {}:", batch.index + 1);
        for id in &batch.packages {
            if let Some(package) = plan.packages.iter().find(|p| &p.id == id) {
                println!("  {:<12} {:<28} {} unit(s)", package.id.as_str(), package.name, package.len());
            }
        }
    }
    if !plan.concurrency.conflicts.is_empty() {
        println!();
        println!("Conflicts:");
        for edge in &plan.concurrency.conflicts {
            println!("  {} <-> {}  [{}]", edge.a, edge.b, edge.resources.join(", "));
        }
    }
}

/// Submit every architecture as a task and block until all have finished.
fn run_tasks(config: &Config, architectures: Vec<PathBuf>) -> Result<()> {
    tracing::info!(files = architectures.len(), workers = config.worker_count, "run command");
    let store = open_store(config)?;
    let pipeline = Arc::new(Pipeline::standard(PlanningConfig::with_max_units(
        config.max_units_per_package,
    )));

    let rt = tokio::runtime::Runtime::new()?;
    let finished = rt.block_on(async {
        let queue = TaskQueue::start(config, store, pipeline).await?;
        let mut ids = Vec::new();
        for path in &architectures {
            let job = Job::new(&title_for(path), "").with_architecture(read_architecture(path)?);
            ids.push(queue.submit(job).await?);
        }
        let mut finished = Vec::new();
        for id in ids {
            finished.push(queue.wait_for(id).await?.summary());
        }
        queue.shutdown().await;
        Ok::<_, Error>(finished)
    })?;

    print_summaries(&finished);
    Ok(())
}

fn print_summaries(tasks: &[TaskSummary]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    println!("{:<10} {:<10} {:<24} {}", "ID", "STATUS", "TITLE", "UPDATED");
    for task in tasks {
        println!(
            "{:<10} {:<10} {:<24} {}",
            task.id.short(),
            format_status(task.status),
            task.title,
            task.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &task.error {
            println!("           error: {}", error);
        }
    }
}

/// Format task status with color codes for terminal.
fn format_status(status: TaskStatus) -> String {
    match status {
        TaskStatus::Succeeded => format!("\x1b[32m{:<10}\x1b[0m", status), // Green
        TaskStatus::Failed => format!("\x1b[31m{:<10}\x1b[0m", status),    // Red
        TaskStatus::Running => format!("\x1b[33m{:<10}\x1b[0m", status),   // Yellow
        TaskStatus::Queued => format!("\x1b[90m{:<10}\x1b[0m", status),    // Gray
    }
}

fn run_status(config: &Config, task_id: Option<String>) -> Result<()> {
    let dashboard = Dashboard::new(open_store(config)?);
    let rt = tokio::runtime::Runtime::new()?;

    let Some(raw) = task_id else {
        let tasks = rt.block_on(dashboard.list_tasks())?;
        print_summaries(&tasks);
        return Ok(());
    };

    let id = parse_task_id(&raw)?;
    let task = rt
        .block_on(dashboard.get_task_detail(id))?
        .ok_or_else(|| Error::TaskNotFound(raw.clone()))?;

    println!("Task:      {}", task.id);
    println!("Title:     {}", task.job.title);
    println!("Status:    {}", format_status(task.status));
    if let Some(dir) = &task.project_dir {
        println!("Project:   {}", dir.display());
    }
    if let Some(error) = &task.error {
        println!("Error:     {}", error);
    }
    println!();
    println!("Stages:");
    for progress in &task.stages {
        println!("  {:<24} {:?}", progress.stage.to_string(), progress.status);
    }
    if !task.artifacts.is_empty() {
        println!();
        println!("Artifacts:");
        for (name, path) in &task.artifacts {
            println!("  {:<24} {}", name, path.display());
        }
    }
    Ok(())
}

fn run_metrics(config: &Config, raw: &str) -> Result<()> {
    let id = parse_task_id(raw)?;
    let dashboard = Dashboard::new(open_store(config)?);
    let rt = tokio::runtime::Runtime::new()?;
    let view = rt
        .block_on(dashboard.get_task_metrics(id))?
        .ok_or_else(|| Error::TaskNotFound(raw.to_string()))?;

    println!("Task:      {} ({})", view.id.short(), view.status);
    match view.metrics {
        Some(m) => {
            println!("Coverage:  {:.1}%", m.coverage_percentage);
            println!("Packages:  {} ({} remediation)", m.package_count, m.remediation_count);
            println!("Batches:   {}", m.batch_count);
        }
        None => println!("No metrics yet (decomposition has not finished)"),
    }
    Ok(())
}
