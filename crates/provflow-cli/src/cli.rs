//! CLI definition and command dispatch for provflow.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that dispatches commands to the engine.
//!
//! ## Configuration Precedence
//!
//! 1. CLI flags (`--config`, `--verbose`, per-command flags)
//! 2. Environment variables (`PROVFLOW_CONFIG`, `PROVFLOW_VERBOSE`)
//! 3. Project config (`.provflow/config.yaml`)
//! 4. Global config (`~/.provflow/config.yaml`)
//! 5. Built-in defaults
//!
//! ## Exit Codes
//!
//! - `0`: success
//! - `1`: failure, or stale outputs for `status`
//! - `75`: the project is locked by another operation (retry later)

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::ui::{format, table, ColorMode, MessageType, Progress, ProgressMode, Style};

use provflow_core::{
    DryRunReport, ExecutionSummary, PlanEdit, ProjectContext, ProvflowEngine, ProvflowError,
    RerunOptions, RunRequest, Targets, UpdateOptions, UpdateOutcome, Workspace,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// Version string including git commit hash
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// Exit code for a busy project (EX_TEMPFAIL).
const EXIT_LOCKED: u8 = 75;

/// Provenance-aware workflow runner – record commands, update what is stale
#[derive(Parser, Debug)]
#[command(name = "provflow")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "PROVFLOW_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress and informational messages
    #[arg(short, long, global = true, env = "PROVFLOW_QUIET")]
    pub quiet: bool,

    /// Path to configuration file (default: ~/.provflow/config.yaml)
    #[arg(long, global = true, env = "PROVFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Color output mode: always, never, or auto (default: auto)
    #[arg(long, global = true, env = "PROVFLOW_COLOR", default_value = "auto")]
    pub color: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize provflow in the current project
    #[command(after_help = r#"EXAMPLES:
    # Initialize and record a first step
    provflow init
    provflow run -i data.csv -o clean.csv -- python clean.py data.csv clean.csv
"#)]
    Init,

    /// Execute a command and record its provenance
    #[command(after_help = r#"EXAMPLES:
    # Files named on the command line become positional inputs/outputs
    provflow run --name copy -i a.txt -o b.txt -- cp a.txt b.txt

    # Redirect streams
    provflow run --stdin a.txt --stdout count.txt -- wc -l
"#)]
    Run {
        /// Workflow name (generated from the program when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Workflow description
        #[arg(long)]
        description: Option<String>,

        /// Input file read by the command
        #[arg(short, long = "input", value_name = "PATH")]
        inputs: Vec<String>,

        /// Output file written by the command
        #[arg(short, long = "output", value_name = "PATH")]
        outputs: Vec<String>,

        /// File redirected to stdin
        #[arg(long, value_name = "PATH")]
        stdin: Option<String>,

        /// File receiving stdout
        #[arg(long, value_name = "PATH")]
        stdout: Option<String>,

        /// File receiving stderr
        #[arg(long, value_name = "PATH")]
        stderr: Option<String>,

        /// Workflow provider (executor)
        #[arg(long)]
        provider: Option<String>,

        /// The command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Commit the current content of files
    Save {
        /// Paths to save (all project files when omitted)
        paths: Vec<String>,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Re-execute outdated workflow steps
    #[command(after_help = r#"EXAMPLES:
    # See what would run for one output
    provflow update --dry-run results/plot.png

    # Bring everything up to date
    provflow update --all
"#)]
    Update {
        /// Outputs to bring up to date
        paths: Vec<String>,

        /// Update every generated output
        #[arg(long, conflicts_with = "paths")]
        all: bool,

        /// Show what would run without executing
        #[arg(long)]
        dry_run: bool,

        /// Do not regenerate deleted outputs nothing consumes
        #[arg(long)]
        ignore_deleted: bool,

        /// Workflow provider (executor)
        #[arg(long)]
        provider: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Re-execute the steps that generated files, even when up to date
    Rerun {
        /// Outputs to regenerate
        #[arg(required = true)]
        paths: Vec<String>,

        /// Only re-execute steps that depend on these inputs
        #[arg(long = "from", value_name = "PATH")]
        sources: Vec<String>,

        /// Show what would run without executing
        #[arg(long)]
        dry_run: bool,

        /// Execute and commit files without recording activities
        #[arg(long)]
        skip_metadata_update: bool,

        /// Workflow provider (executor)
        #[arg(long)]
        provider: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show stale outputs, modified inputs and deleted outputs
    #[command(after_help = r#"EXAMPLES:
    # Exit status is 1 when something is stale
    provflow status || provflow update --all
"#)]
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show recorded activities, newest first
    Log {
        /// Include invalidated activities
        #[arg(long)]
        all: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage workflows (plans)
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Check the provenance metadata for problems
    Doctor {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Workflow subcommands
#[derive(Subcommand, Debug)]
pub enum WorkflowAction {
    /// List workflows
    Ls {
        /// Include superseded versions
        #[arg(long)]
        all: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Edit a workflow (creates a new version)
    Edit {
        /// Workflow name or id
        name: String,

        /// Rename the workflow
        #[arg(long)]
        new_name: Option<String>,

        /// Replace the description
        #[arg(long)]
        description: Option<String>,

        /// Replace the keywords
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },
}

// ============================================================================
// Entry point
// ============================================================================

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("provflow_core={},provflow_cli={}", log_level, log_level))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let color_mode = ColorMode::parse(&cli.color).unwrap_or_default();
    let style = Style::new(color_mode);

    let engine = match &cli.config {
        Some(config_path) => ProvflowEngine::with_config(config_path),
        None => ProvflowEngine::with_defaults(),
    };
    let engine = match engine {
        Ok(engine) => engine,
        Err(e) => {
            let hint = match &cli.config {
                Some(path) => format!("Check your config at {}", path.display()),
                None => "Check your global config at ~/.provflow/config.yaml".to_string(),
            };
            eprintln!(
                "{}",
                style.error_with_context(
                    "Failed to initialize provflow",
                    Some(&e.to_string()),
                    Some(&hint),
                )
            );
            return ExitCode::FAILURE;
        }
    };

    let mut workspace = match engine.resolve_workspace(Path::new(".")) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!(
                "{}",
                style.message(MessageType::Err, &format!("Failed to resolve project: {}", e))
            );
            return ExitCode::FAILURE;
        }
    };

    let quiet = cli.quiet;
    let result = match cli.command {
        Command::Init => handle_init(&style, &engine, &mut workspace),
        command => open(&engine, &workspace)
            .and_then(|ctx| dispatch(&style, &engine, &ctx, command, quiet)),
    };

    match result {
        Ok(code) => code,
        Err(e) => report_error(&style, &e),
    }
}

fn open(engine: &ProvflowEngine, workspace: &Workspace) -> Result<ProjectContext, ProvflowError> {
    Ok(engine.open_project(workspace)?.interactive(true))
}

fn dispatch(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    command: Command,
    quiet: bool,
) -> Result<ExitCode, ProvflowError> {
    match command {
        Command::Init => handle_init(style, engine, &mut ctx.workspace().clone()),
        Command::Run {
            name,
            description,
            inputs,
            outputs,
            stdin,
            stdout,
            stderr,
            provider,
            command,
        } => {
            let request = RunRequest {
                name,
                description,
                argv: command,
                inputs,
                outputs,
                stdin,
                stdout,
                stderr,
                provider,
                cwd: std::env::current_dir().ok(),
            };
            handle_run(style, engine, ctx, request)
        }
        Command::Save { paths, message } => handle_save(style, engine, ctx, paths, message),
        Command::Update {
            paths,
            all,
            dry_run,
            ignore_deleted,
            provider,
            json,
        } => {
            let targets = if all {
                Targets::All
            } else if paths.is_empty() {
                return Err(ProvflowError::InvalidArgument(
                    "Give the outputs to update, or --all".to_string(),
                ));
            } else {
                Targets::Paths(relative_to_cwd(ctx, paths)?)
            };
            let options = UpdateOptions {
                targets,
                dry_run,
                ignore_deleted: ignore_deleted.then_some(true),
                provider,
            };
            let mode = ProgressMode::detect(quiet, json);
            let progress = Progress::spinner("Updating", mode);
            let outcome = engine.update(ctx, options);
            progress.finish();
            print_outcome(style, outcome?, json)
        }
        Command::Rerun {
            paths,
            sources,
            dry_run,
            skip_metadata_update,
            provider,
            json,
        } => {
            let options = RerunOptions {
                paths: relative_to_cwd(ctx, paths)?,
                sources: relative_to_cwd(ctx, sources)?,
                dry_run,
                skip_metadata_update,
                provider,
            };
            let mode = ProgressMode::detect(quiet, json);
            let progress = Progress::spinner("Re-running", mode);
            let outcome = engine.rerun(ctx, options);
            progress.finish();
            print_outcome(style, outcome?, json)
        }
        Command::Status { json } => handle_status(style, engine, ctx, json),
        Command::Log { all, json } => handle_log(style, engine, ctx, all, json),
        Command::Workflow { action } => match action {
            WorkflowAction::Ls { all, json } => handle_workflow_ls(style, engine, ctx, all, json),
            WorkflowAction::Edit {
                name,
                new_name,
                description,
                keywords,
            } => {
                let edit = PlanEdit {
                    new_name,
                    description,
                    keywords: (!keywords.is_empty()).then_some(keywords),
                };
                handle_workflow_edit(style, engine, ctx, &name, edit)
            }
        },
        Command::Doctor { json } => handle_doctor(style, engine, ctx, json),
    }
}

/// Print an error with a cause/hint where one helps, and pick the exit code.
fn report_error(style: &Style, error: &ProvflowError) -> ExitCode {
    let hint = match error {
        ProvflowError::NotInitialized => Some("Run `provflow init` first"),
        ProvflowError::LockAcquisition { .. } => Some("Another provflow command is running; retry when it finishes"),
        ProvflowError::GraphCorruption { .. } => Some("Run `provflow doctor` to list every problem"),
        ProvflowError::DeletedDependency { .. } => Some("Restore the file, or rerun the step that generates it"),
        ProvflowError::ExecutorFailure { .. } => Some("Fix the failing step, then run `provflow update` again"),
        _ => None,
    };
    eprintln!("{}", style.error_with_context(&error.to_string(), None, hint));

    if error.is_retryable() {
        ExitCode::from(EXIT_LOCKED)
    } else {
        ExitCode::FAILURE
    }
}

/// Resolve user-given paths against the current directory.
fn relative_to_cwd(ctx: &ProjectContext, paths: Vec<String>) -> Result<Vec<String>, ProvflowError> {
    let cwd = std::env::current_dir()?;
    paths
        .iter()
        .map(|p| ctx.workspace().project_path(&cwd, p))
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ProvflowError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Command handlers
// ============================================================================

fn handle_init(
    style: &Style,
    engine: &ProvflowEngine,
    workspace: &mut Workspace,
) -> Result<ExitCode, ProvflowError> {
    match engine.init(workspace) {
        Ok(result) => {
            println!(
                "{}",
                style.message(
                    MessageType::Ok,
                    &format!(
                        "Initialized provflow project at {} (revision {})",
                        workspace.root().display(),
                        style.revision(result.revision.as_str())
                    )
                )
            );
            println!(
                "{}",
                style.message_detail("Tracked", &format::count(result.tracked_files, "file"))
            );
            println!();
            println!("{}", style.message(MessageType::Hint, "Next steps:"));
            println!("  1. Record a step:   provflow run -i in.txt -o out.txt -- cp in.txt out.txt");
            println!("  2. Check status:    provflow status");
            println!("  3. Update outputs:  provflow update --all");
            Ok(ExitCode::SUCCESS)
        }
        Err(ProvflowError::AlreadyInitialized { root }) => {
            println!(
                "{}",
                style.message(
                    MessageType::Info,
                    &format!("provflow project already initialized at {}", root.display())
                )
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e),
    }
}

fn handle_run(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    request: RunRequest,
) -> Result<ExitCode, ProvflowError> {
    let result = engine.run(ctx, request)?;

    let verb = if result.new_plan { "Created" } else { "Reused" };
    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!(
                "Recorded activity {} ({} workflow `{}`)",
                style.revision(result.activity_id.as_str()),
                verb.to_lowercase(),
                style.plan_name(&result.plan_name)
            )
        )
    );
    for output in &result.outputs {
        println!("{}", style.list_item("+", &style.file_path(output)));
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_save(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    paths: Vec<String>,
    message: Option<String>,
) -> Result<ExitCode, ProvflowError> {
    let paths = relative_to_cwd(ctx, paths)?;
    let result = engine.save(ctx, &paths, message.as_deref())?;
    match result.revision {
        Some(revision) => println!(
            "{}",
            style.message(
                MessageType::Ok,
                &format!(
                    "Saved {} (revision {})",
                    format::count(result.paths.len(), "path"),
                    style.revision(revision.as_str())
                )
            )
        ),
        None => println!("{}", style.message(MessageType::Info, "Nothing to save")),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(style: &Style, outcome: UpdateOutcome, json: bool) -> Result<ExitCode, ProvflowError> {
    match outcome {
        UpdateOutcome::DryRun(report) => print_dry_run(style, &report, json),
        UpdateOutcome::Executed(summary) => print_summary(style, &summary, json),
    }
}

fn print_dry_run(style: &Style, report: &DryRunReport, json: bool) -> Result<ExitCode, ProvflowError> {
    let code = if report.is_blocked() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    };

    if json {
        print_json(report)?;
        return Ok(code);
    }

    if report.is_empty() && !report.is_blocked() {
        println!("{}", style.message(MessageType::Ok, "Everything is up to date"));
    } else if !report.steps.is_empty() {
        println!(
            "{}",
            style.message(
                MessageType::Info,
                &format!("{} would run:", format::count(report.steps.len(), "step"))
            )
        );
        println!("{}", table::render_steps_table(&report.steps));
    }

    if !report.modified.is_empty() {
        println!();
        println!("{}", style.section("Modified inputs"));
        for path in &report.modified {
            println!("{}", style.list_item("!", &style.file_path(path)));
        }
    }
    if !report.deleted.is_empty() {
        println!();
        println!("{}", style.section("Deleted outputs"));
        for path in &report.deleted {
            println!("{}", style.list_item("-", &style.file_path(path)));
        }
    }
    for skipped in &report.skipped {
        println!(
            "{}",
            style.message(
                MessageType::Skip,
                &format!(
                    "{}: deleted output {} will not be regenerated",
                    style.plan_name(&skipped.plan_name),
                    skipped.outputs.join(", ")
                )
            )
        );
    }
    for blocked in &report.blocked {
        println!(
            "{}",
            style.message(
                MessageType::Err,
                &format!(
                    "{}: input {} was deleted and nothing regenerates it",
                    style.plan_name(&blocked.plan_name),
                    style.file_path(&blocked.path)
                )
            )
        );
    }
    Ok(code)
}

fn print_summary(style: &Style, summary: &ExecutionSummary, json: bool) -> Result<ExitCode, ProvflowError> {
    if json {
        print_json(summary)?;
        return Ok(ExitCode::SUCCESS);
    }

    if summary.is_empty() {
        println!("{}", style.message(MessageType::Ok, "Everything is up to date"));
    } else {
        let revision = summary
            .revision
            .as_ref()
            .map(|r| format!(" (revision {})", style.revision(r.as_str())))
            .unwrap_or_default();
        println!(
            "{}",
            style.message(
                MessageType::Ok,
                &format!("Executed {}{}", format::count(summary.steps.len(), "step"), revision)
            )
        );
        for step in &summary.steps {
            println!(
                "{}",
                style.list_item(
                    "+",
                    &format!("{}: {}", style.plan_name(&step.plan_name), step.outputs.join(", "))
                )
            );
        }
    }
    for path in &summary.skipped {
        println!(
            "{}",
            style.message(MessageType::Skip, &format!("Deleted output {} not regenerated", path))
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_status(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    json: bool,
) -> Result<ExitCode, ProvflowError> {
    let status = engine.status(ctx)?;
    let code = if status.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };

    if json {
        print_json(&status)?;
        return Ok(code);
    }

    println!("{}", style.key_value("Project", &status.project_root.display().to_string()));
    let head = status
        .head
        .as_ref()
        .map(|h| style.revision(h.as_str()))
        .unwrap_or_else(|| "-".to_string());
    println!("{}", style.key_value("HEAD", &head));
    println!(
        "{}",
        style.key_value(
            "Recorded",
            &format!(
                "{}, {}",
                format::count(status.plan_count, "workflow"),
                format::count(status.activity_count, "activity")
            )
        )
    );
    println!();

    if status.is_clean() {
        println!("{}", style.message(MessageType::Ok, "Everything is up to date"));
        return Ok(code);
    }

    if !status.stale_outputs.is_empty() {
        println!("{}", style.section("Outdated outputs"));
        for output in &status.stale_outputs {
            let reason = output
                .reasons
                .first()
                .map(|r| r.to_string())
                .unwrap_or_default();
            println!(
                "{}",
                style.list_item(
                    "!",
                    &format!(
                        "{} ({}: {})",
                        style.file_path(&output.path),
                        style.plan_name(&output.plan_name),
                        reason
                    )
                )
            );
        }
        println!();
    }
    if !status.modified_inputs.is_empty() {
        println!("{}", style.section("Modified inputs"));
        for path in &status.modified_inputs {
            println!("{}", style.list_item("!", &style.file_path(path)));
        }
        println!();
    }
    if !status.deleted_outputs.is_empty() {
        println!("{}", style.section("Deleted outputs"));
        for path in &status.deleted_outputs {
            println!("{}", style.list_item("-", &style.file_path(path)));
        }
        println!();
    }
    for missing in &status.missing_inputs {
        println!(
            "{}",
            style.message(
                MessageType::Warn,
                &format!(
                    "Input {} of `{}` is missing and nothing regenerates it",
                    style.file_path(&missing.path),
                    missing.plan_name
                )
            )
        );
    }
    println!("{}", style.message(MessageType::Hint, "Run `provflow update --all` to bring outputs up to date"));
    Ok(code)
}

fn handle_log(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    all: bool,
    json: bool,
) -> Result<ExitCode, ProvflowError> {
    let entries = engine.log(ctx, all)?;

    if json {
        print_json(&entries)?;
    } else if entries.is_empty() {
        println!("{}", style.message(MessageType::Info, "No activities recorded yet."));
    } else {
        println!("{}", table::render_log_table(&entries));
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_workflow_ls(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    all: bool,
    json: bool,
) -> Result<ExitCode, ProvflowError> {
    let plans = engine.list_plans(ctx, all)?;

    if json {
        print_json(&plans)?;
    } else if plans.is_empty() {
        println!("{}", style.message(MessageType::Info, "No workflows recorded yet."));
    } else {
        println!("{}", table::render_plans_table(&plans));
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_workflow_edit(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    name: &str,
    edit: PlanEdit,
) -> Result<ExitCode, ProvflowError> {
    let plan = engine.edit_plan(ctx, name, edit)?;
    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!("Updated workflow `{}` (new version {})", style.plan_name(&plan.name), style.revision(plan.id.as_str()))
        )
    );
    Ok(ExitCode::SUCCESS)
}

fn handle_doctor(
    style: &Style,
    engine: &ProvflowEngine,
    ctx: &ProjectContext,
    json: bool,
) -> Result<ExitCode, ProvflowError> {
    let report = engine.doctor(ctx)?;
    let code = if report.is_healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };

    if json {
        print_json(&report)?;
        return Ok(code);
    }

    if report.is_healthy() {
        println!("{}", style.message(MessageType::Ok, "No problems found"));
    } else {
        println!(
            "{}",
            style.message(
                MessageType::Err,
                &format!("{} found:", format::count(report.problems.len(), "problem"))
            )
        );
        for problem in &report.problems {
            println!("{}", style.list_item("-", &format!("[{}] {}", problem.kind, problem.message)));
        }
    }
    Ok(code)
}
