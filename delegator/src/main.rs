//! Delegator CLI: inspect phases and contracts and validate finished tasks.
//!
//! Running sessions needs a `SessionHost` from the embedding application; the
//! binary covers everything that works against the todo list, the plan and
//! the working tree alone.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;

use delegator::core::classify::classify_label;
use delegator::core::contract::{Contract, render_contract_block};
use delegator::core::scope::{GitChangeSnapshot, normalize_path};
use delegator::core::todo::parse_list;
use delegator::exit_codes;
use delegator::io::config::{DelegatorPaths, init_config, load_config};
use delegator::io::git::{DiffProvider, Git, GitDiffProvider};
use delegator::io::plan::load_contract_index;
use delegator::io::todo_store::load_todo_items;
use delegator::logging;
use delegator::phase::{PhaseRequest, prepare_phase};
use delegator::validate::{ValidationInput, validate_task};

#[derive(Parser)]
#[command(
    name = "delegator",
    version,
    about = "Reliable delegation of todo-list phases to agent sessions"
)]
struct Cli {
    /// Project root holding `.delegator/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.delegator/config.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Extract a phase from a todo list and run preflight.
    Phase {
        #[command(flatten)]
        phase: PhaseArgs,
        /// Print the phase as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Parse and validate the contract blocks of a plan document.
    Contracts {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long, conflicts_with = "render")]
        json: bool,
        /// Print the contracts as one canonical fenced block.
        #[arg(long)]
        render: bool,
    },
    /// Validate one finished task against the current working tree.
    Check {
        #[command(flatten)]
        phase: PhaseArgs,
        /// Task coordinate, e.g. `1.2`.
        #[arg(long)]
        task: String,
        /// Extra touched files (comma separated), added to the git change set.
        #[arg(long)]
        changed: Option<String>,
    },
    /// Print the attempt class of a poll-outcome label.
    Classify { label: String },
}

#[derive(clap::Args)]
struct PhaseArgs {
    /// Todo list: JSON array of items or a markdown checklist.
    #[arg(long)]
    todos: PathBuf,
    #[arg(long)]
    phase: u32,
    /// Plan document holding the contract blocks.
    #[arg(long)]
    plan: Option<PathBuf>,
    /// Default skills for tasks that omit them (comma separated).
    #[arg(long, conflicts_with = "no_skills")]
    skills: Option<String>,
    /// Tasks that omit skills run with none.
    #[arg(long)]
    no_skills: bool,
}

impl PhaseArgs {
    fn request(&self) -> PhaseRequest {
        let default_skills = match (&self.skills, self.no_skills) {
            (Some(csv), _) => Some(parse_list(csv)),
            (None, true) => Some(Vec::new()),
            (None, false) => None,
        };
        PhaseRequest {
            phase: self.phase,
            default_skills,
        }
    }
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Phase { phase, json } => cmd_phase(&root, &phase, json),
        Command::Contracts { plan, json, render } => cmd_contracts(&plan, json, render),
        Command::Check {
            phase,
            task,
            changed,
        } => cmd_check(&root, &phase, &task, changed.as_deref()),
        Command::Classify { label } => {
            println!("{}", classify_label(&label).as_str());
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_config(root, force)?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_phase(root: &Path, args: &PhaseArgs, as_json: bool) -> Result<i32> {
    let config = load_config(&DelegatorPaths::new(root).config_path)?;
    let items = load_todo_items(&args.todos)?;
    let contracts = load_contract_index(args.plan.as_deref())?;
    let prepared = match prepare_phase(&items, &contracts, &args.request(), &config) {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("{err}");
            return Ok(exit_codes::INVALID);
        }
    };

    let phase = &prepared.phase;
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(phase).context("serialize phase")?
        );
        return Ok(exit_codes::OK);
    }
    println!(
        "Phase {}: {} ({}, {} tasks)",
        phase.number,
        phase.title,
        phase.mode.as_str(),
        phase.tasks.len()
    );
    for task in &phase.tasks {
        let agent = prepared
            .defaults
            .effective_agent(task)
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  [{}] {} {} (agent: {agent}, files: {})",
            task.status.as_str(),
            task.id,
            task.description,
            list_label(task.declared_files())
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_contracts(plan: &Path, as_json: bool, render: bool) -> Result<i32> {
    let index = load_contract_index(Some(plan))?;
    if render {
        let contracts: Vec<Contract> = index.contracts().cloned().collect();
        print!("{}", render_contract_block(&contracts)?);
        for issue in &index.issues {
            eprintln!("issue: {issue}");
        }
    } else if as_json {
        let contracts: Vec<&Contract> = index.contracts().collect();
        let out = json!({ "contracts": contracts, "issues": index.issues });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("serialize contracts")?
        );
    } else {
        for contract in index.contracts() {
            println!(
                "{} [{:?}] files: {}",
                contract.id,
                contract.source,
                list_label(&contract.files)
            );
        }
        for issue in &index.issues {
            eprintln!("issue: {issue}");
        }
    }
    Ok(if index.issues.is_empty() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn cmd_check(root: &Path, args: &PhaseArgs, task_id: &str, changed: Option<&str>) -> Result<i32> {
    let config = load_config(&DelegatorPaths::new(root).config_path)?;
    let items = load_todo_items(&args.todos)?;
    let index = load_contract_index(args.plan.as_deref())?;
    let prepared = prepare_phase(&items, &index, &args.request(), &config)?;
    let task = prepared
        .phase
        .tasks
        .iter()
        .find(|task| task.id == task_id)
        .ok_or_else(|| anyhow!("task {task_id} not found in phase {}", args.phase))?;
    let contracts = index
        .resolve(task.declared_contracts())
        .map_err(|missing| anyhow!(missing.join("; ")))?;

    let mut touched: BTreeSet<String> = changed
        .map(parse_list)
        .unwrap_or_default()
        .iter()
        .map(|path| normalize_path(path, Some(root)))
        .collect();
    if Git::new(root).is_repo() {
        match GitDiffProvider::new(root).snapshot() {
            Ok(snapshot) => touched.extend(snapshot.changed_since(&GitChangeSnapshot::default())),
            Err(err) => tracing::warn!(err = %format!("{err:#}"), "git change set unavailable"),
        }
    } else {
        tracing::debug!(root = %root.display(), "not a git work tree; using --changed only");
    }

    let failures = validate_task(&ValidationInput {
        root,
        task,
        contracts: &contracts,
        touched: &touched,
        config: &config,
    });
    if failures.is_empty() {
        println!("task {task_id}: passed");
        return Ok(exit_codes::OK);
    }
    println!("task {task_id}: {} failed check(s)", failures.len());
    for failure in &failures {
        println!("- {}", failure.render());
    }
    Ok(exit_codes::VALIDATION_FAILED)
}

fn list_label(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
