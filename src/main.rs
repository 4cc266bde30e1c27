use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use modprog::config::{self, Config, CONFIG_FILE};
use modprog::{
    CompletionFact, CourseDocument, ProgressionEvaluator, ProgressionStore, RequirementKind, SqliteStore,
};

/// modprog - module progression engine
/// Evaluates prerequisite, sequencing and completion requirements per learner
#[derive(Parser)]
#[command(name = "modprog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate course module progression for learners", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Data directory (defaults to ./.modprog if present, else ~/.modprog)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and default configuration
    Init,

    /// Import learners, modules and completion facts from a JSON course document
    Import {
        /// Course document path
        file: PathBuf,
    },

    /// Record a completion fact for a learner
    Record {
        #[arg(long)]
        learner: i64,
        #[arg(long)]
        item: i64,
        /// must_view, must_submit, must_contribute, must_mark_done or min_score
        #[arg(long)]
        kind: RequirementKind,
        /// Score, required for min_score
        #[arg(long)]
        score: Option<f64>,
    },

    /// Delete a recorded completion fact
    Forget {
        #[arg(long)]
        learner: i64,
        #[arg(long)]
        item: i64,
        #[arg(long)]
        kind: RequirementKind,
    },

    /// Evaluate module progression for a learner (all modules by default)
    Evaluate {
        #[arg(long)]
        learner: i64,
        /// Module to evaluate; repeat for several
        #[arg(long = "module")]
        modules: Vec<i64>,
        /// Print progressions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Collapse (or expand) a module in the learner's view
    Collapse {
        #[arg(long)]
        learner: i64,
        #[arg(long)]
        module: i64,
        /// Expand instead of collapse
        #[arg(long)]
        expand: bool,
    },

    /// Show data directory and stored entity counts
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries command output only
        .init();

    let data_dir = config::data_dir(cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Init => init(&data_dir)?,
        Commands::Import { file } => {
            let store = open_store(&data_dir)?;
            let document = CourseDocument::load(&file)
                .with_context(|| format!("reading course document {}", file.display()))?;
            let summary = document.import_into(&store)?;
            println!(
                "Imported {} learners, {} modules, {} completion facts",
                summary.learners, summary.modules, summary.completions
            );
        }
        Commands::Record { learner, item, kind, score } => {
            if kind == RequirementKind::MinScore && score.is_none() {
                bail!("--score is required for min_score facts");
            }
            let store = open_store(&data_dir)?;
            if !store.learner_exists(learner)? {
                store.upsert_learner(learner)?;
                info!("Registered learner {}", learner);
            }
            let fact = CompletionFact {
                item_id: item,
                kind,
                satisfied_at: Utc::now(),
                score,
            };
            store.record_completion(learner, &fact)?;
            println!("Recorded {} on item {} for learner {}", kind, item, learner);
        }
        Commands::Forget { learner, item, kind } => {
            let store = open_store(&data_dir)?;
            if store.delete_completion(learner, item, kind)? {
                println!("Deleted {} on item {} for learner {}", kind, item, learner);
            } else {
                println!("No {} fact on item {} for learner {}", kind, item, learner);
            }
        }
        Commands::Evaluate { learner, modules, json } => {
            evaluate(&data_dir, learner, &modules, json)?;
        }
        Commands::Collapse { learner, module, expand } => {
            let config = Config::load(&data_dir.join(CONFIG_FILE))?;
            let store = Arc::new(open_store(&data_dir)?);
            let evaluator = ProgressionEvaluator::with_settings(store.clone(), config.evaluator);
            // make sure a progression row exists before flipping the flag
            evaluator.evaluate(learner, module)?;
            store.set_collapsed(learner, module, !expand)?;
            println!(
                "Module {} {} for learner {}",
                module,
                if expand { "expanded" } else { "collapsed" },
                learner
            );
        }
        Commands::Status => status(&data_dir)?,
    }

    Ok(())
}

fn open_store(data_dir: &Path) -> Result<SqliteStore> {
    let config = Config::load(&data_dir.join(CONFIG_FILE))?;
    if !data_dir.exists() {
        bail!("{} does not exist. Run 'modprog init' first", data_dir.display());
    }
    Ok(SqliteStore::open(&config.database_path(data_dir))?)
}

fn init(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;

    let config_path = data_dir.join(CONFIG_FILE);
    let config = Config::load(&config_path)?;
    if !config_path.exists() {
        config.save(&config_path)?;
        info!("Created default configuration at {:?}", config_path);
    }

    SqliteStore::open(&config.database_path(data_dir))?;
    info!("modprog initialized at {:?}", data_dir);
    println!("Initialized {}", data_dir.display());
    Ok(())
}

fn evaluate(data_dir: &Path, learner: i64, modules: &[i64], json: bool) -> Result<()> {
    let config = Config::load(&data_dir.join(CONFIG_FILE))?;
    let store = Arc::new(open_store(data_dir)?);
    let evaluator = ProgressionEvaluator::with_settings(store.clone(), config.evaluator);

    let results = if modules.is_empty() {
        evaluator.evaluate_course(learner)?
    } else {
        evaluator.evaluate_all(learner, modules)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("Learner {}", learner);
    println!("{:<8} {:<24} {:<10} {:>5} {:>9}", "MODULE", "NAME", "STATE", "MET", "POSITION");
    for (module_id, progression) in &results {
        let name = store
            .load_module(*module_id)?
            .map(|module| module.name)
            .unwrap_or_default();
        let total = progression.requirements_met.len() + progression.incomplete_requirements.len();
        println!(
            "{:<8} {:<24} {:<10} {:>5} {:>9}",
            module_id,
            name,
            progression.workflow_state,
            format!("{}/{}", progression.requirements_met.len(), total),
            progression
                .current_position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

fn status(data_dir: &Path) -> Result<()> {
    println!("modprog Status");
    println!("==============");
    println!();

    if !data_dir.exists() {
        println!("Status: NOT INITIALIZED");
        println!("Run 'modprog init' to initialize");
        return Ok(());
    }

    let config = Config::load(&data_dir.join(CONFIG_FILE))?;
    let db_path = config.database_path(data_dir);
    println!("Status: INITIALIZED");
    println!("Data directory: {}", data_dir.display());
    println!("Database: {}", db_path.display());
    println!(
        "Parallel evaluation: {}",
        if config.evaluator.parallel { "on" } else { "off" }
    );

    if !db_path.exists() {
        println!("Database: NOT FOUND");
        return Ok(());
    }

    let counts = SqliteStore::open(&db_path)?.counts()?;
    println!("Learners: {}", counts.learners);
    println!("Modules: {}", counts.modules);
    println!("Items: {}", counts.items);
    println!("Completion facts: {}", counts.completion_facts);
    println!("Progressions: {}", counts.progressions);
    Ok(())
}
