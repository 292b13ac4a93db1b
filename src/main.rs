//! Circulate - knowledge circulation for coding agents
//!
//! Command-line entry point: captures development knowledge, retrieves it
//! for agent prompts and reports on the feedback loop.

use circulate_core::{
    config::default_config_path, error::Result, AdrDecision, AgentTask, CirculateConfig,
    KnowledgeType, QualityMetrics, SecurityLevel,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{self, EnvFilter};

mod cli;

use cli::helpers::{parse_quality, GlobalOptions, OutputFormat, Runtime};
use cli::query::{SearchArgs, SearchMode};

#[derive(Parser)]
#[command(name = "circulate")]
#[command(about = "Knowledge circulation and feedback loop for coding agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config_dir>/circulate/config.toml)
    #[arg(long, global = true, env = "CIRCULATE_CONFIG")]
    config: Option<PathBuf>,

    /// Database path (overrides the configured one)
    #[arg(long, global = true, env = "CIRCULATE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Set log level
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a development log entry
    Log {
        /// Title
        #[arg(short, long)]
        title: String,

        /// Content (markdown)
        #[arg(short, long)]
        content: String,

        /// Knowledge type (dev_log, adr, solution, learning, prompt_template)
        #[arg(short = 'y', long = "type", default_value = "dev_log")]
        knowledge_type: KnowledgeType,

        /// Project phase (default: configured phase)
        #[arg(short, long)]
        phase: Option<String>,

        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,

        /// Complexity 1-10
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=10))]
        complexity: Option<u8>,

        /// Security level (public, internal, confidential, restricted)
        #[arg(long)]
        security: Option<SecurityLevel>,

        /// Comma-separated related commit hashes
        #[arg(long)]
        commits: Option<String>,
    },

    /// Record an architecture decision
    Adr {
        #[arg(short, long)]
        title: String,

        #[arg(long)]
        context: String,

        #[arg(long)]
        decision: String,

        #[arg(long)]
        consequences: String,

        #[arg(long)]
        alternatives: Option<String>,
    },

    /// Record a problem and its solution
    Solution {
        #[arg(long)]
        problem: String,

        #[arg(long)]
        solution: String,

        /// Comma-separated tags (default: problem-solving)
        #[arg(long)]
        tags: Option<String>,
    },

    /// List the most recent knowledge, archived included
    Recent {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List knowledge of a project phase
    Phase {
        phase: String,
    },

    /// Estimated embedding cost of a phase
    Cost {
        phase: String,
    },

    /// Search knowledge
    Search {
        query: String,

        #[arg(short, long, value_enum, default_value = "hybrid")]
        mode: SearchMode,

        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Minimum relevance (hybrid) or similarity (vector)
        #[arg(long, default_value = "0.7")]
        min_similarity: f64,

        /// Comma-separated tags, any of which must match (hybrid only)
        #[arg(long)]
        tags: Option<String>,

        /// Exact phase (hybrid only)
        #[arg(short, long)]
        phase: Option<String>,

        /// Most restrictive level to return (hybrid only)
        #[arg(long, default_value = "public")]
        security: SecurityLevel,
    },

    /// Build a knowledge-enhanced prompt for a task
    Prompt {
        description: String,

        /// Task type, used as the role and as a tag filter
        #[arg(short = 'y', long = "type", default_value = "general")]
        task_type: String,

        #[arg(long, default_value = "5")]
        complexity: u8,
    },

    /// Capture a finished task as a learning and credit the knowledge it used
    Learn {
        #[arg(long)]
        description: String,

        #[arg(long)]
        solution: String,

        /// Outcome quality 1-10
        #[arg(short, long, value_parser = parse_quality)]
        quality: f64,

        /// Minutes spent
        #[arg(long, default_value = "0")]
        time_spent: f64,

        /// Knowledge id that was used (repeatable)
        #[arg(long = "used")]
        used: Vec<String>,

        #[arg(short, long)]
        phase: Option<String>,
    },

    /// Record a failed task
    Fail {
        #[arg(long)]
        description: String,

        #[arg(short, long)]
        error: String,

        /// Task identifier (default: random)
        #[arg(long)]
        task_id: Option<String>,

        /// Knowledge id that was attempted (repeatable)
        #[arg(long = "attempted")]
        attempted: Vec<String>,
    },

    /// Suggest (and optionally apply) knowledge optimizations
    Optimize {
        /// Apply archive and improve suggestions
        #[arg(long)]
        apply: bool,
    },

    /// Categorize recent failures
    Analyze {
        #[arg(short, long, default_value = "7")]
        days: i64,
    },

    /// Most used (or highest rated) knowledge
    Top {
        /// Rank by rating among items used at least three times
        #[arg(long)]
        rated: bool,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Learning progress of a phase
    Curve {
        phase: String,
    },

    /// Archive stale knowledge and compress old archives
    Archive,

    /// Failure report
    Failures {
        #[arg(short, long, default_value = "7")]
        days: i64,
    },

    /// Knowledge health scores
    Health,

    /// Per-phase knowledge and task summary
    Phases,

    /// Per-agent execution statistics
    Agents {
        #[arg(short, long, default_value = "7")]
        days: i64,
    },

    /// Daily task quality
    Trend {
        #[arg(short, long, default_value = "7")]
        days: i64,
    },

    /// Score a task execution
    Score {
        /// Execution time in milliseconds
        #[arg(long)]
        time_ms: u64,

        #[arg(long, default_value = "0")]
        errors: u32,

        /// Number of knowledge items used
        #[arg(long, default_value = "0")]
        knowledge: u32,

        /// Output length in characters
        #[arg(long, default_value = "0")]
        output_length: usize,

        #[arg(long)]
        has_tests: bool,

        #[arg(long)]
        has_docs: bool,

        /// Overall score to compare against
        #[arg(long)]
        compare: Option<f64>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.as_str().to_lowercase();
        EnvFilter::new(format!(
            "circulate={level},circulate_core={level},reqwest=warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Circulate v{} starting...", env!("CARGO_PKG_VERSION"));

    let options = GlobalOptions {
        config_path: cli.config,
        db_path: cli.db_path,
    };
    let format = cli.format;

    // Commands that never touch the store
    match cli.command {
        Commands::Score {
            time_ms,
            errors,
            knowledge,
            output_length,
            has_tests,
            has_docs,
            compare,
        } => {
            let metrics = QualityMetrics {
                execution_time_ms: time_ms,
                error_count: errors,
                knowledge_used: knowledge,
                output_length,
                has_tests,
                has_documentation: has_docs,
            };
            cli::score::handle(metrics, compare, format)
        }
        Commands::Config { init } => {
            if init {
                let path = options
                    .config_path
                    .clone()
                    .or_else(default_config_path)
                    .ok_or_else(|| {
                        anyhow::anyhow!("No config directory available; pass --config")
                    })?;
                if CirculateConfig::write_default(&path)? {
                    eprintln!("Created {}", path.display());
                } else {
                    eprintln!("{} already exists", path.display());
                }
            }
            let mut config = CirculateConfig::load(options.config_path.as_deref())?;
            if let Some(db_path) = options.db_path {
                config.database_path = db_path;
            }
            print!("{}", config.to_toml()?);
            Ok(())
        }
        command => run(command, &options, format).await,
    }
}

async fn run(command: Commands, options: &GlobalOptions, format: OutputFormat) -> Result<()> {
    let runtime = Runtime::open(options).await?;

    match command {
        Commands::Log {
            title,
            content,
            knowledge_type,
            phase,
            tags,
            complexity,
            security,
            commits,
        } => {
            let args = cli::capture::LogArgs {
                title,
                content,
                knowledge_type,
                phase,
                tags,
                complexity,
                security_level: security,
                commits,
            };
            cli::capture::handle_log(&runtime, args, format).await
        }
        Commands::Adr {
            title,
            context,
            decision,
            consequences,
            alternatives,
        } => {
            let decision = AdrDecision {
                title,
                context,
                decision,
                consequences,
                alternatives,
            };
            cli::capture::handle_adr(&runtime, decision, format).await
        }
        Commands::Solution {
            problem,
            solution,
            tags,
        } => cli::capture::handle_solution(&runtime, problem, solution, tags, format).await,
        Commands::Recent { limit } => cli::query::handle_recent(&runtime, limit, format).await,
        Commands::Phase { phase } => cli::query::handle_phase(&runtime, phase, format).await,
        Commands::Cost { phase } => cli::query::handle_cost(&runtime, phase, format).await,
        Commands::Search {
            query,
            mode,
            limit,
            min_similarity,
            tags,
            phase,
            security,
        } => {
            let args = SearchArgs {
                query,
                mode,
                limit,
                min_similarity,
                tags,
                phase,
                security_level: security,
            };
            cli::query::handle_search(&runtime, args, format).await
        }
        Commands::Prompt {
            description,
            task_type,
            complexity,
        } => {
            let task = AgentTask {
                description,
                task_type,
                complexity,
            };
            cli::training::handle_prompt(&runtime, task, format).await
        }
        Commands::Learn {
            description,
            solution,
            quality,
            time_spent,
            used,
            phase,
        } => {
            let args = cli::training::LearnArgs {
                description,
                solution,
                quality,
                time_spent,
                used,
                phase,
            };
            cli::training::handle_learn(&runtime, args, format).await
        }
        Commands::Fail {
            description,
            error,
            task_id,
            attempted,
        } => {
            cli::feedback::handle_fail(&runtime, task_id, description, error, attempted, format)
                .await
        }
        Commands::Optimize { apply } => {
            cli::feedback::handle_optimize(&runtime, apply, format).await
        }
        Commands::Analyze { days } => cli::feedback::handle_analyze(&runtime, days, format).await,
        Commands::Top { rated, limit } => {
            cli::query::handle_top(&runtime, rated, limit, format).await
        }
        Commands::Curve { phase } => cli::query::handle_curve(&runtime, phase, format).await,
        Commands::Archive => cli::training::handle_archive(&runtime, format).await,
        Commands::Failures { days } => cli::report::handle_failures(&runtime, days, format).await,
        Commands::Health => cli::report::handle_health(&runtime, format).await,
        Commands::Phases => cli::report::handle_phases(&runtime, format).await,
        Commands::Agents { days } => cli::report::handle_agents(&runtime, days, format).await,
        Commands::Trend { days } => cli::report::handle_trend(&runtime, days, format).await,
        // Handled before the store is opened
        Commands::Score { .. } | Commands::Config { .. } => Ok(()),
    }
}
