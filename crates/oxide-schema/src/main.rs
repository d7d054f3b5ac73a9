//! oxide-schema CLI
//!
//! Command-line tool for generating SQL migrations from declarative schemas.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_schema::prelude::*;
use oxide_schema::provider::DIALECTS;

/// Declarative schema migrations for SQL databases.
#[derive(Parser)]
#[command(name = "oxide-schema")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQL dialect of the generated migrations.
    #[arg(
        short,
        long,
        env = "OXIDE_SCHEMA_DIALECT",
        default_value = "postgresql",
        global = true
    )]
    dialect: String,

    /// Migrations directory (also holds the schema snapshot).
    #[arg(
        short,
        long,
        env = "OXIDE_SCHEMA_MIGRATIONS_DIR",
        default_value = "migrations",
        global = true
    )]
    migrations_dir: PathBuf,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a schema, expand its includes and validate it.
    Check {
        /// Schema file.
        schema: PathBuf,
    },

    /// Print the table creation order.
    Order {
        /// Schema file.
        schema: PathBuf,

        /// How foreign key cycles are handled.
        #[arg(long, value_enum, default_value_t = CyclePolicyArg::FailFast)]
        cycle_policy: CyclePolicyArg,
    },

    /// Show the changes since the last generated migration.
    Diff {
        /// Schema file.
        schema: PathBuf,
    },

    /// Generate the next migration.
    Generate {
        /// Schema file.
        schema: PathBuf,

        /// Print the migration instead of writing it.
        #[arg(long)]
        dry_run: bool,

        /// What to do with destructive changes.
        #[arg(long, value_enum, default_value_t = DestructiveMode::Review)]
        destructive: DestructiveMode,

        /// Alter column types in place instead of copying through a
        /// temporary column.
        #[arg(long)]
        unsafe_types: bool,

        /// Migration name/description.
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CyclePolicyArg {
    FailFast,
    Defer,
}

impl From<CyclePolicyArg> for CyclePolicy {
    fn from(arg: CyclePolicyArg) -> Self {
        match arg {
            CyclePolicyArg::FailFast => Self::FailFast,
            CyclePolicyArg::Defer => Self::Defer,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DestructiveMode {
    /// Emit destructive statements commented out for review.
    Review,
    /// Emit destructive statements as they are.
    Generate,
    /// Leave destructive changes out.
    Omit,
    /// Fail on the first destructive change.
    Abort,
    /// Ask for each destructive change.
    Prompt,
}

/// Asks on the terminal what to do with each destructive change.
struct StdinPrompt;

impl DestructiveChangeHandler for StdinPrompt {
    fn decide(&mut self, change: &Change) -> Disposition {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        loop {
            eprint!("{change}\n  [g]enerate, [r]eview, [o]mit, [a]bort? ");
            let _ = io::stderr().flush();

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return Disposition::Abort,
                Ok(_) => {}
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "g" | "generate" => return Disposition::Generate,
                "r" | "review" => return Disposition::Review,
                "o" | "omit" => return Disposition::Omit,
                "a" | "abort" => return Disposition::Abort,
                _ => eprintln!("Please answer g, r, o or a."),
            }
        }
    }
}

fn handler_for(mode: DestructiveMode) -> Box<dyn DestructiveChangeHandler> {
    let fixed = |disposition: Disposition| -> Box<dyn DestructiveChangeHandler> {
        Box::new(move |_: &Change| disposition)
    };
    match mode {
        DestructiveMode::Review => Box::new(AlwaysReview),
        DestructiveMode::Generate => fixed(Disposition::Generate),
        DestructiveMode::Omit => fixed(Disposition::Omit),
        DestructiveMode::Abort => fixed(Disposition::Abort),
        DestructiveMode::Prompt => Box::new(StdinPrompt),
    }
}

fn load(path: &Path) -> anyhow::Result<Schema> {
    load_and_expand(path).with_context(|| format!("Failed to load schema {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Check { schema } => {
            let schema = load(&schema)?;
            info!(
                "Schema '{}' is valid ({} tables).",
                schema.name,
                schema.tables.len()
            );
        }

        Commands::Order {
            schema,
            cycle_policy,
        } => {
            let schema = load(&schema)?;
            let order =
                DependencyGraph::from_schema(&schema).creation_order(cycle_policy.into())?;
            for table in &order.tables {
                if order.is_deferred(table) {
                    println!("{table} (foreign keys deferred)");
                } else {
                    println!("{table}");
                }
            }
        }

        Commands::Diff { schema } => {
            let schema = load(&schema)?;
            let previous = SnapshotStore::new(&cli.migrations_dir).load()?;
            let diff = diff_schemas(previous.as_ref(), Some(&schema));
            if !diff.has_changes() {
                info!("No changes detected.");
            }
            for change in &diff.changes {
                println!("{change}");
            }
        }

        Commands::Generate {
            schema,
            dry_run,
            destructive,
            unsafe_types,
            name,
        } => {
            let provider = provider_for(&cli.dialect).with_context(|| {
                format!(
                    "Unknown dialect '{}' (expected one of: {})",
                    cli.dialect,
                    DIALECTS.join(", ")
                )
            })?;
            let schema = load(&schema)?;
            let store = SnapshotStore::new(&cli.migrations_dir);
            let previous = store.load()?;

            let diff = diff_schemas(previous.as_ref(), Some(&schema));
            if !diff.has_changes() {
                info!("No changes detected.");
                return Ok(());
            }

            let mut options = PlanOptions::new().with_safe_type_changes(!unsafe_types);
            if let Some(name) = name {
                options = options.with_description(name);
            }
            let planner = MigrationPlanner::new(provider.as_ref()).with_options(options);
            let mut handler = handler_for(destructive);
            let plan = planner.assemble(&diff, previous.as_ref(), &schema, handler.as_mut())?;

            if dry_run {
                info!("Dry run mode - migration will be printed but not written.");
                print!("{}", plan.render());
                return Ok(());
            }

            let written = MigrationWriter::new(&cli.migrations_dir).write_non_empty(&plan)?;
            // Omitted or no-op changes still move the baseline forward.
            store.save(&schema)?;
            match written {
                Some(path) => info!(
                    "Created migration {} ({} changes{}).",
                    path.display(),
                    diff.changes.len(),
                    if plan.destructive { ", destructive" } else { "" }
                ),
                None => warn!(
                    "No statements to write ({} changes omitted or without effect); snapshot updated.",
                    diff.changes.len()
                ),
            }
        }
    }

    Ok(())
}
