use clap::{Parser, Subcommand};
use macro_core::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "plan-macros")]
#[command(about = "Training plan macro automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the JSON store document
    #[arg(long, global = true)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the plan's macros and print the preview
    Run {
        /// Applied plan id
        #[arg(long)]
        plan: i64,

        /// Where the target window starts (current, previous)
        #[arg(long, default_value = "current")]
        anchor: String,

        /// Shift the anchor by this many workouts
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,

        /// Apply the preview right after computing it
        #[arg(long)]
        apply: bool,
    },

    /// Apply a previously printed preview
    Apply {
        /// File holding a preview array or a whole run report
        #[arg(long)]
        preview: PathBuf,
    },

    /// List the plan's macros in evaluation order
    Rules {
        /// Applied plan id
        #[arg(long)]
        plan: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    macro_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let store_path = cli
        .store
        .unwrap_or_else(|| config.data.store_path.clone());
    let store = Arc::new(JsonStore::open(&store_path)?);
    let engine = MacroEngine::with_backend(store, config);

    match cli.command {
        Commands::Run {
            plan,
            anchor,
            offset,
            apply,
        } => cmd_run(&engine, plan, &anchor, offset, apply).await,
        Commands::Apply { preview } => cmd_apply(&engine, &preview).await,
        Commands::Rules { plan } => cmd_rules(&engine, plan).await,
    }
}

async fn cmd_run(
    engine: &MacroEngine,
    plan: i64,
    anchor: &str,
    offset: i64,
    apply: bool,
) -> Result<()> {
    let options = RunOptions {
        anchor: anchor.parse()?,
        index_offset: offset,
        apply,
    };
    let report = engine.run(plan, options).await?;
    print_json(&report)
}

async fn cmd_apply(engine: &MacroEngine, path: &Path) -> Result<()> {
    let preview = read_preview(path)?;
    tracing::info!("Applying {} preview entries from {:?}", preview.len(), path);

    let report = engine.apply(&preview).await;
    for error in &report.errors {
        eprintln!("  - {}", error);
    }
    print_json(&report)
}

async fn cmd_rules(engine: &MacroEngine, plan: i64) -> Result<()> {
    let rules = engine.rules(plan).await?;
    print_json(&rules)
}

/// Accept either the bare preview array or a full run report
fn read_preview(path: &Path) -> Result<Vec<PreviewEntry>> {
    let contents = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)?;
    let preview = match value {
        Value::Object(mut report) => report
            .remove("preview")
            .ok_or_else(|| Error::Validation("run report has no preview".into()))?,
        other => other,
    };
    Ok(serde_json::from_value(preview)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
