//! planwise CLI: validate pipelines and show the optimized physical plan.

use clap::{Parser, Subcommand};
use planwise_cache::CacheManager;
use planwise_core::config::OptimizerConfig;
use planwise_planner::verify::check_physical_plan;
use planwise_planner::validate::validate;
use planwise_planner::{
    explain, parse_yaml_pipeline, plan_digest, Optimizer, ParsedPipeline, PipelineConfig,
};
use planwise_stats::{StatisticsProvider, StatsCatalog};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "planwise")]
#[command(about = "Cost-aware physical planning for data pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline YAML file (syntax and plan structure)
    Validate {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Show the physical plan chosen for a pipeline (EXPLAIN)
    Explain {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Statistics catalog (YAML, or JSON with a .json extension)
        #[arg(short, long)]
        stats: PathBuf,

        /// Print the plan as JSON instead of a tree
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

/// Command-line settings; these win over the pipeline's `config:` section,
/// which wins over `PLANWISE_*` environment variables.
#[derive(clap::Args, Debug, Default, Clone)]
struct ConfigOverrides {
    /// Broadcast threshold in bytes
    #[arg(long)]
    broadcast_threshold: Option<u64>,

    /// Default shuffle partition count
    #[arg(long)]
    shuffle_partitions: Option<u32>,

    /// Cache budget in bytes
    #[arg(long)]
    cache_budget: Option<u64>,

    /// Target bytes per shuffle partition
    #[arg(long)]
    target_partition_bytes: Option<u64>,

    /// Plan scans of unknown datasets without estimates instead of failing
    #[arg(long)]
    allow_unknown_stats: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { pipeline } => {
            if let Err(e) = validate_pipeline(&pipeline) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Pipeline is valid");
        }
        Commands::Explain {
            pipeline,
            stats,
            json,
            overrides,
        } => {
            if let Err(e) = explain_pipeline(&pipeline, &stats, json, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Parse and validate a pipeline, resolving its config over `base`.
fn load_pipeline(
    yaml_content: &str,
    base: OptimizerConfig,
    overrides: &ConfigOverrides,
) -> Result<(ParsedPipeline, OptimizerConfig), Box<dyn std::error::Error>> {
    let parsed = parse_yaml_pipeline(yaml_content)?;
    validate(&parsed.plan)?;
    let config = resolve_config(base, &parsed.config, overrides);
    config.validate()?;
    Ok((parsed, config))
}

fn validate_pipeline(pipeline_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    load_pipeline(
        &yaml_content,
        OptimizerConfig::from_env(),
        &ConfigOverrides::default(),
    )?;
    Ok(())
}

fn explain_pipeline(
    pipeline_path: &Path,
    stats_path: &Path,
    json: bool,
    overrides: &ConfigOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    let (parsed, config) = load_pipeline(&yaml_content, OptimizerConfig::from_env(), overrides)?;
    let catalog = StatsCatalog::load(stats_path)?;
    tracing::debug!(datasets = catalog.datasets.len(), "statistics catalog loaded");

    let stats = StatisticsProvider::from_catalog(&catalog);
    let cache = CacheManager::from_config(&config);
    let optimizer = Optimizer::new(&stats, &cache, config);
    let physical = optimizer.optimize(&parsed.plan)?;
    check_physical_plan(&physical)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&physical)?);
        return Ok(());
    }

    let cfg = optimizer.config();
    println!("Physical Plan");
    println!("=============");
    println!();
    println!(
        "Broadcast threshold: {} bytes ({:.2} MB)",
        cfg.broadcast_byte_threshold,
        cfg.broadcast_byte_threshold as f64 / 1_048_576.0
    );
    println!(
        "Shuffle partitions: {} (max {})",
        cfg.default_shuffle_partitions,
        cfg.max_partitions()
    );
    println!("Plan hash: {}", plan_digest(&physical)?);
    println!();
    print!("{}", explain(&physical));
    Ok(())
}

/// Layer pipeline config and command-line overrides over `base`.
fn resolve_config(
    base: OptimizerConfig,
    pipeline: &PipelineConfig,
    overrides: &ConfigOverrides,
) -> OptimizerConfig {
    let mut config = base;
    pipeline.apply(&mut config);
    if let Some(v) = overrides.broadcast_threshold {
        config.broadcast_byte_threshold = v;
    }
    if let Some(v) = overrides.shuffle_partitions {
        config.default_shuffle_partitions = v;
    }
    if let Some(v) = overrides.cache_budget {
        config.cache_budget_bytes = v;
    }
    if let Some(v) = overrides.target_partition_bytes {
        config.target_partition_bytes = v;
    }
    if overrides.allow_unknown_stats {
        config.allow_unknown_statistics = true;
    }
    config
}
