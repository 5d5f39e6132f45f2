use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use shapeflow_core::ir::Model;
use shapeflow_core::{inline_local_functions, InferenceConfig, ShapeInference};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shapeflow")]
#[command(about = "Static type and shape inference for ONNX-style dataflow graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer element kinds and shapes and write the refined model
    Infer {
        /// Model file (JSON)
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the inference summary to stderr
        #[arg(long)]
        summary: bool,

        #[command(flatten)]
        options: InferenceOptions,
    },

    /// Replace calls to model-local functions with their bodies
    Inline {
        /// Model file (JSON)
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum nesting of function calls
        #[arg(long, default_value_t = InferenceConfig::default().max_recursion_depth)]
        max_recursion_depth: usize,
    },
}

/// Flags overriding fields of the configuration file
#[derive(Args)]
struct InferenceOptions {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fail if any value is left without a type
    #[arg(long)]
    strict: bool,

    /// Do not fold constant tensors that feed shape computations
    #[arg(long)]
    no_partial_values: bool,

    /// Maximum nesting of function calls and subgraphs
    #[arg(long)]
    max_recursion_depth: Option<usize>,

    /// Element/operation budget for constant folding
    #[arg(long)]
    budget: Option<usize>,

    /// Keep declared types that conflict with inferred ones instead of failing
    #[arg(long)]
    relaxed: bool,
}

impl InferenceOptions {
    fn resolve(&self) -> Result<InferenceConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => InferenceConfig::default(),
        };
        if self.strict {
            config = config.strict();
        }
        if self.no_partial_values {
            config = config.with_partial_values(false);
        }
        if let Some(depth) = self.max_recursion_depth {
            config = config.with_max_recursion_depth(depth);
        }
        if let Some(budget) = self.budget {
            config = config.with_partial_value_budget(budget);
        }
        if self.relaxed {
            config = config.with_declared_type_checks(false);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Infer {
            input,
            output,
            summary,
            options,
        } => infer_command(&input, output.as_deref(), summary, &options),
        Commands::Inline {
            input,
            output,
            max_recursion_depth,
        } => inline_command(&input, output.as_deref(), max_recursion_depth),
    }
}

fn infer_command(input: &Path, output: Option<&Path>, print_summary: bool, options: &InferenceOptions) -> Result<()> {
    let config = options.resolve()?;
    debug!(?config, "resolved configuration");
    let mut model = load_model(input)?;

    let summary = ShapeInference::new()
        .with_config(config)
        .infer_model(&mut model)
        .with_context(|| format!("Shape inference failed for {}", input.display()))?;
    info!(
        typed = summary.values_typed,
        unknown = summary.values_unknown,
        "inference complete"
    );

    write_json(&model, output)?;
    if print_summary {
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn inline_command(input: &Path, output: Option<&Path>, max_depth: usize) -> Result<()> {
    let mut model = load_model(input)?;
    let inlined = inline_local_functions(&mut model, max_depth)
        .with_context(|| format!("Inlining failed for {}", input.display()))?;
    info!(inlined, "functions inlined");
    write_json(&model, output)
}

fn load_model(path: &Path) -> Result<Model> {
    let source = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("Failed to parse model {}", path.display()))
}

fn load_config(path: &Path) -> Result<InferenceConfig> {
    let source = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&source).with_context(|| format!("Failed to parse configuration {}", path.display()))
}

fn write_json(value: &impl Serialize, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
