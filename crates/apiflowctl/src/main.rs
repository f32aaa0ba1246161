mod loader;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use apiflow_client::HttpClient;
use apiflow_core::definition::Definition;
use apiflow_core::runtime::Runner;

#[derive(Parser)]
#[command(name = "apiflow")]
#[command(version, about = "apiflow - run declarative API test definitions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a definition file
    ///
    /// Examples:
    ///     apiflow run ./flows/smoke.yaml
    ///     apiflow run ./flows/smoke.yaml --set user=jane --set count=3
    ///     apiflow run ./flows/smoke.yaml --input inputs.json --env-file .env.staging
    #[command(verbatim_doc_comment)]
    Run {
        /// Definition file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Set input values (format: key=value), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Path to JSON file with input parameters
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Path to a .env file merged into the environment table
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile a definition file and report errors without running it
    Check {
        /// Definition file path
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

// Flows interleave on one thread; concurrency is cooperative.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, inputs, input, env_file, verbose } => {
            init_tracing(verbose);
            run(&file, &inputs, input.as_deref(), env_file.as_deref()).await
        }
        Commands::Check { file } => {
            init_tracing(false);
            check(&file)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(
    file: &Path,
    set_inputs: &[String],
    input_file: Option<&Path>,
    env_file: Option<&Path>,
) -> Result<()> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let loaded = loader::load_definition(file)?;
    let inputs = collect_inputs(set_inputs, input_file)?;
    let envs: serde_json::Map<String, serde_json::Value> = std::env::vars()
        .map(|(name, value)| (name, serde_json::Value::String(value)))
        .collect();

    let runner = Runner::new(Arc::new(HttpClient::new()));

    let report = match &loaded.definition {
        Definition::Test(test) => {
            let program = apiflow_core::compile(&loaded.name, test, &loaded.imports)?;
            runner.run(&program, inputs, envs).await?
        }
        Definition::Api(api) => {
            runner.run_api_definition(&loaded.name, api, inputs, envs).await?
        }
        other => bail!("definition {:?} of kind {} is not executable", loaded.name, other.kind()),
    };

    tracing::info!(
        flow = %report.name,
        duration_ms = report.duration_ms(),
        "run finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(report.outputs))?
    );
    Ok(())
}

fn check(file: &Path) -> Result<()> {
    let loaded = loader::load_definition(file)?;

    match &loaded.definition {
        Definition::Test(test) => {
            let program = apiflow_core::compile(&loaded.name, test, &loaded.imports)?;
            println!("{}: ok ({} statements)", loaded.name, program.body.len());
        }
        Definition::Api(_) => {
            println!("{}: ok (api definition)", loaded.name);
        }
        other => bail!("definition {:?} of kind {} is not executable", loaded.name, other.kind()),
    }
    Ok(())
}

/// Merge inputs from a JSON file with repeated `--set key=value` pairs;
/// the pairs win.
fn collect_inputs(
    set_inputs: &[String],
    input_file: Option<&Path>,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut inputs = serde_json::Map::new();

    if let Some(path) = input_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading input file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing input file {}", path.display()))?;
        match value {
            serde_json::Value::Object(entries) => inputs.extend(entries),
            _ => bail!("input file {} must hold a JSON object", path.display()),
        }
    }

    for pair in set_inputs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --set value {:?}, expected key=value", pair);
        };
        // A value that parses as JSON keeps its type, else it is a string.
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        inputs.insert(key.to_string(), value);
    }

    Ok(inputs)
}
