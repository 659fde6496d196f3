//! Command-line interface for deferred collection queries
//!
//! Works on JSON-serialized expression trees: compiles them back to source
//! text, reports structural query hashes and runs call chains over JSON data.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deferq::ast::{Expression, compile};
use deferq::{EngineConfig, QueryEngine, SchemePreference, Value};
use std::fs;
use std::io::{self, Read};

#[derive(Parser)]
#[command(name = "deferq")]
#[command(about = "Compile, hash and run deferred collection queries")]
#[command(version)]
#[command(author = "OctoFHIR Team <funyloony@gmail.com>")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Iterator scheme: auto, lazy or eager
    #[arg(long, global = true, default_value = "auto")]
    scheme: SchemePreference,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretty-print JSON output
    #[arg(short, long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the source text of a serialized expression
    Compile {
        /// JSON file containing the expression tree
        file: String,
    },
    /// Print the structural hash of a serialized call chain
    Hash {
        /// JSON file containing the call chain
        file: String,
    },
    /// Run a serialized call chain over JSON data
    Run {
        /// JSON file containing the call chain
        file: String,
        /// JSON data bound to the chain's source (reads from stdin if not provided)
        #[arg(short, long)]
        data: Option<String>,
    },
}

fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let engine = QueryEngine::new(EngineConfig {
        scheme: cli.scheme,
        ..EngineConfig::default()
    });

    match &cli.command {
        Commands::Compile { file } => {
            let expression = read_expression(file)?;
            println!("{}", compile(&expression));
        }
        Commands::Hash { file } => {
            let chain = read_expression(file)?;
            println!("{}", engine.hash(&chain)?);
        }
        Commands::Run { file, data } => {
            let chain = read_expression(file)?;
            let data = match data {
                Some(data) => data.clone(),
                None => {
                    let mut buffer = String::new();
                    io::stdin()
                        .read_to_string(&mut buffer)
                        .context("failed to read data from stdin")?;
                    buffer
                }
            };
            let json: serde_json::Value =
                serde_json::from_str(&data).context("failed to parse data")?;
            let result = engine.execute_with(&chain, Value::from(json))?;

            let output = serde_json::Value::from(&result);
            if cli.pretty {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{output}");
            }
        }
    }
    Ok(())
}

fn read_expression(file: &str) -> Result<deferq::ast::Expr> {
    let content = fs::read_to_string(file).with_context(|| format!("failed to read '{file}'"))?;
    Expression::from_json(&content)
        .with_context(|| format!("failed to load expression from '{file}'"))
}
