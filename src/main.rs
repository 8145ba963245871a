//! Hotswap CLI
//!
//! Inspect how hot updates propagate through a module graph, and run a
//! scripted hot-update session against the runtime.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hotswap::chunks::{ChunkRegistration, DevRuntimeParams};
use hotswap::hmr::GraphSpec;
use hotswap::modules::{factory, ChunkPath, ModuleFactory, ModuleId};
use hotswap::protocol::EcmascriptMergedUpdate;
use hotswap::{Runtime, RuntimeConfig, VERSION};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hotswap")]
#[command(author, version, about = "A development-time module runtime with hot module replacement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify updates of modules in a JSON module graph
    Effects {
        /// Module graph description
        #[arg(short, long, value_name = "FILE")]
        graph: PathBuf,

        /// Changed module ids
        #[arg(required = true)]
        changed: Vec<String>,
    },

    /// Run a scripted session: load an app, then hot-update one of its modules
    Demo {
        /// Runtime configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct EffectReport {
    module: ModuleId,
    effect: hotswap::hmr::ModuleEffect,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Effects { graph, changed } => show_effects(&graph, &changed),
        Commands::Demo { config } => run_demo(config.as_deref()),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn show_effects(path: &Path, changed: &[String]) -> Result<()> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read module graph {}", path.display()))?;
    let graph = GraphSpec::from_json(&json)
        .with_context(|| format!("invalid module graph {}", path.display()))?
        .build();

    let reports: Vec<EffectReport> = changed
        .iter()
        .map(|id| {
            let module = ModuleId::from(id.as_str());
            let effect = graph.effect(&module);
            EffectReport { module, effect }
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

/// A self-accepting counter that keeps its count across updates
fn counter(step: u32) -> ModuleFactory {
    factory(move |ctx| {
        let hot = ctx.hot();
        hot.accept();
        let count = hot.data().get::<u32>("count")?.unwrap_or(0) + step;
        ctx.exports().set("count", count as f64);
        ctx.exports().set("step", step as f64);
        hot.dispose(move |data| data.set("count", &count));
        Ok(())
    })
}

fn run_demo(config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    info!(version = VERSION, "starting demo runtime");
    let runtime = Runtime::with_config(Rc::new(hotswap::chunks::NoopBackend), config);

    runtime.register_chunk(ChunkRegistration::new("lib.js").module("counter.js", counter(1)))?;
    runtime.register_chunk(
        ChunkRegistration::new("main.js")
            .module(
                "app.js",
                factory(|ctx| {
                    let counter = ctx.require("counter.js")?;
                    ctx.exports().set("counter", counter);
                    Ok(())
                }),
            )
            .params(DevRuntimeParams {
                other_chunks: vec![ChunkPath::from("lib.js")],
                runtime_module_ids: vec![ModuleId::from("app.js")],
            }),
    )?;
    print_counter(&runtime, "loaded");

    let update = EcmascriptMergedUpdate::new().entry("counter.js", counter(10));
    let applied = runtime.apply_merged_update(&update)?;
    println!("{}", serde_json::to_string_pretty(&applied)?);
    print_counter(&runtime, "updated");
    Ok(())
}

fn print_counter(runtime: &Runtime, label: &str) {
    let count = runtime
        .get(&ModuleId::from("counter.js"))
        .and_then(|module| module.borrow().exports.get("count").as_number());
    match count {
        Some(count) => println!("{}: count = {}", label, count),
        None => println!("{}: counter.js is not instantiated", label),
    }
}
