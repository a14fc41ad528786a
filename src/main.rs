mod config;
mod cycle;
mod dialog;
mod error;
mod game;
mod llm;
mod producer;
mod record;
mod storage;
mod text;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use config::{Backend, Cli, Command, Config};
use cycle::{CancelFlag, CycleRunner, ThreadSleeper};
use dialog::{fixture, DialogGraph};
use llm::LLM;
use producer::{ChatJsonProducer, MonologueProducer, Producer};

fn main() -> Result<()> {
    // Initialize logging. Control verbosity with RUST_LOG env var:
    //   RUST_LOG=info   chatai generate   # cycle results
    //   RUST_LOG=debug  chatai generate   # + raw model output and extracted JSON
    //   RUST_LOG=trace  chatai generate   # + full rendered prompts
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Generate(args) => generate(args.into()),
        Command::Static { output } => write_static(&output),
        Command::Play { graph } => game::run(&graph),
        Command::Validate { graph } => validate(&graph),
    }
}

fn generate(config: Config) -> Result<()> {
    config.validate()?;

    println!("Loading model: {}", config.model.model_path.display());
    println!("  Backend    : {:?}", config.backend);
    println!("  GPU layers : {}", config.model.n_gpu_layers);
    println!("  Context    : {}", config.model.n_ctx);
    println!("  Output     : {}", config.output_path.display());

    let model = LLM::load_model(config.model.clone()).context("failed to load model")?;

    let producer: Box<dyn Producer> = match config.backend {
        Backend::Quantized | Backend::Adapter => Box::new(MonologueProducer::new(
            model,
            config.reply_candidates,
            config.similarity_threshold,
        )),
        Backend::Chat => Box::new(ChatJsonProducer::new(model)),
    };

    let cancel = CancelFlag::default();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Interrupted, stopping after the current cycle");
        on_interrupt.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let sleeper = ThreadSleeper::new(cancel.clone());
    let mut runner = CycleRunner::new(producer, sleeper, &config, cancel);
    let summary = runner.run();

    println!("Cycles       : {}", summary.cycles);
    println!("  Written    : {}", summary.written);
    println!("  Skipped    : {}", summary.skipped);
    println!("  Failed     : {}", summary.failed_writes);
    Ok(())
}

fn write_static(output: &Path) -> Result<()> {
    let graph = fixture::intro_dialog()?;
    storage::write_json_atomic(output, &graph)?;
    info!("Dialog map written to {}", output.display());
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let graph: DialogGraph = storage::read_json(path)?;
    let unresolved = graph.unresolved_links();

    println!(
        "{}: {} nodes, current node {}{}",
        path.display(),
        graph.nodes().count(),
        graph.current_node_id(),
        if graph.is_finished() { " (finished)" } else { "" }
    );
    println!("  Terminal nodes : {}", graph.terminal_nodes().join(", "));
    println!("  History entries: {}", graph.history().len());
    println!("  Longest path   : {} replies", graph.remaining_steps());

    for link in &unresolved {
        warn!(
            "Reply #{} of node {} targets missing node {}",
            link.index + 1,
            link.node,
            link.target
        );
    }
    anyhow::ensure!(unresolved.is_empty(), "{} unresolved reply links", unresolved.len());
    println!("  All reply links resolve.");
    Ok(())
}
