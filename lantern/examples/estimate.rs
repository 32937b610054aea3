//! Estimate example: replay a recorded page load under throttling.
//!
//! Loads a devtools protocol log (a JSON array of `{"method", "params"}`
//! messages) and optionally the matching performance trace, builds the
//! dependency graph of the load and prints when each request and task
//! would run on the chosen network.
//!
//! Run with:
//!   cargo run --example estimate -p lantern -- page.devtoolslog.json --trace page.trace.json
//!
//! Set `RUST_LOG=lantern=debug` to see what the builder and simulator do.

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use lantern::{
    DevtoolsMessage, MainThreadTasks, NetworkAnalysis, NetworkLog, PageGraphBuilder, Rtt,
    SimulationOptions, Simulator, Throughput, defaults, parse_trace,
};
use std::{fs, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Mobile,
    Desktop,
}

#[derive(Parser)]
struct Command {
    /// devtools protocol log of the page load
    devtools_log: PathBuf,

    /// performance trace of the page load
    #[arg(long)]
    trace: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "mobile")]
    preset: Preset,

    /// override the round trip time of the preset, e.g. `150ms`
    #[arg(long)]
    rtt: Option<Rtt>,

    /// override the throughput of the preset, e.g. `1600kbps`
    #[arg(long)]
    throughput: Option<Throughput>,

    #[arg(long)]
    cpu_slowdown: Option<f64>,

    /// do not tune per origin round trips and server response times from
    /// the recording
    #[arg(long, default_value_t = false)]
    no_analysis: bool,

    /// print the simulation result as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

const LABEL_WIDTH: usize = 80;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cmd = Command::parse();

    let log = fs::read_to_string(&cmd.devtools_log)
        .with_context(|| format!("reading {}", cmd.devtools_log.display()))?;
    let messages = DevtoolsMessage::parse_log(&log)?;
    let network = NetworkLog::from_messages(&messages);
    let urls = network
        .page_urls()
        .context("the devtools log has no document request")?;

    let tasks = match cmd.trace.as_ref() {
        Some(path) => {
            let trace = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            MainThreadTasks::from_events(parse_trace(&trace)?)
        }
        None => MainThreadTasks::default(),
    };

    let graph = PageGraphBuilder::new(urls.clone())
        .set_records(network.records.iter().cloned())
        .set_tasks(tasks.into_tasks())
        .build()?;

    let preset = match cmd.preset {
        Preset::Mobile => defaults::MOBILE_SLOW_4G,
        Preset::Desktop => defaults::DESKTOP_DENSE_4G,
    };
    let mut builder = SimulationOptions::builder().set_preset(preset);
    if let Some(rtt) = cmd.rtt {
        builder = builder.set_rtt(rtt);
    }
    if let Some(throughput) = cmd.throughput {
        builder = builder.set_throughput(throughput);
    }
    if let Some(multiplier) = cmd.cpu_slowdown {
        builder = builder.set_cpu_slowdown_multiplier(multiplier);
    }
    let mut options = builder.build();
    if !cmd.no_analysis {
        NetworkAnalysis::analyze(&network.records).apply_to(&mut options);
    }

    let result = Simulator::new(options)?.simulate(&graph)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "{}: {:.0}ms ({} nodes)",
        urls.main_document_url,
        result.time_in_ms,
        graph.len()
    );
    for (id, timing) in result.timeline() {
        let node = graph.get(id)?;
        let label = match (node.record(), node.as_cpu()) {
            (Some(record), _) => record.url.chars().take(LABEL_WIDTH).collect(),
            (None, Some(cpu)) => format!(
                "[cpu] {} ({:.1}ms observed)",
                cpu.task().event().name,
                cpu.task().duration() as f64 / 1_000.0
            ),
            (None, None) => id.to_string(),
        };
        println!(
            "{:>9.1} {:>9.1}  {label}",
            timing.start_time, timing.end_time
        );
    }

    Ok(())
}
