use std::fs::File;
use std::io::{self, BufReader};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use unigrams::cli::{Cli, Command, InspectArgs, ReplayArgs};
use unigrams::plugin::{FlushSummary, MemoryAccessPlugin, UnigramPlugin};
use unigrams::replay::{self, ReplayHost, ReplayStats, SnapshotResolver};
use unigrams::report::{self, WordWidth};
use unigrams::ProfilerConfig;

/// Initialize tracing subscriber; info by default, everything with --debug
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Layer command-line overrides over the config file
fn load_config(args: &ReplayArgs) -> Result<ProfilerConfig> {
    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_toml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ProfilerConfig::default(),
    };

    if let Some(path) = &args.read_report {
        config.read_report = path.clone();
    }
    if let Some(path) = &args.write_report {
        config.write_report = path.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = Some(dir.clone());
    }
    if let Some(width) = args.word_width {
        config.word_width = WordWidth::try_from(width)?;
    }
    if let Some(order) = args.byte_order {
        config.byte_order = order.into();
    }
    Ok(config)
}

fn print_flush_summary(summary: &FlushSummary) {
    if summary.dropped_events > 0 {
        tracing::warn!(
            dropped = summary.dropped_events,
            "Accesses arrived after shutdown and were not counted"
        );
    }
    for outcome in summary.outcomes() {
        match &outcome.result {
            Ok(stats) => eprintln!(
                "{} report: {} ({} contexts, {} bytes)",
                outcome.kind.as_str(),
                outcome.path.display(),
                stats.contexts,
                stats.bytes_written
            ),
            Err(e) => eprintln!(
                "{} report: {} FAILED: {}",
                outcome.kind.as_str(),
                outcome.path.display(),
                e
            ),
        }
    }
}

fn replay_trace(
    args: &ReplayArgs,
    host: &ReplayHost,
    plugin: &UnigramPlugin,
    resolver: &SnapshotResolver,
) -> Result<ReplayStats> {
    if args.trace.as_os_str() == "-" {
        return Ok(replay::replay(io::stdin().lock(), host, plugin, resolver)?);
    }
    let file = File::open(&args.trace)
        .with_context(|| format!("Failed to open trace {}", args.trace.display()))?;
    replay::replay(BufReader::new(file), host, plugin, resolver)
        .with_context(|| format!("Failed to replay {}", args.trace.display()))
}

fn run_replay(args: &ReplayArgs) -> Result<()> {
    let config = load_config(args)?;
    let mut plugin = UnigramPlugin::new(config);
    let mut host = ReplayHost::default();
    plugin.initialize(&mut host)?;

    let resolver = SnapshotResolver::new(args.stack_kind.into());
    let replayed = replay_trace(args, &host, &plugin, &resolver);
    if let Ok(stats) = &replayed {
        eprintln!(
            "Replayed {} reads and {} writes ({} bytes)",
            stats.reads, stats.writes, stats.bytes
        );
    }

    // Accesses seen before a bad trace line still reach the reports
    let summary = plugin.finalize()?;
    print_flush_summary(&summary);
    replayed?;
    if !summary.all_written() {
        anyhow::bail!("Not all reports could be written");
    }
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> Result<()> {
    let report = report::read_report_file(&args.report)
        .with_context(|| format!("Failed to decode report {}", args.report.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "address width: {} bytes, stack kind width: {} bytes, byte order: {:?}",
        report.header.address_width, report.header.stack_kind_width, report.header.byte_order
    );
    println!("contexts: {}", report.records.len());
    for record in &report.records {
        let distinct = record.counts.as_slice().iter().filter(|&&c| c > 0).count();
        println!(
            "{}  total={} distinct={}",
            record.context,
            record.counts.total(),
            distinct
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match &args.command {
        Command::Replay(replay_args) => run_replay(replay_args),
        Command::Inspect(inspect_args) => run_inspect(inspect_args),
    }
}
