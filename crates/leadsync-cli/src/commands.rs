use std::collections::BTreeMap;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use tracing::{info, warn};

use leadsync_fabric::{SourceEvent, WalConfig, WriteAheadLog};
use leadsync_pipeline::{DrainReport, NormalizationRule};
use leadsync_server::SyncServer;
use leadsync_store::DeadLetterLog;
use leadsync_types::{CanonicalId, DeadLetterEntry, OriginalId, SourceId};

use crate::cli::*;
use crate::service::{Service, ServiceConfig};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Serve(args) => cmd_serve(args, format),
        Command::Check(args) => cmd_check(args, format),
        Command::CanonicalId(args) => cmd_canonical_id(args, format),
        Command::DeadLetters(args) => cmd_dead_letters(args, format),
        Command::Pending(args) => cmd_pending(args, format),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_serve(args: ServeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = ServiceConfig::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let report = runtime.block_on(serve(config))?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print_drain_report(&report);
            Ok(())
        }
    }
}

async fn serve(config: ServiceConfig) -> anyhow::Result<DrainReport> {
    let service = Service::start(&config.sync)?;
    let server = SyncServer::new(config.server, service.state().clone());
    let served = server.serve(shutdown_signal()).await;
    let report = service.drain().await?;
    served.context("HTTP server failed")?;
    Ok(report)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C; shutting down");
    }
    info!("shutdown requested");
}

fn print_drain_report(report: &DrainReport) {
    for source in &report.sources {
        let s = &source.stats;
        println!(
            "  {:<16} synced {}, dropped {}, ignored {}, dead-lettered {}, abandoned {}, retries {}, undelivered {}",
            source.source.as_str().bold(),
            s.synced,
            s.dropped,
            s.ignored,
            s.dead_lettered,
            s.abandoned,
            s.retries,
            source.undelivered,
        );
    }
    if report.is_clean() {
        println!("{} Drained cleanly.", "✓".green().bold());
    } else {
        println!(
            "{} Unfinished work remains in the event log and will be redelivered on restart.",
            "!".yellow().bold()
        );
    }
}

pub(crate) fn describe_rule(rule: &NormalizationRule) -> String {
    match rule {
        NormalizationRule::Passthrough => "passthrough".into(),
        NormalizationRule::Rename {
            fields,
            keep_unmapped,
        } => {
            let unmapped = if *keep_unmapped { "kept" } else { "dropped" };
            format!("rename {} field(s), unmapped {unmapped}", fields.len())
        }
        NormalizationRule::Nested { pointer } => format!("nested at {pointer}"),
    }
}

fn cmd_check(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = ServiceConfig::load(&args.config)?;
    let sync = &config.sync;

    if format == OutputFormat::Json {
        let mut server = config.server.clone();
        if server.api_token.is_some() {
            server.api_token = Some("<redacted>".into());
        }
        return print_json(&json!({ "sync": sync, "server": server }));
    }

    println!("{} {} is valid", "✓".green().bold(), args.config.display());
    println!("  Event log:    {}", sync.wal_path().display());
    println!("  Dead letters: {}", sync.dead_letter_path().display());
    println!(
        "  Writes:       {} ms deadline, {} in flight per source",
        sync.write_timeout_ms, sync.max_in_flight
    );
    println!(
        "  Retries:      {} attempts, {} ms base, x{}, {} ms cap, ±{}% jitter",
        sync.retry.max_attempts,
        sync.retry.base_delay_ms,
        sync.retry.multiplier,
        sync.retry.max_delay_ms,
        (sync.retry.jitter * 100.0).round()
    );
    println!(
        "  HTTP:         {} ({})",
        config.server.bind_addr,
        if config.server.api_token.is_some() {
            "token auth"
        } else {
            "open"
        }
    );
    println!("  Sources:");
    for source in &sync.sources {
        println!(
            "    {} {}",
            source.id.as_str().yellow(),
            describe_rule(&source.normalization).dimmed()
        );
    }
    Ok(())
}

fn cmd_canonical_id(args: CanonicalIdArgs, format: OutputFormat) -> anyhow::Result<()> {
    let source = SourceId::new(args.source).context("invalid source id")?;
    let original = OriginalId::new(args.original_id).context("invalid original id")?;
    let id = CanonicalId::derive(&source, &original);
    match format {
        OutputFormat::Json => print_json(&json!({
            "source_database": source,
            "original_id": original,
            "canonical_id": id,
        })),
        OutputFormat::Text => {
            println!("{}", id.to_hex());
            Ok(())
        }
    }
}

fn cmd_dead_letters(args: DeadLettersArgs, format: OutputFormat) -> anyhow::Result<()> {
    let entries = DeadLetterLog::read_all(&args.file)
        .with_context(|| format!("failed to read dead-letter log {}", args.file.display()))?;
    let entries = filter_by_source(entries, args.source.as_deref());

    if format == OutputFormat::Json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{}  {}/{}  attempts={}  {}",
            entry.failed_at.to_rfc3339().dimmed(),
            entry.source_id.as_str().yellow(),
            entry.original_id,
            entry.attempts,
            entry.error.red()
        );
    }
    println!("{} dead letter(s)", entries.len().to_string().bold());
    Ok(())
}

pub(crate) fn filter_by_source(entries: Vec<DeadLetterEntry>, source: Option<&str>) -> Vec<DeadLetterEntry> {
    match source {
        Some(source) => entries
            .into_iter()
            .filter(|e| e.source_id.as_str() == source)
            .collect(),
        None => entries,
    }
}

pub(crate) fn pending_by_source(events: &[SourceEvent]) -> BTreeMap<SourceId, usize> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.source.clone()).or_insert(0) += 1;
    }
    counts
}

fn cmd_pending(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = ServiceConfig::load(&args.config)?;
    let wal_path = config.sync.wal_path();
    let events = if wal_path.exists() {
        WriteAheadLog::open(&wal_path, WalConfig::default())
            .and_then(|wal| wal.recover())
            .with_context(|| format!("failed to read event log {}", wal_path.display()))?
    } else {
        Vec::new()
    };
    let counts = pending_by_source(&events);

    if format == OutputFormat::Json {
        return print_json(&json!({ "events": events.len(), "by_source": counts }));
    }
    if events.is_empty() {
        println!("No events awaiting redelivery.");
        return Ok(());
    }
    println!(
        "{} event(s) in {} will be redelivered on next start:",
        events.len().to_string().bold(),
        wal_path.display()
    );
    for (source, count) in &counts {
        println!("  {:<16} {}", source.as_str().yellow(), count);
    }
    Ok(())
}
