use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use tracing::{debug, info};

use crate::aggregate::StatsState;
use crate::config::{MonitorConfig, RuntimeSettings};
use crate::debounce::Debouncer;
use crate::document::{DocumentSource, FileDocument};
use crate::monitor::{ScanOutcome, ScanPipeline};
use crate::report::{self, ReportView, TimeRange};
use crate::store::{self, JsonFileStore, KeyValueStore};
use crate::ui::{self, RenderOptions};
use crate::util::{format_tokens, human_duration};
use crate::watch::{DocumentWatcher, MutationBatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub scans: u64,
    pub merges: u64,
}

/// Watches `document` until Ctrl+C, merging a fresh snapshot after every
/// quiet period.
pub fn run_watch(config: &MonitorConfig, runtime: &RuntimeSettings, document: &Path) -> Result<()> {
    let stop = install_stop_signal()?;
    let store = open_store(config)?;
    let mut pipeline = ScanPipeline::with_modes(store, &config.modes);
    let source = FileDocument::new(document);
    let (watcher, events) = DocumentWatcher::spawn(document)?;

    info!(
        document = %watcher.path().display(),
        store = %pipeline.store().path().display(),
        debounce_ms = runtime.debounce_window.as_millis() as u64,
        "watching document"
    );
    println!("Press Ctrl+C to stop.");

    let started = Instant::now();
    let summary = drive(&mut pipeline, &source, &events, runtime, &stop)?;
    info!(
        scans = summary.scans,
        merges = summary.merges,
        uptime = %human_duration(started.elapsed()),
        "stopped"
    );
    Ok(())
}

/// The watch loop proper: bursts of mutation batches collapse into one scan
/// once `runtime.debounce_window` passes without new batches. An initial scan
/// is armed `runtime.initial_scan_delay` after start.
pub fn drive<S: KeyValueStore>(
    pipeline: &mut ScanPipeline<S>,
    source: &dyn DocumentSource,
    events: &Receiver<MutationBatch>,
    runtime: &RuntimeSettings,
    stop: &AtomicBool,
) -> Result<WatchSummary> {
    let mut debouncer = Debouncer::new(runtime.debounce_window);
    debouncer.arm_at(Instant::now() + runtime.initial_scan_delay);
    let mut summary = WatchSummary::default();

    while !stop.load(Ordering::Relaxed) {
        let wait = debouncer
            .time_until_deadline(Instant::now())
            .map_or(runtime.idle_poll_interval, |left| {
                left.min(runtime.idle_poll_interval)
            });
        match events.recv_timeout(wait) {
            Ok(batch) if batch.is_scan_worthy() => debouncer.signal(Instant::now()),
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => bail!("document watcher stopped unexpectedly"),
        }

        if debouncer.poll(Instant::now()) {
            summary.scans += 1;
            if let Some(ScanOutcome::Merged(_)) = pipeline.run_cycle(source) {
                summary.merges += 1;
            }
            debouncer.complete();
        }
    }
    Ok(summary)
}

pub fn scan_once(config: &MonitorConfig, document: &Path) -> Result<u8> {
    let store = open_store(config)?;
    let mut pipeline = ScanPipeline::with_modes(store, &config.modes);
    let loaded = FileDocument::new(document).load()?;

    match pipeline.scan(&loaded)? {
        ScanOutcome::Merged(report) => {
            println!(
                "session {} [{}]: {:+} tokens, {:+} turns (total {})",
                report.session_id,
                report.mode,
                report.delta.total_tokens(),
                report.delta.turns,
                format_tokens(report.global.total_tokens.max(0) as u64)
            );
            Ok(0)
        }
        ScanOutcome::NoTurns => {
            println!("No conversation turns rendered in {}.", document.display());
            Ok(0)
        }
        ScanOutcome::Skipped => {
            println!("Another scan is in progress; nothing done.");
            Ok(1)
        }
    }
}

pub fn print_status(config: &MonitorConfig, check: bool) -> Result<u8> {
    let store = open_existing_store(config)?;
    let summary = report::summarize(&store)?;
    let consistency = if check {
        Some(report::verify_consistency(&StatsState::load(&store)?))
    } else {
        None
    };

    let mut out = io::stdout().lock();
    ui::render_status(
        &mut out,
        &summary,
        store.path(),
        consistency.as_ref(),
        RenderOptions::detect(),
    )?;
    out.flush()?;

    match consistency {
        Some(check) if !check.is_consistent() => Ok(1),
        _ => Ok(0),
    }
}

pub fn print_report(config: &MonitorConfig, range: TimeRange) -> Result<()> {
    let store = open_existing_store(config)?;
    let state = StatsState::load(&store)?;
    let view = ReportView::build(&state, range, Utc::now());

    let mut out = io::stdout().lock();
    ui::render_report(&mut out, &view, RenderOptions::detect())?;
    out.flush()?;
    Ok(())
}

pub fn export(config: &MonitorConfig, out_dir: Option<PathBuf>) -> Result<()> {
    let store = open_existing_store(config)?;
    let dir = match out_dir {
        Some(dir) => dir,
        None => env::current_dir().context("failed to resolve current directory")?,
    };
    let path = report::write_export(&store, &dir, Local::now().date_naive())
        .with_context(|| format!("failed to export to {}", dir.display()))?;
    println!("Exported statistics to {}", path.display());
    Ok(())
}

pub fn clear(config: &MonitorConfig, yes: bool) -> Result<u8> {
    if !yes && !confirm_clear()? {
        println!("Cancelled; statistics left untouched.");
        return Ok(1);
    }

    let mut store = open_existing_store(config)?;
    let _lock = store.writer_lock()?;
    store.clear()?;
    store::init(&mut store)?;
    info!(store = %store.path().display(), "statistics cleared");
    println!("All statistics cleared.");
    Ok(0)
}

/// Path given on the command line, else the configured one.
pub fn resolve_document(cli_path: Option<PathBuf>, config: &MonitorConfig) -> Result<PathBuf> {
    cli_path.or_else(|| config.document_path()).context(
        "no document to watch; pass a path or set document.path in config.json",
    )
}

fn confirm_clear() -> Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        bail!("refusing to clear statistics without --yes on a non-interactive input");
    }
    print!("Clear all statistics? This cannot be undone. [y/N] ");
    io::stdout().flush()?;

    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// Opens the store and seeds or migrates it for writing.
fn open_store(config: &MonitorConfig) -> Result<JsonFileStore> {
    let mut store = open_existing_store(config)?;
    let outcome = store::init(&mut store)
        .with_context(|| format!("failed to initialise {}", store.path().display()))?;
    debug!(?outcome, store = %store.path().display(), "store ready");
    Ok(store)
}

fn open_existing_store(config: &MonitorConfig) -> Result<JsonFileStore> {
    let path = config.store_path();
    let store = JsonFileStore::open(path.clone())
        .with_context(|| format!("failed to open store {}", path.display()))?;
    Ok(store.with_exclusive_writer(config.store.exclusive_writer))
}

fn install_stop_signal() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl+C handler")?;
    Ok(stop)
}
