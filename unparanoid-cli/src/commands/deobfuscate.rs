use std::{
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use serde::Serialize;
use unparanoid::deobfuscation::{DeobfuscationReport, EngineConfig, SiteStatus};

use crate::{
    app::GlobalOptions,
    commands::common::{build_engine, check_target, display_path, key_hex},
    output::{Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct RunReport {
    root: String,
    dry_run: bool,
    files_scanned: usize,
    files_written: usize,
    rewritten: usize,
    unresolved: usize,
    errored: usize,
    unsupported: usize,
    malformed: usize,
    time_ms: u128,
    activity: String,
    decoders: Vec<DecoderReport>,
    sites: Vec<SiteReport>,
    files: Vec<FileReport>,
    events: Vec<EventReport>,
}

#[derive(Debug, Serialize)]
struct DecoderReport {
    accessor: String,
    convention: String,
    scheme: Option<String>,
    status: String,
    chunks: usize,
    decoded: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct SiteReport {
    file: String,
    line: usize,
    method: String,
    decoder: String,
    key: Option<String>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    written: Option<String>,
    rewritten: usize,
    pruned: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct EventReport {
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    message: String,
}

pub struct DeobfuscateOptions<'a> {
    pub output: Option<&'a Path>,
    pub strict: bool,
    pub prune: bool,
    pub dry_run: bool,
    pub threads: Option<usize>,
    pub report: Option<&'a Path>,
    pub detailed: bool,
    pub global: &'a GlobalOptions,
}

pub fn run(
    target: &Path,
    opts: &DeobfuscateOptions,
    cancel: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    check_target(target)?;
    let engine = build_engine(build_config(opts), cancel);
    let result = engine
        .process(target)
        .with_context(|| format!("deobfuscation failed: {}", target.display()))?;

    let report = build_report(target, &result);

    if let Some(report_file) = opts.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(report_file, json)
            .with_context(|| format!("failed to write report: {}", report_file.display()))?;
        eprintln!("Report written to {}", report_file.display());
    }

    if opts.global.json {
        let json = serde_json::to_string_pretty(&report)?;
        println!("{json}");
    } else {
        display(&report, opts.detailed);
    }

    Ok(())
}

fn build_config(opts: &DeobfuscateOptions) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_strict(opts.strict)
        .with_pruning(opts.prune)
        .with_dry_run(opts.dry_run);
    if let Some(dir) = opts.output {
        config = config.with_output_dir(dir);
    }
    if let Some(threads) = opts.threads {
        config = config.with_threads(threads);
    }
    config
}

fn build_report(root: &Path, result: &DeobfuscationReport) -> RunReport {
    let sites = result
        .sites
        .iter()
        .map(|site| {
            let (value, reason) = match &site.status {
                SiteStatus::Rewritten(value) => (Some(value.to_string_lossy()), None),
                SiteStatus::Unresolved(reason) => (None, Some(reason.to_string())),
                SiteStatus::Unsupported => (None, Some(site.status.to_string())),
                SiteStatus::Failed(error) => (None, Some(error.to_string())),
            };
            SiteReport {
                file: display_path(root, &site.path),
                line: site.line,
                method: site.method.clone(),
                decoder: site.decoder.clone(),
                key: site.key.map(key_hex),
                status: site.status.label(),
                value,
                reason,
            }
        })
        .collect();

    let files = result
        .files
        .iter()
        .map(|f| FileReport {
            file: display_path(root, &f.path),
            written: f.written.as_ref().map(|p| p.display().to_string()),
            rewritten: f.rewritten,
            pruned: f.pruned.clone(),
            error: f.error.as_ref().map(ToString::to_string),
        })
        .collect();

    let decoders = result
        .descriptors
        .iter()
        .map(|d| DecoderReport {
            accessor: d.accessor.clone(),
            convention: d.convention.to_string(),
            scheme: d.scheme.map(|s| s.to_string()),
            status: d.status.to_string(),
            chunks: d.chunks,
            decoded: d.decoded,
            failed: d.failed,
        })
        .collect();

    let events = result
        .events
        .iter()
        .map(|e| EventReport {
            kind: e.kind.to_string(),
            file: e.file.as_ref().map(|p| display_path(root, p)),
            line: e.line,
            message: e.message.clone(),
        })
        .collect();

    RunReport {
        root: root.display().to_string(),
        dry_run: result.dry_run,
        files_scanned: result.files_scanned,
        files_written: result.files_written(),
        rewritten: result.rewritten(),
        unresolved: result.unresolved(),
        errored: result.errored(),
        unsupported: result.unsupported(),
        malformed: result.malformed(),
        time_ms: result.total_time.as_millis(),
        activity: result.events.summary(),
        decoders,
        sites,
        files,
        events,
    }
}

fn display(report: &RunReport, detailed: bool) {
    if report.decoders.is_empty() {
        eprintln!("No Paranoid decoder found under {}", report.root);
    } else {
        eprintln!("Decoders:");
        let mut table = TabWriter::new(&[
            ("ACCESSOR", Align::Left),
            ("CONVENTION", Align::Left),
            ("SCHEME", Align::Left),
            ("STATUS", Align::Left),
            ("CHUNKS", Align::Right),
            ("DECODED", Align::Right),
            ("FAILED", Align::Right),
        ]);
        for d in &report.decoders {
            table.row(vec![
                d.accessor.clone(),
                d.convention.clone(),
                d.scheme.clone().unwrap_or_else(|| "-".to_string()),
                d.status.clone(),
                d.chunks.to_string(),
                d.decoded.to_string(),
                d.failed.to_string(),
            ]);
        }
        table.print();
    }

    let skipped: Vec<&SiteReport> = report
        .sites
        .iter()
        .filter(|s| s.status != "rewritten")
        .collect();
    if detailed && !skipped.is_empty() {
        eprintln!();
        eprintln!("Untouched call sites:");
        let mut table = TabWriter::new(&[
            ("LOCATION", Align::Left),
            ("METHOD", Align::Left),
            ("STATUS", Align::Left),
            ("REASON", Align::Left),
        ]);
        for s in skipped {
            table.row(vec![
                format!("{}:{}", s.file, s.line),
                s.method.clone(),
                s.status.to_string(),
                s.reason.clone().unwrap_or_default(),
            ]);
        }
        table.print();
    }

    if detailed && !report.events.is_empty() {
        eprintln!();
        eprintln!("Events:");
        for e in &report.events {
            let location = match (&e.file, e.line) {
                (Some(file), Some(line)) => format!("{file}:{line}: "),
                (Some(file), None) => format!("{file}: "),
                _ => String::new(),
            };
            eprintln!("  [{}] {location}{}", e.kind, e.message);
        }
    }

    let unreadable: Vec<&FileReport> = report.files.iter().filter(|f| f.error.is_some()).collect();
    if !unreadable.is_empty() {
        eprintln!();
        eprintln!("Unreadable files:");
        for f in unreadable {
            eprintln!("  {}: {}", f.file, f.error.as_deref().unwrap_or_default());
        }
    }

    eprintln!();
    let verb = if report.dry_run { "would be rewritten" } else { "rewritten" };
    eprintln!(
        "{} call sites {verb} in {} of {} files",
        report.rewritten,
        report.files.iter().filter(|f| f.rewritten > 0).count(),
        report.files_scanned
    );
    if report.unresolved + report.errored + report.unsupported > 0 {
        eprintln!(
            "  Left untouched: {} unresolved, {} errored, {} unsupported",
            report.unresolved, report.errored, report.unsupported
        );
    }
    eprintln!("  Activity: {}", report.activity);
    #[allow(clippy::cast_precision_loss)]
    let time_secs = report.time_ms as f64 / 1000.0;
    eprintln!("  Time: {time_secs:.1}s");
}
