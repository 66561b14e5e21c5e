use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nova_hprof::{
    dump_heap, init_tracing, parse_dump, DanglingReference, DumpRequest, DumpSummary,
    HeapSnapshot, HprofConfig, InspectSummary, RedactionRequest,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nova-hprof", version, about = "Nova heap dumps (dump, inspect)")]
struct Cli {
    /// TOML configuration file (`[dump]`, `[redaction]`, `[logging]`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write an HPROF dump of a heap snapshot, optionally redacted
    Dump(DumpArgs),
    /// Summarize an HPROF file and check it for dangling references
    Inspect(InspectArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// JSON heap snapshot to dump
    #[arg(long)]
    heap: PathBuf,
    /// Output file (defaults to `dump.default_path`, usually `heap.bin`)
    output: Option<PathBuf>,
    /// Requested redaction mode (`off`, `annotation`, `map`)
    #[arg(long)]
    redact: Option<String>,
    /// Package prefixes exempt from annotation redaction
    #[arg(long, requires = "redact")]
    redact_classpath: Option<String>,
    /// Inline `key:value` redaction map
    #[arg(long, requires = "redact")]
    redact_map: Option<String>,
    /// File with one `key:value` (or `key=value`) entry per line
    #[arg(long, requires = "redact")]
    redact_map_file: Option<PathBuf>,
    /// Credential authorizing the requested redaction, as `password,salt`
    #[arg(long)]
    redact_password: Option<String>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct InspectArgs {
    /// HPROF file to read
    file: PathBuf,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn load_config(path: Option<&PathBuf>) -> Result<HprofConfig> {
    let mut config = match path {
        Some(path) => HprofConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => HprofConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);
    tracing::debug!(
        target: "nova.hprof",
        config = ?cli.config.as_ref().map(|path| path.display().to_string()),
        redaction = %config.redaction.mode,
        "configuration loaded"
    );

    match cli.command {
        Command::Dump(args) => {
            let heap = HeapSnapshot::from_json_file(&args.heap)?;
            let request = DumpRequest {
                destination: args.output,
                credential: args.redact_password,
                redaction: args.redact.map(|mode| RedactionRequest {
                    mode,
                    classpath: args.redact_classpath,
                    map: args.redact_map,
                    map_file: args.redact_map_file,
                }),
            };
            let summary = dump_heap(&heap, &request, &config)?;
            print_dump_summary(&summary, args.json)?;
            Ok(0)
        }
        Command::Inspect(args) => {
            let bytes = std::fs::read(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let contents = parse_dump(&bytes)
                .with_context(|| format!("failed to parse {}", args.file.display()))?;
            let report = InspectReport {
                summary: contents.summary(),
                dangling: contents.dangling_references(),
            };
            let exit = if report.dangling.is_empty() { 0 } else { 1 };
            print_inspect_report(&report, args.json)?;
            Ok(exit)
        }
    }
}

#[derive(Serialize)]
struct InspectReport {
    summary: InspectSummary,
    dangling: Vec<DanglingReference>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_dump_summary(summary: &DumpSummary, json: bool) -> Result<()> {
    if json {
        return print_json(summary);
    }
    let stats = &summary.stats;
    println!("heap dump: {}", summary.path.display());
    println!("  redaction: {} ({:?})", summary.redaction, summary.source);
    println!("  classes: {}", stats.classes);
    println!("  instances: {}", stats.instances);
    println!("  object_arrays: {}", stats.object_arrays);
    println!("  primitive_arrays: {}", stats.primitive_arrays);
    println!("  roots: {}", stats.roots);
    println!(
        "  redacted: {} fields, {} arrays",
        stats.redacted_fields, stats.redacted_arrays
    );
    println!("  bytes_written: {}", stats.bytes_written);
    Ok(())
}

fn print_inspect_report(report: &InspectReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    let summary = &report.summary;
    println!("hprof: id_size={} timestamp={}", summary.id_size, summary.timestamp_millis);
    println!("  strings: {}", summary.strings);
    println!("  classes: {}", summary.classes);
    println!("  instances: {}", summary.instances);
    println!("  object_arrays: {}", summary.object_arrays);
    println!("  primitive_arrays: {}", summary.primitive_arrays);
    println!("  roots: {}", summary.roots);
    println!("  segments: {}", summary.segments);
    if !summary.complete {
        println!("  warning: missing HEAP DUMP END record");
    }
    if report.dangling.is_empty() {
        println!("  dangling references: none");
    } else {
        println!("  dangling references: {}", report.dangling.len());
        for dangling in &report.dangling {
            println!(
                "    0x{:x} -> 0x{:x} ({})",
                dangling.from, dangling.to, dangling.context
            );
        }
    }
    Ok(())
}
