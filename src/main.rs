//! fcindex CLI - build a forensic timeline from JSON-lines events and read
//! its virtual export files

use clap::{Parser, Subcommand};
use fcindex::config;
use fcindex::timeline::export;
use fcindex::ui::{self, Icons, Spinner};
use fcindex::{events, ForensicContext, Forensics, StoreType};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "fcindex")]
#[command(version = "0.1.0")]
#[command(about = "Forensic timeline index - byte-addressable timeline export files over SQLite")]
#[command(long_about = r#"
fcindex ingests forensic events into an embedded SQLite store and exposes
them as virtual export files, one plain-text and one JSON-lines file per
event type plus an aggregate view over all types.

Example usage:
  fcindex stats --input events.jsonl
  fcindex export --input events.jsonl --type NTFS --json --offset 4096 --length 512
  fcindex locate --input events.jsonl --type all --offset 4096
  fcindex serve --input events.jsonl --port 8080
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ./fcindex.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store type: memory, temp-file-close, temp-file-no-close, temp-file-static or 1-4
    #[arg(short, long, global = true)]
    store: Option<StoreType>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a byte window of an export file
    Export {
        /// JSON-lines event file
        #[arg(short, long)]
        input: PathBuf,

        /// Timeline type short name, or "all" for the aggregate view
        #[arg(short, long, default_value = "all")]
        r#type: String,

        /// Read the JSON-lines file instead of the text file
        #[arg(short, long)]
        json: bool,

        /// First byte to read
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Number of bytes to read (defaults to the rest of the file)
        #[arg(short, long)]
        length: Option<u64>,
    },

    /// Find the row owning a byte offset of an export file
    Locate {
        /// JSON-lines event file
        #[arg(short, long)]
        input: PathBuf,

        /// Timeline type short name, or "all" for the aggregate view
        #[arg(short, long, default_value = "all")]
        r#type: String,

        /// Byte offset inside the export file
        #[arg(short, long)]
        offset: u64,

        /// Use the JSON-lines file
        #[arg(short, long)]
        json: bool,
    },

    /// Show timeline types and export file sizes
    Stats {
        /// JSON-lines event file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Serve the export files over HTTP
    Serve {
        /// JSON-lines event file
        #[arg(short, long)]
        input: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let forensics = Forensics::new(config);

    let result = run(&forensics, cli.store, cli.command);
    forensics.close();
    result
}

fn run(forensics: &Forensics, store: Option<StoreType>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Export {
            input,
            r#type,
            json,
            offset,
            length,
        } => {
            let ctx = load(forensics, store, &input, true)?;
            let tp = resolve_type(&ctx, &r#type)?;
            let length = match length {
                Some(length) => length,
                None => ctx.file_size(tp, json)?.saturating_sub(offset),
            };
            let bytes = export::read(&ctx, tp, json, offset, length)?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }

        Commands::Locate {
            input,
            r#type,
            offset,
            json,
        } => {
            let ctx = load(forensics, store, &input, false)?;
            let tp = resolve_type(&ctx, &r#type)?;
            let id = ctx.get_id_from_position(tp, json, offset)?;
            let map = ctx.get_map_from_id_range(tp, id, 1)?;

            ui::header(&format!("Byte {} of {}", offset, file_name(&ctx, tp, json)));
            if let Some(view) = map.get(0) {
                let start = view.entry.offset(json);
                ui::status(Icons::MAG, "Row", &id.to_string());
                ui::status(Icons::FILE, "Line starts at", &start.to_string());
                ui::status(Icons::INFO, "Byte within line", &(offset - start).to_string());

                let short = ctx
                    .timeline_type(view.entry.tp)
                    .map(|t| t.short_name)
                    .unwrap_or_default();
                ui::section("Row");
                ui::row_fields(
                    &export::format_time(view.entry.timestamp),
                    &short,
                    view.entry.action.as_str(),
                    view.entry.pid,
                    view.entry.data64,
                    view.text,
                );

                let mut line = Vec::new();
                export::render_line(&mut line, view, &short, json);
                ui::section("Line");
                print!("{}", String::from_utf8_lossy(&line));
            }
        }

        Commands::Stats { input } => {
            let started = Instant::now();
            let ctx = load(forensics, store, &input, false)?;

            ui::header(&format!("Timeline of {}", input.display()));
            let rows = ctx.query_numeric("SELECT COUNT(*) FROM timeline", &[], 1)?;
            let rows = rows.first().copied().unwrap_or(0).to_string();
            let strings = ctx.last_str_id().to_string();
            let store_name = ctx.store_type().to_string();
            let location = ctx
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(in memory)".to_string());
            println!(
                "{}",
                ui::stats_table(&[
                    ("Store", store_name.as_str()),
                    ("Location", location.as_str()),
                    ("Rows", rows.as_str()),
                    ("Strings", strings.as_str()),
                ])
            );
            ui::section("Export files");
            println!("{}", ui::types_table(&ctx.timeline_types()));
            ui::status(Icons::CLOCK, "Elapsed", &format!("{:.2?}", started.elapsed()));
        }

        Commands::Serve { input, port } => {
            let ctx = load(forensics, store, &input, false)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(fcindex::server::start_server(port, ctx))?;
        }
    }

    Ok(())
}

/// Initialize the store and ingest `input`. `quiet` keeps stdout clean for
/// commands that write file content.
fn load(
    forensics: &Forensics,
    store: Option<StoreType>,
    input: &Path,
    quiet: bool,
) -> anyhow::Result<Arc<ForensicContext>> {
    let ctx = match store {
        Some(store) => forensics.initialize(store, false)?,
        None => forensics.initialize_default()?,
    };
    let records = events::load_events(input)?;

    let spinner = Spinner::new(&format!("Ingesting {} events", records.len()));
    let appended = events::ingest(&ctx, &records, |n| {
        if n % 10_000 == 0 {
            spinner.set_message(&format!("Ingested {} / {} events", n, records.len()));
        }
    });
    spinner.finish_and_clear();
    let appended = appended?;

    if !quiet {
        ui::success(&format!(
            "Ingested {} events into {} store",
            appended,
            ctx.store_type()
        ));
    }
    Ok(ctx)
}

fn resolve_type(ctx: &ForensicContext, name: &str) -> anyhow::Result<u32> {
    match ctx.timeline_type_by_name(name) {
        Some(info) => Ok(info.id),
        None => {
            let known: Vec<String> = ctx.timeline_types().into_iter().map(|t| t.short_name).collect();
            anyhow::bail!("Unknown timeline type '{}' (known: {})", name, known.join(", "))
        }
    }
}

fn file_name(ctx: &ForensicContext, tp: u32, json: bool) -> String {
    ctx.timeline_type(tp)
        .map(|t| t.file_name(json).to_string())
        .unwrap_or_default()
}
