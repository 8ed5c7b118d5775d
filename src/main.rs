use clap::{Parser, Subcommand, ValueEnum};
use slicer_thumbs::config;
use slicer_thumbs::output;
use slicer_thumbs::scanner;
use slicer_thumbs::storage::LOCAL;
use slicer_thumbs::sync::{Event, EventKind, LocalOperator, Synchronizer};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slicer-thumbs")]
#[command(about = "Extract slicer thumbnails from gcode and keep a thumbnail cache in sync")]
#[command(long_about = "\
Extract slicer thumbnails from gcode and keep a thumbnail cache in sync

Slicers embed preview images in the comment header of the gcode they write,
either as base64 PNG blocks (PrusaSlicer, SuperSlicer, Cura) or as MKS TFT
hex pixel dumps. This tool pulls the best one out as a PNG, mirrors it into
a thumbnail cache, and records its URL in the file's metadata.

Data directory layout:

  data/
  ├── config.toml                  # Optional, see 'gen-config'
  ├── uploads/                     # Local storage root
  │   ├── .metadata.json           # Per-file metadata (thumbnail, thumbnail_src)
  │   └── parts/bracket.gcode
  └── thumbnails/                  # Thumbnail cache, mirrors uploads/
      └── parts/bracket.png

Events can be piped in as JSON lines:

  {\"event\": \"FileAdded\", \"storage\": \"local\", \"path\": \"parts/bracket.gcode\", \"type\": [\"machinecode\", \"gcode\"]}

Set RUST_LOG to control log output (default: info).")]
#[command(version)]
struct Cli {
    /// Data directory holding config.toml, the storage root, and the cache
    #[arg(long, default_value = ".", global = true)]
    data_dir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the thumbnail of one gcode file to a PNG
    Extract { gcode: PathBuf, out: PathBuf },
    /// List thumbnail candidates in a gcode file without decoding them
    Scan { gcode: PathBuf },
    /// Deliver one lifecycle event
    Event {
        kind: EventArg,
        path: String,
        #[arg(long, default_value = LOCAL)]
        storage: String,
        /// Type tags of the file (repeatable)
        #[arg(long = "type", default_values_t = ["machinecode".to_string(), "gcode".to_string()])]
        type_tags: Vec<String>,
    },
    /// Deliver JSON-lines events read from stdin, in order
    Events,
    /// Backfill thumbnails for every file in storage
    Crawl {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum EventArg {
    FileAdded,
    FileRemoved,
    FolderAdded,
    FolderRemoved,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::FileAdded => EventKind::FileAdded,
            EventArg::FileRemoved => EventKind::FileRemoved,
            EventArg::FolderAdded => EventKind::FolderAdded,
            EventArg::FolderRemoved => EventKind::FolderRemoved,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Extract { gcode, out } => {
            let artifact = slicer_thumbs::extract::extract(&gcode, &out)?;
            output::print_extract_output(&gcode, artifact.as_ref());
        }
        Command::Scan { gcode } => {
            let blocks = scanner::scan_file(&gcode)?;
            output::print_scan_output(&gcode, &blocks);
        }
        Command::Event {
            kind,
            path,
            storage,
            type_tags,
        } => {
            let config = config::load_config(&cli.data_dir)?;
            let mut sync = Synchronizer::open(&cli.data_dir, &config)?;
            let event = Event {
                kind: kind.into(),
                storage,
                path,
                type_tags,
            };
            let outcome = sync.handle(&event)?;
            output::print_event_outcome(&event, &outcome);
        }
        Command::Events => {
            let config = config::load_config(&cli.data_dir)?;
            let mut sync = Synchronizer::open(&cli.data_dir, &config)?;
            for (number, line) in std::io::stdin().lock().lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: Event = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(line = number + 1, error = %e, "skipping malformed event");
                        continue;
                    }
                };
                match sync.handle(&event) {
                    Ok(outcome) => output::print_event_outcome(&event, &outcome),
                    Err(e) => warn!(path = %event.path, error = %e, "event failed"),
                }
            }
        }
        Command::Crawl { json } => {
            let config = config::load_config(&cli.data_dir)?;
            let mut sync = Synchronizer::open(&cli.data_dir, &config)?;
            let report = sync.crawl_command(&LocalOperator)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_crawl_report(&report);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
