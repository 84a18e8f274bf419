//! `spike_binner` binary: bins one recording's spikes into a 4-D count tensor.
//!
//! # Usage
//!
//! ```bash
//! spike_binner rec.txt rec_synctones.csv rec.stims.json
//! spike_binner rec.txt rec_synctones.csv rec.stims.json --bin-width-ms 10 --output-dir out/
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use spike_binner::{process, BinningConfig, InputPaths};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "spike_binner",
    version,
    about = "Bin sorted spikes into a (stimulus, time bin, channel, unit) tensor",
    long_about = None
)]
struct Args {
    /// Spike-sorter export: preamble line, header, then channel,unit,timestamp rows.
    #[arg(value_name = "SPIKE_FILE")]
    spikes: PathBuf,

    /// Sync marker CSV: header, then one stimulus onset (seconds) per row.
    #[arg(value_name = "SYNCTONES_FILE")]
    sync_markers: PathBuf,

    /// Stimulus log JSON with a `stimuli` array.
    #[arg(value_name = "STIMS_FILE")]
    stimuli: PathBuf,

    /// JSON file with binning settings. Flags below override it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Width of one time bin in milliseconds.
    #[arg(long, value_name = "MS")]
    bin_width_ms: Option<f64>,

    /// Directory for the output archives (default: current directory).
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Abort when the tensor would need more than this many MiB.
    #[arg(long, value_name = "MIB")]
    max_tensor_mb: Option<f64>,

    /// Fail when stimulus windows overlap instead of warning.
    #[arg(long, default_value_t = false)]
    reject_overlap: bool,

    /// Print the binning metadata as JSON on stdout when done.
    #[arg(long, default_value_t = false)]
    print_metadata: bool,

    /// Log level (off, trace, debug, info, warn, error).
    #[arg(long, default_value = "info", value_parser = clap::value_parser!(LevelFilter))]
    log_level: LevelFilter,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> spike_binner::Result<()> {
    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            BinningConfig::from_json(path)?
        }
        None => BinningConfig::default(),
    };
    apply_overrides(&mut config, args);

    let inputs = InputPaths::new(&args.spikes, &args.sync_markers, &args.stimuli);
    let output = process(&inputs, &config, args.output_dir.as_deref())?;

    if args.print_metadata {
        let json = serde_json::to_string_pretty(&output.binned.metadata)
            .map_err(|e| spike_binner::SpikeBinError::Other(e.to_string()))?;
        println!("{}", json);
    }

    Ok(())
}

fn apply_overrides(config: &mut BinningConfig, args: &Args) {
    if let Some(width) = args.bin_width_ms {
        config.bin_width_ms = width;
    }
    if let Some(mib) = args.max_tensor_mb {
        config.max_tensor_bytes = Some((mib * 1024.0 * 1024.0) as u64);
    }
    if args.reject_overlap {
        config.reject_overlap = true;
    }
}
