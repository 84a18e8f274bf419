//! Bins sorted spikes from multi-electrode-array recordings into a dense
//! `(stimulus interval, time bin, channel, unit)` count tensor.
//!
//! The usual entry point is [`process`], which reads the three input files,
//! runs an [`IntervalBinner`] and writes the tensor and its metadata as
//! compressed NPZ archives. The pieces are public for callers that already
//! hold their data in memory.

pub mod binner;
pub mod config;
pub mod features;
pub mod reader;
pub mod types;
pub mod writer;

use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

// Re-export types
pub use binner::{bin_spikes, IntervalBinner};
pub use config::BinningConfig;
pub use types::*;
pub use writer::OutputPaths;

/// The three files a binning run consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPaths {
    /// Spike-sorter export (`channel, unit, timestamp` rows)
    pub spikes: PathBuf,
    /// Stimulus onsets, one per retained stimulus
    pub sync_markers: PathBuf,
    /// Stimulus presentation log (JSON)
    pub stimuli: PathBuf,
}

impl InputPaths {
    pub fn new(
        spikes: impl Into<PathBuf>,
        sync_markers: impl Into<PathBuf>,
        stimuli: impl Into<PathBuf>,
    ) -> Self {
        InputPaths {
            spikes: spikes.into(),
            sync_markers: sync_markers.into(),
            stimuli: stimuli.into(),
        }
    }

    /// Fails with [`SpikeBinError::MissingInput`] on the first absent file.
    pub fn check_exist(&self) -> Result<()> {
        for path in [&self.spikes, &self.sync_markers, &self.stimuli] {
            if !path.exists() {
                return Err(SpikeBinError::MissingInput(path.clone()));
            }
        }
        Ok(())
    }
}

/// Everything read from the input files of one run.
#[derive(Debug, Clone)]
pub struct LoadedInputs {
    pub spikes: Vec<SpikeEvent>,
    pub sync_markers: Vec<f64>,
    /// Full stimulus list, placeholder included
    pub stimuli: Vec<StimulusDescriptor>,
}

/// Result of [`process`].
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub binned: BinnedSpikes,
    pub paths: OutputPaths,
}

/// Reads all three inputs.
///
/// # Examples
///
/// ```no_run
/// use spike_binner::{load_inputs, InputPaths};
///
/// let inputs = InputPaths::new("rec.txt", "rec_synctones.csv", "rec.stims.json");
/// match load_inputs(&inputs) {
///     Ok(loaded) => println!("{} spikes", loaded.spikes.len()),
///     Err(e) => println!("Error loading inputs: {}", e),
/// }
/// ```
pub fn load_inputs(inputs: &InputPaths) -> Result<LoadedInputs> {
    inputs.check_exist()?;
    let stimuli = reader::load_stimuli(&inputs.stimuli)?;
    let sync_markers = reader::load_sync_markers(&inputs.sync_markers)?;
    let spikes = reader::load_spikes(&inputs.spikes)?;
    Ok(LoadedInputs {
        spikes,
        sync_markers,
        stimuli,
    })
}

/// Runs a full binning pass from files to files.
///
/// Outputs are named after the spike file and placed in `output_dir` (or the
/// current directory). Either both archives are written or neither is.
pub fn process(
    inputs: &InputPaths,
    config: &BinningConfig,
    output_dir: Option<&Path>,
) -> Result<ProcessOutput> {
    let tic = Instant::now();

    config.validate()?;
    let paths = OutputPaths::for_spike_file(&inputs.spikes, output_dir)?;
    let loaded = load_inputs(inputs)?;

    let binned = IntervalBinner::new(config.clone())?.bin(
        &loaded.spikes,
        &loaded.sync_markers,
        &loaded.stimuli,
    )?;
    writer::write_outputs(&binned, &paths)?;

    info!(
        "Done! Elapsed time: {:.1} seconds",
        tic.elapsed().as_secs_f64()
    );

    Ok(ProcessOutput { binned, paths })
}
