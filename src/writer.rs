use ndarray::{arr0, Array1};
use ndarray_npy::{NpzWriter, WriteNpzError};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::*;

/// Archive key of the occupancy tensor.
pub const TENSOR_KEY: &str = "array";

const ARRAY_SUFFIX: &str = "_4d.npz";
const METADATA_SUFFIX: &str = "_metadata.npz";
const PARTIAL_EXTENSION: &str = "partial";

/// Where the two output archives of a run are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Compressed archive holding the tensor under [`TENSOR_KEY`]
    pub array: PathBuf,
    /// Compressed archive holding one array per metadata field
    pub metadata: PathBuf,
}

impl OutputPaths {
    /// Names both outputs after the spike file's stem, e.g. `rec.txt` gives
    /// `rec_4d.npz` and `rec_metadata.npz`.
    ///
    /// Outputs go to `output_dir` when given, otherwise to the current
    /// directory.
    pub fn for_spike_file(spike_file: &Path, output_dir: Option<&Path>) -> Result<Self> {
        let stem = spike_file
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SpikeBinError::Other(format!(
                    "Cannot derive an output name from {}",
                    spike_file.display()
                ))
            })?;

        let dir = output_dir.unwrap_or_else(|| Path::new(""));
        Ok(OutputPaths {
            array: dir.join(format!("{}{}", stem, ARRAY_SUFFIX)),
            metadata: dir.join(format!("{}{}", stem, METADATA_SUFFIX)),
        })
    }
}

/// Writes the tensor and its metadata as two compressed NPZ archives.
///
/// Both archives are first written next to their destination under a
/// temporary name and only renamed into place once both are complete.
/// Outputs of an earlier run at the same paths are removed before the
/// renames, so a failure leaves neither output behind.
pub fn write_outputs<C, U>(binned: &BinnedSpikes<C, U>, paths: &OutputPaths) -> Result<()> {
    let array_tmp = partial_path(&paths.array);
    let metadata_tmp = partial_path(&paths.metadata);

    let written = write_tensor(&binned.tensor, &array_tmp)
        .and_then(|_| write_metadata(&binned.metadata, &metadata_tmp))
        .and_then(|_| remove_stale(&paths.array))
        .and_then(|_| remove_stale(&paths.metadata));
    if let Err(e) = written {
        remove_quietly(&array_tmp);
        remove_quietly(&metadata_tmp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&array_tmp, &paths.array) {
        remove_quietly(&array_tmp);
        remove_quietly(&metadata_tmp);
        return Err(SpikeBinError::io(&paths.array, e));
    }
    if let Err(e) = fs::rename(&metadata_tmp, &paths.metadata) {
        remove_quietly(&paths.array);
        remove_quietly(&metadata_tmp);
        return Err(SpikeBinError::io(&paths.metadata, e));
    }

    info!("Saved: {}", paths.array.display());
    info!("Saved: {}", paths.metadata.display());
    Ok(())
}

/// Writes a tensor to a compressed archive under [`TENSOR_KEY`].
pub fn write_tensor(tensor: &OccupancyTensor, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| SpikeBinError::io(path, e))?;
    let mut npz = NpzWriter::new_compressed(file);
    npz.add_array(TENSOR_KEY, tensor)
        .map_err(|e| npz_error(path, e))?;
    npz.finish().map_err(|e| npz_error(path, e))?;
    Ok(())
}

/// Writes each metadata field as a separately named array.
///
/// Scalars become zero-dimensional arrays. `dropped_spikes` and
/// `tensor_bytes` are reporting aids and are not stored.
pub fn write_metadata(metadata: &BinningMetadata, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| SpikeBinError::io(path, e))?;
    let mut npz = NpzWriter::new_compressed(file);

    add_metadata_arrays(&mut npz, metadata).map_err(|e| npz_error(path, e))?;
    npz.finish().map_err(|e| npz_error(path, e))?;
    Ok(())
}

fn add_metadata_arrays<W: Write + Seek>(
    npz: &mut NpzWriter<W>,
    metadata: &BinningMetadata,
) -> std::result::Result<(), WriteNpzError> {
    let shape: Array1<u64> = metadata.shape.iter().map(|&d| d as u64).collect();
    let durations = Array1::from(metadata.stimulus_durations_ms.clone());

    npz.add_array("shape", &shape)?;
    npz.add_array("time_bin_ms", &arr0(metadata.time_bin_ms))?;
    npz.add_array(
        "max_stimulus_duration_ms",
        &arr0(metadata.max_stimulus_duration_ms),
    )?;
    npz.add_array("max_time_bins", &arr0(metadata.max_time_bins as u64))?;
    npz.add_array("channels", &arr0(metadata.channels as u64))?;
    npz.add_array("units", &arr0(metadata.units as u64))?;
    npz.add_array("total_spikes", &arr0(metadata.total_spikes))?;
    npz.add_array("stimulus_durations_ms", &durations)?;
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    path.with_file_name(name)
}

/// Removes a previous output file at `path`, leaving anything else alone.
fn remove_stale(path: &Path) -> Result<()> {
    if path.is_file() {
        fs::remove_file(path).map_err(|e| SpikeBinError::io(path, e))?;
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}

fn npz_error(path: &Path, e: WriteNpzError) -> SpikeBinError {
    SpikeBinError::Npz {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}
