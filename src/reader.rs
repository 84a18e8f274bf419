use ndarray_npy::NpzReader;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::types::*;
use crate::writer::TENSOR_KEY;

// Constants used throughout the reader
const READ_BUFFER_BYTES: usize = 64 * 1024;
const SPIKE_PREAMBLE_LINES: u64 = 1;
const SPIKE_COLUMNS: usize = 3;
const DURATION_FIELD: &str = "durationMs";

/// Loads a spike-sorter export.
///
/// The file is comma-separated text. The first line is a free-form preamble
/// written by the export tool, the second is a header, and every following
/// row holds `channel, unit, timestamp` with the timestamp in seconds.
/// Columns past the third are ignored.
///
/// # Examples
///
/// ```no_run
/// let spikes = spike_binner::reader::load_spikes("recording.txt").unwrap();
/// println!("{} spikes", spikes.len());
/// ```
pub fn load_spikes<P: AsRef<Path>>(file_path: P) -> Result<Vec<SpikeEvent>> {
    let path = file_path.as_ref();
    let tic = Instant::now();
    info!("Processing: {}", path.display());

    let reader = open_buffered(path)?;
    let spikes = read_spikes(reader, path)?;

    print_spike_summary(&spikes);
    debug!(
        "Read spikes in {:.1} seconds",
        tic.elapsed().as_secs_f64()
    );

    Ok(spikes)
}

/// Reads spike rows from any buffered source. `path` is used in errors only.
pub fn read_spikes<R: BufRead>(mut reader: R, path: &Path) -> Result<Vec<SpikeEvent>> {
    // Skip the preamble; the csv reader takes over at the header line
    let mut preamble = String::new();
    reader
        .read_line(&mut preamble)
        .map_err(|e| SpikeBinError::io(path, e))?;
    if !preamble.trim().is_empty() {
        debug!("Spike file preamble: {}", preamble.trim());
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut spikes = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|source| SpikeBinError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line()) + SPIKE_PREAMBLE_LINES;

        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() < SPIKE_COLUMNS {
            return Err(parse_error(
                path,
                line,
                format!(
                    "expected channel, unit and timestamp columns, found {} field(s)",
                    record.len()
                ),
            ));
        }

        let timestamp = parse_seconds(&record[2])
            .filter(|t| *t >= 0.0)
            .ok_or_else(|| {
                parse_error(
                    path,
                    line,
                    format!("invalid spike timestamp `{}`", &record[2]),
                )
            })?;

        spikes.push(SpikeEvent::new(
            Label::parse(&record[0]),
            Label::parse(&record[1]),
            timestamp,
        ));
    }

    Ok(spikes)
}

/// Loads stimulus onsets (seconds) from the first column of a CSV file with
/// a header line.
pub fn load_sync_markers<P: AsRef<Path>>(file_path: P) -> Result<Vec<f64>> {
    let path = file_path.as_ref();
    let reader = open_buffered(path)?;
    let markers = read_sync_markers(reader, path)?;

    info!("Found {} sync marker{}.", markers.len(), plural(markers.len()));

    if markers.windows(2).any(|w| w[1] < w[0]) {
        warn!("Sync markers in {} are not in increasing order", path.display());
    }

    Ok(markers)
}

/// Reads sync markers from any source. `path` is used in errors only.
pub fn read_sync_markers<R: Read>(reader: R, path: &Path) -> Result<Vec<f64>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut markers = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|source| SpikeBinError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line());

        let Some(raw) = record.get(0).filter(|f| !f.is_empty()) else {
            continue;
        };
        let value = parse_seconds(raw).ok_or_else(|| {
            parse_error(path, line, format!("invalid sync marker `{}`", raw))
        })?;
        markers.push(value);
    }

    Ok(markers)
}

#[derive(Deserialize)]
struct StimulusFile {
    stimuli: Vec<Map<String, Value>>,
}

/// Loads the stimulus list of a presentation log.
///
/// The file is a JSON object whose `stimuli` array holds one record per
/// presented stimulus. Every record after the first must carry a numeric
/// `durationMs`; the first is the placeholder that precedes the first sync
/// marker and may omit it.
pub fn load_stimuli<P: AsRef<Path>>(file_path: P) -> Result<Vec<StimulusDescriptor>> {
    let path = file_path.as_ref();
    info!("Loading stimulus durations...");
    let reader = open_buffered(path)?;
    let stimuli = read_stimuli(reader, path)?;

    info!("Found {} stimul{}.", stimuli.len(), if stimuli.len() == 1 { "us" } else { "i" });

    Ok(stimuli)
}

/// Reads a stimulus list from any source. `path` is used in errors only.
pub fn read_stimuli<R: Read>(reader: R, path: &Path) -> Result<Vec<StimulusDescriptor>> {
    let file: StimulusFile =
        serde_json::from_reader(reader).map_err(|source| SpikeBinError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    file.stimuli
        .into_iter()
        .enumerate()
        .map(|(index, mut fields)| {
            let duration = fields.remove(DURATION_FIELD);
            let duration_ms = match (index, duration.as_ref().and_then(Value::as_f64)) {
                (_, Some(d)) => d,
                // Placeholder entry
                (0, None) => 0.0,
                (_, None) => {
                    return Err(SpikeBinError::MalformedDuration {
                        index,
                        reason: match duration {
                            Some(v) => format!("`{}` is not a number: {}", DURATION_FIELD, v),
                            None => format!("missing `{}`", DURATION_FIELD),
                        },
                    })
                }
            };
            Ok(StimulusDescriptor {
                duration_ms,
                fields,
            })
        })
        .collect()
}

/// Loads an occupancy tensor previously written by
/// [`write_outputs`](crate::writer::write_outputs).
pub fn load_tensor<P: AsRef<Path>>(file_path: P) -> Result<OccupancyTensor> {
    let path = file_path.as_ref();
    let file = File::open(path).map_err(|e| SpikeBinError::io(path, e))?;
    let npz_error = |message: String| SpikeBinError::Npz {
        path: path.to_path_buf(),
        message,
    };

    let mut npz = NpzReader::new(file).map_err(|e| npz_error(e.to_string()))?;
    let names = npz.names().map_err(|e| npz_error(e.to_string()))?;
    let name = names
        .into_iter()
        .find(|n| n.strip_suffix(".npy").unwrap_or(n.as_str()) == TENSOR_KEY)
        .ok_or_else(|| npz_error(format!("no `{}` array in archive", TENSOR_KEY)))?;

    let tensor: OccupancyTensor = npz.by_name(&name).map_err(|e| npz_error(e.to_string()))?;
    info!("Loaded tensor of shape {:?}", tensor.shape());
    Ok(tensor)
}

/// Opens a file with a large read buffer, mapping failures to the path.
fn open_buffered(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| SpikeBinError::io(path, e))?;
    Ok(BufReader::with_capacity(READ_BUFFER_BYTES, file))
}

fn parse_seconds(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_error(path: &Path, line: u64, message: String) -> SpikeBinError {
    SpikeBinError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    }
}

fn plural(n: usize) -> &'static str {
    if n != 1 {
        "s"
    } else {
        ""
    }
}

// Helper function to print spike summary
fn print_spike_summary(spikes: &[SpikeEvent]) {
    let channels: std::collections::BTreeSet<&Label> = spikes.iter().map(|s| &s.channel).collect();
    let units: std::collections::BTreeSet<&Label> = spikes.iter().map(|s| &s.unit).collect();

    info!(
        "Found {} spike{} on {} channel{} across {} unit{}.",
        spikes.len(),
        plural(spikes.len()),
        channels.len(),
        plural(channels.len()),
        units.len(),
        plural(units.len())
    );

    let first = spikes.iter().map(|s| s.timestamp).reduce(f64::min);
    let last = spikes.iter().map(|s| s.timestamp).reduce(f64::max);
    if let (Some(first), Some(last)) = (first, last) {
        info!("Spike times span {:.3} to {:.3} seconds.", first, last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn path() -> &'static Path {
        Path::new("test-input")
    }

    #[test]
    fn spike_rows_follow_preamble_and_header() {
        let text = "Spikes exported from recording 00068\n\
                    Channel,Unit,Timestamp\n\
                    12,1,0.5\n\
                    \n\
                    3, noise ,1.25\n\
                    7,0,2.0,extra\n";
        let spikes = read_spikes(Cursor::new(text), path()).unwrap();

        assert_eq!(spikes.len(), 3);
        assert_eq!(spikes[0], SpikeEvent::new(Label::Int(12), Label::Int(1), 0.5));
        assert_eq!(spikes[1].unit, Label::from("noise"));
        assert_eq!(spikes[1].timestamp, 1.25);
        assert_eq!(spikes[2].channel, Label::Int(7));
    }

    #[test]
    fn header_only_spike_file_is_empty() {
        let spikes = read_spikes(Cursor::new("preamble\nChannel,Unit,Timestamp\n"), path()).unwrap();
        assert!(spikes.is_empty());
    }

    #[test]
    fn bad_timestamp_reports_line() {
        let text = "preamble\nChannel,Unit,Timestamp\n1,1,0.1\n1,1,soon\n";
        let err = read_spikes(Cursor::new(text), path()).unwrap_err();
        match err {
            SpikeBinError::Parse { line, message, .. } => {
                assert_eq!(line, 4);
                assert!(message.contains("soon"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let text = "preamble\nChannel,Unit,Timestamp\n1,1,-0.1\n";
        assert!(matches!(
            read_spikes(Cursor::new(text), path()),
            Err(SpikeBinError::Parse { .. })
        ));
    }

    #[test]
    fn short_spike_row_is_rejected() {
        let text = "preamble\nChannel,Unit,Timestamp\n1,1\n";
        assert!(matches!(
            read_spikes(Cursor::new(text), path()),
            Err(SpikeBinError::Parse { .. })
        ));
    }

    #[test]
    fn sync_markers_use_first_column() {
        let text = "onset,offset\n1.5,1.6\n2.5,2.6\n\n3.5\n";
        let markers = read_sync_markers(Cursor::new(text), path()).unwrap();
        assert_eq!(markers, vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn bad_sync_marker_is_rejected() {
        let text = "onset\n1.5\nNaN\n";
        assert!(matches!(
            read_sync_markers(Cursor::new(text), path()),
            Err(SpikeBinError::Parse { .. })
        ));
    }

    #[test]
    fn stimuli_keep_descriptive_fields() {
        let json = r#"{
            "stimuli": [
                { "name": "blank" },
                { "durationMs": 100, "bgColor": "white" },
                { "durationMs": 250.5, "bgColor": "black" }
            ]
        }"#;
        let stimuli = read_stimuli(Cursor::new(json), path()).unwrap();

        assert_eq!(stimuli.len(), 3);
        assert_eq!(stimuli[0].duration_ms, 0.0);
        assert_eq!(stimuli[1].duration_ms, 100.0);
        assert_eq!(stimuli[2].duration_ms, 250.5);
        assert_eq!(stimuli[1].field("bgColor"), Some(&Value::from("white")));
        assert!(stimuli[1].field(DURATION_FIELD).is_none());
    }

    #[test]
    fn stimulus_without_duration_fails() {
        let json = r#"{ "stimuli": [ {}, { "durationMs": 100 }, { "bgColor": "white" } ] }"#;
        let err = read_stimuli(Cursor::new(json), path()).unwrap_err();
        assert!(matches!(err, SpikeBinError::MalformedDuration { index: 2, .. }));
        assert!(err.is_precheck());
    }

    #[test]
    fn stimulus_with_text_duration_fails() {
        let json = r#"{ "stimuli": [ {}, { "durationMs": "long" } ] }"#;
        let err = read_stimuli(Cursor::new(json), path()).unwrap_err();
        match err {
            SpikeBinError::MalformedDuration { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("not a number"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unparsable_stimulus_file_is_json_error() {
        let err = read_stimuli(Cursor::new("{ not json"), path()).unwrap_err();
        assert!(matches!(err, SpikeBinError::Json { .. }));
        let err = read_stimuli(Cursor::new(r#"{ "trials": [] }"#), path()).unwrap_err();
        assert!(matches!(err, SpikeBinError::Json { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_spikes("/nonexistent/spikes.txt").unwrap_err();
        assert!(matches!(err, SpikeBinError::Io { .. }));
    }
}
