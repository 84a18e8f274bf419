use ndarray::Array4;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Element type of the occupancy tensor.
///
/// Counts are stored as 16-bit unsigned integers so that the written arrays
/// match the dtype downstream tooling expects. Increments are checked; a bin
/// that would exceed `u16::MAX` produces [`SpikeBinError::CountOverflow`].
pub type Count = u16;

/// Dense spike counts indexed by `[interval, time_bin, channel, unit]`.
pub type OccupancyTensor = Array4<Count>;

/// Convenient `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpikeBinError>;

/// Identifier of a channel or a unit as read from a spike-sorter export.
///
/// Integers order numerically and sort before any text label, so a column of
/// plain cluster numbers keeps its natural order while labels such as
/// `"noise"` land at the end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Label {
    /// Numeric identifier (electrode number, cluster id)
    Int(i64),
    /// Free-form identifier (e.g. `"Ch12"`, `"noise"`)
    Text(String),
}

impl Label {
    /// Parses a raw field, preferring an integer interpretation.
    pub fn parse(raw: &str) -> Label {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(n) => Label::Int(n),
            Err(_) => Label::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Label::Int(n) => write!(f, "{}", n),
            Label::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Label {
    fn from(n: i64) -> Self {
        Label::Int(n)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Label::Text(s.to_string())
    }
}

/// One detected spike.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeEvent<C = Label, U = Label> {
    /// Recording electrode the spike was detected on
    pub channel: C,
    /// Sorted unit (cluster) the spike was assigned to
    pub unit: U,
    /// Absolute time in seconds on the recording clock
    pub timestamp: f64,
}

impl<C, U> SpikeEvent<C, U> {
    pub fn new(channel: C, unit: U, timestamp: f64) -> Self {
        SpikeEvent {
            channel,
            unit,
            timestamp,
        }
    }
}

/// One presented stimulus.
///
/// Only the planned duration is used for binning. Every other field of the
/// record (background color, condition name, ...) is kept verbatim so it can
/// be used as a classification label later.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusDescriptor {
    /// Planned presentation time in milliseconds
    pub duration_ms: f64,
    /// Remaining descriptive fields of the record
    pub fields: Map<String, Value>,
}

impl StimulusDescriptor {
    pub fn new(duration_ms: f64) -> Self {
        StimulusDescriptor {
            duration_ms,
            fields: Map::new(),
        }
    }

    /// Adds a descriptive field, builder style.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Returns a descriptive field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Window on the recording clock covered by one retained stimulus.
///
/// The window is `[start, end)` with `end = start + planned duration`. The gap
/// to the next sync marker plays no part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StimulusInterval {
    /// Onset in seconds (the sync marker)
    pub start: f64,
    /// Exclusive end in seconds
    pub end: f64,
    /// Planned duration in milliseconds
    pub duration_ms: f64,
}

impl StimulusInterval {
    pub fn new(start: f64, duration_ms: f64) -> Self {
        StimulusInterval {
            start,
            end: start + duration_ms / 1000.0,
            duration_ms,
        }
    }

    /// Whether `timestamp` falls inside the half-open window.
    pub fn contains(&self, timestamp: f64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Milliseconds elapsed since the interval onset.
    pub fn relative_ms(&self, timestamp: f64) -> f64 {
        (timestamp - self.start) * 1000.0
    }

    /// Ordering by onset, ties broken by end.
    pub(crate) fn cmp_start(&self, other: &Self) -> Ordering {
        self.start
            .total_cmp(&other.start)
            .then(self.end.total_cmp(&other.end))
    }
}

/// Descriptive record accompanying an occupancy tensor.
///
/// Every value is derived from the inputs and the tensor itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinningMetadata {
    /// Tensor shape as `[intervals, time_bins, channels, units]`
    pub shape: [usize; 4],
    /// Width of one time bin (ms)
    pub time_bin_ms: f64,
    /// Longest planned stimulus duration (ms), 0 when there are no stimuli
    pub max_stimulus_duration_ms: f64,
    /// Number of time bins shared by every interval
    pub max_time_bins: usize,
    /// Number of distinct channels
    pub channels: usize,
    /// Number of distinct units
    pub units: usize,
    /// Sum over the whole tensor
    pub total_spikes: u64,
    /// Spikes that fell outside every stimulus interval
    pub dropped_spikes: u64,
    /// Size of the tensor in bytes
    pub tensor_bytes: u64,
    /// Planned duration of each retained stimulus (ms)
    pub stimulus_durations_ms: Vec<f64>,
}

/// Output of a binning pass.
///
/// `channels[i]` is the identifier stored at channel index `i` of the tensor,
/// and likewise for `units`.
#[derive(Debug, Clone)]
pub struct BinnedSpikes<C = Label, U = Label> {
    /// Spike counts `[interval, time_bin, channel, unit]`
    pub tensor: OccupancyTensor,
    /// Summary of the binning pass
    pub metadata: BinningMetadata,
    /// Sorted distinct channel identifiers
    pub channels: Vec<C>,
    /// Sorted distinct unit identifiers
    pub units: Vec<U>,
    /// One window per retained stimulus, in stimulus order
    pub intervals: Vec<StimulusInterval>,
}

impl<C, U> BinnedSpikes<C, U> {
    /// Number of stimulus intervals (first tensor axis).
    pub fn num_intervals(&self) -> usize {
        self.intervals.len()
    }

    /// Tensor index of a channel identifier.
    pub fn channel_index(&self, channel: &C) -> Option<usize>
    where
        C: Ord,
    {
        self.channels.binary_search(channel).ok()
    }

    /// Tensor index of a unit identifier.
    pub fn unit_index(&self, unit: &U) -> Option<usize>
    where
        U: Ord,
    {
        self.units.binary_search(unit).ok()
    }
}

/// Errors produced while loading, binning, or writing spike data.
///
/// Variants reported by [`SpikeBinError::is_precheck`] are detected before any
/// tensor is allocated. All errors end the invocation without output.
#[derive(Debug, Error)]
pub enum SpikeBinError {
    /// An input file does not exist
    #[error("{} not found", .0.display())]
    MissingInput(PathBuf),

    /// The descriptor list has no leading placeholder entry to drop
    #[error("Stimulus list is empty: expected a leading placeholder entry")]
    MissingPlaceholder,

    /// Sync markers do not line up with the descriptors
    #[error(
        "Should have one less sync marker than stimuli: found {markers} markers for {descriptors} stimuli"
    )]
    MarkerCountMismatch { markers: usize, descriptors: usize },

    /// A stimulus record has no usable planned duration
    #[error("Stimulus {index} has a malformed duration: {reason}")]
    MalformedDuration { index: usize, reason: String },

    /// A sync marker is not a finite time
    #[error("Sync marker {index} is not a finite time: {value}")]
    MalformedMarker { index: usize, value: f64 },

    /// Two stimulus windows overlap and overlap was configured as an error
    #[error("Stimulus intervals {first} and {second} overlap")]
    OverlappingIntervals { first: usize, second: usize },

    /// The tensor would exceed the configured memory limit
    #[error("Tensor of shape {shape:?} needs {bytes} bytes, limit is {limit} bytes")]
    TensorTooLarge {
        shape: [usize; 4],
        bytes: u64,
        limit: u64,
    },

    /// A configuration value is out of range
    #[error("Invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// A descriptor lacks a field requested as a label
    #[error("Stimulus {index} has no field `{field}`")]
    MissingField { index: usize, field: String },

    /// Array dimensions disagree with the descriptor list
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A bin count would exceed the range of [`Count`]
    #[error(
        "Spike count overflow at interval {interval}, bin {bin}, channel index {channel}, unit index {unit}"
    )]
    CountOverflow {
        interval: usize,
        bin: usize,
        channel: usize,
        unit: usize,
    },

    /// I/O failure on a specific file
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Tabular input could not be read
    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Structured input could not be parsed
    #[error("JSON error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A row or field has an unexpected value
    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    /// Compressed array archive could not be written or read
    #[error("NPZ error on {}: {message}", .path.display())]
    Npz { path: PathBuf, message: String },

    /// A general error with a custom message
    #[error("{0}")]
    Other(String),
}

impl SpikeBinError {
    /// Whether the error is a structural check that fires before computation.
    pub fn is_precheck(&self) -> bool {
        matches!(
            self,
            SpikeBinError::MissingInput(_)
                | SpikeBinError::MissingPlaceholder
                | SpikeBinError::MarkerCountMismatch { .. }
                | SpikeBinError::MalformedDuration { .. }
                | SpikeBinError::MalformedMarker { .. }
                | SpikeBinError::OverlappingIntervals { .. }
                | SpikeBinError::TensorTooLarge { .. }
                | SpikeBinError::InvalidConfig { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SpikeBinError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        SpikeBinError::InvalidConfig {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_sort_numbers_before_text() {
        let mut labels = vec![
            Label::parse("noise"),
            Label::parse("12"),
            Label::parse(" 3 "),
            Label::parse("Ch1"),
        ];
        labels.sort();
        assert_eq!(
            labels,
            vec![
                Label::Int(3),
                Label::Int(12),
                Label::Text("Ch1".into()),
                Label::Text("noise".into()),
            ]
        );
    }

    #[test]
    fn interval_is_half_open() {
        let interval = StimulusInterval::new(2.0, 100.0);
        assert!(interval.contains(2.0));
        assert!(interval.contains(2.099));
        assert!(!interval.contains(interval.end));
        assert!(!interval.contains(1.999));
        assert!((interval.relative_ms(2.01) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn precheck_classification() {
        assert!(SpikeBinError::MissingPlaceholder.is_precheck());
        assert!(SpikeBinError::MarkerCountMismatch {
            markers: 1,
            descriptors: 3
        }
        .is_precheck());
        assert!(!SpikeBinError::Other("boom".into()).is_precheck());
        assert!(!SpikeBinError::CountOverflow {
            interval: 0,
            bin: 0,
            channel: 0,
            unit: 0
        }
        .is_precheck());
    }
}
