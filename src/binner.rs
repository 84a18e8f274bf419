use ndarray::Array4;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::config::BinningConfig;
use crate::types::*;

/// Bins timestamped spikes into an occupancy tensor over
/// `(stimulus interval, time bin, channel, unit)`.
///
/// The pass runs in two stages. The first scans the whole spike collection to
/// fix the channel and unit axes, so a given identifier maps to the same index
/// in every interval. The second assigns each spike to the first stimulus
/// window containing it and increments one tensor cell.
///
/// # Examples
///
/// ```
/// use spike_binner::{BinningConfig, IntervalBinner, Label, SpikeEvent, StimulusDescriptor};
///
/// let descriptors = vec![StimulusDescriptor::new(0.0), StimulusDescriptor::new(100.0)];
/// let markers = vec![2.0];
/// let spikes = vec![SpikeEvent::new(Label::Int(5), Label::Int(1), 2.01)];
///
/// let binner = IntervalBinner::new(BinningConfig::default()).unwrap();
/// let binned = binner.bin(&spikes, &markers, &descriptors).unwrap();
/// assert_eq!(binned.tensor.shape(), &[1, 5, 1, 1]);
/// assert_eq!(binned.tensor[[0, 0, 0, 0]], 1);
/// ```
#[derive(Debug, Clone)]
pub struct IntervalBinner {
    config: BinningConfig,
}

impl IntervalBinner {
    /// Creates a binner after validating `config`.
    pub fn new(config: BinningConfig) -> Result<Self> {
        config.validate()?;
        Ok(IntervalBinner { config })
    }

    pub fn config(&self) -> &BinningConfig {
        &self.config
    }

    /// Runs a complete binning pass.
    ///
    /// `descriptors` is the full stimulus list as stored on disk, including
    /// the leading placeholder that has no sync marker. `markers` holds one
    /// onset per remaining stimulus.
    ///
    /// Spikes outside every stimulus window are not counted; their number is
    /// reported as `dropped_spikes` in the metadata.
    pub fn bin<C, U>(
        &self,
        spikes: &[SpikeEvent<C, U>],
        markers: &[f64],
        descriptors: &[StimulusDescriptor],
    ) -> Result<BinnedSpikes<C, U>>
    where
        C: Ord + Clone,
        U: Ord + Clone,
    {
        let durations_ms = retained_durations(markers, descriptors)?;
        let intervals = stimulus_intervals(markers, &durations_ms)?;

        let bin_width_ms = self.config.bin_width_ms;
        let max_duration_ms = durations_ms.iter().copied().fold(0.0, f64::max);
        let num_bins = bin_count(max_duration_ms, bin_width_ms);

        if let (Some(min), Some(max)) = (
            durations_ms.iter().copied().reduce(f64::min),
            durations_ms.iter().copied().reduce(f64::max),
        ) {
            info!("Stimulus durations: {}ms - {}ms", min, max);
        }
        info!(
            "max_duration_ms={} max_time_bins={} bin_width_ms={}",
            max_duration_ms, num_bins, bin_width_ms
        );
        info!("Number of stimulus intervals: {}", intervals.len());

        let lookup = IntervalLookup::new(&intervals);
        if let Some((first, second)) = lookup.first_overlap() {
            if self.config.reject_overlap {
                return Err(SpikeBinError::OverlappingIntervals { first, second });
            }
            warn!(
                "Stimulus intervals {} and {} overlap; spikes are counted in the earlier one",
                first, second
            );
        }

        // Pass one: fix the channel and unit axes over the whole collection
        let channels = AxisIndex::from_values(spikes.iter().map(|s| &s.channel));
        let units = AxisIndex::from_values(spikes.iter().map(|s| &s.unit));

        let shape = [intervals.len(), num_bins, channels.len(), units.len()];
        let tensor_bytes = tensor_bytes(shape).ok_or(SpikeBinError::TensorTooLarge {
            shape,
            bytes: u64::MAX,
            limit: self.config.max_tensor_bytes.unwrap_or(u64::MAX),
        })?;
        info!("Tensor shape: {:?}", shape);
        info!(
            "Memory usage: {:.1} MB",
            tensor_bytes as f64 / (1024.0 * 1024.0)
        );
        if let Some(limit) = self.config.max_tensor_bytes {
            if tensor_bytes > limit {
                return Err(SpikeBinError::TensorTooLarge {
                    shape,
                    bytes: tensor_bytes,
                    limit,
                });
            }
        }

        // Pass two: fill
        let mut tensor: OccupancyTensor = Array4::zeros(shape);
        let mut dropped: u64 = 0;
        for spike in spikes {
            let Some(interval_idx) = lookup.find(spike.timestamp) else {
                dropped += 1;
                continue;
            };
            let (Some(channel_idx), Some(unit_idx)) =
                (channels.position(&spike.channel), units.position(&spike.unit))
            else {
                dropped += 1;
                continue;
            };

            let relative_ms = intervals[interval_idx].relative_ms(spike.timestamp);
            let bin = time_bin(relative_ms, bin_width_ms, num_bins);

            let cell = &mut tensor[[interval_idx, bin, channel_idx, unit_idx]];
            *cell = cell.checked_add(1).ok_or(SpikeBinError::CountOverflow {
                interval: interval_idx,
                bin,
                channel: channel_idx,
                unit: unit_idx,
            })?;
        }

        let total_spikes: u64 = tensor.iter().map(|&c| u64::from(c)).sum();
        info!(
            "Binned {} of {} spikes ({} outside stimulus intervals)",
            total_spikes,
            spikes.len(),
            dropped
        );

        let metadata = BinningMetadata {
            shape,
            time_bin_ms: bin_width_ms,
            max_stimulus_duration_ms: max_duration_ms,
            max_time_bins: num_bins,
            channels: channels.len(),
            units: units.len(),
            total_spikes,
            dropped_spikes: dropped,
            tensor_bytes,
            stimulus_durations_ms: durations_ms,
        };

        Ok(BinnedSpikes {
            tensor,
            metadata,
            channels: channels.into_values(),
            units: units.into_values(),
            intervals,
        })
    }
}

/// Bins spikes with the given config.
///
/// Shorthand for [`IntervalBinner::new`] followed by [`IntervalBinner::bin`].
pub fn bin_spikes<C, U>(
    spikes: &[SpikeEvent<C, U>],
    markers: &[f64],
    descriptors: &[StimulusDescriptor],
    config: &BinningConfig,
) -> Result<BinnedSpikes<C, U>>
where
    C: Ord + Clone,
    U: Ord + Clone,
{
    IntervalBinner::new(config.clone())?.bin(spikes, markers, descriptors)
}

/// Drops the leading placeholder and returns the planned duration of every
/// remaining stimulus, after checking it lines up with `markers`.
pub fn retained_durations(markers: &[f64], descriptors: &[StimulusDescriptor]) -> Result<Vec<f64>> {
    let Some((_placeholder, retained)) = descriptors.split_first() else {
        return Err(SpikeBinError::MissingPlaceholder);
    };
    if markers.len() != retained.len() {
        return Err(SpikeBinError::MarkerCountMismatch {
            markers: markers.len(),
            descriptors: descriptors.len(),
        });
    }

    retained
        .iter()
        .enumerate()
        .map(|(i, stim)| {
            let d = stim.duration_ms;
            if !d.is_finite() || d <= 0.0 {
                // Index into the on-disk list, placeholder included
                Err(SpikeBinError::MalformedDuration {
                    index: i + 1,
                    reason: format!("expected a positive number of milliseconds, got {}", d),
                })
            } else {
                Ok(d)
            }
        })
        .collect()
}

/// Builds one `[start, start + duration)` window per sync marker.
pub fn stimulus_intervals(markers: &[f64], durations_ms: &[f64]) -> Result<Vec<StimulusInterval>> {
    if markers.len() != durations_ms.len() {
        return Err(SpikeBinError::MarkerCountMismatch {
            markers: markers.len(),
            descriptors: durations_ms.len() + 1,
        });
    }
    markers
        .iter()
        .zip(durations_ms)
        .enumerate()
        .map(|(index, (&start, &duration_ms))| {
            if start.is_finite() {
                Ok(StimulusInterval::new(start, duration_ms))
            } else {
                Err(SpikeBinError::MalformedMarker {
                    index,
                    value: start,
                })
            }
        })
        .collect()
}

/// Number of bins of width `bin_width_ms` needed to cover `max_duration_ms`.
pub fn bin_count(max_duration_ms: f64, bin_width_ms: f64) -> usize {
    if max_duration_ms <= 0.0 {
        return 0;
    }
    (max_duration_ms / bin_width_ms).ceil() as usize
}

/// Bin holding a spike `relative_ms` after onset.
///
/// The last bin is closed on the right, so rounding at the far edge never
/// produces an out-of-range index.
fn time_bin(relative_ms: f64, bin_width_ms: f64, num_bins: usize) -> usize {
    let bin = (relative_ms / bin_width_ms).floor().max(0.0) as usize;
    bin.min(num_bins.saturating_sub(1))
}

/// Bytes needed for a tensor of `shape`, or `None` when no tensor of that
/// shape can be allocated.
///
/// The product of the non-zero axis lengths must fit in `isize` bytes even
/// when another axis is empty. A bin count saturated by the float to `usize`
/// cast always fails this check.
pub fn tensor_bytes(shape: [usize; 4]) -> Option<u64> {
    let limit = isize::MAX as u64;
    let nonzero_bytes = shape
        .iter()
        .filter(|&&dim| dim != 0)
        .try_fold(std::mem::size_of::<Count>() as u64, |acc, &dim| {
            acc.checked_mul(dim as u64).filter(|&b| b <= limit)
        })?;

    if shape.contains(&0) {
        Some(0)
    } else {
        Some(nonzero_bytes)
    }
}

/// Sorted distinct identifiers along one tensor axis.
#[derive(Debug)]
struct AxisIndex<T> {
    values: Vec<T>,
}

impl<T: Ord + Clone> AxisIndex<T> {
    fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        let set: BTreeSet<&T> = values.into_iter().collect();
        AxisIndex {
            values: set.into_iter().cloned().collect(),
        }
    }

    fn position(&self, value: &T) -> Option<usize> {
        self.values.binary_search(value).ok()
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// Finds the stimulus window containing a timestamp.
///
/// Windows are kept sorted by onset together with a running maximum of their
/// ends, so a lookup only visits windows that start before the timestamp and
/// can still reach it.
struct IntervalLookup<'a> {
    intervals: &'a [StimulusInterval],
    /// Interval indices sorted by onset
    order: Vec<usize>,
    /// `reach[k]` is the latest end among `order[..=k]`
    reach: Vec<f64>,
}

impl<'a> IntervalLookup<'a> {
    fn new(intervals: &'a [StimulusInterval]) -> Self {
        let mut order: Vec<usize> = (0..intervals.len()).collect();
        order.sort_by(|&a, &b| intervals[a].cmp_start(&intervals[b]).then(a.cmp(&b)));

        let mut reach = Vec::with_capacity(order.len());
        let mut latest = f64::NEG_INFINITY;
        for &i in &order {
            latest = latest.max(intervals[i].end);
            reach.push(latest);
        }

        IntervalLookup {
            intervals,
            order,
            reach,
        }
    }

    /// Lowest interval index whose window contains `timestamp`.
    fn find(&self, timestamp: f64) -> Option<usize> {
        let upper = self
            .order
            .partition_point(|&i| self.intervals[i].start <= timestamp);

        let mut best: Option<usize> = None;
        for k in (0..upper).rev() {
            if self.reach[k] <= timestamp {
                break;
            }
            let i = self.order[k];
            if self.intervals[i].contains(timestamp) {
                best = Some(best.map_or(i, |b| b.min(i)));
            }
        }
        best
    }

    /// First pair of overlapping windows, as `(lower index, higher index)`.
    fn first_overlap(&self) -> Option<(usize, usize)> {
        let mut reaching: Option<usize> = None;
        for &i in &self.order {
            if let Some(prev) = reaching {
                if self.intervals[i].start < self.intervals[prev].end {
                    return Some((prev.min(i), prev.max(i)));
                }
                if self.intervals[i].end > self.intervals[prev].end {
                    reaching = Some(i);
                }
            } else {
                reaching = Some(i);
            }
        }
        None
    }
}
