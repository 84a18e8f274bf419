//! Classifier-ready views of an occupancy tensor.
//!
//! A classifier sees one row per stimulus interval: the interval's
//! `(time_bin, channel, unit)` block flattened in row-major order. Labels come
//! from a descriptive field of the matching stimulus record.

use ndarray::{Array1, Array2};
use serde_json::Value;
use tracing::info;

use crate::types::*;

/// Feature rows and binary labels, one per stimulus interval.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    /// `[interval, time_bin * channel * unit]`
    pub features: Array2<Count>,
    /// True where the stimulus matched the requested label value
    pub labels: Array1<bool>,
}

impl FeatureSet {
    /// Number of intervals labelled positive.
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}

/// Reshapes the tensor to `(intervals, -1)`.
pub fn flatten_intervals(tensor: &OccupancyTensor) -> Result<Array2<Count>> {
    let shape = tensor.shape();
    let rows = shape[0];
    let cols: usize = shape[1..].iter().product();

    let values: Vec<Count> = tensor.iter().copied().collect();
    Array2::from_shape_vec((rows, cols), values).map_err(|_| SpikeBinError::ShapeMismatch {
        expected: vec![rows, cols],
        actual: shape.to_vec(),
    })
}

/// Labels each stimulus by whether `field` equals `positive`.
///
/// `stimuli` must already exclude the placeholder record. String fields are
/// compared as-is, other JSON values by their JSON text.
pub fn binary_labels(
    stimuli: &[StimulusDescriptor],
    field: &str,
    positive: &str,
) -> Result<Array1<bool>> {
    stimuli
        .iter()
        .enumerate()
        .map(|(index, stim)| match stim.field(field) {
            Some(Value::String(s)) => Ok(s == positive),
            Some(other) => Ok(other.to_string() == positive),
            None => Err(SpikeBinError::MissingField {
                // Position in the on-disk list, placeholder included
                index: index + 1,
                field: field.to_string(),
            }),
        })
        .collect()
}

/// Builds a [`FeatureSet`] from a tensor and the full stimulus list.
///
/// The leading placeholder of `descriptors` is dropped, after which there
/// must be exactly one descriptor per tensor interval.
pub fn feature_set(
    tensor: &OccupancyTensor,
    descriptors: &[StimulusDescriptor],
    field: &str,
    positive: &str,
) -> Result<FeatureSet> {
    let Some((_placeholder, stimuli)) = descriptors.split_first() else {
        return Err(SpikeBinError::MissingPlaceholder);
    };
    if stimuli.len() != tensor.shape()[0] {
        return Err(SpikeBinError::ShapeMismatch {
            expected: vec![stimuli.len()],
            actual: vec![tensor.shape()[0]],
        });
    }

    let features = flatten_intervals(tensor)?;
    let labels = binary_labels(stimuli, field, positive)?;

    let set = FeatureSet { features, labels };
    info!(
        "Feature matrix {:?}, {} of {} intervals labelled `{}`",
        set.features.shape(),
        set.positives(),
        set.labels.len(),
        positive
    );
    Ok(set)
}
