//! Binning configuration.
//!
//! [`BinningConfig`] holds every tunable of a binning pass. It can be built in
//! code, loaded from a JSON file, and overridden from the command line.
//!
//! ```rust
//! use spike_binner::BinningConfig;
//!
//! let cfg = BinningConfig::default();
//! cfg.validate().expect("default config is valid");
//! assert_eq!(cfg.bin_width_ms, 20.0);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::{Result, SpikeBinError};

/// Default width of one time bin (ms).
pub const DEFAULT_BIN_WIDTH_MS: f64 = 20.0;

/// Settings for one binning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Width of one time bin in milliseconds. Default: **20**.
    pub bin_width_ms: f64,

    /// Fail with [`SpikeBinError::OverlappingIntervals`] when two stimulus
    /// windows overlap. When false the overlap is logged and each spike is
    /// counted in the lowest-numbered window containing it. Default: **false**.
    pub reject_overlap: bool,

    /// Upper bound on the tensor allocation in bytes. `None` disables the
    /// check. Default: **None**.
    pub max_tensor_bytes: Option<u64>,
}

impl Default for BinningConfig {
    fn default() -> Self {
        BinningConfig {
            bin_width_ms: DEFAULT_BIN_WIDTH_MS,
            reject_overlap: false,
            max_tensor_bytes: None,
        }
    }
}

impl BinningConfig {
    /// Returns a default config with the given bin width.
    pub fn with_bin_width(bin_width_ms: f64) -> Self {
        BinningConfig {
            bin_width_ms,
            ..Default::default()
        }
    }

    /// Checks every field for an acceptable range.
    pub fn validate(&self) -> Result<()> {
        if !self.bin_width_ms.is_finite() || self.bin_width_ms <= 0.0 {
            return Err(SpikeBinError::invalid_config(
                "bin_width_ms",
                format!("must be a positive number, got {}", self.bin_width_ms),
            ));
        }
        if self.max_tensor_bytes == Some(0) {
            return Err(SpikeBinError::invalid_config(
                "max_tensor_bytes",
                "must be > 0 when set",
            ));
        }
        Ok(())
    }

    /// Loads and validates a config from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| SpikeBinError::io(path, e))?;
        let config: BinningConfig =
            serde_json::from_str(&contents).map_err(|source| SpikeBinError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }
}
