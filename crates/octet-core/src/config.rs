//! Configuration types for octet.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BlockSize, OctetError, OptimizerFamily, Result, StateBits, StateCodecKind};

/// Optimizer configuration.
///
/// Loadable from YAML or JSON; every field except `family` has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Which recurrence to run.
    #[serde(default)]
    pub family: OptimizerFamily,

    /// Learning rate.
    #[serde(default = "default_lr")]
    pub lr: f32,

    /// First moment decay (momentum coefficient for [`OptimizerFamily::Momentum`],
    /// squared-gradient decay for [`OptimizerFamily::RmsProp`]).
    #[serde(default = "default_beta1")]
    pub beta1: f32,

    /// Second moment decay (Adam only).
    #[serde(default = "default_beta2")]
    pub beta2: f32,

    /// Denominator epsilon.
    #[serde(default = "default_eps")]
    pub eps: f32,

    /// L2 weight decay, folded into the gradient.
    #[serde(default)]
    pub weight_decay: f32,

    /// Elements per absmax block for 8-bit state.
    #[serde(default)]
    pub block_size: BlockSize,

    /// Precision of persisted state.
    #[serde(default)]
    pub state_bits: StateBits,

    /// How 8-bit state is coded.
    #[serde(default)]
    pub codec: StateCodecKind,

    /// Leave state untouched where the raw gradient is exactly zero.
    #[serde(default)]
    pub skip_zeros: bool,

    /// Trust-ratio cap on the update norm relative to the parameter norm.
    /// Zero disables the cap.
    #[serde(default)]
    pub max_unorm: f32,

    /// Tensors with fewer elements than this keep 32-bit state.
    #[serde(default = "default_min_8bit_size")]
    pub min_8bit_size: usize,

    /// Percentile gradient clipping; disabled when absent.
    #[serde(default)]
    pub percentile_clipping: Option<PercentileClipConfig>,

    /// Requantization rounding.
    #[serde(default)]
    pub rounding: RoundingConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            family: OptimizerFamily::default(),
            lr: default_lr(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: 0.0,
            block_size: BlockSize::default(),
            state_bits: StateBits::default(),
            codec: StateCodecKind::default(),
            skip_zeros: false,
            max_unorm: 0.0,
            min_8bit_size: default_min_8bit_size(),
            percentile_clipping: None,
            rounding: RoundingConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Default configuration for `family`.
    #[must_use]
    pub fn for_family(family: OptimizerFamily) -> Self {
        let mut config = Self {
            family,
            ..Self::default()
        };
        match family {
            OptimizerFamily::Momentum => {
                config.lr = 1e-2;
                config.beta1 = 0.9;
            }
            OptimizerFamily::RmsProp => {
                config.lr = 1e-2;
                config.beta1 = 0.99;
                config.eps = 1e-8;
            }
            OptimizerFamily::Adagrad => {
                config.lr = 1e-2;
                config.eps = 1e-10;
            }
            OptimizerFamily::Adam => {}
        }
        config
    }

    /// Parse a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Serialization`] on malformed input and
    /// [`OctetError::Config`] if the parsed values are out of range.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// See [`OptimizerConfig::from_yaml_str`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Io`] if the file cannot be read and
    /// [`OctetError::Config`] for an unknown extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(OctetError::Config(format!(
                "unrecognized config extension: {}",
                path.display()
            ))),
        }
    }

    /// Serialize to YAML.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Serialization`] if serialization fails.
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Config`] describing the first bad field.
    pub fn validate(&self) -> Result<()> {
        if !self.lr.is_finite() || self.lr < 0.0 {
            return Err(OctetError::Config(format!("lr must be finite and >= 0, got {}", self.lr)));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..=1.0).contains(&beta) {
                return Err(OctetError::Config(format!("{name} must be in [0, 1], got {beta}")));
            }
        }
        if !self.eps.is_finite() || self.eps < 0.0 {
            return Err(OctetError::Config(format!("eps must be finite and >= 0, got {}", self.eps)));
        }
        if !self.weight_decay.is_finite() {
            return Err(OctetError::Config("weight_decay must be finite".into()));
        }
        if !self.max_unorm.is_finite() || self.max_unorm < 0.0 {
            return Err(OctetError::Config(format!(
                "max_unorm must be finite and >= 0, got {}",
                self.max_unorm
            )));
        }
        if let Some(clip) = &self.percentile_clipping {
            clip.validate()?;
        }
        self.rounding.validate()
    }
}

/// Percentile gradient clipping settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileClipConfig {
    /// Number of recent gradient norms remembered.
    #[serde(default = "default_clip_history")]
    pub history: usize,

    /// Percentile of the history used as the clipping threshold.
    #[serde(default = "default_clip_percentile")]
    pub percentile: f32,
}

impl Default for PercentileClipConfig {
    fn default() -> Self {
        Self {
            history: default_clip_history(),
            percentile: default_clip_percentile(),
        }
    }
}

impl PercentileClipConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Config`] for an empty history or a percentile
    /// outside `(0, 100]`.
    pub fn validate(&self) -> Result<()> {
        if self.history == 0 {
            return Err(OctetError::Config("clipping history must be non-empty".into()));
        }
        if !(self.percentile > 0.0 && self.percentile <= 100.0) {
            return Err(OctetError::Config(format!(
                "clipping percentile must be in (0, 100], got {}",
                self.percentile
            )));
        }
        Ok(())
    }
}

/// Rounding used when requantizing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingConfig {
    /// Stochastic rounding against a pre-generated uniform stream.
    #[serde(default = "default_true")]
    pub stochastic: bool,

    /// Seed for the uniform stream.
    #[serde(default)]
    pub seed: u64,

    /// Length of the uniform stream.
    #[serde(default = "default_stream_len")]
    pub stream_len: usize,
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            stochastic: true,
            seed: 0,
            stream_len: default_stream_len(),
        }
    }
}

impl RoundingConfig {
    /// Shortest uniform stream accepted.
    pub const MIN_STREAM_LEN: usize = 1024;

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::Config`] when the stream is too short.
    pub fn validate(&self) -> Result<()> {
        if self.stochastic && self.stream_len < Self::MIN_STREAM_LEN {
            return Err(OctetError::Config(format!(
                "stream_len must be at least {}, got {}",
                Self::MIN_STREAM_LEN,
                self.stream_len
            )));
        }
        Ok(())
    }
}

fn default_lr() -> f32 {
    1e-3
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_eps() -> f32 {
    1e-8
}

fn default_min_8bit_size() -> usize {
    4096
}

fn default_clip_history() -> usize {
    100
}

fn default_clip_percentile() -> f32 {
    95.0
}

fn default_stream_len() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.family, OptimizerFamily::Adam);
        assert_eq!(config.block_size, BlockSize::B2048);
        assert_eq!(config.state_bits, StateBits::Eight);
        assert_eq!(config.min_8bit_size, 4096);
        assert!(config.rounding.stochastic);
        assert!(config.percentile_clipping.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_partial() {
        let yaml = r"
family: rmsprop
lr: 0.01
block_size: 4096
state_bits: 32
percentile_clipping:
  percentile: 90
";
        let config = OptimizerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.family, OptimizerFamily::RmsProp);
        assert_eq!(config.block_size, BlockSize::B4096);
        assert_eq!(config.state_bits, StateBits::ThirtyTwo);
        let clip = config.percentile_clipping.unwrap();
        assert_eq!(clip.history, 100);
        assert_eq!(clip.percentile, 90.0);
        assert_eq!(config.beta2, 0.999);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = OptimizerConfig::for_family(OptimizerFamily::Momentum);
        config.weight_decay = 0.01;
        config.percentile_clipping = Some(PercentileClipConfig::default());
        let yaml = config.to_yaml_string().unwrap();
        let back = OptimizerConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_bad_block_size_rejected() {
        let err = OptimizerConfig::from_json_str(r#"{"block_size": 3000}"#).unwrap_err();
        assert!(matches!(err, OctetError::Serialization(_)));
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = OptimizerConfig {
            beta1: 1.5,
            ..OptimizerConfig::default()
        };
        assert!(matches!(config.validate(), Err(OctetError::Config(_))));

        config.beta1 = 0.9;
        config.rounding.stream_len = 16;
        assert!(config.validate().is_err());

        config.rounding.stochastic = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"family": "adagrad", "lr": 0.1}}"#).unwrap();
        let config = OptimizerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.family, OptimizerFamily::Adagrad);
        assert_eq!(config.lr, 0.1);

        let other = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(matches!(
            OptimizerConfig::from_file(other.path()),
            Err(OctetError::Config(_))
        ));
    }
}
