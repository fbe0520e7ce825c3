//! Signal Conventions and Port System
//!
//! This module defines the signal types, port and parameter declarations, and the
//! type-erased [`GraphModule`] interface every DSP node implements.

use libm::Libm;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a port within a module
pub type PortId = u32;

/// Index of an automatable parameter within a module
pub type ParamId = usize;

/// Semantic signal classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Audio-rate signal, nominally within ±1.0
    Audio,

    /// Modulation expressed in the units of the parameter it offsets (e.g. Hz)
    Modulation,
}

/// Definition of a single port (input or output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Unique identifier within the module
    pub id: PortId,

    /// Human-readable name (e.g., "in", "left", "cutoff_mod")
    pub name: String,

    pub kind: SignalKind,

    /// Default value when no cable is connected
    pub default: f64,
}

impl PortDef {
    pub fn new(id: PortId, name: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            default: 0.0,
        }
    }
}

/// Specification of all ports for a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl PortSpec {
    /// Mono in, mono out
    pub fn mono() -> Self {
        Self {
            inputs: vec![PortDef::new(0, "in", SignalKind::Audio)],
            outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
        }
    }

    /// Stereo in (`left`/`right` = 0/1), stereo out (`left`/`right` = 10/11)
    pub fn stereo() -> Self {
        Self {
            inputs: vec![
                PortDef::new(0, "left", SignalKind::Audio),
                PortDef::new(1, "right", SignalKind::Audio),
            ],
            outputs: vec![
                PortDef::new(10, "left", SignalKind::Audio),
                PortDef::new(11, "right", SignalKind::Audio),
            ],
        }
    }

    pub fn input_by_name(&self, name: &str) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_by_name(&self, name: &str) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Runtime port values container
#[derive(Debug, Clone, Default)]
pub struct PortValues {
    pub values: HashMap<PortId, f64>,
}

impl PortValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PortId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    pub fn get_or(&self, id: PortId, default: f64) -> f64 {
        self.values.get(&id).copied().unwrap_or(default)
    }

    pub fn set(&mut self, id: PortId, value: f64) {
        self.values.insert(id, value);
    }

    /// Accumulate (sum) a value into a port (for input mixing)
    pub fn accumulate(&mut self, id: PortId, value: f64) {
        *self.values.entry(id).or_insert(0.0) += value;
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Range mapping from a normalized fraction to a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamRange {
    /// Linear mapping from normalized (0–1) to (min, max). `min > max` inverts.
    Linear { min: f64, max: f64 },

    /// Log-linear mapping, useful for frequency/time controls
    Exponential { min: f64, max: f64 },
}

impl ParamRange {
    /// Map a fraction into the range. The fraction is clamped to [0, 1] first,
    /// so out-of-domain inputs never extrapolate.
    pub fn apply(&self, normalized: f64) -> f64 {
        let clamped = if normalized.is_nan() {
            0.0
        } else {
            normalized.clamp(0.0, 1.0)
        };
        match self {
            ParamRange::Linear { min, max } => min + clamped * (max - min),
            ParamRange::Exponential { min, max } => {
                if *min <= 0.0 || *max <= 0.0 {
                    clamped * max
                } else {
                    min * Libm::<f64>::pow(max / min, clamped)
                }
            }
        }
    }
}

/// Declaration of an automatable parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub id: ParamId,
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

impl ParamDef {
    pub fn new(id: ParamId, name: impl Into<String>, default: f64, min: f64, max: f64) -> Self {
        Self {
            id,
            name: name.into(),
            default,
            min,
            max,
        }
    }
}

/// Non-automatable, discrete module configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModuleSetting {
    Waveform(crate::params::Waveform),
}

/// Type-erased module interface for graph-based patching
pub trait GraphModule: Send {
    /// Returns the module's port specification
    fn port_spec(&self) -> &PortSpec;

    /// Automatable parameters, indexed by [`ParamId`]
    fn params(&self) -> &[ParamDef] {
        &[]
    }

    /// Process one sample. `params[i]` holds the evaluated value of parameter `i`
    /// at this sample's graph time.
    fn tick(&mut self, params: &[f64], inputs: &PortValues, outputs: &mut PortValues);

    /// Reset internal state
    fn reset(&mut self);

    /// Set sample rate
    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Apply a discrete setting. Modules ignore settings they don't understand.
    fn apply_setting(&mut self, _setting: ModuleSetting) {}

    /// Module type identifier, used by topology descriptions
    fn type_id(&self) -> &'static str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_values() {
        let mut pv = PortValues::new();
        pv.set(0, 1.0);
        pv.set(1, 2.0);
        assert_eq!(pv.get(0), Some(1.0));
        assert_eq!(pv.get(1), Some(2.0));
        assert_eq!(pv.get(2), None);
        assert_eq!(pv.get_or(2, 5.0), 5.0);

        pv.accumulate(0, 0.5);
        assert_eq!(pv.get(0), Some(1.5));

        pv.clear();
        assert_eq!(pv.get(0), None);
    }

    #[test]
    fn test_param_range_linear() {
        let range = ParamRange::Linear {
            min: 0.0,
            max: 100.0,
        };
        assert!((range.apply(0.0) - 0.0).abs() < 1e-10);
        assert!((range.apply(0.5) - 50.0).abs() < 1e-10);
        assert!((range.apply(1.0) - 100.0).abs() < 1e-10);
    }

    #[test]
    fn test_param_range_inverted_linear() {
        let range = ParamRange::Linear {
            min: 5000.0,
            max: 1500.0,
        };
        assert!((range.apply(0.0) - 5000.0).abs() < 1e-10);
        assert!((range.apply(1.0) - 1500.0).abs() < 1e-10);
    }

    #[test]
    fn test_param_range_exponential() {
        let range = ParamRange::Exponential {
            min: 400.0,
            max: 4000.0,
        };
        assert!((range.apply(0.0) - 400.0).abs() < 1e-9);
        assert!((range.apply(1.0) - 4000.0).abs() < 1e-9);
        // Geometric midpoint
        assert!((range.apply(0.5) - 400.0 * 10f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_param_range_clamped() {
        let range = ParamRange::Exponential {
            min: 20.0,
            max: 20000.0,
        };
        assert!((range.apply(-0.5) - 20.0).abs() < 1e-10);
        assert!((range.apply(1.5) - 20000.0).abs() < 1e-10);
        assert!((range.apply(f64::NAN) - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_port_spec_lookup() {
        let spec = PortSpec::stereo();
        assert_eq!(spec.input_by_name("right").map(|p| p.id), Some(1));
        assert_eq!(spec.output_by_name("left").map(|p| p.id), Some(10));
        assert!(spec.input_by_name("nonexistent").is_none());

        let mono = PortSpec::mono();
        assert_eq!(mono.output_by_name("out").map(|p| p.id), Some(10));
    }
}
