//! Data Mapping
//!
//! Turns a telemetry sample into parameter targets. Every sample goes through
//! an [`Ema`] first; each stream kind then maps the smoothed value through
//! clamped range transforms, and each candidate is blended against the
//! parameter's current value by the sensitivity.

use crate::params::clamp_finite;
use crate::port::ParamRange;
use serde::{Deserialize, Serialize};

/// Default smoothing factor
pub const DEFAULT_ALPHA: f64 = 0.12;
/// Time constant of the approach toward a blended target
pub const APPROACH_TAU: f64 = 1.5;

/// Exponential moving average
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: clamp_finite(alpha, f64::MIN_POSITIVE, 1.0),
            value: None,
        }
    }

    /// Feed a sample. The first sample seeds the average; later ones move it
    /// by `alpha` of the way toward the sample.
    ///
    /// Non-finite samples are rejected with `None` and leave the average
    /// untouched.
    pub fn update(&mut self, raw: f64) -> Option<f64> {
        if !raw.is_finite() {
            return None;
        }
        let next = match self.value {
            None => raw,
            Some(prev) => prev + self.alpha * (raw - prev),
        };
        self.value = Some(next);
        Some(next)
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Forget the history; the next sample seeds a fresh average
    pub fn reset(&mut self) {
        self.value = None;
    }
}

impl Default for Ema {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

/// Telemetry categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Solar wind speed, km/s
    WindSpeed,
    /// Solar wind proton density, p/cm³
    Density,
    /// Planetary Kp index, 0–9
    Geomagnetic,
    /// X-ray flux, W/m²
    XRay,
}

/// Something a mapping can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingTarget {
    FilterCutoff,
    FilterResonance,
    ReverbMix,
    LfoDepth,
    /// Control-rate value, milliseconds
    ArpRate,
    /// Control-rate value, 0–1
    ColorIntensity,
}

/// One row of the mapping table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mapping {
    pub target: MappingTarget,
    pub range: ParamRange,
}

const WIND_SPEED: &[Mapping] = &[
    Mapping {
        target: MappingTarget::FilterCutoff,
        range: ParamRange::Exponential {
            min: 400.0,
            max: 4000.0,
        },
    },
    Mapping {
        target: MappingTarget::ArpRate,
        range: ParamRange::Linear {
            min: 5000.0,
            max: 1500.0,
        },
    },
];

const DENSITY: &[Mapping] = &[Mapping {
    target: MappingTarget::ReverbMix,
    range: ParamRange::Linear {
        min: 0.15,
        max: 0.65,
    },
}];

const GEOMAGNETIC: &[Mapping] = &[
    Mapping {
        target: MappingTarget::LfoDepth,
        range: ParamRange::Linear {
            min: 30.0,
            max: 300.0,
        },
    },
    Mapping {
        target: MappingTarget::ColorIntensity,
        range: ParamRange::Linear {
            min: 0.02,
            max: 0.25,
        },
    },
    Mapping {
        target: MappingTarget::FilterResonance,
        range: ParamRange::Linear { min: 0.5, max: 6.0 },
    },
];

const X_RAY: &[Mapping] = &[
    Mapping {
        target: MappingTarget::FilterCutoff,
        range: ParamRange::Exponential {
            min: 600.0,
            max: 5000.0,
        },
    },
    Mapping {
        target: MappingTarget::ReverbMix,
        range: ParamRange::Linear { min: 0.1, max: 0.6 },
    },
];

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::WindSpeed,
        StreamKind::Density,
        StreamKind::Geomagnetic,
        StreamKind::XRay,
    ];

    pub fn mappings(self) -> &'static [Mapping] {
        match self {
            StreamKind::WindSpeed => WIND_SPEED,
            StreamKind::Density => DENSITY,
            StreamKind::Geomagnetic => GEOMAGNETIC,
            StreamKind::XRay => X_RAY,
        }
    }

    /// Position of a value within the stream's domain. Not clamped; the range
    /// transforms clamp.
    pub fn fraction(self, value: f64) -> f64 {
        match self {
            StreamKind::WindSpeed => (value - 250.0) / (800.0 - 250.0),
            StreamKind::Density => (value - 1.0) / (20.0 - 1.0),
            StreamKind::Geomagnetic => value / 9.0,
            StreamKind::XRay => {
                let log = value.max(1e-9).log10();
                (log + 8.0) / 4.0
            }
        }
    }
}

/// `s·candidate + (1−s)·current`
pub fn blend(sensitivity: f64, candidate: f64, current: f64) -> f64 {
    let s = clamp_finite(sensitivity, 0.0, 1.0);
    s * candidate + (1.0 - s) * current
}

/// A blended target to approach
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetUpdate {
    pub target: MappingTarget,
    pub candidate: f64,
    pub value: f64,
}

/// Compute every target a smoothed value drives, reading each target's
/// current value through `current`
pub fn plan(
    kind: StreamKind,
    smoothed: f64,
    sensitivity: f64,
    mut current: impl FnMut(MappingTarget) -> f64,
) -> Vec<TargetUpdate> {
    let fraction = kind.fraction(smoothed);
    kind.mappings()
        .iter()
        .map(|m| {
            let candidate = m.range.apply(fraction);
            TargetUpdate {
                target: m.target,
                candidate,
                value: blend(sensitivity, candidate, current(m.target)),
            }
        })
        .collect()
}

/// Returned from every mapping call, whether or not anything was scheduled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappingResult {
    /// Current smoothed average; `None` until a finite sample has arrived
    pub smoothed_value: Option<f64>,
}
