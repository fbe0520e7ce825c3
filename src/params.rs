//! Synth Parameters
//!
//! [`SynthParams`] is the whole user-facing patch, pushed into the engine
//! wholesale on every change. Values arriving from outside are trusted only
//! after [`SynthParams::sanitized`].

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Lowest allowed arpeggiator period in milliseconds
pub const ARP_RATE_MIN_MS: f64 = 300.0;
/// Highest allowed arpeggiator period in milliseconds
pub const ARP_RATE_MAX_MS: f64 = 16000.0;

/// Clamp an arpeggiator period into the legal range. NaN falls to the minimum.
pub fn clamp_arp_rate(ms: f64) -> f64 {
    clamp_finite(ms, ARP_RATE_MIN_MS, ARP_RATE_MAX_MS)
}

/// `f64::clamp` that maps NaN to `lo` instead of propagating it
pub(crate) fn clamp_finite(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

/// Oscillator waveform, shared by every voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

/// Envelope times in seconds; sustain is a level in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Self {
            attack: 2.0,
            decay: 1.0,
            sustain: 0.6,
            release: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub mix: f64,
    /// Seconds
    pub time: f64,
    pub feedback: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            mix: 0.3,
            time: 0.45,
            feedback: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbConfig {
    pub mix: f64,
    /// RT60 in seconds
    pub decay: f64,
}

impl Default for ReverbConfig {
    fn default() -> Self {
        Self {
            mix: 0.35,
            decay: 4.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Hz
    pub cutoff: f64,
    /// Q
    pub resonance: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cutoff: 1200.0,
            resonance: 1.0,
        }
    }
}

/// A chord voice's note, e.g. `("C#", 3)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub note: String,
    pub octave: i32,
}

impl VoiceConfig {
    pub fn new(note: impl Into<String>, octave: i32) -> Self {
        Self {
            note: note.into(),
            octave,
        }
    }

    /// MIDI note number: `12 * (octave + 1) + semitone`, so C4 is 60.
    pub fn base_pitch(&self) -> Result<i32, EngineError> {
        let semitone = note_semitone(&self.note)
            .ok_or_else(|| EngineError::Params(format!("unknown note name '{}'", self.note)))?;
        Ok(12 * (self.octave + 1) + semitone)
    }
}

/// Semitone offset from C for a note name. Accepts one `#` or `b` accidental;
/// `B#` and `Cb` wrap within the octave number as written.
pub fn note_semitone(name: &str) -> Option<i32> {
    let mut chars = name.trim().chars();
    let natural = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let accidental = match chars.next() {
        None => 0,
        Some('#') | Some('♯') => 1,
        Some('b') | Some('♭') => -1,
        Some(_) => return None,
    };
    if chars.next().is_some() {
        return None;
    }
    Some(natural + accidental)
}

/// Equal-tempered frequency of a (possibly fractional) MIDI note
pub fn midi_to_hz(note: f64) -> f64 {
    440.0 * 2f64.powf((note - 69.0) / 12.0)
}

/// The complete instrument patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthParams {
    pub master_volume: f64,
    pub waveform: Waveform,
    pub adsr: Adsr,
    pub delay: DelayConfig,
    pub reverb: ReverbConfig,
    pub filter: FilterConfig,
    pub sensitivity: f64,
    pub voices: [VoiceConfig; 4],
    pub color_intensity: f64,
    pub arp_enabled: bool,
    pub arp_rate_ms: f64,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            master_volume: 0.7,
            waveform: Waveform::Sine,
            adsr: Adsr::default(),
            delay: DelayConfig::default(),
            reverb: ReverbConfig::default(),
            filter: FilterConfig::default(),
            sensitivity: 0.5,
            voices: [
                VoiceConfig::new("C", 3),
                VoiceConfig::new("G", 3),
                VoiceConfig::new("D", 4),
                VoiceConfig::new("E", 4),
            ],
            color_intensity: 0.3,
            arp_enabled: true,
            arp_rate_ms: 3000.0,
        }
    }
}

impl SynthParams {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::Params(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Params(e.to_string()))
    }

    /// Copy with every value forced into its legal range
    pub fn sanitized(&self) -> Self {
        let mut p = self.clone();
        p.master_volume = clamp_finite(p.master_volume, 0.0, 1.0);
        p.sensitivity = clamp_finite(p.sensitivity, 0.0, 1.0);
        p.color_intensity = clamp_finite(p.color_intensity, 0.0, 1.0);
        p.arp_rate_ms = clamp_arp_rate(p.arp_rate_ms);

        p.adsr.attack = clamp_finite(p.adsr.attack, 0.0, 60.0);
        p.adsr.decay = clamp_finite(p.adsr.decay, 0.0, 60.0);
        p.adsr.sustain = clamp_finite(p.adsr.sustain, 0.0, 1.0);
        p.adsr.release = clamp_finite(p.adsr.release, 0.0, 60.0);

        p.delay.mix = clamp_finite(p.delay.mix, 0.0, 1.0);
        p.delay.time = clamp_finite(p.delay.time, 0.0, 5.0);
        p.delay.feedback = clamp_finite(p.delay.feedback, 0.0, 0.95);

        p.reverb.mix = clamp_finite(p.reverb.mix, 0.0, 1.0);
        p.reverb.decay = clamp_finite(p.reverb.decay, 0.1, 30.0);

        p.filter.cutoff = clamp_finite(p.filter.cutoff, 20.0, 20000.0);
        p.filter.resonance = clamp_finite(p.filter.resonance, 0.1, 30.0);
        p
    }

    /// Base MIDI pitches of the four chord voices
    pub fn base_pitches(&self) -> Result<[i32; 4], EngineError> {
        let mut pitches = [0; 4];
        for (slot, voice) in pitches.iter_mut().zip(&self.voices) {
            *slot = voice.base_pitch()?;
        }
        Ok(pitches)
    }
}
