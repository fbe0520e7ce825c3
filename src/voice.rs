//! Voice Pool
//!
//! Exactly four chord voices and one color voice, each an oscillator, an
//! envelope gain and a panner inside the graph. Everything here only schedules
//! automation through the [`Controller`]; nothing touches the render path.

use crate::modules::{Gain, Oscillator, StereoPanner};
use crate::params::{midi_to_hz, Waveform};
use crate::patch::{InstrumentNodes, VoiceNodes, CHORD_VOICES, COLOR_INTERVAL};
use crate::port::ModuleSetting;
use crate::render::Controller;

/// Time constant for retuning chord pitches from the UI
pub const RETUNE_TAU: f64 = 0.3;
/// Time constant for pitch glides and settling
pub const GLIDE_TAU: f64 = 0.15;
/// Time constant for pan nudges
pub const PAN_TAU: f64 = 0.5;
/// Time constant for settling to a steady pad level
pub const SETTLE_TAU: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceRole {
    Chord,
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub role: VoiceRole,
    pub nodes: VoiceNodes,
    /// MIDI note the voice rests at
    pub base_pitch: i32,
}

/// Attack-then-decay gain shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub peak: f64,
    /// Seconds to reach the peak
    pub attack: f64,
    /// Time constant of the decay toward half the peak
    pub decay_tau: f64,
}

#[derive(Debug, Default)]
pub struct VoicePool {
    voices: Vec<Voice>,
}

impl VoicePool {
    pub fn new(nodes: &InstrumentNodes, base_pitches: [i32; CHORD_VOICES]) -> Self {
        let mut voices: Vec<Voice> = nodes.voices[..CHORD_VOICES]
            .iter()
            .zip(base_pitches)
            .map(|(&nodes, base_pitch)| Voice {
                role: VoiceRole::Chord,
                nodes,
                base_pitch,
            })
            .collect();
        voices.push(Voice {
            role: VoiceRole::Color,
            nodes: *nodes.color(),
            base_pitch: base_pitches[0] + COLOR_INTERVAL,
        });
        Self { voices }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn get(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    pub fn chord(&self) -> impl Iterator<Item = (usize, &Voice)> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.role == VoiceRole::Chord)
    }

    /// Index of the color voice
    pub fn color_index(&self) -> Option<usize> {
        self.voices.iter().position(|v| v.role == VoiceRole::Color)
    }

    pub fn set_waveform(&self, ctl: &mut Controller, waveform: Waveform) {
        for voice in &self.voices {
            ctl.setting(voice.nodes.osc, ModuleSetting::Waveform(waveform));
        }
    }

    /// Move the chord (and the color voice with it) to new base pitches
    pub fn retune(&mut self, ctl: &mut Controller, base_pitches: [i32; CHORD_VOICES], now: f64) {
        for (voice, pitch) in self.voices.iter_mut().zip(base_pitches) {
            voice.base_pitch = pitch;
        }
        if let Some(color) = self.voices.get_mut(CHORD_VOICES) {
            color.base_pitch = base_pitches[0] + COLOR_INTERVAL;
        }
        for index in 0..self.voices.len() {
            self.glide(ctl, index, 0, now, RETUNE_TAU);
        }
    }

    /// Approach `base + shift` semitones
    pub fn glide(&self, ctl: &mut Controller, index: usize, shift: i32, now: f64, tau: f64) {
        let Some(voice) = self.voices.get(index) else {
            return;
        };
        let target = midi_to_hz((voice.base_pitch + shift) as f64);
        ctl.set_target(voice.nodes.osc, Oscillator::FREQUENCY, target, now, tau);
    }

    /// Shift the stereo position by `delta`, clamped to [-1, 1]. Returns the
    /// new target position.
    pub fn nudge_pan(&self, ctl: &mut Controller, index: usize, delta: f64, now: f64) -> f64 {
        let Some(voice) = self.voices.get(index) else {
            return 0.0;
        };
        let target = (ctl.value_at(voice.nodes.pan, StereoPanner::PAN, now) + delta).clamp(-1.0, 1.0);
        ctl.set_target(voice.nodes.pan, StereoPanner::PAN, target, now, PAN_TAU);
        target
    }

    /// Replace any pending envelope with a ramp to the peak and a decay
    /// toward half of it
    pub fn envelope(&self, ctl: &mut Controller, index: usize, env: Envelope, now: f64) {
        let Some(voice) = self.voices.get(index) else {
            return;
        };
        let node = voice.nodes.env;
        let peak = env.peak.max(0.0);
        let peak_time = now + env.attack.max(0.0);
        ctl.hold(node, Gain::GAIN, now);
        ctl.linear_ramp(node, Gain::GAIN, peak, peak_time);
        ctl.set_target(node, Gain::GAIN, peak * 0.5, peak_time, env.decay_tau);
    }

    /// Return to base pitch and a steady level
    pub fn settle(&self, ctl: &mut Controller, index: usize, level: f64, now: f64) {
        let Some(voice) = self.voices.get(index) else {
            return;
        };
        self.glide(ctl, index, 0, now, GLIDE_TAU);
        ctl.hold(voice.nodes.env, Gain::GAIN, now);
        ctl.set_target(voice.nodes.env, Gain::GAIN, level.max(0.0), now, SETTLE_TAU);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SynthParams;
    use crate::patch;
    use crate::render::{self, GraphRenderer};
    use approx::assert_relative_eq;

    fn setup() -> (Controller, GraphRenderer, VoicePool) {
        let params = SynthParams::default();
        let (patch, nodes) = patch::build(8000.0, &params, None).unwrap();
        let (ctl, renderer) = render::split(patch, 1024);
        let pool = VoicePool::new(&nodes, params.base_pitches().unwrap());
        (ctl, renderer, pool)
    }

    #[test]
    fn test_pool_shape() {
        let (_, _, pool) = setup();
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.chord().count(), 4);
        assert_eq!(pool.color_index(), Some(4));
        assert_eq!(pool.get(4).unwrap().base_pitch, 48 + COLOR_INTERVAL);
    }

    #[test]
    fn test_envelope_ramps_then_decays_toward_half() {
        let (mut ctl, _r, pool) = setup();
        let env = Envelope {
            peak: 0.3,
            attack: 0.5,
            decay_tau: 0.9,
        };
        pool.envelope(&mut ctl, 1, env, 0.0);
        let node = pool.get(1).unwrap().nodes.env;

        assert_relative_eq!(ctl.value_at(node, Gain::GAIN, 0.25), 0.15, epsilon = 1e-9);
        assert_relative_eq!(ctl.value_at(node, Gain::GAIN, 0.5), 0.3, epsilon = 1e-9);
        let decaying = ctl.value_at(node, Gain::GAIN, 1.5);
        assert!(decaying > 0.15 && decaying < 0.3);
        assert_relative_eq!(ctl.value_at(node, Gain::GAIN, 60.0), 0.15, epsilon = 1e-9);
    }

    #[test]
    fn test_envelope_replaces_pending_curve() {
        let (mut ctl, mut renderer, pool) = setup();
        let node = pool.get(0).unwrap().nodes.env;
        pool.envelope(
            &mut ctl,
            0,
            Envelope {
                peak: 0.4,
                attack: 1.0,
                decay_tau: 1.0,
            },
            0.0,
        );
        let mut buf = vec![0.0; 4000 * 2];
        renderer.process(&mut buf, 2);
        let now = ctl.now();
        assert_relative_eq!(now, 0.5);

        pool.envelope(
            &mut ctl,
            0,
            Envelope {
                peak: 0.1,
                attack: 0.5,
                decay_tau: 1.0,
            },
            now,
        );
        // Starts from where the first ramp had reached, not from zero
        assert_relative_eq!(ctl.value_at(node, Gain::GAIN, now), 0.2, epsilon = 1e-9);
        assert_relative_eq!(ctl.value_at(node, Gain::GAIN, 1.0), 0.1, epsilon = 1e-9);
        assert!(ctl.value_at(node, Gain::GAIN, 1.0) < 0.4);
    }

    #[test]
    fn test_nudge_pan_clamps() {
        let (mut ctl, _r, pool) = setup();
        // voice 3 rests at 0.6
        let target = pool.nudge_pan(&mut ctl, 3, 0.2, 0.0);
        assert_relative_eq!(target, 0.8, epsilon = 1e-12);
        for _ in 0..5 {
            pool.nudge_pan(&mut ctl, 3, 0.2, 0.0);
        }
        let node = pool.get(3).unwrap().nodes.pan;
        assert!(ctl.value_at(node, StereoPanner::PAN, 100.0) <= 1.0);
    }

    #[test]
    fn test_retune_glides_to_new_pitch() {
        let (mut ctl, _r, mut pool) = setup();
        pool.retune(&mut ctl, [57, 60, 64, 67], 0.0);
        let osc = pool.get(0).unwrap().nodes.osc;
        let color = pool.get(4).unwrap();
        assert_eq!(color.base_pitch, 57 + COLOR_INTERVAL);

        // Approaching, not jumping
        let early = ctl.value_at(osc, Oscillator::FREQUENCY, 0.01);
        assert!(early < midi_to_hz(57.0) && early > midi_to_hz(48.0));
        assert_relative_eq!(
            ctl.value_at(osc, Oscillator::FREQUENCY, 30.0),
            midi_to_hz(57.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_settle_reaches_level() {
        let (mut ctl, _r, pool) = setup();
        pool.glide(&mut ctl, 2, 12, 0.0, GLIDE_TAU);
        pool.settle(&mut ctl, 2, 0.12, 0.0);
        let voice = pool.get(2).unwrap();
        assert_relative_eq!(
            ctl.value_at(voice.nodes.env, Gain::GAIN, 30.0),
            0.12,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            ctl.value_at(voice.nodes.osc, Oscillator::FREQUENCY, 30.0),
            midi_to_hz(voice.base_pitch as f64),
            epsilon = 1e-6
        );
    }
}
