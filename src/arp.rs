//! Arpeggiator
//!
//! An open-loop stochastic trigger: each cycle waits `rate × U(0.7, 1.3)`, fires,
//! and schedules the next cycle. A firing strikes one voice (70%) or a cluster
//! of two distinct voices (30%), each with a random octave shift, pan nudge,
//! peak and attack; the color voice is bumped on 20% of firings.
//!
//! Planning a firing is pure: it only draws from a [`RandomSource`]. Draws
//! happen in a fixed order so a scripted source can pin a firing exactly:
//! cluster chance, voice index(es), then per voice octave, pan, peak and attack,
//! then the color chance and, when bumped, the color attack.

use crate::params::{clamp_arp_rate, Adsr};
use crate::patch::CHORD_VOICES;
use crate::render::Controller;
use crate::rng::RandomSource;
use crate::voice::{Envelope, VoicePool, GLIDE_TAU};
use std::time::Duration;

pub const CLUSTER_CHANCE: f64 = 0.3;
pub const COLOR_CHANCE: f64 = 0.2;
pub const JITTER: f64 = 0.3;
pub const PAN_NUDGE: f64 = 0.2;
/// Peak as a fraction of sustain
pub const PEAK_RANGE: (f64, f64) = (0.35, 0.55);
/// Decay time constant as a fraction of the rate
pub const DECAY_RATE_FRACTION: f64 = 0.3;
/// Pad level as a fraction of sustain while the arpeggiator is off
pub const PAD_LEVEL: f64 = 0.2;
/// Color bump peak as a fraction of color intensity
pub const COLOR_BUMP: f64 = 0.15;
/// Color pad level as a fraction of color intensity
pub const COLOR_PAD: f64 = 0.1;

/// One voice's part of a firing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Strike {
    pub voice: usize,
    /// Semitones: -12, 0 or +12
    pub octave_shift: i32,
    pub pan_delta: f64,
    pub peak: f64,
    pub attack: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub strikes: Vec<Strike>,
    /// Color voice envelope, when bumped
    pub color: Option<Envelope>,
    /// Decay time constant shared by every envelope in the firing
    pub decay_tau: f64,
}

/// Delay until the next firing: `rate × U(0.7, 1.3)`
pub fn next_delay(rng: &mut dyn RandomSource, rate_ms: f64) -> Duration {
    let ms = clamp_arp_rate(rate_ms) * rng.range(1.0 - JITTER, 1.0 + JITTER);
    Duration::from_secs_f64(ms / 1000.0)
}

/// Octave shift weighted {-12: 1/6, 0: 4/6, +12: 1/6}
fn octave_shift(rng: &mut dyn RandomSource) -> i32 {
    let u = rng.next_f64();
    if u < 1.0 / 6.0 {
        -12
    } else if u < 5.0 / 6.0 {
        0
    } else {
        12
    }
}

/// Attack seconds in `[0.1, 0.1 + 0.3 × attack]`
fn attack_time(rng: &mut dyn RandomSource, attack_param: f64) -> f64 {
    rng.range(0.1, 0.1 + 0.3 * attack_param.max(0.0))
}

/// Draw one firing
pub fn plan_firing(
    rng: &mut dyn RandomSource,
    adsr: &Adsr,
    color_intensity: f64,
    rate_ms: f64,
) -> Firing {
    let voices = if rng.chance(CLUSTER_CHANCE) {
        let first = rng.index(CHORD_VOICES);
        let mut second = rng.index(CHORD_VOICES - 1);
        if second >= first {
            second += 1;
        }
        vec![first, second]
    } else {
        vec![rng.index(CHORD_VOICES)]
    };

    let strikes = voices
        .into_iter()
        .map(|voice| Strike {
            voice,
            octave_shift: octave_shift(rng),
            pan_delta: rng.bipolar() * PAN_NUDGE,
            peak: rng.range(PEAK_RANGE.0, PEAK_RANGE.1) * adsr.sustain,
            attack: attack_time(rng, adsr.attack),
        })
        .collect();

    let decay_tau = DECAY_RATE_FRACTION * clamp_arp_rate(rate_ms) / 1000.0;
    let color = rng.chance(COLOR_CHANCE).then(|| Envelope {
        peak: color_intensity * COLOR_BUMP,
        attack: attack_time(rng, adsr.attack),
        decay_tau,
    });

    Firing {
        strikes,
        color,
        decay_tau,
    }
}

/// Schedule a planned firing on the voices
pub fn perform(firing: &Firing, pool: &VoicePool, ctl: &mut Controller, now: f64) {
    for strike in &firing.strikes {
        pool.glide(ctl, strike.voice, strike.octave_shift, now, GLIDE_TAU);
        pool.nudge_pan(ctl, strike.voice, strike.pan_delta, now);
        pool.envelope(
            ctl,
            strike.voice,
            Envelope {
                peak: strike.peak,
                attack: strike.attack,
                decay_tau: firing.decay_tau,
            },
            now,
        );
    }
    if let (Some(env), Some(color)) = (firing.color, pool.color_index()) {
        pool.envelope(ctl, color, env, now);
    }
}

/// Settle every voice to its base pitch at a steady pad level
pub fn settle(pool: &VoicePool, ctl: &mut Controller, adsr: &Adsr, color_intensity: f64, now: f64) {
    for (index, _) in pool.chord() {
        pool.settle(ctl, index, adsr.sustain * PAD_LEVEL, now);
    }
    if let Some(color) = pool.color_index() {
        pool.settle(ctl, color, color_intensity * COLOR_PAD, now);
    }
}
