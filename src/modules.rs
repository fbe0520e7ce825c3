//! DSP Modules
//!
//! The node types the instrument's fixed graph is built from: oscillators,
//! gains, panners, a resonant lowpass, the drift LFO, delay, reverb, limiter,
//! the output destination and the capture tap.

use crate::capture::CaptureSink;
use crate::params::Waveform;
use crate::port::{
    GraphModule, ModuleSetting, ParamDef, PortDef, PortSpec, PortValues, SignalKind,
};
use std::f64::consts::{FRAC_PI_4, PI, TAU};

/// Oscillator
///
/// A single-waveform oscillator with an automatable frequency. Output is ±1.0.
pub struct Oscillator {
    phase: f64,
    sample_rate: f64,
    waveform: Waveform,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Oscillator {
    pub const FREQUENCY: usize = 0;

    pub fn new(sample_rate: f64, waveform: Waveform) -> Self {
        Self {
            phase: 0.0,
            sample_rate,
            waveform,
            spec: PortSpec {
                inputs: vec![],
                outputs: vec![PortDef::new(10, "out", SignalKind::Audio)],
            },
            params: vec![ParamDef::new(Self::FREQUENCY, "frequency", 440.0, 0.0, 20000.0)],
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }
}

impl GraphModule for Oscillator {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], _inputs: &PortValues, outputs: &mut PortValues) {
        let freq = params[Self::FREQUENCY];

        let out = match self.waveform {
            Waveform::Sine => (self.phase * TAU).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            Waveform::Sawtooth => 2.0 * self.phase - 1.0,
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        outputs.set(10, out);

        self.phase = (self.phase + freq / self.sample_rate).fract();
        if self.phase < 0.0 {
            self.phase += 1.0;
        }
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn apply_setting(&mut self, setting: ModuleSetting) {
        let ModuleSetting::Waveform(waveform) = setting;
        self.waveform = waveform;
    }

    fn type_id(&self) -> &'static str {
        "oscillator"
    }
}

/// Gain stage (VCA) for one or two channels.
///
/// Mono gains use `in`/`out`; stereo gains use `left`/`right`. The gain
/// parameter is never negative.
pub struct Gain {
    channels: usize,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Gain {
    pub const GAIN: usize = 0;

    pub fn mono(default: f64) -> Self {
        Self::with_spec(1, PortSpec::mono(), default)
    }

    pub fn stereo(default: f64) -> Self {
        Self::with_spec(2, PortSpec::stereo(), default)
    }

    fn with_spec(channels: usize, spec: PortSpec, default: f64) -> Self {
        Self {
            channels,
            spec,
            params: vec![ParamDef::new(Self::GAIN, "gain", default, 0.0, 4.0)],
        }
    }
}

impl GraphModule for Gain {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        let gain = params[Self::GAIN];
        for ch in 0..self.channels as u32 {
            outputs.set(10 + ch, inputs.get_or(ch, 0.0) * gain);
        }
    }

    fn reset(&mut self) {}

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "gain"
    }
}

/// Equal-power stereo panner for a mono source
pub struct StereoPanner {
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl StereoPanner {
    pub const PAN: usize = 0;

    pub fn new(pan: f64) -> Self {
        Self {
            spec: PortSpec {
                inputs: vec![PortDef::new(0, "in", SignalKind::Audio)],
                outputs: vec![
                    PortDef::new(10, "left", SignalKind::Audio),
                    PortDef::new(11, "right", SignalKind::Audio),
                ],
            },
            params: vec![ParamDef::new(Self::PAN, "pan", pan, -1.0, 1.0)],
        }
    }
}

impl GraphModule for StereoPanner {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        let input = inputs.get_or(0, 0.0);
        // pan: -1.0 (full left) to 1.0 (full right)
        let angle = (params[Self::PAN] + 1.0) * FRAC_PI_4;
        outputs.set(10, input * angle.cos());
        outputs.set(11, input * angle.sin());
    }

    fn reset(&mut self) {}

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "panner"
    }
}

/// Resonant State Variable lowpass (stereo)
///
/// Cutoff is in Hz; the `cutoff_mod` input adds a Hz offset (the drift LFO).
/// Resonance is the filter Q.
pub struct Lowpass {
    low: [f64; 2],
    band: [f64; 2],
    sample_rate: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Lowpass {
    pub const CUTOFF: usize = 0;
    pub const RESONANCE: usize = 1;

    pub fn new(sample_rate: f64) -> Self {
        let mut spec = PortSpec::stereo();
        spec.inputs
            .push(PortDef::new(2, "cutoff_mod", SignalKind::Modulation));
        Self {
            low: [0.0; 2],
            band: [0.0; 2],
            sample_rate,
            spec,
            params: vec![
                ParamDef::new(Self::CUTOFF, "cutoff", 1200.0, 20.0, 20000.0),
                ParamDef::new(Self::RESONANCE, "resonance", 1.0, 0.1, 30.0),
            ],
        }
    }
}

impl GraphModule for Lowpass {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        let cutoff_hz = (params[Self::CUTOFF] + inputs.get_or(2, 0.0)).max(20.0);
        let f = 2.0 * (PI * cutoff_hz / self.sample_rate).min(PI / 2.0).sin();
        let f = f.min(0.99); // Prevent instability
        let damping = 1.0 / params[Self::RESONANCE].max(0.1);

        for ch in 0..2 {
            let input = inputs.get_or(ch as u32, 0.0);
            let high = input - self.low[ch] - damping * self.band[ch];
            self.band[ch] += f * high;
            self.low[ch] += f * self.band[ch];
            // Keep a runaway resonance from blowing up the whole mix
            self.band[ch] = self.band[ch].clamp(-8.0, 8.0);
            self.low[ch] = self.low[ch].clamp(-8.0, 8.0);
            outputs.set(10 + ch as u32, self.low[ch]);
        }
    }

    fn reset(&mut self) {
        self.low = [0.0; 2];
        self.band = [0.0; 2];
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn type_id(&self) -> &'static str {
        "lowpass"
    }
}

/// Low-Frequency Oscillator (LFO)
///
/// A slow sine whose output is scaled by `depth`, in the units of whatever it
/// modulates (Hz for filter drift).
pub struct Lfo {
    phase: f64,
    sample_rate: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Lfo {
    pub const RATE: usize = 0;
    pub const DEPTH: usize = 1;

    pub fn new(sample_rate: f64, rate_hz: f64, depth: f64) -> Self {
        Self {
            phase: 0.0,
            sample_rate,
            spec: PortSpec {
                inputs: vec![],
                outputs: vec![PortDef::new(10, "out", SignalKind::Modulation)],
            },
            params: vec![
                ParamDef::new(Self::RATE, "rate", rate_hz, 0.0, 50.0),
                ParamDef::new(Self::DEPTH, "depth", depth, 0.0, 2000.0),
            ],
        }
    }
}

impl GraphModule for Lfo {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], _inputs: &PortValues, outputs: &mut PortValues) {
        outputs.set(10, (self.phase * TAU).sin() * params[Self::DEPTH]);
        self.phase = (self.phase + params[Self::RATE] / self.sample_rate).fract();
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn type_id(&self) -> &'static str {
        "lfo"
    }
}

/// Ring buffer for delay lines
pub struct RingBuffer {
    buffer: Vec<f64>,
    write_pos: usize,
    size: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let size = capacity.max(1);
        Self {
            buffer: vec![0.0; size],
            write_pos: 0,
            size,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Write a sample and return the oldest sample
    pub fn write(&mut self, sample: f64) -> f64 {
        let old = self.buffer[self.write_pos];
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.size;
        old
    }

    /// Read the sample written `delay` writes ago (0 = most recent)
    pub fn read(&self, delay: usize) -> f64 {
        if delay >= self.size {
            return 0.0;
        }
        let read_pos = (self.write_pos + self.size - delay - 1) % self.size;
        self.buffer[read_pos]
    }

    /// Read with fractional delay using linear interpolation
    pub fn read_interp(&self, delay: f64) -> f64 {
        let delay_floor = delay.floor();
        let delay_int = delay_floor as usize;
        let frac = delay - delay_floor;

        let s1 = self.read(delay_int);
        let s2 = self.read(delay_int + 1);

        s1 + frac * (s2 - s1)
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Stereo delay line. Outputs only the delayed (wet) signal; feedback is an
/// external gain cabled back into the input.
pub struct Delay {
    lines: [RingBuffer; 2],
    sample_rate: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Delay {
    pub const TIME: usize = 0;
    pub const MAX_SECONDS: f64 = 5.0;

    pub fn new(sample_rate: f64) -> Self {
        Self {
            lines: Self::lines(sample_rate),
            sample_rate,
            spec: PortSpec::stereo(),
            params: vec![ParamDef::new(Self::TIME, "time", 0.4, 0.0, Self::MAX_SECONDS)],
        }
    }

    fn lines(sample_rate: f64) -> [RingBuffer; 2] {
        let capacity = (sample_rate * Self::MAX_SECONDS) as usize + 2;
        [RingBuffer::new(capacity), RingBuffer::new(capacity)]
    }
}

impl GraphModule for Delay {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        let delay = (params[Self::TIME] * self.sample_rate).max(0.0);
        for (ch, line) in self.lines.iter_mut().enumerate() {
            line.write(inputs.get_or(ch as u32, 0.0));
            outputs.set(10 + ch as u32, line.read_interp(delay));
        }
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.lines = Self::lines(sample_rate);
    }

    fn type_id(&self) -> &'static str {
        "delay"
    }
}

struct Comb {
    line: RingBuffer,
    damped: f64,
}

impl Comb {
    fn process(&mut self, input: f64, feedback: f64, damping: f64) -> f64 {
        let delayed = self.line.read(self.line.len() - 1);
        self.damped = delayed * (1.0 - damping) + self.damped * damping;
        self.line.write(input + self.damped * feedback);
        delayed
    }
}

struct Allpass {
    line: RingBuffer,
}

impl Allpass {
    fn process(&mut self, input: f64) -> f64 {
        const G: f64 = 0.5;
        let delayed = self.line.read(self.line.len() - 1);
        let v = input + delayed * G;
        self.line.write(v);
        delayed - v * G
    }
}

/// Schroeder-style stereo reverb (parallel damped combs into series allpasses).
///
/// `decay` is the RT60 in seconds. Outputs only the wet signal.
pub struct Reverb {
    combs: [Vec<Comb>; 2],
    allpasses: [Vec<Allpass>; 2],
    sample_rate: f64,
    spec: PortSpec,
    params: Vec<ParamDef>,
}

impl Reverb {
    pub const DECAY: usize = 0;

    // Freeverb tunings at 44.1 kHz; the right channel is spread by 23 samples
    const COMB_TUNING: [usize; 4] = [1116, 1188, 1277, 1356];
    const ALLPASS_TUNING: [usize; 2] = [556, 441];
    const STEREO_SPREAD: usize = 23;
    const DAMPING: f64 = 0.2;

    pub fn new(sample_rate: f64) -> Self {
        let (combs, allpasses) = Self::build(sample_rate);
        Self {
            combs,
            allpasses,
            sample_rate,
            spec: PortSpec::stereo(),
            params: vec![ParamDef::new(Self::DECAY, "decay", 3.0, 0.1, 30.0)],
        }
    }

    fn scaled(len: usize, sample_rate: f64) -> usize {
        ((len as f64 * sample_rate / 44100.0) as usize).max(1)
    }

    fn build(sample_rate: f64) -> ([Vec<Comb>; 2], [Vec<Allpass>; 2]) {
        let channel = |spread: usize| {
            let combs = Self::COMB_TUNING
                .iter()
                .map(|&len| Comb {
                    line: RingBuffer::new(Self::scaled(len + spread, sample_rate)),
                    damped: 0.0,
                })
                .collect::<Vec<_>>();
            let allpasses = Self::ALLPASS_TUNING
                .iter()
                .map(|&len| Allpass {
                    line: RingBuffer::new(Self::scaled(len + spread, sample_rate)),
                })
                .collect::<Vec<_>>();
            (combs, allpasses)
        };
        let (left_c, left_a) = channel(0);
        let (right_c, right_a) = channel(Self::STEREO_SPREAD);
        ([left_c, right_c], [left_a, right_a])
    }
}

impl GraphModule for Reverb {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn params(&self) -> &[ParamDef] {
        &self.params
    }

    fn tick(&mut self, params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        let decay = params[Self::DECAY];
        for ch in 0..2 {
            let input = inputs.get_or(ch as u32, 0.0) * 0.25;
            let mut wet = 0.0;
            for comb in &mut self.combs[ch] {
                // -60 dB after `decay` seconds of recirculation
                let loop_seconds = comb.line.len() as f64 / self.sample_rate;
                let feedback = 10f64.powf(-3.0 * loop_seconds / decay);
                wet += comb.process(input, feedback, Self::DAMPING);
            }
            for allpass in &mut self.allpasses[ch] {
                wet = allpass.process(wet);
            }
            outputs.set(10 + ch as u32, wet);
        }
    }

    fn reset(&mut self) {
        for comb in self.combs.iter_mut().flatten() {
            comb.line.clear();
            comb.damped = 0.0;
        }
        for allpass in self.allpasses.iter_mut().flatten() {
            allpass.line.clear();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        let (combs, allpasses) = Self::build(sample_rate);
        self.combs = combs;
        self.allpasses = allpasses;
    }

    fn type_id(&self) -> &'static str {
        "reverb"
    }
}

/// Stereo-linked peak limiter guarding the master bus
pub struct Limiter {
    envelope: f64,
    attack_coeff: f64,
    release_coeff: f64,
    threshold: f64,
    spec: PortSpec,
}

impl Limiter {
    const ATTACK_SECONDS: f64 = 0.003;
    const RELEASE_SECONDS: f64 = 0.25;

    pub fn new(sample_rate: f64) -> Self {
        let mut limiter = Self {
            envelope: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            // -3 dBFS
            threshold: 10f64.powf(-3.0 / 20.0),
            spec: PortSpec::stereo(),
        };
        limiter.set_sample_rate(sample_rate);
        limiter
    }
}

impl GraphModule for Limiter {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, _params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        let left = inputs.get_or(0, 0.0);
        let right = inputs.get_or(1, 0.0);
        let peak = left.abs().max(right.abs());

        let coeff = if peak > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * (self.envelope - peak) + peak;

        let gain = if self.envelope > self.threshold {
            self.threshold / self.envelope
        } else {
            1.0
        };
        outputs.set(10, left * gain);
        outputs.set(11, right * gain);
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.attack_coeff = (-1.0 / (Self::ATTACK_SECONDS * sample_rate)).exp();
        self.release_coeff = (-1.0 / (Self::RELEASE_SECONDS * sample_rate)).exp();
    }

    fn type_id(&self) -> &'static str {
        "limiter"
    }
}

/// Stereo output destination; the patch reads its `left`/`right` outputs
pub struct Destination {
    spec: PortSpec,
}

impl Destination {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::stereo(),
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphModule for Destination {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, _params: &[f64], inputs: &PortValues, outputs: &mut PortValues) {
        outputs.set(10, inputs.get_or(0, 0.0));
        outputs.set(11, inputs.get_or(1, 0.0));
    }

    fn reset(&mut self) {}

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "destination"
    }
}

/// Capture tap: observes the master signal and forwards it to a recorder.
///
/// It has no outputs, so it can never add audible signal of its own.
pub struct CaptureTap {
    sink: Option<CaptureSink>,
    spec: PortSpec,
}

impl CaptureTap {
    pub fn new(sink: Option<CaptureSink>) -> Self {
        Self {
            sink,
            spec: PortSpec {
                inputs: vec![
                    PortDef::new(0, "left", SignalKind::Audio),
                    PortDef::new(1, "right", SignalKind::Audio),
                ],
                outputs: vec![],
            },
        }
    }
}

impl GraphModule for CaptureTap {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn tick(&mut self, _params: &[f64], inputs: &PortValues, _outputs: &mut PortValues) {
        if let Some(sink) = &mut self.sink {
            sink.push_frame(&[inputs.get_or(0, 0.0) as f32, inputs.get_or(1, 0.0) as f32]);
        }
    }

    fn reset(&mut self) {}

    fn set_sample_rate(&mut self, _: f64) {}

    fn type_id(&self) -> &'static str {
        "capture_tap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<M: GraphModule>(module: &mut M, params: &[f64], inputs: &PortValues, n: usize) -> Vec<PortValues> {
        (0..n)
            .map(|_| {
                let mut outputs = PortValues::new();
                module.tick(params, inputs, &mut outputs);
                outputs
            })
            .collect()
    }

    #[test]
    fn test_oscillator_frequency() {
        let mut osc = Oscillator::new(44100.0, Waveform::Sawtooth);
        let inputs = PortValues::new();

        let period_samples = (44100.0 / 261.63) as usize;
        let samples: Vec<f64> = run(&mut osc, &[261.63], &inputs, period_samples * 10)
            .iter()
            .map(|o| o.get(10).unwrap())
            .collect();

        let crossings = samples
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count();
        assert!((8..=12).contains(&crossings));
    }

    #[test]
    fn test_oscillator_waveform_setting() {
        let mut osc = Oscillator::new(8.0, Waveform::Sine);
        osc.apply_setting(ModuleSetting::Waveform(Waveform::Square));
        assert_eq!(osc.waveform(), Waveform::Square);

        let out = run(&mut osc, &[1.0], &PortValues::new(), 8);
        assert_eq!(out[0].get(10), Some(1.0));
        assert_eq!(out[4].get(10), Some(-1.0));
    }

    #[test]
    fn test_gain_stereo() {
        let mut gain = Gain::stereo(1.0);
        let mut inputs = PortValues::new();
        inputs.set(0, 0.5);
        inputs.set(1, -1.0);

        let out = run(&mut gain, &[0.5], &inputs, 1);
        assert_eq!(out[0].get(10), Some(0.25));
        assert_eq!(out[0].get(11), Some(-0.5));
    }

    #[test]
    fn test_gain_param_never_negative() {
        assert_eq!(Gain::mono(0.3).params()[0].min, 0.0);
    }

    #[test]
    fn test_panner_equal_power() {
        let mut pan = StereoPanner::new(0.0);
        let mut inputs = PortValues::new();
        inputs.set(0, 1.0);

        let centre = &run(&mut pan, &[0.0], &inputs, 1)[0];
        let (l, r) = (centre.get(10).unwrap(), centre.get(11).unwrap());
        assert!((l - r).abs() < 1e-12);
        assert!((l * l + r * r - 1.0).abs() < 1e-12);

        let hard_left = &run(&mut pan, &[-1.0], &inputs, 1)[0];
        assert!((hard_left.get(10).unwrap() - 1.0).abs() < 1e-12);
        assert!(hard_left.get(11).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_lowpass_passes_dc_and_attenuates_nyquist() {
        let mut lp = Lowpass::new(44100.0);
        let mut dc = PortValues::new();
        dc.set(0, 1.0);
        dc.set(1, 1.0);
        let out = run(&mut lp, &[500.0, 0.707], &dc, 4000);
        assert!((out[3999].get(10).unwrap() - 1.0).abs() < 0.01);

        lp.reset();
        let mut peak: f64 = 0.0;
        for i in 0..4000 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let mut inputs = PortValues::new();
            inputs.set(0, x);
            inputs.set(1, x);
            let mut outputs = PortValues::new();
            lp.tick(&[500.0, 0.707], &inputs, &mut outputs);
            if i > 2000 {
                peak = peak.max(outputs.get(10).unwrap().abs());
            }
        }
        assert!(peak < 0.05, "nyquist leaked through: {}", peak);
    }

    #[test]
    fn test_lfo_depth_scales_output() {
        let mut lfo = Lfo::new(100.0, 1.0, 80.0);
        let out = run(&mut lfo, &[1.0, 80.0], &PortValues::new(), 100);
        let peak = out
            .iter()
            .map(|o| o.get(10).unwrap().abs())
            .fold(0.0, f64::max);
        assert!((peak - 80.0).abs() < 0.1);
    }

    #[test]
    fn test_ring_buffer_read() {
        let mut rb = RingBuffer::new(4);
        rb.write(1.0);
        rb.write(2.0);
        assert_eq!(rb.read(0), 2.0);
        assert_eq!(rb.read(1), 1.0);
        assert_eq!(rb.read(9), 0.0);
        assert!((rb.read_interp(0.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_delay_time() {
        let mut delay = Delay::new(100.0);
        let mut impulse = PortValues::new();
        impulse.set(0, 1.0);
        let silence = PortValues::new();

        let mut outputs = PortValues::new();
        delay.tick(&[0.1], &impulse, &mut outputs);
        let mut hit = None;
        for n in 1..50 {
            delay.tick(&[0.1], &silence, &mut outputs);
            if outputs.get(10).unwrap() > 0.5 {
                hit = Some(n);
                break;
            }
        }
        assert_eq!(hit, Some(10));
    }

    #[test]
    fn test_reverb_tail_rings_then_decays() {
        let mut reverb = Reverb::new(8000.0);
        let mut impulse = PortValues::new();
        impulse.set(0, 1.0);
        impulse.set(1, 1.0);
        let silence = PortValues::new();

        let mut outputs = PortValues::new();
        reverb.tick(&[1.0], &impulse, &mut outputs);
        let energy = |reverb: &mut Reverb, n: usize| {
            (0..n)
                .map(|_| {
                    let mut o = PortValues::new();
                    reverb.tick(&[1.0], &silence, &mut o);
                    o.get(10).unwrap().powi(2)
                })
                .sum::<f64>()
        };
        let early = energy(&mut reverb, 4000);
        let late = energy(&mut reverb, 4000);
        assert!(early > 0.0);
        assert!(late < early * 0.1);
    }

    #[test]
    fn test_limiter_holds_ceiling() {
        let mut limiter = Limiter::new(44100.0);
        let mut inputs = PortValues::new();
        inputs.set(0, 2.0);
        inputs.set(1, -2.0);
        let out = run(&mut limiter, &[], &inputs, 2000);
        let last = &out[1999];
        assert!(last.get(10).unwrap() <= 0.72);
        assert!(last.get(11).unwrap() >= -0.72);

        let mut quiet = PortValues::new();
        quiet.set(0, 0.1);
        let mut fresh = Limiter::new(44100.0);
        let out = run(&mut fresh, &[], &quiet, 10);
        assert_eq!(out[9].get(10), Some(0.1));
    }

    #[test]
    fn test_capture_tap_has_no_outputs() {
        let tap = CaptureTap::new(None);
        assert!(tap.port_spec().outputs.is_empty());
        assert_eq!(tap.port_spec().inputs.len(), 2);
    }
}
