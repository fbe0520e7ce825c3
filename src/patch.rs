//! The Instrument Patch
//!
//! Declares the fixed signal graph and keeps the ids of every node control code
//! needs to automate. The shape never changes after [`build`]:
//!
//! ```text
//! voiceN.osc → voiceN.env → voiceN.pan ┐
//! color.osc  → color.env  → color.pan  ┴→ mix → filter ─┬→ delay.dry ───────────────┬→ delay.bus
//!                                    lfo ─(cutoff_mod)──┘└→ delay → delay.wet ──────┘
//!                                                            ↑  └→ delay.feedback ┐
//!                                                            └──── (feedback) ────┘
//! delay.bus ─┬→ reverb.dry ──────────┬→ limiter → master ─┬→ output
//!            └→ reverb → reverb.wet ─┘                    └→ tap
//! ```

use crate::automation::{AutomationEvent, AutomationOp};
use crate::capture::CaptureSink;
use crate::error::EngineError;
use crate::graph::{NodeHandle, NodeId, Patch, PatchError};
use crate::modules::{
    CaptureTap, Delay, Destination, Gain, Lfo, Limiter, Lowpass, Oscillator, Reverb, StereoPanner,
};
use crate::params::{midi_to_hz, SynthParams};
use crate::port::ParamId;

/// Number of chord voices
pub const CHORD_VOICES: usize = 4;
/// Chord voices plus the color voice
pub const TOTAL_VOICES: usize = CHORD_VOICES + 1;

/// Semitones above the first chord voice where the color voice sits (the
/// third harmonic)
pub const COLOR_INTERVAL: i32 = 19;

pub const LFO_RATE_HZ: f64 = 0.06;
pub const LFO_DEPTH_HZ: f64 = 80.0;

/// Resting stereo positions, chord voices first
const PAN_POSITIONS: [f64; TOTAL_VOICES] = [-0.6, -0.2, 0.2, 0.6, 0.0];

/// Node ids for one voice strip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceNodes {
    pub osc: NodeId,
    pub env: NodeId,
    pub pan: NodeId,
}

/// Ids of every node in the instrument graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentNodes {
    /// Chord voices in order, then the color voice
    pub voices: [VoiceNodes; TOTAL_VOICES],
    pub mix: NodeId,
    pub lfo: NodeId,
    pub filter: NodeId,
    pub delay: NodeId,
    pub delay_feedback: NodeId,
    pub delay_dry: NodeId,
    pub delay_wet: NodeId,
    pub delay_bus: NodeId,
    pub reverb: NodeId,
    pub reverb_dry: NodeId,
    pub reverb_wet: NodeId,
    pub limiter: NodeId,
    pub master: NodeId,
    pub output: NodeId,
    pub tap: NodeId,
}

impl InstrumentNodes {
    pub fn color(&self) -> &VoiceNodes {
        &self.voices[CHORD_VOICES]
    }

    /// Every gain parameter in the graph (the set silenced on stop)
    pub fn gain_params(&self) -> Vec<(NodeId, ParamId)> {
        let mut gains: Vec<(NodeId, ParamId)> =
            self.voices.iter().map(|v| (v.env, Gain::GAIN)).collect();
        gains.extend(
            [
                self.mix,
                self.delay_feedback,
                self.delay_dry,
                self.delay_wet,
                self.delay_bus,
                self.reverb_dry,
                self.reverb_wet,
                self.master,
            ]
            .into_iter()
            .map(|node| (node, Gain::GAIN)),
        );
        gains
    }
}

/// Frequency of each voice for the given chord pitches
pub fn voice_frequencies(base_pitches: &[i32; CHORD_VOICES]) -> [f64; TOTAL_VOICES] {
    let mut freqs = [0.0; TOTAL_VOICES];
    for (freq, &pitch) in freqs.iter_mut().zip(base_pitches) {
        *freq = midi_to_hz(pitch as f64);
    }
    freqs[CHORD_VOICES] = midi_to_hz((base_pitches[0] + COLOR_INTERVAL) as f64);
    freqs
}

/// Build and compile the instrument graph.
///
/// Voice envelopes start silent. `tap_sink` feeds the capture tap; pass `None`
/// when capture runs from the renderer's output blocks instead.
pub fn build(
    sample_rate: f64,
    params: &SynthParams,
    tap_sink: Option<CaptureSink>,
) -> Result<(Patch, InstrumentNodes), EngineError> {
    let params = params.sanitized();
    let freqs = voice_frequencies(&params.base_pitches()?);
    let mut patch = Patch::new(sample_rate);

    let mix = patch.add("mix", Gain::stereo(1.0));

    let mut voices = Vec::with_capacity(TOTAL_VOICES);
    for (i, (&freq, &pan)) in freqs.iter().zip(&PAN_POSITIONS).enumerate() {
        let prefix = if i < CHORD_VOICES {
            format!("voice{}", i)
        } else {
            "color".to_string()
        };
        let osc = patch.add(
            format!("{}.osc", prefix),
            Oscillator::new(sample_rate, params.waveform),
        );
        let env = patch.add(format!("{}.env", prefix), Gain::mono(0.0));
        let panner = patch.add(format!("{}.pan", prefix), StereoPanner::new(pan));

        patch.connect(osc.out("out"), env.in_("in"))?;
        patch.connect(env.out("out"), panner.in_("in"))?;
        stereo(&mut patch, &panner, &mix)?;

        voices.push((osc, env, panner, freq));
    }

    let lfo = patch.add("lfo", Lfo::new(sample_rate, LFO_RATE_HZ, LFO_DEPTH_HZ));
    let filter = patch.add("filter", Lowpass::new(sample_rate));
    stereo(&mut patch, &mix, &filter)?;
    patch.connect(lfo.out("out"), filter.in_("cutoff_mod"))?;

    let delay_dry = patch.add("delay.dry", Gain::stereo(1.0 - params.delay.mix));
    let delay = patch.add("delay", Delay::new(sample_rate));
    let delay_feedback = patch.add("delay.feedback", Gain::stereo(params.delay.feedback));
    let delay_wet = patch.add("delay.wet", Gain::stereo(params.delay.mix));
    let delay_bus = patch.add("delay.bus", Gain::stereo(1.0));
    stereo(&mut patch, &filter, &delay_dry)?;
    stereo(&mut patch, &filter, &delay)?;
    stereo(&mut patch, &delay, &delay_feedback)?;
    for ch in ["left", "right"] {
        patch.connect_feedback(delay_feedback.out(ch), delay.in_(ch))?;
    }
    stereo(&mut patch, &delay, &delay_wet)?;
    stereo(&mut patch, &delay_dry, &delay_bus)?;
    stereo(&mut patch, &delay_wet, &delay_bus)?;

    let reverb_dry = patch.add("reverb.dry", Gain::stereo(1.0 - params.reverb.mix));
    let reverb = patch.add("reverb", Reverb::new(sample_rate));
    let reverb_wet = patch.add("reverb.wet", Gain::stereo(params.reverb.mix));
    stereo(&mut patch, &delay_bus, &reverb_dry)?;
    stereo(&mut patch, &delay_bus, &reverb)?;
    stereo(&mut patch, &reverb, &reverb_wet)?;

    let limiter = patch.add("limiter", Limiter::new(sample_rate));
    let master = patch.add("master", Gain::stereo(params.master_volume));
    let output = patch.add("output", Destination::new());
    let tap = patch.add("tap", CaptureTap::new(tap_sink));
    stereo(&mut patch, &reverb_dry, &limiter)?;
    stereo(&mut patch, &reverb_wet, &limiter)?;
    stereo(&mut patch, &limiter, &master)?;
    for ch in ["left", "right"] {
        patch.mult(master.out(ch), &[output.in_(ch), tap.in_(ch)])?;
    }
    patch.set_output(output.id());

    let mut nodes = Vec::with_capacity(TOTAL_VOICES);
    for (osc, env, panner, freq) in &voices {
        set_initial(&mut patch, osc.id(), Oscillator::FREQUENCY, *freq)?;
        nodes.push(VoiceNodes {
            osc: osc.id(),
            env: env.id(),
            pan: panner.id(),
        });
    }
    let voices: [VoiceNodes; TOTAL_VOICES] = nodes
        .try_into()
        .map_err(|_| PatchError::InvalidNode)?;

    set_initial(&mut patch, filter.id(), Lowpass::CUTOFF, params.filter.cutoff)?;
    set_initial(&mut patch, filter.id(), Lowpass::RESONANCE, params.filter.resonance)?;
    set_initial(&mut patch, delay.id(), Delay::TIME, params.delay.time)?;
    set_initial(&mut patch, reverb.id(), Reverb::DECAY, params.reverb.decay)?;

    patch.compile()?;

    Ok((
        patch,
        InstrumentNodes {
            voices,
            mix: mix.id(),
            lfo: lfo.id(),
            filter: filter.id(),
            delay: delay.id(),
            delay_feedback: delay_feedback.id(),
            delay_dry: delay_dry.id(),
            delay_wet: delay_wet.id(),
            delay_bus: delay_bus.id(),
            reverb: reverb.id(),
            reverb_dry: reverb_dry.id(),
            reverb_wet: reverb_wet.id(),
            limiter: limiter.id(),
            master: master.id(),
            output: output.id(),
            tap: tap.id(),
        },
    ))
}

/// Cable both channels of a stereo output into a stereo input
fn stereo(patch: &mut Patch, from: &NodeHandle, to: &NodeHandle) -> Result<(), PatchError> {
    for ch in ["left", "right"] {
        patch.connect(from.out(ch), to.in_(ch))?;
    }
    Ok(())
}

fn set_initial(
    patch: &mut Patch,
    node: NodeId,
    param: ParamId,
    value: f64,
) -> Result<(), PatchError> {
    patch.automate(
        node,
        param,
        AutomationOp::Schedule(AutomationEvent::SetValue { time: 0.0, value }),
    )
}
