//! Engine Lifecycle
//!
//! [`EngineHandle`] is the composition root: it owns the device provider, the
//! random source, the control-thread [`Scheduler`], the live graph's
//! [`Controller`] and the [`Recorder`]. Everything runs on the caller's thread;
//! [`EngineHandle::poll`] drives the arpeggiator and teardown timers.
//!
//! ```text
//! Idle ─init_context─▶ Idle(device) ─start─▶ Starting ─▶ Running
//!   ▲                                                     │ stop
//!   └──────── init_context ◀── Closed ◀── grace ── Stopping
//! ```

use crate::arp::{self, Firing};
use crate::capture::{CaptureMode, Recorder, Take};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::{NodeId, Topology};
use crate::io::{DeviceProvider, OutputDevice};
use crate::mapping::{self, Ema, MappingResult, MappingTarget, StreamKind, APPROACH_TAU};
use crate::modules::{Delay, Gain, Lfo, Lowpass, Reverb};
use crate::params::{clamp_arp_rate, clamp_finite, SynthParams};
use crate::patch::{self, InstrumentNodes};
use crate::port::ParamId;
use crate::render::{self, Controller};
use crate::rng::{self, RandomSource};
use crate::scheduler::{Clock, Scheduler, SystemClock, TimerToken};
use crate::voice::VoicePool;
use tracing::{debug, info, warn};

/// Time constant for parameter changes from [`EngineHandle::update_params`]
pub const PARAM_TAU: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Stopping,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    ArpCycle,
    Teardown,
}

/// Control-side view of a started graph
struct LiveGraph {
    controller: Controller,
    nodes: InstrumentNodes,
    topology: Topology,
}

pub struct EngineHandle {
    config: EngineConfig,
    provider: Box<dyn DeviceProvider>,
    rng: Box<dyn RandomSource>,
    scheduler: Scheduler<Task>,
    state: EngineState,
    device: Option<Box<dyn OutputDevice>>,
    graph: Option<LiveGraph>,
    voices: VoicePool,
    params: SynthParams,
    ema: Ema,
    stream: Option<StreamKind>,
    recorder: Recorder,
    arp_timer: Option<TimerToken>,
    teardown_timer: Option<TimerToken>,
    last_firing: Option<(f64, Firing)>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig, provider: impl DeviceProvider + 'static) -> Self {
        Self {
            ema: Ema::new(config.ema_alpha),
            stream: None,
            recorder: Recorder::new(config.capture_block_frames),
            config,
            provider: Box::new(provider),
            rng: rng::entropy_source(),
            scheduler: Scheduler::new(Box::new(SystemClock::new())),
            state: EngineState::Idle,
            device: None,
            graph: None,
            voices: VoicePool::default(),
            params: SynthParams::default(),
            arp_timer: None,
            teardown_timer: None,
            last_firing: None,
        }
    }

    /// Replace the random source
    pub fn with_rng(mut self, rng: impl RandomSource + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Replace the control clock. Pending timers are discarded.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.scheduler = Scheduler::new(Box::new(clock));
        self.arp_timer = None;
        self.teardown_timer = None;
        self
    }

    /// Acquire the output device.
    ///
    /// Returns false while a graph is starting or running, or when no device is
    /// available. A pending teardown is completed first.
    pub fn init_context(&mut self) -> bool {
        match self.state {
            EngineState::Starting | EngineState::Running => {
                warn!(state = ?self.state, "init_context rejected while engine is active");
                return false;
            }
            EngineState::Stopping => {
                debug!("completing pending teardown before acquiring a new context");
                self.teardown();
            }
            EngineState::Idle | EngineState::Closed => {}
        }
        self.state = EngineState::Idle;

        if self.device.is_some() {
            return true;
        }
        match self.provider.open() {
            Ok(device) => {
                info!(
                    sample_rate = device.sample_rate(),
                    channels = device.channels(),
                    "audio context acquired"
                );
                self.device = Some(device);
                true
            }
            Err(e) => {
                warn!(error = %e, "audio context unavailable");
                false
            }
        }
    }

    /// Build the graph and start the device. A no-op while already running.
    pub fn start(&mut self, params: &SynthParams) -> Result<(), EngineError> {
        match self.state {
            EngineState::Starting | EngineState::Running => {
                debug!("start ignored; engine already running");
                return Ok(());
            }
            EngineState::Stopping => {
                // The device is on its way out; a fresh init_context is needed
                self.teardown();
                return Err(EngineError::NoContext);
            }
            EngineState::Idle | EngineState::Closed => {}
        }
        if self.device.is_none() {
            return Err(EngineError::NoContext);
        }

        self.state = EngineState::Starting;
        if let Err(e) = self.launch(params.sanitized()) {
            warn!(error = %e, "engine failed to start");
            self.graph = None;
            self.voices.clear();
            self.recorder.detach();
            self.state = EngineState::Idle;
            return Err(e);
        }
        self.state = EngineState::Running;
        info!(voices = self.voices.len(), "engine running");

        if self.params.arp_enabled {
            self.schedule_arp_cycle();
        } else {
            self.settle_voices();
        }
        Ok(())
    }

    fn launch(&mut self, params: SynthParams) -> Result<(), EngineError> {
        let device = self.device.as_mut().ok_or(EngineError::NoContext)?;
        let sample_rate = device.sample_rate();
        let mode = if device.supports_graph_tap() {
            CaptureMode::GraphTap
        } else {
            CaptureMode::BlockCallback
        };

        let sink = self.recorder.init(sample_rate, 2, mode);
        let (tap_sink, fallback_sink) = match mode {
            CaptureMode::GraphTap => (sink, None),
            CaptureMode::BlockCallback => (None, sink),
        };

        let base_pitches = params.base_pitches()?;
        let (patch, nodes) = patch::build(sample_rate, &params, tap_sink)?;
        let topology = patch.topology();
        let (controller, mut renderer) = render::split(patch, self.config.command_capacity);
        if let Some(sink) = fallback_sink {
            renderer.set_fallback_capture(sink);
        }
        device.resume(renderer)?;

        self.voices = VoicePool::new(&nodes, base_pitches);
        self.graph = Some(LiveGraph {
            controller,
            nodes,
            topology,
        });
        self.params = params;
        Ok(())
    }

    /// Fade every gain to silence and schedule the device release. Only acts
    /// while running.
    pub fn stop(&mut self) {
        if self.state != EngineState::Running {
            debug!(state = ?self.state, "stop ignored");
            return;
        }
        self.cancel_arp();

        if let Some(graph) = self.graph.as_mut() {
            let ctl = &mut graph.controller;
            let now = ctl.now();
            let end = now + self.config.stop_ramp().as_secs_f64();
            for (node, param) in graph.nodes.gain_params() {
                ctl.hold(node, param, now);
                ctl.linear_ramp(node, param, 0.0, end);
            }
        }

        self.teardown_timer = Some(
            self.scheduler
                .schedule(self.config.grace_period(), Task::Teardown),
        );
        self.state = EngineState::Stopping;
        info!(
            ramp_ms = self.config.stop_ramp_ms,
            grace_ms = self.config.grace_period_ms,
            "engine stopping"
        );
    }

    fn teardown(&mut self) {
        if let Some(token) = self.teardown_timer.take() {
            self.scheduler.cancel(token);
        }
        self.cancel_arp();
        if let Some(mut device) = self.device.take() {
            device.release();
        }
        self.graph = None;
        self.voices.clear();
        self.recorder.detach();
        self.state = EngineState::Closed;
        info!("engine closed");
    }

    /// Run due timers, then move captured audio into the current take
    pub fn poll(&mut self) {
        while let Some((_, task)) = self.scheduler.pop_due() {
            match task {
                Task::ArpCycle => {
                    self.arp_timer = None;
                    self.fire_arp();
                }
                Task::Teardown => {
                    self.teardown_timer = None;
                    self.teardown();
                }
            }
        }
        self.recorder.collect();
    }

    fn schedule_arp_cycle(&mut self) {
        self.cancel_arp();
        let delay = arp::next_delay(self.rng.as_mut(), self.params.arp_rate_ms);
        self.arp_timer = Some(self.scheduler.schedule(delay, Task::ArpCycle));
    }

    fn cancel_arp(&mut self) {
        if let Some(token) = self.arp_timer.take() {
            self.scheduler.cancel(token);
        }
    }

    fn fire_arp(&mut self) {
        if self.state != EngineState::Running || !self.params.arp_enabled {
            return;
        }
        let Some(graph) = self.graph.as_mut() else {
            return;
        };
        let firing = arp::plan_firing(
            self.rng.as_mut(),
            &self.params.adsr,
            self.params.color_intensity,
            self.params.arp_rate_ms,
        );
        let now = graph.controller.now();
        arp::perform(&firing, &self.voices, &mut graph.controller, now);
        debug!(
            voices = ?firing.strikes.iter().map(|s| s.voice).collect::<Vec<_>>(),
            color = firing.color.is_some(),
            "arpeggiator fired"
        );
        self.last_firing = Some((now, firing));
        self.schedule_arp_cycle();
    }

    fn settle_voices(&mut self) {
        if let Some(graph) = self.graph.as_mut() {
            let now = graph.controller.now();
            arp::settle(
                &self.voices,
                &mut graph.controller,
                &self.params.adsr,
                self.params.color_intensity,
                now,
            );
        }
    }

    /// Adopt new synth parameters. While running, changed values glide to
    /// their new settings and the chord retunes.
    pub fn update_params(&mut self, params: &SynthParams) {
        let mut params = params.sanitized();
        let pitches = match params.base_pitches() {
            Ok(pitches) => Some(pitches),
            Err(e) => {
                warn!(error = %e, "invalid chord; keeping previous voices");
                params.voices = self.params.voices.clone();
                None
            }
        };
        let arp_enabled = params.arp_enabled;
        params.arp_enabled = self.params.arp_enabled;
        let previous = std::mem::replace(&mut self.params, params);

        if self.state == EngineState::Running {
            if let Some(graph) = self.graph.as_mut() {
                let ctl = &mut graph.controller;
                let nodes = &graph.nodes;
                let next = &self.params;
                let now = ctl.now();

                if next.waveform != previous.waveform {
                    self.voices.set_waveform(ctl, next.waveform);
                }
                if let Some(pitches) = pitches {
                    if next.voices != previous.voices {
                        self.voices.retune(ctl, pitches, now);
                    }
                }

                let mut retarget = |node: NodeId, param: ParamId, old: f64, new: f64| {
                    if old != new {
                        ctl.set_target(node, param, new, now, PARAM_TAU);
                    }
                };
                retarget(nodes.master, Gain::GAIN, previous.master_volume, next.master_volume);
                retarget(nodes.filter, Lowpass::CUTOFF, previous.filter.cutoff, next.filter.cutoff);
                retarget(
                    nodes.filter,
                    Lowpass::RESONANCE,
                    previous.filter.resonance,
                    next.filter.resonance,
                );
                retarget(nodes.delay, Delay::TIME, previous.delay.time, next.delay.time);
                retarget(
                    nodes.delay_feedback,
                    Gain::GAIN,
                    previous.delay.feedback,
                    next.delay.feedback,
                );
                retarget(nodes.delay_wet, Gain::GAIN, previous.delay.mix, next.delay.mix);
                retarget(nodes.delay_dry, Gain::GAIN, 1.0 - previous.delay.mix, 1.0 - next.delay.mix);
                retarget(nodes.reverb_wet, Gain::GAIN, previous.reverb.mix, next.reverb.mix);
                retarget(
                    nodes.reverb_dry,
                    Gain::GAIN,
                    1.0 - previous.reverb.mix,
                    1.0 - next.reverb.mix,
                );
                retarget(nodes.reverb, Reverb::DECAY, previous.reverb.decay, next.reverb.decay);
            }
            let pad_changed = self.params.adsr.sustain != previous.adsr.sustain
                || self.params.color_intensity != previous.color_intensity;
            if !self.params.arp_enabled && pad_changed {
                self.settle_voices();
            }
        }
        self.set_arp_enabled(arp_enabled);
    }

    /// Turn the arpeggiator on or off. Disabling settles every voice to a pad;
    /// enabling starts a fresh cycle.
    pub fn set_arp_enabled(&mut self, enabled: bool) {
        if self.params.arp_enabled == enabled {
            return;
        }
        self.params.arp_enabled = enabled;
        if self.state != EngineState::Running {
            return;
        }
        if enabled {
            self.schedule_arp_cycle();
            info!("arpeggiator enabled");
        } else {
            self.cancel_arp();
            self.settle_voices();
            info!("arpeggiator disabled; voices settling");
        }
    }

    /// Set the base arpeggiator interval, clamped to 300–16000 ms. Takes effect
    /// from the next cycle. Returns the clamped value.
    pub fn set_arp_rate(&mut self, ms: f64) -> f64 {
        self.params.arp_rate_ms = clamp_arp_rate(ms);
        self.params.arp_rate_ms
    }

    /// Smooth a telemetry sample and, unless frozen or stopped, steer the
    /// parameters its stream drives. Switching stream kinds restarts the
    /// smoothing. Non-finite samples are ignored and schedule nothing.
    pub fn apply_data_mapping(
        &mut self,
        kind: StreamKind,
        raw: f64,
        sensitivity: f64,
        frozen: bool,
    ) -> MappingResult {
        if self.stream.replace(kind).is_some_and(|previous| previous != kind) {
            debug!(?kind, "stream kind changed; smoothing restarted");
            self.ema.reset();
        }
        let update = self.ema.update(raw);
        let result = MappingResult {
            smoothed_value: self.ema.value(),
        };
        let Some(smoothed) = update else {
            debug!(?kind, raw, "non-finite telemetry sample ignored");
            return result;
        };
        if frozen || self.state != EngineState::Running {
            return result;
        }
        let Some(graph) = self.graph.as_mut() else {
            return result;
        };

        let ctl = &mut graph.controller;
        let nodes = &graph.nodes;
        let now = ctl.now();
        let params = &self.params;
        let updates = mapping::plan(kind, smoothed, sensitivity, |target| match target {
            MappingTarget::FilterCutoff => ctl.value_at(nodes.filter, Lowpass::CUTOFF, now),
            MappingTarget::FilterResonance => ctl.value_at(nodes.filter, Lowpass::RESONANCE, now),
            MappingTarget::ReverbMix => ctl.value_at(nodes.reverb_wet, Gain::GAIN, now),
            MappingTarget::LfoDepth => ctl.value_at(nodes.lfo, Lfo::DEPTH, now),
            MappingTarget::ArpRate => params.arp_rate_ms,
            MappingTarget::ColorIntensity => params.color_intensity,
        });

        let mut arp_rate = None;
        let mut color_intensity = None;
        for update in &updates {
            let value = update.value;
            match update.target {
                MappingTarget::FilterCutoff => {
                    ctl.set_target(nodes.filter, Lowpass::CUTOFF, value, now, APPROACH_TAU)
                }
                MappingTarget::FilterResonance => {
                    ctl.set_target(nodes.filter, Lowpass::RESONANCE, value, now, APPROACH_TAU)
                }
                MappingTarget::ReverbMix => {
                    let mix = clamp_finite(value, 0.0, 1.0);
                    ctl.set_target(nodes.reverb_wet, Gain::GAIN, mix, now, APPROACH_TAU);
                    ctl.set_target(nodes.reverb_dry, Gain::GAIN, 1.0 - mix, now, APPROACH_TAU);
                }
                MappingTarget::LfoDepth => {
                    ctl.set_target(nodes.lfo, Lfo::DEPTH, value, now, APPROACH_TAU)
                }
                MappingTarget::ArpRate => arp_rate = Some(value),
                MappingTarget::ColorIntensity => color_intensity = Some(value),
            }
        }
        debug!(?kind, smoothed, targets = updates.len(), "data mapping applied");

        if let Some(ms) = arp_rate {
            self.set_arp_rate(ms);
        }
        if let Some(intensity) = color_intensity {
            self.params.color_intensity = clamp_finite(intensity, 0.0, 1.0);
            if !self.params.arp_enabled {
                self.settle_color();
            }
        }
        result
    }

    fn settle_color(&mut self) {
        let (Some(graph), Some(color)) = (self.graph.as_mut(), self.voices.color_index()) else {
            return;
        };
        let now = graph.controller.now();
        let level = self.params.color_intensity * arp::COLOR_PAD;
        self.voices.settle(&mut graph.controller, color, level, now);
    }

    /// Forget the smoothing history; the next sample seeds the average
    pub fn reset_data_smoothing(&mut self) {
        self.ema.reset();
    }

    /// Begin a take. Audio rendered before this call is never included.
    pub fn start_recording(&mut self) -> bool {
        if self.state != EngineState::Running {
            warn!(state = ?self.state, "start_recording needs a running engine");
            return false;
        }
        self.recorder.start()
    }

    /// Finish the current take. `None` when not recording or nothing was
    /// captured.
    pub fn stop_recording(&mut self) -> Option<Take> {
        self.recorder.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn capture_mode(&self) -> Option<CaptureMode> {
        self.recorder.mode()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &SynthParams {
        &self.params
    }

    /// Voices alive in the graph: 5 from start until the device is released
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.graph.as_ref().map(|g| &g.topology)
    }

    pub fn nodes(&self) -> Option<&InstrumentNodes> {
        self.graph.as_ref().map(|g| &g.nodes)
    }

    pub fn arp_enabled(&self) -> bool {
        self.params.arp_enabled
    }

    pub fn arp_rate_ms(&self) -> f64 {
        self.params.arp_rate_ms
    }

    /// Whether an arpeggiator cycle is pending
    pub fn arp_scheduled(&self) -> bool {
        self.arp_timer
            .is_some_and(|token| self.scheduler.is_pending(token))
    }

    /// Graph time and plan of the most recent arpeggiator firing
    pub fn last_firing(&self) -> Option<&(f64, Firing)> {
        self.last_firing.as_ref()
    }

    /// Graph time as last published by the render path
    pub fn graph_time(&self) -> Option<f64> {
        self.graph.as_ref().map(|g| g.controller.now())
    }

    /// Scheduled value of a graph parameter at graph time `t`
    pub fn param_at(&self, node: NodeId, param: ParamId, t: f64) -> Option<f64> {
        self.graph
            .as_ref()
            .map(|g| g.controller.value_at(node, param, t))
    }

    /// Commands sent to the current graph's render path
    pub fn commands_sent(&self) -> u64 {
        self.graph
            .as_ref()
            .map_or(0, |g| g.controller.commands_sent())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
        }
    }
}
