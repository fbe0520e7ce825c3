//! Render Path and Control Mirror
//!
//! The [`GraphRenderer`] owns the compiled [`Patch`] and lives wherever the
//! output device pulls audio. Control code never touches it directly: it goes
//! through a [`Controller`], which records every automation op in a local
//! mirror of the parameter timelines and forwards it over a bounded channel.
//! The renderer drains that channel with `try_recv` at the top of each block
//! and publishes its clock through an [`AtomicF64`].

use crate::automation::{AudioParam, AutomationEvent, AutomationOp};
use crate::capture::CaptureSink;
use crate::graph::{NodeId, Patch};
use crate::io::AtomicF64;
use crate::port::{ModuleSetting, ParamId};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Control → render message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphCommand {
    Automate {
        node: NodeId,
        param: ParamId,
        op: AutomationOp,
    },
    Setting {
        node: NodeId,
        setting: ModuleSetting,
    },
}

/// Build a connected controller/renderer pair around a compiled patch
pub fn split(patch: Patch, capacity: usize) -> (Controller, GraphRenderer) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let clock = Arc::new(AtomicF64::new(0.0));

    let mut mirror = HashMap::new();
    for (id, _, _) in patch.nodes() {
        let mut param = 0;
        while let Some(timeline) = patch.param(id, param) {
            mirror.insert((id, param), timeline.clone());
            param += 1;
        }
    }

    let controller = Controller {
        tx,
        clock: clock.clone(),
        mirror,
        sent: 0,
        dropped: 0,
    };
    let renderer = GraphRenderer {
        sample_rate: patch.sample_rate(),
        patch,
        commands: rx,
        clock,
        frames: 0,
        fallback_capture: None,
    };
    (controller, renderer)
}

/// Render side: evaluates the graph into interleaved device buffers
pub struct GraphRenderer {
    patch: Patch,
    commands: Receiver<GraphCommand>,
    clock: Arc<AtomicF64>,
    sample_rate: f64,
    frames: u64,
    fallback_capture: Option<CaptureSink>,
}

impl GraphRenderer {
    /// Copy every rendered frame into `sink` (used when the device can't host
    /// the graph's capture tap)
    pub fn set_fallback_capture(&mut self, sink: CaptureSink) {
        self.fallback_capture = Some(sink);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Graph time of the next frame to be rendered, in seconds
    pub fn time(&self) -> f64 {
        self.frames as f64 / self.sample_rate
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            // Commands only ever name nodes from this patch
            let _ = match command {
                GraphCommand::Automate { node, param, op } => self.patch.automate(node, param, op),
                GraphCommand::Setting { node, setting } => self.patch.apply_setting(node, setting),
            };
        }
    }

    /// Fill an interleaved buffer of `channels`-channel frames
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();
        let channels = channels.max(1);

        for frame in out.chunks_mut(channels) {
            let (left, right) = self.patch.tick(self.time());
            self.frames += 1;

            match frame {
                [mono] => *mono = ((left + right) * 0.5) as f32,
                [l, r, rest @ ..] => {
                    *l = left as f32;
                    *r = right as f32;
                    rest.fill(0.0);
                }
                [] => {}
            }
            if let Some(sink) = &mut self.fallback_capture {
                sink.push_frame(&[left as f32, right as f32]);
            }
        }

        self.clock.set(self.time());
    }
}

/// Control side: schedules automation and keeps a mirror of every timeline
pub struct Controller {
    tx: Sender<GraphCommand>,
    clock: Arc<AtomicF64>,
    mirror: HashMap<(NodeId, ParamId), AudioParam>,
    sent: u64,
    dropped: u64,
}

impl Controller {
    /// Graph time as last published by the renderer
    pub fn now(&self) -> f64 {
        self.clock.get()
    }

    /// Apply an op to the mirror and forward it to the render path
    pub fn automate(&mut self, node: NodeId, param: ParamId, op: AutomationOp) {
        let now = self.now();
        let Some(timeline) = self.mirror.get_mut(&(node, param)) else {
            warn!(?node, param, "automation for unknown parameter ignored");
            return;
        };
        timeline.apply(op);
        timeline.advance(now);
        self.send(GraphCommand::Automate { node, param, op });
    }

    pub fn setting(&mut self, node: NodeId, setting: ModuleSetting) {
        self.send(GraphCommand::Setting { node, setting });
    }

    fn send(&mut self, command: GraphCommand) {
        match self.tx.try_send(command) {
            Ok(()) => self.sent += 1,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, "render command queue full; dropping command");
            }
            // Renderer released; nothing is listening anymore
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn set_value(&mut self, node: NodeId, param: ParamId, value: f64, time: f64) {
        let event = AutomationEvent::SetValue { time, value };
        self.automate(node, param, AutomationOp::Schedule(event));
    }

    pub fn linear_ramp(&mut self, node: NodeId, param: ParamId, value: f64, end_time: f64) {
        let event = AutomationEvent::LinearRamp { end_time, value };
        self.automate(node, param, AutomationOp::Schedule(event));
    }

    pub fn set_target(
        &mut self,
        node: NodeId,
        param: ParamId,
        target: f64,
        start_time: f64,
        time_constant: f64,
    ) {
        let event = AutomationEvent::SetTarget {
            start_time,
            target,
            time_constant,
        };
        self.automate(node, param, AutomationOp::Schedule(event));
    }

    pub fn cancel_from(&mut self, node: NodeId, param: ParamId, time: f64) {
        self.automate(node, param, AutomationOp::CancelFrom(time));
    }

    /// Cancel pending curves and pin the parameter at its current value, so a
    /// new curve starts from where the old one was
    pub fn hold(&mut self, node: NodeId, param: ParamId, time: f64) -> f64 {
        let current = self.value_at(node, param, time);
        self.cancel_from(node, param, time);
        self.set_value(node, param, current, time);
        current
    }

    /// Mirrored intrinsic value at graph time `t`
    pub fn value_at(&self, node: NodeId, param: ParamId, t: f64) -> f64 {
        self.mirror
            .get(&(node, param))
            .map_or(0.0, |timeline| timeline.value_at(t))
    }

    /// Mirrored intrinsic value now
    pub fn current(&self, node: NodeId, param: ParamId) -> f64 {
        self.value_at(node, param, self.now())
    }

    /// Commands handed to the render path since creation
    pub fn commands_sent(&self) -> u64 {
        self.sent
    }

    /// Commands lost to a full queue since creation
    pub fn dropped_commands(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{Destination, Gain, Oscillator};
    use crate::params::Waveform;
    use approx::assert_relative_eq;

    fn dc_patch(sample_rate: f64) -> (Patch, NodeId) {
        // Square at 0 Hz holds +1: a DC source
        let mut patch = Patch::new(sample_rate);
        let osc = patch.add("src", Oscillator::new(sample_rate, Waveform::Square));
        let gain = patch.add("gain", Gain::mono(0.5));
        let out = patch.add("out", Destination::new());
        let still = AutomationEvent::SetValue {
            time: 0.0,
            value: 0.0,
        };
        patch
            .automate(osc.id(), Oscillator::FREQUENCY, AutomationOp::Schedule(still))
            .unwrap();
        patch.connect(osc.out("out"), gain.in_("in")).unwrap();
        patch.connect(gain.out("out"), out.in_("left")).unwrap();
        patch.connect(gain.out("out"), out.in_("right")).unwrap();
        patch.set_output(out.id());
        patch.compile().unwrap();
        (patch, gain.id())
    }

    #[test]
    fn test_renderer_publishes_clock() {
        let (patch, _) = dc_patch(100.0);
        let (controller, mut renderer) = split(patch, 16);
        let mut buf = vec![0.0f32; 50 * 2];
        renderer.process(&mut buf, 2);
        assert_relative_eq!(controller.now(), 0.5);
        assert_eq!(buf[0], 0.5);
        assert_eq!(buf[1], 0.5);
    }

    #[test]
    fn test_commands_reach_render_path() {
        let (patch, gain) = dc_patch(100.0);
        let (mut controller, mut renderer) = split(patch, 16);
        controller.set_value(gain, Gain::GAIN, 0.25, 0.0);

        let mut buf = vec![0.0f32; 4];
        renderer.process(&mut buf, 2);
        assert_eq!(buf[0], 0.25);
        assert_relative_eq!(controller.current(gain, Gain::GAIN), 0.25);
    }

    #[test]
    fn test_mirror_matches_renderer() {
        let (patch, gain) = dc_patch(100.0);
        let (mut controller, mut renderer) = split(patch, 64);
        controller.set_value(gain, Gain::GAIN, 0.0, 0.0);
        controller.linear_ramp(gain, Gain::GAIN, 1.0, 1.0);
        controller.set_target(gain, Gain::GAIN, 0.2, 1.0, 0.5);

        let mut buf = vec![0.0f32; 300 * 2];
        renderer.process(&mut buf, 2);
        for frame in [10usize, 50, 99, 150, 299] {
            let t = frame as f64 / 100.0;
            assert_relative_eq!(
                buf[frame * 2] as f64,
                controller.value_at(gain, Gain::GAIN, t),
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_hold_pins_current_value() {
        let (patch, gain) = dc_patch(100.0);
        let (mut controller, mut renderer) = split(patch, 64);
        controller.set_value(gain, Gain::GAIN, 0.0, 0.0);
        controller.linear_ramp(gain, Gain::GAIN, 1.0, 2.0);

        let mut buf = vec![0.0f32; 100 * 2];
        renderer.process(&mut buf, 2);
        let held = controller.hold(gain, Gain::GAIN, controller.now());
        assert_relative_eq!(held, 0.5, epsilon = 1e-9);
        assert_relative_eq!(controller.value_at(gain, Gain::GAIN, 1.9), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (patch, gain) = dc_patch(100.0);
        let (mut controller, _renderer) = split(patch, 2);
        for i in 0..5 {
            controller.set_value(gain, Gain::GAIN, 0.1, i as f64);
        }
        assert_eq!(controller.commands_sent(), 2);
        assert_eq!(controller.dropped_commands(), 3);
    }

    #[test]
    fn test_mono_device_downmixes() {
        let (patch, _) = dc_patch(100.0);
        let (_controller, mut renderer) = split(patch, 4);
        let mut buf = vec![0.0f32; 8];
        renderer.process(&mut buf, 1);
        assert!(buf.iter().all(|&s| s == 0.5));
    }
}
