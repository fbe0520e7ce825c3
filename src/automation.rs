//! Parameter Automation
//!
//! Every modifiable graph parameter is an [`AudioParam`]: a default value plus a
//! timeline of [`AutomationEvent`]s anchored to the *graph* clock. Control-rate
//! code only ever schedules events; the render path evaluates the timeline at
//! each sample's graph time, so the result depends on the scheduled times and
//! never on when the scheduling call happened to run.
//!
//! Segment semantics:
//!
//! - `SetValue` jumps to a value at a time and holds it.
//! - `LinearRamp` interpolates from the previous event (time and value) to its
//!   value, reaching it exactly at its end time.
//! - `SetTarget` starts an exponential approach toward a target at its start
//!   time, continuing from whatever value the curve had there. It never reaches
//!   the target.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A scheduled change to a parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AutomationEvent {
    SetValue { time: f64, value: f64 },
    LinearRamp { end_time: f64, value: f64 },
    SetTarget { start_time: f64, target: f64, time_constant: f64 },
}

impl AutomationEvent {
    /// The time the event is ordered by (a ramp is ordered by its end).
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } => time,
            AutomationEvent::LinearRamp { end_time, .. } => end_time,
            AutomationEvent::SetTarget { start_time, .. } => start_time,
        }
    }
}

/// Operation sent to a parameter, either to the render path or the control mirror
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationOp {
    Schedule(AutomationEvent),
    /// Drop every event ordered at or after the given time
    CancelFrom(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Hold,
    Approach { target: f64, time_constant: f64 },
}

/// State the curve is in after all events up to `time` have been applied
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    time: f64,
    value: f64,
    mode: Mode,
}

impl Anchor {
    fn value_at(&self, t: f64) -> f64 {
        match self.mode {
            Mode::Hold => self.value,
            Mode::Approach {
                target,
                time_constant,
            } => {
                let elapsed = (t - self.time).max(0.0);
                target + (self.value - target) * (-elapsed / time_constant).exp()
            }
        }
    }

    /// Apply an event whose ordering time is `<= t`.
    fn apply(&mut self, event: &AutomationEvent) {
        match *event {
            AutomationEvent::SetValue { time, value } => {
                *self = Anchor {
                    time,
                    value,
                    mode: Mode::Hold,
                };
            }
            AutomationEvent::LinearRamp { end_time, value } => {
                *self = Anchor {
                    time: end_time.max(self.time),
                    value,
                    mode: Mode::Hold,
                };
            }
            AutomationEvent::SetTarget {
                start_time,
                target,
                time_constant,
            } => {
                let start_time = start_time.max(self.time);
                let (value, mode) = if time_constant > 0.0 {
                    (
                        self.value_at(start_time),
                        Mode::Approach {
                            target,
                            time_constant,
                        },
                    )
                } else {
                    (target, Mode::Hold)
                };
                *self = Anchor {
                    time: start_time,
                    value,
                    mode,
                };
            }
        }
    }
}

/// An automatable parameter: intrinsic value timeline plus a legal range
#[derive(Debug, Clone)]
pub struct AudioParam {
    anchor: Anchor,
    events: VecDeque<AutomationEvent>,
    min: f64,
    max: f64,
}

impl AudioParam {
    pub fn new(default: f64, min: f64, max: f64) -> Self {
        Self {
            anchor: Anchor {
                time: 0.0,
                value: default.clamp(min, max),
                mode: Mode::Hold,
            },
            events: VecDeque::new(),
            min,
            max,
        }
    }

    pub fn apply(&mut self, op: AutomationOp) {
        match op {
            AutomationOp::Schedule(event) => self.schedule(event),
            AutomationOp::CancelFrom(time) => self.cancel_from(time),
        }
    }

    /// Insert an event, keeping events ordered; equal times keep insertion order.
    pub fn schedule(&mut self, event: AutomationEvent) {
        let time = event.time();
        if !time.is_finite() {
            return;
        }
        let index = self
            .events
            .iter()
            .position(|e| e.time() > time)
            .unwrap_or(self.events.len());
        self.events.insert(index, event);
    }

    pub fn cancel_from(&mut self, time: f64) {
        self.events.retain(|e| e.time() < time);
    }

    /// Fold every event that has fully elapsed at `now` into the anchor.
    ///
    /// Evaluation results are identical before and after; this only bounds the
    /// event list.
    pub fn advance(&mut self, now: f64) {
        while let Some(event) = self.events.front() {
            if event.time() > now {
                break;
            }
            self.anchor.apply(event);
            self.events.pop_front();
        }
    }

    /// Evaluate the curve at `t`, clamped to the legal range.
    pub fn value_at(&self, t: f64) -> f64 {
        let mut anchor = self.anchor;
        for event in &self.events {
            if event.time() <= t {
                anchor.apply(event);
                continue;
            }
            if let AutomationEvent::LinearRamp { end_time, value } = *event {
                // Ramp in progress: starts where the previous event left off
                let span = end_time - anchor.time;
                let start = anchor.value;
                let raw = if span <= 0.0 {
                    value
                } else {
                    start + (value - start) * ((t - anchor.time) / span).clamp(0.0, 1.0)
                };
                return raw.clamp(self.min, self.max);
            }
            break;
        }
        anchor.value_at(t).clamp(self.min, self.max)
    }

    /// Number of events not yet folded into the anchor
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}
