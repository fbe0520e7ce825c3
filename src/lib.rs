//! # Heliosonic: Telemetry-Driven Ambient Synthesis
//!
//! `heliosonic` is a small ambient instrument whose timbre is steered by live
//! space-weather readings. A fixed audio graph of five voices (a four-note
//! chord plus a color voice) runs through a modulated lowpass, a feedback
//! delay, a reverb and a limiter. A stochastic arpeggiator strikes the voices,
//! telemetry samples nudge the effect parameters, and the master signal can be
//! captured into WAV takes.
//!
//! ## Architecture
//!
//! The library is organized in three layers:
//!
//! - **Render path** - [`Patch`] graph of [`GraphModule`]s evaluated per
//!   sample, with [`AudioParam`] automation timelines on every parameter
//! - **Control path** - [`Controller`] mirror plus a bounded command channel;
//!   voices, arpeggiator and data mapping only ever schedule curves
//! - **Lifecycle** - [`EngineHandle`] owning the device, timers and recorder
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heliosonic::prelude::*;
//!
//! let provider = OfflineProvider::new(48000.0);
//! let audio = provider.handle();
//!
//! let mut engine = EngineHandle::new(EngineConfig::default(), provider);
//! assert!(engine.init_context());
//! engine.start(&SynthParams::default()).unwrap();
//!
//! // Feed telemetry and pull audio
//! engine.apply_data_mapping(StreamKind::WindSpeed, 540.0, 0.5, false);
//! engine.start_recording();
//! let _block = audio.render_seconds(1.0);
//! engine.poll();
//! let _take = engine.stop_recording();
//! ```

pub mod arp;
pub mod automation;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod io;
pub mod mapping;
pub mod modules;
pub mod params;
pub mod patch;
pub mod port;
pub mod render;
pub mod rng;
pub mod scheduler;
pub mod voice;
pub mod wav;

/// Prelude module for convenient imports
pub mod prelude {
    // Port system and graph
    pub use crate::graph::{
        Cable, NodeHandle, NodeId, Patch, PatchError, PortRef, Topology, TopologyEdge,
        TopologyNode,
    };
    pub use crate::port::{
        GraphModule, ModuleSetting, ParamDef, ParamId, ParamRange, PortDef, PortId, PortSpec,
        PortValues, SignalKind,
    };

    // Automation
    pub use crate::automation::{AudioParam, AutomationEvent, AutomationOp};

    // Instrument modules
    pub use crate::modules::{
        CaptureTap, Delay, Destination, Gain, Lfo, Limiter, Lowpass, Oscillator, Reverb,
        RingBuffer, StereoPanner,
    };

    // Instrument
    pub use crate::arp::{Firing, Strike};
    pub use crate::mapping::{Ema, MappingResult, MappingTarget, StreamKind};
    pub use crate::params::{
        Adsr, DelayConfig, FilterConfig, ReverbConfig, SynthParams, VoiceConfig, Waveform,
    };
    pub use crate::patch::InstrumentNodes;
    pub use crate::voice::{Envelope, Voice, VoicePool, VoiceRole};

    // Lifecycle and control
    pub use crate::config::EngineConfig;
    pub use crate::engine::{EngineHandle, EngineState};
    pub use crate::error::EngineError;
    pub use crate::render::{Controller, GraphCommand, GraphRenderer};
    pub use crate::rng::{RandomSource, Rng, Scripted};
    pub use crate::scheduler::{Clock, ManualClock, Scheduler, SystemClock, TimerToken};

    // Output and capture
    pub use crate::capture::{CaptureMode, Recorder, Take};
    pub use crate::io::{AtomicF64, DeviceProvider, OfflineHandle, OfflineProvider, OutputDevice};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
