//! Output Devices
//!
//! This module bridges the graph renderer with whatever pulls audio out of it:
//! a real sound card (behind the `cpal` feature) or the [`OfflineDevice`], which
//! renders on demand and backs the test suite and offline bounces.

use crate::error::EngineError;
use crate::render::GraphRenderer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Atomic f64 for lock-free communication between threads
///
/// Uses AtomicU64 internally since there's no native AtomicF64.
/// Suitable for real-time audio thread communication.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Create a new atomic f64 with the given initial value
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Get the current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Set a new value
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// An acquired audio output
pub trait OutputDevice {
    fn sample_rate(&self) -> f64;

    /// Interleaved channel count of the device buffers
    fn channels(&self) -> usize {
        2
    }

    /// Whether the graph's capture tap can run alongside this device. When it
    /// can't, capture falls back to copying the renderer's output blocks.
    fn supports_graph_tap(&self) -> bool {
        true
    }

    /// Take ownership of the renderer and start pulling audio from it
    fn resume(&mut self, renderer: GraphRenderer) -> Result<(), EngineError>;

    /// Stop pulling audio and drop the renderer
    fn release(&mut self);
}

/// Opens output devices
pub trait DeviceProvider {
    fn open(&mut self) -> Result<Box<dyn OutputDevice>, EngineError>;
}

type RendererSlot = Arc<Mutex<Option<GraphRenderer>>>;

fn lock(slot: &RendererSlot) -> MutexGuard<'_, Option<GraphRenderer>> {
    // A panic mid-render leaves the renderer usable; keep going
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Device rendered by explicit pulls through an [`OfflineHandle`]
pub struct OfflineDevice {
    sample_rate: f64,
    graph_tap: bool,
    slot: RendererSlot,
}

impl OutputDevice for OfflineDevice {
    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn supports_graph_tap(&self) -> bool {
        self.graph_tap
    }

    fn resume(&mut self, renderer: GraphRenderer) -> Result<(), EngineError> {
        *lock(&self.slot) = Some(renderer);
        debug!(sample_rate = self.sample_rate, "offline device resumed");
        Ok(())
    }

    fn release(&mut self) {
        lock(&self.slot).take();
        debug!("offline device released");
    }
}

/// Pulls audio from whatever renderer the offline device currently holds
#[derive(Clone)]
pub struct OfflineHandle {
    slot: RendererSlot,
    block_size: usize,
    sample_rate: f64,
}

impl OfflineHandle {
    /// Render `frames` stereo frames, interleaved. Silence when nothing is
    /// attached.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        if let Some(renderer) = lock(&self.slot).as_mut() {
            for block in out.chunks_mut(self.block_size * 2) {
                renderer.process(block, 2);
            }
        }
        out
    }

    pub fn render_seconds(&self, seconds: f64) -> Vec<f32> {
        self.render((seconds * self.sample_rate).round() as usize)
    }

    /// True while a started graph is attached
    pub fn is_attached(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

/// Provider of [`OfflineDevice`]s that all feed the same [`OfflineHandle`]
pub struct OfflineProvider {
    sample_rate: f64,
    block_size: usize,
    graph_tap: bool,
    available: Arc<AtomicBool>,
    slot: RendererSlot,
    opened: usize,
}

impl OfflineProvider {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            block_size: 128,
            graph_tap: true,
            available: Arc::new(AtomicBool::new(true)),
            slot: Arc::new(Mutex::new(None)),
            opened: 0,
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Devices from this provider report that they can't host a capture tap
    pub fn without_graph_tap(mut self) -> Self {
        self.graph_tap = false;
        self
    }

    /// Make subsequent `open` calls fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn handle(&self) -> OfflineHandle {
        OfflineHandle {
            slot: self.slot.clone(),
            block_size: self.block_size,
            sample_rate: self.sample_rate,
        }
    }

    /// Number of devices opened so far
    pub fn opened(&self) -> usize {
        self.opened
    }
}

impl DeviceProvider for OfflineProvider {
    fn open(&mut self) -> Result<Box<dyn OutputDevice>, EngineError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::Device("offline device unavailable".into()));
        }
        self.opened += 1;
        Ok(Box::new(OfflineDevice {
            sample_rate: self.sample_rate,
            graph_tap: self.graph_tap,
            slot: self.slot.clone(),
        }))
    }
}

#[cfg(feature = "cpal")]
pub use self::cpal_device::{CpalDevice, CpalProvider};

#[cfg(feature = "cpal")]
mod cpal_device {
    //! Real-time output using cpal (ALSA, CoreAudio, WASAPI, JACK, ...)

    use super::{DeviceProvider, OutputDevice};
    use crate::error::EngineError;
    use crate::render::GraphRenderer;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{error, info};

    fn device_error(e: impl std::fmt::Display) -> EngineError {
        EngineError::Device(e.to_string())
    }

    /// The host's default output device
    pub struct CpalDevice {
        device: cpal::Device,
        config: cpal::StreamConfig,
        stream: Option<cpal::Stream>,
    }

    impl OutputDevice for CpalDevice {
        fn sample_rate(&self) -> f64 {
            self.config.sample_rate.0 as f64
        }

        fn channels(&self) -> usize {
            self.config.channels as usize
        }

        fn resume(&mut self, mut renderer: GraphRenderer) -> Result<(), EngineError> {
            let channels = self.channels();
            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        renderer.process(data, channels);
                    },
                    |err| error!("Audio stream error: {}", err),
                    None,
                )
                .map_err(device_error)?;
            stream.play().map_err(device_error)?;
            info!(
                sample_rate = self.config.sample_rate.0,
                channels, "audio stream started"
            );
            self.stream = Some(stream);
            Ok(())
        }

        fn release(&mut self) {
            if self.stream.take().is_some() {
                info!("audio stream released");
            }
        }
    }

    /// Opens the default output device of the default host
    #[derive(Debug, Default)]
    pub struct CpalProvider;

    impl DeviceProvider for CpalProvider {
        fn open(&mut self) -> Result<Box<dyn OutputDevice>, EngineError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| EngineError::Device("no audio output device found".into()))?;
            let supported = device.default_output_config().map_err(device_error)?;
            if supported.sample_format() != cpal::SampleFormat::F32 {
                return Err(EngineError::Device(format!(
                    "unsupported sample format {:?}",
                    supported.sample_format()
                )));
            }
            info!(host = ?host.id(), "audio device opened");
            Ok(Box::new(CpalDevice {
                device,
                config: supported.into(),
                stream: None,
            }))
        }
    }
}
