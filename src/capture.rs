//! Capture & Encode
//!
//! The render side owns a [`CaptureSink`] (inside the graph's capture tap, or
//! in the renderer itself when the device can't host a tap). It cuts the
//! master signal into fixed-size planar blocks while armed and ships them over
//! a channel. The control side's [`Recorder`] collects those blocks between
//! `start` and `stop` and encodes them into an immutable [`Take`].

use crate::error::EngineError;
use crate::wav;
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fixed-size block of planar samples, one `Vec` per channel
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBlock {
    pub channels: Vec<Vec<f32>>,
}

impl CaptureBlock {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// How the master signal reaches the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// A tap node inside the graph
    GraphTap,
    /// The renderer copies its output blocks (degraded mode)
    BlockCallback,
}

/// Render-side end of the capture link
pub struct CaptureSink {
    armed: Arc<AtomicBool>,
    tx: Sender<CaptureBlock>,
    block_frames: usize,
    pending: Vec<Vec<f32>>,
}

impl CaptureSink {
    /// Append one frame. Frames arriving while disarmed are dropped along with
    /// any partly filled block.
    pub fn push_frame(&mut self, frame: &[f32]) {
        if !self.armed.load(Ordering::Acquire) {
            if self.pending.iter().any(|c| !c.is_empty()) {
                self.pending.iter_mut().for_each(Vec::clear);
            }
            return;
        }
        for (channel, &sample) in self.pending.iter_mut().zip(frame) {
            channel.push(sample);
        }
        if self.pending[0].len() >= self.block_frames {
            let channels = self
                .pending
                .iter_mut()
                .map(|c| std::mem::replace(c, Vec::with_capacity(self.block_frames)))
                .collect();
            // Receiver gone means the recorder was dropped; nothing to do
            let _ = self.tx.try_send(CaptureBlock { channels });
        }
    }

    pub fn channels(&self) -> usize {
        self.pending.len()
    }
}

/// Control-side end of the capture link
struct CaptureSource {
    armed: Arc<AtomicBool>,
    rx: Receiver<CaptureBlock>,
    mode: CaptureMode,
}

/// Create a connected sink/source pair
fn link(block_frames: usize, channels: usize, mode: CaptureMode) -> (CaptureSink, CaptureSource) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let armed = Arc::new(AtomicBool::new(false));
    let block_frames = block_frames.max(1);
    let sink = CaptureSink {
        armed: armed.clone(),
        tx,
        block_frames,
        pending: (0..channels.max(1))
            .map(|_| Vec::with_capacity(block_frames))
            .collect(),
    };
    (sink, CaptureSource { armed, rx, mode })
}

/// An encoded recording
#[derive(Debug, Clone, PartialEq)]
pub struct Take {
    id: u64,
    name: String,
    wav: Vec<u8>,
    duration_secs: f64,
}

impl Take {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name, derived from the capture timestamp
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Complete WAV file contents
    pub fn wav_bytes(&self) -> &[u8] {
        &self.wav
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Write the take to `<dir>/<name>.wav`
    pub fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, EngineError> {
        let path = dir.as_ref().join(format!("{}.wav", self.name));
        std::fs::write(&path, &self.wav)?;
        info!(path = %path.display(), "saved take");
        Ok(path)
    }
}

/// Collects captured blocks between `start` and `stop`
pub struct Recorder {
    source: Option<CaptureSource>,
    block_frames: usize,
    sample_rate: u32,
    recording: bool,
    blocks: Vec<CaptureBlock>,
    started_at: Option<DateTime<Local>>,
    next_id: u64,
}

impl Recorder {
    pub fn new(block_frames: usize) -> Self {
        Self {
            source: None,
            block_frames,
            sample_rate: 44100,
            recording: false,
            blocks: Vec::new(),
            started_at: None,
            next_id: 1,
        }
    }

    /// Set up the capture link for a freshly built graph.
    ///
    /// Returns the sink the render side must own. Calling it again while a link
    /// exists does nothing and returns `None`.
    pub fn init(&mut self, sample_rate: f64, channels: usize, mode: CaptureMode) -> Option<CaptureSink> {
        if self.source.is_some() {
            return None;
        }
        if mode == CaptureMode::BlockCallback {
            warn!("graph tap unavailable; capturing from output blocks instead");
        }
        let (sink, source) = link(self.block_frames, channels, mode);
        self.source = Some(source);
        self.sample_rate = sample_rate.round() as u32;
        debug!(?mode, sample_rate, "capture link ready");
        Some(sink)
    }

    /// Drop the link; the graph that owned the sink is gone
    pub fn detach(&mut self) {
        if self.recording {
            warn!("capture link detached while recording; discarding partial take");
        }
        self.source = None;
        self.recording = false;
        self.started_at = None;
        self.blocks.clear();
    }

    pub fn is_ready(&self) -> bool {
        self.source.is_some()
    }

    pub fn mode(&self) -> Option<CaptureMode> {
        self.source.as_ref().map(|s| s.mode)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Wall-clock time the current take began
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Begin a take. Anything captured before this call is discarded.
    pub fn start(&mut self) -> bool {
        let Some(source) = &self.source else {
            warn!("start_recording without a running graph");
            return false;
        };
        while source.rx.try_recv().is_ok() {}
        self.blocks.clear();
        self.recording = true;
        self.started_at = Some(Local::now());
        source.armed.store(true, Ordering::Release);
        info!("recording started");
        true
    }

    /// Move delivered blocks into the take, or drop them when not recording
    pub fn collect(&mut self) {
        let Some(source) = &self.source else {
            return;
        };
        loop {
            match source.rx.try_recv() {
                Ok(block) if self.recording => self.blocks.push(block),
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Finish the take. `None` if not recording or nothing was captured.
    pub fn stop(&mut self) -> Option<Take> {
        if !self.recording {
            return None;
        }
        if let Some(source) = &self.source {
            source.armed.store(false, Ordering::Release);
        }
        self.collect();
        self.recording = false;

        let blocks = std::mem::take(&mut self.blocks);
        let started_at = self.started_at.take().unwrap_or_else(Local::now);
        if blocks.is_empty() {
            info!("recording stopped with no captured audio");
            return None;
        }
        let take = match self.encode(&blocks, started_at) {
            Ok(take) => take,
            Err(e) => {
                warn!(error = %e, "failed to encode take");
                return None;
            }
        };
        info!(
            id = take.id,
            name = %take.name,
            duration_secs = take.duration_secs,
            "take captured"
        );
        Some(take)
    }

    fn encode(
        &mut self,
        blocks: &[CaptureBlock],
        started_at: DateTime<Local>,
    ) -> Result<Take, EngineError> {
        let channel_count = blocks.first().map_or(2, CaptureBlock::channel_count);
        let total_frames: usize = blocks.iter().map(CaptureBlock::frames).sum();

        let mut merged: Vec<Vec<f32>> = (0..channel_count)
            .map(|_| Vec::with_capacity(total_frames))
            .collect();
        for block in blocks {
            for (ch, out) in merged.iter_mut().enumerate() {
                match block.channels.get(ch) {
                    Some(samples) => out.extend_from_slice(samples),
                    None => out.resize(out.len() + block.frames(), 0.0),
                }
            }
        }

        let wav = wav::encode(&merged, self.sample_rate)?;
        let id = self.next_id;
        self.next_id += 1;
        Ok(Take {
            id,
            name: take_name(started_at),
            wav,
            duration_secs: total_frames as f64 / self.sample_rate.max(1) as f64,
        })
    }
}

fn take_name(started_at: DateTime<Local>) -> String {
    format!("heliosonic-{}", started_at.format("%Y-%m-%d_%H-%M-%S"))
}
