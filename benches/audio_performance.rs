//! Audio Performance Benchmarks
//!
//! Validates that the instrument graph renders inside the real-time budget at
//! common sample rates and buffer sizes. The time budget per buffer is:
//!
//! ```text
//! time_budget = buffer_size / sample_rate
//! ```
//!
//! | Sample Rate | Buffer 64  | Buffer 128 | Buffer 256 | Buffer 512 |
//! |-------------|------------|------------|------------|------------|
//! | 44.1 kHz    | 1.45 ms    | 2.90 ms    | 5.80 ms    | 11.61 ms   |
//! | 48 kHz      | 1.33 ms    | 2.67 ms    | 5.33 ms    | 10.67 ms   |
//! | 96 kHz      | 0.67 ms    | 1.33 ms    | 2.67 ms    | 5.33 ms    |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use heliosonic::prelude::*;
use heliosonic::{arp, patch, render, wav};

// ============================================================================
// Constants
// ============================================================================

const SAMPLE_RATES: [f64; 3] = [44100.0, 48000.0, 96000.0];
const BUFFER_SIZES: [usize; 4] = [64, 128, 256, 512];

// ============================================================================
// Helper Functions
// ============================================================================

/// The full instrument with audible pads, ready to render
fn instrument(sample_rate: f64) -> (Controller, GraphRenderer, VoicePool) {
    let params = SynthParams::default();
    let (patch, nodes) = patch::build(sample_rate, &params, None).unwrap();
    let (mut ctl, renderer) = render::split(patch, 4096);
    let pool = VoicePool::new(&nodes, params.base_pitches().unwrap());
    arp::settle(&pool, &mut ctl, &params.adsr, params.color_intensity, 0.0);
    (ctl, renderer, pool)
}

fn sr_name(sample_rate: f64) -> String {
    format!("{}kHz", sample_rate as u32 / 1000)
}

// ============================================================================
// Individual Module Benchmarks
// ============================================================================

fn bench_oscillator(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/oscillator");

    for waveform in [Waveform::Sine, Waveform::Sawtooth] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("tick", format!("{:?}", waveform)),
            &waveform,
            |b, &wf| {
                let mut osc = Oscillator::new(48000.0, wf);
                let params = [220.0];
                let inputs = PortValues::new();
                let mut outputs = PortValues::new();

                b.iter(|| {
                    osc.tick(black_box(&params), &inputs, &mut outputs);
                    outputs.get(10).unwrap_or(0.0)
                });
            },
        );
    }

    group.finish();
}

fn bench_lowpass(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/lowpass");

    for sample_rate in SAMPLE_RATES {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("tick", sr_name(sample_rate)),
            &sample_rate,
            |b, &sr| {
                let mut filter = Lowpass::new(sr);
                let params = [1200.0, 4.0];
                let mut inputs = PortValues::new();
                inputs.set(0, 0.5);
                inputs.set(1, -0.5);
                inputs.set(2, 40.0);
                let mut outputs = PortValues::new();

                b.iter(|| {
                    filter.tick(black_box(&params), &inputs, &mut outputs);
                    outputs.get(10).unwrap_or(0.0)
                });
            },
        );
    }

    group.finish();
}

fn bench_reverb(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/reverb");

    for sample_rate in SAMPLE_RATES {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("tick", sr_name(sample_rate)),
            &sample_rate,
            |b, &sr| {
                let mut reverb = Reverb::new(sr);
                let params = [4.0];
                let mut inputs = PortValues::new();
                inputs.set(0, 0.3);
                inputs.set(1, 0.3);
                let mut outputs = PortValues::new();

                b.iter(|| {
                    reverb.tick(black_box(&params), &inputs, &mut outputs);
                    outputs.get(10).unwrap_or(0.0)
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Instrument Benchmarks
// ============================================================================

fn bench_instrument_buffers(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/buffer");

    for sample_rate in SAMPLE_RATES {
        for buffer_size in BUFFER_SIZES {
            group.throughput(Throughput::Elements(buffer_size as u64));
            group.bench_with_input(
                BenchmarkId::new(sr_name(sample_rate), buffer_size),
                &buffer_size,
                |b, &size| {
                    let (_ctl, mut renderer, _pool) = instrument(sample_rate);
                    let mut buf = vec![0.0f32; size * 2];

                    b.iter(|| {
                        renderer.process(black_box(&mut buf), 2);
                        buf[0]
                    });
                },
            );
        }
    }

    group.finish();
}

/// One second of audio per iteration; must stay well under one second
fn bench_realtime_compliance(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/realtime");
    group.sample_size(20);

    for sample_rate in [44100.0, 48000.0] {
        group.throughput(Throughput::Elements(sample_rate as u64));
        group.bench_function(BenchmarkId::new("one_second", sr_name(sample_rate)), |b| {
            let (_ctl, mut renderer, _pool) = instrument(sample_rate);
            let mut buf = vec![0.0f32; 128 * 2];
            let blocks = sample_rate as usize / 128;

            b.iter(|| {
                for _ in 0..blocks {
                    renderer.process(&mut buf, 2);
                }
                black_box(buf[0])
            });
        });
    }

    group.finish();
}

/// Control-side cost of an arpeggiator firing plus the render block that
/// applies it
fn bench_arp_firing(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/arp");

    group.bench_function("plan_perform_render", |b| {
        let (mut ctl, mut renderer, pool) = instrument(48000.0);
        let adsr = Adsr::default();
        let mut rng = Rng::from_seed(7);
        let mut buf = vec![0.0f32; 128 * 2];

        b.iter(|| {
            let firing = arp::plan_firing(&mut rng, &adsr, 0.3, 3000.0);
            let now = ctl.now();
            arp::perform(&firing, &pool, &mut ctl, now);
            renderer.process(&mut buf, 2);
            black_box(buf[0])
        });
    });

    group.finish();
}

fn bench_patch_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument/build");

    group.bench_function("build_and_compile", |b| {
        let params = SynthParams::default();
        b.iter(|| patch::build(black_box(48000.0), &params, None).unwrap());
    });

    group.finish();
}

// ============================================================================
// Capture Benchmarks
// ============================================================================

fn bench_wav_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("capture/wav");

    for seconds in [1usize, 10] {
        let frames = 48000 * seconds;
        let channels: Vec<Vec<f32>> = (0..2)
            .map(|ch| {
                (0..frames)
                    .map(|i| ((i + ch) as f32 * 0.01).sin() * 0.8)
                    .collect()
            })
            .collect();

        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(
            BenchmarkId::new("encode", format!("{}s", seconds)),
            &channels,
            |b, channels| b.iter(|| wav::encode(black_box(channels), 48000).unwrap()),
        );
    }

    group.finish();
}

criterion_group!(module_benches, bench_oscillator, bench_lowpass, bench_reverb,);

criterion_group!(
    instrument_benches,
    bench_instrument_buffers,
    bench_realtime_compliance,
    bench_arp_firing,
    bench_patch_build,
);

criterion_group!(capture_benches, bench_wav_encode,);

criterion_main!(module_benches, instrument_benches, capture_benches);
