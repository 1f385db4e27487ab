//! Null test: renders a WAV file through an engine with an empty module
//! chain and reports how far the latency-compensated output is from the
//! input.
//!
//! Usage: `wola_validate <input.wav> [config.json] [output.wav]`

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use spectral_wola::{EngineConfig, Processor};
use std::path::PathBuf;

const BLOCK_SIZE: usize = 512;

fn read_channels(path: &PathBuf) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        (SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (format, bits) => bail!("unsupported WAV format {:?}/{} bits", format, bits),
    };
    let channels = spec.channels as usize;
    let frames = interleaved.len() / channels;
    let mut split = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (lane, sample) in split.iter_mut().zip(frame) {
            lane.push(*sample);
        }
    }
    Ok((spec, split))
}

fn error_db(expected: &[f32], actual: &[f32]) -> f64 {
    let mut signal = 0.0f64;
    let mut error = 0.0f64;
    for (x, y) in expected.iter().zip(actual) {
        signal += (*x as f64).powi(2);
        error += (*x as f64 - *y as f64).powi(2);
    }
    if signal == 0.0 {
        return f64::NEG_INFINITY;
    }
    10.0 * (error / signal).log10()
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        bail!("usage: wola_validate <input.wav> [config.json] [output.wav]");
    };
    let config_path = args.next().map(PathBuf::from);
    let output_path = args.next().map(PathBuf::from);

    let (spec, channels) = read_channels(&input)?;
    let mut config = match &config_path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config '{}'", path.display()))?;
            EngineConfig::from_json(&json)
                .with_context(|| format!("invalid config '{}'", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.channels = spec.channels as u8;
    config.side_channels = 0;
    config.sample_rate = spec.sample_rate;

    let processor = Processor::new();
    processor
        .initialise(&config)
        .context("engine rejected the configuration")?;
    let latency = processor.latency_in_samples();

    let frames = channels.first().map_or(0, Vec::len);
    let mut rendered = vec![vec![0.0f32; frames]; channels.len()];
    let mut start = 0;
    while start < frames {
        let n = BLOCK_SIZE.min(frames - start);
        let inputs: Vec<&[f32]> = channels.iter().map(|c| &c[start..start + n]).collect();
        let mut outputs: Vec<&mut [f32]> = rendered
            .iter_mut()
            .map(|c| &mut c[start..start + n])
            .collect();
        processor.process(&inputs, &[], &mut outputs, n, 1.0, 1.0);
        start += n;
    }

    println!("Null test for '{}':", input.display());
    println!(
        "  fft {} / overlap {} / window x{} / {}",
        config.fft_size,
        config.overlap_factor,
        config.window_size_factor,
        config.window_function.name()
    );
    println!("  latency          : {} samples", latency);
    if frames <= latency {
        bail!("input is shorter than the engine latency");
    }
    for (index, (dry, wet)) in channels.iter().zip(&rendered).enumerate() {
        let db = error_db(&dry[..frames - latency], &wet[latency..]);
        println!("  channel {:<8} : {:.2} dB", index, db);
    }

    if let Some(path) = output_path {
        let out_spec = WavSpec {
            sample_format: SampleFormat::Float,
            bits_per_sample: 32,
            ..spec
        };
        let mut writer = WavWriter::create(&path, out_spec)
            .with_context(|| format!("failed to create '{}'", path.display()))?;
        for frame in 0..frames {
            for lane in &rendered {
                writer.write_sample(lane[frame])?;
            }
        }
        writer.finalize()?;
    }
    Ok(())
}
