//! Command line tool for the RPU feedback protocol.
//!
//! Subcommands:
//! - `run`: program a simulated RPU from a config file and monitor the loop
//! - `scale`: compute the scale register for a window and pixel length
//! - `encode` / `decode`: convert between typed fields and raw register values
//! - `registers`: print the register map

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use feedback::{
    CrossCheck, FeedbackConfig, FeedbackReader, FeedbackStatus, ParameterStore, PixelBatch,
    PixelStreamAggregator, RegisterBank, SharedDevice, SimConfig, SimulatedRpu,
};
use rpu_proto::{
    compute_scale, encode_float_pair, encode_uint_pair, to_wire_bytes, Encoding, Register,
    RegisterIndex, ScaleParam, ACCUMULATOR_MAX,
};
use strum::IntoEnumIterator;
use tracing::{info, warn};

/// Host and RPU amplitudes further apart than this are reported
const CROSS_CHECK_DECADES: f64 = 1.0;

/// RPU feedback register tool
#[derive(Parser, Debug)]
#[command(name = "qafm_sim")]
#[command(about = "Program, simulate and decode the RPU feedback registers")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the feedback loop on a simulated RPU and poll its status
    Run {
        /// JSON session config (defaults are used if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Iterations to run between polls on this thread (free-running thread if omitted)
        #[arg(short, long)]
        iterations: Option<u32>,

        /// Number of status polls before stopping
        #[arg(short, long, default_value = "5")]
        polls: u32,

        /// Delay between simulated loop iterations in microseconds
        #[arg(long, default_value = "100")]
        period_us: u64,

        /// Standard deviation of host-path pixel noise
        #[arg(long, default_value = "0.0")]
        noise: f32,
    },

    /// Compute the scale register value
    Scale {
        /// Sliding window length (NSW)
        #[arg(short, long, default_value = "16")]
        window: u64,

        /// ADC samples per pixel
        #[arg(short, long, default_value = "1000")]
        samples: u64,
    },

    /// Encode two fields into a raw register value
    #[command(allow_negative_numbers = true)]
    Encode {
        /// Register index or name (e.g. 6 or output-limits)
        #[arg(short, long)]
        index: RegisterIndex,

        /// Low (first) field
        low: String,

        /// High (second) field
        high: String,
    },

    /// Decode a raw register value (decimal or 0x-prefixed hex)
    Decode {
        /// Register index or name
        #[arg(short, long)]
        index: RegisterIndex,

        value: String,
    },

    /// Print the register map
    Registers,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            iterations,
            polls,
            period_us,
            noise,
        } => cmd_run(config, iterations, polls, period_us, noise),
        Command::Scale { window, samples } => cmd_scale(window, samples),
        Command::Encode { index, low, high } => cmd_encode(index, &low, &high),
        Command::Decode { index, value } => cmd_decode(index, &value),
        Command::Registers => cmd_registers(),
    }
}

// ==================== Run Command ====================

fn cmd_run(
    config_path: Option<PathBuf>,
    iterations: Option<u32>,
    polls: u32,
    period_us: u64,
    noise: f32,
) -> Result<()> {
    let config = match &config_path {
        Some(path) => FeedbackConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FeedbackConfig::default(),
    };
    info!("Session config: {:?}", config);

    let device = SharedDevice::new(RegisterBank::new());
    let mut store = ParameterStore::new(device.clone(), config.samples_per_pixel);
    store.configure(&config)?;

    let sim_config = SimConfig {
        samples_per_pixel: config.samples_per_pixel,
        window_length: config.window_length,
        input_channel: config.input_channel,
        noise_std: noise,
        ..Default::default()
    };
    let (tx, rx) = crossbeam_channel::unbounded::<PixelBatch>();
    let mut rpu = SimulatedRpu::new(device.clone(), sim_config)?.with_pixel_sender(tx);
    rpu.start()?;
    store.mark_loop_started();

    let mut reader = FeedbackReader::new(device);
    let mut aggregator = PixelStreamAggregator::new(config.input_channel);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    let mut previous = reader.read_status()?;
    match iterations {
        Some(n) => {
            for _ in 0..polls {
                rpu.run_for(n)?;
                previous = poll(&mut reader, &mut aggregator, &rx, &previous)?;
            }
        }
        None => {
            let stop = Arc::new(AtomicBool::new(false));
            let handle = rpu.spawn(Duration::from_micros(period_us), Arc::clone(&stop));
            for _ in 0..polls {
                thread::sleep(poll_interval);
                previous = poll(&mut reader, &mut aggregator, &rx, &previous)?;
            }
            stop.store(true, Ordering::Relaxed);
            match handle.join() {
                Ok(result) => {
                    result?;
                }
                Err(_) => bail!("Simulated RPU thread panicked"),
            }
        }
    }

    let pid = reader.read_pid()?;
    info!(
        "Final: iterations={}, bias={:.4}, amp2={:e}, pid={:?}",
        previous.iterations, previous.control_bias, previous.amplitude_squared, pid
    );
    Ok(())
}

fn poll(
    reader: &mut FeedbackReader<SharedDevice<RegisterBank>>,
    aggregator: &mut PixelStreamAggregator,
    pixels: &crossbeam_channel::Receiver<PixelBatch>,
    previous: &FeedbackStatus,
) -> Result<FeedbackStatus> {
    let status = reader.read_status()?;
    let rate = status
        .iteration_rate_hz(previous)
        .map(|hz| format!("{:.1} kHz", hz / 1e3))
        .unwrap_or_else(|| "n/a".to_string());

    info!(
        "iterations={} (+{}), rate={}, amp2={:e}, bias={:.4}",
        status.iterations,
        status.iterations_since(previous),
        rate,
        status.amplitude_squared,
        status.control_bias
    );

    if let Some(batch) = PixelStreamAggregator::latest(pixels) {
        let host = aggregator.process(&batch)?;
        let check = CrossCheck::new(host, status.amplitude_squared);
        match check.decades_apart() {
            Some(d) if d <= CROSS_CHECK_DECADES => {
                info!("host amp2={:e} (pixel {}), {:.2} decades from RPU", host, batch.sequence, d)
            }
            Some(d) => warn!("host amp2={:e} is {:.2} decades from RPU amp2", host, d),
            None => warn!(
                "host amp2={:e} and RPU amp2={:e} cannot be compared",
                host, status.amplitude_squared
            ),
        }
    }
    Ok(status)
}

// ==================== Register Commands ====================

fn cmd_scale(window: u64, samples: u64) -> Result<()> {
    let scale = compute_scale(ACCUMULATOR_MAX, samples, window)?;
    let reg = ScaleParam {
        scale: scale as f32,
    };
    let raw = reg.encode();

    println!("scale (f64): {:e}", scale);
    println!("scale (f32): {:e}", reg.scale);
    println!("register {}: {:#018x}", ScaleParam::INDEX.index(), raw);
    println!("wire bytes: {:02x?}", to_wire_bytes(raw));
    Ok(())
}

fn cmd_encode(index: RegisterIndex, low: &str, high: &str) -> Result<()> {
    let raw = encode_fields(index, low, high)?;
    println!("{:#018x}", raw);
    println!("{}", index.describe(raw));
    Ok(())
}

fn cmd_decode(index: RegisterIndex, value: &str) -> Result<()> {
    let raw = parse_register_value(value)?;
    println!("{}", index.describe(raw));
    println!("wire bytes: {:02x?}", to_wire_bytes(raw));
    Ok(())
}

/// Parse two fields with the register's encoding and pack them.
fn encode_fields(index: RegisterIndex, low: &str, high: &str) -> Result<u64> {
    let raw = match index.encoding() {
        Encoding::UintPair => encode_uint_pair(
            low.parse().with_context(|| format!("Invalid u32: {low}"))?,
            high.parse().with_context(|| format!("Invalid u32: {high}"))?,
        ),
        Encoding::FloatPair => encode_float_pair(
            low.parse().with_context(|| format!("Invalid f32: {low}"))?,
            high.parse().with_context(|| format!("Invalid f32: {high}"))?,
        ),
    };
    Ok(raw)
}

/// Raw register value, decimal or `0x`-prefixed hex.
fn parse_register_value(value: &str) -> Result<u64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.parse(),
    }
    .with_context(|| format!("Invalid register value: {value}"))
}

fn cmd_registers() -> Result<()> {
    println!("{:<6} {:<24} {:<6} {:<11} fields", "index", "name", "writer", "encoding");
    for reg in RegisterIndex::iter() {
        let (low, high) = reg.field_names();
        println!(
            "{:<6} {:<24} {:<6} {:<11} ({low}, {high})",
            reg.index(),
            reg.to_string(),
            reg.writer().to_string(),
            reg.encoding().to_string()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpu_proto::{decode_float_pair, decode_uint_pair};

    #[test]
    fn test_parse_register_value_hex_and_decimal() {
        assert_eq!(parse_register_value("0x3F800000").unwrap(), 0x3F80_0000);
        assert_eq!(parse_register_value("0X10").unwrap(), 16);
        assert_eq!(parse_register_value("0x3f80_0000").unwrap(), 0x3F80_0000);
        assert_eq!(parse_register_value(" 1065353216 ").unwrap(), 0x3F80_0000);
        assert_eq!(parse_register_value("18446744073709551615").unwrap(), u64::MAX);
    }

    #[test]
    fn test_parse_register_value_rejects_garbage() {
        for bad in ["", "0x", "0xZZ", "-1", "1.5", "18446744073709551616"] {
            assert!(parse_register_value(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_encode_fields_follows_register_encoding() {
        let raw = encode_fields(RegisterIndex::IterationStatus, "7", "4294967295").unwrap();
        assert_eq!(decode_uint_pair(raw), (7, u32::MAX));

        let raw = encode_fields(RegisterIndex::OutputLimits, "-0.5", "1.5").unwrap();
        assert_eq!(decode_float_pair(raw), (-0.5, 1.5));
    }

    #[test]
    fn test_encode_fields_rejects_wrong_kind() {
        // iteration status holds integers only
        assert!(encode_fields(RegisterIndex::IterationStatus, "0.5", "1").is_err());
        assert!(encode_fields(RegisterIndex::IterationStatus, "-1", "1").is_err());
        assert!(encode_fields(RegisterIndex::Scale, "abc", "0").is_err());
    }
}
