//! SigProbe command-line tool
//!
//! Lists attached devices, runs pattern benchmarks, and records captures.

use std::{path::PathBuf, process::ExitCode, time::Duration, time::Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sigprobe_host::{
    usb::{self, UsbTransport},
    Device, IntegrityError,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sigprobe-host")]
#[command(author, version, about = "Drive SigProbe signal acquisition devices")]
struct Args {
    /// Serial number of the device to use
    #[arg(short, long, global = true, value_name = "SERIAL")]
    serial: Option<String>,

    /// Control and bulk transfer timeout, in milliseconds
    #[arg(short, long, global = true, value_name = "MS")]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List,
    /// Stream a pattern session and verify every byte
    Benchmark {
        /// Bytes to request
        #[arg(default_value_t = 256 * 1024)]
        bytes: u32,
    },
    /// Record the input pin
    Sample {
        /// Samples to request
        samples: u32,
        /// File that receives the packed samples
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
}

fn setup_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    Ok(())
}

/// Exit code of a benchmark that received corrupted data
const INTEGRITY_FAILURE: u8 = 2;

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    match args.command {
        Command::List => list()?,
        Command::Benchmark { bytes } => {
            let mut device = connect(&args.serial, args.timeout)?;
            let start = Instant::now();
            let report = device.benchmark(bytes).context("Benchmark failed")?;
            let elapsed = start.elapsed();
            println!(
                "Received {} of {} bytes in {:.3} s ({:.1} KiB/s)",
                report.received,
                report.honored,
                elapsed.as_secs_f64(),
                report.received as f64 / 1024.0 / elapsed.as_secs_f64().max(f64::EPSILON),
            );
            if let Some(err) = report.stream_error {
                println!("Transfer ended early: {err}");
            }
            return Ok(ExitCode::from(integrity_exit_code(report.integrity)));
        }
        Command::Sample { samples, output } => {
            let mut device = connect(&args.serial, args.timeout)?;
            let capture = device.sample(samples).context("Capture failed")?;
            std::fs::write(&output, &capture.data)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!(
                "Recorded {} samples ({} bytes) to {}",
                capture.sample_count,
                capture.data.len(),
                output.display()
            );
            if let Some(err) = capture.stream_error {
                println!("Transfer ended early: {err}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print the integrity check result, and return the process exit code
///
/// Corrupted data isn't an error; the benchmark still completed.
fn integrity_exit_code(integrity: std::result::Result<(), IntegrityError>) -> u8 {
    match integrity {
        Ok(()) => {
            println!("Data integrity check passed");
            0
        }
        Err(err) => {
            println!("{err}");
            INTEGRITY_FAILURE
        }
    }
}

/// Open a device, and open its session
fn connect(serial: &Option<String>, timeout: Option<u64>) -> Result<Device<UsbTransport>> {
    let mut device = usb::open(serial.as_deref()).context("Failed to open device")?;
    if let Some(timeout) = timeout {
        device.set_timeout(Duration::from_millis(timeout));
    }
    device.open().context("Failed to open session")?;
    Ok(device)
}

fn list() -> Result<()> {
    let context = rusb::Context::new().context("Failed to initialize libusb")?;
    let devices = usb::list(&context).context("Failed to list devices")?;

    if devices.is_empty() {
        println!("No SigProbe devices found.");
        return Ok(());
    }
    println!("Found {} SigProbe device(s):\n", devices.len());
    for (_, info) in devices {
        println!(
            "  {} - {} {}",
            info.bus_address(),
            info.manufacturer.as_deref().unwrap_or("Unknown Manufacturer"),
            info.product.as_deref().unwrap_or("Unknown Product"),
        );
        if let Some(serial) = &info.serial_number {
            println!("      Serial: {serial}");
        }
    }
    Ok(())
}
