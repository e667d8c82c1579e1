//!
//! This binary provides a CLI for inspecting and reconstructing PicoQuant
//! TTTR FLIM files.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};

use flimpix_core::{CancelToken, Channel, FrameBinning, LoadOptions, RecordFormat};
use flimpix_io::TttrFile;
use flimpix_tttr::{estimate_scan_geometry, LifetimeStack};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    FlimpixIo(#[from] flimpix_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] flimpix_core::Error),

    #[error("Decode error: {0}")]
    Record(#[from] flimpix_tttr::Error),
}

/// FLIM image reconstruction from PicoQuant TTTR files.
#[derive(Parser)]
#[command(name = "flimpix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct intensity and lifetime images from a PTU/PT3 file
    Process {
        /// Input PTU or PT3 file
        input: PathBuf,

        /// Skip the intensity and average-lifetime images
        #[arg(long)]
        no_intensity: bool,

        /// Build the lifetime-ordered photon stack
        #[arg(long)]
        stack: bool,

        /// Bin every N frames into one output slice instead of joining all
        #[arg(long, value_name = "N")]
        bin_frames: Option<u32>,

        /// First frame to load (1-based)
        #[arg(long)]
        frame_min: Option<u32>,

        /// Last frame to load (1-based)
        #[arg(long)]
        frame_max: Option<u32>,

        /// Skip the IRF time-zero estimate and correction
        #[arg(long)]
        no_irf_zero: bool,

        /// Floor negative IRF-corrected lifetimes at zero
        #[arg(long)]
        clamp_negative: bool,
    },

    /// Show header information about a PTU/PT3 file
    Info {
        /// Input PTU or PT3 file
        input: PathBuf,

        /// Emit machine-readable JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also print the full header metadata blob
        #[arg(long)]
        full: bool,
    },
}

fn format_name(format: RecordFormat) -> &'static str {
    match format {
        RecordFormat::PicoHarpT3 => "PicoHarp T3",
        RecordFormat::GenericT3 { version: 1 } => "HydraHarp V1 T3",
        RecordFormat::GenericT3 { .. } => "HydraHarp/TimeHarp/MultiHarp T3",
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Process {
            input,
            no_intensity,
            stack,
            bin_frames,
            frame_min,
            frame_max,
            no_irf_zero,
            clamp_negative,
        } => {
            let file = TttrFile::open(&input)?;
            println!("File: {}", input.display());
            println!("Format: {}", format_name(file.config().record_format));
            println!(
                "Image: {} x {} px, {} records",
                file.config().width,
                file.config().height,
                file.config().record_count
            );

            let frame_range = match (frame_min, frame_max) {
                (None, None) => None,
                (lo, hi) => Some((lo.unwrap_or(1), hi.unwrap_or(u32::MAX))),
            };
            let options = LoadOptions {
                intensity_and_lifetime: !no_intensity,
                lifetime_stack: stack,
                binning: bin_frames.map_or(FrameBinning::JoinFrames, FrameBinning::BinFrames),
                frame_range,
                estimate_irf_zero: !no_irf_zero,
                clamp_negative_lifetime: clamp_negative,
            };

            let start = Instant::now();
            let out = file.reconstruct(&options, &CancelToken::new())?;
            let elapsed = start.elapsed();

            println!(
                "Geometry: {} sync/line, {} lines, {} frames, {} lifetime bins",
                out.geometry.sync_per_line,
                out.geometry.completed_lines,
                out.geometry.total_frames,
                out.geometry.lifetime_bins
            );
            println!(
                "Loaded frames {}..={} into {} bin(s)",
                out.options.frame_min,
                out.options.frame_max,
                out.options.total_bins()
            );

            for channel in Channel::ALL {
                let Some(output) = &out.channels[channel] else {
                    continue;
                };
                println!("Channel {}:", channel.number());
                if let Some(images) = &output.images {
                    println!("  photons: {}", images.photon_total());
                    match images.irf_time_zero_ns {
                        Some(tzero) => println!("  IRF time zero: {:.4} ns", tzero),
                        None => println!("  IRF time zero: not estimated"),
                    }
                }
                if let Some(stack) = &output.lifetime_stack {
                    let label = match stack {
                        LifetimeStack::Joined(_) => "joined",
                        LifetimeStack::Binned(_) => "binned",
                    };
                    println!("  lifetime stack ({}): {} photons", label, stack.total());
                }
            }

            if out.out_of_range_photons > 0 {
                println!(
                    "Dropped {} photons outside the image",
                    out.out_of_range_photons
                );
            }
            if out.lifetime_stack_disabled {
                println!("Lifetime stack skipped: would not fit in memory");
            }
            println!("Reconstructed in {:.2}s", elapsed.as_secs_f64());
        }

        Commands::Info { input, json, full } => {
            let file = TttrFile::open(&input)?;
            let config = file.config();
            let geometry =
                estimate_scan_geometry(file.records(), config, &CancelToken::new());

            if json {
                let mut value = serde_json::json!({
                    "file": input.display().to_string(),
                    "size_bytes": file.file_size(),
                    "format": format_name(config.record_format),
                    "width": config.width,
                    "height": config.height,
                    "pixel_size_um": config.pixel_size_um,
                    "time_resolution_ns": config.time_resolution_ns,
                    "line_start_marker": config.line_start_marker,
                    "line_stop_marker": config.line_stop_marker,
                    "frame_marker": config.frame_marker,
                    "records": file.record_count(),
                });
                if let Ok(geometry) = &geometry {
                    value["geometry"] =
                        serde_json::to_value(geometry).unwrap_or_default();
                }
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            } else {
                println!("File: {}", input.display());
                println!(
                    "Size: {} bytes ({:.2} MB)",
                    file.file_size(),
                    file.file_size() as f64 / 1_000_000.0
                );
                println!("Format: {}", format_name(config.record_format));
                println!("Image: {} x {} px", config.width, config.height);
                if let Some(cal) = file.calibration() {
                    println!("Pixel size: {} um", cal.pixel_width_um);
                }
                println!("Time resolution: {} ns", config.time_resolution_ns);
                println!(
                    "Markers: line start {}, line stop {}, frame {}",
                    config.line_start_marker,
                    config.line_stop_marker,
                    config
                        .frame_marker
                        .map_or_else(|| "none".to_string(), |m| m.to_string())
                );
                println!("Records: {}", file.record_count());
                match &geometry {
                    Ok(geom) => {
                        println!(
                            "Geometry: {} sync/line, {} lines, {} frames, {} lifetime bins",
                            geom.sync_per_line,
                            geom.completed_lines,
                            geom.total_frames,
                            geom.lifetime_bins
                        );
                        let channels: Vec<u8> = geom
                            .channels_present
                            .iter()
                            .filter(|(_, &p)| p)
                            .map(|(ch, _)| ch.number())
                            .collect();
                        println!("Channels with photons: {:?}", channels);
                    }
                    Err(err) => println!("Geometry: unavailable ({err})"),
                }
                if full {
                    println!("--- header ---");
                    print!("{}", file.info());
                }
            }
        }
    }

    Ok(())
}
