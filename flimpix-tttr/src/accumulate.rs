//! Image accumulation (pass 2).
//!
//! The second full pass over the record stream maps every photon to a
//! (channel, pixel, frame-bin, arrival-time) coordinate and accumulates it
//! into the output cubes. Pixel x positions come from the photon's global
//! sync time relative to the open line's start anchor, scaled by the average
//! ticks-per-line from pass 1; the y position is the running line index.

use crate::geometry::{ScanGeometry, CANCEL_CHECK_INTERVAL};
use crate::record::{decode, DecoderState, RecordKind};
use crate::Result;
use flimpix_core::{
    AcquisitionConfig, CancelToken, Channel, Error as CoreError, PerChannel, ResolvedLoadOptions,
};
use ndarray::{Array3, Array4};
use std::mem::size_of;
use sysinfo::System;

/// Headroom applied to the lifetime-stack allocation estimate.
const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;

/// Per-frame-bin photon counts and cumulative arrival-time sums for one
/// channel. Both are `(frame_bins, height, width)`.
#[derive(Debug, Clone)]
pub struct FrameImages {
    /// Photon counts per pixel and frame bin.
    pub intensity: Array3<f32>,
    /// Sum of arrival-time bins per pixel and frame bin; the post-processor
    /// divides this by the intensity to get the average lifetime.
    pub lifetime_sum: Array3<f32>,
}

/// Lifetime-ordered photon counts for one channel.
#[derive(Debug, Clone)]
pub enum LifetimeStack {
    /// All selected frames joined: `(lifetime_bins, height, width)`.
    Joined(Array3<u32>),
    /// Kept per frame bin: `(frame_bins, lifetime_bins, height, width)`.
    Binned(Array4<u32>),
}

impl LifetimeStack {
    /// Total photon count across the stack.
    #[must_use]
    pub fn total(&self) -> u64 {
        match self {
            LifetimeStack::Joined(a) => a.iter().map(|&v| u64::from(v)).sum(),
            LifetimeStack::Binned(a) => a.iter().map(|&v| u64::from(v)).sum(),
        }
    }
}

/// Accumulated outputs for one channel.
#[derive(Debug, Clone)]
pub struct ChannelAccumulation {
    pub frame_images: Option<FrameImages>,
    pub lifetime_stack: Option<LifetimeStack>,
    /// Whole-image arrival-time histogram, length `lifetime_bins`; feeds the
    /// IRF time-zero estimate.
    pub arrival_histogram: Vec<u64>,
}

/// Result of pass 2.
#[derive(Debug)]
pub struct Accumulation {
    pub channels: PerChannel<Option<ChannelAccumulation>>,
    /// Photons whose computed pixel fell outside the image. A nonzero count
    /// means the geometry estimate disagrees with the stream; the data is
    /// kept, the stragglers are dropped.
    pub out_of_range_photons: u64,
    /// Set when the lifetime stack was disabled because it would not fit in
    /// memory; the remaining outputs still complete.
    pub lifetime_stack_disabled: bool,
}

/// Estimated allocation size of the lifetime stacks in bytes.
#[must_use]
pub fn lifetime_stack_bytes(
    geometry: &ScanGeometry,
    config: &AcquisitionConfig,
    options: &ResolvedLoadOptions,
) -> u128 {
    let present = geometry.channels_present.iter().filter(|(_, &p)| p).count() as u128;
    let per_slice = (config.width * config.height * size_of::<u32>()) as u128;
    let slices = geometry.lifetime_bins as u128
        * if options.binned_stack {
            options.total_bins() as u128
        } else {
            1
        };
    present * per_slice * slices
}

/// Whether the lifetime stacks fit into available memory, with headroom.
fn lifetime_stack_fits(bytes: u128) -> bool {
    let mut system = System::new();
    system.refresh_memory();
    let budget = system.available_memory() as f64 / MEMORY_OVERHEAD_FACTOR;
    bytes as f64 <= budget
}

fn new_lifetime_stack(
    geometry: &ScanGeometry,
    config: &AcquisitionConfig,
    options: &ResolvedLoadOptions,
) -> LifetimeStack {
    let (h, w) = (config.height, config.width);
    if options.binned_stack {
        LifetimeStack::Binned(Array4::zeros((
            options.total_bins(),
            geometry.lifetime_bins,
            h,
            w,
        )))
    } else {
        LifetimeStack::Joined(Array3::zeros((geometry.lifetime_bins, h, w)))
    }
}

/// Runs pass 2 over the record stream with a fresh decoder state.
///
/// Output cubes are allocated up front for every channel pass 1 saw photons
/// on. Photons count toward the intensity and cumulative-lifetime images for
/// every in-line, in-range position; the lifetime stack and the arrival
/// histogram additionally require the arrival-time bin to be below
/// `geometry.lifetime_bins` (the bin one past the dropped last bin is
/// discarded, never an index panic).
pub fn accumulate_images(
    records: impl Iterator<Item = u32>,
    config: &AcquisitionConfig,
    geometry: &ScanGeometry,
    options: &ResolvedLoadOptions,
    cancel: &CancelToken,
) -> Result<Accumulation> {
    let (h, w) = (config.height, config.width);
    let frame_bins = options.total_bins();

    let mut want_stack = options.lifetime_stack;
    let mut stack_disabled = false;
    if want_stack {
        let bytes = lifetime_stack_bytes(geometry, config, options);
        if !lifetime_stack_fits(bytes) {
            log::warn!(
                "lifetime stack needs ~{} MB which exceeds available memory; skipping it",
                bytes / (1024 * 1024)
            );
            want_stack = false;
            stack_disabled = true;
        }
    }

    let mut channels: PerChannel<Option<ChannelAccumulation>> = PerChannel::from_fn(|ch| {
        geometry.channels_present[ch].then(|| ChannelAccumulation {
            frame_images: options.intensity_and_lifetime.then(|| FrameImages {
                intensity: Array3::zeros((frame_bins, h, w)),
                lifetime_sum: Array3::zeros((frame_bins, h, w)),
            }),
            lifetime_stack: want_stack.then(|| new_lifetime_stack(geometry, config, options)),
            arrival_histogram: vec![0; geometry.lifetime_bins],
        })
    });

    let mut state = DecoderState::new();
    let mut current_frame: u32 = 1;
    let mut frame_changed = true;
    let mut current_bin: usize = 0;
    let mut out_of_range: u64 = 0;

    for (n, bits) in records.enumerate() {
        if n % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(CoreError::Cancelled.into());
        }

        match decode(bits, &mut state, config.record_format) {
            RecordKind::Marker { code, global_sync } => {
                if let Some(frame_marker) = config.frame_marker {
                    if code >= frame_marker {
                        current_frame += 1;
                        frame_changed = true;
                        state.line = 0;
                    }
                }
                if code == config.line_start_marker && state.line_anchor.is_none() {
                    state.inside_line = true;
                    state.line_anchor = Some(global_sync);
                } else if code == config.line_stop_marker && state.line_anchor.is_some() {
                    state.inside_line = false;
                    state.line += 1;
                    state.line_anchor = None;
                    // Without a frame marker, a full frame's worth of lines
                    // is the frame boundary.
                    if config.frame_marker.is_none() && state.line == config.height {
                        current_frame += 1;
                        state.line = 0;
                        frame_changed = true;
                    }
                }
            }
            RecordKind::Photon {
                channel,
                dtime,
                global_sync,
            } => {
                if !state.inside_line {
                    continue;
                }
                let Some(anchor) = state.line_anchor else {
                    continue;
                };
                let Some(ch) = Channel::from_number(channel) else {
                    continue;
                };
                let Some(acc) = &mut channels[ch] else {
                    continue;
                };

                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let px = ((global_sync - anchor) as f64 / geometry.sync_per_line as f64
                    * w as f64)
                    .floor() as usize;
                let py = state.line;
                if px >= w || py >= h {
                    out_of_range += 1;
                    continue;
                }
                if !options.contains_frame(current_frame) {
                    continue;
                }
                if frame_changed {
                    current_bin = options.bin_for_frame(current_frame);
                    frame_changed = false;
                }

                let dtime_idx = usize::from(dtime);
                if let Some(images) = &mut acc.frame_images {
                    images.intensity[[current_bin, py, px]] += 1.0;
                    images.lifetime_sum[[current_bin, py, px]] += f32::from(dtime);
                    if dtime_idx < geometry.lifetime_bins {
                        acc.arrival_histogram[dtime_idx] += 1;
                    }
                }
                if dtime_idx < geometry.lifetime_bins {
                    match &mut acc.lifetime_stack {
                        Some(LifetimeStack::Joined(stack)) => {
                            stack[[dtime_idx, py, px]] += 1;
                        }
                        Some(LifetimeStack::Binned(stack)) => {
                            stack[[current_bin, dtime_idx, py, px]] += 1;
                        }
                        None => {}
                    }
                }
            }
        }
    }

    if out_of_range > 0 {
        log::warn!(
            "{out_of_range} photons mapped outside the image and were dropped; \
             the sync-per-line estimate may not match this stream"
        );
    }

    Ok(Accumulation {
        channels,
        out_of_range_photons: out_of_range,
        lifetime_stack_disabled: stack_disabled,
    })
}
