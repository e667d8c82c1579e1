//! Scan geometry estimation (pass 1).
//!
//! The first full pass over the record stream derives everything the image
//! accumulator needs to size its outputs: the average sync-tick duration of a
//! scan line, the frame count, which channels actually carry photons, and how
//! many arrival-time bins the lifetime axis needs.

use crate::record::{decode, DecoderState, RecordKind};
use crate::Result;
use flimpix_core::{AcquisitionConfig, CancelToken, Channel, Error as CoreError, PerChannel};
use serde::{Deserialize, Serialize};

/// Records between cancellation checks.
pub(crate) const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Read-only scan geometry derived by pass 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanGeometry {
    /// Average sync ticks per completed scan line (integer-truncated mean).
    /// Pixel mapping divides by this, so it is approximate by design.
    pub sync_per_line: u64,
    /// Number of completed line start/stop pairs seen.
    pub completed_lines: usize,
    /// Total acquisition frames in the stream.
    pub total_frames: u32,
    /// Which channels carried at least one photon.
    pub channels_present: PerChannel<bool>,
    /// Number of valid arrival-time bins; valid dtimes are `0..lifetime_bins`.
    ///
    /// This is the maximum observed dtime, not maximum + 1: SymPhoTime drops
    /// the last bin from its own histograms, and we match it so counts agree.
    /// Whether that is a hardware quirk or a workaround is unresolved.
    pub lifetime_bins: usize,
}

impl ScanGeometry {
    /// Highest accepted arrival-time bin index, if any photon was seen.
    #[must_use]
    pub fn dtime_max(&self) -> Option<usize> {
        self.lifetime_bins.checked_sub(1)
    }
}

/// Runs pass 1 over the record stream.
///
/// A line opens on the configured line-start code when no line is open, and
/// closes on the line-stop code, contributing its sync-tick duration to the
/// average. Frame markers are counted only when the hardware emits a reliable
/// one; otherwise the frame count is derived from completed lines.
///
/// # Errors
/// `CoreError::NoScanLines` if not a single line start/stop pair completed,
/// `CoreError::ZeroLineDuration` if the completed lines average zero sync
/// ticks. Either way the ticks-per-line divisor is unusable, which means the
/// marker configuration does not match the stream.
pub fn estimate_scan_geometry(
    records: impl Iterator<Item = u32>,
    config: &AcquisitionConfig,
    cancel: &CancelToken,
) -> Result<ScanGeometry> {
    let mut state = DecoderState::new();

    let mut frame_count: u32 = 1;
    let mut line_tick_sum: u64 = 0;
    let mut completed_lines: usize = 0;
    let mut channels_present = PerChannel::<bool>::default();
    let mut max_dtime: Option<u16> = None;

    for (n, bits) in records.enumerate() {
        if n % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(CoreError::Cancelled.into());
        }

        match decode(bits, &mut state, config.record_format) {
            RecordKind::Photon {
                channel, dtime, ..
            } => {
                if let Some(ch) = Channel::from_number(channel) {
                    channels_present[ch] = true;
                    max_dtime = Some(max_dtime.map_or(dtime, |m| m.max(dtime)));
                }
            }
            RecordKind::Marker { code, global_sync } => {
                if code == config.line_start_marker && state.line_anchor.is_none() {
                    state.line_anchor = Some(global_sync);
                } else if code == config.line_stop_marker {
                    if let Some(anchor) = state.line_anchor.take() {
                        line_tick_sum += global_sync - anchor;
                        completed_lines += 1;
                    }
                }
                if let Some(frame_marker) = config.frame_marker {
                    if code >= frame_marker {
                        frame_count += 1;
                    }
                }
            }
        }
    }

    if completed_lines == 0 {
        return Err(CoreError::NoScanLines.into());
    }
    let sync_per_line = line_tick_sum / completed_lines as u64;
    if sync_per_line == 0 {
        return Err(CoreError::ZeroLineDuration.into());
    }

    // Without a reliable frame marker the line markers are the only
    // trustworthy synchronization signal, so frames come from line counting.
    let total_frames = if config.frame_marker.is_some() {
        frame_count - 1
    } else {
        completed_lines.div_ceil(config.height) as u32
    };

    // The instrument's own software treats the last observed bin as past the
    // end; see `lifetime_bins` above.
    let lifetime_bins = max_dtime.map_or(0, usize::from);

    log::debug!(
        "scan geometry: {sync_per_line} sync/line over {completed_lines} lines, \
         {total_frames} frames, {lifetime_bins} lifetime bins"
    );

    Ok(ScanGeometry {
        sync_per_line,
        completed_lines,
        total_frames,
        channels_present,
        lifetime_bins,
    })
}
