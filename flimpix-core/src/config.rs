//! Acquisition configuration and user load parameters.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// T3 record encoding variant, fixed for the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecordFormat {
    /// Legacy PicoHarp T3 layout (16-bit sync counter, 12-bit arrival time).
    PicoHarpT3,
    /// HydraHarp / TimeHarp260 / MultiHarp T3 layout (10-bit sync counter,
    /// 15-bit arrival time). `version` 1 is the original HydraHarp encoding
    /// whose overflow record always advances by one wraparound; version 2
    /// carries an overflow multiplier in the sync field.
    GenericT3 { version: u8 },
}

/// Configuration derived from the file header, consumed by both decode passes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcquisitionConfig {
    /// Record encoding variant.
    pub record_format: RecordFormat,
    /// Image width in pixels (`ImgHdr_PixX`).
    pub width: usize,
    /// Image height in pixels (`ImgHdr_PixY`).
    pub height: usize,
    /// Physical pixel size in micrometers; 0 means uncalibrated.
    pub pixel_size_um: f64,
    /// TCSPC resolution in nanoseconds per arrival-time bin.
    pub time_resolution_ns: f32,
    /// Marker code signalling the start of a scan line.
    pub line_start_marker: u8,
    /// Marker code signalling the end of a scan line.
    pub line_stop_marker: u8,
    /// Marker code signalling a new frame, if the hardware emits a reliable
    /// one. `None` means frames must be derived from line counting.
    pub frame_marker: Option<u8>,
    /// Total number of 32-bit records in the data section.
    pub record_count: usize,
}

impl AcquisitionConfig {
    /// Checks the header-derived fields that every pass relies on.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Physical calibration, available only when the pixel size is known.
    #[must_use]
    pub fn calibration(&self) -> Option<Calibration> {
        (self.pixel_size_um > 0.0).then(|| Calibration {
            pixel_width_um: self.pixel_size_um,
            pixel_height_um: self.pixel_size_um,
            time_step_ns: self.time_resolution_ns,
        })
    }
}

/// Applies the marker-code compatibility shim to raw header marker values.
///
/// Line and frame marker codes above 2 read back wrong from some scanner
/// files and are forced to 4; on the newer record formats the frame code is
/// kept as-is. A frame code of 2 or less leaves the frame marker treated as
/// absent, so frames are derived from line counting instead. This mirrors
/// the behavior established against real hardware files; it is a shim, not
/// understood firmware semantics.
// TODO: verify marker codes > 2 against files from scanners other than the
// LSM/SymPhoTime setups this was tuned on.
#[must_use]
pub fn normalize_markers(
    format: RecordFormat,
    line_start: i64,
    line_stop: i64,
    frame: i64,
) -> (u8, u8, Option<u8>) {
    let clamp = |code: i64| -> u8 {
        if code > 2 {
            4
        } else {
            code.clamp(0, 2) as u8
        }
    };

    let frame_marker = if frame > 2 {
        match format {
            RecordFormat::PicoHarpT3 => Some(4),
            RecordFormat::GenericT3 { .. } => Some(frame.clamp(0, u8::MAX.into()) as u8),
        }
    } else {
        None
    };

    (clamp(line_start), clamp(line_stop), frame_marker)
}

/// Physical calibration handed to the display collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    /// Pixel width in micrometers.
    pub pixel_width_um: f64,
    /// Pixel height in micrometers.
    pub pixel_height_um: f64,
    /// Arrival-time axis step in nanoseconds.
    pub time_step_ns: f32,
}

/// How acquisition frames map onto output slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameBinning {
    /// Merge every selected frame into a single output slice.
    JoinFrames,
    /// Bin every `n` consecutive frames into one output slice.
    BinFrames(u32),
}

/// User-facing load parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoadOptions {
    /// Produce the intensity and average-lifetime cubes.
    pub intensity_and_lifetime: bool,
    /// Produce the lifetime-ordered photon stack.
    pub lifetime_stack: bool,
    /// Frame binning mode.
    pub binning: FrameBinning,
    /// Inclusive 1-based frame range restriction; `None` loads everything.
    pub frame_range: Option<(u32, u32)>,
    /// Estimate the IRF time zero per channel and subtract it from the
    /// average lifetimes.
    pub estimate_irf_zero: bool,
    /// Floor negative IRF-corrected lifetimes at zero.
    pub clamp_negative_lifetime: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            intensity_and_lifetime: true,
            lifetime_stack: false,
            binning: FrameBinning::JoinFrames,
            frame_range: None,
            estimate_irf_zero: true,
            clamp_negative_lifetime: false,
        }
    }
}

impl LoadOptions {
    /// Resolves the options against the frame count found in pass 1.
    ///
    /// Out-of-bounds parameters are never fatal: a bad bin size resets to 1
    /// and a bad frame range resets to the full range, each with a warning.
    #[must_use]
    pub fn resolve(&self, total_frames: u32) -> ResolvedLoadOptions {
        let total_frames = total_frames.max(1);

        let (frame_min, frame_max) = match self.frame_range {
            None => (1, total_frames),
            Some((lo, hi)) => {
                let lo = lo.max(1);
                let hi = hi.min(total_frames);
                if lo > hi {
                    log::warn!(
                        "frame range {:?} is outside 1..={}, loading all frames",
                        self.frame_range,
                        total_frames
                    );
                    (1, total_frames)
                } else {
                    (lo, hi)
                }
            }
        };
        let selected = frame_max - frame_min + 1;

        let bin_size = match self.binning {
            // Joining all frames is binning with one bin over the selection.
            FrameBinning::JoinFrames => selected,
            FrameBinning::BinFrames(n) if n >= 1 && n <= total_frames => n,
            FrameBinning::BinFrames(n) => {
                log::warn!(
                    "bin size {n} should be in the range from 1 to the total frame count {total_frames}, resetting to 1"
                );
                1
            }
        };

        ResolvedLoadOptions {
            intensity_and_lifetime: self.intensity_and_lifetime,
            lifetime_stack: self.lifetime_stack,
            binned_stack: matches!(self.binning, FrameBinning::BinFrames(_)),
            frame_min,
            frame_max,
            bin_size,
            estimate_irf_zero: self.estimate_irf_zero,
            clamp_negative_lifetime: self.clamp_negative_lifetime,
        }
    }
}

/// Load parameters after validation against the observed frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResolvedLoadOptions {
    pub intensity_and_lifetime: bool,
    pub lifetime_stack: bool,
    /// Whether the lifetime stack keeps a frame-bin axis.
    pub binned_stack: bool,
    /// First frame to load, 1-based inclusive.
    pub frame_min: u32,
    /// Last frame to load, 1-based inclusive.
    pub frame_max: u32,
    /// Frames merged per output slice.
    pub bin_size: u32,
    pub estimate_irf_zero: bool,
    pub clamp_negative_lifetime: bool,
}

impl ResolvedLoadOptions {
    /// Number of output frame bins.
    #[must_use]
    pub fn total_bins(&self) -> usize {
        let selected = self.frame_max - self.frame_min + 1;
        selected.div_ceil(self.bin_size) as usize
    }

    /// Output bin index (0-based) for a 1-based acquisition frame number.
    ///
    /// Callers must have checked the frame is within the selected range.
    #[inline]
    #[must_use]
    pub fn bin_for_frame(&self, frame: u32) -> usize {
        ((frame - self.frame_min + 1).div_ceil(self.bin_size) - 1) as usize
    }

    /// Whether a 1-based frame number falls in the selected range.
    #[inline]
    #[must_use]
    pub fn contains_frame(&self, frame: u32) -> bool {
        frame >= self.frame_min && frame <= self.frame_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> AcquisitionConfig {
        AcquisitionConfig {
            record_format: RecordFormat::PicoHarpT3,
            width: 256,
            height: 256,
            pixel_size_um: 0.2,
            time_resolution_ns: 0.016,
            line_start_marker: 1,
            line_stop_marker: 2,
            frame_marker: Some(4),
            record_count: 0,
        }
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.width = 0;
        assert!(matches!(
            bad.validate(),
            Err(Error::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_calibration_requires_pixel_size() {
        let cal = config().calibration().unwrap();
        assert_relative_eq!(cal.pixel_width_um, 0.2);
        assert_relative_eq!(cal.pixel_height_um, 0.2);
        assert_relative_eq!(cal.time_step_ns, 0.016);

        let mut uncalibrated = config();
        uncalibrated.pixel_size_um = 0.0;
        assert!(uncalibrated.calibration().is_none());
    }

    #[test]
    fn test_marker_normalization_shim() {
        // Codes above 2 are forced to 4 on PicoHarp files.
        let (ls, le, fr) = normalize_markers(RecordFormat::PicoHarpT3, 3, 7, 3);
        assert_eq!((ls, le, fr), (4, 4, Some(4)));

        // The newer formats keep their frame code.
        let (ls, le, fr) = normalize_markers(RecordFormat::GenericT3 { version: 2 }, 1, 2, 5);
        assert_eq!((ls, le, fr), (1, 2, Some(5)));

        // Frame codes of 2 or less mean no reliable frame marker.
        let (_, _, fr) = normalize_markers(RecordFormat::PicoHarpT3, 1, 2, 2);
        assert!(fr.is_none());
        let (_, _, fr) = normalize_markers(RecordFormat::GenericT3 { version: 1 }, 1, 2, -1);
        assert!(fr.is_none());
    }

    #[test]
    fn test_resolve_clamps_bad_bin_size() {
        let opts = LoadOptions {
            binning: FrameBinning::BinFrames(0),
            ..LoadOptions::default()
        };
        assert_eq!(opts.resolve(10).bin_size, 1);

        let opts = LoadOptions {
            binning: FrameBinning::BinFrames(11),
            ..LoadOptions::default()
        };
        assert_eq!(opts.resolve(10).bin_size, 1);

        let opts = LoadOptions {
            binning: FrameBinning::BinFrames(5),
            ..LoadOptions::default()
        };
        let resolved = opts.resolve(10);
        assert_eq!(resolved.bin_size, 5);
        assert_eq!(resolved.total_bins(), 2);
    }

    #[test]
    fn test_resolve_clamps_bad_frame_range() {
        let opts = LoadOptions {
            frame_range: Some((8, 3)),
            ..LoadOptions::default()
        };
        let resolved = opts.resolve(10);
        assert_eq!((resolved.frame_min, resolved.frame_max), (1, 10));

        let opts = LoadOptions {
            frame_range: Some((3, 99)),
            ..LoadOptions::default()
        };
        let resolved = opts.resolve(10);
        assert_eq!((resolved.frame_min, resolved.frame_max), (3, 10));
        assert!(resolved.contains_frame(3));
        assert!(!resolved.contains_frame(2));
    }

    #[test]
    fn test_join_frames_is_one_bin() {
        let opts = LoadOptions {
            frame_range: Some((2, 7)),
            ..LoadOptions::default()
        };
        let resolved = opts.resolve(10);
        assert_eq!(resolved.bin_size, 6);
        assert_eq!(resolved.total_bins(), 1);
        assert_eq!(resolved.bin_for_frame(2), 0);
        assert_eq!(resolved.bin_for_frame(7), 0);
    }

    #[test]
    fn test_binned_frame_indices() {
        let opts = LoadOptions {
            binning: FrameBinning::BinFrames(2),
            frame_range: Some((3, 8)),
            ..LoadOptions::default()
        };
        let resolved = opts.resolve(10);
        assert_eq!(resolved.total_bins(), 3);
        assert_eq!(resolved.bin_for_frame(3), 0);
        assert_eq!(resolved.bin_for_frame(4), 0);
        assert_eq!(resolved.bin_for_frame(5), 1);
        assert_eq!(resolved.bin_for_frame(8), 2);
    }
}
