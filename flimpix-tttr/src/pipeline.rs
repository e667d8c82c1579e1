//! Two-pass FLIM reconstruction pipeline.
//!
//! Pass 1 estimates the scan geometry, pass 2 accumulates the output cubes,
//! then post-processing turns cumulative sums into average-lifetime images.
//! The output cubes cannot be sized before the geometry is known, so the two
//! passes stay; each one decodes from a fresh [`DecoderState`].
//!
//! [`DecoderState`]: crate::record::DecoderState

use crate::accumulate::{accumulate_images, LifetimeStack};
use crate::geometry::{estimate_scan_geometry, ScanGeometry};
use crate::postprocess::{average_lifetime, estimate_irf_time_zero};
use crate::Result;
use flimpix_core::{
    AcquisitionConfig, Calibration, CancelToken, Error as CoreError, LoadOptions, PerChannel,
    ResolvedLoadOptions,
};
use ndarray::Array3;

/// Intensity and corrected average-lifetime images for one channel, both
/// `(frame_bins, height, width)`.
#[derive(Debug, Clone)]
pub struct ChannelImages {
    /// Photon counts per pixel and frame bin.
    pub intensity: Array3<f32>,
    /// IRF-corrected average lifetime per pixel and frame bin, nanoseconds.
    pub average_lifetime: Array3<f32>,
    /// Estimated IRF time zero subtracted from this channel, if estimation
    /// was requested and the histogram carried a usable peak.
    pub irf_time_zero_ns: Option<f32>,
}

impl ChannelImages {
    /// Total photon count over all pixels and frame bins.
    #[must_use]
    pub fn photon_total(&self) -> u64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            self.intensity.sum() as u64
        }
    }
}

/// Everything produced for one channel.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    pub images: Option<ChannelImages>,
    pub lifetime_stack: Option<LifetimeStack>,
}

/// Complete reconstruction result, handed off only after post-processing so
/// no partially-computed cube is ever visible.
#[derive(Debug)]
pub struct FlimOutput {
    pub geometry: ScanGeometry,
    /// The load options after clamping against the observed frame count.
    pub options: ResolvedLoadOptions,
    /// Physical calibration, when the header carried a pixel size.
    pub calibration: Option<Calibration>,
    pub channels: PerChannel<Option<ChannelOutput>>,
    pub out_of_range_photons: u64,
    pub lifetime_stack_disabled: bool,
}

/// Runs the full two-pass reconstruction.
///
/// `pass` is called once per pass and must yield the same record sequence
/// both times, e.g. by re-iterating a memory-mapped data section.
///
/// # Errors
/// Fails up front on zero image dimensions, or on a non-positive time
/// resolution when lifetime images were requested; fails in pass 1 when no
/// scan line ever completes; fails on cancellation in either pass.
pub fn reconstruct<I, F>(
    mut pass: F,
    config: &AcquisitionConfig,
    options: &LoadOptions,
    cancel: &CancelToken,
) -> Result<FlimOutput>
where
    F: FnMut() -> I,
    I: Iterator<Item = u32>,
{
    config.validate()?;
    if options.intensity_and_lifetime && config.time_resolution_ns <= 0.0 {
        return Err(CoreError::InvalidTimeResolution(config.time_resolution_ns).into());
    }

    let geometry = estimate_scan_geometry(pass(), config, cancel)?;
    let resolved = options.resolve(geometry.total_frames);
    let accumulation = accumulate_images(pass(), config, &geometry, &resolved, cancel)?;

    let channels = PerChannel::from_fn(|ch| {
        let acc = accumulation.channels[ch].as_ref()?;
        let images = acc.frame_images.as_ref().map(|images| {
            let irf_time_zero_ns = resolved
                .estimate_irf_zero
                .then(|| estimate_irf_time_zero(&acc.arrival_histogram, config.time_resolution_ns))
                .flatten();
            ChannelImages {
                intensity: images.intensity.clone(),
                average_lifetime: average_lifetime(
                    images,
                    config.time_resolution_ns,
                    irf_time_zero_ns.unwrap_or(0.0),
                    resolved.clamp_negative_lifetime,
                ),
                irf_time_zero_ns,
            }
        });
        Some(ChannelOutput {
            images,
            lifetime_stack: acc.lifetime_stack.clone(),
        })
    });

    Ok(FlimOutput {
        geometry,
        options: resolved,
        calibration: config.calibration(),
        channels,
        out_of_range_photons: accumulation.out_of_range_photons,
        lifetime_stack_disabled: accumulation.lifetime_stack_disabled,
    })
}
