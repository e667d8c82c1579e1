//! T3 record decoding.
//!
//! A TTTR data section is a flat sequence of little-endian 32-bit records.
//! Each record is either a photon (channel, arrival-time bin, sync counter)
//! or a special record (scan marker or sync-counter overflow). [`decode`] is
//! the per-record state transition: the only state it touches is the
//! accumulated overflow time in [`DecoderState`], which turns the wrapping
//! per-record sync counter into a monotonic global clock.

use crate::{Error, Result};
use flimpix_core::RecordFormat;

/// Sync counter span of one PicoHarp T3 wraparound record.
pub const PH_WRAPAROUND: u64 = 65536;
/// Sync counter span of one HydraHarp/MultiHarp T3 wraparound record.
pub const HH_WRAPAROUND: u64 = 1024;

/// `TTResultFormat_TTTRRecType` header codes, from the PicoQuant demo code.
pub mod rec_type {
    pub const PICOHARP_T3: i64 = 0x0001_0303;
    pub const PICOHARP_T2: i64 = 0x0001_0203;
    pub const HYDRAHARP_T3: i64 = 0x0001_0304;
    pub const HYDRAHARP_T2: i64 = 0x0001_0204;
    pub const HYDRAHARP2_T3: i64 = 0x0101_0304;
    pub const HYDRAHARP2_T2: i64 = 0x0101_0204;
    pub const TIMEHARP260N_T3: i64 = 0x0001_0305;
    pub const TIMEHARP260N_T2: i64 = 0x0001_0205;
    pub const TIMEHARP260P_T3: i64 = 0x0001_0306;
    pub const TIMEHARP260P_T2: i64 = 0x0001_0206;
    pub const MULTIHARP_T3: i64 = 0x0001_0307;
    pub const MULTIHARP_T2: i64 = 0x0001_0207;
}

/// Maps a `TTResultFormat_TTTRRecType` header code to a decoder variant.
///
/// T2 codes are recognized but rejected; anything else is unsupported.
/// Both are fatal before any pass begins.
pub fn record_format_from_code(code: i64) -> Result<RecordFormat> {
    use rec_type::{
        HYDRAHARP2_T2, HYDRAHARP2_T3, HYDRAHARP_T2, HYDRAHARP_T3, MULTIHARP_T2, MULTIHARP_T3,
        PICOHARP_T2, PICOHARP_T3, TIMEHARP260N_T2, TIMEHARP260N_T3, TIMEHARP260P_T2,
        TIMEHARP260P_T3,
    };
    match code {
        PICOHARP_T3 => Ok(RecordFormat::PicoHarpT3),
        HYDRAHARP_T3 => Ok(RecordFormat::GenericT3 { version: 1 }),
        HYDRAHARP2_T3 | TIMEHARP260N_T3 | TIMEHARP260P_T3 | MULTIHARP_T3 => {
            Ok(RecordFormat::GenericT3 { version: 2 })
        }
        PICOHARP_T2 | HYDRAHARP_T2 | HYDRAHARP2_T2 | TIMEHARP260N_T2 | TIMEHARP260P_T2
        | MULTIHARP_T2 => Err(Error::T2ModeUnsupported(code)),
        other => Err(Error::UnsupportedRecordType(other)),
    }
}

/// Per-pass mutable decode state.
///
/// Each of the two passes owns a fresh instance; reusing one that has already
/// seen records carries a stale overflow clock and stale line tracking into
/// the next pass, so the pipeline constructs a new state per pass.
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    /// Wraparound-corrected global clock offset, in sync ticks.
    pub overflow_time: u64,
    /// Scan line the next photon belongs to (0-based).
    pub line: usize,
    /// Whether a line-start marker is currently open.
    pub inside_line: bool,
    /// Global sync time of the open line's start marker.
    pub line_anchor: Option<u64>,
}

impl DecoderState {
    /// Creates a fresh state for the start of a pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all fields to the start-of-pass state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A photon detection event.
    Photon {
        /// 1-based wire channel number (1..=4 imaged, higher values are
        /// hardware-reserved and legal).
        channel: u8,
        /// Arrival-time bin within the sync period.
        dtime: u16,
        /// Overflow-corrected global sync time.
        global_sync: u64,
    },
    /// A scan-control or overflow record. Overflow records surface with
    /// code 0; callers act only on the configured line/frame codes and
    /// ignore the rest.
    Marker {
        /// Marker code multiplexed into the record.
        code: u8,
        /// Overflow-corrected global sync time.
        global_sync: u64,
    },
}

/// Decodes one 32-bit record, advancing the overflow clock in `state`.
#[inline]
pub fn decode(bits: u32, state: &mut DecoderState, format: RecordFormat) -> RecordKind {
    match format {
        RecordFormat::PicoHarpT3 => decode_picoharp(bits, state),
        RecordFormat::GenericT3 { version } => decode_generic(bits, state, version),
    }
}

/// PicoHarp T3: sync = bits[0..16), dtime = bits[16..28), channel = bits[28..32).
///
/// Channel 15 flags a special record; its marker code sits in the low four
/// bits of the dtime field. Code 0 (equivalently dtime 0) is a 16-bit sync
/// counter wraparound.
#[inline]
fn decode_picoharp(bits: u32, state: &mut DecoderState) -> RecordKind {
    let nsync = u64::from(bits & 0xFFFF);
    let dtime = ((bits >> 16) & 0xFFF) as u16;
    let channel = ((bits >> 28) & 0xF) as u8;

    if channel == 15 {
        let code = ((bits >> 16) & 0xF) as u8;
        if code == 0 || dtime == 0 {
            state.overflow_time += PH_WRAPAROUND;
        }
        RecordKind::Marker {
            code,
            global_sync: state.overflow_time + nsync,
        }
    } else {
        RecordKind::Photon {
            channel,
            dtime,
            global_sync: state.overflow_time + nsync,
        }
    }
}

/// HydraHarp/TimeHarp260/MultiHarp T3: sync = bits[0..10), dtime =
/// bits[10..25), channel = bits[25..31), special flag = bit 31.
///
/// With the special flag clear the record is a photon on channel
/// `raw + 1`. With it set, raw channel 63 is an overflow — advancing by one
/// wraparound on version 1 (or when the sync field is 0), and by
/// `wraparound * sync` on version 2, which compresses runs of overflows —
/// and raw channels 1..=15 are scan markers whose code is the raw channel.
#[inline]
fn decode_generic(bits: u32, state: &mut DecoderState, version: u8) -> RecordKind {
    let nsync = u64::from(bits & 0x3FF);
    let dtime = ((bits >> 10) & 0x7FFF) as u16;
    let raw = ((bits >> 25) & 0x3F) as u8;
    let special = (bits >> 31) != 0;

    if !special {
        return RecordKind::Photon {
            channel: raw + 1,
            dtime,
            global_sync: state.overflow_time + nsync,
        };
    }

    if raw == 63 {
        if nsync == 0 || version == 1 {
            state.overflow_time += HH_WRAPAROUND;
        } else {
            state.overflow_time += HH_WRAPAROUND * nsync;
        }
    }

    let code = if (1..=15).contains(&raw) { raw } else { 0 };
    RecordKind::Marker {
        code,
        global_sync: state.overflow_time + nsync,
    }
}

/// Iterates the 32-bit records of a little-endian data section.
///
/// # Panics
/// Panics if a chunk is not exactly 4 bytes. This should be unreachable
/// because `chunks_exact(4)` guarantees each chunk length.
pub fn iter_records(data: &[u8]) -> impl Iterator<Item = u32> + '_ {
    data.chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
}
