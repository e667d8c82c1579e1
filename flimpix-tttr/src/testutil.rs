//! Synthetic PicoHarp T3 record builders shared by the unit tests.

/// Photon record: channel in bits 28..32, dtime in 16..28, sync in 0..16.
pub(crate) fn ph_photon(channel: u32, dtime: u32, nsync: u32) -> u32 {
    (channel << 28) | (dtime << 16) | nsync
}

/// Marker record: channel 15 with the marker code in the low dtime bits.
pub(crate) fn ph_marker(code: u32, nsync: u32) -> u32 {
    (15 << 28) | (code << 16) | nsync
}

/// Sync counter wraparound record.
pub(crate) fn ph_overflow() -> u32 {
    15 << 28
}

/// Serializes records as a little-endian data section.
pub(crate) fn to_bytes(records: &[u32]) -> Vec<u8> {
    records.iter().flat_map(|r| r.to_le_bytes()).collect()
}
