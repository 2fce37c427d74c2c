//! Clock conversions between the TS wire clocks and nanoseconds.
//!
//! PTS/DTS and the PCR base tick at 90 kHz; the PCR extension ticks at
//! 27 MHz. Everything above the wire boundary uses nanoseconds, so these
//! conversions are the only place either clock rate appears.

/// Clock frequency for PTS/DTS and the PCR base, in Hz
pub const PTS_HZ: u64 = 90_000;
/// Clock frequency for the PCR extension, in Hz
pub const PCR_HZ: u64 = 27_000_000;

const NS_PER_SEC: u64 = 1_000_000_000;

/// The 33-bit 90 kHz timestamp wrap period in nanoseconds.
///
/// Equal to `pts_to_ns(1 << 33)`; the demuxer's rollover correction adds
/// one of these per elapsed epoch.
pub const PTS_ROLLOVER_NS: u64 = 95_443_717_688_889;

fn div_round(numerator: u128, denominator: u128) -> u64 {
    ((numerator + denominator / 2) / denominator) as u64
}

/// Converts a 90 kHz tick count to nanoseconds, rounding to nearest.
pub fn pts_to_ns(ticks: u64) -> u64 {
    div_round(ticks as u128 * NS_PER_SEC as u128, PTS_HZ as u128)
}

/// Converts nanoseconds to 90 kHz ticks, rounding to nearest.
pub fn ns_to_pts(ns: u64) -> u64 {
    div_round(ns as u128 * PTS_HZ as u128, NS_PER_SEC as u128)
}

/// Converts a PCR (33-bit 90 kHz base, 9-bit 27 MHz extension) to nanoseconds.
pub fn pcr_to_ns(base: u64, ext: u16) -> u64 {
    pts_to_ns(base) + div_round(ext as u128 * NS_PER_SEC as u128, PCR_HZ as u128)
}

/// Converts nanoseconds to a PCR `(base, extension)` pair.
pub fn ns_to_pcr(ns: u64) -> (u64, u16) {
    let ticks_27mhz = div_round(ns as u128 * PCR_HZ as u128, NS_PER_SEC as u128);
    (ticks_27mhz / 300, (ticks_27mhz % 300) as u16)
}
