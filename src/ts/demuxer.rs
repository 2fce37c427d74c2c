//! The demultiplexer: bytes in, ordered containers out.
//!
//! Feed it chunks of any size; it synchronises on 188-byte frames, routes
//! packets by PID, reassembles PES via per-PID aggregators, dispatches PSI
//! tables, and lifts the 33-bit 90 kHz timestamps onto a monotonic
//! nanosecond timeline.
//!
//! In lenient mode (the default) every recoverable problem is recorded on
//! the warning list and mirrored to `log::warn!`; in strict mode the same
//! problems are returned as errors.

use super::aggregator::StreamAggregator;
use super::clock::PTS_ROLLOVER_NS;
use super::parser;
use super::pes::Pes;
use super::psi::{Psi, Table};
use super::scte35::SpliceCommand;
use super::types::{PidClass, PmtStream, StreamCategory, TsPacket, SYNC_BYTE, TS_PACKET_SIZE};
use crate::error::{Result, TsError};
use bytes::BytesMut;
use log::warn;
use std::collections::HashMap;

/// Configuration of a [`Demuxer`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DemuxerOptions {
    /// Fail on the first error instead of recovering and warning
    pub strict: bool,
    /// Gate every elementary stream on its first random-access point
    pub wait_rai: bool,
}

/// What a container carries
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A reassembled PES packet
    Pes(Pes),
    /// A PSI section
    Psi(Psi),
}

/// One demuxer output: a payload, the PID it arrived on, and a best-effort
/// monotonic timestamp in nanoseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    /// PID the payload was carried on
    pub pid: u16,
    /// Rollover-corrected timestamp, when one could be derived
    pub t: Option<u64>,
    /// The payload itself
    pub payload: Payload,
}

#[derive(Debug, Clone, Copy)]
struct Lane {
    last: u64,
    epochs: u64,
}

/// Rollover correction for one raw timestamp against one lane's state.
///
/// The 33-bit 90 kHz counter wraps every [`PTS_ROLLOVER_NS`]; a backwards
/// jump of more than half the period means the counter wrapped forward,
/// and a forwards jump of more than half the period undoes one epoch for a
/// late packet from before the boundary.
fn correct(lane: &mut Option<Lane>, raw: u64) -> u64 {
    match lane {
        None => {
            *lane = Some(Lane {
                last: raw,
                epochs: 0,
            });
            raw
        }
        Some(lane) => {
            if lane.last > raw && lane.last - raw > PTS_ROLLOVER_NS / 2 {
                lane.epochs += 1;
            } else if raw > lane.last && raw - lane.last > PTS_ROLLOVER_NS / 2 && lane.epochs > 0 {
                lane.epochs -= 1;
            }
            lane.last = raw;
            raw + lane.epochs * PTS_ROLLOVER_NS
        }
    }
}

#[derive(Debug, Default)]
struct PidClock {
    pts: Option<Lane>,
    dts: Option<Lane>,
}

/// A value-based TS demultiplexer.
///
/// ```
/// use tsio::ts::demuxer::Demuxer;
///
/// # fn main() -> tsio::Result<()> {
/// let mut demuxer = Demuxer::new();
/// let containers = demuxer.push(&[])?;
/// assert!(containers.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Demuxer {
    options: DemuxerOptions,
    pending: BytesMut,
    pids_with_pmt: HashMap<u16, u16>,
    streams: HashMap<u16, PmtStream>,
    aggregators: HashMap<u16, StreamAggregator>,
    clocks: HashMap<u16, PidClock>,
    last_dts: Option<u64>,
    warnings: Vec<TsError>,
}

impl Demuxer {
    /// Creates a lenient demuxer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a demuxer with explicit options.
    pub fn with_options(options: DemuxerOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Feeds a chunk of bytes and returns the containers it completed.
    ///
    /// Chunk boundaries are irrelevant: a frame split across pushes is
    /// buffered and decoded once its remainder arrives.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Container>> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut offset = 0;

        while data.len() - offset >= TS_PACKET_SIZE {
            match parser::parse_packet(&data[offset..offset + TS_PACKET_SIZE]) {
                Ok(packet) => {
                    offset += TS_PACKET_SIZE;
                    self.dispatch(packet, &mut out)?;
                }
                Err(e) if self.options.strict => return Err(e),
                Err(e) => {
                    self.warn(e);
                    // drop the bad frame and resync on the next sync byte
                    let resume = if data[offset] == SYNC_BYTE {
                        offset + TS_PACKET_SIZE
                    } else {
                        offset + 1
                    };
                    offset = data[resume..]
                        .iter()
                        .position(|&b| b == SYNC_BYTE)
                        .map(|i| resume + i)
                        .unwrap_or(data.len());
                }
            }
        }

        self.pending = data.split_off(offset);
        Ok(out)
    }

    /// Drains every aggregator at end of stream.
    pub fn flush(&mut self) -> Result<Vec<Container>> {
        let mut out = Vec::new();
        let mut pids: Vec<u16> = self.aggregators.keys().copied().collect();
        pids.sort_unstable();

        for pid in pids {
            match self.aggregators.get_mut(&pid).map(|a| a.flush()) {
                Some(Ok(Some(pes))) => self.emit_pes(pid, pes, &mut out),
                Some(Err(e)) => {
                    if self.options.strict {
                        return Err(e);
                    }
                    if let Some(aggregator) = self.aggregators.get_mut(&pid) {
                        aggregator.reset();
                    }
                    self.warn(e);
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// Warnings recorded while recovering in lenient mode.
    pub fn warnings(&self) -> &[TsError] {
        &self.warnings
    }

    /// Drains the recorded warnings.
    pub fn take_warnings(&mut self) -> Vec<TsError> {
        std::mem::take(&mut self.warnings)
    }

    /// Programs discovered so far, as `(program_number, pmt_pid)` pairs.
    pub fn programs(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.pids_with_pmt
            .iter()
            .map(|(&pmt_pid, &program)| (program, pmt_pid))
    }

    /// Elementary streams declared by the PMTs seen so far, keyed by PID.
    pub fn streams(&self) -> &HashMap<u16, PmtStream> {
        &self.streams
    }

    fn dispatch(&mut self, packet: TsPacket, out: &mut Vec<Container>) -> Result<()> {
        let class = packet.pid_class();
        if class == PidClass::NullPacket {
            return Ok(());
        }

        if self.aggregators.contains_key(&packet.pid) {
            return self.dispatch_pes(packet, out);
        }

        if class == PidClass::Pat
            || self.pids_with_pmt.contains_key(&packet.pid)
            || class == PidClass::Psi
        {
            return self.dispatch_psi(packet, out);
        }

        self.fail_or_warn(TsError::UnsupportedPacket(format!(
            "no route for pid {:#06x}",
            packet.pid
        )))
    }

    fn dispatch_pes(&mut self, packet: TsPacket, out: &mut Vec<Container>) -> Result<()> {
        let pid = packet.pid;
        let Some(aggregator) = self.aggregators.get_mut(&pid) else {
            return Ok(());
        };

        match aggregator.push(&packet) {
            Ok(Some(pes)) => {
                self.emit_pes(pid, pes, out);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if self.options.strict => Err(e),
            Err(e) => {
                aggregator.reset();
                self.warn(e);
                Ok(())
            }
        }
    }

    fn emit_pes(&mut self, pid: u16, mut pes: Pes, out: &mut Vec<Container>) {
        let clock = self.clocks.entry(pid).or_default();
        pes.pts = pes.pts.map(|raw| correct(&mut clock.pts, raw));
        pes.dts = pes.dts.map(|raw| correct(&mut clock.dts, raw));

        let t = pes.dts.or(pes.pts);
        let is_video = self
            .streams
            .get(&pid)
            .map(|s| s.stream_type.category() == StreamCategory::Video)
            .unwrap_or(false);
        if is_video {
            if let Some(t) = t {
                self.last_dts = Some(t);
            }
        }

        out.push(Container {
            pid,
            t,
            payload: Payload::Pes(pes),
        });
    }

    fn dispatch_psi(&mut self, packet: TsPacket, out: &mut Vec<Container>) -> Result<()> {
        if !packet.pusi {
            // sections are expected to fit one packet; continuations are dropped
            return Ok(());
        }

        let (psi, table_error) = match Psi::unmarshal(&packet.payload, true) {
            Ok(decoded) => decoded,
            Err(e) => return self.fail_or_warn(e),
        };
        if let Some(e) = table_error {
            if self.options.strict {
                return Err(e);
            }
            self.warn(e);
        }

        match &psi.table {
            Table::Pat(pat) => {
                for (&program, &pmt_pid) in &pat.programs {
                    // program 0 points at the NIT, not a PMT
                    if program != 0 {
                        self.pids_with_pmt.insert(pmt_pid, program);
                    }
                }
            }
            Table::Pmt(pmt) => {
                for (&es_pid, stream) in &pmt.streams {
                    self.streams.insert(es_pid, *stream);
                    match stream.stream_type.category() {
                        StreamCategory::Video
                        | StreamCategory::Audio
                        | StreamCategory::Metadata => {
                            let wait_rai = self.options.wait_rai;
                            self.aggregators
                                .entry(es_pid)
                                .or_insert_with(|| StreamAggregator::new(wait_rai));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        let best_effort = match &psi.table {
            Table::Scte35(section) => match &section.splice_command {
                SpliceCommand::SpliceInsert(insert) => insert
                    .splice_time
                    .as_ref()
                    .map(|st| section.pts_adjustment + st.pts),
                _ => None,
            },
            _ => None,
        }
        .or(self.last_dts);

        let t = best_effort.map(|raw| {
            let clock = self.clocks.entry(packet.pid).or_default();
            correct(&mut clock.pts, raw)
        });

        out.push(Container {
            pid: packet.pid,
            t,
            payload: Payload::Psi(psi),
        });
        Ok(())
    }

    fn fail_or_warn(&mut self, e: TsError) -> Result<()> {
        if self.options.strict {
            Err(e)
        } else {
            self.warn(e);
            Ok(())
        }
    }

    fn warn(&mut self, e: TsError) {
        warn!("demuxer recovered from: {e}");
        self.warnings.push(e);
    }
}
