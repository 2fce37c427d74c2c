//! Per-PID reassembly of partial PES fragments into complete PES packets.

use super::pes::{PartialPes, Pes};
use super::types::TsPacket;
use crate::error::{Result, TsError};
use bytes::BytesMut;

/// Hard cap on the bytes a single PES may accumulate before the queue is
/// considered runaway and discarded.
pub const PES_SOFT_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a random-access point before the first emission
    WaitingRai,
    /// No fragment queued; waiting for the next pusi to start a PES
    IdleEmpty,
    /// Fragments queued since the last pusi
    Accumulating,
}

/// Reassembles the TS packets of one PID into complete PES packets.
///
/// A packet with pusi set finalises whatever is queued and starts the next
/// PES; everything else appends. With `wait_rai` the aggregator drops
/// packets until the first random-access indicator so emission starts on a
/// resync point.
#[derive(Debug)]
pub struct StreamAggregator {
    state: State,
    queue: Vec<PartialPes>,
    queued_bytes: usize,
}

impl StreamAggregator {
    /// Creates an aggregator, optionally gated on a random-access point.
    pub fn new(wait_rai: bool) -> Self {
        Self {
            state: if wait_rai {
                State::WaitingRai
            } else {
                State::IdleEmpty
            },
            queue: Vec::new(),
            queued_bytes: 0,
        }
    }

    /// Feeds one TS packet; returns a PES when the packet completed one.
    ///
    /// After an error the aggregator needs a [`reset`] before it can
    /// continue; a lenient caller resets and moves on, a strict caller
    /// propagates.
    ///
    /// [`reset`]: StreamAggregator::reset
    pub fn push(&mut self, packet: &TsPacket) -> Result<Option<Pes>> {
        if self.state == State::WaitingRai {
            if !packet.random_access {
                return Ok(None);
            }
            // the random-access packet itself opens accumulation, pusi or not
            let mut fragment = PartialPes::unmarshal(&packet.payload, packet.pusi)?;
            fragment.discontinuity = packet.discontinuity;
            self.state = State::Accumulating;
            self.enqueue(fragment)?;
            return Ok(None);
        }

        if self.state == State::IdleEmpty && !packet.pusi {
            // mid-PES fragment with no leader to attach to
            return Ok(None);
        }

        let mut fragment = PartialPes::unmarshal(&packet.payload, packet.pusi)?;
        fragment.discontinuity = packet.discontinuity;

        let completed = if packet.pusi && !self.queue.is_empty() {
            Some(self.finalize()?)
        } else {
            None
        };
        self.state = State::Accumulating;
        self.enqueue(fragment)?;

        Ok(completed)
    }

    /// Finalises whatever is queued, for end-of-stream draining.
    pub fn flush(&mut self) -> Result<Option<Pes>> {
        if self.queue.is_empty() {
            return Ok(None);
        }
        let pes = self.finalize()?;
        self.state = State::IdleEmpty;
        Ok(Some(pes))
    }

    /// Discards all queued fragments and returns to the initial state.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
        if self.state == State::Accumulating {
            self.state = State::IdleEmpty;
        }
    }

    fn enqueue(&mut self, fragment: PartialPes) -> Result<()> {
        self.queued_bytes += fragment.data.len();
        self.queue.push(fragment);
        if self.queued_bytes > PES_SOFT_LIMIT {
            return Err(TsError::InvalidData(format!(
                "PES exceeded the {PES_SOFT_LIMIT}-byte accumulation limit"
            )));
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<Pes> {
        let queue = std::mem::take(&mut self.queue);
        self.queued_bytes = 0;

        let leader = &queue[0];
        let stream_id = leader.stream_id.unwrap_or(0);
        for fragment in &queue[1..] {
            if fragment.stream_id.is_some() && fragment.stream_id != leader.stream_id {
                return Err(TsError::MultiStreamId);
            }
        }

        let mut data = BytesMut::with_capacity(queue.iter().map(|f| f.data.len()).sum());
        for fragment in &queue {
            data.extend_from_slice(&fragment.data);
        }

        let declared = leader.length;
        if declared != 0 {
            if data.len() < declared {
                return Err(TsError::SizeMismatch {
                    expected: declared,
                    actual: data.len(),
                });
            }
            data.truncate(declared);
        }

        Ok(Pes {
            stream_id,
            pts: leader.pts,
            dts: leader.dts,
            is_aligned: leader.is_aligned,
            discontinuity: leader.discontinuity,
            data: data.freeze(),
        })
    }
}
