//! The multiplexer: declared programs and media samples in, TS bytes out.
//!
//! The muxer owns a single program (number 1) whose PMT PID is
//! configurable. The caller declares elementary streams, then interleaves
//! calls to [`Muxer::mux_pat`], [`Muxer::mux_pmt`], [`Muxer::mux_pcr`] and
//! [`Muxer::mux_sample`]; every call returns encoded packets and the
//! caller owns their ordering and pacing.

use super::pes::Pes;
use super::psi::{Psi, PsiSyntax, Table};
use super::types::{
    lookup_stream_type, Descriptor, Pat, Pmt, PmtStream, StreamCategory, TsPacket,
    DEFAULT_FIRST_ES_PID, DEFAULT_PMT_PID, PID_NONE, PID_PAT, TABLE_ID_PAT, TABLE_ID_PMT,
    TS_PAYLOAD_SIZE,
};
use crate::error::{Result, TsError};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

/// Options for declaring an elementary stream
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Explicit PID; allocated from [`DEFAULT_FIRST_ES_PID`] upwards when unset
    pub pid: Option<u16>,
    /// Mark this stream as the program's PCR carrier
    pub pcr: bool,
    /// Program-info descriptors to append to the PMT
    pub descriptors: Vec<Descriptor>,
}

/// Options for muxing one media sample
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleOptions {
    /// Decoding timestamp in nanoseconds, when it differs from the PTS
    pub dts: Option<u64>,
    /// Mark the first packet as a random-access point
    pub sync: bool,
    /// Attach a PCR (equal to the DTS, or the PTS) to the first packet
    pub send_pcr: bool,
}

/// A value-based TS multiplexer for one program.
#[derive(Debug)]
pub struct Muxer {
    pmt_pid: u16,
    pat: Pat,
    pmt: Pmt,
    pat_version: u8,
    pmt_version: u8,
    continuity: HashMap<u16, u8>,
    stream_ids: HashMap<u16, u8>,
}

impl Default for Muxer {
    fn default() -> Self {
        Self::with_pmt_pid(DEFAULT_PMT_PID)
    }
}

impl Muxer {
    /// Creates a muxer with the default PMT PID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a muxer whose program map lives on `pmt_pid`.
    pub fn with_pmt_pid(pmt_pid: u16) -> Self {
        let mut pat = Pat::new();
        pat.programs.insert(1, pmt_pid);
        Self {
            pmt_pid,
            pat,
            pmt: Pmt::new(),
            pat_version: 0,
            pmt_version: 0,
            continuity: HashMap::new(),
            stream_ids: HashMap::new(),
        }
    }

    /// The PID currently flagged as PCR carrier, [`PID_NONE`] if none.
    pub fn pcr_pid(&self) -> u16 {
        self.pmt.pcr_pid
    }

    /// The program map as it would be emitted by [`Muxer::mux_pmt`].
    pub fn pmt(&self) -> &Pmt {
        &self.pmt
    }

    /// Declares an elementary stream and returns its PID.
    ///
    /// The PES stream id is derived from the stream type's category:
    /// video streams count up from 0xE0, audio from 0xC0, IPMP and
    /// metadata from 0xF0, and everything else shares private_stream_1
    /// (0xBD).
    pub fn add_elementary_stream(
        &mut self,
        stream_type_id: u8,
        options: StreamOptions,
    ) -> Result<u16> {
        let stream_type = lookup_stream_type(stream_type_id)
            .ok_or(TsError::UnknownStreamType(stream_type_id))?;

        let pid = options
            .pid
            .unwrap_or(DEFAULT_FIRST_ES_PID + self.pmt.streams.len() as u16);
        if self.pmt.streams.contains_key(&pid) || pid == self.pmt_pid || pid == PID_PAT {
            return Err(TsError::DuplicatePid(pid));
        }

        let category = stream_type.category();
        let stream_id = match category {
            StreamCategory::Video => 0xE0 + self.category_count(category),
            StreamCategory::Audio => 0xC0 + self.category_count(category),
            StreamCategory::Ipmp | StreamCategory::Metadata => {
                0xF0 + self.category_count(category)
            }
            _ => 0xBD,
        };

        if options.pcr {
            self.pmt.pcr_pid = pid;
        }
        self.pmt.program_info.extend(options.descriptors);
        self.pmt.streams.insert(
            pid,
            PmtStream {
                stream_type_id,
                stream_type,
            },
        );
        self.stream_ids.insert(pid, stream_id);
        self.pmt_version = self.pmt_version.wrapping_add(1);

        Ok(pid)
    }

    /// Emits the PAT as one TS packet.
    pub fn mux_pat(&mut self) -> Result<BytesMut> {
        let psi = Psi::new(
            TABLE_ID_PAT,
            Some(PsiSyntax {
                version_number: self.pat_version & 0x1F,
                ..Default::default()
            }),
            Table::Pat(self.pat.clone()),
        );
        self.mux_psi(PID_PAT, &psi)
    }

    /// Emits the PMT as one TS packet.
    pub fn mux_pmt(&mut self) -> Result<BytesMut> {
        let psi = Psi::new(
            TABLE_ID_PMT,
            Some(PsiSyntax {
                version_number: self.pmt_version & 0x1F,
                ..Default::default()
            }),
            Table::Pmt(self.pmt.clone()),
        );
        self.mux_psi(self.pmt_pid, &psi)
    }

    /// Marshals an arbitrary PSI section into one TS packet on `pid`.
    ///
    /// This is how inline sections such as SCTE-35 cues enter the stream.
    pub fn mux_psi(&mut self, pid: u16, psi: &Psi) -> Result<BytesMut> {
        let section = psi.marshal()?;
        if section.len() > TS_PAYLOAD_SIZE {
            return Err(TsError::InvalidData(
                "PSI section does not fit a single TS packet".into(),
            ));
        }

        let packet = TsPacket {
            pid,
            pusi: true,
            continuity_counter: self.next_continuity(pid),
            payload: section.freeze(),
            ..Default::default()
        };
        packet.marshal()
    }

    /// Emits a payload-free packet carrying a PCR on the PCR PID.
    pub fn mux_pcr(&mut self, pcr_ns: u64) -> Result<BytesMut> {
        let pid = self.pmt.pcr_pid;
        if pid == PID_NONE {
            return Err(TsError::NotPcrPid);
        }

        let packet = TsPacket {
            pid,
            pcr: Some(pcr_ns),
            continuity_counter: self.next_continuity(pid),
            ..Default::default()
        };
        packet.marshal()
    }

    /// Packs one media sample into a PES and chunks it into TS packets.
    ///
    /// The first packet carries the pusi flag and at most 176 payload
    /// bytes, leaving room for a PCR-bearing adaptation field; subsequent
    /// packets carry up to 184.
    pub fn mux_sample(
        &mut self,
        pid: u16,
        payload: &[u8],
        pts_ns: u64,
        options: SampleOptions,
    ) -> Result<BytesMut> {
        let Some(&stream_id) = self.stream_ids.get(&pid) else {
            return Err(TsError::InvalidData(format!(
                "pid {pid:#06x} is not a declared stream"
            )));
        };
        if options.send_pcr && self.pmt.pcr_pid != pid {
            return Err(TsError::NotPcrPid);
        }

        let mut pes = Pes::new(stream_id, Bytes::copy_from_slice(payload)).with_pts(pts_ns);
        if let Some(dts) = options.dts {
            pes = pes.with_dts(dts);
        }
        let wire = pes.marshal()?.freeze();

        let mut out = BytesMut::with_capacity((wire.len() / TS_PAYLOAD_SIZE + 1) * 188);
        let mut offset = 0;
        let mut first = true;
        while offset < wire.len() {
            let budget = if first {
                TS_PAYLOAD_SIZE - 8
            } else {
                TS_PAYLOAD_SIZE
            };
            let chunk = budget.min(wire.len() - offset);

            let packet = TsPacket {
                pid,
                pusi: first,
                continuity_counter: self.next_continuity(pid),
                random_access: first && options.sync,
                pcr: (first && options.send_pcr).then(|| options.dts.unwrap_or(pts_ns)),
                payload: wire.slice(offset..offset + chunk),
                ..Default::default()
            };
            out.extend_from_slice(&packet.marshal()?);

            offset += chunk;
            first = false;
        }

        Ok(out)
    }

    fn category_count(&self, category: StreamCategory) -> u8 {
        self.pmt
            .streams
            .values()
            .filter(|s| s.stream_type.category() == category)
            .count() as u8
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let current = *counter;
        *counter = (current + 1) & 0x0F;
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::parser;
    use crate::ts::types::TS_PACKET_SIZE;

    #[test]
    fn test_stream_id_assignment_by_category() {
        let mut muxer = Muxer::new();
        let video_a = muxer
            .add_elementary_stream(0x1B, StreamOptions::default())
            .unwrap();
        let audio_a = muxer
            .add_elementary_stream(0x0F, StreamOptions::default())
            .unwrap();
        let video_b = muxer
            .add_elementary_stream(0x24, StreamOptions::default())
            .unwrap();
        let cues = muxer
            .add_elementary_stream(0x86, StreamOptions::default())
            .unwrap();
        let metadata = muxer
            .add_elementary_stream(0x15, StreamOptions::default())
            .unwrap();

        assert_eq!(
            (video_a, audio_a, video_b, cues, metadata),
            (0x100, 0x101, 0x102, 0x103, 0x104)
        );
        assert_eq!(muxer.stream_ids[&video_a], 0xE0);
        assert_eq!(muxer.stream_ids[&video_b], 0xE1);
        assert_eq!(muxer.stream_ids[&audio_a], 0xC0);
        assert_eq!(muxer.stream_ids[&cues], 0xBD);
        assert_eq!(muxer.stream_ids[&metadata], 0xF0);
    }

    #[test]
    fn test_duplicate_pid_is_rejected() {
        let mut muxer = Muxer::new();
        muxer
            .add_elementary_stream(
                0x1B,
                StreamOptions {
                    pid: Some(0x200),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(
            muxer.add_elementary_stream(
                0x0F,
                StreamOptions {
                    pid: Some(0x200),
                    ..Default::default()
                },
            ),
            Err(TsError::DuplicatePid(0x200))
        );
        assert_eq!(
            muxer.add_elementary_stream(
                0x0F,
                StreamOptions {
                    pid: Some(DEFAULT_PMT_PID),
                    ..Default::default()
                },
            ),
            Err(TsError::DuplicatePid(DEFAULT_PMT_PID))
        );
    }

    #[test]
    fn test_unknown_stream_type_is_rejected() {
        let mut muxer = Muxer::new();
        assert_eq!(
            muxer.add_elementary_stream(0xE7, StreamOptions::default()),
            Err(TsError::UnknownStreamType(0xE7))
        );
    }

    #[test]
    fn test_pcr_requires_a_carrier() {
        let mut muxer = Muxer::new();
        assert_eq!(muxer.mux_pcr(0), Err(TsError::NotPcrPid));

        let pid = muxer
            .add_elementary_stream(
                0x1B,
                StreamOptions {
                    pcr: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(muxer.pcr_pid(), pid);

        let bytes = muxer.mux_pcr(1_000_000_000).unwrap();
        let packet = parser::parse_packet(&bytes).unwrap();
        assert_eq!(packet.pid, pid);
        assert_eq!(packet.pcr, Some(1_000_000_000));
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_send_pcr_on_non_carrier_is_rejected() {
        let mut muxer = Muxer::new();
        let pid = muxer
            .add_elementary_stream(0x1B, StreamOptions::default())
            .unwrap();

        let options = SampleOptions {
            send_pcr: true,
            ..Default::default()
        };
        assert_eq!(
            muxer.mux_sample(pid, &[0u8; 16], 0, options),
            Err(TsError::NotPcrPid)
        );
    }

    #[test]
    fn test_sample_chunking_and_continuity() {
        let mut muxer = Muxer::new();
        let pid = muxer
            .add_elementary_stream(0x1B, StreamOptions::default())
            .unwrap();

        // 500 payload bytes behind a 14-byte PES header: 176 + 184 + 154 split
        let bytes = muxer
            .mux_sample(pid, &vec![0xAB; 500], 1_000_000_000, SampleOptions::default())
            .unwrap();
        assert_eq!(bytes.len(), 3 * TS_PACKET_SIZE);

        let (packets, tail) = parser::parse_many(&bytes);
        assert!(tail.is_empty());
        let packets: Vec<_> = packets.into_iter().map(|p| p.unwrap()).collect();

        assert!(packets[0].pusi);
        assert!(!packets[1].pusi);
        assert!(!packets[2].pusi);
        assert_eq!(packets[0].payload.len(), 176);
        assert_eq!(packets[1].payload.len(), 184);
        let continuity: Vec<u8> = packets.iter().map(|p| p.continuity_counter).collect();
        assert_eq!(continuity, vec![0, 1, 2]);

        // the next sample continues the counter
        let bytes = muxer
            .mux_sample(pid, &[0x01], 2_000_000_000, SampleOptions::default())
            .unwrap();
        let packet = parser::parse_packet(&bytes).unwrap();
        assert_eq!(packet.continuity_counter, 3);
    }

    #[test]
    fn test_sync_sample_sets_random_access() {
        let mut muxer = Muxer::new();
        let pid = muxer
            .add_elementary_stream(0x1B, StreamOptions::default())
            .unwrap();

        let options = SampleOptions {
            sync: true,
            ..Default::default()
        };
        let bytes = muxer.mux_sample(pid, &[0u8; 8], 0, options).unwrap();
        let packet = parser::parse_packet(&bytes).unwrap();
        assert!(packet.random_access);
    }

    #[test]
    fn test_pat_and_pmt_packets_decode() {
        let mut muxer = Muxer::new();
        muxer
            .add_elementary_stream(
                0x1B,
                StreamOptions {
                    pcr: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let pat_bytes = muxer.mux_pat().unwrap();
        let pat_packet = parser::parse_packet(&pat_bytes).unwrap();
        assert_eq!(pat_packet.pid, PID_PAT);
        assert!(pat_packet.pusi);

        let pmt_bytes = muxer.mux_pmt().unwrap();
        let pmt_packet = parser::parse_packet(&pmt_bytes).unwrap();
        assert_eq!(pmt_packet.pid, DEFAULT_PMT_PID);

        use crate::ts::psi::{Psi, Table};
        let (psi, err) = Psi::unmarshal(&pmt_packet.payload, true).unwrap();
        assert!(err.is_none());
        match psi.table {
            Table::Pmt(pmt) => {
                assert_eq!(pmt.pcr_pid, 0x100);
                assert_eq!(pmt.streams.len(), 1);
            }
            other => panic!("expected a PMT, got {other:?}"),
        }
        // one stream added, so the version advanced once
        assert_eq!(psi.header.syntax.unwrap().version_number, 1);
    }
}
