//! PES packet codec.
//!
//! [`Pes`] is a complete packetized elementary stream unit; [`PartialPes`]
//! is what a single TS packet contributes to one: the leader fragment
//! carries the header, continuation fragments carry raw bytes. Reassembly
//! lives in the aggregator; this module is only the wire syntax.

use super::clock;
use crate::error::{Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};

/// Returns whether a stream id carries the optional PES header.
///
/// Per ISO 13818-1: everything does, except the program stream map and
/// directory, padding, private_stream_2, ECM/EMM, DSM-CC, and H.222.1
/// type E streams.
pub fn has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

fn is_video_stream_id(stream_id: u8) -> bool {
    (0xE0..=0xEF).contains(&stream_id)
}

/// A complete PES packet.
///
/// Timestamps are nanoseconds. When only a PTS is present, consumers treat
/// the decoding timestamp as equal to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pes {
    /// PES stream id
    pub stream_id: u8,
    /// Presentation timestamp in nanoseconds
    pub pts: Option<u64>,
    /// Decoding timestamp in nanoseconds; never later than the PTS
    pub dts: Option<u64>,
    /// Data alignment indicator
    pub is_aligned: bool,
    /// Set when the carrying TS packet signalled a discontinuity
    pub discontinuity: bool,
    /// Elementary stream payload
    pub data: Bytes,
}

impl Pes {
    /// Creates an aligned PES packet with no timestamps.
    pub fn new(stream_id: u8, data: Bytes) -> Self {
        Self {
            stream_id,
            pts: None,
            dts: None,
            is_aligned: true,
            discontinuity: false,
            data,
        }
    }

    /// Sets the presentation timestamp, in nanoseconds.
    pub fn with_pts(mut self, pts: u64) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Sets the decoding timestamp, in nanoseconds.
    pub fn with_dts(mut self, dts: u64) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Encodes the packet.
    ///
    /// The optional header is emitted only for stream ids that carry one.
    /// A packet whose length field would overflow 16 bits is emitted with
    /// length zero, the "unbounded" convention.
    pub fn marshal(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(9 + 10 + self.data.len());
        buf.put_u8(0x00);
        buf.put_u8(0x00);
        buf.put_u8(0x01);
        buf.put_u8(self.stream_id);

        if !has_optional_header(self.stream_id) {
            let size = self.data.len();
            buf.put_u16(if size > 0xFFFF { 0 } else { size as u16 });
            buf.extend_from_slice(&self.data);
            return Ok(buf);
        }

        if self.dts.is_some() && self.pts.is_none() {
            return Err(TsError::InvalidData("PES with a DTS but no PTS".into()));
        }

        let header_data_length: u8 = match (self.pts, self.dts) {
            (Some(_), Some(_)) => 10,
            (Some(_), None) => 5,
            _ => 0,
        };
        let size = self.data.len() + 3 + header_data_length as usize;
        buf.put_u16(if size > 0xFFFF { 0 } else { size as u16 });

        let mut flags = 0x80u8;
        if self.is_aligned {
            flags |= 0x04;
        }
        buf.put_u8(flags);

        let pts_dts_flags: u8 = match (self.pts, self.dts) {
            (Some(_), Some(_)) => 0b11,
            (Some(_), None) => 0b10,
            _ => 0b00,
        };
        buf.put_u8(pts_dts_flags << 6);
        buf.put_u8(header_data_length);

        if let Some(pts) = self.pts {
            let marker = if self.dts.is_some() { 0x30 } else { 0x20 };
            write_timestamp(&mut buf, marker, clock::ns_to_pts(pts));
        }
        if let Some(dts) = self.dts {
            write_timestamp(&mut buf, 0x10, clock::ns_to_pts(dts));
        }

        buf.extend_from_slice(&self.data);
        Ok(buf)
    }
}

/// What one TS packet contributes to a PES.
///
/// The leader (from a pusi packet) carries the header fields and the
/// declared payload `length`; continuation fragments have no stream id and
/// only bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialPes {
    /// Stream id, present on the leader fragment only
    pub stream_id: Option<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: Option<u64>,
    /// Decoding timestamp in nanoseconds
    pub dts: Option<u64>,
    /// Data alignment indicator
    pub is_aligned: bool,
    /// Discontinuity carried over from the TS packet
    pub discontinuity: bool,
    /// Declared total payload length; 0 means unbounded until the next pusi
    pub length: usize,
    /// Payload bytes this fragment contributes
    pub data: Bytes,
}

impl PartialPes {
    /// Decodes a TS packet payload into a fragment.
    ///
    /// With `pusi` set the payload must open a PES packet and is parsed as
    /// the leader; otherwise the bytes are taken verbatim as a
    /// continuation.
    pub fn unmarshal(payload: &[u8], pusi: bool) -> Result<PartialPes> {
        if !pusi {
            return Ok(PartialPes {
                stream_id: None,
                pts: None,
                dts: None,
                is_aligned: false,
                discontinuity: false,
                length: 0,
                data: Bytes::copy_from_slice(payload),
            });
        }

        if payload.len() < 6 {
            return Err(TsError::InvalidData("PES header truncated".into()));
        }
        if payload[0] != 0x00 || payload[1] != 0x00 || payload[2] != 0x01 {
            return Err(TsError::InvalidData("missing PES start code".into()));
        }

        let stream_id = payload[3];
        let packet_length = u16::from_be_bytes([payload[4], payload[5]]) as usize;
        if packet_length == 0 && !is_video_stream_id(stream_id) {
            return Err(TsError::InvalidData(
                "unbounded PES on a non-video stream".into(),
            ));
        }

        if !has_optional_header(stream_id) {
            return Ok(PartialPes {
                stream_id: Some(stream_id),
                pts: None,
                dts: None,
                is_aligned: false,
                discontinuity: false,
                length: packet_length,
                data: Bytes::copy_from_slice(&payload[6..]),
            });
        }

        if payload.len() < 9 {
            return Err(TsError::InvalidData("PES optional header truncated".into()));
        }
        if payload[6] >> 6 != 0b10 {
            return Err(TsError::InvalidData(
                "bad PES optional header marker".into(),
            ));
        }
        if (payload[6] >> 4) & 0b11 != 0 {
            return Err(TsError::UnsupportedPacket("scrambled PES".into()));
        }
        let is_aligned = payload[6] & 0x04 != 0;

        let pts_dts_flags = payload[7] >> 6;
        let header_data_length = payload[8] as usize;
        if 9 + header_data_length > payload.len() {
            return Err(TsError::InvalidData("PES header data truncated".into()));
        }
        let header_data = &payload[9..9 + header_data_length];

        let (pts, dts) = match pts_dts_flags {
            0b00 => (None, None),
            0b01 => {
                return Err(TsError::InvalidData(
                    "forbidden pts_dts_flags value".into(),
                ));
            }
            0b10 => (Some(parse_timestamp(header_data, 0, 0b0010)?), None),
            _ => (
                Some(parse_timestamp(header_data, 0, 0b0011)?),
                Some(parse_timestamp(header_data, 5, 0b0001)?),
            ),
        };

        let declared = if packet_length == 0 {
            0
        } else {
            packet_length
                .checked_sub(3 + header_data_length)
                .ok_or_else(|| {
                    TsError::InvalidData("PES length shorter than its header".into())
                })?
        };

        Ok(PartialPes {
            stream_id: Some(stream_id),
            pts: pts.map(clock::pts_to_ns),
            dts: dts.map(clock::pts_to_ns),
            is_aligned,
            discontinuity: false,
            length: declared,
            data: Bytes::copy_from_slice(&payload[9 + header_data_length..]),
        })
    }
}

fn parse_timestamp(header_data: &[u8], offset: usize, prefix: u8) -> Result<u64> {
    if offset + 5 > header_data.len() {
        return Err(TsError::InvalidData("PES timestamp truncated".into()));
    }
    let b = &header_data[offset..offset + 5];
    if b[0] >> 4 != prefix {
        return Err(TsError::InvalidData("PES timestamp prefix mismatch".into()));
    }
    Ok(((b[0] as u64 & 0x0E) << 29)
        | ((b[1] as u64) << 22)
        | ((b[2] as u64 & 0xFE) << 14)
        | ((b[3] as u64) << 7)
        | ((b[4] as u64) >> 1))
}

fn write_timestamp(buf: &mut BytesMut, marker: u8, ticks: u64) {
    let ts = ticks & 0x1_FFFF_FFFF;
    buf.put_u8(marker | ((ts >> 29) & 0x0E) as u8 | 0x01);
    buf.put_u16((((ts >> 14) & 0xFFFE) | 0x01) as u16);
    buf.put_u16((((ts << 1) & 0xFFFE) | 0x01) as u16);
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_marshal_with_pts_and_dts_exact_bytes() {
        let data: Vec<u8> = (0x01..=0x0F).collect();
        let pes = Pes::new(0xE0, Bytes::from(data.clone()))
            .with_dts(10_000_000)
            .with_pts(20_000_000);

        let wire = pes.marshal().unwrap();
        let expected: &[u8] = &[
            0x00, 0x00, 0x01, 0xE0, 0x00, 0x1C, 0x84, 0xC0, 0x0A, 0x31, 0x00, 0x01, 0x0E, 0x11,
            0x11, 0x00, 0x01, 0x07, 0x09, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09,
            0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
        ];
        assert_eq!(&wire[..], expected);

        let back = PartialPes::unmarshal(&wire, true).unwrap();
        assert_eq!(back.stream_id, Some(0xE0));
        assert_eq!(back.pts, Some(20_000_000));
        assert_eq!(back.dts, Some(10_000_000));
        assert!(back.is_aligned);
        assert_eq!(back.length, data.len());
        assert_eq!(&back.data[..], &data[..]);
    }

    #[test]
    fn test_pts_only_round_trip() {
        let pes = Pes::new(0xC0, Bytes::from_static(b"audio")).with_pts(1_000_000_000);
        let wire = pes.marshal().unwrap();

        let back = PartialPes::unmarshal(&wire, true).unwrap();
        assert_eq!(back.stream_id, Some(0xC0));
        assert_eq!(back.pts, Some(1_000_000_000));
        assert_eq!(back.dts, None);
        assert_eq!(&back.data[..], b"audio");
    }

    #[test]
    fn test_headerless_stream_id() {
        let pes = Pes::new(0xBE, Bytes::from_static(&[0xFF; 8]));
        let wire = pes.marshal().unwrap();
        assert_eq!(wire.len(), 6 + 8);
        assert_eq!(u16::from_be_bytes([wire[4], wire[5]]), 8);

        let back = PartialPes::unmarshal(&wire, true).unwrap();
        assert_eq!(back.stream_id, Some(0xBE));
        assert_eq!(back.length, 8);
        assert_eq!(back.data.len(), 8);
    }

    #[test]
    fn test_unbounded_length_is_video_only() {
        // hand-build an audio PES claiming length 0
        let wire = [0x00, 0x00, 0x01, 0xC0, 0x00, 0x00, 0x80, 0x00, 0x00];
        assert!(matches!(
            PartialPes::unmarshal(&wire, true),
            Err(TsError::InvalidData(_))
        ));

        let wire = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00, 0xAB];
        let frag = PartialPes::unmarshal(&wire, true).unwrap();
        assert_eq!(frag.length, 0);
        assert_eq!(&frag.data[..], &[0xAB]);
    }

    #[test]
    fn test_forbidden_pts_dts_flags() {
        let wire = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x08, 0x80, 0x40, 0x05, 0, 0, 0, 0, 0];
        assert!(matches!(
            PartialPes::unmarshal(&wire, true),
            Err(TsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_scrambled_pes_is_unsupported() {
        let wire = [0x00, 0x00, 0x01, 0xE0, 0x00, 0x03, 0xB0, 0x00, 0x00];
        assert!(matches!(
            PartialPes::unmarshal(&wire, true),
            Err(TsError::UnsupportedPacket(_))
        ));
    }

    #[test]
    fn test_continuation_fragment() {
        let frag = PartialPes::unmarshal(&[0xDE, 0xAD, 0xBE, 0xEF], false).unwrap();
        assert_eq!(frag.stream_id, None);
        assert_eq!(frag.length, 0);
        assert_eq!(&frag.data[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_oversized_pes_marshals_as_unbounded() {
        let pes = Pes::new(0xE0, Bytes::from(vec![0u8; 0x10000]));
        let wire = pes.marshal().unwrap();
        assert_eq!(u16::from_be_bytes([wire[4], wire[5]]), 0);
    }

    #[test]
    fn test_dts_without_pts_is_rejected() {
        let pes = Pes::new(0xE0, Bytes::new()).with_dts(1);
        assert!(pes.marshal().is_err());
    }

    #[quickcheck]
    fn prop_90khz_resolution_timestamps_round_trip(ticks: u64, dts_delta: u16) -> bool {
        let pts_ticks = ticks & 0x1_FFFF_FFFF;
        let dts_ticks = pts_ticks.saturating_sub(dts_delta as u64);
        let pes = Pes::new(0xE0, Bytes::from_static(b"payload"))
            .with_pts(clock::pts_to_ns(pts_ticks))
            .with_dts(clock::pts_to_ns(dts_ticks));

        let wire = pes.marshal().unwrap();
        let back = PartialPes::unmarshal(&wire, true).unwrap();
        back.pts == pes.pts && back.dts == pes.dts
    }

    #[quickcheck]
    fn prop_arbitrary_ns_timestamps_are_within_one_tick(ns: u64) -> bool {
        // below the 33-bit wrap so the encoded counter does not alias
        let ns = ns % 95_000_000_000_000;
        let pes = Pes::new(0xE0, Bytes::new()).with_pts(ns);

        let wire = pes.marshal().unwrap();
        let back = PartialPes::unmarshal(&wire, true).unwrap();
        back.pts.unwrap().abs_diff(ns) <= 11_111
    }
}
