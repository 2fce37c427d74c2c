use super::clock;
use crate::error::{Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

// Constants
/// Size of a Transport Stream packet in bytes
pub const TS_PACKET_SIZE: usize = 188;
/// Size of a Transport Stream header in bytes
pub const TS_HEADER_SIZE: usize = 4;
/// Maximum payload bytes carried by a single TS packet
pub const TS_PAYLOAD_SIZE: usize = 184;
/// Sync byte opening every TS packet
pub const SYNC_BYTE: u8 = 0x47;

// PIDs
/// PID carrying the Program Association Table (PAT)
pub const PID_PAT: u16 = 0x0000;
/// PID reserved for null packets
pub const PID_NULL: u16 = 0x1FFF;
/// Sentinel PID meaning "no PID assigned" (e.g. a PMT with no PCR carrier)
pub const PID_NONE: u16 = 0x1FFF;
/// Default PID for the single program's PMT when muxing
pub const DEFAULT_PMT_PID: u16 = 0x1000;
/// First PID handed out to elementary streams when muxing
pub const DEFAULT_FIRST_ES_PID: u16 = 0x0100;

// Table IDs
/// Table ID for the Program Association Table (PAT)
pub const TABLE_ID_PAT: u8 = 0x00;
/// Table ID for the Program Map Table (PMT)
pub const TABLE_ID_PMT: u8 = 0x02;
/// Table ID for SCTE-35 splice information sections
pub const TABLE_ID_SCTE35: u8 = 0xFC;

/// Largest legal `section_length` of a PSI section
pub const MAX_SECTION_LENGTH: usize = 4093;

/// Coarse classification of a PID, used for demuxer dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidClass {
    /// PID 0x0000, the PAT
    Pat,
    /// The general-purpose range that may carry PSI sections or elementary streams
    Psi,
    /// PID 0x1FFF, stuffing
    NullPacket,
    /// Reserved PIDs the demuxer does not route
    Unsupported,
}

impl PidClass {
    /// Classifies a 13-bit PID.
    pub fn of(pid: u16) -> PidClass {
        match pid {
            PID_PAT => PidClass::Pat,
            PID_NULL => PidClass::NullPacket,
            0x0020..=0x1FFA | 0x1FFC..=0x1FFE => PidClass::Psi,
            _ => PidClass::Unsupported,
        }
    }
}

/// Transport scrambling control of a TS packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scrambling {
    /// Not scrambled
    None,
    /// Reserved value 0b01
    Reserved,
    /// Scrambled with the even key
    EvenKey,
    /// Scrambled with the odd key
    OddKey,
}

impl Scrambling {
    /// Decodes the two scrambling-control bits.
    pub fn from_bits(bits: u8) -> Scrambling {
        match bits & 0b11 {
            0b00 => Scrambling::None,
            0b01 => Scrambling::Reserved,
            0b10 => Scrambling::EvenKey,
            _ => Scrambling::OddKey,
        }
    }

    /// The two wire bits for this value.
    pub fn bits(self) -> u8 {
        match self {
            Scrambling::None => 0b00,
            Scrambling::Reserved => 0b01,
            Scrambling::EvenKey => 0b10,
            Scrambling::OddKey => 0b11,
        }
    }
}

impl Default for Scrambling {
    fn default() -> Self {
        Scrambling::None
    }
}

/// Broad category of an elementary stream, derived from its stream type.
///
/// Categories drive demuxer aggregator creation (video, audio, and metadata
/// streams are reassembled into PES) and muxer stream-id assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCategory {
    /// Video elementary streams
    Video,
    /// Audio elementary streams
    Audio,
    /// Subtitle streams
    Subtitles,
    /// Cue/ad-insertion signalling (SCTE-35)
    Cues,
    /// Metadata carried in PES
    Metadata,
    /// IPMP control streams
    Ipmp,
    /// Generic data and private sections
    Data,
    /// Anything not in the table
    Other,
}

/// Tag for a known elementary stream type.
///
/// The wire `stream_type_id` is kept alongside this tag in [`PmtStream`] so
/// that PMT sections round-trip even for ids the table does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    PrivateSections,
    PesPrivateData,
    /// DVB subtitles: stream type 0x06 qualified by descriptor 0x59
    DvbSubtitles,
    DsmCc,
    AdtsAac,
    Mpeg4Video,
    LatmAac,
    MetadataPes,
    Ipmp,
    H264,
    Hevc,
    Vvc,
    Ac3,
    Scte35,
    Eac3,
    /// Stream type id outside the table
    Other,
}

/// Looks up a `stream_type_id` in the authoritative stream-type table.
///
/// Returns `None` for ids outside the table; the demuxer treats those as
/// [`StreamType::Other`], while the muxer rejects them.
pub fn lookup_stream_type(id: u8) -> Option<StreamType> {
    use StreamType::*;
    Some(match id {
        0x01 => Mpeg1Video,
        0x02 => Mpeg2Video,
        0x03 => Mpeg1Audio,
        0x04 => Mpeg2Audio,
        0x05 => PrivateSections,
        0x06 => PesPrivateData,
        0x0B => DsmCc,
        0x0F => AdtsAac,
        0x10 => Mpeg4Video,
        0x11 => LatmAac,
        0x15 => MetadataPes,
        0x1A => Ipmp,
        0x1B => H264,
        0x24 => Hevc,
        0x33 => Vvc,
        0x81 => Ac3,
        0x86 => Scte35,
        0x87 => Eac3,
        _ => return None,
    })
}

impl StreamType {
    /// Total version of [`lookup_stream_type`]: unknown ids become `Other`.
    pub fn from_id(id: u8) -> StreamType {
        lookup_stream_type(id).unwrap_or(StreamType::Other)
    }

    /// The category this stream type belongs to.
    pub fn category(self) -> StreamCategory {
        use StreamType::*;
        match self {
            Mpeg1Video | Mpeg2Video | Mpeg4Video | H264 | Hevc | Vvc => StreamCategory::Video,
            Mpeg1Audio | Mpeg2Audio | AdtsAac | LatmAac | Ac3 | Eac3 => StreamCategory::Audio,
            DvbSubtitles => StreamCategory::Subtitles,
            Scte35 => StreamCategory::Cues,
            MetadataPes => StreamCategory::Metadata,
            Ipmp => StreamCategory::Ipmp,
            PrivateSections | PesPrivateData | DsmCc => StreamCategory::Data,
            Other => StreamCategory::Other,
        }
    }
}

/// A descriptor attached to a program or elementary stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Tag identifying the descriptor type
    pub tag: u8,
    /// Raw descriptor payload
    pub data: Vec<u8>,
}

/// Program Association Table: program number to PMT PID.
///
/// Program number 0 conventionally points at the NIT and is carried through
/// unchanged when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pat {
    /// Mapping from program number to the PID carrying that program's PMT
    pub programs: BTreeMap<u16, u16>,
}

impl Pat {
    /// Creates an empty PAT
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the PAT body (the bytes between the PSI header and CRC).
    pub fn unmarshal(body: &[u8]) -> Result<Pat> {
        if body.len() % 4 != 0 {
            return Err(TsError::InvalidData(
                "PAT body length is not a multiple of 4".into(),
            ));
        }

        let mut programs = BTreeMap::new();
        for entry in body.chunks_exact(4) {
            let program_number = u16::from_be_bytes([entry[0], entry[1]]);
            let pid = u16::from_be_bytes([entry[2], entry[3]]) & 0x1FFF;
            programs.insert(program_number, pid);
        }
        Ok(Pat { programs })
    }

    /// Writes the PAT body into `buf`.
    pub fn marshal_into(&self, buf: &mut BytesMut) {
        for (&program_number, &pid) in &self.programs {
            buf.put_u16(program_number);
            buf.put_u16(pid & 0x1FFF | 7 << 13);
        }
    }
}

/// One elementary stream declared by a PMT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    /// The raw stream type id from the wire
    pub stream_type_id: u8,
    /// The tag derived from the stream type table
    pub stream_type: StreamType,
}

/// Program Map Table: PCR PID, program descriptors, and elementary streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    /// PID carrying the program's PCR; [`PID_NONE`] when the program has none
    pub pcr_pid: u16,
    /// Program-level descriptors, in insertion order
    pub program_info: Vec<Descriptor>,
    /// Elementary streams keyed by PID
    pub streams: BTreeMap<u16, PmtStream>,
}

impl Default for Pmt {
    fn default() -> Self {
        Self {
            pcr_pid: PID_NONE,
            program_info: Vec::new(),
            streams: BTreeMap::new(),
        }
    }
}

fn has_descriptor_tag(es_info: &[u8], wanted: u8) -> bool {
    let mut pos = 0;
    while pos + 2 <= es_info.len() {
        let tag = es_info[pos];
        let length = es_info[pos + 1] as usize;
        if tag == wanted {
            return true;
        }
        pos += 2 + length;
    }
    false
}

impl Pmt {
    /// Creates a PMT with no PCR carrier and no streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the PMT body (the bytes between the PSI header and CRC).
    ///
    /// ES-info descriptors are not retained; they are only scanned to
    /// qualify DVB subtitle streams (stream type 0x06 plus descriptor 0x59).
    pub fn unmarshal(body: &[u8]) -> Result<Pmt> {
        if body.len() < 4 {
            return Err(TsError::InvalidData("PMT body too short".into()));
        }

        let pcr_pid = u16::from_be_bytes([body[0], body[1]]) & 0x1FFF;
        let program_info_length =
            (u16::from_be_bytes([body[2], body[3]]) & 0x03FF) as usize;

        let mut pos = 4;
        if pos + program_info_length > body.len() {
            return Err(TsError::InvalidData(
                "program info extends beyond PMT body".into(),
            ));
        }
        let program_info = parse_descriptors(&body[pos..pos + program_info_length])?;
        pos += program_info_length;

        let mut streams = BTreeMap::new();
        while pos < body.len() {
            if pos + 5 > body.len() {
                return Err(TsError::InvalidData("truncated PMT stream entry".into()));
            }
            let stream_type_id = body[pos];
            let elementary_pid = u16::from_be_bytes([body[pos + 1], body[pos + 2]]) & 0x1FFF;
            let es_info_length =
                (u16::from_be_bytes([body[pos + 3], body[pos + 4]]) & 0x0FFF) as usize;
            pos += 5;

            if pos + es_info_length > body.len() {
                return Err(TsError::InvalidData(
                    "ES info extends beyond PMT body".into(),
                ));
            }
            let es_info = &body[pos..pos + es_info_length];
            pos += es_info_length;

            let mut stream_type = StreamType::from_id(stream_type_id);
            if stream_type == StreamType::PesPrivateData && has_descriptor_tag(es_info, 0x59) {
                stream_type = StreamType::DvbSubtitles;
            }

            streams.insert(
                elementary_pid,
                PmtStream {
                    stream_type_id,
                    stream_type,
                },
            );
        }

        Ok(Pmt {
            pcr_pid,
            program_info,
            streams,
        })
    }

    /// Writes the PMT body into `buf`. ES-info loops are emitted empty.
    pub fn marshal_into(&self, buf: &mut BytesMut) {
        buf.put_u16(self.pcr_pid & 0x1FFF | 7 << 13);

        let program_info_length: usize =
            self.program_info.iter().map(|d| 2 + d.data.len()).sum();
        buf.put_u16(0xF000 | (program_info_length as u16 & 0x03FF));
        for desc in &self.program_info {
            buf.put_u8(desc.tag);
            buf.put_u8(desc.data.len() as u8);
            buf.put_slice(&desc.data);
        }

        for (&pid, stream) in &self.streams {
            buf.put_u8(stream.stream_type_id);
            buf.put_u16(pid & 0x1FFF | 7 << 13);
            buf.put_u16(0xF000);
        }
    }
}

fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let tag = data[pos];
        let length = data[pos + 1] as usize;
        pos += 2;

        if pos + length > data.len() {
            return Err(TsError::InvalidData("descriptor data too short".into()));
        }
        descriptors.push(Descriptor {
            tag,
            data: data[pos..pos + length].to_vec(),
        });
        pos += length;
    }

    Ok(descriptors)
}

/// Decoded adaptation field of a TS packet.
///
/// The encode path only ever emits the flags byte, an optional PCR, and
/// stuffing; OPCR and splice countdown are decode-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationField {
    /// Discontinuity indicator
    pub discontinuity: bool,
    /// Random access indicator
    pub random_access: bool,
    /// Elementary stream priority indicator
    pub es_priority: bool,
    /// Program Clock Reference in nanoseconds, if present
    pub pcr: Option<u64>,
    /// Original Program Clock Reference in nanoseconds, if present
    pub opcr: Option<u64>,
    /// Packets remaining until a splicing point, if signalled
    pub splice_countdown: Option<i8>,
}

/// A single 188-byte Transport Stream packet.
///
/// This is the unit both sides of the codec speak: the parser produces it
/// from wire bytes and [`TsPacket::marshal`] turns it back into exactly one
/// frame. Timing is carried in nanoseconds; the 90 kHz / 27 MHz wire clocks
/// exist only inside the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPacket {
    /// 13-bit packet identifier
    pub pid: u16,
    /// Payload unit start indicator
    pub pusi: bool,
    /// 4-bit continuity counter
    pub continuity_counter: u8,
    /// Transport scrambling control
    pub scrambling: Scrambling,
    /// Discontinuity indicator from the adaptation field
    pub discontinuity: bool,
    /// Random access indicator from the adaptation field
    pub random_access: bool,
    /// Program Clock Reference in nanoseconds, if present
    pub pcr: Option<u64>,
    /// Payload bytes, at most 184
    pub payload: Bytes,
}

impl Default for TsPacket {
    fn default() -> Self {
        Self {
            pid: 0,
            pusi: false,
            continuity_counter: 0,
            scrambling: Scrambling::None,
            discontinuity: false,
            random_access: false,
            pcr: None,
            payload: Bytes::new(),
        }
    }
}

impl TsPacket {
    /// Classifies this packet's PID.
    pub fn pid_class(&self) -> PidClass {
        PidClass::of(self.pid)
    }

    /// Encodes the packet as exactly 188 bytes.
    ///
    /// An adaptation field is emitted when any indicator is set, a PCR is
    /// attached, or the payload is short enough to require stuffing. The
    /// payload must leave room for the field: at most 182 bytes alongside
    /// flags, 176 alongside a PCR.
    pub fn marshal(&self) -> Result<BytesMut> {
        if self.payload.len() > TS_PAYLOAD_SIZE {
            return Err(TsError::InvalidData(format!(
                "TS payload of {} bytes exceeds {}",
                self.payload.len(),
                TS_PAYLOAD_SIZE
            )));
        }

        let has_flags = self.discontinuity || self.random_access || self.pcr.is_some();
        let needs_af = has_flags || self.payload.len() < TS_PAYLOAD_SIZE;

        let afc: u8 = match (needs_af, self.payload.is_empty()) {
            (false, _) => 0b01,
            (true, false) => 0b11,
            (true, true) => 0b10,
        };

        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        buf.put_u8(SYNC_BYTE);

        let mut b1 = ((self.pid >> 8) & 0x1F) as u8;
        if self.pusi {
            b1 |= 0x40;
        }
        buf.put_u8(b1);
        buf.put_u8((self.pid & 0xFF) as u8);
        buf.put_u8(self.scrambling.bits() << 6 | afc << 4 | (self.continuity_counter & 0x0F));

        if needs_af {
            if self.payload.len() == TS_PAYLOAD_SIZE {
                return Err(TsError::InvalidData(
                    "payload too long to fit the adaptation field".into(),
                ));
            }
            // Everything after the length byte: flags, PCR, stuffing
            let af_len = TS_PAYLOAD_SIZE - 1 - self.payload.len();
            let pcr_len = if self.pcr.is_some() { 6 } else { 0 };
            let min_af = if has_flags { 1 + pcr_len } else { 0 };
            if af_len < min_af {
                return Err(TsError::InvalidData(
                    "payload too long to fit the adaptation field".into(),
                ));
            }

            buf.put_u8(af_len as u8);
            if af_len > 0 {
                let mut flags = 0u8;
                if self.discontinuity {
                    flags |= 0x80;
                }
                if self.random_access {
                    flags |= 0x40;
                }
                if self.pcr.is_some() {
                    flags |= 0x10;
                }
                buf.put_u8(flags);

                if let Some(pcr_ns) = self.pcr {
                    let (base, ext) = clock::ns_to_pcr(pcr_ns);
                    buf.put_u8((base >> 25) as u8);
                    buf.put_u8((base >> 17) as u8);
                    buf.put_u8((base >> 9) as u8);
                    buf.put_u8((base >> 1) as u8);
                    buf.put_u8(((base as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01));
                    buf.put_u8(ext as u8);
                }

                let stuffing = af_len - 1 - pcr_len;
                for _ in 0..stuffing {
                    buf.put_u8(0xFF);
                }
            }
        }

        buf.extend_from_slice(&self.payload);
        debug_assert_eq!(buf.len(), TS_PACKET_SIZE);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_class() {
        assert_eq!(PidClass::of(0x0000), PidClass::Pat);
        assert_eq!(PidClass::of(0x1FFF), PidClass::NullPacket);
        assert_eq!(PidClass::of(0x0100), PidClass::Psi);
        assert_eq!(PidClass::of(0x1FFC), PidClass::Psi);
        assert_eq!(PidClass::of(0x0001), PidClass::Unsupported);
        assert_eq!(PidClass::of(0x1FFB), PidClass::Unsupported);
    }

    #[test]
    fn test_stream_type_table() {
        assert_eq!(StreamType::from_id(0x1B), StreamType::H264);
        assert_eq!(StreamType::from_id(0x1B).category(), StreamCategory::Video);
        assert_eq!(StreamType::from_id(0x0F).category(), StreamCategory::Audio);
        assert_eq!(StreamType::from_id(0x86).category(), StreamCategory::Cues);
        assert_eq!(StreamType::from_id(0x15).category(), StreamCategory::Metadata);
        assert_eq!(StreamType::from_id(0xE7), StreamType::Other);
        assert!(lookup_stream_type(0xE7).is_none());
    }

    #[test]
    fn test_pat_round_trip() {
        let mut pat = Pat::new();
        pat.programs.insert(1, 0x1000);
        pat.programs.insert(2, 0x1020);

        let mut buf = BytesMut::new();
        pat.marshal_into(&mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(Pat::unmarshal(&buf).unwrap(), pat);
    }

    #[test]
    fn test_pat_rejects_ragged_body() {
        assert!(matches!(
            Pat::unmarshal(&[0x00, 0x01, 0xE1]),
            Err(TsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_pmt_round_trip_without_es_info() {
        let mut pmt = Pmt::new();
        pmt.pcr_pid = 0x100;
        pmt.program_info.push(Descriptor {
            tag: 0x0E,
            data: vec![0xC0, 0x00, 0x00],
        });
        pmt.streams.insert(
            0x100,
            PmtStream {
                stream_type_id: 0x1B,
                stream_type: StreamType::H264,
            },
        );
        pmt.streams.insert(
            0x101,
            PmtStream {
                stream_type_id: 0x0F,
                stream_type: StreamType::AdtsAac,
            },
        );

        let mut buf = BytesMut::new();
        pmt.marshal_into(&mut buf);
        assert_eq!(Pmt::unmarshal(&buf).unwrap(), pmt);
    }

    #[test]
    fn test_pmt_dvb_subtitles_qualified_by_descriptor() {
        // stream type 0x06 with a subtitling descriptor (0x59)
        let body = [
            0xE1, 0x00, // PCR PID 0x100
            0xF0, 0x00, // no program info
            0x06, 0xE1, 0x05, 0xF0, 0x02, // stream entry, es_info_length = 2
            0x59, 0x00, // subtitling descriptor, empty
        ];
        let pmt = Pmt::unmarshal(&body).unwrap();
        let stream = pmt.streams[&0x105];
        assert_eq!(stream.stream_type, StreamType::DvbSubtitles);
        assert_eq!(stream.stream_type.category(), StreamCategory::Subtitles);
    }

    #[test]
    fn test_packet_marshal_stuffing() {
        let packet = TsPacket {
            pid: 0x100,
            pusi: true,
            continuity_counter: 5,
            payload: Bytes::from(vec![0xAA; 100]),
            ..Default::default()
        };
        let buf = packet.marshal().unwrap();
        assert_eq!(buf.len(), TS_PACKET_SIZE);
        assert_eq!(buf[0], SYNC_BYTE);
        // adaptation_field_control = both, counter preserved
        assert_eq!(buf[3], 0x35);
        // adaptation field fills the gap: 184 - 1 - 100
        assert_eq!(buf[4], 83);
        assert_eq!(&buf[TS_PACKET_SIZE - 100..], &[0xAA; 100][..]);
    }

    #[test]
    fn test_packet_marshal_full_payload_has_no_adaptation() {
        let packet = TsPacket {
            pid: 0x100,
            payload: Bytes::from(vec![0x00; TS_PAYLOAD_SIZE]),
            ..Default::default()
        };
        let buf = packet.marshal().unwrap();
        assert_eq!(buf[3] >> 4 & 0b11, 0b01);
    }

    #[test]
    fn test_packet_marshal_rejects_oversized_payload() {
        let packet = TsPacket {
            payload: Bytes::from(vec![0x00; 185]),
            ..Default::default()
        };
        assert!(packet.marshal().is_err());

        // 184 bytes cannot coexist with a PCR
        let packet = TsPacket {
            pcr: Some(0),
            payload: Bytes::from(vec![0x00; TS_PAYLOAD_SIZE]),
            ..Default::default()
        };
        assert!(packet.marshal().is_err());
    }
}
