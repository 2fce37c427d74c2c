//! SCTE-35 splice information sections.
//!
//! Carried in PSI with table id 0xFC. Only `splice_null` and
//! `splice_insert` are given structure; the remaining known command types
//! pass through as opaque bytes so a section can be re-emitted unchanged.
//! All timestamps are nanoseconds; the 33-bit 90 kHz wire values exist only
//! inside this codec.

use super::clock;
use crate::error::{Result, TsError};
use crate::utils::BitReader;
use bytes::{BufMut, Bytes, BytesMut};

/// A splice time: the presentation instant a cue refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceTime {
    /// Presentation time in nanoseconds
    pub pts: u64,
}

/// Duration of an ad break signalled by a splice_insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakDuration {
    /// Whether the splicer should return to the network automatically
    pub auto_return: bool,
    /// Break duration in nanoseconds
    pub duration: u64,
}

/// The splice_insert command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceInsert {
    /// Unique event id
    pub event_id: u32,
    /// Cancels a previously signalled event; all other fields are unset
    pub cancel_indicator: bool,
    /// True when leaving the network feed (ad start)
    pub out_of_network_indicator: bool,
    /// Event id numbering compliance flag
    pub event_id_compliance_flag: bool,
    /// When the splice happens; `None` means immediate
    pub splice_time: Option<SpliceTime>,
    /// Declared break duration, if any
    pub break_duration: Option<BreakDuration>,
    /// Program id the event belongs to
    pub unique_program_id: u16,
    /// Avail number within the program
    pub avail_num: u8,
    /// Expected number of avails
    pub avails_expected: u8,
}

/// A splice command, dispatched on `splice_command_type`.
///
/// Commands other than `splice_null` and `splice_insert` keep their raw
/// body so marshalling reproduces the section byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceCommand {
    /// 0x00: no-op heartbeat command
    SpliceNull,
    /// 0x04: scheduled splice, carried opaquely
    SpliceSchedule(Bytes),
    /// 0x05: the one structured command
    SpliceInsert(SpliceInsert),
    /// 0x06: time signal, carried opaquely
    TimeSignal(Bytes),
    /// 0x07: bandwidth reservation, carried opaquely
    BandwidthReservation(Bytes),
    /// 0xFF: private command, carried opaquely
    PrivateCommand(Bytes),
}

impl SpliceCommand {
    /// The wire `splice_command_type` for this command.
    pub fn command_type(&self) -> u8 {
        match self {
            SpliceCommand::SpliceNull => 0x00,
            SpliceCommand::SpliceSchedule(_) => 0x04,
            SpliceCommand::SpliceInsert(_) => 0x05,
            SpliceCommand::TimeSignal(_) => 0x06,
            SpliceCommand::BandwidthReservation(_) => 0x07,
            SpliceCommand::PrivateCommand(_) => 0xFF,
        }
    }
}

/// An SCTE-35 splice_info_section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpliceInfoSection {
    /// SCTE-35 protocol version, 0 in practice
    pub protocol_version: u8,
    /// Whether the command and descriptors are encrypted
    pub encrypted_packet: bool,
    /// Encryption algorithm id, meaningful only when encrypted
    pub encryption_algorithm: u8,
    /// Offset added to every time in the section, nanoseconds
    pub pts_adjustment: u64,
    /// Control word index for encrypted sections
    pub cw_index: u8,
    /// 12-bit authorization tier
    pub tier: u16,
    /// The splice command
    pub splice_command: SpliceCommand,
    /// Descriptor loop, carried opaquely
    pub splice_descriptors: Bytes,
    /// Encrypted-section CRC, present iff `encrypted_packet`
    pub e_crc32: Option<u32>,
}

impl Default for SpliceInfoSection {
    fn default() -> Self {
        Self {
            protocol_version: 0,
            encrypted_packet: false,
            encryption_algorithm: 0,
            pts_adjustment: 0,
            cw_index: 0,
            tier: 0xFFF,
            splice_command: SpliceCommand::SpliceNull,
            splice_descriptors: Bytes::new(),
            e_crc32: None,
        }
    }
}

impl SpliceInfoSection {
    /// Convenience constructor for a section around one command.
    pub fn new(splice_command: SpliceCommand) -> Self {
        Self {
            splice_command,
            ..Default::default()
        }
    }

    /// Decodes a splice_info_section body (the PSI raw table bytes).
    pub fn unmarshal(body: &[u8]) -> Result<SpliceInfoSection> {
        let mut reader = BitReader::new(body);
        let err = |_| TsError::Scte35Unmarshal("section body truncated".into());

        let protocol_version = reader.read_bits(8).map_err(err)? as u8;
        let encrypted_packet = reader.read_bool().map_err(err)?;
        let encryption_algorithm = reader.read_bits(6).map_err(err)? as u8;
        let pts_adjustment = clock::pts_to_ns(reader.read_bits64(33).map_err(err)?);
        let cw_index = reader.read_bits(8).map_err(err)? as u8;
        let tier = reader.read_bits(12).map_err(err)? as u16;
        let splice_command_length = reader.read_bits(12).map_err(err)? as usize;
        let splice_command_type = reader.read_bits(8).map_err(err)? as u8;

        if splice_command_length == 0 {
            return Err(TsError::Scte35Unmarshal(
                "splice_command_length of zero".into(),
            ));
        }
        let command_body = reader.read_bytes(splice_command_length - 1).map_err(err)?;

        let splice_command = match splice_command_type {
            0x00 => SpliceCommand::SpliceNull,
            0x04 => SpliceCommand::SpliceSchedule(Bytes::copy_from_slice(command_body)),
            0x05 => SpliceCommand::SpliceInsert(SpliceInsert::unmarshal(command_body)?),
            0x06 => SpliceCommand::TimeSignal(Bytes::copy_from_slice(command_body)),
            0x07 => SpliceCommand::BandwidthReservation(Bytes::copy_from_slice(command_body)),
            0xFF => SpliceCommand::PrivateCommand(Bytes::copy_from_slice(command_body)),
            other => return Err(TsError::UnknownSpliceType(other)),
        };

        let descriptor_loop_length = reader.read_bits(16).map_err(err)? as usize;
        let splice_descriptors =
            Bytes::copy_from_slice(reader.read_bytes(descriptor_loop_length).map_err(err)?);

        let e_crc32 = if encrypted_packet {
            Some(reader.read_bits(32).map_err(err)?)
        } else {
            None
        };

        Ok(SpliceInfoSection {
            protocol_version,
            encrypted_packet,
            encryption_algorithm,
            pts_adjustment,
            cw_index,
            tier,
            splice_command,
            splice_descriptors,
            e_crc32,
        })
    }

    /// Writes the section body into `buf`.
    pub fn marshal_into(&self, buf: &mut BytesMut) -> Result<()> {
        let mut command_body = BytesMut::new();
        match &self.splice_command {
            SpliceCommand::SpliceNull => {}
            SpliceCommand::SpliceInsert(insert) => insert.marshal_into(&mut command_body),
            SpliceCommand::SpliceSchedule(raw)
            | SpliceCommand::TimeSignal(raw)
            | SpliceCommand::BandwidthReservation(raw)
            | SpliceCommand::PrivateCommand(raw) => command_body.extend_from_slice(raw),
        }

        let splice_command_length = command_body.len() + 1;
        if splice_command_length > 0xFFF {
            return Err(TsError::InvalidData("splice command too long".into()));
        }

        buf.put_u8(self.protocol_version);

        let pts_adjustment_ticks = clock::ns_to_pts(self.pts_adjustment) & 0x1_FFFF_FFFF;
        let mut b = (self.encrypted_packet as u8) << 7;
        b |= (self.encryption_algorithm & 0x3F) << 1;
        b |= (pts_adjustment_ticks >> 32) as u8;
        buf.put_u8(b);
        buf.put_u32(pts_adjustment_ticks as u32);

        buf.put_u8(self.cw_index);

        let tier = self.tier & 0xFFF;
        buf.put_u8((tier >> 4) as u8);
        buf.put_u8(((tier as u8 & 0x0F) << 4) | ((splice_command_length >> 8) as u8 & 0x0F));
        buf.put_u8(splice_command_length as u8);

        buf.put_u8(self.splice_command.command_type());
        buf.extend_from_slice(&command_body);

        buf.put_u16(self.splice_descriptors.len() as u16);
        buf.extend_from_slice(&self.splice_descriptors);

        if self.encrypted_packet {
            buf.put_u32(self.e_crc32.unwrap_or(0));
        }

        Ok(())
    }
}

impl SpliceInsert {
    fn unmarshal(body: &[u8]) -> Result<SpliceInsert> {
        let mut reader = BitReader::new(body);
        let err = |_| TsError::Scte35Unmarshal("splice_insert truncated".into());

        let event_id = reader.read_bits(32).map_err(err)?;
        let cancel_indicator = reader.read_bool().map_err(err)?;
        reader.skip(7).map_err(err)?;

        let mut insert = SpliceInsert {
            event_id,
            cancel_indicator,
            out_of_network_indicator: false,
            event_id_compliance_flag: false,
            splice_time: None,
            break_duration: None,
            unique_program_id: 0,
            avail_num: 0,
            avails_expected: 0,
        };
        if cancel_indicator {
            return Ok(insert);
        }

        insert.out_of_network_indicator = reader.read_bool().map_err(err)?;
        let program_splice_flag = reader.read_bool().map_err(err)?;
        let duration_flag = reader.read_bool().map_err(err)?;
        let splice_immediate_flag = reader.read_bool().map_err(err)?;
        insert.event_id_compliance_flag = reader.read_bool().map_err(err)?;
        reader.skip(3).map_err(err)?;

        if !program_splice_flag {
            return Err(TsError::Scte35Unmarshal(
                "component splice mode is not supported".into(),
            ));
        }

        if !splice_immediate_flag {
            let time_specified = reader.read_bool().map_err(err)?;
            if !time_specified {
                return Err(TsError::Scte35Unmarshal(
                    "splice_time without a specified time".into(),
                ));
            }
            reader.skip(6).map_err(err)?;
            let pts_time = reader.read_bits64(33).map_err(err)?;
            insert.splice_time = Some(SpliceTime {
                pts: clock::pts_to_ns(pts_time),
            });
        }

        if duration_flag {
            let auto_return = reader.read_bool().map_err(err)?;
            reader.skip(6).map_err(err)?;
            let duration = reader.read_bits64(33).map_err(err)?;
            insert.break_duration = Some(BreakDuration {
                auto_return,
                duration: clock::pts_to_ns(duration),
            });
        }

        insert.unique_program_id = reader.read_bits(16).map_err(err)? as u16;
        insert.avail_num = reader.read_bits(8).map_err(err)? as u8;
        insert.avails_expected = reader.read_bits(8).map_err(err)? as u8;

        Ok(insert)
    }

    fn marshal_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.event_id);
        buf.put_u8(((self.cancel_indicator as u8) << 7) | 0x7F);
        if self.cancel_indicator {
            return;
        }

        let splice_immediate = self.splice_time.is_none();
        let mut flags = (self.out_of_network_indicator as u8) << 7;
        flags |= 1 << 6; // program splice
        flags |= (self.break_duration.is_some() as u8) << 5;
        flags |= (splice_immediate as u8) << 4;
        flags |= (self.event_id_compliance_flag as u8) << 3;
        flags |= 0x07;
        buf.put_u8(flags);

        if let Some(splice_time) = &self.splice_time {
            let ticks = clock::ns_to_pts(splice_time.pts) & 0x1_FFFF_FFFF;
            buf.put_u8(0x80 | 0x7E | (ticks >> 32) as u8);
            buf.put_u32(ticks as u32);
        }

        if let Some(break_duration) = &self.break_duration {
            let ticks = clock::ns_to_pts(break_duration.duration) & 0x1_FFFF_FFFF;
            buf.put_u8(((break_duration.auto_return as u8) << 7) | 0x7E | (ticks >> 32) as u8);
            buf.put_u32(ticks as u32);
        }

        buf.put_u16(self.unique_program_id);
        buf.put_u8(self.avail_num);
        buf.put_u8(self.avails_expected);
    }
}
