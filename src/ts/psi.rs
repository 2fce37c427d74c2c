//! PSI section framing: the common header, table dispatch, and CRC.
//!
//! A section is decoded from the payload of a TS packet whose pusi is set
//! (the one-byte pointer field is honoured) and encoded back with a zero
//! pointer byte and a trailing CRC-32/MPEG-2 over table_id through the end
//! of the table body.

use super::scte35::SpliceInfoSection;
use super::types::{Pat, Pmt, MAX_SECTION_LENGTH};
use crate::error::{Result, TsError};
use crate::utils::Crc32Mpeg2;
use bytes::{BufMut, Bytes, BytesMut};

/// Table family derived from a section's table id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableType {
    /// 0x00: Program Association Table
    Pat,
    /// 0x01: Conditional Access Table
    Cat,
    /// 0x02: Program Map Table
    Pmt,
    /// 0x03: Transport Stream Description Table
    Tsdt,
    /// 0x04..0x07: ISO 13818-1 metadata tables
    IsoMetadata,
    /// 0x08..0x39: reserved
    Reserved,
    /// 0x3A..0x3F: DSM-CC variants
    DsmCc,
    /// 0x40..0x7F: DVB tables
    Dvb,
    /// 0x80..0x8F: conditional access
    Ca,
    /// 0x90..0xBF: user defined
    UserDefined,
    /// 0xC0..0xFB and 0xFD..0xFE: ATSC / SCTE tables
    AtscScte,
    /// 0xFC: SCTE-35 splice information
    Scte35,
    /// 0xFF: forbidden
    Forbidden,
}

impl TableType {
    /// Maps a table id to its family.
    pub fn from_table_id(table_id: u8) -> TableType {
        match table_id {
            0x00 => TableType::Pat,
            0x01 => TableType::Cat,
            0x02 => TableType::Pmt,
            0x03 => TableType::Tsdt,
            0x04..=0x07 => TableType::IsoMetadata,
            0x08..=0x39 => TableType::Reserved,
            0x3A..=0x3F => TableType::DsmCc,
            0x40..=0x7F => TableType::Dvb,
            0x80..=0x8F => TableType::Ca,
            0x90..=0xBF => TableType::UserDefined,
            0xFC => TableType::Scte35,
            0xC0..=0xFB | 0xFD..=0xFE => TableType::AtscScte,
            0xFF => TableType::Forbidden,
        }
    }
}

/// The long-form PSI header fields, present when the section syntax
/// indicator is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiSyntax {
    /// Transport stream id (or table id extension)
    pub transport_stream_id: u16,
    /// 5-bit version number
    pub version_number: u8,
    /// Whether this section is currently applicable
    pub current_next_indicator: bool,
    /// Section number within the table
    pub section_number: u8,
    /// Last section number of the table
    pub last_section_number: u8,
}

impl Default for PsiSyntax {
    fn default() -> Self {
        Self {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            section_number: 0,
            last_section_number: 0,
        }
    }
}

/// Common PSI section header.
///
/// The syntax indicator on the wire is derived from `syntax` being present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table id of the section
    pub table_id: u8,
    /// Declared section length as read from the wire; recomputed on encode
    pub section_length: u16,
    /// Long-form header fields, when the syntax indicator is set
    pub syntax: Option<PsiSyntax>,
}

/// A decoded table body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Table {
    /// Program Association Table
    Pat(Pat),
    /// Program Map Table
    Pmt(Pmt),
    /// SCTE-35 splice information
    Scte35(SpliceInfoSection),
    /// Raw body of a table this library does not interpret
    Opaque(Bytes),
}

/// A PSI section: header, dispatched table, and the CRC read from the wire.
///
/// Ingest does not validate the CRC (corrupted sections surface as table
/// decode failures instead); egress always computes a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psi {
    /// Section header
    pub header: PsiHeader,
    /// Table family from the table id
    pub table_type: TableType,
    /// Decoded table
    pub table: Table,
    /// CRC as read on decode; ignored on encode
    pub crc: u32,
}

impl Psi {
    /// Builds a section around a table, deriving the table type.
    pub fn new(table_id: u8, syntax: Option<PsiSyntax>, table: Table) -> Psi {
        Psi {
            header: PsiHeader {
                table_id,
                section_length: 0,
                syntax,
            },
            table_type: TableType::from_table_id(table_id),
            table,
            crc: 0,
        }
    }

    /// Decodes a section from a TS packet payload.
    ///
    /// When `pusi` is set, the payload begins with a pointer field giving
    /// the offset of the section start.
    ///
    /// A failure in the table-specific decoder is not fatal: the section is
    /// still produced with an [`Table::Opaque`] body, and the error is
    /// returned alongside for the caller to log or escalate.
    pub fn unmarshal(payload: &[u8], pusi: bool) -> Result<(Psi, Option<TsError>)> {
        let data = if pusi {
            if payload.is_empty() {
                return Err(TsError::InvalidHeader("missing pointer field".into()));
            }
            let pointer = payload[0] as usize;
            if 1 + pointer > payload.len() {
                return Err(TsError::InvalidHeader(
                    "pointer field beyond the payload".into(),
                ));
            }
            &payload[1 + pointer..]
        } else {
            payload
        };

        if data.len() < 3 {
            return Err(TsError::InvalidHeader("section header truncated".into()));
        }

        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;
        let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
        if section_length > MAX_SECTION_LENGTH {
            return Err(TsError::InvalidHeader(format!(
                "section_length {section_length} exceeds {MAX_SECTION_LENGTH}"
            )));
        }

        let (syntax, body_start, content_length) = if section_syntax_indicator {
            if data.len() < 8 {
                return Err(TsError::InvalidHeader("long-form header truncated".into()));
            }
            let syntax = PsiSyntax {
                transport_stream_id: u16::from_be_bytes([data[3], data[4]]),
                version_number: (data[5] >> 1) & 0x1F,
                current_next_indicator: data[5] & 0x01 != 0,
                section_number: data[6],
                last_section_number: data[7],
            };
            let content_length = section_length.checked_sub(5 + 4).ok_or_else(|| {
                TsError::InvalidHeader("section_length shorter than its header".into())
            })?;
            (Some(syntax), 8, content_length)
        } else {
            let content_length = section_length.checked_sub(4).ok_or_else(|| {
                TsError::InvalidHeader("section_length shorter than its CRC".into())
            })?;
            (None, 3, content_length)
        };

        if data.len() < body_start + content_length + 4 {
            return Err(TsError::InvalidData("section body truncated".into()));
        }
        let body = &data[body_start..body_start + content_length];
        let crc_bytes = &data[body_start + content_length..body_start + content_length + 4];
        let crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let table_type = TableType::from_table_id(table_id);
        let decoded = match table_type {
            TableType::Pat => Pat::unmarshal(body).map(Table::Pat),
            TableType::Pmt => Pmt::unmarshal(body).map(Table::Pmt),
            TableType::Scte35 => SpliceInfoSection::unmarshal(body).map(Table::Scte35),
            _ => Ok(Table::Opaque(Bytes::copy_from_slice(body))),
        };
        let (table, table_error) = match decoded {
            Ok(table) => (table, None),
            Err(e) => (Table::Opaque(Bytes::copy_from_slice(body)), Some(e)),
        };

        Ok((
            Psi {
                header: PsiHeader {
                    table_id,
                    section_length: section_length as u16,
                    syntax,
                },
                table_type,
                table,
                crc,
            },
            table_error,
        ))
    }

    /// Encodes the section: pointer byte, header, table, CRC.
    pub fn marshal(&self) -> Result<BytesMut> {
        let mut body = BytesMut::new();
        match &self.table {
            Table::Pat(pat) => pat.marshal_into(&mut body),
            Table::Pmt(pmt) => pmt.marshal_into(&mut body),
            Table::Scte35(section) => section.marshal_into(&mut body)?,
            Table::Opaque(raw) => body.extend_from_slice(raw),
        }

        let syntax_length = if self.header.syntax.is_some() { 5 } else { 0 };
        let section_length = body.len() + syntax_length + 4;
        if section_length > MAX_SECTION_LENGTH {
            return Err(TsError::InvalidHeader(format!(
                "section_length {section_length} exceeds {MAX_SECTION_LENGTH}"
            )));
        }

        let mut buf = BytesMut::with_capacity(4 + section_length);
        buf.put_u8(0x00); // pointer field

        let mut b1 = 0b0011_0000 | ((section_length >> 8) as u8 & 0x0F);
        if self.header.syntax.is_some() {
            b1 |= 0x80;
        }
        buf.put_u8(self.header.table_id);
        buf.put_u8(b1);
        buf.put_u8(section_length as u8);

        if let Some(syntax) = &self.header.syntax {
            buf.put_u16(syntax.transport_stream_id);
            buf.put_u8(
                0xC0 | ((syntax.version_number & 0x1F) << 1)
                    | syntax.current_next_indicator as u8,
            );
            buf.put_u8(syntax.section_number);
            buf.put_u8(syntax.last_section_number);
        }

        buf.extend_from_slice(&body);

        let crc = Crc32Mpeg2::new().calculate(&buf[1..]);
        buf.put_u32(crc);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat_psi() -> Psi {
        let mut pat = Pat::new();
        pat.programs.insert(1, 0x1000);
        Psi::new(0x00, Some(PsiSyntax::default()), Table::Pat(pat))
    }

    #[test]
    fn test_pat_section_round_trip() {
        let psi = pat_psi();
        let wire = psi.marshal().unwrap();

        // pointer byte, then table id
        assert_eq!(wire[0], 0x00);
        assert_eq!(wire[1], 0x00);
        // section_length: 5 syntax + 4 entry + 4 crc
        assert_eq!(wire[2], 0xB0);
        assert_eq!(wire[3], 13);

        let (back, table_error) = Psi::unmarshal(&wire, true).unwrap();
        assert!(table_error.is_none());
        assert_eq!(back.table_type, TableType::Pat);
        assert_eq!(back.table, psi.table);
        assert_eq!(back.header.syntax, psi.header.syntax);
    }

    #[test]
    fn test_emitted_crc_verifies() {
        let wire = pat_psi().marshal().unwrap();
        assert_eq!(Crc32Mpeg2::new().calculate(&wire[1..]), 0);
    }

    #[test]
    fn test_pointer_field_offset_is_honoured() {
        let wire = pat_psi().marshal().unwrap();
        let mut shifted = BytesMut::new();
        shifted.put_u8(2); // pointer: section starts two bytes in
        shifted.put_u8(0xFF);
        shifted.put_u8(0xFF);
        shifted.extend_from_slice(&wire[1..]);

        let (psi, _) = Psi::unmarshal(&shifted, true).unwrap();
        assert_eq!(psi.table_type, TableType::Pat);
    }

    #[test]
    fn test_short_form_section() {
        let psi = Psi::new(
            0x90,
            None,
            Table::Opaque(Bytes::from_static(&[0x01, 0x02, 0x03])),
        );
        let wire = psi.marshal().unwrap();
        // no syntax indicator, section_length = 3 + 4
        assert_eq!(wire[2], 0x30);
        assert_eq!(wire[3], 7);

        let (back, table_error) = Psi::unmarshal(&wire, true).unwrap();
        assert!(table_error.is_none());
        assert_eq!(back.table_type, TableType::UserDefined);
        assert_eq!(back.table, psi.table);
        assert!(back.header.syntax.is_none());
    }

    #[test]
    fn test_oversized_section_rejected_both_ways() {
        let psi = Psi::new(0x90, None, Table::Opaque(Bytes::from(vec![0u8; 4200])));
        assert!(matches!(psi.marshal(), Err(TsError::InvalidHeader(_))));

        // hand-build a header claiming section_length 4094
        let raw = [0x00, 0x90, 0x3F, 0xFE, 0x00];
        assert!(matches!(
            Psi::unmarshal(&raw, true),
            Err(TsError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_invalid_data() {
        let mut wire = pat_psi().marshal().unwrap();
        wire.truncate(wire.len() - 2);
        assert!(matches!(
            Psi::unmarshal(&wire, true),
            Err(TsError::InvalidData(_))
        ));
    }

    #[test]
    fn test_table_decode_failure_falls_back_to_opaque() {
        // a PAT body whose length is not a multiple of 4
        let psi = Psi::new(
            0x00,
            Some(PsiSyntax::default()),
            Table::Opaque(Bytes::from_static(&[0x00, 0x01, 0xE1])),
        );
        let wire = psi.marshal().unwrap();

        let (back, table_error) = Psi::unmarshal(&wire, true).unwrap();
        assert!(matches!(table_error, Some(TsError::InvalidData(_))));
        assert_eq!(back.table_type, TableType::Pat);
        assert!(matches!(back.table, Table::Opaque(_)));
    }

    #[test]
    fn test_scte35_section_dispatch() {
        use super::super::scte35::SpliceCommand;

        let section = SpliceInfoSection::new(SpliceCommand::SpliceNull);
        let psi = Psi::new(0xFC, None, Table::Scte35(section.clone()));
        let wire = psi.marshal().unwrap();

        let (back, table_error) = Psi::unmarshal(&wire, true).unwrap();
        assert!(table_error.is_none());
        assert_eq!(back.table_type, TableType::Scte35);
        assert_eq!(back.table, Table::Scte35(section));
    }
}
