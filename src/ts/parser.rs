//! Decoding of 188-byte TS frames.
//!
//! [`parse_packet`] handles a single frame; [`parse_many`] walks a byte
//! buffer frame by frame and hands back the sub-188-byte tail so a caller
//! feeding arbitrary chunks can re-prepend it to the next read.

use super::clock;
use super::types::{
    AdaptationField, Scrambling, TsPacket, SYNC_BYTE, TS_PACKET_SIZE,
};
use crate::error::{Result, TsError};
use bytes::Bytes;

/// Decodes one 188-byte TS frame.
///
/// A slice shorter than one frame is [`TsError::NotEnoughData`]; feed the
/// missing bytes and retry.
pub fn parse_packet(data: &[u8]) -> Result<TsPacket> {
    if data.len() < TS_PACKET_SIZE {
        return Err(TsError::NotEnoughData);
    }
    if data.len() > TS_PACKET_SIZE {
        return Err(TsError::InvalidPacket(format!(
            "frame is {} bytes, expected {}",
            data.len(),
            TS_PACKET_SIZE
        )));
    }
    if data[0] != SYNC_BYTE {
        return Err(TsError::InvalidPacket("missing 0x47 sync byte".into()));
    }

    let pusi = data[1] & 0x40 != 0;
    let pid = ((data[1] & 0x1F) as u16) << 8 | data[2] as u16;
    let scrambling = Scrambling::from_bits(data[3] >> 6);
    let adaptation_field_control = (data[3] >> 4) & 0b11;
    let continuity_counter = data[3] & 0x0F;

    let (field, payload): (AdaptationField, &[u8]) = match adaptation_field_control {
        0b00 => {
            return Err(TsError::UnsupportedPacket(
                "reserved adaptation_field_control".into(),
            ));
        }
        0b01 => (AdaptationField::default(), &data[4..]),
        _ => {
            let af_length = data[4] as usize;
            if af_length > TS_PACKET_SIZE - 5 {
                return Err(TsError::InvalidData(
                    "adaptation field overruns the frame".into(),
                ));
            }
            let field = parse_adaptation_field(&data[5..5 + af_length])?;
            let payload = if adaptation_field_control == 0b11 {
                &data[5 + af_length..]
            } else {
                &[][..]
            };
            (field, payload)
        }
    };

    Ok(TsPacket {
        pid,
        pusi,
        continuity_counter,
        scrambling,
        discontinuity: field.discontinuity,
        random_access: field.random_access,
        pcr: field.pcr,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Decodes an adaptation field body (the bytes after the length byte).
///
/// A zero-length field is legal and yields the empty default. Optional
/// fields beyond the splice countdown are ignored.
pub fn parse_adaptation_field(body: &[u8]) -> Result<AdaptationField> {
    let mut field = AdaptationField::default();
    if body.is_empty() {
        return Ok(field);
    }

    let flags = body[0];
    field.discontinuity = flags & 0x80 != 0;
    field.random_access = flags & 0x40 != 0;
    field.es_priority = flags & 0x20 != 0;
    let pcr_flag = flags & 0x10 != 0;
    let opcr_flag = flags & 0x08 != 0;
    let splicing_point_flag = flags & 0x04 != 0;

    let mut pos = 1;
    if pcr_flag {
        field.pcr = Some(read_pcr(body, pos)?);
        pos += 6;
    }
    if opcr_flag {
        field.opcr = Some(read_pcr(body, pos)?);
        pos += 6;
    }
    if splicing_point_flag {
        if pos >= body.len() {
            return Err(TsError::InvalidData("splice countdown missing".into()));
        }
        field.splice_countdown = Some(body[pos] as i8);
    }

    Ok(field)
}

fn read_pcr(body: &[u8], pos: usize) -> Result<u64> {
    if pos + 6 > body.len() {
        return Err(TsError::InvalidData("PCR field truncated".into()));
    }
    let base = ((body[pos] as u64) << 25)
        | ((body[pos + 1] as u64) << 17)
        | ((body[pos + 2] as u64) << 9)
        | ((body[pos + 3] as u64) << 1)
        | ((body[pos + 4] as u64) >> 7);
    let ext = (((body[pos + 4] & 0x01) as u16) << 8) | body[pos + 5] as u16;
    Ok(clock::pcr_to_ns(base, ext))
}

/// Decodes as many whole 188-byte frames as `data` holds.
///
/// Each frame becomes one `Result`; a bad frame does not stop the walk.
/// The second element is the 0..187-byte tail that could not form a frame;
/// the caller keeps it and prepends it to the next chunk.
pub fn parse_many(data: &[u8]) -> (Vec<Result<TsPacket>>, &[u8]) {
    let mut frames = data.chunks_exact(TS_PACKET_SIZE);
    let mut packets = Vec::with_capacity(data.len() / TS_PACKET_SIZE);
    for frame in &mut frames {
        packets.push(parse_packet(frame));
    }
    (packets, frames.remainder())
}
