//! 6-bit AIS payload decoding: the handful of fields the Normalized Message
//! needs, for message types 1/2/3/18/19 (position) and 5 (static/voyage).
//!
//! `original_source/server/src/modules/ais_parser/nmea_parser.py` delegates
//! this to `pyais.decode`; the idiomatic-Rust target decodes the armored
//! 6-bit payload directly (ITU-R M.1371 field layout) rather than pull in a
//! full AIS codec crate, since only the fields SPEC_FULL §3 lists are
//! needed.

use crate::model::NormalizedMessage;

/// Reads fixed-width fields MSB-first out of a 6-bit-per-symbol AIS
/// payload.
struct BitReader<'a> {
    bits: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bits: &'a [u8]) -> Self {
        Self { bits, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bits.len() * 6 - self.pos
    }

    fn read_bit(&mut self) -> Option<u8> {
        if self.pos >= self.bits.len() * 6 {
            return None;
        }
        let symbol = self.bits[self.pos / 6];
        let bit_in_symbol = 5 - (self.pos % 6);
        self.pos += 1;
        Some((symbol >> bit_in_symbol) & 1)
    }

    fn read_uint(&mut self, n: usize) -> Option<u64> {
        if self.remaining() < n {
            return None;
        }
        let mut value: u64 = 0;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Some(value)
    }

    fn read_int(&mut self, n: usize) -> Option<i64> {
        let raw = self.read_uint(n)?;
        let sign_bit = 1u64 << (n - 1);
        if raw & sign_bit != 0 {
            Some(raw as i64 - (1i64 << n))
        } else {
            Some(raw as i64)
        }
    }

    /// 6-bit ASCII per ITU-R M.1371 Table 47, trimmed of trailing `@`/space
    /// padding.
    fn read_sixbit_string(&mut self, num_chars: usize) -> Option<String> {
        let mut out = String::with_capacity(num_chars);
        for _ in 0..num_chars {
            let v = self.read_uint(6)? as u8;
            let ch = if v < 32 { v + 64 } else { v };
            out.push(ch as char);
        }
        Some(out.trim_end_matches(['@', ' ']).to_string())
    }
}

/// Converts the armored payload string (already checksum-stripped) into a
/// sequence of 6-bit symbols.
pub fn armor_to_bits(payload: &str) -> Vec<u8> {
    payload
        .bytes()
        .map(|b| {
            let v = b.wrapping_sub(48);
            if v > 40 { v - 8 } else { v }
        })
        .collect()
}

const POSITION_LAT_NA: i64 = 91 * 600_000;
const POSITION_LON_NA: i64 = 181 * 600_000;

/// Decode an assembled payload into a Normalized Message. `fill_bits` is
/// the number of padding bits in the final 6-bit symbol of the payload
/// (carried in the NMEA sentence's penultimate field).
pub fn decode(payload: &str, _fill_bits: u8) -> Option<NormalizedMessage> {
    let symbols = armor_to_bits(payload);
    let mut reader = BitReader::new(&symbols);

    let msg_type = reader.read_uint(6)? as u8;
    let _repeat = reader.read_uint(2)?;
    let mmsi = reader.read_uint(30)?;

    let mut message = NormalizedMessage {
        mmsi: Some(mmsi.to_string()),
        msg_type,
        ..Default::default()
    };

    match msg_type {
        1 | 2 | 3 => decode_class_a_position(&mut reader, &mut message)?,
        18 | 19 => decode_class_b_position(&mut reader, &mut message)?,
        5 => decode_static_voyage(&mut reader, &mut message)?,
        _ => {}
    }

    Some(message)
}

fn decode_class_a_position(reader: &mut BitReader, message: &mut NormalizedMessage) -> Option<()> {
    let status = reader.read_uint(4)? as u32;
    let _rot = reader.read_int(8)?;
    let sog_raw = reader.read_uint(10)?;
    let _accuracy = reader.read_uint(1)?;
    let lon_raw = reader.read_int(28)?;
    let lat_raw = reader.read_int(27)?;
    let cog_raw = reader.read_uint(12)?;
    let heading_raw = reader.read_uint(9)? as u32;

    message.status = Some(status);
    apply_position_fields(message, lon_raw, lat_raw, sog_raw, cog_raw, heading_raw);
    Some(())
}

fn decode_class_b_position(reader: &mut BitReader, message: &mut NormalizedMessage) -> Option<()> {
    let _reserved = reader.read_uint(8)?;
    let sog_raw = reader.read_uint(10)?;
    let _accuracy = reader.read_uint(1)?;
    let lon_raw = reader.read_int(28)?;
    let lat_raw = reader.read_int(27)?;
    let cog_raw = reader.read_uint(12)?;
    let heading_raw = reader.read_uint(9)? as u32;

    apply_position_fields(message, lon_raw, lat_raw, sog_raw, cog_raw, heading_raw);
    Some(())
}

fn apply_position_fields(
    message: &mut NormalizedMessage,
    lon_raw: i64,
    lat_raw: i64,
    sog_raw: u64,
    cog_raw: u64,
    heading_raw: u32,
) {
    if lon_raw != POSITION_LON_NA && lat_raw != POSITION_LAT_NA {
        message.lon = Some(lon_raw as f64 / 600_000.0);
        message.lat = Some(lat_raw as f64 / 600_000.0);
    }
    if sog_raw != 1023 {
        message.speed = Some(sog_raw as f64 / 10.0);
    }
    if cog_raw != 3600 {
        message.course = Some(cog_raw as f64 / 10.0);
    }
    if heading_raw != 511 {
        message.heading = Some(heading_raw);
    }
}

fn decode_static_voyage(reader: &mut BitReader, message: &mut NormalizedMessage) -> Option<()> {
    let _ais_version = reader.read_uint(2)?;
    let imo = reader.read_uint(30)?;
    let callsign = reader.read_sixbit_string(7)?;
    let name = reader.read_sixbit_string(20)?;
    let ship_type = reader.read_uint(8)? as u32;
    let to_bow = reader.read_uint(9)? as u32;
    let to_stern = reader.read_uint(9)? as u32;
    let to_port = reader.read_uint(6)? as u32;
    let to_starboard = reader.read_uint(6)? as u32;

    if imo != 0 {
        message.imo = Some(imo.to_string());
    }
    if !callsign.is_empty() {
        message.callsign = Some(callsign);
    }
    if !name.is_empty() {
        message.name = Some(name);
    }
    message.shiptype = Some(ship_type);
    message.length = Some(to_bow + to_stern);
    message.width = Some(to_port + to_starboard);

    Some(())
}
