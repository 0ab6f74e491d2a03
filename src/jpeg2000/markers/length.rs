//! TLM, PLM and PLT: tile-part and packet length tables.

use super::{DecodeContext, write_segment};
use crate::byte_codec::PayloadReader;
use crate::constants::SOT_SEGMENT_LENGTH;
use crate::error::J2kError;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;
use std::collections::VecDeque;
use std::io::SeekFrom;

/// Largest payload of a marker segment (the length field counts itself).
const MAXIMUM_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePartLength {
    pub tile: u16,
    /// Tile-part length from the first byte of its SOT to the end of its data.
    pub length: u32,
}

/// Tile-part lengths gathered from the main header TLM segments, in
/// codestream order.
///
/// Inconsistencies that do not prevent decoding (out of order Ztlm, mixed
/// tile index styles, lengths contradicting the SOT segments) disable the
/// table instead of failing the decode.
#[derive(Debug, Clone, Default)]
pub struct TileLengthMarkers {
    entries: Vec<TilePartLength>,
    last_index: Option<u8>,
    has_tile_indices: Option<bool>,
    next_implicit_tile: u16,
    /// Entry expected for the next tile-part read from the codestream.
    cursor: usize,
    disabled: bool,
}

impl TileLengthMarkers {
    pub fn is_valid(&self) -> bool {
        !self.disabled && !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TilePartLength] {
        &self.entries
    }

    pub fn disable(&mut self, reason: &str) {
        if !self.disabled {
            log::warn!("TLM: {reason}. Disabling TLM");
            self.disabled = true;
        }
    }

    fn read_segment(&mut self, payload: &[u8], num_tiles: u32) -> Result<(), J2kError> {
        let mut reader = PayloadReader::new(payload, "TLM");
        let index = reader.read_u8()?;
        let stlm = reader.read_u8()?;
        if self.last_index.is_some_and(|last| index <= last) {
            self.disable(&format!("marker index {index} does not follow the previous one"));
        }
        self.last_index = Some(index);

        let index_width = ((stlm >> 4) & 0x3) as usize;
        let length_width = if (stlm >> 6) & 0x1 != 0 { 4 } else { 2 };
        if index_width == 3 || stlm & !0x70 != 0 {
            log::error!("TLM: illegal Stlm value {stlm:#04x}");
            return Err(J2kError::InvalidTlm);
        }
        let record_size = index_width + length_width;
        if reader.remaining() % record_size != 0 {
            log::error!(
                "TLM: {} bytes of records is not a multiple of the record size {record_size}",
                reader.remaining()
            );
            return Err(J2kError::InvalidTlm);
        }

        let has_indices = index_width != 0;
        match self.has_tile_indices {
            None => self.has_tile_indices = Some(has_indices),
            Some(previous) if previous != has_indices => {
                self.disable("cannot mix segments with and without tile indices")
            }
            Some(_) => {}
        }

        while !reader.is_empty() {
            let tile = if has_indices {
                reader.read_uint(index_width)? as u16
            } else {
                let tile = self.next_implicit_tile;
                self.next_implicit_tile = self.next_implicit_tile.wrapping_add(1);
                tile
            };
            let length = reader.read_uint(length_width)?;
            if length == 0 {
                log::error!("TLM: zero length for a tile-part of tile {tile}");
                return Err(J2kError::CorruptTlm);
            }
            if length < SOT_SEGMENT_LENGTH + 2 {
                self.disable(&format!("tile-part length {length} is less than 14"));
            }
            if tile as u32 >= num_tiles {
                self.disable(&format!(
                    "tile index {tile} out of bounds for {num_tiles} tiles"
                ));
            }
            self.entries.push(TilePartLength { tile, length });
        }
        Ok(())
    }

    /// Checks the next entry against a tile-part just read from the codestream.
    pub fn check_next(&mut self, tile: u16, psot: u32) {
        if !self.is_valid() {
            return;
        }
        match self.entries.get(self.cursor) {
            Some(entry) if entry.tile == tile && (psot == 0 || entry.length == psot) => {
                self.cursor += 1
            }
            Some(entry) => {
                let reason = format!(
                    "entry (tile {}, length {}) does not match tile-part (tile {tile}, length {psot})",
                    entry.tile, entry.length
                );
                self.disable(&reason);
            }
            None => self.disable("more tile-parts than TLM entries"),
        }
    }

    /// Offset of the first tile-part of `tile`, relative to the first SOT.
    pub fn tile_offset(&self, tile: u16) -> Option<u64> {
        if !self.is_valid() {
            return None;
        }
        let mut offset = 0u64;
        for entry in &self.entries {
            if entry.tile == tile {
                return Some(offset);
            }
            offset += entry.length as u64;
        }
        None
    }

    /// Number of tile-parts of `tile` listed in the table, 0 if unknown.
    pub fn tile_part_count(&self, tile: u16) -> usize {
        if !self.is_valid() {
            return 0;
        }
        self.entries.iter().filter(|entry| entry.tile == tile).count()
    }
}

pub fn read_tlm(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let num_tiles = ctx.cp.num_tiles();
    ctx.cp
        .tlm
        .get_or_insert_with(TileLengthMarkers::default)
        .read_segment(payload, num_tiles)
}

/// Decodes a run of packet lengths: 7 bits per byte, most significant
/// group first, the high bit set on every byte but the last.
pub fn decode_packet_lengths(data: &[u8]) -> Result<Vec<u32>, J2kError> {
    let mut lengths = Vec::new();
    let mut value: u32 = 0;
    let mut pending = false;
    for &byte in data {
        if value > (u32::MAX >> 7) {
            log::error!("Packet length overflows 32 bits");
            return Err(J2kError::CorruptedPacketLength);
        }
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 != 0 {
            pending = true;
        } else {
            lengths.push(value);
            value = 0;
            pending = false;
        }
    }
    if pending {
        log::error!("Packet length continues past the end of its segment");
        return Err(J2kError::CorruptedPacketLength);
    }
    Ok(lengths)
}

pub fn encode_packet_length(length: u32, out: &mut Vec<u8>) {
    let groups = ((32 - length.leading_zeros()).max(1)).div_ceil(7);
    for group in (0..groups).rev() {
        let bits = ((length >> (7 * group)) & 0x7F) as u8;
        out.push(if group == 0 { bits } else { bits | 0x80 });
    }
}

/// Packet lengths gathered from PLM segments, one entry per tile-part in
/// codestream order.
#[derive(Debug, Clone, Default)]
pub struct PacketLengthMarkers {
    tile_parts: VecDeque<Vec<u32>>,
    last_index: Option<u8>,
}

impl PacketLengthMarkers {
    pub fn next_tile_part(&mut self) -> Option<Vec<u32>> {
        self.tile_parts.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tile_parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tile_parts.is_empty()
    }
}

pub fn read_plm(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    let mut reader = PayloadReader::new(payload, "PLM");
    let index = reader.read_u8()?;
    let plm = ctx.cp.plm.get_or_insert_with(PacketLengthMarkers::default);
    if plm.last_index.is_some_and(|last| index <= last) {
        log::warn!("PLM: Zplm {index} out of order, packet lengths appended in codestream order");
    }
    plm.last_index = Some(index);
    while !reader.is_empty() {
        let count = reader.read_u8()? as usize;
        let group = reader.read_bytes(count).map_err(|e| {
            log::error!("PLM: tile-part packet lengths run past the end of the segment");
            e
        })?;
        plm.tile_parts.push_back(decode_packet_lengths(group)?);
    }
    Ok(())
}

pub fn read_plt(ctx: &mut DecodeContext, payload: &[u8]) -> Result<(), J2kError> {
    if payload.len() < 2 {
        log::error!("PLT marker segment too short");
        return Err(J2kError::InvalidMarkerSegmentSize {
            marker: J2kMarkerCode::PacketLengthTilePart.code(),
        });
    }
    let lengths = decode_packet_lengths(&payload[1..])?;
    log::trace!("PLT {}: {} packet lengths", payload[0], lengths.len());
    ctx.current_tcp_mut().packet_lengths.extend(lengths);
    Ok(())
}

/// Writes PLT segments for one tile-part, starting a new segment whenever
/// the next length would not fit.
pub fn write_plt(stream: &mut dyn J2kStream, lengths: &[u32]) -> Result<(), J2kError> {
    let mut index: u8 = 0;
    let mut payload = vec![index];
    let mut encoded = Vec::with_capacity(5);
    for &length in lengths {
        encoded.clear();
        encode_packet_length(length, &mut encoded);
        if payload.len() + encoded.len() > MAXIMUM_SEGMENT_PAYLOAD {
            write_segment(stream, J2kMarkerCode::PacketLengthTilePart, &payload)?;
            index = index.wrapping_add(1);
            payload.clear();
            payload.push(index);
        }
        payload.extend_from_slice(&encoded);
    }
    if payload.len() > 1 {
        write_segment(stream, J2kMarkerCode::PacketLengthTilePart, &payload)?;
    }
    Ok(())
}

/// Bytes of PLT segments `write_plt` emits for `lengths`.
pub fn plt_size(lengths: &[u32]) -> u64 {
    let mut encoded = Vec::with_capacity(5);
    let mut total = 0u64;
    let mut segment = 1usize;
    for &length in lengths {
        encoded.clear();
        encode_packet_length(length, &mut encoded);
        if segment + encoded.len() > MAXIMUM_SEGMENT_PAYLOAD {
            total += segment as u64 + 4;
            segment = 1;
        }
        segment += encoded.len();
    }
    if segment > 1 {
        total += segment as u64 + 4;
    }
    total
}

/// TLM segments reserved in the main header and filled in once every
/// tile-part length is known.
#[derive(Debug)]
pub struct TlmWriter {
    start: u64,
    tile_index_width: usize,
    capacity: usize,
    entries: Vec<TilePartLength>,
}

impl TlmWriter {
    fn records_per_segment(tile_index_width: usize) -> usize {
        (MAXIMUM_SEGMENT_PAYLOAD - 2) / (tile_index_width + 4)
    }

    fn stlm(tile_index_width: usize) -> u8 {
        // 32-bit Ptlm, 8 or 16-bit Ttlm.
        0x40 | ((tile_index_width as u8) << 4)
    }

    /// Writes zero filled TLM segments with room for `total_tile_parts` records.
    pub fn reserve(
        stream: &mut dyn J2kStream,
        total_tile_parts: usize,
        num_tiles: u32,
    ) -> Result<Self, J2kError> {
        let mut writer = TlmWriter {
            start: stream.tell(),
            tile_index_width: if num_tiles <= 256 { 1 } else { 2 },
            capacity: total_tile_parts,
            entries: Vec::with_capacity(total_tile_parts),
        };
        writer.write_segments(stream, total_tile_parts)?;
        Ok(writer)
    }

    pub fn push(&mut self, tile: u16, length: u32) -> Result<(), J2kError> {
        if self.entries.len() == self.capacity {
            log::error!("TLM: more tile-parts written than reserved ({})", self.capacity);
            return Err(J2kError::InvalidOperation);
        }
        self.entries.push(TilePartLength { tile, length });
        Ok(())
    }

    /// Rewrites the reserved segments with the recorded lengths and
    /// returns to the current position.
    pub fn finish(&self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        if self.entries.len() != self.capacity {
            log::error!(
                "TLM: {} tile-parts written but {} reserved",
                self.entries.len(),
                self.capacity
            );
            return Err(J2kError::InvalidOperation);
        }
        let end = stream.tell();
        stream.seek(SeekFrom::Start(self.start))?;
        self.write_segments(stream, self.capacity)?;
        stream.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn write_segments(&self, stream: &mut dyn J2kStream, count: usize) -> Result<(), J2kError> {
        let per_segment = Self::records_per_segment(self.tile_index_width);
        let mut written = 0;
        let mut index: u8 = 0;
        loop {
            let records = (count - written).min(per_segment);
            let mut payload = Vec::with_capacity(2 + records * (self.tile_index_width + 4));
            payload.push(index);
            payload.push(Self::stlm(self.tile_index_width));
            for slot in written..written + records {
                let entry = self.entries.get(slot).copied().unwrap_or(TilePartLength {
                    tile: 0,
                    length: 0,
                });
                if self.tile_index_width == 1 {
                    payload.push(entry.tile as u8);
                } else {
                    payload.extend_from_slice(&entry.tile.to_be_bytes());
                }
                payload.extend_from_slice(&entry.length.to_be_bytes());
            }
            write_segment(stream, J2kMarkerCode::TilePartLengths, &payload)?;
            written += records;
            index = index.wrapping_add(1);
            if written >= count {
                break;
            }
        }
        Ok(())
    }
}
