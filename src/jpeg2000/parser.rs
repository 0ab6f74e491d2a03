//! Codestream parser.
//!
//! Drives the main header and tile-part header state machines over a
//! [`J2kStream`]. Marker payloads are handed to the readers registered in
//! [`MarkerTable`]; tile-part data is appended to the owning tile's
//! [`TileData`] until the tile is complete.

use super::index::CodestreamIndex;
use super::markers::ppm::merge_ppt;
use super::markers::sot::check_tile_part_correction;
use super::markers::{DecodeContext, MarkerHandler, MarkerTable};
use super::state::DecoderState;
use super::tile_data::TileData;
use crate::constants::MARKER_LENGTH;
use crate::error::J2kError;
use crate::marker_code::J2kMarkerCode;
use crate::stream::J2kStream;
use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;

const SOT: u16 = J2kMarkerCode::StartOfTile as u16;
const SOD: u16 = J2kMarkerCode::StartOfData as u16;
const EOC: u16 = J2kMarkerCode::EndOfCodestream as u16;

/// What follows the data of a tile-part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEnd {
    /// EOC, or the end of the stream.
    Eoc,
    /// Another SOT; `tile` is its Isot when it could be peeked.
    NextTile { tile: Option<u16> },
    UnexpectedMarker(u16),
}

pub struct J2kParser {
    table: MarkerTable,
    pub ctx: DecodeContext,
    /// Marker code read but not yet processed.
    current_marker: u16,
    codestream_start: u64,
    main_header_end: u64,
    main_header_markers: HashSet<u16>,
    build_index: bool,
    /// Offset of the first SOT of every tile seen so far.
    tile_starts: HashMap<u16, u64>,
    tiles_expected: u32,
    tiles_returned: u32,
}

impl J2kParser {
    pub fn new(build_index: bool) -> Self {
        Self {
            table: MarkerTable::new(),
            ctx: DecodeContext::new(),
            current_marker: 0,
            codestream_start: 0,
            main_header_end: 0,
            main_header_markers: HashSet::new(),
            build_index,
            tile_starts: HashMap::new(),
            tiles_expected: 0,
            tiles_returned: 0,
        }
    }

    /// Offset of the first SOT marker.
    pub fn main_header_end(&self) -> u64 {
        self.main_header_end
    }

    /// Offset of the first tile-part of `tile`, once a scan has passed it.
    pub fn tile_start(&self, tile: u16) -> Option<u64> {
        self.tile_starts.get(&tile).copied()
    }

    pub fn tiles_returned(&self) -> u32 {
        self.tiles_returned
    }

    /// Reads SOC through the last main header segment and leaves the
    /// stream positioned after the first SOT marker code.
    pub fn read_header(&mut self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        self.codestream_start = stream.tell();
        let soc = stream.read_u16().map_err(|_| {
            log::error!("Stream too short to hold a SOC marker");
            J2kError::StartOfCodestreamNotFound
        })?;
        if soc != J2kMarkerCode::StartOfCodestream.code() {
            log::error!("Expected a SOC marker, found {soc:#06x}");
            return Err(J2kError::StartOfCodestreamNotFound);
        }
        self.ctx.state = DecoderState::MAIN_HEADER_SIZ;

        let mut code = self.read_marker(stream)?;
        while code != SOT {
            code = self.process_marker(stream, code)?;
        }

        if self.ctx.state == DecoderState::MAIN_HEADER_SIZ {
            log::error!("Required SIZ marker not found in main header");
            return Err(J2kError::RequiredMarkerNotFound("SIZ"));
        }
        for (marker, name) in [
            (J2kMarkerCode::CodingStyleDefault, "COD"),
            (J2kMarkerCode::QuantizationDefault, "QCD"),
        ] {
            if !self.main_header_markers.contains(&marker.code()) {
                log::error!("Required {name} marker not found in main header");
                return Err(J2kError::RequiredMarkerNotFound(name));
            }
        }

        if let Some(ppm) = self.ctx.cp.ppm.as_mut() {
            ppm.merge()?;
        }
        self.ctx.default_tcp.validate_quantization()?;
        self.ctx.specialize_tiles();

        self.main_header_end = stream.tell() - MARKER_LENGTH as u64;
        if let Some(index) = self.ctx.index.as_mut() {
            index.main_header_end = self.main_header_end;
            index.codestream_size = stream.tell() + stream.bytes_left() - self.codestream_start;
        }
        self.ctx.state = DecoderState::TILE_PART_HEADER_SOT;
        self.current_marker = SOT;
        log::debug!("Main header: {} bytes", self.main_header_end - self.codestream_start);
        Ok(())
    }

    /// Positions the parser on the SOT at `position` and resets the tile
    /// counters. `tiles_expected` is the number of tiles the caller wants.
    pub fn begin_tiles(
        &mut self,
        stream: &mut dyn J2kStream,
        position: u64,
        tiles_expected: u32,
    ) -> Result<(), J2kError> {
        stream.seek(SeekFrom::Start(position))?;
        let code = stream.read_u16()?;
        if code != SOT {
            log::error!("Expected a SOT marker at offset {position}, found {code:#06x}");
            return Err(J2kError::MissingSotMarker);
        }
        self.current_marker = SOT;
        self.ctx.state = DecoderState::TILE_PART_HEADER_SOT;
        self.tiles_expected = tiles_expected;
        self.tiles_returned = 0;
        Ok(())
    }

    fn read_marker(&mut self, stream: &mut dyn J2kStream) -> Result<u16, J2kError> {
        stream.read_u16().map_err(|error| {
            if self.ctx.state.intersects(DecoderState::TILE_PART_HEADER) {
                log::error!("Stream ended inside the header of tile {}", self.ctx.current_tile);
                J2kError::MissingSodMarker
            } else {
                log::error!("Stream too short");
                error
            }
        })
    }

    /// Reads the segment of `code` and returns the next marker code.
    fn process_marker(&mut self, stream: &mut dyn J2kStream, code: u16) -> Result<u16, J2kError> {
        if code == SOD || code == EOC {
            log::error!("Marker {code:#06x} is not compliant with its position");
            return Err(J2kError::MarkerNotCompliant { marker: code });
        }
        match self.table.get(code).copied() {
            Some(handler) => {
                self.read_segment(stream, handler)?;
                self.read_marker(stream)
            }
            None => self.read_unk(stream, code),
        }
    }

    fn read_segment(
        &mut self,
        stream: &mut dyn J2kStream,
        handler: MarkerHandler,
    ) -> Result<(), J2kError> {
        let code = handler.marker.code();
        let name = handler.marker.name();
        if !handler.states.intersects(self.ctx.state) {
            log::error!("Marker {name} is not compliant with its position");
            return Err(J2kError::MarkerNotCompliant { marker: code });
        }
        let position = stream.tell() - MARKER_LENGTH as u64;
        let size = stream.read_u16()?;
        if size < MARKER_LENGTH {
            log::error!("Inconsistent marker size {size} for {name}");
            return Err(J2kError::InvalidMarkerSegmentSize { marker: code });
        }
        let payload_length = (size - MARKER_LENGTH) as u64;
        if payload_length > stream.bytes_left() {
            log::error!("Marker size inconsistent with stream length");
            return Err(J2kError::MarkerSizeExceedsStream);
        }
        if self.ctx.state.intersects(DecoderState::TILE_PART_HEADER)
            && !self.ctx.last_tile_part_in_codestream
        {
            let segment = size as u64 + MARKER_LENGTH as u64;
            if segment > self.ctx.tile_part_data_length {
                log::warn!(
                    "{name} segment runs past the end of tile-part {} of tile {}",
                    self.ctx.cp.tcps[self.ctx.current_tile as usize]
                        .current_tile_part
                        .unwrap_or(0),
                    self.ctx.current_tile
                );
            }
            self.ctx.tile_part_data_length = self.ctx.tile_part_data_length.saturating_sub(segment);
        }

        let mut payload = vec![0u8; payload_length as usize];
        stream.read_exact(&mut payload)?;
        if code == SOT {
            self.ctx.last_sot_position = position;
            check_tile_part_correction(&mut self.ctx, stream, &payload)?;
        }
        (handler.read)(&mut self.ctx, &payload).inspect_err(|_| {
            log::error!("Marker handler function failed to read the {name} marker segment");
        })?;
        log::trace!("{name} segment at offset {position}, {size} bytes");

        if self.ctx.in_main_header() {
            self.main_header_markers.insert(code);
        }
        if self.build_index && self.ctx.index.is_none() && code == J2kMarkerCode::ImageAndTileSize.code() {
            let mut index = CodestreamIndex::new(self.ctx.cp.num_tiles());
            index.main_header_start = self.codestream_start;
            index.add_main_marker(
                J2kMarkerCode::StartOfCodestream.code(),
                self.codestream_start,
                MARKER_LENGTH as u32,
            );
            self.ctx.index = Some(index);
        }
        self.record_marker(code, position, size as u32 + MARKER_LENGTH as u32);
        Ok(())
    }

    fn record_marker(&mut self, code: u16, position: u64, length: u32) {
        let in_main_header = self.ctx.in_main_header();
        let tile = self.ctx.current_tile;
        if let Some(index) = self.ctx.index.as_mut() {
            if in_main_header {
                index.add_main_marker(code, position, length);
            } else {
                index.add_tile_marker(tile, code, position, length);
            }
        }
    }

    /// Skips an unknown marker: scans 16-bit words until a marker legal in
    /// the current state is found and returns its code.
    fn read_unk(&mut self, stream: &mut dyn J2kStream, unknown: u16) -> Result<u16, J2kError> {
        log::warn!("Unknown marker {unknown:#06x}");
        let position = stream.tell() - MARKER_LENGTH as u64;
        loop {
            let code = stream.read_u16().map_err(|_| {
                log::error!("Stream too short while skipping unknown marker {unknown:#06x}");
                J2kError::UnknownMarkerRecoveryFailed
            })?;
            if code < 0xFF00 {
                continue;
            }
            let legal = match self.table.get(code) {
                Some(handler) => handler.states.intersects(self.ctx.state),
                None if code == SOD => self.ctx.state.intersects(DecoderState::TILE_PART_HEADER),
                None => continue,
            };
            if !legal {
                log::error!("Marker {code:#06x} is not compliant with its position");
                return Err(J2kError::MarkerNotCompliant { marker: code });
            }
            let skipped = (stream.tell() - MARKER_LENGTH as u64 - position) as u32;
            self.record_marker(unknown, position, skipped);
            return Ok(code);
        }
    }

    /// Reads one tile-part, starting after its SOT marker code.
    fn read_tile_part(&mut self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        let handler = self
            .table
            .get(SOT)
            .copied()
            .ok_or(J2kError::MissingSotMarker)?;
        self.read_segment(stream, handler)?;
        let tile = self.ctx.current_tile;
        if self.ctx.cp.tcps[tile as usize].current_tile_part == Some(0) {
            self.tile_starts.insert(tile, self.ctx.last_sot_position);
        }
        if self.ctx.skip_tile_data {
            return self.skip_tile_part(stream);
        }

        let mut code = self.read_marker(stream)?;
        while code != SOD {
            if code == EOC {
                log::error!("EOC found in the header of tile {}", self.ctx.current_tile);
                return Err(J2kError::MissingSodMarker);
            }
            code = self.process_marker(stream, code)?;
        }
        self.read_sod(stream)
    }

    /// Bytes from the current position to the end of the tile-part,
    /// clamped to the stream.
    fn tile_part_remaining(&self, stream: &dyn J2kStream) -> u64 {
        let left = stream.bytes_left();
        let wanted = if self.ctx.last_tile_part_in_codestream {
            left.saturating_sub(MARKER_LENGTH as u64)
        } else {
            self.ctx.tile_part_data_length
        };
        if wanted > left {
            log::warn!(
                "Tile part length size {wanted} inconsistent with stream length {left}. Tile may be truncated"
            );
            return left;
        }
        wanted
    }

    fn skip_tile_part(&mut self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        let length = self.tile_part_remaining(stream);
        stream.skip(length as i64)?;
        self.pop_packet_side_info(false)?;
        let tile = self.ctx.current_tile;
        if let Some(index) = self.ctx.index.as_mut() {
            index.end_tile_part(tile, stream.tell());
        }
        self.ctx.state = DecoderState::DATA;
        Ok(())
    }

    fn read_sod(&mut self, stream: &mut dyn J2kStream) -> Result<(), J2kError> {
        let tile = self.ctx.current_tile;
        let sod_position = stream.tell() - MARKER_LENGTH as u64;
        if let Some(index) = self.ctx.index.as_mut() {
            index.add_tile_marker(tile, SOD, sod_position, MARKER_LENGTH as u32);
            index.end_tile_part_header(tile, stream.tell());
        }
        if !self.ctx.last_tile_part_in_codestream {
            self.ctx.tile_part_data_length = self
                .ctx
                .tile_part_data_length
                .saturating_sub(MARKER_LENGTH as u64);
        }
        let length = self.tile_part_remaining(stream);
        let chunk = stream.read_chunk(length as usize)?;
        if (chunk.len() as u64) < length {
            log::warn!("Tile {tile} data is shorter than signalled");
        }
        log::trace!("SOD: {} bytes of data for tile {tile}", chunk.len());
        self.ctx.cp.tcps[tile as usize]
            .tile_data
            .get_or_insert_with(TileData::new)
            .push(chunk);
        self.pop_packet_side_info(true)?;
        if let Some(index) = self.ctx.index.as_mut() {
            index.end_tile_part(tile, stream.tell());
        }
        self.ctx.state = DecoderState::DATA;
        Ok(())
    }

    /// Consumes the PPM and PLM entries of the tile-part just read. They
    /// are attached to the tile when `keep` is set.
    fn pop_packet_side_info(&mut self, keep: bool) -> Result<(), J2kError> {
        let cp = &mut self.ctx.cp;
        let tcp = &mut cp.tcps[self.ctx.current_tile as usize];
        if let Some(ppm) = cp.ppm.as_mut() {
            let headers = ppm.next_tile_part()?;
            if keep {
                tcp.packet_headers.extend_from_slice(&headers);
            }
        }
        if let Some(plm) = cp.plm.as_mut() {
            if let Some(lengths) = plm.next_tile_part() {
                if keep {
                    tcp.packet_lengths.extend(lengths);
                }
            }
        }
        Ok(())
    }

    /// Reads the marker following tile-part data.
    fn read_tile_end(&mut self, stream: &mut dyn J2kStream) -> Result<TileEnd, J2kError> {
        if stream.bytes_left() < MARKER_LENGTH as u64 {
            log::warn!("Stream does not end with EOC");
            self.ctx.state = DecoderState::NO_EOC;
            return Ok(TileEnd::Eoc);
        }
        match stream.read_u16()? {
            EOC => {
                self.ctx.state = DecoderState::EOC;
                Ok(TileEnd::Eoc)
            }
            SOT => {
                self.ctx.state = DecoderState::TILE_PART_HEADER_SOT;
                self.current_marker = SOT;
                Ok(TileEnd::NextTile {
                    tile: Self::peek_isot(stream),
                })
            }
            code => Ok(TileEnd::UnexpectedMarker(code)),
        }
    }

    fn peek_isot(stream: &mut dyn J2kStream) -> Option<u16> {
        let position = stream.tell();
        let tile = stream.read_u16().and_then(|_| stream.read_u16()).ok();
        stream.seek(SeekFrom::Start(position)).ok()?;
        tile
    }

    /// Reads tile-parts until a tile has all of its data and returns its
    /// index, or `None` once the codestream is exhausted.
    pub fn next_tile(&mut self, stream: &mut dyn J2kStream) -> Result<Option<u16>, J2kError> {
        loop {
            if self.ctx.state.intersects(DecoderState::EOC | DecoderState::NO_EOC) {
                return match self.take_pending_tile() {
                    Some(tile) => self.complete_tile(tile).map(Some),
                    None => Ok(None),
                };
            }
            if self.current_marker != SOT {
                log::error!("Expected a SOT marker, found {:#06x}", self.current_marker);
                return Err(J2kError::MissingSotMarker);
            }
            self.read_tile_part(stream)?;
            self.current_marker = 0;

            let tile = self.ctx.current_tile;
            let skipped = self.ctx.skip_tile_data;
            let last_part = self.ctx.last_tile_part_read;
            let end = self.read_tile_end(stream)?;
            let tcp = &self.ctx.cp.tcps[tile as usize];
            let complete = !skipped
                && tcp.tile_data.is_some()
                && (last_part
                    || matches!(end, TileEnd::NextTile { tile: next }
                        if tcp.num_tile_parts == 0 && next.is_some_and(|next| next != tile)));

            if let TileEnd::UnexpectedMarker(code) = end {
                let remaining = self
                    .tiles_expected
                    .saturating_sub(self.tiles_returned + complete as u32);
                if remaining > 0 {
                    log::error!(
                        "Stream too short, expected SOT or EOC but found marker {code:#06x} with {remaining} tiles left"
                    );
                    return Err(J2kError::UnexpectedMarkerAtEndOfTile { marker: code });
                }
                log::warn!("Expected EOC or SOT but found marker {code:#06x}. Ignoring the rest of the codestream");
                self.ctx.state = DecoderState::EOC;
            }
            if complete {
                self.tiles_returned += 1;
                return self.complete_tile(tile).map(Some);
            }
        }
    }

    /// First tile still holding data once the codestream has ended.
    fn take_pending_tile(&mut self) -> Option<u16> {
        let tcp = self.ctx.cp.tcps.iter().find(|tcp| tcp.tile_data.is_some())?;
        let parts_read = tcp.current_tile_part.map_or(0, |part| part as u16 + 1);
        if tcp.num_tile_parts != 0 && parts_read < tcp.num_tile_parts as u16 {
            log::warn!(
                "Tile {} is incomplete: {parts_read} of {} tile-parts read",
                tcp.index,
                tcp.num_tile_parts
            );
        }
        self.tiles_returned += 1;
        Some(tcp.index)
    }

    /// Final per-tile header processing once all of a tile's parts are in.
    fn complete_tile(&mut self, tile: u16) -> Result<u16, J2kError> {
        let tcp = &mut self.ctx.cp.tcps[tile as usize];
        merge_ppt(tcp);
        tcp.validate_quantization()?;
        Ok(tile)
    }
}
